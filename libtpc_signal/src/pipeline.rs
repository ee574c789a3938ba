//! The pipeline engine: builds the stages from the configuration, checks that they chain,
//! binds their observables, and feeds events through them on a pool of workers.
//!
//! Every worker owns a clone of each stage, except for single-thread-only stages which
//! are shared by all workers behind a mutex. Events are distributed round-robin and the
//! records are put back in event order once all workers are done.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::channel_activity::ChannelActivity;
use super::config::{ProcessConfig, StageConfig};
use super::constants::UNSET_OBSERVABLE;
use super::electron_diffusion::ElectronDiffusion;
use super::error::{ConfigError, PipelineError, ProcessError};
use super::event::{Event, EventInfo, EventKind, EventRef};
use super::event_process::{
    EventProcess, FriendHandle, FriendRegistry, RunContext, StageKind, StageOutcome, StageParameters,
    StageSummary,
};
use super::hits_to_signal::HitsToSignal;
use super::observable::{Cut, ObservableKind, ObservableSpec, ObservableStore, ObservableValue, OutputLevel};
use super::signal_to_hits::SignalToHits;
use super::smearing::Smearing;
use super::trigger_analysis::TriggerAnalysis;
use super::worker_status::{BarColor, WorkerStatus};

/// Fraction of a worker's events between two progress messages
const PROGRESS_STEP: f32 = 0.01;

/// Build a stage from its configuration
pub fn build_stage(config: &StageConfig, ctx: &Arc<RunContext>) -> Box<dyn EventProcess> {
    let name = config.name();
    match &config.process {
        ProcessConfig::HitsToSignal(c) => Box::new(HitsToSignal::new(&name, c.clone(), ctx.clone())),
        ProcessConfig::SignalToHits(c) => Box::new(SignalToHits::new(&name, c.clone(), ctx.clone())),
        ProcessConfig::ElectronDiffusion(c) => {
            Box::new(ElectronDiffusion::new(&name, c.clone(), ctx.clone()))
        }
        ProcessConfig::Smearing(c) => Box::new(Smearing::new(&name, c.clone())),
        ProcessConfig::TriggerAnalysis(c) => Box::new(TriggerAnalysis::new(&name, c.clone())),
        ProcessConfig::ChannelActivity(c) => {
            Box::new(ChannelActivity::new(&name, c.clone(), ctx.clone()))
        }
    }
}

/// How the pipeline records a stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOptions {
    pub output_level: OutputLevel,
    /// None records every observable the stage provides
    pub observables: Option<Vec<String>>,
    pub cuts: Vec<Cut>,
}

impl From<&StageConfig> for StageOptions {
    fn from(value: &StageConfig) -> Self {
        Self {
            output_level: value.output_level,
            observables: value.observables.clone(),
            cuts: value.cuts(),
        }
    }
}

/// What the pipeline knows about a stage, fixed at construction
#[derive(Debug, Clone, PartialEq)]
pub struct StageBinding {
    pub name: String,
    pub kind: StageKind,
    pub output_level: OutputLevel,
    pub observables: Vec<ObservableSpec>,
    pub cuts: Vec<Cut>,
}

impl StageBinding {
    fn new(process: &dyn EventProcess, options: StageOptions) -> Result<Self, ConfigError> {
        let available = process.available_observables();
        let observables = if options.output_level == OutputLevel::NoOutput {
            Vec::new()
        } else {
            match options.observables {
                None => available,
                Some(names) => {
                    let mut bound = Vec::with_capacity(names.len());
                    for name in names {
                        let Some(spec) = available.iter().find(|s| s.name == name) else {
                            return Err(ConfigError::UnknownObservable {
                                stage: process.name().to_string(),
                                observable: name,
                            });
                        };
                        bound.push(spec.clone());
                    }
                    bound
                }
            }
        };
        for cut in options.cuts.iter() {
            if !observables.iter().any(|s| s.name == cut.observable) {
                return Err(ConfigError::BadCut {
                    stage: process.name().to_string(),
                    observable: cut.observable.clone(),
                });
            }
        }
        Ok(Self {
            name: process.name().to_string(),
            kind: process.kind(),
            output_level: options.output_level,
            observables,
            cuts: options.cuts,
        })
    }
}

/// Parameters of a stage recorded with an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub stage: String,
    pub parameters: StageParameters,
}

/// A copy of a stage's output event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: String,
    pub event: Event,
}

/// Everything recorded for one input event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub info: EventInfo,
    pub kept: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped_by: Option<String>,
    /// `<stage>.<observable>` -> value
    #[serde(default)]
    pub observables: BTreeMap<String, ObservableValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snapshots: Vec<StageSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stage_events: Vec<StageEvent>,
    /// Output of the last stage, for kept events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
}

impl EventRecord {
    fn new(info: &EventInfo) -> Self {
        Self {
            info: info.clone(),
            kept: false,
            dropped_by: None,
            observables: BTreeMap::new(),
            snapshots: Vec::new(),
            stage_events: Vec::new(),
            event: None,
        }
    }

    pub fn observable(&self, stage: &str, name: &str) -> Option<&ObservableValue> {
        self.observables.get(&super::observable::observable_key(stage, name))
    }
}

/// Result of pushing one event through the pipeline
#[derive(Debug, Clone, Copy)]
pub enum EventOutcome<'a> {
    /// The output of the last stage
    Kept(EventRef<'a>),
    Dropped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub events_read: u64,
    pub events_kept: u64,
    pub dropped_by_stage: BTreeMap<String, u64>,
    /// Seconds
    pub wall_time: f64,
}

impl RunStatistics {
    fn count(&mut self, record: &EventRecord) {
        self.events_read += 1;
        if record.kept {
            self.events_kept += 1;
        } else if let Some(stage) = &record.dropped_by {
            *self.dropped_by_stage.entry(stage.clone()).or_insert(0) += 1;
        }
    }

    fn merge(&mut self, other: &Self) {
        self.events_read += other.events_read;
        self.events_kept += other.events_kept;
        for (stage, n) in other.dropped_by_stage.iter() {
            *self.dropped_by_stage.entry(stage.clone()).or_insert(0) += n;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub statistics: RunStatistics,
    pub stages: Vec<StageSummary>,
}

impl RunSummary {
    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub summary: RunSummary,
    pub records: Vec<EventRecord>,
}

type SharedProcess = Arc<Mutex<Box<dyn EventProcess>>>;

enum StageSlot {
    Owned(Box<dyn EventProcess>),
    Shared(SharedProcess),
}

struct PipelineStage {
    binding: Arc<StageBinding>,
    slot: StageSlot,
}

/// A worker's instance of a stage
enum WorkerStage {
    Owned(Box<dyn EventProcess>),
    /// Output is copied to the scratch buffer so the lock is not held by the next stage
    Shared {
        process: SharedProcess,
        scratch: Event,
    },
}

impl WorkerStage {
    fn output(&self) -> EventRef<'_> {
        match self {
            Self::Owned(process) => process.output_event(),
            Self::Shared { scratch, .. } => scratch.view(),
        }
    }
}

fn poisoned_stage(stage: &str) -> PipelineError {
    log::error!("Stage {stage} was poisoned by a panicking worker");
    PipelineError::Aborted
}

/// Run one stage on one event and record what its binding asks for
fn run_stage(
    process: &mut dyn EventProcess,
    binding: &StageBinding,
    input: EventRef<'_>,
    store: &mut ObservableStore,
    record: &mut EventRecord,
) -> Result<StageOutcome, ProcessError> {
    process.begin_event(input);
    let mut outcome = process.process_event(input, &mut store.sink(&binding.name))?;

    for spec in binding.observables.iter().filter(|s| s.kind == ObservableKind::Field) {
        let value = process
            .field_observable(&spec.name)
            .unwrap_or(ObservableValue::Scalar(UNSET_OBSERVABLE));
        store.set(&binding.name, &spec.name, value);
    }

    if outcome == StageOutcome::Kept {
        for cut in binding.cuts.iter() {
            let value = store
                .get(&binding.name, &cut.observable)
                .and_then(ObservableValue::as_scalar);
            if let Some(value) = value {
                if !cut.passes(value) {
                    log::debug!(
                        "Event {} cut by {}: {} = {} outside [{}, {}]",
                        record.info.id,
                        binding.name,
                        cut.observable,
                        value,
                        cut.min,
                        cut.max
                    );
                    outcome = StageOutcome::Dropped;
                    break;
                }
            }
        }
    }
    process.end_event();

    if binding.output_level >= OutputLevel::InternalVar {
        record.snapshots.push(StageSnapshot {
            stage: binding.name.clone(),
            parameters: process.parameters(),
        });
    }
    if outcome == StageOutcome::Kept && binding.output_level >= OutputLevel::FullOutput {
        record.stage_events.push(StageEvent {
            stage: binding.name.clone(),
            event: process.output_event().to_event(),
        });
    }
    Ok(outcome)
}

struct Worker {
    id: usize,
    stages: Vec<(Arc<StageBinding>, WorkerStage)>,
    store: ObservableStore,
    collect_events: bool,
}

struct WorkerOutput {
    records: Vec<EventRecord>,
    statistics: RunStatistics,
    worker: Worker,
}

impl Worker {
    fn new(id: usize, stages: &[PipelineStage], collect_events: bool) -> Self {
        let mut store = ObservableStore::default();
        let mut worker_stages = Vec::with_capacity(stages.len());
        for stage in stages.iter() {
            for spec in stage.binding.observables.iter() {
                store.declare(&stage.binding.name, spec);
            }
            let worker_stage = match &stage.slot {
                StageSlot::Owned(template) => {
                    let mut process = template.box_clone();
                    process.prepare_worker(id);
                    WorkerStage::Owned(process)
                }
                StageSlot::Shared(process) => {
                    let kind = match process.lock() {
                        Ok(guard) => guard.output_kind(),
                        Err(poisoned) => poisoned.into_inner().output_kind(),
                    };
                    WorkerStage::Shared {
                        process: process.clone(),
                        scratch: Event::empty(kind),
                    }
                }
            };
            worker_stages.push((stage.binding.clone(), worker_stage));
        }
        Self {
            id,
            stages: worker_stages,
            store,
            collect_events,
        }
    }

    /// Output of the last stage
    fn final_output(&self) -> Option<EventRef<'_>> {
        self.stages.last().map(|(_, stage)| stage.output())
    }

    fn process_event(&mut self, event: &Event) -> Result<EventRecord, PipelineError> {
        self.store.reset();
        let mut record = EventRecord::new(event.info());
        let mut dropped_by = None;
        for idx in 0..self.stages.len() {
            let (done, rest) = self.stages.split_at_mut(idx);
            let input = match done.last() {
                Some((_, previous)) => previous.output(),
                None => event.view(),
            };
            let (binding, stage) = &mut rest[0];
            let outcome = match stage {
                WorkerStage::Owned(process) => {
                    run_stage(process.as_mut(), binding, input, &mut self.store, &mut record)?
                }
                WorkerStage::Shared { process, scratch } => {
                    let mut guard = process.lock().map_err(|_| poisoned_stage(&binding.name))?;
                    let outcome = run_stage(guard.as_mut(), binding, input, &mut self.store, &mut record)?;
                    if outcome == StageOutcome::Kept {
                        guard.output_event().copy_into(scratch);
                    }
                    outcome
                }
            };
            if outcome == StageOutcome::Dropped {
                dropped_by = Some(binding.name.clone());
                break;
            }
        }

        record.kept = dropped_by.is_none();
        record.dropped_by = dropped_by;
        record.observables = self.store.values().clone();
        if record.kept && self.collect_events {
            record.event = self.final_output().map(|e| e.to_event());
        }
        Ok(record)
    }

    fn report(&self, tx: &Option<Sender<WorkerStatus>>, progress: f32, processed: usize, color: BarColor) -> Result<(), PipelineError> {
        if let Some(tx) = tx {
            tx.send(WorkerStatus::new(progress, processed, self.id, color))?;
        }
        Ok(())
    }

    fn process_events(
        &mut self,
        subset: &[Event],
        tx: &Option<Sender<WorkerStatus>>,
        abort: &AtomicBool,
        records: &mut Vec<EventRecord>,
        statistics: &mut RunStatistics,
    ) -> Result<(), PipelineError> {
        let total = subset.len();
        let flush_every = ((total as f32 * PROGRESS_STEP) as usize).max(1);
        self.report(tx, 0.0, 0, BarColor::CYAN)?;
        for (count, event) in subset.iter().enumerate() {
            if abort.load(Ordering::Relaxed) {
                return Err(PipelineError::Aborted);
            }
            let record = self.process_event(event)?;
            statistics.count(&record);
            records.push(record);
            if (count + 1) % flush_every == 0 {
                self.report(tx, (count + 1) as f32 / total as f32, count + 1, BarColor::CYAN)?;
            }
        }
        self.report(tx, 1.0, total, BarColor::GREEN)?;
        Ok(())
    }

    /// Process a subset of the run's events
    fn process_subset(
        mut self,
        subset: Vec<Event>,
        tx: Option<Sender<WorkerStatus>>,
        abort: Arc<AtomicBool>,
    ) -> Result<WorkerOutput, PipelineError> {
        let mut records = Vec::with_capacity(subset.len());
        let mut statistics = RunStatistics::default();
        if let Err(e) = self.process_events(&subset, &tx, &abort, &mut records, &mut statistics) {
            abort.store(true, Ordering::Relaxed);
            if !matches!(e, PipelineError::Aborted) {
                log::error!("Worker {} failed: {e}", self.id);
            }
            // Best effort, the front end may already be gone
            let _ = self.report(&tx, 1.0, records.len(), BarColor::RED);
            return Err(e);
        }
        Ok(WorkerOutput {
            records,
            statistics,
            worker: self,
        })
    }
}

/// Divide the events into a set of subsets (per thread/worker)
pub fn create_subsets<T>(items: Vec<T>, n_subsets: usize) -> Vec<Vec<T>> {
    let n_subsets = n_subsets.max(1);
    let mut subsets: Vec<Vec<T>> = (0..n_subsets).map(|_| Vec::new()).collect();
    for (idx, item) in items.into_iter().enumerate() {
        subsets[idx % n_subsets].push(item)
    }
    subsets
}

pub struct Pipeline {
    ctx: Arc<RunContext>,
    stages: Vec<PipelineStage>,
    friends: Vec<FriendRegistry>,
    n_workers: usize,
    collect_events: bool,
    abort: Arc<AtomicBool>,
    started: bool,
    local: Option<Worker>,
    local_statistics: RunStatistics,
}

impl Pipeline {
    /// Build the pipeline described by the context's configuration
    pub fn from_config(ctx: Arc<RunContext>) -> Result<Self, PipelineError> {
        ctx.config.validate()?;
        let stages = ctx
            .config
            .stages
            .iter()
            .map(|s| (build_stage(s, &ctx), StageOptions::from(s)))
            .collect();
        Ok(Self::new(ctx, stages)?)
    }

    /// Build a pipeline from already constructed stages
    pub fn new(
        ctx: Arc<RunContext>,
        processes: Vec<(Box<dyn EventProcess>, StageOptions)>,
    ) -> Result<Self, ConfigError> {
        if processes.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }
        for (idx, (process, _)) in processes.iter().enumerate() {
            if processes[..idx].iter().any(|(p, _)| p.name() == process.name()) {
                return Err(ConfigError::DuplicateStageName(process.name().to_string()));
            }
            if idx > 0 {
                let previous = processes[idx - 1].0.output_kind();
                if previous != process.input_kind() {
                    return Err(ConfigError::ChainMismatch {
                        stage: process.name().to_string(),
                        expected: process.input_kind(),
                        found: previous,
                    });
                }
            }
        }

        let friends = processes
            .iter()
            .enumerate()
            .map(|(idx, (process, _))| {
                let handles = process
                    .friend_requests()
                    .iter()
                    .filter_map(|kind| {
                        processes
                            .iter()
                            .enumerate()
                            .find(|(other, (p, _))| *other != idx && p.kind() == *kind)
                            .map(|(_, (p, _))| FriendHandle::new(p.kind(), p.name(), p.parameters()))
                    })
                    .collect();
                FriendRegistry::new(handles)
            })
            .collect();

        let mut stages = Vec::with_capacity(processes.len());
        for (process, options) in processes {
            let binding = Arc::new(StageBinding::new(process.as_ref(), options)?);
            let slot = if process.is_single_thread_only() {
                StageSlot::Shared(Arc::new(Mutex::new(process)))
            } else {
                StageSlot::Owned(process)
            };
            stages.push(PipelineStage { binding, slot });
        }

        Ok(Self {
            n_workers: ctx.config.n_threads.max(1) as usize,
            collect_events: ctx.config.write_events,
            ctx,
            stages,
            friends,
            abort: Arc::new(AtomicBool::new(false)),
            started: false,
            local: None,
            local_statistics: RunStatistics::default(),
        })
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    pub fn bindings(&self) -> impl Iterator<Item = &StageBinding> {
        self.stages.iter().map(|s| s.binding.as_ref())
    }

    pub fn input_kind(&self) -> Option<EventKind> {
        self.stages.first().map(|s| match &s.slot {
            StageSlot::Owned(p) => p.input_kind(),
            StageSlot::Shared(p) => match p.lock() {
                Ok(guard) => guard.input_kind(),
                Err(poisoned) => poisoned.into_inner().input_kind(),
            },
        })
    }

    /// Set to true to stop the workers before their next event
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    pub fn set_n_workers(&mut self, n_workers: usize) {
        self.n_workers = n_workers.max(1);
    }

    pub fn set_collect_events(&mut self, collect_events: bool) {
        self.collect_events = collect_events;
    }

    /// Resolve every stage's collaborators. Called by the first event or run if needed.
    pub fn begin_run(&mut self) -> Result<(), PipelineError> {
        if self.started {
            return Ok(());
        }
        for (stage, friends) in self.stages.iter_mut().zip(self.friends.iter()) {
            match &mut stage.slot {
                StageSlot::Owned(process) => process.begin_run(friends)?,
                StageSlot::Shared(process) => process
                    .lock()
                    .map_err(|_| poisoned_stage(&stage.binding.name))?
                    .begin_run(friends)?,
            }
            log::info!(
                "Stage {} ({}) ready, recording {} observables",
                stage.binding.name,
                stage.binding.kind,
                stage.binding.observables.len()
            );
        }
        self.started = true;
        Ok(())
    }

    /// Push a single event through the pipeline on the calling thread
    pub fn process_event(&mut self, event: &Event) -> Result<(EventRecord, EventOutcome<'_>), PipelineError> {
        self.begin_run()?;
        let collect = self.collect_events;
        let stages = &self.stages;
        let worker = self.local.get_or_insert_with(|| Worker::new(0, stages, collect));
        let record = worker.process_event(event)?;
        self.local_statistics.count(&record);
        let outcome = match (record.kept, worker.final_output()) {
            (true, Some(output)) => EventOutcome::Kept(output),
            _ => EventOutcome::Dropped,
        };
        Ok((record, outcome))
    }

    /// Process a batch of events on the worker pool and end the run
    pub fn run(mut self, events: Vec<Event>, tx: Option<&Sender<WorkerStatus>>) -> Result<RunOutput, PipelineError> {
        let start = Instant::now();
        self.begin_run()?;
        let n_events = events.len();
        let n_workers = self.n_workers.min(n_events).max(1);
        log::info!("Processing {n_events} events with {n_workers} workers");

        let workers: Vec<(Worker, Vec<Event>)> = create_subsets(events, n_workers)
            .into_iter()
            .enumerate()
            .map(|(id, subset)| (Worker::new(id, &self.stages, self.collect_events), subset))
            .collect();

        let abort = self.abort.clone();
        let results: Vec<Result<WorkerOutput, PipelineError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = workers
                .into_iter()
                .map(|(worker, subset)| {
                    let tx = tx.cloned();
                    let abort = abort.clone();
                    scope.spawn(move || worker.process_subset(subset, tx, abort))
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(id, handle)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(PipelineError::WorkerPanicked(id)))
                })
                .collect()
        });

        let mut outputs = Vec::with_capacity(results.len());
        let mut failure: Option<PipelineError> = None;
        for result in results {
            match result {
                Ok(output) => outputs.push(output),
                Err(PipelineError::Aborted) if failure.is_some() => (),
                Err(e) => {
                    if failure.is_none() || matches!(failure, Some(PipelineError::Aborted)) {
                        failure = Some(e);
                    }
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let mut statistics = std::mem::take(&mut self.local_statistics);
        let mut records = Vec::with_capacity(n_events);
        let mut workers = Vec::with_capacity(outputs.len() + 1);
        for output in outputs {
            statistics.merge(&output.statistics);
            records.extend(output.records);
            workers.push(output.worker);
        }
        records.sort_by_key(|r| (r.info.id, r.info.sub_id));
        workers.extend(self.local.take());

        let stages = self.end_run(workers)?;
        statistics.wall_time = start.elapsed().as_secs_f64();
        log::info!(
            "Processed {} events in {:.3} s, kept {}",
            statistics.events_read,
            statistics.wall_time,
            statistics.events_kept
        );
        for (stage, n) in statistics.dropped_by_stage.iter() {
            log::info!("Stage {stage} dropped {n} events");
        }
        Ok(RunOutput {
            summary: RunSummary { statistics, stages },
            records,
        })
    }

    /// End a run made only of `process_event` calls
    pub fn finish(mut self) -> Result<RunSummary, PipelineError> {
        let workers: Vec<Worker> = self.local.take().into_iter().collect();
        let stages = self.end_run(workers)?;
        Ok(RunSummary {
            statistics: std::mem::take(&mut self.local_statistics),
            stages,
        })
    }

    /// Collect the stage summaries. Worker copies are merged, shared stages end once.
    fn end_run(&mut self, mut workers: Vec<Worker>) -> Result<Vec<StageSummary>, PipelineError> {
        let mut summaries = Vec::with_capacity(self.stages.len());
        for (idx, stage) in self.stages.iter().enumerate() {
            let summary = match &stage.slot {
                StageSlot::Shared(process) => process
                    .lock()
                    .map_err(|_| poisoned_stage(&stage.binding.name))?
                    .end_run(),
                StageSlot::Owned(_) => {
                    let mut summary = StageSummary::new(&stage.binding.name);
                    for worker in workers.iter_mut() {
                        if let Some((_, WorkerStage::Owned(process))) = worker.stages.get_mut(idx) {
                            summary.merge(&process.end_run());
                        }
                    }
                    summary
                }
            };
            summaries.push(summary);
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hits::{HitType, HitsEvent};
    use crate::hits_to_signal::HitsToSignalConfig;
    use crate::readout::{Readout, ReadoutPlane};
    use crate::readout_description::pixel_grid_module;
    use crate::smearing::SmearingConfig;
    use crate::trigger_analysis::TriggerAnalysisConfig;

    fn context(n_threads: i32) -> Arc<RunContext> {
        let mut plane = ReadoutPlane::new(0, [0.0; 3], [0.0, 0.0, -1.0], [0.0, 0.0, 100.0], 1.0).unwrap();
        let mut module = pixel_grid_module("pixels", 10, 10, 1.0).placed(0, [-5.0, -5.0], 0.0);
        for channel in module.channels_mut() {
            channel.daq_id = channel.id;
        }
        plane.add_module(module).unwrap();
        let config = Config {
            n_threads,
            ..Default::default()
        };
        Arc::new(RunContext::new(config, Some(Readout::from_planes(vec![plane]).unwrap()), None))
    }

    fn hits_to_signal(ctx: &Arc<RunContext>) -> Box<dyn EventProcess> {
        let config = HitsToSignalConfig {
            sampling: Some(1.0),
            drift_velocity: Some(1.0),
            ..Default::default()
        };
        Box::new(HitsToSignal::new("hits_to_signal", config, ctx.clone()))
    }

    fn event(id: i32, x: f64) -> Event {
        let mut hits = HitsEvent::new(EventInfo::new(id));
        hits.add_hit(x, 0.0, 50.0, 10.0, 0.0, HitType::XYZ);
        Event::Hits(hits)
    }

    #[test]
    fn test_chain_mismatch() {
        let ctx = context(1);
        let stages: Vec<(Box<dyn EventProcess>, StageOptions)> = vec![
            (hits_to_signal(&ctx), StageOptions::default()),
            (Box::new(Smearing::new("smearing", SmearingConfig::default())), StageOptions::default()),
        ];
        assert!(matches!(
            Pipeline::new(ctx, stages),
            Err(ConfigError::ChainMismatch {
                expected: EventKind::Hits,
                found: EventKind::Signal,
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_observable() {
        let ctx = context(1);
        let options = StageOptions {
            observables: Some(vec![String::from("nope")]),
            ..Default::default()
        };
        assert!(matches!(
            Pipeline::new(ctx.clone(), vec![(hits_to_signal(&ctx), options)]),
            Err(ConfigError::UnknownObservable { .. })
        ));
    }

    #[test]
    fn test_process_event_and_drop() {
        let ctx = context(1);
        let mut pipeline = Pipeline::new(ctx.clone(), vec![(hits_to_signal(&ctx), StageOptions::default())]).unwrap();
        let (record, outcome) = pipeline.process_event(&event(1, 0.5)).unwrap();
        assert!(record.kept);
        match outcome {
            EventOutcome::Kept(output) => assert_eq!(output.as_signal().unwrap().num_signals(), 1),
            EventOutcome::Dropped => panic!("Event should be kept"),
        }
        assert_eq!(
            record.observable("hits_to_signal", "unmapped_hits"),
            Some(&ObservableValue::Scalar(0.0))
        );

        let (record, outcome) = pipeline.process_event(&event(2, 50.0)).unwrap();
        assert!(matches!(outcome, EventOutcome::Dropped));
        assert_eq!(record.dropped_by.as_deref(), Some("hits_to_signal"));
        assert!(record.event.is_none());

        let summary = pipeline.finish().unwrap();
        assert_eq!(summary.statistics.events_read, 2);
        assert_eq!(summary.statistics.dropped_by_stage["hits_to_signal"], 1);
        assert_eq!(summary.stage("hits_to_signal").unwrap().counters["unmapped_hits"], 1);
    }

    #[test]
    fn test_cut_drops_event() {
        let ctx = context(1);
        let options = StageOptions {
            output_level: OutputLevel::FullOutput,
            cuts: vec![Cut {
                observable: String::from("integral"),
                min: 20.0,
                max: 100.0,
            }],
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(ctx.clone(), vec![(hits_to_signal(&ctx), options)]).unwrap();
        let (record, _) = pipeline.process_event(&event(1, 0.5)).unwrap();
        assert!(!record.kept);
        assert_eq!(record.snapshots.len(), 1);
        assert_eq!(record.snapshots[0].parameters.get("sampling"), Some(1.0));
        assert!(record.stage_events.is_empty());
    }

    #[test]
    fn test_parallel_run_is_ordered() {
        let ctx = context(3);
        let trigger = TriggerAnalysis::new(
            "trigger",
            TriggerAnalysisConfig {
                adc_length: 10,
                thresholds: vec![5.0],
            },
        );
        let stages: Vec<(Box<dyn EventProcess>, StageOptions)> = vec![
            (hits_to_signal(&ctx), StageOptions::default()),
            (Box::new(trigger), StageOptions::default()),
            (
                Box::new(ChannelActivity::new("activity", Default::default(), ctx.clone())),
                StageOptions::default(),
            ),
        ];
        let pipeline = Pipeline::new(ctx, stages).unwrap();
        let events: Vec<Event> = (0..50).map(|id| event(id, if id % 5 == 0 { 50.0 } else { 0.5 })).collect();
        let (tx, rx) = std::sync::mpsc::channel();
        let output = pipeline.run(events, Some(&tx)).unwrap();
        drop(tx);

        let ids: Vec<i32> = output.records.iter().map(|r| r.info.id).collect();
        assert_eq!(ids, (0..50).collect::<Vec<i32>>());
        assert_eq!(output.summary.statistics.events_read, 50);
        assert_eq!(output.summary.statistics.events_kept, 40);
        for record in output.records.iter().filter(|r| r.kept) {
            assert_eq!(record.observable("trigger", "trigger_starts"), Some(&ObservableValue::Scalar(50.0)));
            assert!(record.event.is_some());
        }
        let activity = output.summary.stage("activity").unwrap();
        assert_eq!(activity.counters["events"], 40);
        let h2s = output.summary.stage("hits_to_signal").unwrap();
        assert_eq!(h2s.counters["events_without_signals"], 10);
        assert!(rx.iter().any(|status| status.progress == 1.0));
    }

    #[test]
    fn test_abort_before_run() {
        let ctx = context(2);
        let pipeline = Pipeline::new(ctx.clone(), vec![(hits_to_signal(&ctx), StageOptions::default())]).unwrap();
        pipeline.abort_handle().store(true, Ordering::Relaxed);
        let events = (0..4).map(|id| event(id, 0.5)).collect();
        assert!(matches!(pipeline.run(events, None), Err(PipelineError::Aborted)));
    }

    #[test]
    fn test_subsets_round_robin() {
        let subsets = create_subsets((0..7).collect(), 3);
        assert_eq!(subsets, vec![vec![0, 3, 6], vec![1, 4], vec![2, 5]]);
    }
}
