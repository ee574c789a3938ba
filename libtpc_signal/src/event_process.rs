//! The interface every processing stage implements, and the run-wide context handed to
//! the stages when they are built.
use std::collections::BTreeMap;
use std::sync::Arc;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use super::config::Config;
use super::error::{PipelineError, ProcessError};
use super::event::{EventKind, EventRef};
use super::gas::GasProperties;
use super::histogram::Histogram1D;
use super::hits::HitsEvent;
use super::observable::{ObservableSink, ObservableSpec, ObservableValue};
use super::readout::Readout;
use super::signal::SignalEvent;

/// Identifies the type of a stage, used for friend lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    HitsToSignal,
    SignalToHits,
    ElectronDiffusion,
    Smearing,
    TriggerAnalysis,
    ChannelActivity,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HitsToSignal => "hits_to_signal",
            Self::SignalToHits => "signal_to_hits",
            Self::ElectronDiffusion => "electron_diffusion",
            Self::Smearing => "smearing",
            Self::TriggerAnalysis => "trigger_analysis",
            Self::ChannelActivity => "channel_activity",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of processing one event in one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage output buffer holds the transformed event
    Kept,
    /// The event stops here
    Dropped,
}

/// Named numeric parameters of a stage. Parameters that were neither configured nor
/// resolved are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageParameters {
    values: BTreeMap<String, f64>,
}

impl StageParameters {
    /// Record a parameter if it has a value
    pub fn set(&mut self, name: &str, value: Option<f64>) {
        if let Some(v) = value {
            self.values.insert(name.to_string(), v);
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }
}

/// Read-only view of another stage's parameters
#[derive(Debug, Clone)]
pub struct FriendHandle {
    pub kind: StageKind,
    pub name: String,
    parameters: StageParameters,
}

impl FriendHandle {
    pub fn new(kind: StageKind, name: &str, parameters: StageParameters) -> Self {
        Self {
            kind,
            name: name.to_string(),
            parameters,
        }
    }

    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.parameters.get(name)
    }
}

/// The friends resolved for one stage when the pipeline is built, in request order
#[derive(Debug, Clone, Default)]
pub struct FriendRegistry {
    handles: Vec<FriendHandle>,
}

impl FriendRegistry {
    pub fn new(handles: Vec<FriendHandle>) -> Self {
        Self { handles }
    }

    pub fn get(&self, kind: StageKind) -> Option<&FriendHandle> {
        self.handles.iter().find(|h| h.kind == kind)
    }

    /// The first friend providing a parameter
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.handles.iter().find_map(|h| h.parameter(name))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Aggregated stage results emitted at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: String,
    pub counters: BTreeMap<String, u64>,
    pub histograms: Vec<Histogram1D>,
}

impl StageSummary {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            ..Default::default()
        }
    }

    pub fn add_counter(&mut self, name: &str, value: u64) {
        *self.counters.entry(name.to_string()).or_insert(0) += value;
    }

    pub fn histogram(&self, name: &str) -> Option<&Histogram1D> {
        self.histograms.iter().find(|h| h.name == name)
    }

    /// Add the results of another worker's copy of the same stage
    pub fn merge(&mut self, other: &Self) {
        for (name, value) in other.counters.iter() {
            self.add_counter(name, *value);
        }
        for hist in other.histograms.iter() {
            match self.histograms.iter_mut().find(|h| h.name == hist.name) {
                Some(mine) => {
                    if !mine.merge(hist) {
                        log::warn!("Histogram {} of stage {} has inconsistent binning between workers", hist.name, self.stage);
                    }
                }
                None => self.histograms.push(hist.clone()),
            }
        }
    }
}

/// Collaborators shared by every stage of a run. Immutable once the run starts.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Gates the per-item debugging dumps of the stages
    pub verbosity: LevelFilter,
    pub readout: Option<Arc<Readout>>,
    pub gas: Option<Arc<GasProperties>>,
    pub config: Arc<Config>,
}

impl RunContext {
    pub fn new(config: Config, readout: Option<Readout>, gas: Option<GasProperties>) -> Self {
        Self {
            verbosity: config.verbosity.level_filter(),
            readout: readout.map(Arc::new),
            gas: gas.map(Arc::new),
            config: Arc::new(config),
        }
    }

    /// Load the readout and gas named by the configuration
    pub fn from_config(config: Config) -> Result<Self, PipelineError> {
        let readout = match &config.readout_path {
            Some(path) => Some(Readout::read_readout_file(path)?),
            None => None,
        };
        let gas = match &config.gas_path {
            Some(path) => Some(GasProperties::read_gas_file(path)?),
            None => None,
        };
        Ok(Self::new(config, readout, gas))
    }

    pub fn require_readout(&self, stage: &str) -> Result<Arc<Readout>, ProcessError> {
        self.readout.clone().ok_or(ProcessError::MissingCollaborator {
            stage: stage.to_string(),
            collaborator: "readout",
        })
    }

    pub fn is_verbose(&self, level: log::Level) -> bool {
        level <= self.verbosity
    }
}

/// A processing stage.
///
/// The pipeline calls, for each event, `begin_event`, `process_event`, then `end_event`,
/// and reads the result from `output_event` when the stage kept the event. `begin_run`
/// is called once before the first event and `end_run` once after the last one, on each
/// worker's copy of the stage.
pub trait EventProcess: Send {
    fn name(&self) -> &str;
    fn kind(&self) -> StageKind;
    fn input_kind(&self) -> EventKind;
    fn output_kind(&self) -> EventKind;

    /// Parameters visible to friends and recorded in snapshots
    fn parameters(&self) -> StageParameters;

    /// Stage kinds whose parameters this stage wants to read
    fn friend_requests(&self) -> &[StageKind] {
        &[]
    }

    /// Every observable the stage can provide
    fn available_observables(&self) -> Vec<ObservableSpec> {
        Vec::new()
    }

    /// Value of a field observable after processing
    fn field_observable(&self, _name: &str) -> Option<ObservableValue> {
        None
    }

    /// Stages that must see every event of the run in one instance
    fn is_single_thread_only(&self) -> bool {
        false
    }

    /// Resolve parameters and shared collaborators. Errors abort the run.
    fn begin_run(&mut self, friends: &FriendRegistry) -> Result<(), ProcessError>;

    /// Called on each worker copy before its first event
    fn prepare_worker(&mut self, _worker_id: usize) {}

    /// Reset the output buffer and copy the input identity
    fn begin_event(&mut self, input: EventRef<'_>);

    fn process_event(
        &mut self,
        input: EventRef<'_>,
        observables: &mut ObservableSink<'_>,
    ) -> Result<StageOutcome, ProcessError>;

    fn end_event(&mut self) {}

    fn output_event(&self) -> EventRef<'_>;

    fn end_run(&mut self) -> StageSummary;

    fn box_clone(&self) -> Box<dyn EventProcess>;
}

fn wrong_kind(stage: &dyn EventProcess, found: EventKind) -> ProcessError {
    ProcessError::WrongEventKind {
        stage: stage.name().to_string(),
        expected: stage.input_kind(),
        found,
    }
}

/// The hits event a hits-consuming stage was handed
pub fn hits_input<'a>(stage: &dyn EventProcess, input: EventRef<'a>) -> Result<&'a HitsEvent, ProcessError> {
    input.as_hits().ok_or_else(|| wrong_kind(stage, input.kind()))
}

/// The signal event a signal-consuming stage was handed
pub fn signal_input<'a>(stage: &dyn EventProcess, input: EventRef<'a>) -> Result<&'a SignalEvent, ProcessError> {
    input.as_signal().ok_or_else(|| wrong_kind(stage, input.kind()))
}
