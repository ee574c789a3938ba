//! Converts energy deposits into the charge pulses recorded by the readout channels.
//!
//! Each hit is assigned to the channel under it. Its charge arrives after drifting from
//! the hit to the readout plane, so it lands in time bin
//! `floor((distance / drift_velocity + hit.time) / sampling)`.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::ProcessError;
use super::event::{EventKind, EventRef};
use super::event_process::{
    hits_input, EventProcess, FriendRegistry, RunContext, StageKind, StageOutcome, StageParameters,
    StageSummary,
};
use super::observable::{ObservableSink, ObservableSpec, ObservableValue};
use super::readout::Readout;
use super::signal::SignalEvent;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HitsToSignalConfig {
    /// Time bin width, us
    pub sampling: Option<f64>,
    /// mm/us. Derived from the gas when absent.
    pub drift_velocity: Option<f64>,
    /// V/cm
    pub electric_field: Option<f64>,
    /// atm
    pub gas_pressure: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct HitsToSignal {
    name: String,
    config: HitsToSignalConfig,
    ctx: Arc<RunContext>,
    readout: Option<Arc<Readout>>,
    sampling: f64,
    drift_velocity: f64,
    electric_field: Option<f64>,
    gas_pressure: Option<f64>,
    output: SignalEvent,
    unmapped_hits: u64,
    late_hits: u64,
    total_unmapped_hits: u64,
    total_late_hits: u64,
    empty_events: u64,
}

impl HitsToSignal {
    pub fn new(name: &str, config: HitsToSignalConfig, ctx: Arc<RunContext>) -> Self {
        Self {
            name: name.to_string(),
            sampling: config.sampling.unwrap_or(0.0),
            drift_velocity: config.drift_velocity.unwrap_or(0.0),
            electric_field: config.electric_field,
            gas_pressure: config.gas_pressure,
            config,
            ctx,
            readout: None,
            output: SignalEvent::default(),
            unmapped_hits: 0,
            late_hits: 0,
            total_unmapped_hits: 0,
            total_late_hits: 0,
            empty_events: 0,
        }
    }

    pub fn sampling(&self) -> f64 {
        self.sampling
    }

    pub fn drift_velocity(&self) -> f64 {
        self.drift_velocity
    }

    fn missing(&self, parameter: &'static str) -> ProcessError {
        ProcessError::MissingParameter {
            stage: self.name.clone(),
            parameter,
        }
    }
}

impl EventProcess for HitsToSignal {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::HitsToSignal
    }

    fn input_kind(&self) -> EventKind {
        EventKind::Hits
    }

    fn output_kind(&self) -> EventKind {
        EventKind::Signal
    }

    fn parameters(&self) -> StageParameters {
        let mut params = StageParameters::default();
        params.set("sampling", self.config.sampling.or(Some(self.sampling).filter(|s| *s > 0.0)));
        params.set(
            "drift_velocity",
            self.config.drift_velocity.or(Some(self.drift_velocity).filter(|v| *v > 0.0)),
        );
        params.set("electric_field", self.electric_field);
        params.set("gas_pressure", self.gas_pressure);
        params
    }

    fn friend_requests(&self) -> &[StageKind] {
        &[StageKind::ElectronDiffusion]
    }

    fn available_observables(&self) -> Vec<ObservableSpec> {
        vec![
            ObservableSpec::runtime("signals"),
            ObservableSpec::runtime("integral"),
            ObservableSpec::field("unmapped_hits"),
            ObservableSpec::field("late_hits"),
        ]
    }

    fn field_observable(&self, name: &str) -> Option<ObservableValue> {
        match name {
            "unmapped_hits" => Some(ObservableValue::Scalar(self.unmapped_hits as f64)),
            "late_hits" => Some(ObservableValue::Scalar(self.late_hits as f64)),
            _ => None,
        }
    }

    fn begin_run(&mut self, friends: &FriendRegistry) -> Result<(), ProcessError> {
        self.readout = Some(self.ctx.require_readout(&self.name)?);

        self.sampling = self.config.sampling.ok_or_else(|| self.missing("sampling"))?;
        if !(self.sampling > 0.0) {
            return Err(ProcessError::InvalidParameter {
                stage: self.name.clone(),
                parameter: "sampling",
                value: self.sampling,
            });
        }

        let gas = self.ctx.gas.clone();
        self.electric_field = self
            .config
            .electric_field
            .or_else(|| friends.parameter("electric_field"))
            .or(gas.as_ref().map(|g| g.electric_field));
        self.gas_pressure = self
            .config
            .gas_pressure
            .or_else(|| friends.parameter("gas_pressure"))
            .or(gas.as_ref().map(|g| g.pressure));

        self.drift_velocity = match (self.config.drift_velocity, &gas, self.electric_field, self.gas_pressure) {
            (Some(v), _, _, _) => v,
            (None, Some(g), Some(field), Some(pressure)) => g.drift_velocity_at(field, pressure),
            _ => return Err(self.missing("drift_velocity")),
        };
        if !(self.drift_velocity > 0.0) {
            return Err(ProcessError::InvalidParameter {
                stage: self.name.clone(),
                parameter: "drift_velocity",
                value: self.drift_velocity,
            });
        }
        log::info!(
            "{}: sampling {} us, drift velocity {} mm/us",
            self.name,
            self.sampling,
            self.drift_velocity
        );
        Ok(())
    }

    fn begin_event(&mut self, input: EventRef<'_>) {
        self.output.initialize(input.info());
        self.unmapped_hits = 0;
        self.late_hits = 0;
    }

    fn process_event(
        &mut self,
        input: EventRef<'_>,
        observables: &mut ObservableSink<'_>,
    ) -> Result<StageOutcome, ProcessError> {
        let hits = hits_input(self, input)?;
        let Some(readout) = self.readout.as_deref() else {
            return Err(ProcessError::MissingCollaborator {
                stage: self.name.clone(),
                collaborator: "readout",
            });
        };

        for hit in hits.iter() {
            let Some(address) = readout.hit_channel(hit.x, hit.y, hit.z) else {
                self.unmapped_hits += 1;
                if self.ctx.is_verbose(log::Level::Trace) {
                    log::trace!("{}: no channel for hit at ({}, {}, {})", self.name, hit.x, hit.y, hit.z);
                }
                continue;
            };
            let distance = readout
                .distance_to_plane(address.plane_id, hit.x, hit.y, hit.z)
                .unwrap_or(0.0);
            let time = distance / self.drift_velocity + hit.time;
            let bin = (time / self.sampling).floor();
            if !(bin >= 0.0 && bin <= u32::MAX as f64) {
                self.late_hits += 1;
                continue;
            }
            self.output.add_charge(address.daq_id, bin as u32, hit.energy);
        }
        self.output.sort_signals();

        self.total_unmapped_hits += self.unmapped_hits;
        self.total_late_hits += self.late_hits;
        if self.unmapped_hits > 0 {
            log::debug!(
                "{}: event {} has {} hits outside the readout",
                self.name,
                self.output.info.id,
                self.unmapped_hits
            );
        }

        observables.set("signals", self.output.num_signals() as f64);
        observables.set("integral", self.output.integral());

        if self.output.is_empty() {
            self.empty_events += 1;
            return Ok(StageOutcome::Dropped);
        }
        if self.ctx.is_verbose(log::Level::Debug) {
            log::debug!("{}: {:?}", self.name, self.output);
        }
        Ok(StageOutcome::Kept)
    }

    fn output_event(&self) -> EventRef<'_> {
        EventRef::Signal(&self.output)
    }

    fn end_run(&mut self) -> StageSummary {
        let mut summary = StageSummary::new(&self.name);
        summary.add_counter("unmapped_hits", self.total_unmapped_hits);
        summary.add_counter("late_hits", self.total_late_hits);
        summary.add_counter("events_without_signals", self.empty_events);
        summary
    }

    fn box_clone(&self) -> Box<dyn EventProcess> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hits::{HitType, HitsEvent};
    use crate::observable::ObservableStore;
    use crate::readout::ReadoutPlane;
    use crate::readout_description::pixel_grid_module;
    use approx::assert_relative_eq;

    fn context() -> Arc<RunContext> {
        let mut plane = ReadoutPlane::new(0, [0.0; 3], [0.0, 0.0, -1.0], [0.0, 0.0, 100.0], 1.0).unwrap();
        let mut module = pixel_grid_module("pixels", 10, 10, 1.0).placed(0, [-5.0, -5.0], 0.0);
        for channel in module.channels_mut() {
            channel.daq_id = channel.id;
        }
        plane.add_module(module).unwrap();
        let readout = Readout::from_planes(vec![plane]).unwrap();
        Arc::new(RunContext::new(Config::default(), Some(readout), None))
    }

    fn stage(ctx: Arc<RunContext>) -> HitsToSignal {
        let config = HitsToSignalConfig {
            sampling: Some(1.0),
            drift_velocity: Some(1.0),
            ..Default::default()
        };
        let mut stage = HitsToSignal::new("hits_to_signal", config, ctx);
        stage.begin_run(&FriendRegistry::default()).unwrap();
        stage
    }

    fn run(stage: &mut HitsToSignal, hits: &HitsEvent) -> StageOutcome {
        let mut store = ObservableStore::default();
        let input = EventRef::Hits(hits);
        stage.begin_event(input);
        let outcome = stage.process_event(input, &mut store.sink("hits_to_signal")).unwrap();
        stage.end_event();
        outcome
    }

    #[test]
    fn test_single_hit_single_sample() {
        let mut stage = stage(context());
        let mut hits = HitsEvent::default();
        hits.add_hit(0.0, 0.0, 50.0, 10.0, 0.0, HitType::XYZ);
        assert_eq!(run(&mut stage, &hits), StageOutcome::Kept);

        let output = stage.output_event().as_signal().unwrap();
        assert_eq!(output.num_signals(), 1);
        let signal = &output.signals()[0];
        assert_eq!(signal.len(), 1);
        assert_eq!(signal.samples()[0].bin, 50);
        assert_relative_eq!(signal.samples()[0].charge, 10.0);
    }

    #[test]
    fn test_unmapped_hits_dropped() {
        let mut stage = stage(context());
        let mut hits = HitsEvent::default();
        hits.add_hit(50.0, 0.0, 50.0, 10.0, 0.0, HitType::XYZ);
        hits.add_hit(0.0, 0.0, 150.0, 10.0, 0.0, HitType::XYZ);
        assert_eq!(run(&mut stage, &hits), StageOutcome::Dropped);
        assert_eq!(stage.field_observable("unmapped_hits"), Some(ObservableValue::Scalar(2.0)));
        let summary = stage.end_run();
        assert_eq!(summary.counters["unmapped_hits"], 2);
        assert_eq!(summary.counters["events_without_signals"], 1);
    }

    #[test]
    fn test_charge_merges_on_channel() {
        let mut stage = stage(context());
        let mut hits = HitsEvent::default();
        hits.add_hit(0.5, 0.5, 20.2, 1.0, 0.0, HitType::XYZ);
        hits.add_hit(0.6, 0.4, 20.7, 2.0, 0.0, HitType::XYZ);
        hits.add_hit(-4.5, 0.5, 20.0, 1.0, 0.0, HitType::XYZ);
        assert_eq!(run(&mut stage, &hits), StageOutcome::Kept);
        let output = stage.output_event().as_signal().unwrap();
        let ids: Vec<i32> = output.signals().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![50, 55]);
        assert_relative_eq!(output.signal(55).unwrap().charge_at(20), 3.0);
    }

    #[test]
    fn test_missing_velocity_is_fatal() {
        let config = HitsToSignalConfig {
            sampling: Some(1.0),
            ..Default::default()
        };
        let mut stage = HitsToSignal::new("hits_to_signal", config, context());
        assert!(matches!(
            stage.begin_run(&FriendRegistry::default()),
            Err(ProcessError::MissingParameter { parameter: "drift_velocity", .. })
        ));
    }

    #[test]
    fn test_missing_readout_is_fatal() {
        let ctx = Arc::new(RunContext::new(Config::default(), None, None));
        let mut stage = HitsToSignal::new("hits_to_signal", HitsToSignalConfig::default(), ctx);
        assert!(matches!(
            stage.begin_run(&FriendRegistry::default()),
            Err(ProcessError::MissingCollaborator { .. })
        ));
    }
}
