//! Reconstructs hits from the signals of the readout channels: the channel gives the
//! transverse position and the time bin gives the drift distance.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::ProcessError;
use super::event::{EventKind, EventRef};
use super::event_process::{
    signal_input, EventProcess, FriendRegistry, RunContext, StageKind, StageOutcome, StageParameters,
    StageSummary,
};
use super::hits::{HitType, HitsEvent};
use super::observable::{ObservableSink, ObservableSpec, ObservableValue};
use super::readout::Readout;
use super::signal::{Sample, Signal};

/// Which samples of a signal become hits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitsMethod {
    /// One hit per sample at or above the threshold
    #[default]
    All,
    /// One hit at the signal peak
    OnlyMax,
    /// The peak plus the samples in the bins right before and after it
    TripleMax,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalToHitsConfig {
    pub method: HitsMethod,
    /// Minimum sample charge for the `all` method
    pub threshold: f64,
    /// us. Taken from a hits_to_signal stage when absent.
    pub sampling: Option<f64>,
    /// mm/us
    pub drift_velocity: Option<f64>,
    /// V/cm
    pub electric_field: Option<f64>,
    /// atm
    pub gas_pressure: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SignalToHits {
    name: String,
    config: SignalToHitsConfig,
    ctx: Arc<RunContext>,
    readout: Option<Arc<Readout>>,
    sampling: f64,
    drift_velocity: f64,
    output: HitsEvent,
    skipped_signals: u64,
    total_skipped_signals: u64,
    empty_events: u64,
}

impl SignalToHits {
    pub fn new(name: &str, config: SignalToHitsConfig, ctx: Arc<RunContext>) -> Self {
        Self {
            name: name.to_string(),
            sampling: config.sampling.unwrap_or(0.0),
            drift_velocity: config.drift_velocity.unwrap_or(0.0),
            config,
            ctx,
            readout: None,
            output: HitsEvent::default(),
            skipped_signals: 0,
            total_skipped_signals: 0,
            empty_events: 0,
        }
    }

    fn missing(&self, parameter: &'static str) -> ProcessError {
        ProcessError::MissingParameter {
            stage: self.name.clone(),
            parameter,
        }
    }

    /// The samples of a signal that become hits
    fn selected_samples(&self, signal: &Signal) -> Vec<Sample> {
        match self.config.method {
            HitsMethod::All => signal
                .samples()
                .iter()
                .filter(|s| s.charge >= self.config.threshold)
                .copied()
                .collect(),
            HitsMethod::OnlyMax => signal.max_sample().into_iter().collect(),
            HitsMethod::TripleMax => {
                let Some(peak) = signal.max_sample() else {
                    return Vec::new();
                };
                let mut selected = vec![peak];
                for bin in [peak.bin.checked_sub(1), peak.bin.checked_add(1)].into_iter().flatten() {
                    let charge = signal.charge_at(bin);
                    if charge != 0.0 {
                        selected.push(Sample { bin, charge });
                    }
                }
                selected
            }
        }
    }
}

impl EventProcess for SignalToHits {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::SignalToHits
    }

    fn input_kind(&self) -> EventKind {
        EventKind::Signal
    }

    fn output_kind(&self) -> EventKind {
        EventKind::Hits
    }

    fn parameters(&self) -> StageParameters {
        let mut params = StageParameters::default();
        params.set("threshold", Some(self.config.threshold));
        params.set("sampling", self.config.sampling.or(Some(self.sampling).filter(|s| *s > 0.0)));
        params.set(
            "drift_velocity",
            self.config.drift_velocity.or(Some(self.drift_velocity).filter(|v| *v > 0.0)),
        );
        params.set("electric_field", self.config.electric_field);
        params.set("gas_pressure", self.config.gas_pressure);
        params
    }

    fn friend_requests(&self) -> &[StageKind] {
        &[StageKind::HitsToSignal, StageKind::ElectronDiffusion]
    }

    fn available_observables(&self) -> Vec<ObservableSpec> {
        vec![
            ObservableSpec::runtime("hits"),
            ObservableSpec::runtime("energy"),
            ObservableSpec::field("skipped_signals"),
        ]
    }

    fn field_observable(&self, name: &str) -> Option<ObservableValue> {
        match name {
            "skipped_signals" => Some(ObservableValue::Scalar(self.skipped_signals as f64)),
            _ => None,
        }
    }

    fn begin_run(&mut self, friends: &FriendRegistry) -> Result<(), ProcessError> {
        self.readout = Some(self.ctx.require_readout(&self.name)?);

        self.sampling = self
            .config
            .sampling
            .or_else(|| friends.parameter("sampling"))
            .ok_or_else(|| self.missing("sampling"))?;

        let gas = self.ctx.gas.clone();
        let field = self
            .config
            .electric_field
            .or_else(|| friends.parameter("electric_field"))
            .or(gas.as_ref().map(|g| g.electric_field));
        let pressure = self
            .config
            .gas_pressure
            .or_else(|| friends.parameter("gas_pressure"))
            .or(gas.as_ref().map(|g| g.pressure));
        self.drift_velocity = match (self.config.drift_velocity, &gas, field, pressure) {
            (Some(v), _, _, _) => v,
            (None, Some(g), Some(field), Some(pressure)) => g.drift_velocity_at(field, pressure),
            (None, _, _, _) => friends
                .parameter("drift_velocity")
                .ok_or_else(|| self.missing("drift_velocity"))?,
        };
        for (parameter, value) in [("sampling", self.sampling), ("drift_velocity", self.drift_velocity)] {
            if !(value > 0.0) {
                return Err(ProcessError::InvalidParameter {
                    stage: self.name.clone(),
                    parameter,
                    value,
                });
            }
        }
        log::info!(
            "{}: {:?} method, sampling {} us, drift velocity {} mm/us",
            self.name,
            self.config.method,
            self.sampling,
            self.drift_velocity
        );
        Ok(())
    }

    fn begin_event(&mut self, input: EventRef<'_>) {
        self.output.initialize(input.info());
        self.skipped_signals = 0;
    }

    fn process_event(
        &mut self,
        input: EventRef<'_>,
        observables: &mut ObservableSink<'_>,
    ) -> Result<StageOutcome, ProcessError> {
        let signals = signal_input(self, input)?;
        let Some(readout) = self.readout.clone() else {
            return Err(ProcessError::MissingCollaborator {
                stage: self.name.clone(),
                collaborator: "readout",
            });
        };

        for signal in signals.signals() {
            let resolved = readout.acquisition_to_channel(signal.id()).and_then(|address| {
                let plane = readout.plane(address.plane_id)?;
                let module = plane.module(address.module_id)?;
                let position = module.channel_position(address.channel_id)?;
                Some((plane, module.center(), position))
            });
            let Some((plane, center, [mut x, mut y])) = resolved else {
                self.skipped_signals += 1;
                log::debug!("{}: signal {} has no readout channel", self.name, signal.id());
                continue;
            };

            let mut hit_type = HitType::XYZ;
            if x.is_nan() && y.is_nan() {
                x = center[0];
                y = center[1];
                hit_type = HitType::Unknown;
            } else if x.is_nan() {
                x = center[0];
                hit_type = HitType::YZ;
            } else if y.is_nan() {
                y = center[1];
                hit_type = HitType::XZ;
            }

            for sample in self.selected_samples(signal) {
                let distance = sample.bin as f64 * self.sampling * self.drift_velocity;
                let z = plane.position[2] + plane.normal[2] * distance;
                self.output.add_hit(x, y, z, sample.charge, 0.0, hit_type);
            }
        }
        self.total_skipped_signals += self.skipped_signals;

        observables.set("hits", self.output.len() as f64);
        observables.set("energy", self.output.total_energy());

        if self.output.is_empty() {
            self.empty_events += 1;
            return Ok(StageOutcome::Dropped);
        }
        Ok(StageOutcome::Kept)
    }

    fn output_event(&self) -> EventRef<'_> {
        EventRef::Hits(&self.output)
    }

    fn end_run(&mut self) -> StageSummary {
        let mut summary = StageSummary::new(&self.name);
        summary.add_counter("skipped_signals", self.total_skipped_signals);
        summary.add_counter("events_without_hits", self.empty_events);
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
    use crate::observable::ObservableStore;
    use crate::readout::ReadoutPlane;
    use crate::readout_description::{pixel_grid_module, strip_module, StripDirection};
    use crate::signal::SignalEvent;
    use approx::assert_relative_eq;

    fn context() -> Arc<RunContext> {
        let mut plane = ReadoutPlane::new(0, [0.0; 3], [0.0, 0.0, -1.0], [0.0, 0.0, 100.0], 1.0).unwrap();
        let mut pixels = pixel_grid_module("pixels", 4, 4, 2.0).placed(0, [-4.0, -4.0], 0.0);
        for channel in pixels.channels_mut() {
            channel.daq_id = channel.id;
        }
        let mut strips = strip_module("strips", 4, 1.0, 4.0, StripDirection::AlongY).placed(1, [10.0, 0.0], 0.0);
        for channel in strips.channels_mut() {
            channel.daq_id = 100 + channel.id;
        }
        plane.add_module(pixels).unwrap();
        plane.add_module(strips).unwrap();
        let readout = Readout::from_planes(vec![plane]).unwrap();
        Arc::new(RunContext::new(Config::default(), Some(readout), None))
    }

    fn stage(method: HitsMethod, threshold: f64) -> SignalToHits {
        let config = SignalToHitsConfig {
            method,
            threshold,
            sampling: Some(0.5),
            drift_velocity: Some(2.0),
            ..Default::default()
        };
        let mut stage = SignalToHits::new("signal_to_hits", config, context());
        stage.begin_run(&FriendRegistry::default()).unwrap();
        stage
    }

    fn run(stage: &mut SignalToHits, event: &SignalEvent) -> StageOutcome {
        let mut store = ObservableStore::default();
        let input = EventRef::Signal(event);
        stage.begin_event(input);
        stage.process_event(input, &mut store.sink("signal_to_hits")).unwrap()
    }

    fn pulse() -> SignalEvent {
        let mut event = SignalEvent::default();
        event.add_charge(5, 10, 1.0);
        event.add_charge(5, 11, 4.0);
        event.add_charge(5, 12, 2.0);
        event.add_charge(5, 14, 0.5);
        event
    }

    #[test]
    fn test_all_method_with_threshold() {
        let mut stage = stage(HitsMethod::All, 1.0);
        assert_eq!(run(&mut stage, &pulse()), StageOutcome::Kept);
        let hits = stage.output_event().as_hits().unwrap();
        assert_eq!(hits.len(), 3);
        // Channel 5 is column 1, row 1 of the grid
        assert_relative_eq!(hits.hits[0].x, -1.0);
        assert_relative_eq!(hits.hits[0].y, -1.0);
        assert_relative_eq!(hits.hits[0].z, 10.0);
        assert_eq!(hits.hits[0].hit_type, HitType::XYZ);
    }

    #[test]
    fn test_max_methods() {
        let mut only_max = stage(HitsMethod::OnlyMax, 0.0);
        run(&mut only_max, &pulse());
        let hits = only_max.output_event().as_hits().unwrap();
        assert_eq!(hits.len(), 1);
        assert_relative_eq!(hits.hits[0].energy, 4.0);
        assert_relative_eq!(hits.hits[0].z, 11.0);

        let mut triple = stage(HitsMethod::TripleMax, 0.0);
        run(&mut triple, &pulse());
        let hits = triple.output_event().as_hits().unwrap();
        assert_eq!(hits.len(), 3);
        assert_relative_eq!(hits.total_energy(), 7.0);
    }

    #[test]
    fn test_strip_channel_uses_module_center() {
        let mut stage = stage(HitsMethod::All, 0.0);
        let mut event = SignalEvent::default();
        event.add_charge(102, 3, 1.0);
        run(&mut stage, &event);
        let hit = stage.output_event().as_hits().unwrap().hits[0];
        assert_relative_eq!(hit.x, 12.5);
        assert_relative_eq!(hit.y, 2.0);
        assert_eq!(hit.hit_type, HitType::XZ);
    }

    #[test]
    fn test_unknown_channels_skipped() {
        let mut stage = stage(HitsMethod::All, 0.0);
        let mut event = SignalEvent::default();
        event.add_charge(999, 3, 1.0);
        assert_eq!(run(&mut stage, &event), StageOutcome::Dropped);
        assert_eq!(stage.field_observable("skipped_signals"), Some(ObservableValue::Scalar(1.0)));
    }
}
