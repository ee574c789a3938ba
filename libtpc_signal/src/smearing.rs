//! Applies the detector energy resolution: one gaussian gain per event, with a width
//! following the usual 1/sqrt(E) scaling from a reference resolution.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::constants::{DEFAULT_ENERGY_REFERENCE, DEFAULT_RESOLUTION_REFERENCE, FWHM_OVER_SIGMA};
use super::error::ProcessError;
use super::event::{EventKind, EventRef};
use super::event_process::{
    hits_input, EventProcess, FriendRegistry, StageKind, StageOutcome, StageParameters,
    StageSummary,
};
use super::hits::HitsEvent;
use super::observable::{ObservableSink, ObservableSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmearingConfig {
    /// keV
    pub energy_reference: f64,
    /// FWHM at the reference energy, %
    pub resolution_reference: f64,
    /// Random seed; 0 draws one from the system entropy
    pub seed: u64,
}

impl Default for SmearingConfig {
    fn default() -> Self {
        Self {
            energy_reference: DEFAULT_ENERGY_REFERENCE,
            resolution_reference: DEFAULT_RESOLUTION_REFERENCE,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Smearing {
    name: String,
    config: SmearingConfig,
    rng: StdRng,
    output: HitsEvent,
    gain_sum: f64,
    events: u64,
}

fn make_rng(seed: u64) -> StdRng {
    if seed == 0 {
        StdRng::from_entropy()
    } else {
        StdRng::seed_from_u64(seed)
    }
}

impl Smearing {
    pub fn new(name: &str, config: SmearingConfig) -> Self {
        Self {
            name: name.to_string(),
            rng: make_rng(config.seed),
            config,
            output: HitsEvent::default(),
            gain_sum: 0.0,
            events: 0,
        }
    }

    /// Relative gain sigma for an event energy
    pub fn resolution_sigma(&self, energy: f64) -> f64 {
        self.config.resolution_reference * (self.config.energy_reference / energy).sqrt()
            / FWHM_OVER_SIGMA
            / 100.0
    }
}

impl EventProcess for Smearing {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Smearing
    }

    fn input_kind(&self) -> EventKind {
        EventKind::Hits
    }

    fn output_kind(&self) -> EventKind {
        EventKind::Hits
    }

    fn parameters(&self) -> StageParameters {
        let mut params = StageParameters::default();
        params.set("energy_reference", Some(self.config.energy_reference));
        params.set("resolution_reference", Some(self.config.resolution_reference));
        params
    }

    fn available_observables(&self) -> Vec<ObservableSpec> {
        vec![ObservableSpec::runtime("gain"), ObservableSpec::runtime("energy")]
    }

    fn begin_run(&mut self, _friends: &FriendRegistry) -> Result<(), ProcessError> {
        for (parameter, value) in [
            ("energy_reference", self.config.energy_reference),
            ("resolution_reference", self.config.resolution_reference),
        ] {
            if !(value >= 0.0) {
                return Err(ProcessError::InvalidParameter {
                    stage: self.name.clone(),
                    parameter,
                    value,
                });
            }
        }
        Ok(())
    }

    fn prepare_worker(&mut self, worker_id: usize) {
        let seed = match self.config.seed {
            0 => 0,
            seed => seed.wrapping_add(worker_id as u64),
        };
        self.rng = make_rng(seed);
    }

    fn begin_event(&mut self, input: EventRef<'_>) {
        self.output.initialize(input.info());
    }

    fn process_event(
        &mut self,
        input: EventRef<'_>,
        observables: &mut ObservableSink<'_>,
    ) -> Result<StageOutcome, ProcessError> {
        let hits = hits_input(self, input)?;
        let energy = hits.total_energy();
        let gain = if energy > 0.0 {
            let sigma = self.resolution_sigma(energy);
            let draw: f64 = self.rng.sample(StandardNormal);
            1.0 + sigma * draw
        } else {
            1.0
        };
        for hit in hits.iter() {
            let mut smeared = *hit;
            smeared.energy *= gain;
            self.output.push(smeared);
        }
        self.gain_sum += gain;
        self.events += 1;
        observables.set("gain", gain);
        observables.set("energy", self.output.total_energy());
        Ok(StageOutcome::Kept)
    }

    fn output_event(&self) -> EventRef<'_> {
        EventRef::Hits(&self.output)
    }

    fn end_run(&mut self) -> StageSummary {
        if self.events > 0 {
            log::info!("{}: mean gain {}", self.name, self.gain_sum / self.events as f64);
        }
        let mut summary = StageSummary::new(&self.name);
        summary.add_counter("events", self.events);
        summary
    }

    fn box_clone(&self) -> Box<dyn EventProcess> {
        Box::new(self.clone())
    }
}
