//! Splits each energy deposit into ionization electrons and spreads them with the
//! longitudinal and transverse diffusion accumulated while drifting to the readout.
//!
//! A deposit of E keV releases floor(E * 1000 / W) electrons, at least one. Over a drift
//! distance d each electron is displaced by gaussians of width sqrt(d[cm]) * D * 10 mm, and
//! with a non-zero attachment coefficient a it survives with probability (1 - a)^d[cm].
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::constants::{EV_PER_KEV, MAX_CARRIERS_PER_HIT, MM_PER_CM};
use super::error::ProcessError;
use super::event::{EventKind, EventRef};
use super::event_process::{
    hits_input, EventProcess, FriendRegistry, RunContext, StageKind, StageOutcome, StageParameters,
    StageSummary,
};
use super::hits::HitsEvent;
use super::observable::{ObservableSink, ObservableSpec, ObservableValue};
use super::readout::Readout;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectronDiffusionConfig {
    /// V/cm
    pub electric_field: Option<f64>,
    /// atm
    pub gas_pressure: Option<f64>,
    /// eV
    pub w_value: Option<f64>,
    /// sqrt(cm)
    pub longitudinal_diffusion: Option<f64>,
    /// sqrt(cm)
    pub transverse_diffusion: Option<f64>,
    /// Fraction of electrons lost per cm of drift
    pub attachment: f64,
    /// Upper limit of electrons produced by one hit
    pub max_carriers_per_hit: Option<u64>,
    /// Upper limit of electrons produced by one event, reached by raising the W-value
    pub max_event_carriers: Option<u64>,
    /// Random seed; 0 draws one from the system entropy
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct ElectronDiffusion {
    name: String,
    config: ElectronDiffusionConfig,
    ctx: Arc<RunContext>,
    readout: Option<Arc<Readout>>,
    rng: StdRng,
    electric_field: Option<f64>,
    gas_pressure: Option<f64>,
    w_value: f64,
    longitudinal_diffusion: f64,
    transverse_diffusion: f64,
    output: HitsEvent,
    outside_hits: u64,
    total_carriers: u64,
    total_attached: u64,
    total_outside_hits: u64,
}

fn make_rng(seed: u64) -> StdRng {
    if seed == 0 {
        StdRng::from_entropy()
    } else {
        StdRng::seed_from_u64(seed)
    }
}

impl ElectronDiffusion {
    pub fn new(name: &str, config: ElectronDiffusionConfig, ctx: Arc<RunContext>) -> Self {
        Self {
            name: name.to_string(),
            rng: make_rng(config.seed),
            electric_field: config.electric_field,
            gas_pressure: config.gas_pressure,
            w_value: config.w_value.unwrap_or(0.0),
            longitudinal_diffusion: config.longitudinal_diffusion.unwrap_or(0.0),
            transverse_diffusion: config.transverse_diffusion.unwrap_or(0.0),
            config,
            ctx,
            readout: None,
            output: HitsEvent::default(),
            outside_hits: 0,
            total_carriers: 0,
            total_attached: 0,
            total_outside_hits: 0,
        }
    }

    fn missing(&self, parameter: &'static str) -> ProcessError {
        ProcessError::MissingParameter {
            stage: self.name.clone(),
            parameter,
        }
    }

    /// Number of electrons for a deposit, given the effective W-value.
    /// Never more than [`MAX_CARRIERS_PER_HIT`], whatever the configured cap.
    fn carriers_for(&self, energy: f64, w_value: f64) -> u64 {
        let mut n = ((energy * EV_PER_KEV / w_value).floor() as u64).clamp(1, MAX_CARRIERS_PER_HIT);
        if let Some(cap) = self.config.max_carriers_per_hit.filter(|c| *c > 0) {
            n = n.min(cap);
        }
        n
    }
}

impl EventProcess for ElectronDiffusion {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::ElectronDiffusion
    }

    fn input_kind(&self) -> EventKind {
        EventKind::Hits
    }

    fn output_kind(&self) -> EventKind {
        EventKind::Hits
    }

    fn parameters(&self) -> StageParameters {
        let mut params = StageParameters::default();
        params.set("electric_field", self.electric_field);
        params.set("gas_pressure", self.gas_pressure);
        params.set("w_value", Some(self.w_value).filter(|w| *w > 0.0));
        params.set("longitudinal_diffusion", self.config.longitudinal_diffusion);
        params.set("transverse_diffusion", self.config.transverse_diffusion);
        params.set("attachment", Some(self.config.attachment));
        params
    }

    fn available_observables(&self) -> Vec<ObservableSpec> {
        vec![
            ObservableSpec::runtime("carriers"),
            ObservableSpec::runtime("attached_carriers"),
            ObservableSpec::runtime("energy"),
            ObservableSpec::field("outside_hits"),
        ]
    }

    fn field_observable(&self, name: &str) -> Option<ObservableValue> {
        match name {
            "outside_hits" => Some(ObservableValue::Scalar(self.outside_hits as f64)),
            _ => None,
        }
    }

    fn begin_run(&mut self, _friends: &FriendRegistry) -> Result<(), ProcessError> {
        self.readout = Some(self.ctx.require_readout(&self.name)?);
        let gas = self.ctx.gas.clone();

        self.gas_pressure = self.config.gas_pressure.or(gas.as_ref().map(|g| g.pressure));
        self.electric_field = self.config.electric_field.or(gas.as_ref().map(|g| g.electric_field));
        let pressure = self.gas_pressure.unwrap_or(1.0);

        self.w_value = self
            .config
            .w_value
            .or(gas.as_ref().map(|g| g.w_value))
            .ok_or_else(|| self.missing("w_value"))?;
        self.longitudinal_diffusion = self
            .config
            .longitudinal_diffusion
            .or(gas.as_ref().map(|g| g.longitudinal_diffusion_at(pressure)))
            .ok_or_else(|| self.missing("longitudinal_diffusion"))?;
        self.transverse_diffusion = self
            .config
            .transverse_diffusion
            .or(gas.as_ref().map(|g| g.transverse_diffusion_at(pressure)))
            .ok_or_else(|| self.missing("transverse_diffusion"))?;

        if !(self.w_value > 0.0) {
            return Err(ProcessError::InvalidParameter {
                stage: self.name.clone(),
                parameter: "w_value",
                value: self.w_value,
            });
        }
        if !(0.0..=1.0).contains(&self.config.attachment) {
            return Err(ProcessError::InvalidParameter {
                stage: self.name.clone(),
                parameter: "attachment",
                value: self.config.attachment,
            });
        }
        log::info!(
            "{}: W {} eV, diffusion L {} T {} sqrt(cm), attachment {} /cm",
            self.name,
            self.w_value,
            self.longitudinal_diffusion,
            self.transverse_diffusion,
            self.config.attachment
        );
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
        self.outside_hits = 0;
    }

    fn process_event(
        &mut self,
        input: EventRef<'_>,
        observables: &mut ObservableSink<'_>,
    ) -> Result<StageOutcome, ProcessError> {
        let hits = hits_input(self, input)?;
        if hits.is_empty() {
            return Ok(StageOutcome::Dropped);
        }
        let Some(readout) = self.readout.clone() else {
            return Err(ProcessError::MissingCollaborator {
                stage: self.name.clone(),
                collaborator: "readout",
            });
        };

        let total_energy = hits.total_energy();
        let mut w_value = self.w_value;
        if let Some(cap) = self.config.max_event_carriers.filter(|c| *c > 0) {
            if total_energy * EV_PER_KEV / w_value > cap as f64 {
                w_value = total_energy * EV_PER_KEV / cap as f64;
            }
        }

        let survival_base = 1.0 - self.config.attachment;
        let mut carriers: u64 = 0;
        let mut attached: u64 = 0;
        for hit in hits.iter() {
            if !(hit.energy > 0.0) {
                continue;
            }
            let n = self.carriers_for(hit.energy, w_value);
            let carrier_energy = hit.energy / n as f64;
            let mut collected = false;
            for plane in readout.planes() {
                if !plane.is_z_inside_drift_volume(hit.z) {
                    continue;
                }
                collected = true;
                let drift_cm = plane.distance_to(hit.x, hit.y, hit.z).max(0.0) / MM_PER_CM;
                let sigma_l = drift_cm.sqrt() * self.longitudinal_diffusion * MM_PER_CM;
                let sigma_t = drift_cm.sqrt() * self.transverse_diffusion * MM_PER_CM;
                let survival = survival_base.powf(drift_cm);
                for _ in 0..n {
                    if self.config.attachment > 0.0 && self.rng.gen::<f64>() > survival {
                        attached += 1;
                        continue;
                    }
                    let dx: f64 = self.rng.sample(StandardNormal);
                    let dy: f64 = self.rng.sample(StandardNormal);
                    let dz: f64 = self.rng.sample(StandardNormal);
                    self.output.add_hit(
                        hit.x + dx * sigma_t,
                        hit.y + dy * sigma_t,
                        hit.z + dz * sigma_l,
                        carrier_energy,
                        hit.time,
                        hit.hit_type,
                    );
                    carriers += 1;
                }
            }
            if !collected {
                self.outside_hits += 1;
                if self.ctx.is_verbose(log::Level::Trace) {
                    log::trace!("{}: hit at z = {} is outside every drift volume", self.name, hit.z);
                }
            }
        }

        self.total_carriers += carriers;
        self.total_attached += attached;
        self.total_outside_hits += self.outside_hits;
        observables.set("carriers", carriers as f64);
        observables.set("attached_carriers", attached as f64);
        observables.set("energy", self.output.total_energy());

        if self.output.is_empty() {
            return Ok(StageOutcome::Dropped);
        }
        Ok(StageOutcome::Kept)
    }

    fn output_event(&self) -> EventRef<'_> {
        EventRef::Hits(&self.output)
    }

    fn end_run(&mut self) -> StageSummary {
        let mut summary = StageSummary::new(&self.name);
        summary.add_counter("carriers", self.total_carriers);
        summary.add_counter("attached_carriers", self.total_attached);
        summary.add_counter("outside_hits", self.total_outside_hits);
        summary
    }

    fn box_clone(&self) -> Box<dyn EventProcess> {
        Box::new(self.clone())
    }
}
