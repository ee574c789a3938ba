use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::GasError;

/// One entry of a tabulated drift velocity curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftPoint {
    /// V/cm
    pub field: f64,
    /// mm/us
    pub velocity: f64,
}

/// Transport properties of the detector gas, tabulated at a reference pressure.
///
/// Values at other conditions are scaled with the reduced field E/P: the drift velocity
/// is read from the table at `field * pressure / reference_pressure`, and the diffusion
/// coefficients scale as sqrt(reference_pressure / pressure).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasProperties {
    pub name: String,
    /// atm
    pub pressure: f64,
    /// Nominal drift field, V/cm
    pub electric_field: f64,
    /// Mean energy to create one ionization electron, eV
    pub w_value: f64,
    /// sqrt(cm)
    pub longitudinal_diffusion: f64,
    /// sqrt(cm)
    pub transverse_diffusion: f64,
    pub drift_velocity: Vec<DriftPoint>,
}

impl Default for GasProperties {
    fn default() -> Self {
        // Roughly Ar/iC4H10 (95/5) at 1 atm
        Self {
            name: String::from("Ar-iC4H10 95/5"),
            pressure: 1.0,
            electric_field: 100.0,
            w_value: 26.2,
            longitudinal_diffusion: 0.025,
            transverse_diffusion: 0.022,
            drift_velocity: vec![
                DriftPoint {
                    field: 50.0,
                    velocity: 2.3,
                },
                DriftPoint {
                    field: 100.0,
                    velocity: 3.9,
                },
                DriftPoint {
                    field: 200.0,
                    velocity: 4.6,
                },
                DriftPoint {
                    field: 400.0,
                    velocity: 4.2,
                },
            ],
        }
    }
}

impl GasProperties {
    /// Read a gas description from a YAML file
    pub fn read_gas_file(path: &Path) -> Result<Self, GasError> {
        if !path.exists() {
            return Err(GasError::BadFilePath(path.to_path_buf()));
        }
        let yaml_str = std::fs::read_to_string(path)?;
        let mut gas: Self = serde_yaml::from_str(&yaml_str)?;
        gas.validate()?;
        Ok(gas)
    }

    /// Check the physical sanity of the description and order the drift table by field
    pub fn validate(&mut self) -> Result<(), GasError> {
        if self.drift_velocity.is_empty() {
            return Err(GasError::EmptyDriftTable(self.name.clone()));
        }
        if !(self.w_value > 0.0) {
            return Err(GasError::InvalidWValue {
                name: self.name.clone(),
                value: self.w_value,
            });
        }
        if !(self.pressure > 0.0) {
            return Err(GasError::InvalidPressure {
                name: self.name.clone(),
                value: self.pressure,
            });
        }
        self.drift_velocity
            .sort_by(|a, b| a.field.total_cmp(&b.field));
        Ok(())
    }

    /// Drift velocity (mm/us) at a field (V/cm) and pressure (atm). The table is linearly
    /// interpolated and clamped at its ends.
    pub fn drift_velocity_at(&self, field: f64, pressure: f64) -> f64 {
        let reduced = field * self.pressure / pressure;
        let table = &self.drift_velocity;
        let (Some(first), Some(last)) = (table.first(), table.last()) else {
            return 0.0;
        };
        if reduced <= first.field {
            return first.velocity;
        }
        if reduced >= last.field {
            return last.velocity;
        }
        let upper = table.partition_point(|p| p.field < reduced);
        let lo = table[upper - 1];
        let hi = table[upper];
        if hi.field == lo.field {
            return lo.velocity;
        }
        lo.velocity + (hi.velocity - lo.velocity) * (reduced - lo.field) / (hi.field - lo.field)
    }

    pub fn longitudinal_diffusion_at(&self, pressure: f64) -> f64 {
        self.longitudinal_diffusion * (self.pressure / pressure).sqrt()
    }

    pub fn transverse_diffusion_at(&self, pressure: f64) -> f64 {
        self.transverse_diffusion * (self.pressure / pressure).sqrt()
    }
}
