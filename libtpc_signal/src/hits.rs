use serde::{Deserialize, Serialize};

use super::event::EventInfo;

/// Which coordinates of a hit were actually measured. XZ and YZ hits come from strip
/// channels that resolve only one transverse coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HitType {
    #[default]
    XYZ,
    XZ,
    YZ,
    Unknown,
}

/// A point-like energy deposit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// mm
    pub x: f64,
    /// mm
    pub y: f64,
    /// mm
    pub z: f64,
    /// keV
    pub energy: f64,
    /// Time offset in us
    #[serde(default)]
    pub time: f64,
    #[serde(default)]
    pub hit_type: HitType,
}

impl Hit {
    pub fn new(x: f64, y: f64, z: f64, energy: f64, time: f64, hit_type: HitType) -> Self {
        Self {
            x,
            y,
            z,
            energy,
            time,
            hit_type,
        }
    }

    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// An event made of point-like energy deposits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HitsEvent {
    #[serde(default)]
    pub info: EventInfo,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

impl HitsEvent {
    pub fn new(info: EventInfo) -> Self {
        Self {
            info,
            hits: Vec::new(),
        }
    }

    /// Reset the buffer for a new event, keeping its allocation
    pub fn initialize(&mut self, info: &EventInfo) {
        self.hits.clear();
        self.info.clone_from(info);
    }

    pub fn add_hit(&mut self, x: f64, y: f64, z: f64, energy: f64, time: f64, hit_type: HitType) {
        self.hits.push(Hit::new(x, y, z, energy, time, hit_type));
    }

    pub fn push(&mut self, hit: Hit) {
        self.hits.push(hit);
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn clear(&mut self) {
        self.hits.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Hit> {
        self.hits.iter()
    }

    pub fn total_energy(&self) -> f64 {
        self.hits.iter().map(|h| h.energy).sum()
    }

    /// Energy weighted mean position. None if the event carries no energy.
    pub fn mean_position(&self) -> Option<[f64; 3]> {
        let total = self.total_energy();
        if total == 0.0 {
            return None;
        }
        let mut mean = [0.0; 3];
        for hit in self.hits.iter() {
            mean[0] += hit.x * hit.energy;
            mean[1] += hit.y * hit.energy;
            mean[2] += hit.z * hit.energy;
        }
        Some(mean.map(|v| v / total))
    }

    /// The (min, max) z of the hits
    pub fn z_range(&self) -> Option<(f64, f64)> {
        self.hits.iter().fold(None, |range, hit| match range {
            None => Some((hit.z, hit.z)),
            Some((lo, hi)) => Some((lo.min(hit.z), hi.max(hit.z))),
        })
    }

    pub fn count_of_type(&self, hit_type: HitType) -> usize {
        self.hits.iter().filter(|h| h.hit_type == hit_type).count()
    }
}
