use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::event::EventInfo;

/// Charge collected in one time bin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub bin: u32,
    pub charge: f64,
}

/// The charge pulse recorded on one acquisition channel: a sparse series of samples
/// kept ordered by time bin, with at most one sample per bin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    id: i32,
    #[serde(default)]
    samples: Vec<Sample>,
}

impl Signal {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            samples: Vec::new(),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Add charge to a bin. Contributions to a bin that already holds a sample are summed.
    pub fn add_charge(&mut self, bin: u32, charge: f64) {
        match self.samples.binary_search_by_key(&bin, |s| s.bin) {
            Ok(idx) => self.samples[idx].charge += charge,
            Err(idx) => self.samples.insert(idx, Sample { bin, charge }),
        }
    }

    /// Charge in a bin, zero for bins without a sample
    pub fn charge_at(&self, bin: u32) -> f64 {
        match self.samples.binary_search_by_key(&bin, |s| s.bin) {
            Ok(idx) => self.samples[idx].charge,
            Err(_) => 0.0,
        }
    }

    pub fn integral(&self) -> f64 {
        self.samples.iter().map(|s| s.charge).sum()
    }

    /// Sum of the samples with start <= bin < end. Bounds may lie outside the valid bin range.
    pub fn integral_in(&self, start: i64, end: i64) -> f64 {
        self.window(start, end).iter().map(|s| s.charge).sum()
    }

    /// Index of the sample with the largest charge. The first one wins ties.
    pub fn max_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (idx, sample) in self.samples.iter().enumerate() {
            match best {
                Some(b) if self.samples[b].charge >= sample.charge => (),
                _ => best = Some(idx),
            }
        }
        best
    }

    pub fn max_sample(&self) -> Option<Sample> {
        self.max_index().map(|idx| self.samples[idx])
    }

    pub fn max_value(&self) -> Option<f64> {
        self.max_sample().map(|s| s.charge)
    }

    pub fn min_bin(&self) -> Option<u32> {
        self.samples.first().map(|s| s.bin)
    }

    pub fn max_bin(&self) -> Option<u32> {
        self.samples.last().map(|s| s.bin)
    }

    /// Mean charge per bin over [start, end), counting bins without a sample as zero
    pub fn baseline(&self, start: u32, end: u32) -> Option<f64> {
        if end <= start {
            return None;
        }
        let width = (end - start) as f64;
        Some(self.integral_in(start as i64, end as i64) / width)
    }

    /// Standard deviation of the charge per bin over [start, end) around the baseline
    pub fn baseline_sigma(&self, start: u32, end: u32) -> Option<f64> {
        let baseline = self.baseline(start, end)?;
        let width = (end - start) as f64;
        let occupied = self.window(start as i64, end as i64);
        let empty_bins = width - occupied.len() as f64;
        let sum_sq: f64 = occupied
            .iter()
            .map(|s| (s.charge - baseline).powi(2))
            .sum::<f64>()
            + empty_bins * baseline.powi(2);
        Some((sum_sq / width).sqrt())
    }

    /// The samples with start <= bin < end
    fn window(&self, start: i64, end: i64) -> &[Sample] {
        if end <= start {
            return &[];
        }
        let lo = self.samples.partition_point(|s| (s.bin as i64) < start);
        let hi = self.samples.partition_point(|s| (s.bin as i64) < end);
        &self.samples[lo..hi]
    }

    /// Restore bin ordering and merge duplicate bins
    fn normalize(&mut self) {
        self.samples.sort_by_key(|s| s.bin);
        let mut merged: Vec<Sample> = Vec::with_capacity(self.samples.len());
        for sample in self.samples.drain(..) {
            match merged.last_mut() {
                Some(last) if last.bin == sample.bin => last.charge += sample.charge,
                _ => merged.push(sample),
            }
        }
        self.samples = merged;
    }
}

/// A set of signals keyed by acquisition channel id. Channel ids are unique within an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalEvent {
    #[serde(default)]
    pub info: EventInfo,
    #[serde(default)]
    signals: Vec<Signal>,
    #[serde(skip)]
    index: FxHashMap<i32, usize>,
}

impl SignalEvent {
    pub fn new(info: EventInfo) -> Self {
        Self {
            info,
            ..Default::default()
        }
    }

    /// Reset the buffer for a new event
    pub fn initialize(&mut self, info: &EventInfo) {
        self.signals.clear();
        self.index.clear();
        self.info.clone_from(info);
    }

    /// Add charge to a channel at a time bin, creating the signal if needed
    pub fn add_charge(&mut self, channel: i32, bin: u32, charge: f64) {
        self.repair_index();
        let idx = match self.index.get(&channel) {
            Some(idx) => *idx,
            None => {
                self.signals.push(Signal::new(channel));
                self.index.insert(channel, self.signals.len() - 1);
                self.signals.len() - 1
            }
        };
        self.signals[idx].add_charge(bin, charge);
    }

    /// Add a whole signal. A signal for an existing channel is merged into it.
    pub fn add_signal(&mut self, signal: Signal) {
        self.repair_index();
        match self.index.get(&signal.id) {
            Some(idx) => {
                let target = &mut self.signals[*idx];
                for sample in signal.samples {
                    target.add_charge(sample.bin, sample.charge);
                }
            }
            None => {
                self.index.insert(signal.id, self.signals.len());
                self.signals.push(signal);
            }
        }
    }

    /// Order the signals by channel id. Also repairs events built by deserialization,
    /// where signals may be unordered or repeated.
    pub fn sort_signals(&mut self) {
        let mut signals = std::mem::take(&mut self.signals);
        self.index.clear();
        signals.sort_by_key(|s| s.id);
        for mut signal in signals.drain(..) {
            signal.normalize();
            self.add_signal(signal);
        }
    }

    // The index is not serialized
    fn repair_index(&mut self) {
        if self.index.len() != self.signals.len() {
            self.sort_signals();
        }
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn signal(&self, channel: i32) -> Option<&Signal> {
        match self.index.get(&channel) {
            Some(idx) => self.signals.get(*idx),
            // Index is not serialized, fall back to a scan
            None if self.index.len() != self.signals.len() => {
                self.signals.iter().find(|s| s.id == channel)
            }
            None => None,
        }
    }

    pub fn num_signals(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn integral(&self) -> f64 {
        self.signals.iter().map(|s| s.integral()).sum()
    }

    pub fn integral_in(&self, start: i64, end: i64) -> f64 {
        self.signals.iter().map(|s| s.integral_in(start, end)).sum()
    }

    pub fn min_bin(&self) -> Option<u32> {
        self.signals.iter().filter_map(|s| s.min_bin()).min()
    }

    pub fn max_bin(&self) -> Option<u32> {
        self.signals.iter().filter_map(|s| s.max_bin()).max()
    }

    /// Charge summed over all channels, one entry per occupied bin, in bin order.
    /// Bins where the charges cancel out are left out.
    pub fn time_projection(&self) -> Vec<Sample> {
        let mut samples: Vec<Sample> = self.signals.iter().flat_map(|s| s.samples().iter().copied()).collect();
        samples.sort_unstable_by_key(|s| s.bin);
        let mut projection: Vec<Sample> = Vec::with_capacity(samples.len());
        for sample in samples {
            match projection.last_mut() {
                Some(last) if last.bin == sample.bin => last.charge += sample.charge,
                _ => projection.push(sample),
            }
        }
        projection.retain(|s| s.charge != 0.0);
        projection
    }
}

impl PartialEq for SignalEvent {
    fn eq(&self, other: &Self) -> bool {
        self.info == other.info && self.signals == other.signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_add_charge_merges_bins() {
        let mut signal = Signal::new(4);
        signal.add_charge(10, 1.0);
        signal.add_charge(5, 2.0);
        signal.add_charge(10, 0.5);
        assert_eq!(signal.len(), 2);
        assert_eq!(signal.min_bin(), Some(5));
        assert_eq!(signal.max_bin(), Some(10));
        assert_relative_eq!(signal.charge_at(10), 1.5);
        assert_relative_eq!(signal.charge_at(7), 0.0);
        assert_relative_eq!(signal.integral(), 3.5);
        assert_relative_eq!(signal.integral_in(-3, 6), 2.0);
        assert_relative_eq!(signal.integral_in(6, 6), 0.0);
        assert_eq!(signal.max_sample().unwrap().bin, 5);
    }

    #[test]
    fn test_baseline() {
        let mut signal = Signal::new(0);
        signal.add_charge(0, 2.0);
        signal.add_charge(1, 2.0);
        assert_relative_eq!(signal.baseline(0, 4).unwrap(), 1.0);
        assert_relative_eq!(signal.baseline_sigma(0, 4).unwrap(), 1.0);
        assert!(signal.baseline(4, 4).is_none());
    }

    #[test]
    fn test_signal_event_unique_channels() {
        let mut event = SignalEvent::default();
        event.add_charge(9, 3, 1.0);
        event.add_charge(2, 3, 1.0);
        event.add_charge(9, 4, 1.0);
        event.add_signal(Signal::new(2));
        event.sort_signals();
        let ids: Vec<i32> = event.signals().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![2, 9]);
        assert_eq!(event.signal(9).unwrap().len(), 2);
        assert_relative_eq!(event.integral(), 3.0);
        assert_eq!(event.min_bin(), Some(3));
        assert_eq!(event.max_bin(), Some(4));
        let projection = event.time_projection();
        assert_eq!(projection, vec![Sample { bin: 3, charge: 2.0 }, Sample { bin: 4, charge: 1.0 }]);
    }

    #[test]
    fn test_projection_of_distant_bins() {
        let mut event = SignalEvent::default();
        event.add_charge(1, 3_000_000_000, 0.5);
        event.add_charge(2, 0, 0.5);
        event.add_charge(3, 7, 1.0);
        event.add_charge(4, 7, -1.0);
        let bins: Vec<u32> = event.time_projection().iter().map(|s| s.bin).collect();
        assert_eq!(bins, vec![0, 3_000_000_000]);
        assert!(SignalEvent::default().time_projection().is_empty());
    }

    #[test]
    fn test_deserialized_event_is_repaired() {
        let text = "info:\n  id: 1\nsignals:\n  - id: 5\n    samples:\n      - {bin: 3, charge: 1.0}\n      - {bin: 1, charge: 1.0}\n      - {bin: 3, charge: 2.0}\n  - id: 1\n    samples: []\n";
        let mut event: SignalEvent = serde_yaml::from_str(text).unwrap();
        assert!(event.signal(5).is_some());
        event.sort_signals();
        assert_eq!(event.signals()[0].id(), 1);
        let signal = event.signal(5).unwrap();
        assert_eq!(signal.samples().len(), 2);
        assert_relative_eq!(signal.charge_at(3), 3.0);
    }
}
