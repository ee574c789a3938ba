//! Emulates a threshold trigger on the summed charge of all channels.
//!
//! A window of `adc_length / 2` bins slides from before the earliest sample to the last
//! one. The first position where the windowed charge exceeds a threshold fires that
//! threshold: its trigger start is the first occupied bin inside the window, and its
//! integral is the charge in the `adc_length` bins following the trigger start. The scan
//! stops once every threshold fired. The signals pass through unchanged.
use serde::{Deserialize, Serialize};

use super::constants::DEFAULT_ADC_LENGTH;
use super::error::ProcessError;
use super::event::{EventKind, EventRef};
use super::event_process::{
    signal_input, EventProcess, FriendRegistry, StageKind, StageOutcome, StageParameters, StageSummary,
};
use super::observable::{ObservableSink, ObservableSpec, ObservableValue};
use super::signal::SignalEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerAnalysisConfig {
    /// Width of the acquisition window, in bins
    pub adc_length: u32,
    /// Charge thresholds, fired independently
    pub thresholds: Vec<f64>,
}

impl Default for TriggerAnalysisConfig {
    fn default() -> Self {
        Self {
            adc_length: DEFAULT_ADC_LENGTH,
            thresholds: Vec::new(),
        }
    }
}

/// Where a threshold fired
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerResult {
    pub start: i64,
    pub integral: f64,
}

/// Window integrals over the occupied bins of an event
struct Projection {
    bins: Vec<i64>,
    /// prefix[k] is the charge of the first k occupied bins
    prefix: Vec<f64>,
}

impl Projection {
    fn new(event: &SignalEvent) -> Option<Self> {
        let samples = event.time_projection();
        if samples.is_empty() {
            return None;
        }
        let mut prefix = Vec::with_capacity(samples.len() + 1);
        prefix.push(0.0);
        for sample in samples.iter() {
            prefix.push(prefix[prefix.len() - 1] + sample.charge);
        }
        Some(Self {
            bins: samples.iter().map(|s| s.bin as i64).collect(),
            prefix,
        })
    }

    fn first(&self) -> i64 {
        self.bins[0]
    }

    fn last(&self) -> i64 {
        self.bins[self.bins.len() - 1]
    }

    /// Index of the first occupied bin >= bin
    fn index_of(&self, bin: i64) -> usize {
        self.bins.partition_point(|b| *b < bin)
    }

    /// Charge in [start, end)
    fn integral(&self, start: i64, end: i64) -> f64 {
        let (lo, hi) = (self.index_of(start), self.index_of(end));
        if hi <= lo {
            return 0.0;
        }
        self.prefix[hi] - self.prefix[lo]
    }

    fn first_occupied(&self, start: i64, end: i64) -> Option<i64> {
        self.bins.get(self.index_of(start)).copied().filter(|b| *b < end)
    }

    /// Next window start after i where a bin enters or leaves [i, i + width)
    fn next_change(&self, i: i64, width: i64) -> Option<i64> {
        let entering = self.bins.get(self.index_of(i + width)).map(|b| b - width + 1);
        let leaving = self.bins.get(self.index_of(i)).map(|b| b + 1);
        match (entering, leaving) {
            (Some(e), Some(l)) => Some(e.min(l)),
            (e, l) => e.or(l),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TriggerAnalysis {
    name: String,
    config: TriggerAnalysisConfig,
    observable_names: Vec<String>,
    output: SignalEvent,
    results: Vec<Option<TriggerResult>>,
    fired: Vec<u64>,
}

impl TriggerAnalysis {
    pub fn new(name: &str, config: TriggerAnalysisConfig) -> Self {
        let observable_names = config
            .thresholds
            .iter()
            .map(|th| format!("integral_eth{th}"))
            .collect();
        let n = config.thresholds.len();
        Self {
            name: name.to_string(),
            config,
            observable_names,
            output: SignalEvent::default(),
            results: vec![None; n],
            fired: vec![0; n],
        }
    }

    /// Per-threshold results of the last event
    pub fn results(&self) -> &[Option<TriggerResult>] {
        &self.results
    }

    /// Scan an event, filling the per-threshold results
    fn scan(&mut self, event: &SignalEvent) {
        self.results.iter_mut().for_each(|r| *r = None);
        let Some(projection) = Projection::new(event) else {
            return;
        };
        let half = (self.config.adc_length / 2) as i64;
        let window = self.config.adc_length as i64;
        let mut remaining = self.config.thresholds.len();
        // The windowed charge only changes where a bin enters or leaves the window
        let mut next = Some(projection.first() - half);
        while let Some(i) = next.filter(|i| *i <= projection.last() && remaining > 0) {
            let charge = projection.integral(i, i + half);
            for (n, threshold) in self.config.thresholds.iter().enumerate() {
                if self.results[n].is_some() || !(charge > *threshold) {
                    continue;
                }
                let start = projection.first_occupied(i, i + half).unwrap_or(i);
                self.results[n] = Some(TriggerResult {
                    start,
                    integral: projection.integral(start, start + window),
                });
                remaining -= 1;
            }
            next = projection.next_change(i, half);
        }
    }
}

impl EventProcess for TriggerAnalysis {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::TriggerAnalysis
    }

    fn input_kind(&self) -> EventKind {
        EventKind::Signal
    }

    fn output_kind(&self) -> EventKind {
        EventKind::Signal
    }

    fn parameters(&self) -> StageParameters {
        let mut params = StageParameters::default();
        params.set("adc_length", Some(self.config.adc_length as f64));
        for (name, threshold) in self.observable_names.iter().zip(self.config.thresholds.iter()) {
            params.set(name, Some(*threshold));
        }
        params
    }

    fn available_observables(&self) -> Vec<ObservableSpec> {
        let mut specs: Vec<ObservableSpec> = self
            .observable_names
            .iter()
            .map(|name| ObservableSpec::runtime(name))
            .collect();
        specs.push(ObservableSpec::runtime("trigger_starts"));
        specs.push(ObservableSpec::runtime("raw_integral"));
        specs.push(ObservableSpec::field("threshold_integrals"));
        specs
    }

    fn field_observable(&self, name: &str) -> Option<ObservableValue> {
        match name {
            "threshold_integrals" => Some(ObservableValue::Map(
                self.observable_names
                    .iter()
                    .zip(self.results.iter())
                    .map(|(name, result)| (name.clone(), result.map(|r| r.integral).unwrap_or(0.0)))
                    .collect(),
            )),
            _ => None,
        }
    }

    fn begin_run(&mut self, _friends: &FriendRegistry) -> Result<(), ProcessError> {
        if self.config.adc_length < 2 {
            return Err(ProcessError::InvalidParameter {
                stage: self.name.clone(),
                parameter: "adc_length",
                value: self.config.adc_length as f64,
            });
        }
        for (n, name) in self.observable_names.iter().enumerate() {
            if self.observable_names[..n].contains(name) {
                return Err(ProcessError::InvalidParameter {
                    stage: self.name.clone(),
                    parameter: "thresholds",
                    value: self.config.thresholds[n],
                });
            }
        }
        if self.config.thresholds.is_empty() {
            log::warn!("{}: no thresholds configured, nothing will trigger", self.name);
        }
        Ok(())
    }

    fn begin_event(&mut self, input: EventRef<'_>) {
        self.output.initialize(input.info());
    }

    fn process_event(
        &mut self,
        input: EventRef<'_>,
        observables: &mut ObservableSink<'_>,
    ) -> Result<StageOutcome, ProcessError> {
        let signals = signal_input(self, input)?;
        self.output.clone_from(signals);
        self.scan(signals);

        for (n, result) in self.results.iter().enumerate() {
            // A threshold that never fired integrates to zero
            observables.set(&self.observable_names[n], result.map(|r| r.integral).unwrap_or(0.0));
            if result.is_some() {
                self.fired[n] += 1;
            }
        }
        if let Some(Some(first)) = self.results.first() {
            observables.set("trigger_starts", first.start as f64);
        }
        observables.set("raw_integral", signals.integral());
        Ok(StageOutcome::Kept)
    }

    fn output_event(&self) -> EventRef<'_> {
        EventRef::Signal(&self.output)
    }

    fn end_run(&mut self) -> StageSummary {
        let mut summary = StageSummary::new(&self.name);
        for (name, fired) in self.observable_names.iter().zip(self.fired.iter()) {
            summary.add_counter(&format!("fired_{name}"), *fired);
        }
        summary
    }

    fn box_clone(&self) -> Box<dyn EventProcess> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::UNSET_OBSERVABLE;
    use crate::observable::ObservableStore;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    fn stage(adc_length: u32, thresholds: Vec<f64>) -> TriggerAnalysis {
        let mut stage = TriggerAnalysis::new("trigger", TriggerAnalysisConfig { adc_length, thresholds });
        stage.begin_run(&FriendRegistry::default()).unwrap();
        stage
    }

    fn rectangular(amplitude: f64, rising: u32, length: u32) -> SignalEvent {
        let mut event = SignalEvent::default();
        for bin in rising..rising + length {
            event.add_charge(1, bin, amplitude / 2.0);
            event.add_charge(2, bin, amplitude / 2.0);
        }
        event
    }

    fn run(stage: &mut TriggerAnalysis, event: &SignalEvent) -> ObservableStore {
        let mut store = ObservableStore::default();
        for spec in stage.available_observables() {
            store.declare("trigger", &spec);
        }
        let input = EventRef::Signal(event);
        stage.begin_event(input);
        stage.process_event(input, &mut store.sink("trigger")).unwrap();
        store
    }

    fn scalar(store: &ObservableStore, name: &str) -> f64 {
        store.get("trigger", name).and_then(ObservableValue::as_scalar).unwrap()
    }

    #[test]
    fn test_trigger_start_is_rising_edge() {
        for amplitude in [1.5, 5.0, 40.0] {
            let mut stage = stage(20, vec![10.0, 30.0]);
            let store = run(&mut stage, &rectangular(amplitude, 100, 60));
            assert_relative_eq!(scalar(&store, "trigger_starts"), 100.0);
            assert_relative_eq!(scalar(&store, "raw_integral"), amplitude * 60.0, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_integral_grows_with_amplitude() {
        let mut previous = 0.0;
        for step in 1..40 {
            let amplitude = 0.8 + step as f64 * 0.13;
            let mut stage = stage(16, vec![5.0]);
            let store = run(&mut stage, &rectangular(amplitude, 50, 40));
            let integral = scalar(&store, "integral_eth5");
            assert!(integral >= previous, "{integral} < {previous} at amplitude {amplitude}");
            previous = integral;
        }
    }

    #[test]
    fn test_thresholds_fire_independently() {
        let mut stage = stage(10, vec![2.0, 1000.0]);
        let store = run(&mut stage, &rectangular(1.0, 10, 30));
        assert!(stage.results()[0].is_some());
        assert!(stage.results()[1].is_none());
        assert_relative_eq!(scalar(&store, "integral_eth2"), 10.0);
        assert_relative_eq!(scalar(&store, "integral_eth1000"), 0.0);
        let expected = BTreeMap::from([
            (String::from("integral_eth1000"), 0.0),
            (String::from("integral_eth2"), 10.0),
        ]);
        assert_eq!(
            stage.field_observable("threshold_integrals"),
            Some(ObservableValue::Map(expected))
        );
        let output = stage.output_event().as_signal().unwrap();
        assert_eq!(output.num_signals(), 2);
        let summary = stage.end_run();
        assert_eq!(summary.counters["fired_integral_eth2"], 1);
    }

    #[test]
    fn test_empty_event() {
        let mut stage = stage(10, vec![1.0]);
        let store = run(&mut stage, &SignalEvent::default());
        assert_relative_eq!(scalar(&store, "trigger_starts"), UNSET_OBSERVABLE);
        assert_relative_eq!(scalar(&store, "raw_integral"), 0.0);
    }

    #[test]
    fn test_widely_separated_bins() {
        let mut event = SignalEvent::default();
        event.add_charge(1, 0, 0.5);
        event.add_charge(2, 3_000_000_000, 0.5);

        let mut quiet = stage(512, vec![1.0]);
        let store = run(&mut quiet, &event);
        assert!(quiet.results()[0].is_none());
        assert_relative_eq!(scalar(&store, "integral_eth1"), 0.0);
        assert_relative_eq!(scalar(&store, "trigger_starts"), UNSET_OBSERVABLE);
        assert_relative_eq!(scalar(&store, "raw_integral"), 1.0);

        let mut low = stage(512, vec![0.4]);
        run(&mut low, &event);
        assert_eq!(low.results()[0], Some(TriggerResult { start: 0, integral: 0.5 }));
    }

    #[test]
    fn test_window_at_far_edge() {
        let mut event = SignalEvent::default();
        event.add_charge(1, 0, 0.1);
        event.add_charge(3, 1_000_000, 10.0);
        let mut stage = stage(20, vec![5.0]);
        let store = run(&mut stage, &event);
        assert_relative_eq!(scalar(&store, "trigger_starts"), 1_000_000.0);
        assert_relative_eq!(scalar(&store, "integral_eth5"), 10.0);
    }

    #[test]
    fn test_thresholds_fire_at_different_positions() {
        let mut event = SignalEvent::default();
        event.add_charge(1, 100, 3.0);
        event.add_charge(1, 200, 3.0);
        event.add_charge(2, 201, 3.0);
        let mut stage = stage(10, vec![2.0, 5.0]);
        let store = run(&mut stage, &event);
        assert_eq!(stage.results()[0], Some(TriggerResult { start: 100, integral: 3.0 }));
        assert_eq!(stage.results()[1], Some(TriggerResult { start: 200, integral: 6.0 }));
        assert_relative_eq!(scalar(&store, "trigger_starts"), 100.0);
    }

    #[test]
    fn test_duplicate_thresholds_rejected() {
        let mut stage = TriggerAnalysis::new(
            "trigger",
            TriggerAnalysisConfig {
                adc_length: 10,
                thresholds: vec![5.0, 1.0, 5.0],
            },
        );
        assert!(matches!(
            stage.begin_run(&FriendRegistry::default()),
            Err(ProcessError::InvalidParameter {
                parameter: "thresholds",
                ..
            })
        ));
    }
}
