//! Accumulates how often each channel carries a signal, overall and split by how many
//! signals of the event cross the low and high thresholds.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::constants::{
    DEFAULT_DAQ_CHANNELS, DEFAULT_DAQ_END_CHANNEL, DEFAULT_DAQ_START_CHANNEL, DEFAULT_HIGH_THRESHOLD,
    DEFAULT_LOW_THRESHOLD, DEFAULT_READOUT_CHANNELS, DEFAULT_READOUT_END_CHANNEL,
    DEFAULT_READOUT_START_CHANNEL, MULTI_SIGNAL_LIMIT,
};
use super::error::ProcessError;
use super::event::{EventKind, EventRef};
use super::event_process::{
    signal_input, EventProcess, FriendRegistry, RunContext, StageKind, StageOutcome, StageParameters,
    StageSummary,
};
use super::histogram::Histogram1D;
use super::observable::{ObservableSink, ObservableSpec, ObservableValue};
use super::readout::Readout;
use super::signal::SignalEvent;

pub const DAQ_ACTIVITY: &str = "daq_channel_activity";
pub const READOUT_ACTIVITY: &str = "readout_channel_activity";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelActivityConfig {
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub daq_channels: usize,
    pub daq_start_channel: f64,
    pub daq_end_channel: f64,
    pub readout_channels: usize,
    pub readout_start_channel: f64,
    pub readout_end_channel: f64,
}

impl Default for ChannelActivityConfig {
    fn default() -> Self {
        Self {
            low_threshold: DEFAULT_LOW_THRESHOLD,
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            daq_channels: DEFAULT_DAQ_CHANNELS,
            daq_start_channel: DEFAULT_DAQ_START_CHANNEL,
            daq_end_channel: DEFAULT_DAQ_END_CHANNEL,
            readout_channels: DEFAULT_READOUT_CHANNELS,
            readout_start_channel: DEFAULT_READOUT_START_CHANNEL,
            readout_end_channel: DEFAULT_READOUT_END_CHANNEL,
        }
    }
}

/// Name of the readout activity histogram for signals above a threshold, by the number of
/// such signals in the event
pub fn multiplicity_histogram_name(count: usize, high: bool) -> Option<String> {
    let multiplicity = match count {
        1 => "one",
        2 => "two",
        3 => "three",
        c if (4..MULTI_SIGNAL_LIMIT).contains(&c) => "multi",
        _ => return None,
    };
    let level = if high { "high" } else { "low" };
    Some(format!("{READOUT_ACTIVITY}_{multiplicity}_{level}"))
}

#[derive(Debug, Clone)]
pub struct ChannelActivity {
    name: String,
    config: ChannelActivityConfig,
    ctx: Arc<RunContext>,
    readout: Option<Arc<Readout>>,
    output: SignalEvent,
    histograms: BTreeMap<String, Histogram1D>,
    n_low: usize,
    n_high: usize,
    events: u64,
    unmapped_signals: u64,
}

impl ChannelActivity {
    pub fn new(name: &str, config: ChannelActivityConfig, ctx: Arc<RunContext>) -> Self {
        Self {
            name: name.to_string(),
            config,
            ctx,
            readout: None,
            output: SignalEvent::default(),
            histograms: BTreeMap::new(),
            n_low: 0,
            n_high: 0,
            events: 0,
            unmapped_signals: 0,
        }
    }

    fn book(&mut self, name: String, title: &str, daq: bool) {
        let (n, start, end) = if daq {
            (
                self.config.daq_channels,
                self.config.daq_start_channel,
                self.config.daq_end_channel,
            )
        } else {
            (
                self.config.readout_channels,
                self.config.readout_start_channel,
                self.config.readout_end_channel,
            )
        };
        let hist = Histogram1D::new(&name, title, n, start, end);
        self.histograms.insert(name, hist);
    }

    fn fill(&mut self, name: &str, channel: i32) {
        if let Some(hist) = self.histograms.get_mut(name) {
            hist.fill(channel as f64);
        }
    }

    pub fn histogram(&self, name: &str) -> Option<&Histogram1D> {
        self.histograms.get(name)
    }
}

impl EventProcess for ChannelActivity {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::ChannelActivity
    }

    fn input_kind(&self) -> EventKind {
        EventKind::Signal
    }

    fn output_kind(&self) -> EventKind {
        EventKind::Signal
    }

    fn parameters(&self) -> StageParameters {
        let mut params = StageParameters::default();
        params.set("low_threshold", Some(self.config.low_threshold));
        params.set("high_threshold", Some(self.config.high_threshold));
        params
    }

    fn available_observables(&self) -> Vec<ObservableSpec> {
        vec![
            ObservableSpec::runtime("low_signals"),
            ObservableSpec::runtime("high_signals"),
            ObservableSpec::field("signals_above"),
        ]
    }

    fn field_observable(&self, name: &str) -> Option<ObservableValue> {
        match name {
            "signals_above" => Some(ObservableValue::Map(BTreeMap::from([
                (String::from("low"), self.n_low as f64),
                (String::from("high"), self.n_high as f64),
            ]))),
            _ => None,
        }
    }

    fn is_single_thread_only(&self) -> bool {
        true
    }

    fn begin_run(&mut self, _friends: &FriendRegistry) -> Result<(), ProcessError> {
        self.readout = self.ctx.readout.clone();
        self.histograms.clear();
        self.book(DAQ_ACTIVITY.to_string(), "Acquisition channel activity", true);
        if self.readout.is_some() {
            self.book(READOUT_ACTIVITY.to_string(), "Readout channel activity", false);
            for high in [false, true] {
                for count in [1, 2, 3, 4] {
                    if let Some(name) = multiplicity_histogram_name(count, high) {
                        let title = format!("Readout channel activity, {name}");
                        self.book(name, &title, false);
                    }
                }
            }
        } else {
            log::info!("{}: no readout, only the acquisition channel activity is filled", self.name);
        }
        Ok(())
    }

    fn begin_event(&mut self, input: EventRef<'_>) {
        self.output.initialize(input.info());
        self.n_low = 0;
        self.n_high = 0;
    }

    fn process_event(
        &mut self,
        input: EventRef<'_>,
        observables: &mut ObservableSink<'_>,
    ) -> Result<StageOutcome, ProcessError> {
        let signals = signal_input(self, input)?;
        self.output.clone_from(signals);
        self.events += 1;

        let peaks: Vec<(i32, f64)> = signals
            .signals()
            .iter()
            .map(|s| (s.id(), s.max_value().unwrap_or(f64::NEG_INFINITY)))
            .collect();
        self.n_low = peaks.iter().filter(|(_, max)| *max > self.config.low_threshold).count();
        self.n_high = peaks.iter().filter(|(_, max)| *max > self.config.high_threshold).count();
        let low_name = multiplicity_histogram_name(self.n_low, false);
        let high_name = multiplicity_histogram_name(self.n_high, true);

        let readout = self.readout.clone();
        for (daq_id, max) in peaks {
            self.fill(DAQ_ACTIVITY, daq_id);
            let Some(readout) = readout.as_deref() else {
                continue;
            };
            let Some(address) = readout.acquisition_to_channel(daq_id) else {
                self.unmapped_signals += 1;
                continue;
            };
            let channel = address.channel_id;
            self.fill(READOUT_ACTIVITY, channel);
            if max > self.config.low_threshold {
                if let Some(name) = &low_name {
                    self.fill(name, channel);
                }
            }
            if max > self.config.high_threshold {
                if let Some(name) = &high_name {
                    self.fill(name, channel);
                }
            }
        }

        observables.set("low_signals", self.n_low as f64);
        observables.set("high_signals", self.n_high as f64);
        Ok(StageOutcome::Kept)
    }

    fn output_event(&self) -> EventRef<'_> {
        EventRef::Signal(&self.output)
    }

    fn end_run(&mut self) -> StageSummary {
        let mut summary = StageSummary::new(&self.name);
        summary.add_counter("events", self.events);
        summary.add_counter("unmapped_signals", self.unmapped_signals);
        summary.histograms = self.histograms.values().cloned().collect();
        summary
    }

    fn box_clone(&self) -> Box<dyn EventProcess> {
        Box::new(self.clone())
    }
}
