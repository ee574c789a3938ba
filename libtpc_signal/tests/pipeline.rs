use std::path::Path;

use approx::assert_abs_diff_eq;
use libtpc_signal::channel_activity::ChannelActivityConfig;
use libtpc_signal::config::{Config, ProcessConfig, StageConfig, Verbosity};
use libtpc_signal::electron_diffusion::ElectronDiffusionConfig;
use libtpc_signal::error::{ConfigError, PipelineError, ProcessError};
use libtpc_signal::event::{Event, EventInfo};
use libtpc_signal::gas::GasProperties;
use libtpc_signal::hits::{HitType, HitsEvent};
use libtpc_signal::hits_to_signal::HitsToSignalConfig;
use libtpc_signal::observable::ObservableValue;
use libtpc_signal::pipeline::RunOutput;
use libtpc_signal::process::{process, process_events, write_event_file};
use libtpc_signal::signal_to_hits::SignalToHitsConfig;
use libtpc_signal::smearing::SmearingConfig;
use libtpc_signal::trigger_analysis::TriggerAnalysisConfig;

/// 16 x 16 pads of 1 mm, centered on the beam axis, drifting along +z over 100 mm
const READOUT: &str = r#"
module_definitions:
  - name: pads
    kind: pixel_grid
    nx: 16
    ny: 16
    pitch: 1.0
planes:
  - id: 0
    position: [0.0, 0.0, 0.0]
    normal: [0.0, 0.0, -1.0]
    cathode_position: [0.0, 0.0, 100.0]
    modules:
      - { definition: pads, id: 0, origin: [-8.0, -8.0] }
"#;

fn setup(dir: &Path, n_threads: i32, stages: Vec<StageConfig>) -> Config {
    std::fs::write(dir.join("readout.yaml"), READOUT).unwrap();
    let gas = serde_yaml::to_string(&GasProperties::default()).unwrap();
    std::fs::write(dir.join("gas.yaml"), gas).unwrap();
    Config {
        input_path: dir.join("events.yaml"),
        output_path: dir.join("output").join("records.yaml"),
        readout_path: Some(dir.join("readout.yaml")),
        gas_path: Some(dir.join("gas.yaml")),
        n_threads,
        verbosity: Verbosity::Info,
        write_events: true,
        stages,
    }
}

fn hits_to_signal() -> StageConfig {
    StageConfig::new(ProcessConfig::HitsToSignal(HitsToSignalConfig {
        sampling: Some(1.0),
        drift_velocity: Some(1.0),
        ..Default::default()
    }))
}

fn single_hit(id: i32, x: f64, y: f64, z: f64, energy: f64) -> Event {
    let mut hits = HitsEvent::new(EventInfo::new(id));
    hits.add_hit(x, y, z, energy, 0.0, HitType::XYZ);
    Event::Hits(hits)
}

#[test]
fn test_single_hit_single_sample() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), 1, vec![hits_to_signal()]);
    let output = process_events(config, vec![single_hit(7, 0.5, 0.5, 50.0, 10.0)], None).unwrap();

    assert_eq!(output.records.len(), 1);
    let record = &output.records[0];
    assert!(record.kept);
    assert_eq!(record.info.id, 7);
    let Some(Event::Signal(signals)) = &record.event else {
        panic!("Expected a signal event");
    };
    assert_eq!(signals.info.id, 7);
    assert_eq!(signals.num_signals(), 1);
    let signal = &signals.signals()[0];
    // Column 8, row 8 of the grid
    assert_eq!(signal.id(), 136);
    assert_eq!(signal.samples().len(), 1);
    assert_eq!(signal.samples()[0].bin, 50);
    assert_abs_diff_eq!(signal.samples()[0].charge, 10.0);
}

#[test]
fn test_round_trip_within_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let stages = vec![
        hits_to_signal(),
        StageConfig::new(ProcessConfig::SignalToHits(SignalToHitsConfig::default())),
    ];
    let config = setup(dir.path(), 1, stages);
    let (x, y, z) = (1.3, -2.7, 37.4);
    let output = process_events(config, vec![single_hit(1, x, y, z, 4.0)], None).unwrap();

    let Some(Event::Hits(hits)) = &output.records[0].event else {
        panic!("Expected a hits event");
    };
    assert_eq!(hits.len(), 1);
    let hit = &hits.hits[0];
    assert!((hit.x - x).abs() <= 1.0);
    assert!((hit.y - y).abs() <= 1.0);
    // sampling * drift velocity
    assert!((hit.z - z).abs() <= 1.0);
    assert_abs_diff_eq!(hit.energy, 4.0);
    assert_eq!(hit.hit_type, HitType::XYZ);
}

#[test]
fn test_parallel_chain_with_shared_activity() {
    let dir = tempfile::tempdir().unwrap();
    let stages = vec![
        StageConfig::new(ProcessConfig::ElectronDiffusion(ElectronDiffusionConfig {
            max_carriers_per_hit: Some(50),
            seed: 3,
            ..Default::default()
        })),
        StageConfig::new(ProcessConfig::HitsToSignal(HitsToSignalConfig {
            sampling: Some(0.2),
            ..Default::default()
        })),
        StageConfig::new(ProcessConfig::TriggerAnalysis(TriggerAnalysisConfig {
            adc_length: 64,
            thresholds: vec![1.0],
        })),
        StageConfig::new(ProcessConfig::ChannelActivity(ChannelActivityConfig::default())),
    ];
    let config = setup(dir.path(), 4, stages);
    let events: Vec<Event> = (0..40).map(|id| single_hit(id, 0.0, 0.0, 40.0, 5.0)).collect();
    let output = process_events(config, events, None).unwrap();

    let ids: Vec<i32> = output.records.iter().map(|r| r.info.id).collect();
    assert_eq!(ids, (0..40).collect::<Vec<i32>>());
    let stats = &output.summary.statistics;
    assert_eq!(stats.events_read, 40);
    assert_eq!(stats.events_kept, 40);

    for record in output.records.iter() {
        let carriers = record.observable("electron_diffusion", "carriers").and_then(ObservableValue::as_scalar);
        assert_eq!(carriers, Some(50.0));
        let energy = record.observable("hits_to_signal", "integral").and_then(ObservableValue::as_scalar);
        assert_abs_diff_eq!(energy.unwrap(), 5.0, epsilon = 1e-9);
        let start = record.observable("trigger_analysis", "trigger_starts").unwrap();
        assert!(!start.is_unset());
    }

    let activity = output.summary.stage("channel_activity").unwrap();
    assert_eq!(activity.counters["events"], 40);
    let diffusion = output.summary.stage("electron_diffusion").unwrap();
    assert_eq!(diffusion.counters["carriers"], 2000);
}

#[test]
fn test_cut_drops_every_event() {
    let dir = tempfile::tempdir().unwrap();
    let mut trigger = StageConfig::new(ProcessConfig::TriggerAnalysis(TriggerAnalysisConfig {
        adc_length: 16,
        thresholds: vec![1.0],
    }));
    trigger.cuts.insert(String::from("raw_integral"), [100.0, 200.0]);
    let config = setup(dir.path(), 2, vec![hits_to_signal(), trigger]);
    let events = (0..6).map(|id| single_hit(id, 0.5, 0.5, 20.0, 10.0)).collect();
    let output = process_events(config, events, None).unwrap();

    assert_eq!(output.summary.statistics.events_kept, 0);
    assert_eq!(output.summary.statistics.dropped_by_stage["trigger_analysis"], 6);
    for record in output.records.iter() {
        assert!(!record.kept);
        assert_eq!(record.dropped_by.as_deref(), Some("trigger_analysis"));
        assert!(record.event.is_none());
    }
}

#[test]
fn test_chain_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let stages = vec![
        StageConfig::new(ProcessConfig::Smearing(SmearingConfig::default())),
        hits_to_signal(),
    ];
    let config = setup(dir.path(), 1, stages);
    let result = process_events(config, Vec::new(), None);
    assert!(matches!(
        result,
        Err(PipelineError::ConfigError(ConfigError::ChainMismatch { .. }))
    ));
}

#[test]
fn test_missing_readout_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = setup(dir.path(), 1, vec![hits_to_signal()]);
    config.readout_path = None;
    let result = process_events(config, vec![single_hit(0, 0.5, 0.5, 10.0, 1.0)], None);
    assert!(matches!(
        result,
        Err(PipelineError::ProcessError(ProcessError::MissingCollaborator {
            collaborator: "readout",
            ..
        }))
    ));
}

#[test]
fn test_process_writes_records() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), 2, vec![hits_to_signal()]);
    let events: Vec<Event> = (0..5).map(|id| single_hit(id, 0.5, 0.5, 10.0 + id as f64, 2.0)).collect();
    write_event_file(&config.input_path, &events).unwrap();
    let output_path = config.output_path.clone();

    let (tx, rx) = std::sync::mpsc::channel();
    let summary = process(config, tx).unwrap();
    assert_eq!(summary.statistics.events_kept, 5);
    assert!(rx.iter().count() > 0);

    let output: RunOutput = serde_yaml::from_str(&std::fs::read_to_string(output_path).unwrap()).unwrap();
    assert_eq!(output.records.len(), 5);
    for (id, record) in output.records.iter().enumerate() {
        let Some(Event::Signal(signals)) = &record.event else {
            panic!("Expected a signal event");
        };
        assert_eq!(signals.signals()[0].samples()[0].bin, 10 + id as u32);
    }
}
