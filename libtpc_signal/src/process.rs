use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use super::config::Config;
use super::error::{PipelineError, ProcessError};
use super::event::Event;
use super::event_process::RunContext;
use super::pipeline::{Pipeline, RunOutput, RunSummary};
use super::worker_status::WorkerStatus;

/// Read a YAML sequence of events
pub fn read_event_file(path: &Path) -> Result<Vec<Event>, PipelineError> {
    let reader = BufReader::new(File::open(path)?);
    let mut events: Vec<Event> = serde_yaml::from_reader(reader)?;
    for event in events.iter_mut() {
        event.normalize();
    }
    Ok(events)
}

pub fn write_event_file(path: &Path, events: &[Event]) -> Result<(), PipelineError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_yaml::to_writer(writer, events)?;
    Ok(())
}

/// Write the records and summary of a run
pub fn write_output_file(path: &Path, output: &RunOutput) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_yaml::to_writer(writer, output)?;
    Ok(())
}

/// Run the pipeline described by the config over a batch of events
pub fn process_events(
    config: Config,
    events: Vec<Event>,
    tx: Option<&Sender<WorkerStatus>>,
) -> Result<RunOutput, PipelineError> {
    let ctx = Arc::new(RunContext::from_config(config)?);
    let pipeline = Pipeline::from_config(ctx)?;
    if let Some(kind) = pipeline.input_kind() {
        if let Some(event) = events.iter().find(|e| e.kind() != kind) {
            return Err(ProcessError::WrongEventKind {
                stage: String::from("input"),
                expected: kind,
                found: event.kind(),
            }
            .into());
        }
    }
    pipeline.run(events, tx)
}

/// The function to be called by a separate thread (typically the CLI).
///
/// Reads the input events, runs the pipeline and writes the output file.
pub fn process(config: Config, tx: Sender<WorkerStatus>) -> Result<RunSummary, PipelineError> {
    log::info!("Reading events from {}...", config.input_path.display());
    let events = read_event_file(&config.input_path)?;
    log::info!("Read {} events.", events.len());
    let output_path = config.output_path.clone();
    let output = process_events(config, events, Some(&tx))?;
    log::info!("Writing records to {}...", output_path.display());
    write_output_file(&output_path, &output)?;
    Ok(output.summary)
}
