use std::path::PathBuf;

use super::event::EventKind;
use super::worker_status::WorkerStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config requested {0} threads; at least one worker is required")]
    InvalidThreads(i32),
    #[error("Config does not contain any processing stage")]
    EmptyPipeline,
    #[error("Stage name {0} is used more than once")]
    DuplicateStageName(String),
    #[error("Stage {stage} consumes {expected} events but the previous stage produces {found} events")]
    ChainMismatch {
        stage: String,
        expected: EventKind,
        found: EventKind,
    },
    #[error("Stage {stage} does not provide an observable named {observable}")]
    UnknownObservable { stage: String, observable: String },
    #[error("Stage {stage} has a cut on {observable} which is not a recorded scalar observable")]
    BadCut { stage: String, observable: String },
}

#[derive(Debug, Error)]
pub enum GasError {
    #[error("Failed to load gas as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Gas failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Gas failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Gas {0} has an empty drift velocity table")]
    EmptyDriftTable(String),
    #[error("Gas {name} has an invalid W-value of {value} eV")]
    InvalidWValue { name: String, value: f64 },
    #[error("Gas {name} has a non-positive pressure of {value} atm")]
    InvalidPressure { name: String, value: f64 },
}

#[derive(Debug, Error)]
pub enum DecodingError {
    #[error("Could not open decoding file {0:?}")]
    BadFilePath(PathBuf),
    #[error("Decoding file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not parse decoding file entry: {0}")]
    ParsingError(#[from] std::num::ParseIntError),
    #[error("Decoding file line {0} is not of the form daq,readout")]
    BadFileFormat(usize),
}

#[derive(Debug, Error)]
pub enum ReadoutError {
    #[error("Failed to load readout as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Readout failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Readout failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Readout failed due to decoding error: {0}")]
    DecodingError(#[from] DecodingError),
    #[error("Readout has no module definition named {0}")]
    UnknownModuleDefinition(String),
    #[error("Module definition {name} has a non-positive size {size:?}")]
    BadModuleSize { name: String, size: [f64; 2] },
    #[error("Module definition {name} has channel ids that are not 0..{channels}")]
    BadChannelIds { name: String, channels: usize },
    #[error("Plane {0} has a degenerate normal or a cathode lying on the plane")]
    DegeneratePlane(i32),
    #[error("Plane id {0} is used more than once")]
    DuplicatePlaneId(i32),
    #[error("Module id {module} is used more than once in plane {plane}")]
    DuplicateModuleId { plane: i32, module: i32 },
    #[error("Acquisition channel {0} is assigned to more than one readout channel")]
    DuplicateDaqId(i32),
    #[error("Decoding of module {module} references readout channel {channel} which does not exist")]
    BadDecodedChannel { module: i32, channel: i32 },
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Stage {stage} requires a {collaborator} which was not provided")]
    MissingCollaborator {
        stage: String,
        collaborator: &'static str,
    },
    #[error("Stage {stage} could not resolve parameter {parameter} from config, friends, or gas")]
    MissingParameter {
        stage: String,
        parameter: &'static str,
    },
    #[error("Stage {stage} has an invalid value {value} for parameter {parameter}")]
    InvalidParameter {
        stage: String,
        parameter: &'static str,
        value: f64,
    },
    #[error("Stage {stage} expected a {expected} event but was given a {found} event")]
    WrongEventKind {
        stage: String,
        expected: EventKind,
        found: EventKind,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Pipeline failed due to stage error: {0}")]
    ProcessError(#[from] ProcessError),
    #[error("Pipeline failed due to readout error: {0}")]
    ReadoutError(#[from] ReadoutError),
    #[error("Pipeline failed due to gas error: {0}")]
    GasError(#[from] GasError),
    #[error("Pipeline failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Pipeline failed to (de)serialize YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Pipeline failed to send worker status: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Worker {0} panicked")]
    WorkerPanicked(usize),
    #[error("Run was aborted")]
    Aborted,
}
