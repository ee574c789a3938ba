use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::channel_activity::ChannelActivityConfig;
use super::electron_diffusion::ElectronDiffusionConfig;
use super::error::ConfigError;
use super::event_process::StageKind;
use super::hits_to_signal::HitsToSignalConfig;
use super::observable::{Cut, OutputLevel};
use super::signal_to_hits::SignalToHitsConfig;
use super::smearing::SmearingConfig;
use super::trigger_analysis::TriggerAnalysisConfig;

/// How chatty the stages are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Silent,
    Essential,
    #[default]
    Info,
    Debug,
    Extreme,
}

impl Verbosity {
    pub fn level_filter(&self) -> log::LevelFilter {
        match self {
            Self::Silent => log::LevelFilter::Error,
            Self::Essential => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Extreme => log::LevelFilter::Trace,
        }
    }
}

/// The physics parameters of a stage, tagged by the stage kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessConfig {
    HitsToSignal(HitsToSignalConfig),
    SignalToHits(SignalToHitsConfig),
    ElectronDiffusion(ElectronDiffusionConfig),
    Smearing(SmearingConfig),
    TriggerAnalysis(TriggerAnalysisConfig),
    ChannelActivity(ChannelActivityConfig),
}

impl ProcessConfig {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::HitsToSignal(_) => StageKind::HitsToSignal,
            Self::SignalToHits(_) => StageKind::SignalToHits,
            Self::ElectronDiffusion(_) => StageKind::ElectronDiffusion,
            Self::Smearing(_) => StageKind::Smearing,
            Self::TriggerAnalysis(_) => StageKind::TriggerAnalysis,
            Self::ChannelActivity(_) => StageKind::ChannelActivity,
        }
    }
}

/// One entry of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Defaults to the stage kind
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub output_level: OutputLevel,
    /// Observables to record. All the stage provides when absent.
    #[serde(default)]
    pub observables: Option<Vec<String>>,
    /// observable -> [min, max]. Events outside are dropped.
    #[serde(default)]
    pub cuts: BTreeMap<String, [f64; 2]>,
    #[serde(flatten)]
    pub process: ProcessConfig,
}

impl StageConfig {
    pub fn new(process: ProcessConfig) -> Self {
        Self {
            name: None,
            output_level: OutputLevel::default(),
            observables: None,
            cuts: BTreeMap::new(),
            process,
        }
    }

    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.process.kind().as_str().to_string())
    }

    pub fn cuts(&self) -> Vec<Cut> {
        self.cuts
            .iter()
            .map(|(observable, [min, max])| Cut {
                observable: observable.clone(),
                min: *min,
                max: *max,
            })
            .collect()
    }
}

/// Structure representing the application configuration. Contains pathing, run information,
/// and the ordered list of processing stages.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub readout_path: Option<PathBuf>,
    pub gas_path: Option<PathBuf>,
    pub n_threads: i32,
    #[serde(default)]
    pub verbosity: Verbosity,
    /// Keep the final event of every kept record
    #[serde(default = "default_write_events")]
    pub write_events: bool,
    pub stages: Vec<StageConfig>,
}

fn default_write_events() -> bool {
    true
}

impl Default for Config {
    /// Generate a new Config object. Paths are placeholders and the pipeline is a full
    /// simulation chain from hits to triggered signals.
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            readout_path: None,
            gas_path: None,
            n_threads: 1,
            verbosity: Verbosity::default(),
            write_events: true,
            stages: vec![
                StageConfig::new(ProcessConfig::ElectronDiffusion(ElectronDiffusionConfig::default())),
                StageConfig::new(ProcessConfig::Smearing(SmearingConfig::default())),
                StageConfig::new(ProcessConfig::HitsToSignal(HitsToSignalConfig {
                    sampling: Some(0.2),
                    ..Default::default()
                })),
                StageConfig::new(ProcessConfig::TriggerAnalysis(TriggerAnalysisConfig {
                    thresholds: vec![100.0, 500.0],
                    ..Default::default()
                })),
                StageConfig::new(ProcessConfig::ChannelActivity(ChannelActivityConfig::default())),
            ],
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    pub fn has_readout_path(&self) -> bool {
        self.readout_path.is_some()
    }

    pub fn has_gas_path(&self) -> bool {
        self.gas_path.is_some()
    }

    /// Check what can be checked without building the stages
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_n_threads_valid() {
            return Err(ConfigError::InvalidThreads(self.n_threads));
        }
        if self.stages.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }
        let mut names = BTreeSet::new();
        for stage in self.stages.iter() {
            let name = stage.name();
            if !names.insert(name.clone()) {
                return Err(ConfigError::DuplicateStageName(name));
            }
        }
        Ok(())
    }
}
