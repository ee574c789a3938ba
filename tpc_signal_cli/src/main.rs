use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;

use libtpc_signal::config::Config;
use libtpc_signal::error::ConfigError;
use libtpc_signal::process::process;
use libtpc_signal::worker_status::{BarColor, WorkerStatus};

fn make_template_config(path: &Path) -> Result<(), ConfigError> {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config)?;
    let mut file = File::create(path)?;
    file.write_all(yaml_str.as_bytes())?;
    Ok(())
}

fn bar_style(color: BarColor) -> ProgressStyle {
    let color = match color {
        BarColor::CYAN => "cyan",
        BarColor::GREEN => "green",
        BarColor::RED => "red",
    };
    ProgressStyle::with_template(&format!(
        "Worker {{prefix}} [{{bar:40.{color}/blue}}] {{pos:>3}}% {{msg}}"
    ))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn update_bar(bars: &mut BTreeMap<usize, ProgressBar>, manager: &MultiProgress, status: &WorkerStatus) {
    let bar = bars.entry(status.worker_id).or_insert_with(|| {
        let bar = manager.add(ProgressBar::new(100));
        bar.set_prefix(status.worker_id.to_string());
        bar
    });
    bar.set_style(bar_style(status.color));
    bar.set_position((status.progress * 100.0) as u64);
    bar.set_message(format!("{} events", status.events_processed));
}

/// The terminal logger lets everything through; the global max level, set from the
/// config verbosity, decides what is printed.
fn make_logger() -> Box<simplelog::TermLogger> {
    simplelog::TermLogger::new(
        simplelog::LevelFilter::Trace,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
}

fn main() {
    // Create a cli
    let matches = Command::new("tpc_signal_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), make_logger())
        .try_init()
        .expect("Could not create logging/progress!");
    log::set_max_level(simplelog::LevelFilter::Info);

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        match make_template_config(&config_path) {
            Ok(()) => log::info!("Done."),
            Err(e) => log::error!("Could not write template config: {e}"),
        }
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    if let Err(e) = config.validate() {
        log::error!("{e}");
        return;
    }
    log::info!("Config successfully loaded.");
    log::info!("Input Path: {}", config.input_path.to_string_lossy());
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    if let Some(path) = &config.readout_path {
        log::info!("Readout Path: {}", path.to_string_lossy());
    }
    if let Some(path) = &config.gas_path {
        log::info!("Gas Path: {}", path.to_string_lossy());
    }
    log::info!("Number of workers: {}", config.n_threads);
    let stage_names: Vec<String> = config.stages.iter().map(|s| s.name()).collect();
    log::info!("Stages: {}", stage_names.join(" -> "));
    log::set_max_level(config.verbosity.level_filter());

    // Spawn the task!
    let (tx, rx) = channel::<WorkerStatus>();
    let handle = std::thread::spawn(move || process(config, tx));

    // The channel closes once every sender (the workers' and the task's) is gone
    let mut bars = BTreeMap::new();
    for status in rx.iter() {
        update_bar(&mut bars, &pb_manager, &status);
    }
    for bar in bars.values() {
        bar.finish();
    }

    match handle.join() {
        Ok(Ok(summary)) => {
            let stats = &summary.statistics;
            log::info!(
                "Processed {} events in {:.2} s, kept {}.",
                stats.events_read,
                stats.wall_time,
                stats.events_kept
            );
            for stage in summary.stages.iter() {
                for (name, value) in stage.counters.iter() {
                    log::info!("{}.{}: {}", stage.stage, name, value);
                }
            }
        }
        Ok(Err(e)) => log::error!("Processing failed with error: {e}"),
        Err(_) => log::error!("Failed to join processing task!"),
    }

    log::info!("Done.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use libtpc_signal::config::Verbosity;
    use simplelog::SharedLogger;

    #[test]
    fn test_logger_passes_every_verbosity() {
        let logger = make_logger();
        for verbosity in [
            Verbosity::Silent,
            Verbosity::Essential,
            Verbosity::Info,
            Verbosity::Debug,
            Verbosity::Extreme,
        ] {
            assert!(logger.level() >= verbosity.level_filter(), "{verbosity:?} is cut by the logger");
        }
        assert_eq!(Verbosity::Extreme.level_filter(), simplelog::LevelFilter::Trace);
    }
}
