// watchpost command line: one-shot scenario analysis and periodic monitoring

mod runtime;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use runtime::RuntimeOptions;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use watchpost_core::{AnalysisResult, Command, JsonScenarioCatalog, ScenarioCatalog};
use watchpost_eye::Monitor;

#[derive(Parser)]
#[command(name = "watchpost")]
#[command(about = "Edge inference over a live video stream", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Activate the command's scenarios and analyze the stream once
    Process {
        /// Service configuration file
        #[arg(long, short)]
        config: PathBuf,

        /// File holding one command object or an array of them
        #[arg(long)]
        command: PathBuf,

        /// Use the offline fingerprint detector instead of loading models
        #[arg(long)]
        offline: bool,

        /// Save captured frames under the configured capture directory
        #[arg(long)]
        persist: bool,
    },

    /// Analyze the active scenarios repeatedly
    Monitor {
        /// Service configuration file
        #[arg(long, short)]
        config: PathBuf,

        /// Command template; its scenario ids are ignored
        #[arg(long)]
        command: Option<PathBuf>,

        /// Pause between passes; defaults to the configured monitor interval
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Number of passes to run
        #[arg(long, default_value = "1")]
        iterations: u64,

        #[arg(long)]
        offline: bool,

        #[arg(long)]
        persist: bool,
    },

    /// Validate the service config and every scenario file
    CheckConfig {
        #[arg(long, short)]
        config: PathBuf,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    match cli.command {
        Commands::Process {
            config,
            command,
            offline,
            persist,
        } => process(&config, &command, RuntimeOptions { offline, persist }),
        Commands::Monitor {
            config,
            command,
            interval_ms,
            iterations,
            offline,
            persist,
        } => monitor(
            &config,
            command.as_deref(),
            interval_ms,
            iterations,
            RuntimeOptions { offline, persist },
        ),
        Commands::CheckConfig { config } => check_config(&config),
    }
}

fn read_commands(path: &Path) -> Result<Vec<Command>> {
    let payload =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Command::parse_many(&payload).with_context(|| format!("invalid command in {}", path.display()))
}

fn process(config_path: &Path, command_path: &Path, options: RuntimeOptions) -> Result<()> {
    let commands = read_commands(command_path)?;
    let mut runtime = runtime::build(config_path, options)?;

    let mut requested: Vec<String> = Vec::new();
    for command in &commands {
        for id in command.unique_scenario_ids() {
            if !requested.contains(&id) {
                requested.push(id);
            }
        }
    }
    for id in &requested {
        if !runtime.registry().is_known(id) {
            continue;
        }
        if let Err(e) = runtime.registry().activate(id) {
            error!("Failed to activate scenario {}: {}", id, e);
        }
    }

    let mut results: Vec<AnalysisResult> = Vec::new();
    let mut failures = 0usize;
    for (index, command) in commands.iter().enumerate() {
        match runtime.pipeline.process(command) {
            Ok(batch) => results.extend(batch),
            Err(e) => {
                error!("Command {} failed: {}", index, e);
                failures += 1;
            }
        }
    }
    println!("{}", serde_json::to_string_pretty(&results)?);

    let mut active = runtime.config.active_scenarios.clone();
    active.extend(runtime.registry().active_ids());
    runtime.save_active(&active)?;

    if failures > 0 {
        bail!("{} of {} commands failed", failures, commands.len());
    }
    Ok(())
}

fn monitor(
    config_path: &Path,
    command_path: Option<&Path>,
    interval_ms: Option<u64>,
    iterations: u64,
    options: RuntimeOptions,
) -> Result<()> {
    let template = match command_path {
        Some(path) => read_commands(path)?
            .into_iter()
            .next()
            .context("command file holds no commands")?,
        None => Command::new(Vec::new()),
    };
    let runtime = runtime::build(config_path, options)?;
    for (id, e) in runtime.registry().sync(&runtime.config.active_scenarios) {
        error!("Failed to activate scenario {}: {}", id, e);
    }
    if runtime.registry().is_empty() {
        warn!("No active scenarios; monitor passes will be empty");
    }

    let interval = interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| runtime.eye.monitor_interval());
    let handle = Monitor::spawn(runtime.pipeline.clone(), template, interval)?;
    for _ in 0..iterations {
        let cycle = handle
            .results()
            .recv()
            .context("monitor stopped unexpectedly")?;
        let line = json!({
            "iteration": cycle.iteration,
            "scenario_ids": cycle.scenario_ids,
            "results": cycle.results,
        });
        println!("{}", serde_json::to_string(&line)?);
    }
    handle.stop();
    info!("Monitor finished after {} passes", iterations);
    Ok(())
}

fn check_config(config_path: &Path) -> Result<()> {
    let (config, _eye) = runtime::load_config(config_path)?;
    let catalog = JsonScenarioCatalog::from_config(&config);

    let mut broken = 0usize;
    for id in catalog.ids() {
        match catalog.descriptor(&id) {
            Ok(descriptor) => println!(
                "ok     {} ({} model {}, {} regions)",
                id,
                descriptor.model.kind,
                descriptor.model.id,
                descriptor.detection_regions.len()
            ),
            Err(e) => {
                println!("error  {}: {}", id, e);
                broken += 1;
            }
        }
    }
    if broken > 0 {
        bail!("{} scenario files failed to load", broken);
    }
    println!("{} is valid", config_path.display());
    Ok(())
}
