//! LANDER SIM: a headless lander simulation for exercising the bootstrap particle filter.
//!
//! A lander falls under gravity over randomly generated terrain while a fan of range radars
//! measures its distance to the ground. A two-state particle filter estimates the lander position
//! from those ranges alone. Each run writes its per-step records (and optionally the terrain and
//! the final particle cloud) to CSV.
//!
//! Simulations can be configured either by:
//!   1. Loading all parameters from a configuration file (TOML/JSON/YAML)
//!   2. Specifying parameters via command-line flags, which override the file values

mod common;

use clap::{Args, Parser, Subcommand};
use common::{ensure_output_dir, init_logger, run_file};
use lander_pf::ResamplingStrategy;
use lander_pf::sim::{SimulationConfig, SimulationSummary, run_simulation};
use log::{error, info};
use rayon::prelude::*;
use std::error::Error;
use std::path::{Path, PathBuf};

const LONG_ABOUT: &str =
    "LANDER SIM: a headless lander simulation for exercising the bootstrap particle filter.

A lander falls under gravity over randomly generated terrain while a fan of range radars measures
its distance to the ground. A particle filter estimates the lander position from the radar ranges.

Use `run` to simulate (parameters from --config and/or flags) and `init-config` to write a default
configuration file to start from. With --runs N the scenario is repeated with seeds
seed, seed + 1, ..., seed + N - 1, optionally in parallel.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Headless lander simulation for a bootstrap particle filter.", long_about = LONG_ABOUT)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Number of simulation runs with consecutive seeds
    #[arg(long, default_value_t = 1, global = true)]
    runs: usize,

    /// Execute multiple runs in parallel
    #[arg(long, global = true)]
    parallel: bool,
}

/// Top-level commands
#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Run the lander simulation",
        long_about = "Run the lander simulation. Parameters are read from --config when given, then overridden by any explicit flags. Results are written as CSV files to the output directory."
    )]
    Run(RunArgs),
    #[command(
        name = "init-config",
        about = "Write a default configuration file",
        long_about = "Write the default simulation configuration to a file. The format is chosen from the extension (.json, .yaml, .yml or .toml)."
    )]
    InitConfig(InitConfigArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Configuration file (TOML/JSON/YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Output directory for CSV results
    #[arg(short, long, default_value = "output")]
    output: PathBuf,
    /// Number of particles
    #[arg(long)]
    particles: Option<usize>,
    /// Random seed of the first run
    #[arg(long)]
    seed: Option<u64>,
    /// Simulated duration in seconds
    #[arg(long)]
    duration: Option<f64>,
    /// Time step in seconds
    #[arg(long)]
    dt: Option<f64>,
    /// Process noise scale for x and y
    #[arg(long, num_args = 2, value_names = ["X", "Y"])]
    process_noise: Option<Vec<f64>>,
    /// Measurement noise variance used by the filter
    #[arg(long)]
    measurement_noise_variance: Option<f64>,
    /// Standard deviation of the noise on the simulated radar ranges
    #[arg(long)]
    sensor_noise: Option<f64>,
    /// Resampling strategy
    #[arg(long, value_enum)]
    resampling: Option<ResamplingStrategy>,
    /// Keep simulating after the lander touches the ground
    #[arg(long)]
    continue_after_touchdown: bool,
    /// Also write the final particle cloud of each run
    #[arg(long)]
    save_particles: bool,
    /// Also write the generated terrain of each run
    #[arg(long)]
    save_terrain: bool,
}

#[derive(Args, Clone, Debug)]
struct InitConfigArgs {
    /// Path of the configuration file to create
    #[arg(short, long, default_value = "lander_sim.toml")]
    output: PathBuf,
}

impl RunArgs {
    /// Build the simulation configuration: file values (or defaults) overridden by explicit flags.
    fn resolve_config(&self) -> Result<SimulationConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                SimulationConfig::from_file(path)?
            }
            None => SimulationConfig::default(),
        };
        if let Some(particles) = self.particles {
            config.num_particles = particles;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(duration) = self.duration {
            config.duration_s = duration;
        }
        if let Some(dt) = self.dt {
            config.dt = dt;
        }
        if let Some(noise) = &self.process_noise {
            config.process_noise = noise.clone();
        }
        if let Some(variance) = self.measurement_noise_variance {
            config.measurement_noise_variance = variance;
        }
        if let Some(noise) = self.sensor_noise {
            config.sensor_noise_std = noise;
        }
        if let Some(strategy) = self.resampling {
            config.resampling_strategy = strategy;
        }
        if self.continue_after_touchdown {
            config.stop_on_touchdown = false;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Execute a single run and write its outputs.
fn execute_run(
    config: &SimulationConfig,
    args: &RunArgs,
) -> Result<SimulationSummary, Box<dyn Error>> {
    let result = run_simulation(config)?;
    let records_path = run_file(&args.output, "records", config.seed);
    result.to_csv(&records_path)?;
    info!("Wrote {}", records_path.display());
    if args.save_particles {
        result.particles_to_csv(run_file(&args.output, "particles", config.seed))?;
    }
    if args.save_terrain {
        result
            .terrain
            .to_csv(run_file(&args.output, "terrain", config.seed))?;
    }
    Ok(result.summary())
}

fn write_summaries(path: &Path, summaries: &[SimulationSummary]) -> Result<(), Box<dyn Error>> {
    let mut writer = csv::Writer::from_path(path)?;
    for summary in summaries {
        writer.serialize(summary)?;
    }
    writer.flush()?;
    Ok(())
}

fn run(args: &RunArgs, runs: usize, parallel: bool) -> Result<(), Box<dyn Error>> {
    let base = args.resolve_config()?;
    ensure_output_dir(&args.output)?;
    let runs = runs.max(1);
    let configs: Vec<SimulationConfig> = (0..runs as u64)
        .map(|i| SimulationConfig {
            seed: base.seed.wrapping_add(i),
            ..base.clone()
        })
        .collect();

    info!(
        "Running {} simulation(s) starting at seed {}{}",
        runs,
        base.seed,
        if parallel && runs > 1 {
            " in parallel"
        } else {
            ""
        }
    );

    // Errors are rendered to strings inside the worker since Box<dyn Error> is not Send
    let run_one = |config: &SimulationConfig| {
        execute_run(config, args).map_err(|e| {
            error!("Run with seed {} failed: {}", config.seed, e);
            (config.seed, e.to_string())
        })
    };
    let outcomes: Vec<Result<SimulationSummary, (u64, String)>> = if parallel && runs > 1 {
        configs.par_iter().map(run_one).collect()
    } else {
        configs.iter().map(run_one).collect()
    };

    let mut summaries = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(summary) => summaries.push(summary),
            Err(failure) => failures.push(failure),
        }
    }

    for summary in &summaries {
        info!(
            "seed {}: {} steps, mean error {:.2}, final error {:.2}, touchdown {}",
            summary.seed,
            summary.steps,
            summary.mean_position_error,
            summary.final_position_error,
            summary
                .touchdown_time_s
                .map(|t| format!("at {t:.2} s"))
                .unwrap_or_else(|| "not reached".to_string())
        );
    }
    if runs > 1 && !summaries.is_empty() {
        let path = args.output.join("summary.csv");
        write_summaries(&path, &summaries)?;
        info!("Wrote {}", path.display());
    }
    if !failures.is_empty() {
        for (seed, err) in &failures {
            error!("  seed {seed}: {err}");
        }
        return Err(format!("{} run(s) failed", failures.len()).into());
    }
    Ok(())
}

fn init_config(args: &InitConfigArgs) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = args.output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    SimulationConfig::default().to_file(&args.output)?;
    info!("Wrote default configuration to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    match &cli.command {
        Command::Run(args) => run(args, cli.runs, cli.parallel),
        Command::InitConfig(args) => init_config(args),
    }
}
