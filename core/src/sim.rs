//! Headless lander simulation for exercising the particle filter.
//!
//! This module provides:
//! - [`SimulationConfig`], a serializable description of a scenario (JSON, YAML or TOML on disk)
//! - [`run_simulation`], the fixed-step loop that advances the lander, measures it with the radar
//!   array and updates a two-state position particle filter
//! - [`SimulationRecord`] and [`SimulationResult`] for storing the run and writing it to CSV
//!
//! The filter in the simulation tracks `[x, y]` with an identity transition (a random walk driven
//! purely by process noise) and the radar array as its measurement function. It knows nothing
//! about gravity or thrust; the process noise must be large enough to follow the lander.
use log::{debug, info, warn};
use nalgebra::{DVector, Point2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::lander::{Lander, ThrustCommand, ThrusterState, thrusters_at};
use crate::measurements::{DEFAULT_RADAR_ANGLES, RadarArray};
use crate::particle::{ParticleFilter, ResamplingStrategy};
use crate::terrain::Terrain;

/// Upper bound on `duration_s / dt`; every step produces one record
pub const MAX_SIMULATION_STEPS: usize = 10_000_000;

fn default_world_width() -> f64 {
    800.0
}
fn default_world_height() -> f64 {
    600.0
}
fn default_terrain_points() -> usize {
    10
}
fn default_num_particles() -> usize {
    200
}
fn default_process_noise() -> Vec<f64> {
    vec![10.0, 10.0]
}
fn default_measurement_noise_variance() -> f64 {
    10.0
}
fn default_radar_angles() -> Vec<f64> {
    DEFAULT_RADAR_ANGLES.to_vec()
}
fn default_dt() -> f64 {
    1.0 / 60.0
}
fn default_duration() -> f64 {
    20.0
}
fn default_stop_on_touchdown() -> bool {
    true
}
/// Default seed value for reproducible simulations
fn default_seed() -> u64 {
    42
}
fn default_thrust_schedule() -> Vec<ThrustCommand> {
    vec![
        ThrustCommand {
            start_s: 2.0,
            end_s: 4.0,
            thrusters: ThrusterState {
                up: true,
                right: true,
                ..Default::default()
            },
        },
        ThrustCommand {
            start_s: 6.0,
            end_s: 7.5,
            thrusters: ThrusterState {
                up: true,
                left: true,
                ..Default::default()
            },
        },
    ]
}

/// Scenario description for a single simulation run.
///
/// Every field has a default so a configuration file only needs the values it changes.
///
/// ## Example
///
/// ```
/// use lander_pf::sim::SimulationConfig;
///
/// let config = SimulationConfig {
///     num_particles: 100,
///     duration_s: 2.0,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Horizontal extent of the world
    #[serde(default = "default_world_width")]
    pub world_width: f64,
    /// Vertical extent of the world; also the default starting altitude
    #[serde(default = "default_world_height")]
    pub world_height: f64,
    /// Number of terrain polyline vertices
    #[serde(default = "default_terrain_points")]
    pub terrain_points: usize,
    /// Number of particles
    #[serde(default = "default_num_particles")]
    pub num_particles: usize,
    /// Per-dimension process noise scale for `[x, y]` (used as a standard deviation)
    #[serde(default = "default_process_noise")]
    pub process_noise: Vec<f64>,
    /// Measurement noise variance shared by all radar channels
    #[serde(default = "default_measurement_noise_variance")]
    pub measurement_noise_variance: f64,
    /// Radar mounting angles in radians
    #[serde(default = "default_radar_angles")]
    pub radar_angles: Vec<f64>,
    /// Standard deviation of the noise added to the true radar ranges (0 for perfect sensors)
    #[serde(default)]
    pub sensor_noise_std: f64,
    #[serde(default)]
    pub resampling_strategy: ResamplingStrategy,
    /// Simulation time step in seconds
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Simulated duration in seconds
    #[serde(default = "default_duration")]
    pub duration_s: f64,
    /// Starting horizontal position; defaults to the middle of the world
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_x: Option<f64>,
    /// Starting vertical position; defaults to the top of the world
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_y: Option<f64>,
    /// End the run once the lander reaches the terrain
    #[serde(default = "default_stop_on_touchdown")]
    pub stop_on_touchdown: bool,
    /// Random number generator seed for terrain, sensors and the filter
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Scripted thruster commands
    #[serde(default = "default_thrust_schedule")]
    pub thrust_schedule: Vec<ThrustCommand>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            world_width: default_world_width(),
            world_height: default_world_height(),
            terrain_points: default_terrain_points(),
            num_particles: default_num_particles(),
            process_noise: default_process_noise(),
            measurement_noise_variance: default_measurement_noise_variance(),
            radar_angles: default_radar_angles(),
            sensor_noise_std: 0.0,
            resampling_strategy: ResamplingStrategy::default(),
            dt: default_dt(),
            duration_s: default_duration(),
            start_x: None,
            start_y: None,
            stop_on_touchdown: default_stop_on_touchdown(),
            seed: default_seed(),
            thrust_schedule: default_thrust_schedule(),
        }
    }
}

impl SimulationConfig {
    /// Check the simulation-level parameters. Filter parameters are checked by the filter.
    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(format!("time step must be positive, got {}", self.dt).into());
        }
        if !(self.duration_s.is_finite() && self.duration_s >= 0.0) {
            return Err(format!("duration must be non-negative, got {}", self.duration_s).into());
        }
        let steps = self.duration_s / self.dt;
        if steps.round() > MAX_SIMULATION_STEPS as f64 {
            return Err(format!(
                "{steps:.0} steps of {} s exceed the limit of {MAX_SIMULATION_STEPS}",
                self.dt
            )
            .into());
        }
        if self.radar_angles.is_empty() {
            return Err("at least one radar is required".into());
        }
        if self.process_noise.len() != 2 {
            return Err(format!(
                "process noise must have two entries (x, y), got {}",
                self.process_noise.len()
            )
            .into());
        }
        if !(self.sensor_noise_std.is_finite() && self.sensor_noise_std >= 0.0) {
            return Err(format!(
                "sensor noise must be non-negative, got {}",
                self.sensor_noise_std
            )
            .into());
        }
        Ok(())
    }

    pub fn start_position(&self) -> Point2<f64> {
        Point2::new(
            self.start_x.unwrap_or(self.world_width / 2.0),
            self.start_y.unwrap_or(self.world_height),
        )
    }

    /// Number of fixed steps needed to cover `duration_s`.
    pub fn num_steps(&self) -> usize {
        (self.duration_s / self.dt).round() as usize
    }

    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }

    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }

    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Write the configuration, choosing the format from the extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match ConfigFormat::from_path(p)? {
            ConfigFormat::Json => self.to_json(p),
            ConfigFormat::Yaml => self.to_yaml(p),
            ConfigFormat::Toml => self.to_toml(p),
        }
    }
    /// Read the configuration, choosing the format from the extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match ConfigFormat::from_path(p)? {
            ConfigFormat::Json => Self::from_json(p),
            ConfigFormat::Yaml => Self::from_yaml(p),
            ConfigFormat::Toml => Self::from_toml(p),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> io::Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml" | "yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported configuration file '{}'", path.display()),
            )),
        }
    }
}

/// One row of simulation output, captured after the filter update of that step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub step: usize,
    pub time_s: f64,
    pub true_x: f64,
    pub true_y: f64,
    pub true_vx: f64,
    pub true_vy: f64,
    pub estimate_x: f64,
    pub estimate_y: f64,
    /// Euclidean distance between the estimate and the true position
    pub position_error: f64,
    /// Standard deviation of the particle cloud along x
    pub spread_x: f64,
    /// Standard deviation of the particle cloud along y
    pub spread_y: f64,
    /// Effective sample size of the normalized weights before resampling
    pub effective_sample_size: f64,
    /// True if the weights collapsed and the filter fell back to uniform weights
    pub degenerate: bool,
}

/// CSV row for a particle snapshot
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub x: f64,
    pub y: f64,
    pub weight: f64,
}

/// Aggregate performance figures of one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub seed: u64,
    pub steps: usize,
    pub mean_position_error: f64,
    pub final_position_error: f64,
    pub touchdown_time_s: Option<f64>,
    pub degenerate_updates: usize,
}

/// Output of [`run_simulation`].
#[derive(Clone, Debug)]
pub struct SimulationResult {
    pub seed: u64,
    pub records: Vec<SimulationRecord>,
    pub terrain: Terrain,
    /// Particle population after the last update
    pub final_particles: Vec<ParticleRecord>,
    /// Time at which the lander reached the terrain, if it did
    pub touchdown_time_s: Option<f64>,
}

impl SimulationResult {
    pub fn mean_position_error(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        self.records.iter().map(|r| r.position_error).sum::<f64>() / self.records.len() as f64
    }

    pub fn final_position_error(&self) -> Option<f64> {
        self.records.last().map(|r| r.position_error)
    }

    pub fn summary(&self) -> SimulationSummary {
        SimulationSummary {
            seed: self.seed,
            steps: self.records.len(),
            mean_position_error: self.mean_position_error(),
            final_position_error: self.final_position_error().unwrap_or(0.0),
            touchdown_time_s: self.touchdown_time_s,
            degenerate_updates: self.records.iter().filter(|r| r.degenerate).count(),
        }
    }

    /// Write the per-step records to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read per-step records previously written with [`SimulationResult::to_csv`].
    pub fn records_from_csv<P: AsRef<Path>>(
        path: P,
    ) -> Result<Vec<SimulationRecord>, Box<dyn Error>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            records.push(row?);
        }
        Ok(records)
    }

    /// Write the final particle population to a CSV file.
    pub fn particles_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let mut writer = csv::Writer::from_path(path)?;
        for particle in &self.final_particles {
            writer.serialize(particle)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Run the lander scenario described by `config`.
///
/// Each step advances the lander by `dt` under the scheduled thrust, measures it with the radar
/// array (optionally with sensor noise), and runs one particle filter update with that
/// measurement. The filter starts with particles spread uniformly over the whole world.
///
/// # Errors
/// Returns an error for invalid configuration values or if the filter rejects an update.
pub fn run_simulation(config: &SimulationConfig) -> Result<SimulationResult, Box<dyn Error>> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let terrain = Terrain::generate(
        config.world_width,
        config.world_height,
        config.terrain_points,
        &mut rng,
    )?;
    let radars = RadarArray::new(&config.radar_angles, terrain.clone());
    let start = config.start_position();
    let mut lander = Lander::new(start.x, start.y);

    let mut pf = ParticleFilter::new_with_seed(
        config.num_particles,
        2,
        DVector::from_vec(config.process_noise.clone()),
        config.measurement_noise_variance,
        rng.random(),
    )?
    .with_resampling_strategy(config.resampling_strategy);
    pf.set_state_transition(|particle: &DVector<f64>| particle.clone());
    let model = radars.clone();
    pf.set_measurement_function(move |particle: &DVector<f64>| model.measure_state(particle));
    pf.init_particles(&[(0.0, config.world_width), (0.0, config.world_height)])?;

    let num_steps = config.num_steps();
    info!(
        "Running lander simulation: seed = {}, {} particles, {} radars, {} steps of {:.4} s",
        config.seed,
        config.num_particles,
        radars.get_dimension(),
        num_steps,
        config.dt
    );

    let mut records = Vec::new();
    let mut touchdown_time_s = None;
    for step in 0..num_steps {
        let time_s = step as f64 * config.dt;
        if touchdown_time_s.is_none() {
            lander.set_thrusters(thrusters_at(&config.thrust_schedule, time_s));
            lander.step(config.dt);
            let ground = terrain.height_at(lander.position.x);
            if let Some(ground) = ground.filter(|g| lander.position.y <= *g) {
                lander.position.y = ground;
                lander.velocity.fill(0.0);
                touchdown_time_s = Some(time_s + config.dt);
                info!(
                    "Lander touched down at t = {:.3} s, x = {:.2}",
                    time_s + config.dt,
                    lander.position.x
                );
            }
        }

        let measurement =
            radars.get_noisy_measurement(&lander.position, config.sensor_noise_std, &mut rng)?;
        pf.update(&measurement)?;

        let estimate = pf.get_estimate();
        let covariance = pf.get_certainty();
        let (effective_sample_size, degenerate) = pf
            .last_update()
            .map(|d| (d.effective_sample_size, d.degenerate))
            .unwrap_or((0.0, false));
        let position_error = ((estimate[0] - lander.position.x).powi(2)
            + (estimate[1] - lander.position.y).powi(2))
        .sqrt();
        records.push(SimulationRecord {
            step,
            time_s: time_s + config.dt,
            true_x: lander.position.x,
            true_y: lander.position.y,
            true_vx: lander.velocity.x,
            true_vy: lander.velocity.y,
            estimate_x: estimate[0],
            estimate_y: estimate[1],
            position_error,
            spread_x: covariance[(0, 0)].max(0.0).sqrt(),
            spread_y: covariance[(1, 1)].max(0.0).sqrt(),
            effective_sample_size,
            degenerate,
        });
        debug!(
            "step {}: true = ({:.2}, {:.2}), estimate = ({:.2}, {:.2}), error = {:.2}",
            step, lander.position.x, lander.position.y, estimate[0], estimate[1], position_error
        );

        if touchdown_time_s.is_some() && config.stop_on_touchdown {
            break;
        }
    }

    let final_particles = pf
        .particles()
        .iter()
        .zip(pf.weights())
        .map(|(p, &weight)| ParticleRecord {
            x: p[0],
            y: p[1],
            weight,
        })
        .collect();
    let result = SimulationResult {
        seed: config.seed,
        records,
        terrain,
        final_particles,
        touchdown_time_s,
    };
    let degenerate = result.records.iter().filter(|r| r.degenerate).count();
    if degenerate > 0 {
        warn!("{degenerate} update(s) fell back to uniform weights");
    }
    info!(
        "Simulation finished: {} steps, mean position error = {:.2}, final position error = {:.2}",
        result.records.len(),
        result.mean_position_error(),
        result.final_position_error().unwrap_or(0.0)
    );
    Ok(result)
}
