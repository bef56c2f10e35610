//! Bootstrap particle filtering toolbox with a headless terrain-radar lander simulation
//!
//! This crate provides a generic bootstrap (sequential importance resampling) particle filter that
//! estimates an evolving state from noisy, nonlinear and indirect measurements. The filter is
//! agnostic of the system it tracks: the caller injects a state transition function and a
//! measurement function as plain closures, and the filter handles process noise, likelihood
//! weighting and resampling. The filter supports an arbitrary number of state dimensions, an
//! independent process noise scale per dimension, and a single measurement noise variance that is
//! shared by every measurement channel.
//!
//! To exercise the filter, the crate also carries a small simulation harness: a lander falling
//! under gravity over a randomly generated terrain polyline, observed by a fan of downward-looking
//! range radars. The simulation is headless; results are written to CSV for plotting elsewhere.
//!
//! This crate is primarily built off of three dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the vector types for particles and measurements.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provide random number generation for the filter and the simulated sensors.
//!
//! All other functionality is auxiliary (configuration and result I/O, logging, CLI).
//!
//! ## Crate overview
//!
//! - [gaussian]: Marsaglia polar method standard normal sampler with a bounded rejection loop.
//! - [particle]: The bootstrap particle filter, resampling strategies and weighting helpers.
//! - [terrain]: Terrain polyline generation and ray casting against it.
//! - [measurements]: Range radar sensor models built on the terrain ray cast.
//! - [lander]: Point-mass lander dynamics under gravity and thrust.
//! - [sim]: Simulation configuration, the simulation loop and CSV result handling.
//!
//! ## Filter cycle
//!
//! Each [`particle::ParticleFilter::update`] call propagates every particle through the transition
//! function plus process noise, evaluates the expected measurements, weights each particle with a
//! Gaussian likelihood of the summed squared measurement error, normalizes the weights, resamples
//! the population in proportion to them and finally resets the weights to uniform. Weight
//! information is therefore never carried between updates; the particle density alone represents
//! the posterior.
//!
//! ```rust
//! use lander_pf::particle::ParticleFilter;
//! use nalgebra::DVector;
//!
//! let mut pf = ParticleFilter::new_with_seed(100, 1, DVector::from_vec(vec![0.1]), 1.0, 7).unwrap();
//! pf.set_state_transition(|x: &DVector<f64>| x.clone());
//! pf.set_measurement_function(|x: &DVector<f64>| x.clone());
//! pf.init_particles(&[(-10.0, 10.0)]).unwrap();
//! for _ in 0..20 {
//!     pf.update(&DVector::from_vec(vec![3.0])).unwrap();
//! }
//! assert!((pf.get_estimate()[0] - 3.0).abs() < 1.0);
//! ```
pub mod gaussian;
pub mod lander;
pub mod measurements;
pub mod particle;
pub mod sim;
pub mod terrain;

use std::fmt::{self, Display};

pub use particle::{FilterStatus, ParticleFilter, ResamplingStrategy};

/// Errors raised by the particle filter and its sampler.
///
/// Every variant except [`FilterError::SamplerExhausted`] is a precondition violation by the
/// caller. None of them are retried internally.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterError {
    /// The particle count must be at least one
    InvalidParticleCount,
    /// The state dimension must be at least one
    InvalidStateDimension,
    /// The process noise vector does not have one entry per state dimension
    ProcessNoiseDimensionMismatch { expected: usize, found: usize },
    /// A process noise scale is negative or not finite
    InvalidProcessNoise { dimension: usize, value: f64 },
    /// The measurement noise variance is not a finite positive number
    InvalidMeasurementNoise(f64),
    /// The number of initialization ranges does not match the state dimension
    RangeCountMismatch { expected: usize, found: usize },
    /// An initialization range is not finite or has `min > max`
    InvalidRange { dimension: usize, min: f64, max: f64 },
    /// A replacement population does not have `N` particles of length `D`
    ParticleShapeMismatch {
        num_particles: usize,
        num_states: usize,
    },
    /// `update` was called before a state transition function was injected
    StateTransitionNotSet,
    /// `update` was called before a measurement function was injected
    MeasurementFunctionNotSet,
    /// The state transition function returned a state of the wrong length
    TransitionDimensionMismatch { expected: usize, found: usize },
    /// The measurement function output length differs from the supplied measurement vector
    MeasurementDimensionMismatch { expected: usize, found: usize },
    /// The Gaussian sampler's rejection loop exceeded its iteration cap
    SamplerExhausted { iterations: usize },
}

impl Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::InvalidParticleCount => {
                write!(f, "number of particles must be positive")
            }
            FilterError::InvalidStateDimension => {
                write!(f, "number of states must be positive")
            }
            FilterError::ProcessNoiseDimensionMismatch { expected, found } => write!(
                f,
                "process noise has {found} entries but the state has {expected} dimensions"
            ),
            FilterError::InvalidProcessNoise { dimension, value } => write!(
                f,
                "process noise for state {dimension} must be finite and non-negative, got {value}"
            ),
            FilterError::InvalidMeasurementNoise(value) => write!(
                f,
                "measurement noise variance must be finite and positive, got {value}"
            ),
            FilterError::RangeCountMismatch { expected, found } => write!(
                f,
                "expected {expected} initialization ranges (one per state), got {found}"
            ),
            FilterError::InvalidRange {
                dimension,
                min,
                max,
            } => write!(
                f,
                "invalid initialization range [{min}, {max}) for state {dimension}"
            ),
            FilterError::ParticleShapeMismatch {
                num_particles,
                num_states,
            } => write!(
                f,
                "particle population must contain {num_particles} particles of {num_states} states"
            ),
            FilterError::StateTransitionNotSet => {
                write!(f, "state transition function has not been set")
            }
            FilterError::MeasurementFunctionNotSet => {
                write!(f, "measurement function has not been set")
            }
            FilterError::TransitionDimensionMismatch { expected, found } => write!(
                f,
                "state transition returned {found} states, expected {expected}"
            ),
            FilterError::MeasurementDimensionMismatch { expected, found } => write!(
                f,
                "measurement function returned {found} measurements, expected {expected}"
            ),
            FilterError::SamplerExhausted { iterations } => write!(
                f,
                "Gaussian sampler failed to accept a sample within {iterations} iterations"
            ),
        }
    }
}

impl std::error::Error for FilterError {}
