//! Standard-normal sampling for process noise.
//!
//! The particle filter draws its process noise from the Marsaglia polar method rather than from
//! [`rand_distr::StandardNormal`] so that the rejection loop can be bounded and surfaced as an
//! error instead of spinning. Each accepted pair yields two independent normals; only the first is
//! returned and a fresh pair is drawn on the next call.
//!
//! ```rust
//! use lander_pf::gaussian::GaussianSampler;
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let sampler = GaussianSampler::default();
//! let x = sampler.sample(&mut rng).unwrap();
//! assert!(x.is_finite());
//! ```

use rand::Rng;

use crate::FilterError;

/// Default cap on rejection-loop iterations. The acceptance rate is pi/4 so the probability of
/// reaching this cap is (1 - pi/4)^1000.
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// Marsaglia polar method sampler for the standard normal distribution N(0, 1).
///
/// The sampler holds no random state of its own; the caller threads a random number generator
/// through [`GaussianSampler::sample`], which keeps seeded runs reproducible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GaussianSampler {
    max_iterations: usize,
}

impl Default for GaussianSampler {
    fn default() -> Self {
        GaussianSampler {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl GaussianSampler {
    /// Create a sampler with a custom rejection-loop cap (at least one iteration).
    pub fn with_max_iterations(max_iterations: usize) -> Self {
        GaussianSampler {
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Draw one value from N(0, 1).
    ///
    /// # Errors
    /// Returns [`FilterError::SamplerExhausted`] if no pair inside the unit disc was drawn within
    /// the iteration cap.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, FilterError> {
        for _ in 0..self.max_iterations {
            let u = rng.random::<f64>() * 2.0 - 1.0;
            let v = rng.random::<f64>() * 2.0 - 1.0;
            let s = u * u + v * v;
            if s > 0.0 && s < 1.0 {
                return Ok(u * (-2.0 * s.ln() / s).sqrt());
            }
        }
        Err(FilterError::SamplerExhausted {
            iterations: self.max_iterations,
        })
    }
}

/// Draw one standard-normal value using the default iteration cap.
pub fn randn<R: Rng + ?Sized>(rng: &mut R) -> Result<f64, FilterError> {
    GaussianSampler::default().sample(rng)
}
