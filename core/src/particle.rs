//! Generic bootstrap (sequential importance resampling) particle filter.
//!
//! The filter carries `N` particles, each a `D`-dimensional state vector, and advances them one
//! measurement at a time. Every call to [`ParticleFilter::update`] runs the full bootstrap cycle:
//!
//! 1. propagate each particle through the injected state transition function and add independent
//!    Gaussian process noise per state dimension,
//! 2. evaluate the injected measurement function on each propagated particle,
//! 3. weight each particle by a Gaussian likelihood of the summed squared measurement error,
//! 4. normalize the weights into a discrete distribution,
//! 5. resample the propagated population in proportion to the weights,
//! 6. reset the weights to uniform.
//!
//! Because the filter always resamples, importance weights never carry over between updates.
//!
//! # Likelihood model
//!
//! A single measurement noise variance $\sigma^2$ is shared by all `K` measurement channels. The
//! squared errors of all channels are summed and plugged into a *univariate* Gaussian density:
//!
//! $$
//! w_i = \frac{1}{\sqrt{2 \pi \sigma^2}} \exp\left(-\frac{\sum_k (z_k - \hat{z}_{i,k})^2}{2 \sigma^2}\right)
//! $$
//!
//! For `K > 1` this is not a normalized `K`-dimensional density. The normalization constant cancels
//! when the weights are normalized, but the exponent still treats all channels as one isotropic
//! residual. This approximation is intentional and kept as-is.
//!
//! # Process noise
//!
//! The per-dimension process noise values scale a standard normal draw directly, i.e. they act as
//! standard deviations even where callers refer to them as variances.
//!
//! # Example
//!
//! ```rust
//! use lander_pf::particle::{FilterStatus, ParticleFilter};
//! use nalgebra::DVector;
//!
//! let mut pf = ParticleFilter::new_with_seed(200, 2, DVector::from_vec(vec![1.0, 1.0]), 4.0, 42)
//!     .unwrap();
//! pf.set_state_transition(|x: &DVector<f64>| x.clone());
//! pf.set_measurement_function(|x: &DVector<f64>| DVector::from_vec(vec![x[0] + x[1]]));
//! pf.init_particles(&[(0.0, 10.0), (0.0, 10.0)]).unwrap();
//! assert_eq!(pf.status(), FilterStatus::Ready);
//!
//! pf.update(&DVector::from_vec(vec![12.0])).unwrap();
//! assert_eq!(pf.particles().len(), 200);
//! ```

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

use crate::FilterError;
use crate::gaussian::GaussianSampler;

/// Caller supplied state transition function: maps a particle to its predicted state.
pub type StateTransition = Box<dyn Fn(&DVector<f64>) -> DVector<f64> + Send + Sync>;
/// Caller supplied measurement function: maps a particle to its expected measurements.
pub type MeasurementFunction = Box<dyn Fn(&DVector<f64>) -> DVector<f64> + Send + Sync>;

/// Logical state of a [`ParticleFilter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterStatus {
    /// Model functions are missing or the population has not been initialized yet.
    Uninitialized,
    /// Both model functions are injected and the population has been initialized.
    Ready,
}

/// Strategy for drawing the resampled population from the normalized weights.
///
/// Every strategy selects each output slot from the normalized weight distribution over the
/// propagated population. `Multinomial` draws each slot independently with a linear scan of the
/// cumulative weights (O(N^2) worst case). `Systematic` and `Stratified` sweep a sorted set of
/// positions through the cumulative weights once (O(N)). `Residual` deterministically copies
/// `floor(N * w)` of each particle and fills the remainder systematically from the residuals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingStrategy {
    #[default]
    Multinomial,
    Systematic,
    Stratified,
    Residual,
}

impl ResamplingStrategy {
    /// Draw `weights.len()` indices into the population according to the normalized `weights`.
    ///
    /// The weights are expected to be non-negative and to sum to one. If floating point rounding
    /// leaves a draw above the final cumulative weight, the last particle with a non-zero weight
    /// is selected.
    pub fn resample<R: Rng + ?Sized>(&self, weights: &[f64], rng: &mut R) -> Vec<usize> {
        let n = weights.len();
        if n == 0 {
            return Vec::new();
        }
        match self {
            ResamplingStrategy::Multinomial => Self::multinomial_resample(weights, rng),
            ResamplingStrategy::Systematic => {
                let offset = rng.random::<f64>() / n as f64;
                let positions: Vec<f64> = (0..n).map(|i| offset + i as f64 / n as f64).collect();
                select_sorted(weights, &positions)
            }
            ResamplingStrategy::Stratified => {
                let positions: Vec<f64> = (0..n)
                    .map(|i| (i as f64 + rng.random::<f64>()) / n as f64)
                    .collect();
                select_sorted(weights, &positions)
            }
            ResamplingStrategy::Residual => Self::residual_resample(weights, rng),
        }
    }

    fn multinomial_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
        let fallback = last_positive_index(weights);
        (0..weights.len())
            .map(|_| {
                let eps = rng.random::<f64>();
                let mut cumulative = 0.0;
                for (j, &w) in weights.iter().enumerate() {
                    cumulative += w;
                    if eps < cumulative {
                        return j;
                    }
                }
                fallback
            })
            .collect()
    }

    fn residual_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
        let n = weights.len();
        let mut indices = Vec::with_capacity(n);
        let mut residual = vec![0.0; n];
        for (i, &w) in weights.iter().enumerate() {
            let scaled = w * n as f64;
            let copies = (scaled.floor() as usize).min(n - indices.len());
            indices.extend(std::iter::repeat_n(i, copies));
            residual[i] = scaled - copies as f64;
        }
        let remaining = n - indices.len();
        if remaining == 0 {
            return indices;
        }
        let residual_sum: f64 = residual.iter().sum();
        if residual_sum <= 0.0 || !residual_sum.is_finite() {
            // Rounding left slots to fill but no residual mass; reuse the deterministic copies.
            let fallback = last_positive_index(weights);
            indices.extend(std::iter::repeat_n(fallback, remaining));
            return indices;
        }
        residual.iter_mut().for_each(|r| *r /= residual_sum);
        let offset = rng.random::<f64>() / remaining as f64;
        let positions: Vec<f64> = (0..remaining)
            .map(|i| offset + i as f64 / remaining as f64)
            .collect();
        indices.extend(select_sorted(&residual, &positions));
        indices
    }
}

/// Walk ascending `positions` through the cumulative sum of `weights` in a single pass.
fn select_sorted(weights: &[f64], positions: &[f64]) -> Vec<usize> {
    let last = last_positive_index(weights);
    let mut selected = Vec::with_capacity(positions.len());
    let mut i = 0;
    let mut cumulative = weights[0];
    for &position in positions {
        while position >= cumulative && i < last {
            i += 1;
            cumulative += weights[i];
        }
        selected.push(i);
    }
    selected
}

fn last_positive_index(weights: &[f64]) -> usize {
    weights
        .iter()
        .rposition(|&w| w > 0.0)
        .unwrap_or(weights.len().saturating_sub(1))
}

/// Unnormalized Gaussian likelihood of a summed squared measurement error under a single shared
/// measurement noise variance.
pub fn gaussian_likelihood(squared_error: f64, variance: f64) -> f64 {
    (-squared_error / (2.0 * variance)).exp() / (2.0 * std::f64::consts::PI * variance).sqrt()
}

/// Normalize `weights` in place so they sum to one.
///
/// Returns `false` if the weights could not be normalized (zero, negative or non-finite sum, or a
/// non-finite entry), in which case they are reset to the uniform distribution instead.
pub fn normalize_weights(weights: &mut [f64]) -> bool {
    if weights.is_empty() {
        return true;
    }
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 && sum.is_finite() && weights.iter().all(|w| w.is_finite() && *w >= 0.0) {
        weights.iter_mut().for_each(|w| *w /= sum);
        true
    } else {
        let uniform = 1.0 / weights.len() as f64;
        weights.iter_mut().for_each(|w| *w = uniform);
        false
    }
}

/// Effective sample size `1 / sum(w^2)` of a set of normalized weights.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_of_squares: f64 = weights.iter().map(|w| w * w).sum();
    if sum_of_squares > 0.0 {
        1.0 / sum_of_squares
    } else {
        0.0
    }
}

/// Summary of the most recent completed update, captured before the weights were reset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpdateDiagnostics {
    /// Sum of the unnormalized likelihood weights
    pub likelihood_sum: f64,
    /// Effective sample size of the normalized weights
    pub effective_sample_size: f64,
    /// Largest normalized weight
    pub max_weight: f64,
    /// True if the weights could not be normalized and were reset to uniform before resampling
    pub degenerate: bool,
}

/// Bootstrap particle filter over `D`-dimensional state vectors.
///
/// The random number generator is owned by the filter so that a seeded generator makes every
/// initialization, noise draw and resampling decision reproducible.
pub struct ParticleFilter<R: Rng = StdRng> {
    particles: Vec<DVector<f64>>,
    weights: Vec<f64>,
    num_states: usize,
    process_noise: DVector<f64>,
    measurement_noise_variance: f64,
    state_transition: Option<StateTransition>,
    measurement_function: Option<MeasurementFunction>,
    resampling_strategy: ResamplingStrategy,
    sampler: GaussianSampler,
    rng: R,
    initialized: bool,
    last_update: Option<UpdateDiagnostics>,
}

impl<R: Rng> Debug for ParticleFilter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticleFilter")
            .field("num_particles", &self.particles.len())
            .field("num_states", &self.num_states)
            .field("status", &self.status())
            .field("process_noise", &self.process_noise.as_slice())
            .field(
                "measurement_noise_variance",
                &self.measurement_noise_variance,
            )
            .field("resampling_strategy", &self.resampling_strategy)
            .field("mean", &self.get_estimate().as_slice())
            .field("last_update", &self.last_update)
            .finish()
    }
}

impl ParticleFilter<StdRng> {
    /// Create a filter seeded from a random seed.
    ///
    /// # Arguments
    /// * `num_particles` - Number of particles `N` (> 0)
    /// * `num_states` - State dimension `D` (> 0)
    /// * `process_noise` - Length-`D` per-dimension process noise scale
    /// * `measurement_noise_variance` - Shared measurement noise variance (> 0)
    pub fn new(
        num_particles: usize,
        num_states: usize,
        process_noise: DVector<f64>,
        measurement_noise_variance: f64,
    ) -> Result<Self, FilterError> {
        Self::new_with_seed(
            num_particles,
            num_states,
            process_noise,
            measurement_noise_variance,
            rand::random(),
        )
    }

    /// Create a filter with a specific random seed. Useful for reproducible runs and tests.
    pub fn new_with_seed(
        num_particles: usize,
        num_states: usize,
        process_noise: DVector<f64>,
        measurement_noise_variance: f64,
        seed: u64,
    ) -> Result<Self, FilterError> {
        Self::with_rng(
            num_particles,
            num_states,
            process_noise,
            measurement_noise_variance,
            StdRng::seed_from_u64(seed),
        )
    }
}

impl<R: Rng> ParticleFilter<R> {
    /// Create a filter driven by the given random number generator.
    ///
    /// Particles start at the zero vector with uniform weights. The model functions are not
    /// required here; see [`ParticleFilter::set_state_transition`] and
    /// [`ParticleFilter::set_measurement_function`].
    pub fn with_rng(
        num_particles: usize,
        num_states: usize,
        process_noise: DVector<f64>,
        measurement_noise_variance: f64,
        rng: R,
    ) -> Result<Self, FilterError> {
        if num_particles == 0 {
            return Err(FilterError::InvalidParticleCount);
        }
        if num_states == 0 {
            return Err(FilterError::InvalidStateDimension);
        }
        if process_noise.len() != num_states {
            return Err(FilterError::ProcessNoiseDimensionMismatch {
                expected: num_states,
                found: process_noise.len(),
            });
        }
        if let Some((dimension, &value)) = process_noise
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(FilterError::InvalidProcessNoise { dimension, value });
        }
        if !(measurement_noise_variance.is_finite() && measurement_noise_variance > 0.0) {
            return Err(FilterError::InvalidMeasurementNoise(
                measurement_noise_variance,
            ));
        }
        Ok(ParticleFilter {
            particles: vec![DVector::zeros(num_states); num_particles],
            weights: vec![1.0 / num_particles as f64; num_particles],
            num_states,
            process_noise,
            measurement_noise_variance,
            state_transition: None,
            measurement_function: None,
            resampling_strategy: ResamplingStrategy::default(),
            sampler: GaussianSampler::default(),
            rng,
            initialized: false,
            last_update: None,
        })
    }

    /// Replace the resampling strategy (builder style).
    pub fn with_resampling_strategy(mut self, strategy: ResamplingStrategy) -> Self {
        self.resampling_strategy = strategy;
        self
    }

    /// Replace the Gaussian sampler used for process noise (builder style).
    pub fn with_sampler(mut self, sampler: GaussianSampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn set_resampling_strategy(&mut self, strategy: ResamplingStrategy) {
        self.resampling_strategy = strategy;
    }

    /// Inject the state transition function. Process noise is added by the filter afterwards.
    pub fn set_state_transition<F>(&mut self, transition: F)
    where
        F: Fn(&DVector<f64>) -> DVector<f64> + Send + Sync + 'static,
    {
        self.state_transition = Some(Box::new(transition));
    }

    /// Inject the measurement function mapping a particle to its expected measurements.
    pub fn set_measurement_function<F>(&mut self, measurement: F)
    where
        F: Fn(&DVector<f64>) -> DVector<f64> + Send + Sync + 'static,
    {
        self.measurement_function = Some(Box::new(measurement));
    }

    pub fn status(&self) -> FilterStatus {
        if self.initialized
            && self.state_transition.is_some()
            && self.measurement_function.is_some()
        {
            FilterStatus::Ready
        } else {
            FilterStatus::Uninitialized
        }
    }

    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    pub fn particles(&self) -> &[DVector<f64>] {
        &self.particles
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn process_noise(&self) -> &DVector<f64> {
        &self.process_noise
    }

    pub fn measurement_noise_variance(&self) -> f64 {
        self.measurement_noise_variance
    }

    pub fn resampling_strategy(&self) -> ResamplingStrategy {
        self.resampling_strategy
    }

    /// Diagnostics of the most recent successful [`ParticleFilter::update`].
    pub fn last_update(&self) -> Option<UpdateDiagnostics> {
        self.last_update
    }

    /// Draw every particle uniformly inside per-dimension `(min, max)` ranges.
    ///
    /// Component `j` of every particle is drawn from `[min_j, max_j)`. A range with
    /// `min == max` pins that dimension to `min`.
    ///
    /// # Errors
    /// * [`FilterError::RangeCountMismatch`] if `ranges.len() != D`
    /// * [`FilterError::InvalidRange`] if a bound or the width `max - min` is not finite, or
    ///   `min > max`
    pub fn init_particles(&mut self, ranges: &[(f64, f64)]) -> Result<(), FilterError> {
        if ranges.len() != self.num_states {
            return Err(FilterError::RangeCountMismatch {
                expected: self.num_states,
                found: ranges.len(),
            });
        }
        for (dimension, &(min, max)) in ranges.iter().enumerate() {
            if !(min.is_finite() && max.is_finite() && (max - min).is_finite()) || min > max {
                return Err(FilterError::InvalidRange {
                    dimension,
                    min,
                    max,
                });
            }
        }
        for particle in self.particles.iter_mut() {
            for (j, &(min, max)) in ranges.iter().enumerate() {
                particle[j] = if min < max {
                    let value = self.rng.random_range(min..max);
                    // float rounding can land exactly on the excluded upper bound
                    if value < max { value } else { min }
                } else {
                    min
                };
            }
        }
        self.initialized = true;
        Ok(())
    }

    /// Replace the whole population, e.g. to start from a known set of hypotheses.
    ///
    /// Weights are reset to uniform.
    ///
    /// # Errors
    /// [`FilterError::ParticleShapeMismatch`] unless exactly `N` particles of length `D` are given.
    pub fn set_particles(&mut self, particles: Vec<DVector<f64>>) -> Result<(), FilterError> {
        if particles.len() != self.particles.len()
            || particles.iter().any(|p| p.len() != self.num_states)
        {
            return Err(FilterError::ParticleShapeMismatch {
                num_particles: self.particles.len(),
                num_states: self.num_states,
            });
        }
        let n = particles.len();
        self.particles = particles;
        self.weights = vec![1.0 / n as f64; n];
        self.initialized = true;
        Ok(())
    }

    /// Run one predict → weight → normalize → resample cycle against `measurements`.
    ///
    /// On success the population is replaced by the resampled set and the weights are uniform.
    /// On error the population and weights are left untouched.
    ///
    /// # Errors
    /// * [`FilterError::StateTransitionNotSet`] / [`FilterError::MeasurementFunctionNotSet`]
    /// * [`FilterError::TransitionDimensionMismatch`] if the transition changes the state length
    /// * [`FilterError::MeasurementDimensionMismatch`] if the measurement function output length
    ///   differs from `measurements.len()`
    /// * [`FilterError::SamplerExhausted`] if process noise could not be drawn
    pub fn update(&mut self, measurements: &DVector<f64>) -> Result<(), FilterError> {
        let transition = self
            .state_transition
            .as_ref()
            .ok_or(FilterError::StateTransitionNotSet)?;
        let measure = self
            .measurement_function
            .as_ref()
            .ok_or(FilterError::MeasurementFunctionNotSet)?;

        let n = self.particles.len();
        let mut propagated = Vec::with_capacity(n);
        let mut weights = Vec::with_capacity(n);
        for particle in &self.particles {
            let mut noise = DVector::<f64>::zeros(self.num_states);
            for j in 0..self.num_states {
                noise[j] = self.sampler.sample(&mut self.rng)? * self.process_noise[j];
            }

            let predicted_state = transition(particle);
            if predicted_state.len() != self.num_states {
                return Err(FilterError::TransitionDimensionMismatch {
                    expected: self.num_states,
                    found: predicted_state.len(),
                });
            }
            let next = predicted_state + noise;

            let predicted = measure(&next);
            if predicted.len() != measurements.len() {
                return Err(FilterError::MeasurementDimensionMismatch {
                    expected: measurements.len(),
                    found: predicted.len(),
                });
            }
            let error = (measurements - predicted).norm_squared();

            weights.push(gaussian_likelihood(error, self.measurement_noise_variance));
            propagated.push(next);
        }

        let likelihood_sum: f64 = weights.iter().sum();
        let degenerate = !normalize_weights(&mut weights);
        if degenerate {
            log::warn!(
                "Particle weights could not be normalized (likelihood sum = {likelihood_sum:e}); resampling from uniform weights"
            );
        }
        let diagnostics = UpdateDiagnostics {
            likelihood_sum,
            effective_sample_size: effective_sample_size(&weights),
            max_weight: weights.iter().copied().fold(0.0, f64::max),
            degenerate,
        };

        let indices = self.resampling_strategy.resample(&weights, &mut self.rng);
        self.particles = indices.into_iter().map(|i| propagated[i].clone()).collect();
        self.weights = vec![1.0 / n as f64; n];
        self.last_update = Some(diagnostics);

        log::debug!(
            "Particle filter update: N = {}, ESS = {:.2}, max weight = {:.4}",
            n,
            diagnostics.effective_sample_size,
            diagnostics.max_weight
        );
        Ok(())
    }

    /// Weighted mean of the particle population.
    pub fn get_estimate(&self) -> DVector<f64> {
        self.particles
            .iter()
            .zip(self.weights.iter())
            .fold(DVector::zeros(self.num_states), |mut mean, (p, &w)| {
                mean += p * w;
                mean
            })
    }

    /// Weighted covariance of the particle population about [`ParticleFilter::get_estimate`].
    pub fn get_certainty(&self) -> DMatrix<f64> {
        let mean = self.get_estimate();
        let mut cov = DMatrix::<f64>::zeros(self.num_states, self.num_states);
        for (particle, &w) in self.particles.iter().zip(self.weights.iter()) {
            let diff = particle - &mean;
            cov += w * &diff * diff.transpose();
        }
        cov
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn identity_filter(
        num_particles: usize,
        num_states: usize,
        process_noise: f64,
        seed: u64,
    ) -> ParticleFilter {
        let mut pf = ParticleFilter::new_with_seed(
            num_particles,
            num_states,
            DVector::from_element(num_states, process_noise),
            1.0,
            seed,
        )
        .unwrap();
        pf.set_state_transition(|x: &DVector<f64>| x.clone());
        pf.set_measurement_function(|x: &DVector<f64>| x.clone());
        pf
    }

    #[test]
    fn construction_allocates_zero_particles_and_uniform_weights() {
        let pf = ParticleFilter::new(5, 3, DVector::from_vec(vec![1.0, 2.0, 3.0]), 2.0).unwrap();
        assert_eq!(pf.num_particles(), 5);
        assert_eq!(pf.num_states(), 3);
        assert!(pf.particles().iter().all(|p| p.len() == 3 && p.iter().all(|&v| v == 0.0)));
        assert!(pf.weights().iter().all(|&w| w == 0.2));
        assert_eq!(pf.status(), FilterStatus::Uninitialized);
        assert!(pf.last_update().is_none());
    }

    #[test]
    fn construction_rejects_bad_parameters() {
        let noise = DVector::from_vec(vec![1.0]);
        assert!(matches!(
            ParticleFilter::new(0, 1, noise.clone(), 1.0),
            Err(FilterError::InvalidParticleCount)
        ));
        assert!(matches!(
            ParticleFilter::new(10, 0, DVector::zeros(0), 1.0),
            Err(FilterError::InvalidStateDimension)
        ));
        assert!(matches!(
            ParticleFilter::new(10, 2, noise.clone(), 1.0),
            Err(FilterError::ProcessNoiseDimensionMismatch {
                expected: 2,
                found: 1
            })
        ));
        assert!(matches!(
            ParticleFilter::new(10, 1, DVector::from_vec(vec![-1.0]), 1.0),
            Err(FilterError::InvalidProcessNoise { dimension: 0, .. })
        ));
        assert!(matches!(
            ParticleFilter::new(10, 1, noise.clone(), 0.0),
            Err(FilterError::InvalidMeasurementNoise(_))
        ));
        assert!(matches!(
            ParticleFilter::new(10, 1, noise, f64::NAN),
            Err(FilterError::InvalidMeasurementNoise(_))
        ));
    }

    #[test]
    fn status_requires_functions_and_initialization() {
        let mut pf = ParticleFilter::new_with_seed(4, 1, DVector::zeros(1), 1.0, 1).unwrap();
        pf.init_particles(&[(0.0, 1.0)]).unwrap();
        assert_eq!(pf.status(), FilterStatus::Uninitialized);
        pf.set_state_transition(|x: &DVector<f64>| x.clone());
        assert_eq!(pf.status(), FilterStatus::Uninitialized);
        pf.set_measurement_function(|x: &DVector<f64>| x.clone());
        assert_eq!(pf.status(), FilterStatus::Ready);
    }

    #[test]
    fn init_particles_respects_ranges() {
        let mut pf = identity_filter(500, 2, 0.0, 11);
        pf.init_particles(&[(0.0, 10.0), (100.0, 200.0)]).unwrap();
        for p in pf.particles() {
            assert!(p[0] >= 0.0 && p[0] < 10.0, "x = {}", p[0]);
            assert!(p[1] >= 100.0 && p[1] < 200.0, "y = {}", p[1]);
        }
    }

    /// Generator stuck at the top of its output range
    struct SaturatedRng;

    impl rand::RngCore for SaturatedRng {
        fn next_u32(&mut self) -> u32 {
            u32::MAX
        }
        fn next_u64(&mut self) -> u64 {
            u64::MAX
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0xff);
        }
    }

    #[test]
    fn init_particles_excludes_upper_bound() {
        let mut pf =
            ParticleFilter::with_rng(4, 3, DVector::zeros(3), 1.0, SaturatedRng).unwrap();
        pf.init_particles(&[(0.0, 10.0), (100.0, 200.0), (-1e-3, 1e-3)])
            .unwrap();
        for p in pf.particles() {
            assert!(p[0] >= 0.0 && p[0] < 10.0, "x = {}", p[0]);
            assert!(p[1] >= 100.0 && p[1] < 200.0, "y = {}", p[1]);
            assert!(p[2] >= -1e-3 && p[2] < 1e-3, "z = {}", p[2]);
        }
    }

    #[test]
    fn init_particles_pins_empty_ranges() {
        let mut pf =
            ParticleFilter::with_rng(2, 2, DVector::zeros(2), 1.0, SaturatedRng).unwrap();
        pf.init_particles(&[(5.0, 5.0), (-2.0, -2.0)]).unwrap();
        for p in pf.particles() {
            assert_eq!(p.as_slice(), &[5.0, -2.0]);
        }
    }

    #[test]
    fn init_particles_rejects_bad_ranges() {
        let mut pf = identity_filter(3, 2, 0.0, 1);
        assert!(matches!(
            pf.init_particles(&[(0.0, 1.0)]),
            Err(FilterError::RangeCountMismatch {
                expected: 2,
                found: 1
            })
        ));
        assert!(matches!(
            pf.init_particles(&[(0.0, 1.0), (5.0, 4.0)]),
            Err(FilterError::InvalidRange { dimension: 1, .. })
        ));
        assert!(matches!(
            pf.init_particles(&[(f64::NEG_INFINITY, 1.0), (0.0, 1.0)]),
            Err(FilterError::InvalidRange { dimension: 0, .. })
        ));
        assert!(matches!(
            pf.init_particles(&[(0.0, 1.0), (-f64::MAX, f64::MAX)]),
            Err(FilterError::InvalidRange { dimension: 1, .. })
        ));
        assert_eq!(pf.status(), FilterStatus::Uninitialized);
    }

    #[test]
    fn update_without_model_functions_fails_fast() {
        let mut pf = ParticleFilter::new_with_seed(3, 1, DVector::zeros(1), 1.0, 1).unwrap();
        let z = DVector::from_vec(vec![0.0]);
        assert!(matches!(
            pf.update(&z),
            Err(FilterError::StateTransitionNotSet)
        ));
        pf.set_state_transition(|x: &DVector<f64>| x.clone());
        assert!(matches!(
            pf.update(&z),
            Err(FilterError::MeasurementFunctionNotSet)
        ));
    }

    #[test]
    fn measurement_length_mismatch_leaves_population_untouched() {
        let mut pf = identity_filter(4, 2, 1.0, 5);
        pf.init_particles(&[(0.0, 1.0), (0.0, 1.0)]).unwrap();
        let before = pf.particles().to_vec();
        let result = pf.update(&DVector::from_vec(vec![0.5, 0.5, 0.5]));
        assert!(matches!(
            result,
            Err(FilterError::MeasurementDimensionMismatch {
                expected: 3,
                found: 2
            })
        ));
        assert_eq!(pf.particles(), before.as_slice());
        assert!(pf.last_update().is_none());
    }

    #[test]
    fn transition_changing_dimension_is_rejected() {
        let mut pf = identity_filter(4, 2, 0.0, 5);
        pf.set_state_transition(|x: &DVector<f64>| DVector::from_vec(vec![x[0]]));
        pf.init_particles(&[(0.0, 1.0), (0.0, 1.0)]).unwrap();
        assert!(matches!(
            pf.update(&DVector::from_vec(vec![0.0, 0.0])),
            Err(FilterError::TransitionDimensionMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn single_particle_end_to_end() {
        let mut pf = identity_filter(1, 1, 0.0, 9);
        pf.init_particles(&[(5.0, 5.0)]).unwrap();
        assert_eq!(pf.particles()[0][0], 5.0);

        pf.update(&DVector::from_vec(vec![5.0])).unwrap();
        let diagnostics = pf.last_update().unwrap();
        assert_approx_eq!(
            diagnostics.likelihood_sum,
            1.0 / (2.0 * std::f64::consts::PI).sqrt(),
            1e-12
        );
        assert_approx_eq!(diagnostics.likelihood_sum, 0.3989, 1e-4);
        assert_eq!(diagnostics.max_weight, 1.0);
        assert!(!diagnostics.degenerate);
        assert_eq!(pf.particles()[0][0], 5.0);
        assert_eq!(pf.weights(), &[1.0]);
    }

    #[test]
    fn divergent_particles_collapse_onto_the_consistent_one() {
        let mut pf = identity_filter(2, 1, 0.0, 21);
        pf.set_particles(vec![
            DVector::from_vec(vec![0.0]),
            DVector::from_vec(vec![10.0]),
        ])
        .unwrap();
        for _ in 0..50 {
            pf.update(&DVector::from_vec(vec![0.0])).unwrap();
            assert!(pf.last_update().unwrap().max_weight > 0.99);
            assert!(pf.particles().iter().all(|p| p[0] == 0.0));
            pf.set_particles(vec![
                DVector::from_vec(vec![0.0]),
                DVector::from_vec(vec![10.0]),
            ])
            .unwrap();
        }
    }

    #[test]
    fn population_shape_and_uniform_weights_survive_updates() {
        for &(n, d) in &[(1usize, 1usize), (7, 1), (25, 3), (200, 2)] {
            let mut pf = identity_filter(n, d, 0.5, 3);
            pf.init_particles(&vec![(-1.0, 1.0); d]).unwrap();
            for step in 0..5 {
                pf.update(&DVector::from_element(d, 0.1 * step as f64)).unwrap();
                assert_eq!(pf.particles().len(), n);
                assert!(pf.particles().iter().all(|p| p.len() == d));
                for &w in pf.weights() {
                    assert_approx_eq!(w, 1.0 / n as f64, 1e-15);
                }
            }
        }
    }

    #[test]
    fn degenerate_weights_fall_back_to_uniform() {
        let mut pf = identity_filter(10, 1, 0.0, 4);
        pf.init_particles(&[(0.0, 1.0)]).unwrap();
        // every likelihood underflows to zero
        pf.update(&DVector::from_vec(vec![1.0e6])).unwrap();
        let diagnostics = pf.last_update().unwrap();
        assert!(diagnostics.degenerate);
        assert_eq!(diagnostics.likelihood_sum, 0.0);
        assert_approx_eq!(diagnostics.effective_sample_size, 10.0, 1e-9);
        assert!(pf.particles().iter().all(|p| p[0].is_finite()));
    }

    #[test]
    fn normalized_weights_sum_to_one() {
        let mut weights = vec![0.3, 1.2, 4.0e-3, 7.5];
        assert!(normalize_weights(&mut weights));
        assert_approx_eq!(weights.iter().sum::<f64>(), 1.0, 1e-12);

        let mut zeros = vec![0.0; 4];
        assert!(!normalize_weights(&mut zeros));
        assert_eq!(zeros, vec![0.25; 4]);

        let mut with_nan = vec![0.5, f64::NAN];
        assert!(!normalize_weights(&mut with_nan));
        assert_eq!(with_nan, vec![0.5, 0.5]);
    }

    #[test]
    fn likelihood_matches_univariate_gaussian() {
        assert_approx_eq!(gaussian_likelihood(0.0, 1.0), 0.398_942_280_4, 1e-9);
        let ratio = gaussian_likelihood(100.0, 1.0) / gaussian_likelihood(0.0, 1.0);
        assert_approx_eq!(ratio, (-50.0f64).exp(), 1e-30);
        assert_approx_eq!(
            gaussian_likelihood(4.0, 2.0),
            (-1.0f64).exp() / (4.0 * std::f64::consts::PI).sqrt(),
            1e-12
        );
    }

    #[test]
    fn effective_sample_size_bounds() {
        assert_approx_eq!(effective_sample_size(&[0.25; 4]), 4.0, 1e-12);
        assert_approx_eq!(effective_sample_size(&[1.0, 0.0, 0.0]), 1.0, 1e-12);
        assert_eq!(effective_sample_size(&[]), 0.0);
    }

    #[test]
    fn every_strategy_follows_the_weight_distribution() {
        let weights = [0.1, 0.1, 0.8];
        for strategy in [
            ResamplingStrategy::Multinomial,
            ResamplingStrategy::Systematic,
            ResamplingStrategy::Stratified,
            ResamplingStrategy::Residual,
        ] {
            let mut rng = StdRng::seed_from_u64(1234);
            let trials = 20_000;
            let mut counts = [0usize; 3];
            for _ in 0..trials {
                let indices = strategy.resample(&weights, &mut rng);
                assert_eq!(indices.len(), 3);
                for i in indices {
                    counts[i] += 1;
                }
            }
            let total = (3 * trials) as f64;
            let third = counts[2] as f64 / total;
            assert!((third - 0.8).abs() < 0.02, "{strategy:?}: {third}");
            assert!((counts[0] as f64 / total - 0.1).abs() < 0.02, "{strategy:?}");
        }
    }

    #[test]
    fn zero_weight_particles_are_never_selected() {
        let weights = [0.0, 0.5, 0.0, 0.5, 0.0];
        for strategy in [
            ResamplingStrategy::Multinomial,
            ResamplingStrategy::Systematic,
            ResamplingStrategy::Stratified,
            ResamplingStrategy::Residual,
        ] {
            let mut rng = StdRng::seed_from_u64(99);
            for _ in 0..1000 {
                let indices = strategy.resample(&weights, &mut rng);
                assert!(indices.iter().all(|&i| i == 1 || i == 3), "{strategy:?}");
            }
        }
    }

    #[test]
    fn rounding_shortfall_selects_last_positive_particle() {
        // cumulative sum stops short of one; draws above it must not pick a zero weight particle
        let weights = [0.3, 0.3, 0.0];
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let indices = ResamplingStrategy::Multinomial.resample(&weights, &mut rng);
            assert!(indices.iter().all(|&i| i < 2));
        }
    }

    #[test]
    fn estimate_and_certainty_of_known_population() {
        let mut pf = identity_filter(4, 2, 0.0, 1);
        pf.set_particles(vec![
            DVector::from_vec(vec![0.0, 0.0]),
            DVector::from_vec(vec![2.0, 0.0]),
            DVector::from_vec(vec![0.0, 4.0]),
            DVector::from_vec(vec![2.0, 4.0]),
        ])
        .unwrap();
        let mean = pf.get_estimate();
        assert_approx_eq!(mean[0], 1.0, 1e-12);
        assert_approx_eq!(mean[1], 2.0, 1e-12);
        let cov = pf.get_certainty();
        assert_approx_eq!(cov[(0, 0)], 1.0, 1e-12);
        assert_approx_eq!(cov[(1, 1)], 4.0, 1e-12);
        assert_approx_eq!(cov[(0, 1)], 0.0, 1e-12);
    }

    #[test]
    fn set_particles_validates_shape() {
        let mut pf = identity_filter(2, 2, 0.0, 1);
        assert!(matches!(
            pf.set_particles(vec![DVector::zeros(2)]),
            Err(FilterError::ParticleShapeMismatch { .. })
        ));
        assert!(matches!(
            pf.set_particles(vec![DVector::zeros(2), DVector::zeros(3)]),
            Err(FilterError::ParticleShapeMismatch { .. })
        ));
    }

    #[test]
    fn seeded_filters_are_reproducible() {
        let run = || {
            let mut pf = identity_filter(50, 2, 0.3, 77);
            pf.init_particles(&[(0.0, 5.0), (0.0, 5.0)]).unwrap();
            for _ in 0..10 {
                pf.update(&DVector::from_vec(vec![2.0, 3.0])).unwrap();
            }
            pf.particles().to_vec()
        };
        assert_eq!(run(), run());
    }
}
