//! Range radar measurement models.
//!
//! A [`Radar`] is a fixed-mount range sensor that reports the distance from the vehicle to the
//! terrain along its boresight. A [`RadarArray`] bundles several radars into a single measurement
//! vector, one channel per radar, which is what the particle filter consumes. The same array is
//! used twice in the simulation: on the true lander position to produce the observation, and on
//! every particle to produce the expected observation.
use nalgebra::{DVector, Point2};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::{self, Display};

use crate::terrain::Terrain;

/// Range reported when the radar beam does not intersect the terrain
pub const NO_RETURN: f64 = -1.0;

/// Default mounting angles: straight down and thirty degrees either side of it.
pub const DEFAULT_RADAR_ANGLES: [f64; 3] = [4.0 * PI / 3.0, 3.0 * PI / 2.0, 5.0 * PI / 3.0];

/// A single range radar mounted at a fixed angle (radians, counter-clockwise from +x).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Radar {
    pub angle: f64,
}

impl Display for Radar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Radar(angle: {:.1} deg)", self.angle.to_degrees())
    }
}

impl Radar {
    pub fn new(angle: f64) -> Self {
        Radar { angle }
    }

    /// Noise-free distance from `position` to the terrain along the radar beam, or [`NO_RETURN`].
    pub fn measure(&self, position: &Point2<f64>, terrain: &Terrain) -> f64 {
        terrain
            .distance_along(position, self.angle)
            .unwrap_or(NO_RETURN)
    }
}

/// A set of radars producing one range channel each.
#[derive(Clone, Debug, PartialEq)]
pub struct RadarArray {
    radars: Vec<Radar>,
    terrain: Terrain,
}

impl RadarArray {
    pub fn new(angles: &[f64], terrain: Terrain) -> Self {
        RadarArray {
            radars: angles.iter().copied().map(Radar::new).collect(),
            terrain,
        }
    }

    pub fn radars(&self) -> &[Radar] {
        &self.radars
    }

    pub fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    /// Number of measurement channels
    pub fn get_dimension(&self) -> usize {
        self.radars.len()
    }

    /// Expected ranges for a vehicle at `position`.
    pub fn get_expected_measurement(&self, position: &Point2<f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.radars.len(),
            self.radars
                .iter()
                .map(|radar| radar.measure(position, &self.terrain)),
        )
    }

    /// Expected ranges for a particle whose first two states are the `x` and `y` position.
    ///
    /// A state with fewer than two components has no position; every channel reports
    /// [`NO_RETURN`].
    pub fn measure_state(&self, state: &DVector<f64>) -> DVector<f64> {
        match state.as_slice() {
            [x, y, ..] => self.get_expected_measurement(&Point2::new(*x, *y)),
            _ => DVector::from_element(self.radars.len(), NO_RETURN),
        }
    }

    /// Ranges corrupted by zero-mean Gaussian noise with standard deviation `noise_std`.
    ///
    /// Channels without a return keep the [`NO_RETURN`] sentinel. A `noise_std` of zero returns the
    /// noise-free ranges.
    pub fn get_noisy_measurement<R: Rng + ?Sized>(
        &self,
        position: &Point2<f64>,
        noise_std: f64,
        rng: &mut R,
    ) -> Result<DVector<f64>, rand_distr::NormalError> {
        let mut ranges = self.get_expected_measurement(position);
        if noise_std > 0.0 {
            let normal = Normal::new(0.0, noise_std)?;
            for range in ranges.iter_mut().filter(|r| **r != NO_RETURN) {
                *range += normal.sample(rng);
            }
        }
        Ok(ranges)
    }
}
