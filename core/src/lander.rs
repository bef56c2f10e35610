//! Point-mass lander dynamics.
//!
//! The lander is the "true" system tracked by the particle filter in the simulation. It falls
//! under a constant gravitational acceleration and carries three thrusters (up, left, right) that
//! each add a fixed acceleration while firing. Interactive control is replaced by a scripted
//! [`ThrustCommand`] schedule so runs are repeatable.
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Gravitational acceleration (world units / s^2), pointing down
pub const GRAVITY: f64 = -10.0;
/// Acceleration contributed by each firing thruster (world units / s^2)
pub const THRUST_ACCELERATION: f64 = 30.0;

/// Which thrusters are firing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrusterState {
    #[serde(default)]
    pub up: bool,
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
}

impl ThrusterState {
    /// Net thrust acceleration for this thruster combination.
    pub fn acceleration(&self) -> Vector2<f64> {
        let mut thrust = Vector2::zeros();
        if self.up {
            thrust.y += THRUST_ACCELERATION;
        }
        if self.left {
            thrust.x -= THRUST_ACCELERATION;
        }
        if self.right {
            thrust.x += THRUST_ACCELERATION;
        }
        thrust
    }
}

/// Thrusters fired during the half-open time window `[start_s, end_s)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThrustCommand {
    pub start_s: f64,
    pub end_s: f64,
    #[serde(flatten)]
    pub thrusters: ThrusterState,
}

impl ThrustCommand {
    pub fn is_active(&self, time: f64) -> bool {
        time >= self.start_s && time < self.end_s
    }
}

/// Combine every command active at `time`. Overlapping commands OR their thrusters together.
pub fn thrusters_at(schedule: &[ThrustCommand], time: f64) -> ThrusterState {
    schedule
        .iter()
        .filter(|command| command.is_active(time))
        .fold(ThrusterState::default(), |state, command| ThrusterState {
            up: state.up || command.thrusters.up,
            left: state.left || command.thrusters.left,
            right: state.right || command.thrusters.right,
        })
}

/// A lander moving in the vertical plane.
#[derive(Clone, Debug, PartialEq)]
pub struct Lander {
    pub position: Point2<f64>,
    pub velocity: Vector2<f64>,
    pub gravity: Vector2<f64>,
    pub thrusters: ThrusterState,
}

impl Display for Lander {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lander(position: ({:.2}, {:.2}), velocity: ({:.2}, {:.2}))",
            self.position.x, self.position.y, self.velocity.x, self.velocity.y
        )
    }
}

impl Lander {
    /// Create a lander at rest at `(x, y)` with the thrusters off.
    pub fn new(x: f64, y: f64) -> Self {
        Lander {
            position: Point2::new(x, y),
            velocity: Vector2::zeros(),
            gravity: Vector2::new(0.0, GRAVITY),
            thrusters: ThrusterState::default(),
        }
    }

    pub fn set_thrusters(&mut self, thrusters: ThrusterState) {
        self.thrusters = thrusters;
    }

    /// Advance the lander by `dt` seconds.
    ///
    /// Semi-implicit Euler: velocity is updated first and the new velocity moves the position.
    pub fn step(&mut self, dt: f64) {
        let acceleration = self.gravity + self.thrusters.acceleration();
        self.velocity += acceleration * dt;
        self.position += self.velocity * dt;
    }
}
