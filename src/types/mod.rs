pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// One recorded encoder reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub sequence_index: usize,
    /// Recorded timestamp in milliseconds
    pub timestamp: i64,
    pub left_ticks: i64,
    pub right_ticks: i64,
    /// Image/frame name recorded alongside the encoder values, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
}

impl Sample {
    pub fn new(sequence_index: usize, timestamp: i64, left_ticks: i64, right_ticks: i64) -> Self {
        Self {
            sequence_index,
            timestamp,
            left_ticks,
            right_ticks,
            frame: None,
        }
    }
}

/// Planar world pose. `theta` is kept in `[0, 2π)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Pose {
    pub fn origin() -> Self {
        Self::default()
    }

    pub fn heading_deg(&self) -> f64 {
        self.theta.to_degrees()
    }
}

/// World-frame displacement and rotation of the latest step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityEstimate {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}

impl VelocityEstimate {
    pub fn translation(&self) -> f64 {
        self.dx.hypot(self.dy)
    }
}

/// Pose and velocity carried from one integrator step to the next.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OdometryState {
    pub pose: Pose,
    pub velocity: VelocityEstimate,
}

/// Wheel geometry, fixed for a session.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Wheel radius in meters
    pub wheel_radius: f64,
    pub ticks_per_revolution: f64,
    /// Distance between wheel center points in meters
    pub axle_length: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            wheel_radius: 0.19 * PI,
            ticks_per_revolution: 100.0,
            axle_length: 1.466,
        }
    }
}

/// Wrap any finite angle into `[0, 2π)`.
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(TAU);
    // rem_euclid of a tiny negative value can round up to exactly 2π
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}
