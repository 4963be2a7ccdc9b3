use std::f64::consts::TAU;

use crate::types::{normalize_angle, GeometryConfig, OdometryState, Pose, VelocityEstimate};

/// Differential-drive dead reckoning from wheel encoder tick deltas.
///
/// Holds only the wheel geometry; the pose itself lives in the
/// [`OdometryState`] passed through [`DiffDrive::step`].
///
/// Each step translates along the heading *before* the step's rotation,
/// then applies the rotation (first-order unicycle model).
#[derive(Clone, Copy, Debug)]
pub struct DiffDrive {
    wheel_radius: f64,
    axle_length: f64,
    angle_per_tick: f64, // wheel angle per encoder tick, radians
}

impl DiffDrive {
    pub fn new(geometry: GeometryConfig) -> Self {
        Self {
            wheel_radius: geometry.wheel_radius,
            axle_length: geometry.axle_length,
            angle_per_tick: TAU / geometry.ticks_per_revolution,
        }
    }

    pub fn angle_per_tick(&self) -> f64 {
        self.angle_per_tick
    }

    /// Linear wheel travel for one tick (circumference / ticks per revolution).
    pub fn distance_per_tick(&self) -> f64 {
        self.wheel_radius * self.angle_per_tick
    }

    pub fn ticks_to_distance(&self, ticks: i64) -> f64 {
        ticks as f64 * self.distance_per_tick()
    }

    /// Advance `state` by one pair of tick deltas.
    pub fn step(&self, state: &OdometryState, delta_left: i64, delta_right: i64) -> OdometryState {
        let angle_left = delta_left as f64 * self.angle_per_tick;
        let angle_right = delta_right as f64 * self.angle_per_tick;

        // Forward travel of the axle midpoint
        let local_forward = self.wheel_radius / 2.0 * (angle_left + angle_right);

        let heading = state.pose.theta;
        let dx = local_forward * heading.cos();
        let dy = local_forward * heading.sin();
        let dtheta = self.wheel_radius / self.axle_length * (angle_left - angle_right);

        OdometryState {
            pose: Pose {
                x: state.pose.x + dx,
                y: state.pose.y + dy,
                theta: normalize_angle(heading + dtheta),
            },
            velocity: VelocityEstimate { dx, dy, dtheta },
        }
    }
}
