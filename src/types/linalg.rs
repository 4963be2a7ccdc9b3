//! Linear algebra aliases for published odometry messages
//!
//! Pose and twist uncertainty follow the 6-DOF convention
//! (x, y, z, roll, pitch, yaw) even though only the planar
//! components are estimated.

use nalgebra::{SMatrix, UnitQuaternion};

// ===== Message Dimensions =====
pub const POSE_DOF: usize = 6;
pub const COVARIANCE_LEN: usize = POSE_DOF * POSE_DOF; // 36

pub type Covariance6 = SMatrix<f64, POSE_DOF, POSE_DOF>;
pub type Orientation = UnitQuaternion<f64>;

/// Diagonal covariance with the same variance on every axis, flattened row-major.
pub fn isotropic_covariance(variance: f64) -> [f64; COVARIANCE_LEN] {
    let m = Covariance6::identity() * variance;
    let mut out = [0.0; COVARIANCE_LEN];
    for row in 0..POSE_DOF {
        for col in 0..POSE_DOF {
            out[row * POSE_DOF + col] = m[(row, col)];
        }
    }
    out
}

/// Quaternion `[x, y, z, w]` for a pure rotation about the vertical axis.
pub fn yaw_to_quaternion(yaw: f64) -> [f64; 4] {
    let q = Orientation::from_euler_angles(0.0, 0.0, yaw);
    [q.i, q.j, q.k, q.w]
}
