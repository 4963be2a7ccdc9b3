//! Pose sinks and the odometry message adapter.

use std::io::Write;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::ReplayConfig;
use crate::types::{isotropic_covariance, yaw_to_quaternion, Pose, VelocityEstimate, COVARIANCE_LEN};

/// What the scheduler hands to a sink after every integrator step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseStep {
    pub sequence: usize,
    /// Recorded timestamp of the sample, milliseconds
    pub timestamp: i64,
    pub pose: Pose,
    pub velocity: VelocityEstimate,
}

pub trait PoseSink {
    fn publish(&mut self, step: &PoseStep) -> anyhow::Result<()>;
}

impl<S: PoseSink + ?Sized> PoseSink for &mut S {
    fn publish(&mut self, step: &PoseStep) -> anyhow::Result<()> {
        (**self).publish(step)
    }
}

/// Planar odometry in the 6-DOF message layout downstream consumers expect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OdometryMessage {
    pub sequence: usize,
    pub stamp_ms: i64,
    pub wall_stamp_us: i64,
    pub frame_id: String,
    pub child_frame_id: String,
    pub position: [f64; 3],
    /// `[x, y, z, w]`
    pub orientation: [f64; 4],
    pub pose_covariance: Vec<f64>,
    pub linear: [f64; 3],
    pub angular: [f64; 3],
    pub twist_covariance: Vec<f64>,
}

/// Packs pose steps into [`OdometryMessage`]s with fixed frames and covariance.
#[derive(Clone, Debug)]
pub struct OdometryAdapter {
    frame_id: String,
    child_frame_id: String,
    covariance: [f64; COVARIANCE_LEN],
}

impl OdometryAdapter {
    pub fn new(frame_id: &str, child_frame_id: &str, variance: f64) -> Self {
        Self {
            frame_id: frame_id.to_string(),
            child_frame_id: child_frame_id.to_string(),
            covariance: isotropic_covariance(variance),
        }
    }

    pub fn from_config(config: &ReplayConfig) -> Self {
        Self::new(&config.frame_id, &config.child_frame_id, config.covariance)
    }

    pub fn to_message(&self, step: &PoseStep) -> OdometryMessage {
        OdometryMessage {
            sequence: step.sequence,
            stamp_ms: step.timestamp,
            wall_stamp_us: Utc::now().timestamp_micros(),
            frame_id: self.frame_id.clone(),
            child_frame_id: self.child_frame_id.clone(),
            position: [step.pose.x, step.pose.y, 0.0],
            orientation: yaw_to_quaternion(step.pose.theta),
            pose_covariance: self.covariance.to_vec(),
            linear: [step.velocity.dx, step.velocity.dy, 0.0],
            angular: [0.0, 0.0, step.velocity.dtheta],
            twist_covariance: self.covariance.to_vec(),
        }
    }
}

/// Writes one JSON odometry message per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    adapter: OdometryAdapter,
    written: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W, adapter: OdometryAdapter) -> Self {
        Self {
            writer,
            adapter,
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> PoseSink for JsonLinesSink<W> {
    fn publish(&mut self, step: &PoseStep) -> anyhow::Result<()> {
        let message = self.adapter.to_message(step);
        serde_json::to_writer(&mut self.writer, &message)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }
}

/// Keeps every step in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub steps: Vec<PoseStep>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poses(&self) -> Vec<Pose> {
        self.steps.iter().map(|s| s.pose).collect()
    }
}

impl PoseSink for MemorySink {
    fn publish(&mut self, step: &PoseStep) -> anyhow::Result<()> {
        self.steps.push(*step);
        Ok(())
    }
}
