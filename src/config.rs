use std::fs;
use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::pacing::FinalSamplePolicy;
use crate::types::GeometryConfig;

/// How recorded tick columns are turned into per-step deltas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TickInterpretation {
    /// Columns are running totals; each step uses the difference to the previous sample
    #[default]
    Cumulative,
    /// Columns already hold per-step deltas and are fed to the integrator as-is
    PerStep,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Wheel {
    Left,
    Right,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    // ── Kinematics ──
    pub geometry: GeometryConfig,
    pub tick_interpretation: TickInterpretation,

    // ── Dataset columns ──
    /// Wheel the first encoder column was recorded from
    pub encoder1_wheel: Wheel,
    /// Wheel whose next-step travel paces samples once live speed arrives
    pub lookahead_wheel: Wheel,

    // ── Pacing ──
    pub poll_interval_ms: u64,
    pub max_wait_ms: u64,
    pub final_sample_policy: FinalSamplePolicy,
    /// Minimum gap between two publishes; 0 disables it
    pub min_publish_interval_ms: u64,

    // ── Published messages ──
    pub covariance: f64,
    pub frame_id: String,
    pub child_frame_id: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            geometry: GeometryConfig::default(),
            tick_interpretation: TickInterpretation::Cumulative,
            encoder1_wheel: Wheel::Right,
            lookahead_wheel: Wheel::Left,
            poll_interval_ms: 1,
            max_wait_ms: 30_000,
            final_sample_policy: FinalSamplePolicy::RecordedTimestamp,
            min_publish_interval_ms: 0,
            covariance: 0.2461,
            frame_id: "world_frame".to_string(),
            child_frame_id: "base_link".to_string(),
        }
    }
}

impl ReplayConfig {
    /// Read a JSON config file; absent fields keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: ReplayConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let g = &self.geometry;
        if !(g.wheel_radius > 0.0 && g.ticks_per_revolution > 0.0 && g.axle_length > 0.0) {
            anyhow::bail!(
                "Wheel geometry must be positive (radius {}, ticks/rev {}, axle {})",
                g.wheel_radius,
                g.ticks_per_revolution,
                g.axle_length
            );
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be at least 1");
        }
        if !(self.covariance >= 0.0) {
            anyhow::bail!("covariance must not be negative");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn min_publish_interval(&self) -> Option<Duration> {
        match self.min_publish_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
