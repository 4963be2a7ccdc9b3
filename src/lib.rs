//! Differential-drive encoder odometry with a paced replay scheduler.

pub mod config;
pub mod dataset;
pub mod error;
pub mod filters;
pub mod pacing;
pub mod scheduler;
pub mod sink;
pub mod speed;
pub mod speed_feed;
pub mod types;

pub use config::{ReplayConfig, TickInterpretation, Wheel};
pub use dataset::Dataset;
pub use error::{DatasetError, PacingError, ReplayError, ReplayResult, SpeedError};
pub use filters::DiffDrive;
pub use pacing::{CancelToken, Clock, FinalSamplePolicy, ManualClock, PacingMode, SystemClock};
pub use scheduler::{ReplayScheduler, ReplaySummary};
pub use sink::{JsonLinesSink, MemorySink, OdometryAdapter, OdometryMessage, PoseSink, PoseStep};
pub use speed::SpeedOverride;
pub use types::{GeometryConfig, OdometryState, Pose, Sample, VelocityEstimate};
