use thiserror::Error;

/// Failures while loading or validating a recorded session.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Failed to read dataset: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed dataset: {0}")]
    Parse(String),

    #[error("Invalid number in {field}[{index}]: {value:?}")]
    InvalidNumber {
        field: &'static str,
        index: usize,
        value: String,
    },

    #[error("Length mismatch: {timestamps} timestamps, {encoder1} encoder1, {encoder2} encoder2")]
    LengthMismatch {
        timestamps: usize,
        encoder1: usize,
        encoder2: usize,
    },

    #[error("Dataset contains no samples")]
    Empty,

    #[error("Timestamp at index {index} goes backwards ({previous} -> {current})")]
    Unordered {
        index: usize,
        previous: i64,
        current: i64,
    },
}

impl From<serde_json::Error> for DatasetError {
    fn from(e: serde_json::Error) -> Self {
        DatasetError::Parse(e.to_string())
    }
}

/// Failures of the pacing policy for a single sample.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PacingError {
    #[error("Speed override {value} m/s cannot pace sample {index}")]
    NonPositiveSpeed { index: usize, value: f64 },

    #[error("Sample {index} needs a {required_ms} ms wait, limit is {limit_ms} ms")]
    WaitExceeded {
        index: usize,
        required_ms: u64,
        limit_ms: u64,
    },

    #[error("Clock stalled while pacing sample {index} after {polls} polls")]
    Stalled { index: usize, polls: u64 },
}

/// Rejected live speed values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpeedError {
    #[error("Speed value {0} is not finite")]
    NonFinite(f64),

    #[error("Cannot parse speed from {0:?}")]
    Unparsable(String),
}

/// Anything that terminates a replay session.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Pacing(#[from] PacingError),

    #[error("Pose sink failed: {0}")]
    Sink(String),
}

pub type ReplayResult<T> = Result<T, ReplayError>;
