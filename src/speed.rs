use std::sync::Arc;

use crossbeam::atomic::AtomicCell;

use crate::error::SpeedError;

/// Latest live vehicle speed, shared between the feed and the scheduler.
///
/// `None` until the first value arrives. Once set it is never cleared, so the
/// "has been set" flag and the value always travel together in one atomic load.
#[derive(Debug, Default)]
pub struct SpeedOverride {
    cell: AtomicCell<Option<f64>>,
}

impl SpeedOverride {
    pub fn new() -> Self {
        Self {
            cell: AtomicCell::new(None),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Store a new speed in m/s. Last write wins.
    ///
    /// Non-finite values are rejected and leave the cell untouched. Zero and
    /// negative values are stored; the scheduler refuses to pace with them.
    pub fn publish(&self, value: f64) -> Result<(), SpeedError> {
        if !value.is_finite() {
            return Err(SpeedError::NonFinite(value));
        }
        self.cell.store(Some(value));
        Ok(())
    }

    pub fn snapshot(&self) -> Option<f64> {
        self.cell.load()
    }

    pub fn has_been_set(&self) -> bool {
        self.snapshot().is_some()
    }
}

/// Parse one speed reading from text (a bare decimal number in m/s).
pub fn parse_speed(text: &str) -> Result<f64, SpeedError> {
    let trimmed = text.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| SpeedError::Unparsable(trimmed.to_string()))?;
    if !value.is_finite() {
        return Err(SpeedError::NonFinite(value));
    }
    Ok(value)
}
