//! Replay timing: clocks, cancellation and the per-sample pacing policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use crossbeam::atomic::AtomicCell;
use serde::{Deserialize, Serialize};

use crate::error::PacingError;
use crate::filters::DiffDrive;

/// Monotonic time source the scheduler paces against.
pub trait Clock: Send + Sync {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`Instant`] and `thread::sleep`.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: sleeping advances time instantly.
///
/// Used for offline replays and for deterministic scheduler tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicCell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.store(self.now.load() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.load()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Cooperative stop signal checked between polls.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    /// Fire each sample at its recorded offset
    Timestamp,
    /// Fire each sample after the time the live speed needs to cover the next step
    Speed,
}

/// What speed pacing does at the last sample, where there is no next step to look at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FinalSamplePolicy {
    #[default]
    RecordedTimestamp,
    Immediate,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WaitOutcome {
    Reached,
    Cancelled,
}

/// Milliseconds the vehicle needs to cover `next_step_ticks` of wheel travel at `speed` m/s.
pub fn speed_wait_ms(
    drive: &DiffDrive,
    next_step_ticks: i64,
    speed: f64,
    index: usize,
) -> Result<f64, PacingError> {
    // Also rejects NaN
    if !(speed > 0.0) || !speed.is_finite() {
        return Err(PacingError::NonPositiveSpeed { index, value: speed });
    }
    let distance = drive.ticks_to_distance(next_step_ticks).abs();
    Ok(distance / speed * 1000.0)
}

/// Sleep in `poll` slices until `clock` reaches `target`.
///
/// Fails up front when the wait is longer than `max_wait`. The number of
/// polls is capped at what `max_wait` allows, so a clock that stops advancing
/// ends in [`PacingError::Stalled`] rather than a spin.
pub fn wait_until(
    clock: &dyn Clock,
    target: Duration,
    poll: Duration,
    max_wait: Duration,
    cancel: &CancelToken,
    index: usize,
) -> Result<WaitOutcome, PacingError> {
    let began = clock.now();
    let required = target.saturating_sub(began);
    if required > max_wait {
        return Err(PacingError::WaitExceeded {
            index,
            required_ms: required.as_millis() as u64,
            limit_ms: max_wait.as_millis() as u64,
        });
    }

    let max_polls = poll_budget(max_wait, poll);
    let mut polls = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::Cancelled);
        }
        let now = clock.now();
        if now >= target {
            return Ok(WaitOutcome::Reached);
        }
        if polls >= max_polls {
            return Err(PacingError::Stalled { index, polls });
        }
        clock.sleep(poll.min(target - now));
        polls += 1;
    }
}

/// Polls needed to sleep through `max_wait`, plus one for a final partial slice.
fn poll_budget(max_wait: Duration, poll: Duration) -> u64 {
    let slices = max_wait.as_nanos() / poll.as_nanos().max(1);
    u64::try_from(slices).unwrap_or(u64::MAX).saturating_add(1)
}

/// Convert a millisecond offset (possibly fractional) into a `Duration`.
pub fn offset_ms(ms: f64) -> Duration {
    // Whole-millisecond offsets stay exact
    Duration::from_nanos((ms.max(0.0) * 1e6).round() as u64)
}
