//! Replays recorded encoder samples through the odometry integrator.
//!
//! Timing starts out following the recorded timestamps. The first time a live
//! speed is seen, the scheduler switches to speed pacing for the rest of the
//! session: each sample fires after the time the vehicle needs, at that speed,
//! to cover the next step's left-wheel travel.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ReplayConfig, TickInterpretation, Wheel};
use crate::error::{ReplayError, ReplayResult};
use crate::filters::DiffDrive;
use crate::pacing::{
    offset_ms, speed_wait_ms, wait_until, CancelToken, Clock, FinalSamplePolicy, PacingMode,
    WaitOutcome,
};
use crate::sink::{PoseSink, PoseStep};
use crate::speed::SpeedOverride;
use crate::types::{OdometryState, Pose, Sample};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub steps: usize,
    pub final_pose: Pose,
    /// Path length travelled by the axle midpoint, meters
    pub distance: f64,
    /// Index of the first sample paced by live speed
    pub speed_mode_from: Option<usize>,
    pub cancelled: bool,
    /// Clock time the session took
    pub elapsed_ms: u64,
}

/// Turns cumulative (or per-step) tick columns into per-step deltas.
#[derive(Clone, Copy, Debug)]
struct TickDifferencer {
    interpretation: TickInterpretation,
    previous_left: i64,
    previous_right: i64,
}

impl TickDifferencer {
    fn new(interpretation: TickInterpretation) -> Self {
        Self {
            interpretation,
            previous_left: 0,
            previous_right: 0,
        }
    }

    fn delta(&mut self, sample: &Sample) -> (i64, i64) {
        match self.interpretation {
            TickInterpretation::PerStep => (sample.left_ticks, sample.right_ticks),
            TickInterpretation::Cumulative => {
                let delta = (
                    sample.left_ticks.saturating_sub(self.previous_left),
                    sample.right_ticks.saturating_sub(self.previous_right),
                );
                self.previous_left = sample.left_ticks;
                self.previous_right = sample.right_ticks;
                delta
            }
        }
    }
}

pub struct ReplayScheduler {
    config: ReplayConfig,
    drive: DiffDrive,
    speed: Arc<SpeedOverride>,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
}

impl ReplayScheduler {
    pub fn new(
        config: ReplayConfig,
        speed: Arc<SpeedOverride>,
        clock: Arc<dyn Clock>,
        cancel: CancelToken,
    ) -> Self {
        let drive = DiffDrive::new(config.geometry);
        Self {
            config,
            drive,
            speed,
            clock,
            cancel,
        }
    }

    /// Replay `samples` in order, publishing one pose per sample.
    ///
    /// Returns early with `cancelled = true` if the cancel token fires while
    /// waiting. Any pacing or sink error ends the session.
    pub fn run<S: PoseSink>(&self, samples: &[Sample], mut sink: S) -> ReplayResult<ReplaySummary> {
        let session_start = self.clock.now();
        let first_timestamp = samples.first().map(|s| s.timestamp).unwrap_or(0);

        let mut mode = PacingMode::Timestamp;
        let mut speed_mode_from = None;
        let mut ticks = TickDifferencer::new(self.config.tick_interpretation);
        let mut state = OdometryState::default();
        let mut distance = 0.0;
        let mut steps = 0;
        let mut cancelled = false;
        let mut last_publish: Option<Duration> = None;

        log::info!(
            "[REPLAY] Starting session: {} samples, {:?} ticks",
            samples.len(),
            self.config.tick_interpretation
        );

        for (index, sample) in samples.iter().enumerate() {
            if mode == PacingMode::Timestamp && self.speed.has_been_set() {
                mode = PacingMode::Speed;
                speed_mode_from = Some(index);
                log::info!("[PACING] Live speed detected, speed pacing from sample {}", index);
            }

            let paced = self
                .target_offset_ms(samples, index, mode, first_timestamp)?
                .map(|ms| session_start + offset_ms(ms));
            let spaced = last_publish
                .zip(self.config.min_publish_interval())
                .map(|(at, gap)| at + gap);
            let target = match (paced, spaced) {
                (Some(paced), Some(spaced)) => Some(paced.max(spaced)),
                (paced, spaced) => paced.or(spaced),
            };

            match target {
                Some(target) => {
                    let outcome = wait_until(
                        self.clock.as_ref(),
                        target,
                        self.config.poll_interval(),
                        self.config.max_wait(),
                        &self.cancel,
                        index,
                    )?;
                    if outcome == WaitOutcome::Cancelled {
                        cancelled = true;
                    }
                }
                None => cancelled = self.cancel.is_cancelled(),
            }
            if cancelled {
                log::warn!("[REPLAY] Cancelled before sample {}", index);
                break;
            }

            let (delta_left, delta_right) = ticks.delta(sample);
            state = self.drive.step(&state, delta_left, delta_right);
            distance += state.velocity.translation();
            steps += 1;

            let step = PoseStep {
                sequence: sample.sequence_index,
                timestamp: sample.timestamp,
                pose: state.pose,
                velocity: state.velocity,
            };
            sink.publish(&step).map_err(|e| ReplayError::Sink(e.to_string()))?;
            last_publish = Some(self.clock.now());

            log::debug!(
                "[REPLAY] #{} t={} ticks=({}, {}) pose=({:.3}, {:.3}, {:.1}°)",
                index,
                sample.timestamp,
                delta_left,
                delta_right,
                state.pose.x,
                state.pose.y,
                state.pose.heading_deg()
            );
        }

        let elapsed = self.clock.now().saturating_sub(session_start);
        let summary = ReplaySummary {
            steps,
            final_pose: state.pose,
            distance,
            speed_mode_from,
            cancelled,
            elapsed_ms: elapsed.as_millis() as u64,
        };
        log::info!(
            "[REPLAY] Finished {} steps in {} ms: pose=({:.3}, {:.3}, {:.1}°) distance={:.2} m",
            summary.steps,
            summary.elapsed_ms,
            summary.final_pose.x,
            summary.final_pose.y,
            summary.final_pose.heading_deg(),
            summary.distance
        );
        Ok(summary)
    }

    /// Session-relative fire time for sample `index`, or `None` to fire immediately.
    fn target_offset_ms(
        &self,
        samples: &[Sample],
        index: usize,
        mode: PacingMode,
        first_timestamp: i64,
    ) -> ReplayResult<Option<f64>> {
        let recorded = samples[index].timestamp.saturating_sub(first_timestamp) as f64;

        match mode {
            PacingMode::Timestamp => Ok(Some(recorded)),
            PacingMode::Speed => {
                let Some(next) = samples.get(index + 1) else {
                    // Last sample: nothing to look ahead at
                    return Ok(match self.config.final_sample_policy {
                        FinalSamplePolicy::RecordedTimestamp => Some(recorded),
                        FinalSamplePolicy::Immediate => None,
                    });
                };
                let wheel_ticks = |sample: &Sample| match self.config.lookahead_wheel {
                    Wheel::Left => sample.left_ticks,
                    Wheel::Right => sample.right_ticks,
                };
                let next_step = match self.config.tick_interpretation {
                    TickInterpretation::Cumulative => {
                        wheel_ticks(next).saturating_sub(wheel_ticks(&samples[index]))
                    }
                    TickInterpretation::PerStep => wheel_ticks(next),
                };
                // Latched, so a value is present; a missing one paces like a zero speed
                let speed = self.speed.snapshot().unwrap_or(0.0);
                let wait = speed_wait_ms(&self.drive, next_step, speed, index)?;
                Ok(Some(recorded + wait))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset;
    use crate::error::PacingError;
    use crate::pacing::ManualClock;
    use crate::sink::MemorySink;
    use crate::types::GeometryConfig;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    /// Records the clock time of every publish, and optionally publishes a
    /// live speed right after a chosen step.
    struct TimingSink {
        clock: Arc<ManualClock>,
        fired_at: Vec<Duration>,
        steps: Vec<PoseStep>,
        speed_after: Option<(usize, f64, Arc<SpeedOverride>)>,
    }

    impl TimingSink {
        fn new(clock: Arc<ManualClock>) -> Self {
            Self {
                clock,
                fired_at: Vec::new(),
                steps: Vec::new(),
                speed_after: None,
            }
        }

        fn fired_ms(&self) -> Vec<f64> {
            self.fired_at.iter().map(|d| d.as_secs_f64() * 1000.0).collect()
        }
    }

    impl PoseSink for TimingSink {
        fn publish(&mut self, step: &PoseStep) -> anyhow::Result<()> {
            self.fired_at.push(self.clock.now());
            self.steps.push(*step);
            if let Some((after, value, speed)) = &self.speed_after {
                if self.steps.len() == after + 1 {
                    speed.publish(*value)?;
                }
            }
            Ok(())
        }
    }

    struct FailingSink;

    impl PoseSink for FailingSink {
        fn publish(&mut self, _step: &PoseStep) -> anyhow::Result<()> {
            anyhow::bail!("transport closed")
        }
    }

    fn scheduler_with(
        config: ReplayConfig,
        speed: Arc<SpeedOverride>,
    ) -> (ReplayScheduler, Arc<ManualClock>, CancelToken) {
        let clock = Arc::new(ManualClock::new());
        let cancel = CancelToken::new();
        let scheduler = ReplayScheduler::new(config, speed, clock.clone(), cancel.clone());
        (scheduler, clock, cancel)
    }

    fn default_scheduler() -> (ReplayScheduler, Arc<ManualClock>, CancelToken) {
        scheduler_with(ReplayConfig::default(), SpeedOverride::shared())
    }

    fn samples(rows: &[(i64, i64, i64)]) -> Vec<Sample> {
        rows.iter()
            .enumerate()
            .map(|(i, &(t, l, r))| Sample::new(i, t, l, r))
            .collect()
    }

    fn circumference() -> f64 {
        2.0 * PI * GeometryConfig::default().wheel_radius
    }

    #[test]
    fn test_timestamp_pacing_follows_recorded_offsets() {
        let (scheduler, clock, _) = default_scheduler();
        let mut sink = TimingSink::new(clock.clone());
        // Recording starts at 1000 ms; session offsets are relative to it
        let data = samples(&[(1000, 0, 0), (1050, 5, 5), (1300, 10, 10), (1300, 12, 12)]);

        let summary = scheduler.run(&data, &mut sink).unwrap();

        assert_eq!(summary.steps, 4);
        assert_eq!(summary.speed_mode_from, None);
        assert!(!summary.cancelled);
        assert_eq!(
            sink.fired_at,
            [0, 50, 300, 300].map(Duration::from_millis).to_vec()
        );
        assert_eq!(summary.elapsed_ms, 300);
    }

    #[test]
    fn test_cumulative_ticks_are_differenced() {
        let (scheduler, _, _) = default_scheduler();
        let mut sink = MemorySink::new();
        let data = samples(&[(0, 50, 50), (10, 100, 100), (20, 100, 100)]);

        let summary = scheduler.run(&data, &mut sink).unwrap();

        let half_turn = circumference() / 2.0;
        let x: Vec<f64> = sink.poses().iter().map(|p| p.x).collect();
        assert_relative_eq!(x[0], half_turn, epsilon = 1e-9);
        assert_relative_eq!(x[1], 2.0 * half_turn, epsilon = 1e-9);
        // No movement on the last step
        assert_relative_eq!(x[2], x[1]);
        assert_eq!(sink.steps[2].velocity.dx, 0.0);
        assert_relative_eq!(summary.distance, 2.0 * half_turn, epsilon = 1e-9);
    }

    #[test]
    fn test_per_step_ticks_are_fed_directly() {
        let config = ReplayConfig {
            tick_interpretation: TickInterpretation::PerStep,
            ..ReplayConfig::default()
        };
        let (scheduler, _, _) = scheduler_with(config, SpeedOverride::shared());
        let mut sink = MemorySink::new();
        let data = samples(&[(0, 50, 50), (10, 100, 100)]);

        scheduler.run(&data, &mut sink).unwrap();

        let half_turn = circumference() / 2.0;
        assert_relative_eq!(sink.poses()[1].x, 3.0 * half_turn, epsilon = 1e-9);
    }

    #[test]
    fn test_single_half_revolution_sample() {
        let (scheduler, _, _) = default_scheduler();
        let summary = scheduler
            .run(&samples(&[(0, 50, 50)]), MemorySink::new())
            .unwrap();

        let radius = GeometryConfig::default().wheel_radius;
        assert_relative_eq!(summary.final_pose.x, radius * PI, epsilon = 1e-12);
        assert_relative_eq!(summary.final_pose.y, 0.0, epsilon = 1e-12);
        assert_eq!(summary.final_pose.theta, 0.0);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let data = samples(&[
            (0, 0, 0),
            (20, 12, 9),
            (40, 20, 25),
            (60, 31, 29),
            (80, 30, 45),
            (100, 52, 47),
        ]);
        let run = || {
            let (scheduler, _, _) = default_scheduler();
            let mut sink = MemorySink::new();
            scheduler.run(&data, &mut sink).unwrap();
            sink.poses()
        };

        let first = run();
        let second = run();
        assert_eq!(first.len(), 6);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.x.to_bits(), b.x.to_bits());
            assert_eq!(a.y.to_bits(), b.y.to_bits());
            assert_eq!(a.theta.to_bits(), b.theta.to_bits());
        }
    }

    #[test]
    fn test_speed_pacing_from_start() {
        let speed = SpeedOverride::shared();
        // One circumference per second
        speed.publish(circumference()).unwrap();
        let (scheduler, clock, _) = scheduler_with(ReplayConfig::default(), speed);
        let mut sink = TimingSink::new(clock);
        // Next-step left travel: 100 ticks, then 50 ticks
        let data = samples(&[(0, 0, 0), (2000, 100, 100), (2100, 150, 150)]);

        let summary = scheduler.run(&data, &mut sink).unwrap();

        assert_eq!(summary.speed_mode_from, Some(0));
        let fired = sink.fired_ms();
        assert_relative_eq!(fired[0], 1000.0, epsilon = 1e-3);
        assert_relative_eq!(fired[1], 2000.0 + 500.0, epsilon = 1e-3);
        // Final sample falls back to its recorded offset, already in the past
        assert_relative_eq!(fired[2], 2500.0, epsilon = 1e-3);
    }

    #[test]
    fn test_speed_mode_latches_after_first_update() {
        let speed = SpeedOverride::shared();
        let (scheduler, clock, _) = scheduler_with(ReplayConfig::default(), speed.clone());
        let mut sink = TimingSink::new(clock);
        // Speed arrives once, right after step 1; no further updates
        sink.speed_after = Some((1, circumference() / 2.0, speed));
        let data = samples(&[
            (0, 0, 0),
            (10, 10, 10),
            (20, 110, 110),
            (30, 210, 210),
            (40, 310, 310),
        ]);

        let summary = scheduler.run(&data, &mut sink).unwrap();

        assert_eq!(summary.speed_mode_from, Some(2));
        let fired = sink.fired_ms();
        assert_relative_eq!(fired[0], 0.0);
        assert_relative_eq!(fired[1], 10.0, epsilon = 1e-6);
        // Every later sample waits two seconds for the next 100-tick step
        assert_relative_eq!(fired[2], 20.0 + 2000.0, epsilon = 1e-3);
        assert_relative_eq!(fired[3], 30.0 + 2000.0, epsilon = 1e-3);
        // Last sample: recorded offset (40 ms) is long gone, fires at once
        assert_relative_eq!(fired[4], fired[3], epsilon = 1e-3);
    }

    #[test]
    fn test_final_sample_immediate_policy() {
        let speed = SpeedOverride::shared();
        speed.publish(1.0).unwrap();
        let config = ReplayConfig {
            final_sample_policy: FinalSamplePolicy::Immediate,
            ..ReplayConfig::default()
        };
        let (scheduler, clock, _) = scheduler_with(config, speed);
        let mut sink = TimingSink::new(clock);
        // Next-step travel is zero, so speed pacing lands on recorded offsets
        let data = samples(&[(0, 0, 0), (500, 0, 0), (5000, 0, 0)]);

        let summary = scheduler.run(&data, &mut sink).unwrap();

        assert_eq!(summary.steps, 3);
        assert_eq!(
            sink.fired_at,
            [0, 500, 500].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn test_final_sample_never_reads_past_end_with_zero_speed() {
        // A single sample under speed pacing must not look ahead, so even an
        // unusable speed does not fail it.
        let speed = SpeedOverride::shared();
        speed.publish(0.0).unwrap();
        let (scheduler, _, _) = scheduler_with(ReplayConfig::default(), speed);

        let summary = scheduler
            .run(&samples(&[(0, 10, 10)]), MemorySink::new())
            .unwrap();
        assert_eq!(summary.steps, 1);
        assert_eq!(summary.speed_mode_from, Some(0));
    }

    #[test]
    fn test_non_positive_speed_is_rejected() {
        let speed = SpeedOverride::shared();
        speed.publish(-2.0).unwrap();
        let (scheduler, _, _) = scheduler_with(ReplayConfig::default(), speed);
        let mut sink = MemorySink::new();

        let err = scheduler
            .run(&samples(&[(0, 0, 0), (10, 5, 5)]), &mut sink)
            .unwrap_err();

        assert!(matches!(
            err,
            ReplayError::Pacing(PacingError::NonPositiveSpeed { index: 0, .. })
        ));
        assert!(sink.steps.is_empty());
    }

    #[test]
    fn test_long_gap_exceeds_wait_limit() {
        let config = ReplayConfig {
            max_wait_ms: 1000,
            ..ReplayConfig::default()
        };
        let (scheduler, _, _) = scheduler_with(config, SpeedOverride::shared());
        let mut sink = MemorySink::new();

        let err = scheduler
            .run(&samples(&[(0, 0, 0), (500, 1, 1), (5000, 2, 2)]), &mut sink)
            .unwrap_err();

        assert!(matches!(
            err,
            ReplayError::Pacing(PacingError::WaitExceeded { index: 2, .. })
        ));
        assert_eq!(sink.steps.len(), 2);
    }

    #[test]
    fn test_cancel_stops_before_next_step() {
        let (scheduler, _, cancel) = default_scheduler();
        cancel.cancel();
        let mut sink = MemorySink::new();

        let summary = scheduler
            .run(&samples(&[(0, 0, 0), (10, 1, 1)]), &mut sink)
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.steps, 0);
        assert!(sink.steps.is_empty());
    }

    #[test]
    fn test_sink_failure_ends_session() {
        let (scheduler, _, _) = default_scheduler();
        let err = scheduler
            .run(&samples(&[(0, 0, 0), (10, 1, 1)]), FailingSink)
            .unwrap_err();
        assert!(matches!(err, ReplayError::Sink(msg) if msg.contains("transport closed")));
    }

    #[test]
    fn test_empty_input_publishes_nothing() {
        let (scheduler, _, _) = default_scheduler();
        let summary = scheduler.run(&[], MemorySink::new()).unwrap();
        assert_eq!(summary.steps, 0);
        assert_eq!(summary.final_pose, Pose::origin());
    }

    #[test]
    fn test_recorded_columns_turn_toward_slower_wheel() {
        // Encoder 1 (right wheel) ran 30 ticks, encoder 2 (left wheel) 10
        let data = dataset::from_str("[[], [0], [30], [10]]", Wheel::Right).unwrap();
        let config = ReplayConfig {
            tick_interpretation: TickInterpretation::PerStep,
            ..ReplayConfig::default()
        };
        let (scheduler, _, _) = scheduler_with(config, SpeedOverride::shared());
        let mut sink = MemorySink::new();

        let summary = scheduler.run(data.samples(), &mut sink).unwrap();

        let geometry = GeometryConfig::default();
        let angle_per_tick = 2.0 * PI / geometry.ticks_per_revolution;
        let expected =
            geometry.wheel_radius / geometry.axle_length * (10.0 - 30.0) * angle_per_tick;
        assert!(sink.steps[0].velocity.dtheta < 0.0);
        assert_relative_eq!(sink.steps[0].velocity.dtheta, expected, epsilon = 1e-12);
        assert_relative_eq!(summary.final_pose.theta, 2.0 * PI + expected, epsilon = 1e-12);
        assert_relative_eq!(summary.final_pose.theta, 5.7715, epsilon = 1e-4);
    }

    #[test]
    fn test_lookahead_wheel_selects_paced_column() {
        // Only the right wheel moves between the two samples
        let data = samples(&[(0, 0, 0), (5000, 0, 100)]);
        let fired_first = |wheel: Wheel| {
            let speed = SpeedOverride::shared();
            speed.publish(circumference()).unwrap();
            let config = ReplayConfig {
                lookahead_wheel: wheel,
                ..ReplayConfig::default()
            };
            let (scheduler, clock, _) = scheduler_with(config, speed);
            let mut sink = TimingSink::new(clock);
            scheduler.run(&data, &mut sink).unwrap();
            sink.fired_ms()[0]
        };

        assert_relative_eq!(fired_first(Wheel::Left), 0.0);
        assert_relative_eq!(fired_first(Wheel::Right), 1000.0, epsilon = 1e-3);
    }

    #[test]
    fn test_min_publish_interval_spaces_equal_timestamps() {
        let config = ReplayConfig {
            min_publish_interval_ms: 10,
            ..ReplayConfig::default()
        };
        let (scheduler, clock, _) = scheduler_with(config, SpeedOverride::shared());
        let mut sink = TimingSink::new(clock);
        let data = samples(&[(0, 0, 0), (0, 1, 1), (0, 2, 2), (50, 3, 3)]);

        scheduler.run(&data, &mut sink).unwrap();

        assert_eq!(
            sink.fired_at,
            [0, 10, 20, 50].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn test_extreme_timestamp_span_fails_without_overflow() {
        let (scheduler, _, _) = default_scheduler();
        let mut sink = MemorySink::new();

        let err = scheduler
            .run(&samples(&[(i64::MIN, 0, 0), (0, 1, 1)]), &mut sink)
            .unwrap_err();

        assert!(matches!(
            err,
            ReplayError::Pacing(PacingError::WaitExceeded { index: 1, .. })
        ));
        assert_eq!(sink.steps.len(), 1);
    }
}
