//! Randomized kill points along a measured timeline.
//!
//! Measure-then-replay:
//! 1. Calibrate: run the operation once uninterrupted and record its window.
//! 2. Sample: draw an offset uniformly from `[0, window)` per iteration.
//! 3. Replay: start the operation and arm an [`Alarm`] at `start + offset`.
//!
//! Uniform sampling over many iterations approximates coverage of the whole
//! window. It does not guarantee every reachable state is hit.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, Sleep};

use crate::rng::iteration_rng;
use crate::{saturating_nanos, Trigger, TriggerError};

/// Measured duration of one uninterrupted run of the monitored operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    window_ns: u64,
}

impl Calibration {
    /// A zero window would make every offset degenerate.
    pub fn new(window: Duration) -> Result<Self, TriggerError> {
        let window_ns = saturating_nanos(window);
        if window_ns == 0 {
            return Err(TriggerError::InvalidCalibration(
                "measured window is zero".to_string(),
            ));
        }
        Ok(Self { window_ns })
    }

    /// Window between two monotonic instants. `end` before `start` is a
    /// clock anomaly and is rejected.
    pub fn measure(start: Instant, end: Instant) -> Result<Self, TriggerError> {
        let window = end.checked_duration_since(start).ok_or_else(|| {
            TriggerError::InvalidCalibration("operation ended before it started".to_string())
        })?;
        Self::new(window)
    }

    /// Window from a signed nanosecond measurement taken elsewhere.
    pub fn from_nanos(window_ns: i128) -> Result<Self, TriggerError> {
        if window_ns <= 0 {
            return Err(TriggerError::InvalidCalibration(format!(
                "measured window is {window_ns}ns"
            )));
        }
        let window_ns = u64::try_from(window_ns).unwrap_or(u64::MAX);
        Ok(Self { window_ns })
    }

    pub fn window(&self) -> Duration {
        Duration::from_nanos(self.window_ns)
    }

    pub fn window_ns(&self) -> u64 {
        self.window_ns
    }
}

/// Where per-iteration offsets come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OffsetSampler {
    /// Uniform over `[0, window)`, seeded per iteration.
    Seeded { seed: u64 },
    /// The same offset every time. Used to replay a finding.
    Fixed { offset_ns: u64 },
}

impl OffsetSampler {
    pub fn sample(&self, calibration: &Calibration, iteration: u64) -> Result<Duration, TriggerError> {
        match self {
            OffsetSampler::Seeded { seed } => {
                let mut rng = iteration_rng(*seed, iteration);
                let offset_ns = rng.gen_range(0..calibration.window_ns);
                Ok(Duration::from_nanos(offset_ns))
            }
            OffsetSampler::Fixed { offset_ns } => {
                if *offset_ns > calibration.window_ns {
                    return Err(TriggerError::OffsetOutOfWindow {
                        offset_ns: *offset_ns,
                        window_ns: calibration.window_ns,
                    });
                }
                Ok(Duration::from_nanos(*offset_ns))
            }
        }
    }

    /// Sample and wrap the result as a [`Trigger`].
    pub fn trigger(&self, calibration: &Calibration, iteration: u64) -> Result<Trigger, TriggerError> {
        let offset = self.sample(calibration, iteration)?;
        Trigger::time_offset(calibration.window(), offset)
    }
}

/// One-shot timer at `origin + offset`.
///
/// Completes with the instant it was observed to elapse. Dropping it cancels
/// the wait; there is no polling loop and no fixed granularity.
#[derive(Debug)]
pub struct Alarm {
    origin: Instant,
    offset: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl Alarm {
    pub fn arm(origin: Instant, offset: Duration) -> Self {
        Self {
            origin,
            offset,
            sleep: Box::pin(tokio::time::sleep_until(origin + offset)),
        }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    pub fn offset(&self) -> Duration {
        self.offset
    }

    pub fn deadline(&self) -> Instant {
        self.origin + self.offset
    }

    pub fn is_elapsed(&self) -> bool {
        self.sleep.is_elapsed()
    }
}

impl Future for Alarm {
    type Output = Instant;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.sleep.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(Instant::now()),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_window_rejected() {
        assert!(matches!(
            Calibration::new(Duration::ZERO),
            Err(TriggerError::InvalidCalibration(_))
        ));
        assert!(matches!(
            Calibration::from_nanos(-5),
            Err(TriggerError::InvalidCalibration(_))
        ));
        assert!(matches!(
            Calibration::from_nanos(0),
            Err(TriggerError::InvalidCalibration(_))
        ));
    }

    #[test]
    fn test_measure_rejects_reversed_instants() {
        let start = Instant::now();
        let end = start + Duration::from_millis(5);

        assert_eq!(
            Calibration::measure(start, end).unwrap().window(),
            Duration::from_millis(5)
        );
        assert!(Calibration::measure(end, start).is_err());
    }

    #[test]
    fn test_seeded_offsets_stay_inside_window() {
        let calibration = Calibration::new(Duration::from_millis(750)).unwrap();
        let sampler = OffsetSampler::Seeded { seed: 7 };

        for iteration in 1..=2_000 {
            let offset = sampler.sample(&calibration, iteration).unwrap();
            assert!(offset < calibration.window(), "iteration {iteration}: {offset:?}");
        }
    }

    #[test]
    fn test_seeded_offsets_are_reproducible() {
        let calibration = Calibration::new(Duration::from_secs(10)).unwrap();
        let sampler = OffsetSampler::Seeded { seed: 42 };

        let first: Vec<_> = (1..=5).map(|i| sampler.sample(&calibration, i).unwrap()).collect();
        let again: Vec<_> = (1..=5).map(|i| sampler.sample(&calibration, i).unwrap()).collect();
        assert_eq!(first, again);

        let distinct: std::collections::HashSet<_> = first.iter().collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn test_one_nanosecond_window_always_samples_zero() {
        let calibration = Calibration::from_nanos(1).unwrap();
        let sampler = OffsetSampler::Seeded { seed: 1 };
        for iteration in 1..=10 {
            assert_eq!(sampler.sample(&calibration, iteration).unwrap(), Duration::ZERO);
        }
    }

    #[test]
    fn test_fixed_offset_validated_against_window() {
        let calibration = Calibration::new(Duration::from_secs(10)).unwrap();

        let fixed = OffsetSampler::Fixed {
            offset_ns: 3_000_000_000,
        };
        let trigger = fixed.trigger(&calibration, 99).unwrap();
        assert_eq!(
            trigger,
            Trigger::TimeOffset {
                window_ns: 10_000_000_000,
                offset_ns: 3_000_000_000
            }
        );

        let too_late = OffsetSampler::Fixed {
            offset_ns: 11_000_000_000,
        };
        assert!(matches!(
            too_late.sample(&calibration, 1),
            Err(TriggerError::OffsetOutOfWindow { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_fires_at_offset() {
        let origin = Instant::now();
        let alarm = Alarm::arm(origin, Duration::from_secs(3));
        assert_eq!(alarm.deadline(), origin + Duration::from_secs(3));

        let fired_at = alarm.await;
        assert_eq!(fired_at.duration_since(origin), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_loses_race_to_earlier_completion() {
        let origin = Instant::now();
        let mut alarm = Alarm::arm(origin, Duration::from_secs(3));

        let fired = tokio::select! {
            biased;
            _ = &mut alarm => true,
            _ = tokio::time::sleep(Duration::from_secs(1)) => false,
        };
        assert!(!fired);
        assert!(!alarm.is_elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_uses_operation_origin() {
        // Armed late: only the remaining part of the offset is waited.
        let origin = Instant::now();
        tokio::time::advance(Duration::from_secs(2)).await;

        let alarm = Alarm::arm(origin, Duration::from_secs(3));
        let fired_at = alarm.await;
        assert_eq!(fired_at.duration_since(origin), Duration::from_secs(3));
    }
}
