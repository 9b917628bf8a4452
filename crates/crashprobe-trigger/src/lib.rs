//! Kill triggers: when, during a monitored operation, the target dies.
//!
//! Two mechanisms share one [`Trigger`] description so the campaign driver
//! does not care which one it is running:
//! - [`event_count`]: fire on the N-th occurrence of a named event.
//! - [`time_offset`]: fire a sampled delay after the operation starts.

pub mod event_count;
pub mod rng;
pub mod time_offset;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use event_count::{ArmedProbe, CountingProbe, EventCounter, FireCallback, LogEventProbe, ProbeError};
pub use time_offset::{Alarm, Calibration, OffsetSampler};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("offset {offset_ns}ns lies outside the {window_ns}ns window")]
    OffsetOutOfWindow { offset_ns: u64, window_ns: u64 },

    #[error("event-count threshold must be at least 1")]
    ZeroThreshold,
}

/// The parameter that decides the instant a kill is delivered.
///
/// Serialized as part of iteration records and reproduction capsules, so a
/// finding can be replayed with exactly the same trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Fire on the `threshold`-th occurrence of `event_name` since arming.
    EventCount { event_name: String, threshold: u64 },
    /// Fire `offset_ns` after the operation's start. `offset_ns <= window_ns`.
    TimeOffset { window_ns: u64, offset_ns: u64 },
}

impl Trigger {
    pub fn event_count(event_name: impl Into<String>, threshold: u64) -> Result<Self, TriggerError> {
        if threshold == 0 {
            return Err(TriggerError::ZeroThreshold);
        }
        Ok(Trigger::EventCount {
            event_name: event_name.into(),
            threshold,
        })
    }

    pub fn time_offset(window: Duration, offset: Duration) -> Result<Self, TriggerError> {
        let window_ns = saturating_nanos(window);
        let offset_ns = saturating_nanos(offset);
        if offset_ns > window_ns {
            return Err(TriggerError::OffsetOutOfWindow {
                offset_ns,
                window_ns,
            });
        }
        Ok(Trigger::TimeOffset {
            window_ns,
            offset_ns,
        })
    }

    pub fn is_event_count(&self) -> bool {
        matches!(self, Trigger::EventCount { .. })
    }

    /// Threshold of an event-count trigger.
    pub fn threshold(&self) -> Option<u64> {
        match self {
            Trigger::EventCount { threshold, .. } => Some(*threshold),
            Trigger::TimeOffset { .. } => None,
        }
    }

    /// Delay of a time-offset trigger.
    pub fn offset(&self) -> Option<Duration> {
        match self {
            Trigger::TimeOffset { offset_ns, .. } => Some(Duration::from_nanos(*offset_ns)),
            Trigger::EventCount { .. } => None,
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::EventCount {
                event_name,
                threshold,
            } => write!(f, "after occurrence #{threshold} of '{event_name}'"),
            Trigger::TimeOffset {
                window_ns,
                offset_ns,
            } => write!(
                f,
                "after {:.3}s of a {:.3}s window",
                *offset_ns as f64 / 1e9,
                *window_ns as f64 / 1e9
            ),
        }
    }
}

/// Nanoseconds of `d`, saturating at `u64::MAX` (about 584 years).
pub(crate) fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_count_rejects_zero() {
        assert_eq!(
            Trigger::event_count("LogPrintStr", 0),
            Err(TriggerError::ZeroThreshold)
        );
        assert_eq!(
            Trigger::event_count("LogPrintStr", 3).unwrap().threshold(),
            Some(3)
        );
    }

    #[test]
    fn test_time_offset_bounds() {
        let window = Duration::from_secs(10);
        assert!(Trigger::time_offset(window, Duration::ZERO).is_ok());
        assert!(Trigger::time_offset(window, window).is_ok());
        assert!(matches!(
            Trigger::time_offset(window, Duration::from_secs(11)),
            Err(TriggerError::OffsetOutOfWindow { .. })
        ));
    }

    #[test]
    fn test_serde_tagging() {
        let trigger = Trigger::time_offset(Duration::from_secs(10), Duration::from_secs(3)).unwrap();
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["kind"], "time_offset");
        assert_eq!(json["offset_ns"], 3_000_000_000u64);

        let back: Trigger = serde_json::from_value(json).unwrap();
        assert_eq!(back.offset(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_display() {
        let trigger = Trigger::event_count("init", 7).unwrap();
        assert_eq!(trigger.to_string(), "after occurrence #7 of 'init'");
    }
}
