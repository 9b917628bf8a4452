//! Campaign bounds.
//!
//! When a limit is hit the campaign ends `Exhausted` with the iterations run
//! so far rather than failing.

use serde::{Deserialize, Serialize};

/// Resource limits for a single campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum iterations before the campaign counts as exhausted.
    pub max_iterations: u64,
    /// Maximum wall-clock seconds, checked between iterations.
    pub max_wall_secs: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_wall_secs: 6 * 60 * 60, // 6 hours
        }
    }
}

/// Reason a campaign stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Iteration limit reached.
    IterationLimitExceeded,
    /// Wall-clock limit reached.
    WallTimeExceeded,
    /// The event-count threshold outgrew the operation: nothing left to kill.
    TargetFinishedNaturally,
    /// A recovery check failed.
    CorruptionFound,
    /// Cancelled between iterations.
    UserAborted,
    /// A single replayed iteration finished.
    ReplayComplete,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StopReason::IterationLimitExceeded => "iteration limit reached",
            StopReason::WallTimeExceeded => "wall-clock limit reached",
            StopReason::TargetFinishedNaturally => "operation completed before the trigger",
            StopReason::CorruptionFound => "corruption found",
            StopReason::UserAborted => "aborted by operator",
            StopReason::ReplayComplete => "replay complete",
        };
        f.write_str(text)
    }
}

/// Check campaign progress against limits.
pub struct ResourceChecker {
    limits: ResourceLimits,
    start_time: std::time::Instant,
}

impl ResourceChecker {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: std::time::Instant::now(),
        }
    }

    /// None while another iteration may run.
    pub fn check(&self, iterations: u64) -> Option<StopReason> {
        if iterations >= self.limits.max_iterations {
            return Some(StopReason::IterationLimitExceeded);
        }
        if self.wall_time_exceeded() {
            return Some(StopReason::WallTimeExceeded);
        }
        None
    }

    pub fn wall_time_exceeded(&self) -> bool {
        self.start_time.elapsed().as_secs() >= self.limits.max_wall_secs
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.max_iterations, 100);
        assert_eq!(limits.max_wall_secs, 21_600);
    }

    #[test]
    fn test_checker_all_ok() {
        let checker = ResourceChecker::new(ResourceLimits {
            max_iterations: 10,
            max_wall_secs: 60,
        });
        assert!(checker.check(9).is_none());
    }

    #[test]
    fn test_iteration_limit() {
        let checker = ResourceChecker::new(ResourceLimits {
            max_iterations: 10,
            ..Default::default()
        });
        assert_eq!(checker.check(10), Some(StopReason::IterationLimitExceeded));
    }

    #[test]
    fn test_zero_wall_time_stops_immediately() {
        let checker = ResourceChecker::new(ResourceLimits {
            max_wall_secs: 0,
            ..Default::default()
        });
        assert!(checker.wall_time_exceeded());
        assert_eq!(checker.check(0), Some(StopReason::WallTimeExceeded));
    }

    #[test]
    fn test_partial_limits_from_json() {
        let limits: ResourceLimits = serde_json::from_str(r#"{"max_iterations": 3}"#).unwrap();
        assert_eq!(limits.max_iterations, 3);
        assert_eq!(limits.max_wall_secs, ResourceLimits::default().max_wall_secs);
    }
}
