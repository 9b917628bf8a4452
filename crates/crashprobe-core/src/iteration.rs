//! Per-iteration records.

use std::time::{SystemTime, UNIX_EPOCH};

use crashprobe_process::ExitStatus;
use crashprobe_trigger::Trigger;
use serde::{Deserialize, Serialize};

/// How one iteration ended. Exactly one per iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The kill landed before the operation completed.
    Aborted,
    /// The operation completed before the trigger fired.
    FinishedNaturally,
    /// Verification after the restart failed.
    Corrupted { reason: String },
}

impl Outcome {
    pub fn is_corrupted(&self) -> bool {
        matches!(self, Outcome::Corrupted { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Aborted => "aborted",
            Outcome::FinishedNaturally => "finished naturally",
            Outcome::Corrupted { .. } => "corrupted",
        }
    }
}

/// One start, kill, restart, verify cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iteration {
    /// 1-based, increasing within a campaign.
    pub index: u64,
    pub trigger: Trigger,
    pub outcome: Outcome,
    /// UNIX-epoch nanoseconds.
    pub armed_at_ns: u64,
    pub fired_at_ns: Option<u64>,
    pub restarted_at_ns: Option<u64>,
    /// How the killed (or naturally stopped) process ended.
    pub exit: Option<ExitStatus>,
    /// Events counted by the probe before it was disarmed.
    pub events_observed: Option<u64>,
}

/// Wall-clock time as UNIX-epoch nanoseconds. Clamps to 0 on a clock set
/// before 1970.
pub fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_json_shape() {
        let corrupted = Outcome::Corrupted {
            reason: "startup timeout after restart".to_string(),
        };
        let json = serde_json::to_value(&corrupted).unwrap();
        assert_eq!(json["outcome"], "corrupted");
        assert_eq!(json["reason"], "startup timeout after restart");

        let aborted: Outcome = serde_json::from_str(r#"{"outcome":"aborted"}"#).unwrap();
        assert_eq!(aborted, Outcome::Aborted);
    }

    #[test]
    fn test_unix_nanos_is_recent() {
        // 2020-01-01 in nanoseconds.
        assert!(unix_nanos() > 1_577_836_800_000_000_000);
    }
}
