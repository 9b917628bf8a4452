//! Reproduction capsules: everything needed to replay a corruption finding.

use std::path::Path;

use crashprobe_process::KillSignal;
use crashprobe_trigger::Trigger;
use crashprobe_verify::Expectation;
use serde::{Deserialize, Serialize};

use crate::config::MonitoredOperation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReproductionCapsule {
    /// Campaign that produced the finding.
    pub campaign: String,
    /// RNG seed of the campaign.
    pub seed: u64,
    /// Index of the corrupting iteration.
    pub iteration: u64,
    /// Exact trigger of that iteration.
    pub trigger: Trigger,
    pub operation: MonitoredOperation,
    pub signal: KillSignal,
    /// Expectation the recovered state was checked against.
    pub expected: Expectation,
    /// Verifier's reason for the corruption verdict.
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CapsuleError {
    #[error("capsule I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed capsule: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReproductionCapsule {
    pub fn to_json(&self) -> Result<String, CapsuleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CapsuleError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CapsuleError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?).map_err(|source| CapsuleError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CapsuleError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| CapsuleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capsule() -> ReproductionCapsule {
        ReproductionCapsule {
            campaign: "init-sigkill".to_string(),
            seed: 42,
            iteration: 17,
            trigger: Trigger::EventCount {
                event_name: "LogPrintStr".to_string(),
                threshold: 17,
            },
            operation: MonitoredOperation::Startup,
            signal: KillSignal::Kill,
            expected: Expectation::Any,
            reason: "startup timeout after restart".to_string(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finding.json");

        capsule().save(&path).unwrap();
        assert_eq!(ReproductionCapsule::load(&path).unwrap(), capsule());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finding.json");
        std::fs::write(&path, "{\"campaign\": 3}").unwrap();

        assert!(matches!(
            ReproductionCapsule::load(&path),
            Err(CapsuleError::Json(_))
        ));
        assert!(matches!(
            ReproductionCapsule::load(dir.path().join("missing.json")),
            Err(CapsuleError::Io { .. })
        ));
    }
}
