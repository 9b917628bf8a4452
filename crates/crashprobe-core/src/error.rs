use crashprobe_process::{ExitStatus, ProcessError};
use crashprobe_trigger::{ProbeError, TriggerError};
use crashprobe_verify::{TargetError, VerifyError};

use crate::config::ConfigError;

/// Failures of the harness itself. A corrupted target is a campaign result,
/// never one of these.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("process control failed: {0}")]
    Process(#[from] ProcessError),

    #[error("failed to arm probe: {0}")]
    Arm(#[from] ProbeError),

    #[error("trigger error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("target query failed: {0}")]
    Target(#[from] TargetError),

    #[error("verification could not run: {0}")]
    Verify(#[from] VerifyError),

    #[error("target failed to start after {attempts} attempts: {last}")]
    StartupFailure {
        attempts: u32,
        #[source]
        last: ProcessError,
    },

    #[error("target unhealthy before any kill: {0}")]
    UnhealthyBaseline(String),

    #[error("target exited on its own during the workload: {0}")]
    ExitedDuringWorkload(ExitStatus),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("capsule does not match campaign: {0}")]
    CapsuleMismatch(String),
}
