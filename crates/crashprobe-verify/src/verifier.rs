//! Post-restart verification.

use std::time::Duration;

use crashprobe_process::{ProcessController, ProcessError, ProcessHandle, TargetEvent};
use serde::{Deserialize, Serialize};

use crate::target::{Consistency, ReadyCheck, StateSnapshot, TargetError, TargetProbe};

/// Reason recorded when the restarted target never became ready.
pub const RESTART_TIMEOUT_REASON: &str = "startup timeout after restart";

/// What the recovered state must look like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Expectation {
    /// State must match exactly.
    Equals(StateSnapshot),
    /// State is a progress counter that must not go backwards past this value.
    AtLeast(u64),
    /// No state check.
    Any,
}

impl Expectation {
    /// Derive an expectation from a baseline snapshot. Counters become
    /// lower bounds, anything else must match verbatim.
    pub fn from_baseline(snapshot: StateSnapshot, monotonic: bool) -> Self {
        match snapshot.as_counter() {
            Some(counter) if monotonic => Expectation::AtLeast(counter),
            _ => Expectation::Equals(snapshot),
        }
    }

    pub fn needs_state(&self) -> bool {
        !matches!(self, Expectation::Any)
    }

    pub fn check(&self, observed: &StateSnapshot) -> Result<(), String> {
        match self {
            Expectation::Equals(expected) if expected == observed => Ok(()),
            Expectation::Equals(expected) => Err(format!(
                "state diverged: expected {expected:?}, observed {observed:?}"
            )),
            Expectation::AtLeast(floor) => match observed.as_counter() {
                Some(value) if value >= *floor => Ok(()),
                Some(value) => Err(format!("state regressed: {value} < {floor}")),
                None => Err(format!("state {observed:?} is not a counter")),
            },
            Expectation::Any => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Clean,
    Corrupted(String),
}

impl Verdict {
    pub fn is_clean(&self) -> bool {
        matches!(self, Verdict::Clean)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Output substrings that mark a corrupted store on restart.
    pub corruption_markers: Vec<String>,
    /// Readiness deadline for the restart after a kill.
    pub restart_timeout_ms: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            corruption_markers: vec![
                "Corrupted block database detected".to_string(),
                "Corrupt data".to_string(),
            ],
            restart_timeout_ms: 60_000,
        }
    }
}

impl VerifyConfig {
    pub fn restart_timeout(&self) -> Duration {
        Duration::from_millis(self.restart_timeout_ms)
    }
}

/// Harness failures during verification. Never evidence of corruption.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("restart failed: {0}")]
    Process(#[from] ProcessError),

    #[error("target query failed: {0}")]
    Target(#[from] TargetError),
}

pub struct RecoveryVerifier {
    config: VerifyConfig,
}

impl RecoveryVerifier {
    pub fn new(config: VerifyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    /// Restart the target and judge the recovered instance.
    ///
    /// Returns the live handle when the restart reached readiness, so the
    /// caller decides when to stop it. Spawn failures and readiness checks
    /// that cannot run are errors; everything the target itself does wrong
    /// is a verdict.
    pub async fn restart_and_verify<P: TargetProbe>(
        &self,
        controller: &mut ProcessController,
        probe: &P,
        expected: &Expectation,
    ) -> Result<(Verdict, Option<ProcessHandle>), VerifyError> {
        let mut output = controller.events().subscribe();
        let started = controller
            .start_within(&ReadyCheck(probe), self.config.restart_timeout())
            .await;

        let mut handle = match started {
            Ok(handle) => handle,
            Err(ProcessError::StartupTimeout(_)) => {
                tracing::warn!("restarted target never became ready");
                let verdict = Verdict::Corrupted(RESTART_TIMEOUT_REASON.to_string());
                return Ok((verdict, None));
            }
            Err(ProcessError::ExitedDuringStartup(status)) => {
                let reason = self
                    .scan_markers(&output.drain())
                    .unwrap_or_else(|| format!("exited during startup validation: {status}"));
                tracing::warn!(%status, "restarted target exited: {reason}");
                return Ok((Verdict::Corrupted(reason), None));
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(line) = self.scan_markers(&output.drain()) {
            tracing::warn!(pid = handle.pid(), "corruption marker in output");
            return Ok((Verdict::Corrupted(line), Some(handle)));
        }

        let verdict = self.verify(&mut handle, probe, expected).await?;
        Ok((verdict, Some(handle)))
    }

    /// Check a ready instance: consistency first, then observable state.
    pub async fn verify<P: TargetProbe>(
        &self,
        handle: &mut ProcessHandle,
        probe: &P,
        expected: &Expectation,
    ) -> Result<Verdict, VerifyError> {
        let pid = handle.pid();

        if let Consistency::Inconsistent(reason) = probe.consistency(pid).await? {
            tracing::warn!(pid, %reason, "consistency check failed");
            return Ok(Verdict::Corrupted(reason));
        }

        if expected.needs_state() {
            let observed = probe.observable_state(pid).await?;
            if let Err(reason) = expected.check(&observed) {
                tracing::warn!(pid, %reason, "recovered state mismatch");
                return Ok(Verdict::Corrupted(reason));
            }
        }

        tracing::debug!(pid, "recovery verified clean");
        Ok(Verdict::Clean)
    }

    fn scan_markers(&self, events: &[TargetEvent]) -> Option<String> {
        events.iter().find_map(|event| {
            self.config
                .corruption_markers
                .iter()
                .any(|marker| !marker.is_empty() && event.line.contains(marker.as_str()))
                .then(|| event.line.clone())
        })
    }
}
