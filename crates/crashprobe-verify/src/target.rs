//! The target as seen from outside: readiness, consistency, observable state.
//!
//! How these are queried (RPC, CLI, files) is the target's business. The
//! harness only needs [`TargetProbe`]. [`CommandProbe`] covers the common case
//! of a CLI client next to the server binary.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use crashprobe_process::{ProcessError, Readiness};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Environment variable carrying the target's pid into probe commands.
pub const PID_ENV: &str = "CRASHPROBE_PID";

#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {detail}")]
    Failed { command: String, detail: String },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("no {0} command configured")]
    NotConfigured(&'static str),
}

/// Externally observable state of the target, e.g. a block height.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateSnapshot(pub String);

impl StateSnapshot {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The snapshot read as a progress counter.
    pub fn as_counter(&self) -> Option<u64> {
        self.0.trim().parse().ok()
    }
}

impl std::fmt::Display for StateSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of the target's own consistency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consistency {
    Consistent,
    Inconsistent(String),
}

/// Queries against a running target.
///
/// Errors mean the query itself could not be made. They are harness
/// failures, never evidence of corruption.
pub trait TargetProbe: Sync {
    fn is_ready(&self, pid: u32) -> impl Future<Output = Result<bool, TargetError>> + Send;

    fn consistency(&self, pid: u32) -> impl Future<Output = Result<Consistency, TargetError>> + Send;

    fn observable_state(
        &self,
        pid: u32,
    ) -> impl Future<Output = Result<StateSnapshot, TargetError>> + Send;

    /// Drive the operation monitored in workload campaigns.
    fn run_workload(&self, pid: u32) -> impl Future<Output = Result<(), TargetError>> + Send;
}

/// Adapts a [`TargetProbe`] to the controller's readiness polling.
pub struct ReadyCheck<'a, P>(pub &'a P);

impl<P: TargetProbe> Readiness for ReadyCheck<'_, P> {
    async fn is_ready(&self, pid: u32) -> Result<bool, ProcessError> {
        self.0
            .is_ready(pid)
            .await
            .map_err(|err| ProcessError::Readiness(err.to_string()))
    }
}

/// Argument vectors for each query. Unset queries fall back to:
/// ready = alive, consistency = consistent, workload = no-op, and state is
/// reported as not configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeCommands {
    pub ready: Option<Vec<String>>,
    pub state: Option<Vec<String>>,
    pub consistency: Option<Vec<String>>,
    pub workload: Option<Vec<String>>,
    /// Per-command timeout. The workload command is not bounded by it.
    pub timeout_ms: u64,
}

impl Default for ProbeCommands {
    fn default() -> Self {
        Self {
            ready: None,
            state: None,
            consistency: None,
            workload: None,
            timeout_ms: 10_000,
        }
    }
}

/// [`TargetProbe`] backed by external commands.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    commands: ProbeCommands,
}

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

impl CommandProbe {
    pub fn new(commands: ProbeCommands) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &ProbeCommands {
        &self.commands
    }

    async fn run(
        &self,
        argv: &[String],
        pid: u32,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, TargetError> {
        let rendered = argv.join(" ");
        let (program, args) = argv.split_first().ok_or_else(|| TargetError::Failed {
            command: rendered.clone(),
            detail: "empty command".to_string(),
        })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .env(PID_ENV, pid.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, command.output())
                .await
                .map_err(|_| TargetError::Timeout {
                    command: rendered.clone(),
                    timeout: limit,
                })?,
            None => command.output().await,
        }
        .map_err(|source| TargetError::Spawn {
            command: rendered.clone(),
            source,
        })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            code: output.status.code(),
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.commands.timeout_ms)
    }
}

impl CommandOutput {
    fn failure_detail(&self) -> String {
        let text = if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        match (text.is_empty(), self.code) {
            (false, _) => text.clone(),
            (true, Some(code)) => format!("exit code {code}"),
            (true, None) => "terminated by signal".to_string(),
        }
    }
}

impl TargetProbe for CommandProbe {
    async fn is_ready(&self, pid: u32) -> Result<bool, TargetError> {
        match &self.commands.ready {
            Some(argv) => Ok(self.run(argv, pid, Some(self.timeout())).await?.success),
            None => Ok(true),
        }
    }

    async fn consistency(&self, pid: u32) -> Result<Consistency, TargetError> {
        let Some(argv) = &self.commands.consistency else {
            return Ok(Consistency::Consistent);
        };
        let output = self.run(argv, pid, Some(self.timeout())).await?;
        if output.success {
            Ok(Consistency::Consistent)
        } else {
            Ok(Consistency::Inconsistent(output.failure_detail()))
        }
    }

    async fn observable_state(&self, pid: u32) -> Result<StateSnapshot, TargetError> {
        let argv = self
            .commands
            .state
            .as_ref()
            .ok_or(TargetError::NotConfigured("state"))?;
        let output = self.run(argv, pid, Some(self.timeout())).await?;
        if output.success {
            Ok(StateSnapshot(output.stdout))
        } else {
            Err(TargetError::Failed {
                command: argv.join(" "),
                detail: output.failure_detail(),
            })
        }
    }

    async fn run_workload(&self, pid: u32) -> Result<(), TargetError> {
        let Some(argv) = &self.commands.workload else {
            return Ok(());
        };
        let output = self.run(argv, pid, None).await?;
        if output.success {
            Ok(())
        } else {
            Err(TargetError::Failed {
                command: argv.join(" "),
                detail: output.failure_detail(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Option<Vec<String>> {
        Some(vec!["/bin/sh".into(), "-c".into(), script.into()])
    }

    #[test]
    fn test_snapshot_counter() {
        assert_eq!(StateSnapshot::new(" 200\n").as_counter(), Some(200));
        assert_eq!(StateSnapshot::new("abc").as_counter(), None);
    }

    #[tokio::test]
    async fn test_unset_commands_use_fallbacks() {
        let probe = CommandProbe::new(ProbeCommands::default());

        assert!(probe.is_ready(1).await.unwrap());
        assert_eq!(probe.consistency(1).await.unwrap(), Consistency::Consistent);
        assert!(probe.run_workload(1).await.is_ok());
        assert!(matches!(
            probe.observable_state(1).await,
            Err(TargetError::NotConfigured("state"))
        ));
    }

    #[tokio::test]
    async fn test_pid_is_exported_to_commands() {
        let probe = CommandProbe::new(ProbeCommands {
            state: sh("echo $CRASHPROBE_PID"),
            ..Default::default()
        });
        let state = probe.observable_state(31337).await.unwrap();
        assert_eq!(state.as_str(), "31337");
    }

    #[tokio::test]
    async fn test_failed_consistency_carries_reason() {
        let probe = CommandProbe::new(ProbeCommands {
            consistency: sh("echo 'Corrupted block database detected' >&2; exit 1"),
            ..Default::default()
        });
        assert_eq!(
            probe.consistency(1).await.unwrap(),
            Consistency::Inconsistent("Corrupted block database detected".to_string())
        );
    }

    #[tokio::test]
    async fn test_ready_follows_exit_code() {
        let probe = CommandProbe::new(ProbeCommands {
            ready: sh("exit 1"),
            ..Default::default()
        });
        assert!(!probe.is_ready(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_harness_error() {
        let probe = CommandProbe::new(ProbeCommands {
            ready: Some(vec!["/nonexistent/probe-cli".into()]),
            ..Default::default()
        });
        assert!(matches!(
            probe.is_ready(1).await,
            Err(TargetError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let probe = CommandProbe::new(ProbeCommands {
            state: sh("exec sleep 5"),
            timeout_ms: 50,
            ..Default::default()
        });
        assert!(matches!(
            probe.observable_state(1).await,
            Err(TargetError::Timeout { .. })
        ));
    }
}
