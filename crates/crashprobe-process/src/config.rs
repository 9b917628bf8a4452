/// Launch configuration: what to run and how long to wait on it.
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How to spawn the target process.
///
/// All timeouts are in milliseconds so the struct round-trips through JSON
/// campaign files unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSpec {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Extra environment variables for the target.
    pub env: BTreeMap<String, String>,
    /// Working directory. None = inherit from the harness.
    pub working_dir: Option<PathBuf>,
    /// How long a fresh start may take to pass the readiness probe.
    pub ready_timeout_ms: u64,
    /// Delay between readiness polls.
    pub poll_interval_ms: u64,
    /// How long a graceful stop may take before escalating to SIGKILL.
    pub stop_timeout_ms: u64,
}

impl Default for LaunchSpec {
    fn default() -> Self {
        Self {
            program: PathBuf::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            ready_timeout_ms: 60_000, // 1 minute
            poll_interval_ms: 100,
            stop_timeout_ms: 30_000,
        }
    }
}

impl LaunchSpec {
    /// Launch `program` with default timeouts and no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Program path rendered for logs and errors.
    pub fn display_program(&self) -> String {
        self.program.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let spec = LaunchSpec::default();
        assert_eq!(spec.ready_timeout(), Duration::from_secs(60));
        assert_eq!(spec.stop_timeout(), Duration::from_secs(30));
        assert_eq!(spec.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let spec = LaunchSpec {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(spec.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_builder() {
        let spec = LaunchSpec::new("/usr/bin/serverd")
            .with_args(["-datadir=/tmp/x", "-txindex=1"])
            .with_env("RUST_LOG", "debug");
        assert_eq!(spec.args.len(), 2);
        assert_eq!(spec.env.get("RUST_LOG").map(String::as_str), Some("debug"));
        assert_eq!(spec.display_program(), "/usr/bin/serverd");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let spec: LaunchSpec =
            serde_json::from_str(r#"{ "program": "/bin/true", "ready_timeout_ms": 500 }"#)
                .unwrap();
        assert_eq!(spec.ready_timeout_ms, 500);
        assert_eq!(spec.stop_timeout_ms, 30_000);
        assert!(spec.args.is_empty());
    }
}
