//! Campaign and suite configuration, loaded from JSON.

use std::path::Path;

use crashprobe_process::{KillSignal, LaunchSpec};
use crashprobe_verify::{Expectation, ProbeCommands, VerifyConfig};
use serde::{Deserialize, Serialize};

use crate::limits::ResourceLimits;

/// The phase of the target's life the trigger is aimed at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoredOperation {
    /// From spawn until the readiness probe passes.
    #[default]
    Startup,
    /// From the graceful stop request until the process exits.
    Shutdown,
    /// While the workload command runs against a ready target.
    Workload,
}

impl std::fmt::Display for MonitoredOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MonitoredOperation::Startup => "startup",
            MonitoredOperation::Shutdown => "shutdown",
            MonitoredOperation::Workload => "workload",
        })
    }
}

/// How the kill point is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TriggerMode {
    /// Iteration k kills on the k-th occurrence of `event_name`.
    EventCount { event_name: String },
    /// Calibrate once, then kill at a seeded offset into the window.
    TimeOffset,
}

/// One bounded exploration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSpec {
    pub name: String,
    pub launch: LaunchSpec,
    #[serde(default)]
    pub probes: ProbeCommands,
    pub trigger: TriggerMode,
    #[serde(default)]
    pub operation: MonitoredOperation,
    #[serde(default)]
    pub signal: KillSignal,
    #[serde(default)]
    pub limits: ResourceLimits,
    #[serde(default)]
    pub verify: VerifyConfig,
    /// Recovered-state expectation. Captured from a baseline run when unset.
    #[serde(default)]
    pub expected: Option<Expectation>,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    42
}

impl CampaignSpec {
    pub fn new(name: impl Into<String>, launch: LaunchSpec, trigger: TriggerMode) -> Self {
        Self {
            name: name.into(),
            launch,
            probes: ProbeCommands::default(),
            trigger,
            operation: MonitoredOperation::default(),
            signal: KillSignal::default(),
            limits: ResourceLimits::default(),
            verify: VerifyConfig::default(),
            expected: None,
            seed: default_seed(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(format!("{}: {msg}", self.name)));

        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("campaign name is empty".to_string()));
        }
        if self.launch.program.as_os_str().is_empty() {
            return invalid("launch.program is empty".to_string());
        }
        if self.limits.max_iterations == 0 {
            return invalid("limits.max_iterations must be at least 1".to_string());
        }
        if self.launch.ready_timeout_ms == 0 || self.verify.restart_timeout_ms == 0 {
            return invalid("readiness timeouts must be positive".to_string());
        }
        if let TriggerMode::EventCount { event_name } = &self.trigger {
            if event_name.is_empty() {
                return invalid("trigger.event_name is empty".to_string());
            }
        }
        for (label, command) in [
            ("ready", &self.probes.ready),
            ("state", &self.probes.state),
            ("consistency", &self.probes.consistency),
            ("workload", &self.probes.workload),
        ] {
            if command.as_ref().is_some_and(Vec::is_empty) {
                return invalid(format!("probes.{label} is an empty command"));
            }
        }
        // Without a ready command every poll passes at once: nothing to kill.
        if self.operation == MonitoredOperation::Startup && self.probes.ready.is_none() {
            return invalid("startup operation needs probes.ready".to_string());
        }
        if self.operation == MonitoredOperation::Workload && self.probes.workload.is_none() {
            return invalid("workload operation needs probes.workload".to_string());
        }
        Ok(())
    }
}

/// Campaigns run in order; the suite stops at the first one that does not
/// end exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteSpec {
    pub name: String,
    pub campaigns: Vec<CampaignSpec>,
}

impl SuiteSpec {
    /// Startup with SIGKILL, startup with SIGTERM, then shutdown with
    /// SIGKILL, all counting `event_name`.
    pub fn standard(
        name: impl Into<String>,
        launch: LaunchSpec,
        probes: ProbeCommands,
        event_name: &str,
    ) -> Self {
        let name = name.into();
        let plan = [
            ("init-sigkill", MonitoredOperation::Startup, KillSignal::Kill),
            ("init-sigterm", MonitoredOperation::Startup, KillSignal::Terminate),
            ("shutdown-sigkill", MonitoredOperation::Shutdown, KillSignal::Kill),
        ];
        let campaigns = plan
            .into_iter()
            .map(|(suffix, operation, signal)| CampaignSpec {
                probes: probes.clone(),
                operation,
                signal,
                ..CampaignSpec::new(
                    format!("{name}/{suffix}"),
                    launch.clone(),
                    TriggerMode::EventCount {
                        event_name: event_name.to_string(),
                    },
                )
            })
            .collect();
        Self { name, campaigns }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.campaigns.is_empty() {
            return Err(ConfigError::Invalid(format!("suite {} has no campaigns", self.name)));
        }
        self.campaigns.iter().try_for_each(CampaignSpec::validate)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub fn parse_campaign(json: &str) -> Result<CampaignSpec, ConfigError> {
    let spec: CampaignSpec = serde_json::from_str(json)?;
    spec.validate()?;
    Ok(spec)
}

pub fn load_campaign(path: impl AsRef<Path>) -> Result<CampaignSpec, ConfigError> {
    parse_campaign(&read(path.as_ref())?)
}

pub fn parse_suite(json: &str) -> Result<SuiteSpec, ConfigError> {
    let suite: SuiteSpec = serde_json::from_str(json)?;
    suite.validate()?;
    Ok(suite)
}

pub fn load_suite(path: impl AsRef<Path>) -> Result<SuiteSpec, ConfigError> {
    parse_suite(&read(path.as_ref())?)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "name": "init",
        "launch": { "program": "/usr/local/bin/node", "args": ["-regtest"] },
        "probes": { "ready": ["node-cli", "ping"] },
        "trigger": { "mode": "event_count", "event_name": "LogPrintStr" }
    }"#;

    #[test]
    fn test_minimal_campaign_uses_defaults() {
        let spec = parse_campaign(MINIMAL).unwrap();

        assert_eq!(spec.operation, MonitoredOperation::Startup);
        assert_eq!(spec.signal, KillSignal::Kill);
        assert_eq!(spec.limits.max_iterations, 100);
        assert_eq!(spec.seed, 42);
        assert_eq!(spec.launch.ready_timeout_ms, 60_000);
        assert!(spec.expected.is_none());
    }

    #[test]
    fn test_full_campaign() {
        let json = r#"{
            "name": "flush",
            "launch": { "program": "/bin/sh", "args": ["-c", "exec server"] },
            "probes": { "ready": ["cli", "ping"], "state": ["cli", "height"], "workload": ["cli", "mine"] },
            "trigger": { "mode": "time_offset" },
            "operation": "workload",
            "signal": "terminate",
            "limits": { "max_iterations": 5, "max_wall_secs": 60 },
            "expected": { "kind": "at_least", "value": 200 },
            "seed": 7
        }"#;
        let spec = parse_campaign(json).unwrap();

        assert_eq!(spec.trigger, TriggerMode::TimeOffset);
        assert_eq!(spec.operation, MonitoredOperation::Workload);
        assert_eq!(spec.signal, KillSignal::Terminate);
        assert_eq!(spec.expected, Some(Expectation::AtLeast(200)));
        assert_eq!(spec.probes.timeout_ms, 10_000);
    }

    #[test]
    fn test_rejects_invalid_campaigns() {
        let zero_iterations = MINIMAL.replace(
            r#""name": "init","#,
            r#""name": "init", "limits": { "max_iterations": 0 },"#,
        );
        assert!(matches!(
            parse_campaign(&zero_iterations),
            Err(ConfigError::Invalid(_))
        ));

        let empty_event = MINIMAL.replace("LogPrintStr", "");
        assert!(matches!(parse_campaign(&empty_event), Err(ConfigError::Invalid(_))));

        let workload_without_command = MINIMAL.replace(
            r#""name": "init","#,
            r#""name": "init", "operation": "workload","#,
        );
        assert!(matches!(
            parse_campaign(&workload_without_command),
            Err(ConfigError::Invalid(_))
        ));

        assert!(matches!(parse_campaign("not json"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_startup_campaign_needs_ready_command() {
        let mut spec = parse_campaign(MINIMAL).unwrap();
        spec.probes.ready = None;
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("probes.ready"), "{err}");

        // Shutdown campaigns fall back to "alive means ready".
        spec.operation = MonitoredOperation::Shutdown;
        spec.validate().unwrap();

        let time_offset = MINIMAL
            .replace(r#""probes": { "ready": ["node-cli", "ping"] },"#, "")
            .replace(
                r#"{ "mode": "event_count", "event_name": "LogPrintStr" }"#,
                r#"{ "mode": "time_offset" }"#,
            );
        assert!(matches!(parse_campaign(&time_offset), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_standard_suite_order() {
        let suite = SuiteSpec::standard(
            "node",
            LaunchSpec::new("/usr/local/bin/node"),
            ProbeCommands {
                ready: Some(vec!["node-cli".to_string(), "ping".to_string()]),
                ..ProbeCommands::default()
            },
            "LogPrintStr",
        );
        suite.validate().unwrap();

        let plan: Vec<_> = suite
            .campaigns
            .iter()
            .map(|c| (c.operation, c.signal))
            .collect();
        assert_eq!(
            plan,
            vec![
                (MonitoredOperation::Startup, KillSignal::Kill),
                (MonitoredOperation::Startup, KillSignal::Terminate),
                (MonitoredOperation::Shutdown, KillSignal::Kill),
            ]
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_campaign("/nonexistent/campaign.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_empty_suite_rejected() {
        let err = parse_suite(r#"{"name": "empty", "campaigns": []}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
