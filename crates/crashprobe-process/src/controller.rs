use std::future::Future;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::LaunchSpec;
use crate::events::{forward_lines, EventBus, OutputStream};
use crate::signal::{deliver, Delivery, KillSignal};

/// How long a reaped process's output forwarders get to flush before they are
/// cut off. A grandchild holding the pipe open must not stall the harness.
const OUTPUT_DRAIN: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("target not ready after {0:?}")]
    StartupTimeout(Duration),

    #[error("target exited during startup: {0}")]
    ExitedDuringStartup(ExitStatus),

    #[error("target did not exit within {0:?}")]
    Timeout(Duration),

    #[error("readiness probe failed: {0}")]
    Readiness(String),

    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("signal delivery failed: {0}")]
    Signal(#[from] nix::errno::Errno),
}

impl ProcessError {
    /// Startup failures a fresh restart may clear.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            ProcessError::StartupTimeout(_) | ProcessError::ExitedDuringStartup(_)
        )
    }
}

/// How a target process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    /// Exited with this code.
    Code(i32),
    /// Terminated by this signal number.
    Signal(i32),
    /// Reaped by someone else; the status could not be read.
    Lost,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }

    pub fn signal(&self) -> Option<i32> {
        match self {
            ExitStatus::Signal(sig) => Some(*sig),
            _ => None,
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ExitStatus::Code(code),
            (None, Some(sig)) => ExitStatus::Signal(sig),
            (None, None) => ExitStatus::Lost,
        }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit code {code}"),
            ExitStatus::Signal(sig) => write!(f, "signal {sig}"),
            ExitStatus::Lost => write!(f, "unknown status"),
        }
    }
}

/// Lifecycle status of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Starting,
    Ready,
    Stopping,
    Exited(ExitStatus),
}

/// Readiness check polled while a target starts.
///
/// `Ok(false)` means "not yet"; an `Err` means the check itself could not run
/// and aborts the start.
pub trait Readiness: Sync {
    fn is_ready(&self, pid: u32) -> impl Future<Output = Result<bool, ProcessError>> + Send;
}

/// One spawned target process.
///
/// Handles are never reused: a restart always goes through
/// [`ProcessController::spawn`] again. Dropping a live handle kills the child.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    started_at: Instant,
    status: ProcessStatus,
    child: Child,
    forwarders: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Monotonic instant the process was spawned.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    /// Cached exit status, if the process has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self.status {
            ProcessStatus::Exited(status) => Some(status),
            _ => None,
        }
    }

    /// Reap the process if it has exited, without blocking.
    pub fn try_exited(&mut self) -> Result<Option<ExitStatus>, ProcessError> {
        if let Some(status) = self.exit_status() {
            return Ok(Some(status));
        }
        match self.child.try_wait()? {
            Some(raw) => {
                let status = ExitStatus::from(raw);
                self.status = ProcessStatus::Exited(status);
                tracing::debug!(pid = self.pid, %status, "target exited");
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Wait until the process exits and is reaped. Cancel-safe.
    pub async fn exited(&mut self) -> ExitStatus {
        let status = match self.exit_status() {
            Some(status) => status,
            None => {
                let status = match self.child.wait().await {
                    Ok(raw) => ExitStatus::from(raw),
                    Err(err) => {
                        tracing::warn!(pid = self.pid, "wait failed: {err}");
                        ExitStatus::Lost
                    }
                };
                self.status = ProcessStatus::Exited(status);
                tracing::debug!(pid = self.pid, %status, "target reaped");
                status
            }
        };
        self.drain_output().await;
        status
    }

    async fn drain_output(&mut self) {
        for task in self.forwarders.drain(..) {
            let abort = task.abort_handle();
            if tokio::time::timeout(OUTPUT_DRAIN, task).await.is_err() {
                abort.abort();
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        for task in &self.forwarders {
            task.abort();
        }
    }
}

/// Owns the lifecycle of target processes built from one [`LaunchSpec`].
pub struct ProcessController {
    spec: LaunchSpec,
    bus: EventBus,
    spawned: u64,
}

impl ProcessController {
    pub fn new(spec: LaunchSpec) -> Self {
        Self {
            spec,
            bus: EventBus::new(),
            spawned: 0,
        }
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Output of every process this controller spawns.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Number of processes spawned so far.
    pub fn spawn_count(&self) -> u64 {
        self.spawned
    }

    /// Spawn the target without waiting for readiness.
    pub fn spawn(&mut self) -> Result<ProcessHandle, ProcessError> {
        let program = self.spec.display_program();
        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .envs(&self.spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        let started_at = Instant::now();
        let pid = child.id().ok_or_else(|| ProcessError::Spawn {
            program: program.clone(),
            source: std::io::Error::other("spawned child has no pid"),
        })?;

        let mut forwarders = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(forward_lines(
                stdout,
                pid,
                OutputStream::Stdout,
                self.bus.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(forward_lines(
                stderr,
                pid,
                OutputStream::Stderr,
                self.bus.clone(),
            ));
        }

        self.spawned += 1;
        tracing::info!(pid, %program, generation = self.spawned, "spawned target");

        Ok(ProcessHandle {
            pid,
            started_at,
            status: ProcessStatus::Starting,
            child,
            forwarders,
        })
    }

    /// Poll `readiness` until it passes, the process exits, or `timeout`
    /// elapses. Leaves the process running in every case.
    pub async fn await_ready<R: Readiness>(
        &self,
        handle: &mut ProcessHandle,
        readiness: &R,
        timeout: Duration,
    ) -> Result<(), ProcessError> {
        let poll_interval = self.spec.poll_interval();
        let pid = handle.pid;
        let poll = async {
            loop {
                if let Some(status) = handle.try_exited()? {
                    return Err(ProcessError::ExitedDuringStartup(status));
                }
                if readiness.is_ready(pid).await? {
                    return Ok(());
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(Ok(())) => {
                handle.status = ProcessStatus::Ready;
                tracing::debug!(pid, elapsed = ?handle.started_at.elapsed(), "target ready");
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ProcessError::StartupTimeout(timeout)),
        }
    }

    /// Spawn and wait for readiness within the launch spec's timeout.
    pub async fn start<R: Readiness>(&mut self, readiness: &R) -> Result<ProcessHandle, ProcessError> {
        let timeout = self.spec.ready_timeout();
        self.start_within(readiness, timeout).await
    }

    /// Spawn and wait for readiness. On any failure the process is killed
    /// and reaped before the error is returned.
    pub async fn start_within<R: Readiness>(
        &mut self,
        readiness: &R,
        timeout: Duration,
    ) -> Result<ProcessHandle, ProcessError> {
        let mut handle = self.spawn()?;
        match self.await_ready(&mut handle, readiness, timeout).await {
            Ok(()) => Ok(handle),
            Err(err) => {
                let status = self.stop_forceful(&mut handle).await;
                tracing::warn!(pid = handle.pid, %status, "start failed: {err}");
                Err(err)
            }
        }
    }

    /// Send `signal` without waiting for the process to react.
    ///
    /// Signalling a process that already exited is a no-op that reports
    /// [`Delivery::AlreadyExited`].
    pub fn signal(
        &self,
        handle: &mut ProcessHandle,
        signal: KillSignal,
    ) -> Result<Delivery, ProcessError> {
        if handle.try_exited()?.is_some() {
            return Ok(Delivery::AlreadyExited);
        }
        let delivery = deliver(handle.pid, signal)?;
        if delivery == Delivery::Delivered {
            handle.status = ProcessStatus::Stopping;
            tracing::info!(pid = handle.pid, %signal, "signal delivered");
        }
        Ok(delivery)
    }

    /// Request cooperative shutdown; escalate to SIGKILL after `timeout`.
    pub async fn stop_graceful(&self, handle: &mut ProcessHandle, timeout: Duration) -> ExitStatus {
        if let Some(status) = handle.exit_status() {
            return status;
        }
        if let Err(err) = self.signal(handle, KillSignal::Terminate) {
            tracing::warn!(pid = handle.pid, "SIGTERM failed: {err}");
        }
        match self.wait_exited(handle, timeout).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(
                    pid = handle.pid,
                    ?timeout,
                    "graceful stop timed out, escalating to SIGKILL"
                );
                self.stop_forceful(handle).await
            }
        }
    }

    /// SIGKILL and reap. Idempotent: an exited handle returns its cached
    /// status.
    pub async fn stop_forceful(&self, handle: &mut ProcessHandle) -> ExitStatus {
        if let Some(status) = handle.exit_status() {
            handle.drain_output().await;
            return status;
        }
        if let Err(err) = handle.child.start_kill() {
            // Raced with a natural exit; the wait below collects it.
            tracing::debug!(pid = handle.pid, "SIGKILL not sent: {err}");
        } else {
            handle.status = ProcessStatus::Stopping;
        }
        handle.exited().await
    }

    /// Wait for exit, giving up after `timeout`. The process is left as is on
    /// timeout.
    pub async fn wait_exited(
        &self,
        handle: &mut ProcessHandle,
        timeout: Duration,
    ) -> Result<ExitStatus, ProcessError> {
        tokio::time::timeout(timeout, handle.exited())
            .await
            .map_err(|_| ProcessError::Timeout(timeout))
    }
}
