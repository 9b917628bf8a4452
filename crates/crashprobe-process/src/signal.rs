//! Kill signals and their delivery.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

/// Signal used to kill the target, ordered by increasing severity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum KillSignal {
    /// SIGTERM: the target may run its shutdown path.
    Terminate,
    /// SIGKILL: no cleanup possible.
    #[default]
    Kill,
}

impl KillSignal {
    fn as_nix(self) -> Signal {
        match self {
            KillSignal::Terminate => Signal::SIGTERM,
            KillSignal::Kill => Signal::SIGKILL,
        }
    }
}

impl std::fmt::Display for KillSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillSignal::Terminate => write!(f, "SIGTERM"),
            KillSignal::Kill => write!(f, "SIGKILL"),
        }
    }
}

/// What happened when a signal was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The kernel accepted the signal for a live process.
    Delivered,
    /// The process was already gone. Not an error.
    AlreadyExited,
}

/// Send `signal` to `pid`. A missing process (ESRCH) is reported as
/// `AlreadyExited`.
pub(crate) fn deliver(pid: u32, signal: KillSignal) -> Result<Delivery, Errno> {
    let raw = i32::try_from(pid).map_err(|_| Errno::EINVAL)?;
    match kill(Pid::from_raw(raw), signal.as_nix()) {
        Ok(()) => Ok(Delivery::Delivered),
        Err(Errno::ESRCH) => Ok(Delivery::AlreadyExited),
        Err(errno) => Err(errno),
    }
}
