pub mod config;
pub mod controller;
pub mod events;
pub mod signal;

pub use config::LaunchSpec;
pub use controller::{
    ExitStatus, ProcessController, ProcessError, ProcessHandle, ProcessStatus, Readiness,
};
pub use events::{EventBus, EventSubscription, OutputStream, TargetEvent};
pub use signal::{Delivery, KillSignal};
