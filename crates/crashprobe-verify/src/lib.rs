pub mod target;
pub mod verifier;

pub use target::{CommandProbe, Consistency, ProbeCommands, ReadyCheck, StateSnapshot, TargetError, TargetProbe};
pub use verifier::{Expectation, RecoveryVerifier, Verdict, VerifyConfig, VerifyError, RESTART_TIMEOUT_REASON};
