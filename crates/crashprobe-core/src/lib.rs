pub mod analytics;
pub mod campaign;
pub mod capsule;
pub mod config;
pub mod error;
pub mod iteration;
pub mod limits;
pub mod logging;
pub mod report;

pub use campaign::{run_suite, CampaignDriver, CampaignResult, CampaignState, CancelFlag, SuiteResult};
pub use capsule::ReproductionCapsule;
pub use config::{CampaignSpec, MonitoredOperation, SuiteSpec, TriggerMode};
pub use error::HarnessError;
pub use iteration::{Iteration, Outcome};
pub use report::{format_report, format_suite_report};
