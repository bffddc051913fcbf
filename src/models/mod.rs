pub mod account;
pub mod log;
pub mod profile;
pub mod stats;
pub mod test_run;
pub mod timestamp;

pub use account::{AccountCreate, AccountUpdate, LinkedAccount, LoginTestResult, SessionStatus};
pub use log::{LogLevel, LogQuery, LogRecord};
pub use profile::{Profile, ProfileCreate, ProfileUpdate};
pub use stats::StatsSnapshot;
pub use test_run::{ArtifactSummary, DeliveryStatus, DeliverySummary, StepEvent, StepStatus, TestRunPayload};

/// Backend-assigned numeric identifier of a resource.
pub type ResourceId = i64;
