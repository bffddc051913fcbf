pub mod cache;
pub mod diagnostic;
pub mod mutation;
pub mod runner;
pub mod store;

pub use cache::{CacheState, CacheView, ResourceCache};
pub use diagnostic::{DiagnosticRun, DiagnosticTracker, FailureKind, RunOutcome, RunState, RunTicket};
pub use mutation::{ActionKey, Mutation, MutationCoordinator, MutationKind, MutationOutcome, MutationStatus};
pub use runner::DiagnosticRunner;
pub use store::{CacheKey, DashboardStore};
