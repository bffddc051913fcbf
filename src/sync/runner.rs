use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::diagnostic::{DiagnosticRun, DiagnosticTracker, RunTicket};
use crate::config::DashboardConfig;
use crate::error::DashboardError;
use crate::gateway::DashboardApi;
use crate::models::ResourceId;

/// Drives diagnostic runs: one backend call per run, bounded by `timeout`,
/// with the result fed into the shared tracker.
#[derive(Clone)]
pub struct DiagnosticRunner {
    api: Arc<dyn DashboardApi>,
    tracker: Arc<DiagnosticTracker>,
    timeout: Duration,
}

impl DiagnosticRunner {
    pub fn new(
        api: Arc<dyn DashboardApi>,
        tracker: Arc<DiagnosticTracker>,
        timeout: Duration,
    ) -> Self {
        Self {
            api,
            tracker,
            timeout,
        }
    }

    pub fn from_config(
        api: Arc<dyn DashboardApi>,
        tracker: Arc<DiagnosticTracker>,
        config: &DashboardConfig,
    ) -> Self {
        Self::new(api, tracker, config.diagnostic_timeout())
    }

    pub fn tracker(&self) -> &Arc<DiagnosticTracker> {
        &self.tracker
    }

    /// Starts a run in the background. Refused with `Conflict` while a run
    /// for the same id is still running. The returned handle resolves once the
    /// run reaches a terminal state or was dismissed.
    pub fn start(&self, resource_id: ResourceId) -> Result<JoinHandle<()>, DashboardError> {
        self.launch(resource_id).map(|(_, handle)| handle)
    }

    fn launch(
        &self,
        resource_id: ResourceId,
    ) -> Result<(RunTicket, JoinHandle<()>), DashboardError> {
        let ticket = self.tracker.begin(resource_id)?;
        let runner = self.clone();
        let handle = tokio::spawn(async move { runner.drive(ticket).await });
        Ok((ticket, handle))
    }

    /// Starts a run and waits for it. Returns the final snapshot, or `None`
    /// if the run was dismissed while in flight.
    ///
    /// The run itself lives in its own task: dropping this future stops the
    /// waiting, not the run, which still ends within `timeout`.
    pub async fn run(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<DiagnosticRun>, DashboardError> {
        let (ticket, handle) = self.launch(resource_id)?;
        if let Err(e) = handle.await {
            warn!(resource_id, error = %e, "Diagnostic run task did not finish.");
        }
        Ok(self
            .tracker
            .snapshot(resource_id)
            .filter(|run| run.run_id == ticket.run_id))
    }

    async fn drive(&self, ticket: RunTicket) {
        debug!(
            resource_id = ticket.resource_id,
            timeout = ?self.timeout,
            "Waiting for diagnostic result."
        );
        match timeout(self.timeout, self.api.test_profile(ticket.resource_id)).await {
            Ok(Ok(payload)) => {
                self.tracker.complete(ticket, payload);
            }
            Ok(Err(err)) => {
                self.tracker.fail(ticket, &err);
            }
            Err(_) => {
                self.tracker
                    .fail(ticket, &DashboardError::Timeout(self.timeout));
            }
        }
    }
}
