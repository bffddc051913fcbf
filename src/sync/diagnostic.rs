use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::DashboardError;
use crate::models::{
    ArtifactSummary, DeliveryStatus, DeliverySummary, ResourceId, StepEvent, TestRunPayload,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The backend completed the run and reported failure.
    Reported,
    Network,
    Timeout,
    /// The backend refused to run the test (unknown id, server error...).
    Rejected,
}

impl From<&DashboardError> for FailureKind {
    fn from(err: &DashboardError) -> Self {
        match err {
            DashboardError::Network(_) => FailureKind::Network,
            DashboardError::Timeout(_) => FailureKind::Timeout,
            _ => FailureKind::Rejected,
        }
    }
}

/// Terminal result of a run. Never changes once recorded.
#[derive(Clone, Debug, PartialEq)]
pub struct RunOutcome {
    pub success: bool,
    pub artifact: Option<ArtifactSummary>,
    pub delivery: Option<DeliverySummary>,
    pub error: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub warning: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn delivery_status(&self) -> DeliveryStatus {
        self.delivery
            .as_ref()
            .map(DeliverySummary::status)
            .unwrap_or(DeliveryStatus::NotConfigured)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DiagnosticRun {
    pub run_id: u64,
    pub resource_id: ResourceId,
    /// Display name reported by the backend, empty until the response lands.
    pub label: String,
    pub state: RunState,
    pub steps: Vec<StepEvent>,
    pub outcome: Option<RunOutcome>,
    pub started_at: DateTime<Utc>,
}

/// Proof of ownership of a run. Writes carrying a ticket for a run that has
/// since been dismissed or replaced are dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunTicket {
    pub resource_id: ResourceId,
    pub run_id: u64,
}

/// One outstanding diagnostic run per resource id.
pub struct DiagnosticTracker {
    runs: Mutex<HashMap<ResourceId, DiagnosticRun>>,
    next_run_id: AtomicU64,
    revision: watch::Sender<u64>,
}

impl Default for DiagnosticTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticTracker {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            runs: Mutex::new(HashMap::new()),
            next_run_id: AtomicU64::new(1),
            revision,
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Receiver that changes whenever any run changes.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// `Idle -> Running`. Clears whatever the previous run for this id left
    /// behind. Refused while a run for the same id is still running.
    pub fn begin(&self, resource_id: ResourceId) -> Result<RunTicket, DashboardError> {
        let ticket = {
            let mut runs = self.runs.lock().unwrap();
            if let Some(existing) = runs.get(&resource_id) {
                if existing.state == RunState::Running {
                    return Err(DashboardError::Conflict(format!(
                        "A diagnostic run is already in progress for resource {resource_id}"
                    )));
                }
            }
            let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
            runs.insert(
                resource_id,
                DiagnosticRun {
                    run_id,
                    resource_id,
                    label: String::new(),
                    state: RunState::Running,
                    steps: Vec::new(),
                    outcome: None,
                    started_at: Utc::now(),
                },
            );
            RunTicket {
                resource_id,
                run_id,
            }
        };
        info!(resource_id, run_id = ticket.run_id, "Diagnostic run started.");
        self.bump();
        Ok(ticket)
    }

    /// Runs `update` on the run the ticket owns, if it is still running.
    fn with_active_run<F>(&self, ticket: RunTicket, update: F) -> bool
    where
        F: FnOnce(&mut DiagnosticRun),
    {
        let applied = {
            let mut runs = self.runs.lock().unwrap();
            match runs.get_mut(&ticket.resource_id) {
                Some(run) if run.run_id == ticket.run_id && run.state == RunState::Running => {
                    update(run);
                    true
                }
                Some(run) if run.run_id == ticket.run_id => {
                    warn!(
                        resource_id = ticket.resource_id,
                        run_id = ticket.run_id,
                        state = ?run.state,
                        "Ignoring update for a run that already finished."
                    );
                    false
                }
                _ => {
                    debug!(
                        resource_id = ticket.resource_id,
                        run_id = ticket.run_id,
                        "Ignoring update for a dismissed or replaced run."
                    );
                    false
                }
            }
        };
        if applied {
            self.bump();
        }
        applied
    }

    /// Appends one step as it arrives. Order is arrival order and repeated
    /// step names stay separate entries.
    pub fn append_step(&self, ticket: RunTicket, step: StepEvent) -> bool {
        self.with_active_run(ticket, |run| run.steps.push(step))
    }

    /// `Running -> Succeeded | Failed` from the backend's terminal response.
    ///
    /// The response carries the full step history. Steps already recorded are
    /// kept as they are and only the entries beyond them are appended, so a
    /// terminal response can never shrink the list.
    pub fn complete(&self, ticket: RunTicket, payload: TestRunPayload) -> bool {
        let TestRunPayload {
            profile,
            steps,
            success,
            media_found,
            webhook_result,
            error,
            warning,
        } = payload;

        let applied = self.with_active_run(ticket, |run| {
            let already = run.steps.len();
            run.steps.extend(steps.into_iter().skip(already));
            if !profile.is_empty() {
                run.label = profile;
            }
            run.state = if success {
                RunState::Succeeded
            } else {
                RunState::Failed
            };
            run.outcome = Some(RunOutcome {
                success,
                artifact: media_found,
                delivery: webhook_result,
                error_kind: (!success).then_some(FailureKind::Reported),
                error,
                warning,
                finished_at: Utc::now(),
            });
        });
        if applied {
            info!(
                resource_id = ticket.resource_id,
                run_id = ticket.run_id,
                success,
                "Diagnostic run finished."
            );
        }
        applied
    }

    /// `Running -> Failed` without a terminal response (transport failure,
    /// timeout). Recorded steps are kept.
    pub fn fail(&self, ticket: RunTicket, err: &DashboardError) -> bool {
        let applied = self.with_active_run(ticket, |run| {
            run.state = RunState::Failed;
            run.outcome = Some(RunOutcome {
                success: false,
                artifact: None,
                delivery: None,
                error: Some(err.to_string()),
                error_kind: Some(FailureKind::from(err)),
                warning: None,
                finished_at: Utc::now(),
            });
        });
        if applied {
            warn!(
                resource_id = ticket.resource_id,
                run_id = ticket.run_id,
                error = %err,
                "Diagnostic run failed."
            );
        }
        applied
    }

    /// Back to `Idle`. An in-flight backend request is not cancelled; its
    /// response will simply be ignored.
    pub fn dismiss(&self, resource_id: ResourceId) -> Option<DiagnosticRun> {
        let removed = self.runs.lock().unwrap().remove(&resource_id);
        if removed.is_some() {
            debug!(resource_id, "Diagnostic run dismissed.");
            self.bump();
        }
        removed
    }

    pub fn state(&self, resource_id: ResourceId) -> RunState {
        self.runs
            .lock()
            .unwrap()
            .get(&resource_id)
            .map(|run| run.state)
            .unwrap_or(RunState::Idle)
    }

    pub fn is_running(&self, resource_id: ResourceId) -> bool {
        self.state(resource_id) == RunState::Running
    }

    pub fn snapshot(&self, resource_id: ResourceId) -> Option<DiagnosticRun> {
        self.runs.lock().unwrap().get(&resource_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepStatus;
    use std::time::Duration;

    fn payload(success: bool, steps: Vec<StepEvent>, error: Option<&str>) -> TestRunPayload {
        TestRunPayload {
            profile: "alice".to_string(),
            steps,
            success,
            media_found: None,
            webhook_result: None,
            error: error.map(str::to_string),
            warning: None,
        }
    }

    #[test]
    fn test_failed_run_keeps_steps_in_order() {
        let tracker = DiagnosticTracker::new();
        let ticket = tracker.begin(5).unwrap();
        assert_eq!(tracker.state(5), RunState::Running);

        let steps = vec![
            StepEvent::new("login", StepStatus::Completed),
            StepEvent::new("fetch", StepStatus::Failed),
        ];
        assert!(tracker.complete(ticket, payload(false, steps, Some("401"))));

        let run = tracker.snapshot(5).unwrap();
        assert_eq!(run.state, RunState::Failed);
        let names: Vec<_> = run.steps.iter().map(|s| s.step.as_str()).collect();
        assert_eq!(names, ["login", "fetch"]);
        let outcome = run.outcome.unwrap();
        assert_eq!(outcome.error.as_deref(), Some("401"));
        assert_eq!(outcome.error_kind, Some(FailureKind::Reported));
    }

    #[test]
    fn test_second_start_rejected_without_touching_steps() {
        let tracker = DiagnosticTracker::new();
        let ticket = tracker.begin(9).unwrap();
        tracker.append_step(ticket, StepEvent::new("initialize", StepStatus::Completed));

        let err = tracker.begin(9).unwrap_err();
        assert!(matches!(err, DashboardError::Conflict(_)));

        let run = tracker.snapshot(9).unwrap();
        assert_eq!(run.run_id, ticket.run_id);
        assert_eq!(run.steps.len(), 1);
        // A different resource is independent.
        assert!(tracker.begin(10).is_ok());
    }

    #[test]
    fn test_outcome_is_immutable() {
        let tracker = DiagnosticTracker::new();
        let ticket = tracker.begin(1).unwrap();
        assert!(tracker.complete(ticket, payload(true, vec![], None)));

        assert!(!tracker.complete(ticket, payload(false, vec![], Some("late"))));
        assert!(!tracker.fail(ticket, &DashboardError::Network("late".into())));
        assert!(!tracker.append_step(ticket, StepEvent::new("late", StepStatus::Pending)));

        let run = tracker.snapshot(1).unwrap();
        assert_eq!(run.state, RunState::Succeeded);
        assert!(run.steps.is_empty());
        assert!(run.outcome.unwrap().error.is_none());
    }

    #[test]
    fn test_new_run_replaces_finished_run() {
        let tracker = DiagnosticTracker::new();
        let first = tracker.begin(3).unwrap();
        tracker.complete(
            first,
            payload(false, vec![StepEvent::new("a", StepStatus::Failed)], Some("boom")),
        );

        let second = tracker.begin(3).unwrap();
        assert_ne!(first.run_id, second.run_id);
        let run = tracker.snapshot(3).unwrap();
        assert_eq!(run.state, RunState::Running);
        assert!(run.steps.is_empty());
        assert!(run.outcome.is_none());
    }

    #[test]
    fn test_dismiss_drops_late_response() {
        let tracker = DiagnosticTracker::new();
        let ticket = tracker.begin(4).unwrap();
        assert!(tracker.dismiss(4).is_some());
        assert_eq!(tracker.state(4), RunState::Idle);

        assert!(!tracker.complete(ticket, payload(true, vec![], None)));
        assert_eq!(tracker.state(4), RunState::Idle);
    }

    #[test]
    fn test_incremental_steps_are_not_deduplicated() {
        let tracker = DiagnosticTracker::new();
        let ticket = tracker.begin(2).unwrap();
        tracker.append_step(ticket, StepEvent::new("fetch_profile", StepStatus::Pending));
        tracker.append_step(ticket, StepEvent::new("fetch_profile", StepStatus::Completed));

        // Terminal payload repeats the history and adds one step.
        let full = vec![
            StepEvent::new("fetch_profile", StepStatus::Pending),
            StepEvent::new("fetch_profile", StepStatus::Completed),
            StepEvent::new("check_posts_access", StepStatus::Failed),
        ];
        tracker.complete(ticket, payload(false, full, Some("rate limited")));

        let run = tracker.snapshot(2).unwrap();
        assert_eq!(run.steps.len(), 3);
        assert_eq!(run.steps[0].status, StepStatus::Pending);
        assert_eq!(run.steps[1].status, StepStatus::Completed);
        assert_eq!(run.steps[2].step, "check_posts_access");
    }

    #[test]
    fn test_timeout_failure_kind() {
        let tracker = DiagnosticTracker::new();
        let ticket = tracker.begin(8).unwrap();
        tracker.append_step(ticket, StepEvent::new("initialize", StepStatus::Completed));
        tracker.fail(ticket, &DashboardError::Timeout(Duration::from_secs(120)));

        let run = tracker.snapshot(8).unwrap();
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.outcome.unwrap().error_kind, Some(FailureKind::Timeout));
    }

    #[test]
    fn test_changes_are_signalled() {
        let tracker = DiagnosticTracker::new();
        let rx = tracker.changes();
        let ticket = tracker.begin(6).unwrap();
        tracker.complete(ticket, payload(true, vec![], None));
        assert_eq!(*rx.borrow(), 2);
    }
}
