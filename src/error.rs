use std::time::Duration;
use thiserror::Error;

/// Every failure the status pipeline can surface. None of them is fatal to the
/// process; callers retry by re-triggering the action or waiting for the next
/// scheduled refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DashboardError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Rejected by server ({status}): {detail}")]
    Validation { status: u16, detail: String },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Server error ({status}): {detail}")]
    Server { status: u16, detail: String },
}

impl DashboardError {
    /// Text suitable for showing next to the action that failed. Uses the
    /// server-provided detail when there is one.
    pub fn user_message(&self) -> String {
        match self {
            DashboardError::Validation { detail, .. } | DashboardError::Server { detail, .. }
                if !detail.is_empty() =>
            {
                detail.clone()
            }
            DashboardError::Conflict(msg) if !msg.is_empty() => msg.clone(),
            DashboardError::Validation { .. } => "The request was rejected".to_string(),
            DashboardError::Server { .. } => "The server failed to handle the request".to_string(),
            DashboardError::Conflict(_) => "Another request is already in progress".to_string(),
            DashboardError::Network(_) => "Could not reach the server".to_string(),
            DashboardError::Decode(_) => "Received an unreadable response".to_string(),
            DashboardError::Timeout(_) => "The request timed out".to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DashboardError::Timeout(_))
    }
}

impl From<serde_json::Error> for DashboardError {
    fn from(err: serde_json::Error) -> Self {
        DashboardError::Decode(err.to_string())
    }
}
