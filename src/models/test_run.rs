use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
    /// A status string this client does not know; kept verbatim.
    Other(String),
}

impl From<String> for StepStatus {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "pending" | "started" | "running" => StepStatus::Pending,
            "completed" | "done" | "success" => StepStatus::Completed,
            "failed" | "error" => StepStatus::Failed,
            _ => StepStatus::Other(raw),
        }
    }
}

impl From<StepStatus> for String {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::Pending => "pending".to_string(),
            StepStatus::Completed => "completed".to_string(),
            StepStatus::Failed => "failed".to_string(),
            StepStatus::Other(raw) => raw,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Other(raw) => f.write_str(raw),
            other => f.write_str(&String::from(other.clone())),
        }
    }
}

/// One named stage of a diagnostic run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StepEvent {
    pub step: String,
    pub status: StepStatus,
    #[serde(default, with = "super::timestamp::option")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub details: Option<String>,
}

impl StepEvent {
    pub fn new(step: impl Into<String>, status: StepStatus) -> Self {
        Self {
            step: step.into(),
            status,
            timestamp: Some(Utc::now()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// What the run discovered upstream. A skipped download is a normal outcome.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ArtifactSummary {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub caption: String,
    #[serde(default, with = "super::timestamp::option")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub shortcode: Option<String>,
    #[serde(default)]
    pub is_video: Option<bool>,
    #[serde(default)]
    pub download_skipped: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ArtifactSummary {
    /// `Some(reason)` when the download sub-action was skipped.
    pub fn skip_reason(&self) -> Option<&str> {
        if self.download_skipped.unwrap_or(false) {
            Some(self.reason.as_deref().unwrap_or(""))
        } else {
            None
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub configured: Option<bool>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub test_skipped: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    NotConfigured,
    Skipped { reason: Option<String> },
    Attempted { success: bool },
}

impl DeliverySummary {
    pub fn status(&self) -> DeliveryStatus {
        if self.configured == Some(false) || (self.configured.is_none() && self.url.is_empty()) {
            return DeliveryStatus::NotConfigured;
        }
        if self.test_skipped.unwrap_or(false) {
            return DeliveryStatus::Skipped {
                reason: self.reason.clone(),
            };
        }
        match self.success {
            Some(success) => DeliveryStatus::Attempted { success },
            // Configured, but the backend neither attempted nor reported a skip.
            None => DeliveryStatus::Skipped {
                reason: self.reason.clone(),
            },
        }
    }
}

/// Terminal response of `POST /api/test/{id}`: full step history plus outcome.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TestRunPayload {
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub steps: Vec<StepEvent>,
    pub success: bool,
    #[serde(default)]
    pub media_found: Option<ArtifactSummary>,
    #[serde(default)]
    pub webhook_result: Option<DeliverySummary>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub warning: Option<String>,
}

impl TestRunPayload {
    pub fn delivery_status(&self) -> DeliveryStatus {
        self.webhook_result
            .as_ref()
            .map(DeliverySummary::status)
            .unwrap_or(DeliveryStatus::NotConfigured)
    }
}
