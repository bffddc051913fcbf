use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ResourceId;

/// A linked login account the scraper authenticates with.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LinkedAccount {
    pub id: ResourceId,
    pub username: String,
    pub is_active: bool,
    #[serde(default, with = "super::timestamp::option")]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(with = "super::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "super::timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub has_valid_session: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountCreate {
    pub username: String,
    pub password: String,
}

impl AccountCreate {
    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LoginTestResult {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub has_valid_session: bool,
}

/// Scraper session diagnostics from `/api/session-status`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStatus {
    #[serde(default)]
    pub is_logged_in: bool,
    #[serde(default)]
    pub context_username: Option<String>,
    #[serde(default)]
    pub test_login_result: Option<String>,
    #[serde(default)]
    pub test_login_error: Option<String>,
    #[serde(default)]
    pub has_valid_session: bool,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub cookies_present: Vec<String>,
    #[serde(default)]
    pub session_dir: Option<String>,
    #[serde(default)]
    pub cookies_count: usize,
}
