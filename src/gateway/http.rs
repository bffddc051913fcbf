use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::DashboardApi;
use crate::config::DashboardConfig;
use crate::error::DashboardError;
use crate::models::{
    AccountCreate, AccountUpdate, LinkedAccount, LogQuery, LogRecord, LoginTestResult, Profile,
    ProfileCreate, ProfileUpdate, ResourceId, SessionStatus, StatsSnapshot, TestRunPayload,
};

const MAX_ERROR_BODY_CHARS: usize = 300;

/// `DashboardApi` over HTTP with JSON bodies.
#[derive(Clone, Debug)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpGateway {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, DashboardError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(format!("watchdesk/{}", crate::version::VERSION))
            .build()
            .map_err(|e| DashboardError::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn from_config(config: &DashboardConfig) -> Result<Self, DashboardError> {
        Self::new(&config.api_base_url, config.request_timeout())
    }

    /// Same gateway with a different per-request timeout. The diagnostic test
    /// runs much longer than ordinary CRUD calls.
    pub fn with_timeout(&self, request_timeout: Duration) -> Result<Self, DashboardError> {
        Self::new(&self.base_url, request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_error(&self, err: reqwest::Error) -> DashboardError {
        if err.is_timeout() {
            DashboardError::Timeout(self.request_timeout)
        } else if err.is_decode() {
            DashboardError::Decode(err.to_string())
        } else {
            DashboardError::Network(err.to_string())
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, DashboardError> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = extract_error_detail(&body);
        warn!(status = %status, detail = %detail, "Backend rejected request.");
        Err(classify_status(status, detail))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, DashboardError> {
        let response = self.execute(request).await?;
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_slice(&bytes).map_err(DashboardError::from)
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<(), DashboardError> {
        self.execute(request).await.map(|_| ())
    }
}

fn classify_status(status: StatusCode, detail: String) -> DashboardError {
    if status == StatusCode::CONFLICT {
        DashboardError::Conflict(detail)
    } else if status.is_client_error() {
        DashboardError::Validation {
            status: status.as_u16(),
            detail,
        }
    } else {
        DashboardError::Server {
            status: status.as_u16(),
            detail,
        }
    }
}

/// Pulls the human-readable reason out of an error body. FastAPI style
/// `{"detail": ...}` and `{"error": ...}` bodies are recognised; anything else
/// is passed through truncated.
fn extract_error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "error", "message"] {
            match value.get(key) {
                Some(Value::String(text)) => return text.clone(),
                Some(Value::Null) | None => continue,
                Some(other) => return other.to_string(),
            }
        }
    }
    body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect()
}

#[async_trait]
impl DashboardApi for HttpGateway {
    async fn list_profiles(&self) -> Result<Vec<Profile>, DashboardError> {
        self.send_json(self.client.get(self.url("/api/profiles"))).await
    }

    async fn get_profile(&self, id: ResourceId) -> Result<Profile, DashboardError> {
        self.send_json(self.client.get(self.url(&format!("/api/profiles/{id}"))))
            .await
    }

    async fn create_profile(&self, payload: &ProfileCreate) -> Result<Profile, DashboardError> {
        debug!(username = %payload.username, "Creating profile.");
        self.send_json(self.client.post(self.url("/api/profiles")).json(payload))
            .await
    }

    async fn update_profile(
        &self,
        id: ResourceId,
        payload: &ProfileUpdate,
    ) -> Result<Profile, DashboardError> {
        self.send_json(
            self.client
                .put(self.url(&format!("/api/profiles/{id}")))
                .json(payload),
        )
        .await
    }

    async fn delete_profile(&self, id: ResourceId) -> Result<(), DashboardError> {
        self.send_empty(self.client.delete(self.url(&format!("/api/profiles/{id}"))))
            .await
    }

    async fn force_check(&self, id: ResourceId) -> Result<(), DashboardError> {
        self.send_empty(self.client.post(self.url(&format!("/api/check/{id}"))))
            .await
    }

    async fn test_profile(&self, id: ResourceId) -> Result<TestRunPayload, DashboardError> {
        debug!(profile_id = id, "Requesting diagnostic run.");
        self.send_json(self.client.post(self.url(&format!("/api/test/{id}"))))
            .await
    }

    async fn list_accounts(&self) -> Result<Vec<LinkedAccount>, DashboardError> {
        self.send_json(self.client.get(self.url("/api/instagram-accounts")))
            .await
    }

    async fn create_account(
        &self,
        payload: &AccountCreate,
    ) -> Result<LinkedAccount, DashboardError> {
        self.send_json(
            self.client
                .post(self.url("/api/instagram-accounts"))
                .json(payload),
        )
        .await
    }

    async fn update_account(
        &self,
        id: ResourceId,
        payload: &AccountUpdate,
    ) -> Result<LinkedAccount, DashboardError> {
        self.send_json(
            self.client
                .put(self.url(&format!("/api/instagram-accounts/{id}")))
                .json(payload),
        )
        .await
    }

    async fn delete_account(&self, id: ResourceId) -> Result<(), DashboardError> {
        self.send_empty(
            self.client
                .delete(self.url(&format!("/api/instagram-accounts/{id}"))),
        )
        .await
    }

    async fn test_account_login(
        &self,
        id: ResourceId,
        password: &str,
    ) -> Result<LoginTestResult, DashboardError> {
        self.send_json(
            self.client
                .post(self.url(&format!("/api/instagram-accounts/{id}/test-login")))
                .query(&[("password", password)]),
        )
        .await
    }

    async fn list_logs(&self, query: &LogQuery) -> Result<Vec<LogRecord>, DashboardError> {
        self.send_json(self.client.get(self.url("/api/logs")).query(query))
            .await
    }

    async fn get_stats(&self) -> Result<StatsSnapshot, DashboardError> {
        self.send_json(self.client.get(self.url("/api/stats"))).await
    }

    async fn session_status(&self) -> Result<SessionStatus, DashboardError> {
        self.send_json(self.client.get(self.url("/api/session-status")))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fastapi_detail() {
        assert_eq!(
            extract_error_detail(r#"{"detail":"Profile not found"}"#),
            "Profile not found"
        );
        assert_eq!(
            extract_error_detail(r#"{"error":"bad webhook"}"#),
            "bad webhook"
        );
        assert!(extract_error_detail(r#"{"detail":[{"loc":["body","username"]}]}"#)
            .contains("username"));
        assert_eq!(extract_error_detail("  upstream exploded \n"), "upstream exploded");
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, "busy".into()),
            DashboardError::Conflict(_)
        ));
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, "Profile not found".into()),
            DashboardError::Validation {
                status: 404,
                detail: "Profile not found".to_string()
            }
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new()),
            DashboardError::Server { status: 502, .. }
        ));
    }

    #[test]
    fn test_base_url_is_normalised() {
        let gateway = HttpGateway::new("http://localhost:8000/", Duration::from_secs(5)).unwrap();
        assert_eq!(gateway.url("/api/stats"), "http://localhost:8000/api/stats");
    }
}
