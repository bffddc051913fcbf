use async_trait::async_trait;

use crate::error::DashboardError;
use crate::models::{
    AccountCreate, AccountUpdate, LinkedAccount, LogQuery, LogRecord, LoginTestResult, Profile,
    ProfileCreate, ProfileUpdate, ResourceId, SessionStatus, StatsSnapshot, TestRunPayload,
};

pub mod http;
#[cfg(test)]
pub(crate) mod memory;

pub use self::http::HttpGateway;

/// Typed contract of the backend API.
/// `HttpGateway` is the production implementation; tests substitute in-memory ones.
#[async_trait]
pub trait DashboardApi: Send + Sync {
    async fn list_profiles(&self) -> Result<Vec<Profile>, DashboardError>;
    async fn get_profile(&self, id: ResourceId) -> Result<Profile, DashboardError>;
    async fn create_profile(&self, payload: &ProfileCreate) -> Result<Profile, DashboardError>;
    async fn update_profile(
        &self,
        id: ResourceId,
        payload: &ProfileUpdate,
    ) -> Result<Profile, DashboardError>;
    async fn delete_profile(&self, id: ResourceId) -> Result<(), DashboardError>;

    /// Fire-and-forget trigger for an immediate scrape.
    async fn force_check(&self, id: ResourceId) -> Result<(), DashboardError>;

    /// Runs the diagnostic test and returns its full history and outcome.
    async fn test_profile(&self, id: ResourceId) -> Result<TestRunPayload, DashboardError>;

    async fn list_accounts(&self) -> Result<Vec<LinkedAccount>, DashboardError>;
    async fn create_account(&self, payload: &AccountCreate)
    -> Result<LinkedAccount, DashboardError>;
    async fn update_account(
        &self,
        id: ResourceId,
        payload: &AccountUpdate,
    ) -> Result<LinkedAccount, DashboardError>;
    async fn delete_account(&self, id: ResourceId) -> Result<(), DashboardError>;
    async fn test_account_login(
        &self,
        id: ResourceId,
        password: &str,
    ) -> Result<LoginTestResult, DashboardError>;

    async fn list_logs(&self, query: &LogQuery) -> Result<Vec<LogRecord>, DashboardError>;
    async fn get_stats(&self) -> Result<StatsSnapshot, DashboardError>;
    async fn session_status(&self) -> Result<SessionStatus, DashboardError>;
}
