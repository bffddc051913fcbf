//! In-memory `DashboardApi` used by the unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

use super::DashboardApi;
use crate::error::DashboardError;
use crate::models::{
    AccountCreate, AccountUpdate, LinkedAccount, LogQuery, LogRecord, LoginTestResult, Profile,
    ProfileCreate, ProfileUpdate, ResourceId, SessionStatus, StatsSnapshot, TestRunPayload,
};

#[derive(Default)]
pub struct InMemoryApi {
    pub profiles: Mutex<Vec<Profile>>,
    pub accounts: Mutex<Vec<LinkedAccount>>,
    pub logs: Mutex<Vec<LogRecord>>,
    pub test_results: Mutex<HashMap<ResourceId, TestRunPayload>>,
    /// Error returned by the next mutating call instead of applying it.
    pub fail_next: Mutex<Option<DashboardError>>,
    /// When set, mutating calls wait for `release` before doing anything.
    pub hold_mutations: AtomicBool,
    pub release: Notify,
    /// When set, `test_profile` never returns.
    pub hang_tests: AtomicBool,
    pub calls: Mutex<Vec<String>>,
    next_id: Mutex<ResourceId>,
}

impl InMemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn insert_profile(&self, id: ResourceId, username: &str) {
        let now = Utc::now();
        self.profiles.lock().unwrap().push(Profile {
            id,
            username: username.to_string(),
            webhook_url: "https://hook/x".to_string(),
            check_interval: 30,
            download_posts: true,
            download_stories: true,
            is_active: true,
            last_post_timestamp: None,
            last_story_timestamp: None,
            created_at: now,
            updated_at: now,
        });
        let mut next = self.next_id.lock().unwrap();
        *next = (*next).max(id);
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn allocate_id(&self) -> ResourceId {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        *next
    }

    async fn mutating(&self, call: &str) -> Result<(), DashboardError> {
        self.record(call);
        if self.hold_mutations.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        match self.fail_next.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn not_found(what: &str) -> DashboardError {
        DashboardError::Validation {
            status: 404,
            detail: format!("{what} not found"),
        }
    }
}

#[async_trait]
impl DashboardApi for InMemoryApi {
    async fn list_profiles(&self) -> Result<Vec<Profile>, DashboardError> {
        self.record("list_profiles");
        Ok(self.profiles.lock().unwrap().clone())
    }

    async fn get_profile(&self, id: ResourceId) -> Result<Profile, DashboardError> {
        self.record("get_profile");
        self.profiles
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| Self::not_found("Profile"))
    }

    async fn create_profile(&self, payload: &ProfileCreate) -> Result<Profile, DashboardError> {
        self.mutating("create_profile").await?;
        let now = Utc::now();
        let profile = Profile {
            id: self.allocate_id(),
            username: payload.username.clone(),
            webhook_url: payload.webhook_url.clone(),
            check_interval: payload.check_interval,
            download_posts: payload.download_posts,
            download_stories: payload.download_stories,
            is_active: true,
            last_post_timestamp: None,
            last_story_timestamp: None,
            created_at: now,
            updated_at: now,
        };
        self.profiles.lock().unwrap().push(profile.clone());
        Ok(profile)
    }

    async fn update_profile(
        &self,
        id: ResourceId,
        payload: &ProfileUpdate,
    ) -> Result<Profile, DashboardError> {
        self.mutating("update_profile").await?;
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Self::not_found("Profile"))?;
        if let Some(url) = &payload.webhook_url {
            profile.webhook_url = url.clone();
        }
        if let Some(interval) = payload.check_interval {
            profile.check_interval = interval;
        }
        if let Some(posts) = payload.download_posts {
            profile.download_posts = posts;
        }
        if let Some(stories) = payload.download_stories {
            profile.download_stories = stories;
        }
        if let Some(active) = payload.is_active {
            profile.is_active = active;
        }
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn delete_profile(&self, id: ResourceId) -> Result<(), DashboardError> {
        self.mutating("delete_profile").await?;
        let mut profiles = self.profiles.lock().unwrap();
        let before = profiles.len();
        profiles.retain(|p| p.id != id);
        if profiles.len() == before {
            return Err(Self::not_found("Profile"));
        }
        Ok(())
    }

    async fn force_check(&self, _id: ResourceId) -> Result<(), DashboardError> {
        self.mutating("force_check").await
    }

    async fn test_profile(&self, id: ResourceId) -> Result<TestRunPayload, DashboardError> {
        self.record("test_profile");
        if self.hang_tests.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.test_results
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Self::not_found("Profile"))
    }

    async fn list_accounts(&self) -> Result<Vec<LinkedAccount>, DashboardError> {
        self.record("list_accounts");
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn create_account(
        &self,
        payload: &AccountCreate,
    ) -> Result<LinkedAccount, DashboardError> {
        self.mutating("create_account").await?;
        let now = Utc::now();
        let account = LinkedAccount {
            id: self.allocate_id(),
            username: payload.username.clone(),
            is_active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
            has_valid_session: false,
        };
        self.accounts.lock().unwrap().push(account.clone());
        Ok(account)
    }

    async fn update_account(
        &self,
        id: ResourceId,
        payload: &AccountUpdate,
    ) -> Result<LinkedAccount, DashboardError> {
        self.mutating("update_account").await?;
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| Self::not_found("Account"))?;
        if let Some(username) = &payload.username {
            account.username = username.clone();
        }
        if let Some(active) = payload.is_active {
            account.is_active = active;
        }
        Ok(account.clone())
    }

    async fn delete_account(&self, id: ResourceId) -> Result<(), DashboardError> {
        self.mutating("delete_account").await?;
        self.accounts.lock().unwrap().retain(|a| a.id != id);
        Ok(())
    }

    async fn test_account_login(
        &self,
        id: ResourceId,
        password: &str,
    ) -> Result<LoginTestResult, DashboardError> {
        self.mutating("test_account_login").await?;
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| Self::not_found("Account"))?;
        let success = password == "correct";
        account.has_valid_session = success;
        Ok(LoginTestResult {
            success,
            message: Some(if success { "Login successful" } else { "Login failed" }.to_string()),
            has_valid_session: success,
        })
    }

    async fn list_logs(&self, query: &LogQuery) -> Result<Vec<LogRecord>, DashboardError> {
        self.record("list_logs");
        let logs = self.logs.lock().unwrap();
        let limit = query.limit.unwrap_or(100) as usize;
        Ok(logs.iter().rev().take(limit).cloned().collect())
    }

    async fn get_stats(&self) -> Result<StatsSnapshot, DashboardError> {
        self.record("get_stats");
        let profiles = self.profiles.lock().unwrap();
        Ok(StatsSnapshot {
            total_profiles: profiles.len() as u64,
            active_profiles: profiles.iter().filter(|p| p.is_active).count() as u64,
            total_posts: 0,
            total_stories: 0,
            total_errors: 0,
            last_check: None,
        })
    }

    async fn session_status(&self) -> Result<SessionStatus, DashboardError> {
        self.record("session_status");
        Ok(SessionStatus::default())
    }
}
