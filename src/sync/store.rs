use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use super::cache::ResourceCache;
use crate::gateway::DashboardApi;
use crate::models::{LinkedAccount, Profile, StatsSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Profiles,
    Accounts,
    Stats,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheKey::Profiles => "profiles",
            CacheKey::Accounts => "accounts",
            CacheKey::Stats => "stats",
        };
        f.write_str(name)
    }
}

/// The cached collections the dashboard reads from. Every component holds a
/// clone; the refresh and invalidate paths are the only writers.
#[derive(Clone)]
pub struct DashboardStore {
    pub profiles: ResourceCache<Vec<Profile>>,
    pub accounts: ResourceCache<Vec<LinkedAccount>>,
    pub stats: ResourceCache<StatsSnapshot>,
}

impl DashboardStore {
    pub fn new(api: Arc<dyn DashboardApi>) -> Self {
        let profiles_api = Arc::clone(&api);
        let accounts_api = Arc::clone(&api);
        let stats_api = api;

        Self {
            profiles: ResourceCache::from_fn("profiles", move || {
                let api = Arc::clone(&profiles_api);
                async move { api.list_profiles().await }
            }),
            accounts: ResourceCache::from_fn("accounts", move || {
                let api = Arc::clone(&accounts_api);
                async move { api.list_accounts().await }
            }),
            stats: ResourceCache::from_fn("stats", move || {
                let api = Arc::clone(&stats_api);
                async move { api.get_stats().await }
            }),
        }
    }

    pub fn invalidate(&self, key: CacheKey) {
        match key {
            CacheKey::Profiles => drop(self.profiles.invalidate()),
            CacheKey::Accounts => drop(self.accounts.invalidate()),
            CacheKey::Stats => drop(self.stats.invalidate()),
        }
    }

    /// Starts the fixed-cadence refresh of the stats aggregate.
    pub fn spawn_stats_refresh(&self, period: Duration) -> JoinHandle<()> {
        info!(period_secs = period.as_secs(), "Starting scheduled stats refresh.");
        self.stats.spawn_periodic_refresh(period)
    }
}
