use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate counters. Replaced wholesale on every refresh.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_profiles: u64,
    pub active_profiles: u64,
    pub total_posts: u64,
    pub total_stories: u64,
    pub total_errors: u64,
    #[serde(default, with = "super::timestamp::option")]
    pub last_check: Option<DateTime<Utc>>,
}
