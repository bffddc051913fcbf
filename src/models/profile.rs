use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ResourceId;

/// A monitored profile as returned by the backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Profile {
    pub id: ResourceId,
    pub username: String,
    pub webhook_url: String,
    pub check_interval: u32, // minutes
    pub download_posts: bool,
    pub download_stories: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default, with = "super::timestamp::option")]
    pub last_post_timestamp: Option<DateTime<Utc>>,
    #[serde(default, with = "super::timestamp::option")]
    pub last_story_timestamp: Option<DateTime<Utc>>,
    #[serde(with = "super::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "super::timestamp")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProfileCreate {
    pub username: String,
    pub webhook_url: String,
    pub check_interval: u32,
    pub download_posts: bool,
    pub download_stories: bool,
}

impl Default for ProfileCreate {
    fn default() -> Self {
        Self {
            username: String::new(),
            webhook_url: String::new(),
            check_interval: 30,
            download_posts: true,
            download_stories: true,
        }
    }
}

impl ProfileCreate {
    pub fn new(username: impl Into<String>, webhook_url: impl Into<String>) -> Self {
        Self {
            username: username.into().trim_start_matches('@').to_string(),
            webhook_url: webhook_url.into(),
            ..Default::default()
        }
    }
}

/// Partial update; absent fields are left untouched by the backend.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_posts: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_stories: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl ProfileUpdate {
    pub fn set_active(active: bool) -> Self {
        Self {
            is_active: Some(active),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
