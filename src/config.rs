use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub api_base_url: String,

    /// Overrides the live stream URL derived from `api_base_url`.
    #[serde(default)]
    pub stream_url: Option<String>,

    #[serde(default = "default_stats_refresh_secs")]
    pub stats_refresh_secs: u64,

    #[serde(default = "default_diagnostic_timeout_secs")]
    pub diagnostic_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_reconnect_initial_secs")]
    pub reconnect_initial_secs: u64,

    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,

    #[serde(default = "default_log_feed_capacity")]
    pub log_feed_capacity: usize,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialDashboardConfig {
    api_base_url: Option<String>,
    stream_url: Option<String>,
    stats_refresh_secs: Option<u64>,
    diagnostic_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    reconnect_initial_secs: Option<u64>,
    reconnect_max_secs: Option<u64>,
    log_feed_capacity: Option<usize>,
    log_dir: Option<String>,
}

fn default_stats_refresh_secs() -> u64 {
    30
}

fn default_diagnostic_timeout_secs() -> u64 {
    120
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_reconnect_initial_secs() -> u64 {
    1
}

fn default_reconnect_max_secs() -> u64 {
    60
}

fn default_log_feed_capacity() -> usize {
    500
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn env_value<T: FromStr>(name: &str) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name}: {e}")),
        Err(_) => Ok(None),
    }
}

impl PartialDashboardConfig {
    fn from_env() -> Result<Self, String> {
        Ok(Self {
            api_base_url: env_value("WATCHDESK_API_URL")?,
            stream_url: env_value("WATCHDESK_STREAM_URL")?,
            stats_refresh_secs: env_value("WATCHDESK_STATS_REFRESH_SECS")?,
            diagnostic_timeout_secs: env_value("WATCHDESK_DIAGNOSTIC_TIMEOUT_SECS")?,
            request_timeout_secs: env_value("WATCHDESK_REQUEST_TIMEOUT_SECS")?,
            reconnect_initial_secs: env_value("WATCHDESK_RECONNECT_INITIAL_SECS")?,
            reconnect_max_secs: env_value("WATCHDESK_RECONNECT_MAX_SECS")?,
            log_feed_capacity: env_value("WATCHDESK_LOG_FEED_CAPACITY")?,
            log_dir: env_value("WATCHDESK_LOG_DIR")?,
        })
    }

    fn from_file(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))
    }

    /// Environment overrides file.
    fn merge(env: Self, file: Self) -> Result<DashboardConfig, String> {
        let config = DashboardConfig {
            api_base_url: env
                .api_base_url
                .or(file.api_base_url)
                .ok_or("WATCHDESK_API_URL is required")?,
            stream_url: env.stream_url.or(file.stream_url),
            stats_refresh_secs: env
                .stats_refresh_secs
                .or(file.stats_refresh_secs)
                .unwrap_or_else(default_stats_refresh_secs),
            diagnostic_timeout_secs: env
                .diagnostic_timeout_secs
                .or(file.diagnostic_timeout_secs)
                .unwrap_or_else(default_diagnostic_timeout_secs),
            request_timeout_secs: env
                .request_timeout_secs
                .or(file.request_timeout_secs)
                .unwrap_or_else(default_request_timeout_secs),
            reconnect_initial_secs: env
                .reconnect_initial_secs
                .or(file.reconnect_initial_secs)
                .unwrap_or_else(default_reconnect_initial_secs),
            reconnect_max_secs: env
                .reconnect_max_secs
                .or(file.reconnect_max_secs)
                .unwrap_or_else(default_reconnect_max_secs),
            log_feed_capacity: env
                .log_feed_capacity
                .or(file.log_feed_capacity)
                .unwrap_or_else(default_log_feed_capacity),
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
        };
        config.validate()?;
        Ok(config)
    }
}

impl DashboardConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path_str) => PartialDashboardConfig::from_file(Path::new(path_str))?,
            None => PartialDashboardConfig::default(),
        };
        let env_config = PartialDashboardConfig::from_env()?;

        PartialDashboardConfig::merge(env_config, file_config)
    }

    /// Parses a config document without consulting the environment.
    pub fn from_toml_str(contents: &str) -> Result<Self, String> {
        let file: PartialDashboardConfig = toml::from_str(contents)
            .map_err(|e| format!("Failed to parse TOML config: {e}"))?;
        PartialDashboardConfig::merge(PartialDashboardConfig::default(), file)
    }

    pub fn for_api(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            stream_url: None,
            stats_refresh_secs: default_stats_refresh_secs(),
            diagnostic_timeout_secs: default_diagnostic_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            reconnect_initial_secs: default_reconnect_initial_secs(),
            reconnect_max_secs: default_reconnect_max_secs(),
            log_feed_capacity: default_log_feed_capacity(),
            log_dir: default_log_dir(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            return Err(format!(
                "api_base_url must be an http(s) URL, got '{}'",
                self.api_base_url
            ));
        }
        for (name, value) in [
            ("stats_refresh_secs", self.stats_refresh_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("diagnostic_timeout_secs", self.diagnostic_timeout_secs),
        ] {
            if value == 0 {
                return Err(format!("{name} must be greater than zero"));
            }
        }
        if self.reconnect_initial_secs == 0 || self.reconnect_max_secs < self.reconnect_initial_secs {
            return Err("reconnect delays must satisfy 0 < initial <= max".to_string());
        }
        Ok(())
    }

    pub fn stats_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.stats_refresh_secs)
    }

    pub fn diagnostic_timeout(&self) -> Duration {
        Duration::from_secs(self.diagnostic_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Explicit `stream_url` wins; otherwise the API origin with a ws scheme.
    pub fn resolved_stream_url(&self) -> Result<String, String> {
        match &self.stream_url {
            Some(url) => Ok(url.clone()),
            None => crate::stream::derive_stream_url(&self.api_base_url),
        }
    }
}
