use reqwest::Url;

pub mod connection;
pub mod feed;

pub use self::connection::{
    ConnectionState, DispatchOutcome, LiveEventStream, ReconnectPolicy, StreamHandle,
    StreamStats, Subscription,
};
pub use self::feed::{LogFeed, SharedLogFeed};

const STREAM_PATH: &str = "/ws/logs";

/// Live stream URL for an API base: same origin, `ws`/`wss` scheme, fixed path.
pub fn derive_stream_url(api_base_url: &str) -> Result<String, String> {
    let mut url = Url::parse(api_base_url)
        .map_err(|e| format!("Invalid API base URL '{api_base_url}': {e}"))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(format!("Unsupported API URL scheme '{other}'")),
    };
    url.set_scheme(scheme)
        .map_err(|_| format!("Cannot derive stream URL from '{api_base_url}'"))?;
    url.set_path(STREAM_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}
