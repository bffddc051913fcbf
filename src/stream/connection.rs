use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::config::DashboardConfig;
use crate::error::DashboardError;
use crate::models::LogRecord;
use crate::websocket_models::LiveEvent;

pub type LogCallback = Arc<dyn Fn(&LogRecord) + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    /// Waiting `delay` before the next connection attempt.
    Reconnecting { delay: Duration },
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &DashboardConfig) -> Self {
        Self {
            initial: Duration::from_secs(config.reconnect_initial_secs),
            max: Duration::from_secs(config.reconnect_max_secs),
        }
    }
}

/// Doubling delay, capped at the policy maximum.
#[derive(Debug)]
struct Backoff {
    policy: ReconnectPolicy,
    current: Duration,
}

impl Backoff {
    fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current: policy.initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.policy.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.policy.initial;
    }
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, LogCallback)>,
}

#[derive(Default)]
struct FrameCounters {
    delivered: AtomicU64,
    ignored: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub delivered: u64,
    pub ignored: u64,
    pub dropped: u64,
}

#[derive(Debug, PartialEq)]
pub enum DispatchOutcome {
    /// Forwarded to this many subscribers.
    Delivered(usize),
    /// Unknown `type` tag.
    Ignored(String),
    /// Undecodable frame. Only this frame is lost.
    Dropped(DashboardError),
}

/// Fan-out of live log records to callbacks, fed by one persistent socket.
///
/// Records reach subscribers in the order frames arrive. Nothing is buffered
/// or replayed: records received while the socket was down are not recovered.
#[derive(Clone)]
pub struct LiveEventStream {
    subscribers: Arc<Mutex<Subscribers>>,
    counters: Arc<FrameCounters>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Default for LiveEventStream {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveEventStream {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
            counters: Arc::new(FrameCounters::default()),
            state: Arc::new(state),
        }
    }

    /// Registers `on_record`. Dropping the returned handle unsubscribes.
    pub fn subscribe<F>(&self, on_record: F) -> Subscription
    where
        F: Fn(&LogRecord) + Send + Sync + 'static,
    {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.next_id += 1;
        let id = subscribers.next_id;
        subscribers.entries.push((id, Arc::new(on_record)));
        debug!(subscriber = id, "Live stream subscriber added.");
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().entries.len()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// `Stopped` is terminal: a connection task that is still winding down
    /// after shutdown cannot publish over it.
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::Stopped {
                return false;
            }
            *current = state;
            true
        });
    }

    /// Decodes one inbound frame and forwards a log record to every current
    /// subscriber. Never fails; bad frames are counted and logged.
    pub fn dispatch_frame(&self, frame: &str) -> DispatchOutcome {
        match LiveEvent::decode(frame) {
            Ok(LiveEvent::Log(record)) => {
                // Callbacks run outside the lock so they may unsubscribe.
                let callbacks: Vec<LogCallback> = self
                    .subscribers
                    .lock()
                    .unwrap()
                    .entries
                    .iter()
                    .map(|(_, callback)| Arc::clone(callback))
                    .collect();
                for callback in &callbacks {
                    callback(&record);
                }
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Delivered(callbacks.len())
            }
            Ok(LiveEvent::Unrecognized(kind)) => {
                debug!(kind = %kind, "Ignoring live event with unknown type.");
                self.counters.ignored.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Ignored(kind)
            }
            Err(err) => {
                warn!(error = %err, "Dropping undecodable live stream frame.");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Dropped(err)
            }
        }
    }

    /// Connects to `url` in a background task and keeps reconnecting with
    /// capped exponential backoff until the handle is shut down. A stream
    /// that was shut down stays `Stopped`; follow again with a new stream.
    pub fn spawn(&self, url: impl Into<String>, policy: ReconnectPolicy) -> StreamHandle {
        let stream = self.clone();
        let url = url.into();
        let task = tokio::spawn(async move { stream.run(url, policy).await });
        StreamHandle {
            task,
            stream: self.clone(),
        }
    }

    async fn run(self, url: String, policy: ReconnectPolicy) {
        let mut backoff = Backoff::new(policy);
        loop {
            self.set_state(ConnectionState::Connecting);
            info!(url = %url, "Connecting to live event stream.");

            match connect_async(url.as_str()).await {
                Ok((ws_stream, _)) => {
                    info!(url = %url, "Live event stream connected.");
                    backoff.reset();
                    self.set_state(ConnectionState::Connected);
                    self.read_frames(ws_stream).await;
                    warn!("Live event stream ended. Preparing to reconnect...");
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to live event stream. Will retry.");
                }
            }

            let delay = backoff.next_delay();
            self.set_state(ConnectionState::Reconnecting { delay });
            info!(delay_ms = delay.as_millis() as u64, "Sleeping before next connection attempt.");
            tokio::time::sleep(delay).await;
        }
    }

    async fn read_frames(&self, mut ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>) {
        while let Some(message) = ws_stream.next().await {
            match message {
                Ok(WsMessage::Text(text)) => {
                    self.dispatch_frame(text.as_str());
                }
                Ok(WsMessage::Binary(bin)) => match std::str::from_utf8(&bin) {
                    Ok(text) => {
                        self.dispatch_frame(text);
                    }
                    Err(e) => {
                        warn!(error = %e, "Dropping non UTF-8 binary frame.");
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                },
                Ok(WsMessage::Close(frame)) => {
                    info!(frame = ?frame, "Live event stream closed by server.");
                    break;
                }
                // Ping/pong replies are handled by tungstenite.
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Live event stream receive error.");
                    break;
                }
            }
        }
    }
}

/// Keeps a callback registered while alive.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            if let Ok(mut subscribers) = subscribers.lock() {
                subscribers.entries.retain(|(id, _)| *id != self.id);
                debug!(subscriber = self.id, "Live stream subscriber removed.");
            }
        }
    }
}

/// Owner of the background connection task.
pub struct StreamHandle {
    task: JoinHandle<()>,
    stream: LiveEventStream,
}

impl StreamHandle {
    pub fn stream(&self) -> &LiveEventStream {
        &self.stream
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn shutdown(self) {
        self.task.abort();
        self.stream.state.send_replace(ConnectionState::Stopped);
        info!("Live event stream stopped.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log_frame(id: i64, message: &str) -> String {
        let inner = json!({
            "id": id,
            "level": "info",
            "message": message,
            "created_at": "2025-05-01T08:00:00"
        })
        .to_string();
        json!({ "type": "log", "data": inner }).to_string()
    }

    fn collecting(stream: &LiveEventStream) -> (Arc<Mutex<Vec<i64>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = stream.subscribe(move |record| sink.lock().unwrap().push(record.id));
        (seen, sub)
    }

    #[test]
    fn test_records_forwarded_in_arrival_order() {
        let stream = LiveEventStream::new();
        let (seen, _sub) = collecting(&stream);

        for id in [3, 1, 2, 2] {
            stream.dispatch_frame(&log_frame(id, "tick"));
        }
        // No reordering and no de-duplication.
        assert_eq!(*seen.lock().unwrap(), vec![3, 1, 2, 2]);
        assert_eq!(stream.stats().delivered, 4);
    }

    #[test]
    fn test_unknown_and_malformed_frames_do_not_disturb_delivery() {
        let stream = LiveEventStream::new();
        let (seen, _sub) = collecting(&stream);

        stream.dispatch_frame(&log_frame(1, "before"));
        assert_eq!(
            stream.dispatch_frame(r#"{"type":"heartbeat","data":"{}"}"#),
            DispatchOutcome::Ignored("heartbeat".to_string())
        );
        assert!(matches!(
            stream.dispatch_frame(r#"{"type":"log","data":"{not json"}"#),
            DispatchOutcome::Dropped(DashboardError::Decode(_))
        ));
        assert!(matches!(
            stream.dispatch_frame("garbage"),
            DispatchOutcome::Dropped(_)
        ));
        stream.dispatch_frame(&log_frame(2, "after"));

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(
            stream.stats(),
            StreamStats {
                delivered: 2,
                ignored: 1,
                dropped: 2
            }
        );
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let stream = LiveEventStream::new();
        let (first, first_sub) = collecting(&stream);
        let (second, _second_sub) = collecting(&stream);
        assert_eq!(stream.subscriber_count(), 2);

        stream.dispatch_frame(&log_frame(1, "both"));
        first_sub.unsubscribe();
        assert_eq!(stream.subscriber_count(), 1);
        assert_eq!(
            stream.dispatch_frame(&log_frame(2, "second only")),
            DispatchOutcome::Delivered(1)
        );

        assert_eq!(*first.lock().unwrap(), vec![1]);
        assert_eq!(*second.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_backoff_doubles_caps_and_resets() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_saturates_on_huge_delays() {
        let mut backoff = Backoff::new(ReconnectPolicy {
            initial: Duration::from_secs(u64::MAX / 2 + 1),
            max: Duration::MAX,
        });
        for _ in 0..4 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::MAX);
    }

    #[tokio::test]
    async fn test_state_stays_stopped_after_shutdown() {
        let stream = LiveEventStream::new();
        let handle = stream.spawn(
            "ws://127.0.0.1:1/ws/logs",
            ReconnectPolicy {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(10),
            },
        );
        handle.shutdown();

        // A late write from the winding-down task.
        stream.set_state(ConnectionState::Reconnecting {
            delay: Duration::from_millis(10),
        });
        stream.set_state(ConnectionState::Connecting);
        assert_eq!(*stream.connection_state().borrow(), ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_unreachable_server_keeps_retrying() {
        let stream = LiveEventStream::new();
        let mut state = stream.connection_state();
        let handle = stream.spawn(
            "ws://127.0.0.1:1/ws/logs",
            ReconnectPolicy {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(40),
            },
        );

        state
            .wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. }))
            .await
            .unwrap();
        assert!(!handle.is_finished());

        handle.shutdown();
        assert_eq!(*state.borrow(), ConnectionState::Stopped);
    }
}
