use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, warn};

use crate::error::DashboardError;

pub type FetchFuture<T> = BoxFuture<'static, Result<T, DashboardError>>;
pub type Fetcher<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;

/// What a consumer sees when it reads a collection.
#[derive(Debug)]
pub enum CacheView<T> {
    /// First fetch still in flight; there is no data yet.
    Pending,
    Ready(Arc<T>),
    /// The latest fetch failed. Previously fetched data is kept.
    Error {
        error: DashboardError,
        last_good: Option<Arc<T>>,
    },
}

impl<T> Clone for CacheView<T> {
    fn clone(&self) -> Self {
        match self {
            CacheView::Pending => CacheView::Pending,
            CacheView::Ready(value) => CacheView::Ready(Arc::clone(value)),
            CacheView::Error { error, last_good } => CacheView::Error {
                error: error.clone(),
                last_good: last_good.clone(),
            },
        }
    }
}

impl<T> CacheView<T> {
    /// The freshest data available, even when the latest refresh failed.
    pub fn value(&self) -> Option<Arc<T>> {
        match self {
            CacheView::Pending => None,
            CacheView::Ready(value) => Some(Arc::clone(value)),
            CacheView::Error { last_good, .. } => last_good.clone(),
        }
    }

    pub fn error(&self) -> Option<&DashboardError> {
        match self {
            CacheView::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, CacheView::Pending)
    }
}

#[derive(Debug)]
pub struct CacheState<T> {
    pub view: CacheView<T>,
    /// A refresh has been issued and not yet resolved.
    pub refreshing: bool,
    /// Generation of the request whose result is currently shown.
    pub generation: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> Clone for CacheState<T> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
            refreshing: self.refreshing,
            generation: self.generation,
            updated_at: self.updated_at,
        }
    }
}

struct CacheInner<T> {
    name: &'static str,
    fetcher: Fetcher<T>,
    issued: AtomicU64,
    started: AtomicBool,
    state: watch::Sender<CacheState<T>>,
}

impl<T: Send + Sync + 'static> CacheInner<T> {
    fn issue(&self) -> u64 {
        self.started.store(true, Ordering::SeqCst);
        let generation = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|state| state.refreshing = true);
        generation
    }

    /// Applies a fetch result unless a newer request has been issued since.
    /// The generation check runs under the state lock so two results cannot
    /// interleave.
    fn apply(&self, generation: u64, result: Result<T, DashboardError>) {
        let name = self.name;
        let issued = &self.issued;
        self.state.send_if_modified(move |state| {
            let latest = issued.load(Ordering::SeqCst);
            if generation != latest {
                debug!(
                    cache = name,
                    generation, latest, "Discarding superseded refresh result."
                );
                return false;
            }
            state.refreshing = false;
            state.generation = generation;
            match result {
                Ok(value) => {
                    state.view = CacheView::Ready(Arc::new(value));
                    state.updated_at = Some(Utc::now());
                }
                Err(error) => {
                    warn!(cache = name, error = %error, "Refresh failed; keeping last good data.");
                    let last_good = state.view.value();
                    state.view = CacheView::Error { error, last_good };
                }
            }
            true
        });
    }
}

/// Last known state of one remote collection.
///
/// Only the refresh path writes the state; every other component reads it
/// through `view`, `state` or a `subscribe` receiver. Cloning is cheap and
/// shares the same cache.
pub struct ResourceCache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for ResourceCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> ResourceCache<T> {
    pub fn new(name: &'static str, fetcher: Fetcher<T>) -> Self {
        let (state, _) = watch::channel(CacheState {
            view: CacheView::Pending,
            refreshing: false,
            generation: 0,
            updated_at: None,
        });
        Self {
            inner: Arc::new(CacheInner {
                name,
                fetcher,
                issued: AtomicU64::new(0),
                started: AtomicBool::new(false),
                state,
            }),
        }
    }

    pub fn from_fn<F, Fut>(name: &'static str, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, DashboardError>> + Send + 'static,
    {
        Self::new(name, Arc::new(move || Box::pin(fetch()) as FetchFuture<T>))
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Current view. The first call issues the initial fetch in the
    /// background and reports `Pending` until it resolves.
    pub fn get(&self) -> CacheView<T> {
        if !self.inner.started.swap(true, Ordering::SeqCst) {
            debug!(cache = self.inner.name, "First access, issuing initial fetch.");
            drop(self.spawn_fetch());
        }
        self.view()
    }

    /// Current view without triggering any fetch.
    pub fn view(&self) -> CacheView<T> {
        self.inner.state.borrow().view.clone()
    }

    pub fn state(&self) -> CacheState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state.borrow().refreshing
    }

    pub fn subscribe(&self) -> watch::Receiver<CacheState<T>> {
        self.inner.state.subscribe()
    }

    /// Issues a new request right away and returns a future that resolves to
    /// the view after the response has been applied. The request is ordered
    /// at call time, not when the future is first polled: a request issued
    /// later always supersedes this one.
    ///
    /// The fetch runs in its own task, so dropping the returned future does
    /// not leave the cache waiting on a result that never arrives.
    pub fn refresh(&self) -> impl Future<Output = CacheView<T>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let handle = self.spawn_fetch();
        async move {
            match handle.await {
                Ok(view) => view,
                Err(e) => {
                    warn!(cache = inner.name, error = %e, "Refresh task did not finish.");
                    inner.state.borrow().view.clone()
                }
            }
        }
    }

    /// Marks the value stale and re-fetches in the background. Readers keep
    /// seeing the previous value until the new one lands.
    pub fn invalidate(&self) -> JoinHandle<CacheView<T>> {
        debug!(cache = self.inner.name, "Invalidated.");
        self.spawn_fetch()
    }

    fn spawn_fetch(&self) -> JoinHandle<CacheView<T>> {
        let inner = Arc::clone(&self.inner);
        let generation = inner.issue();
        let fetch = (inner.fetcher)();
        tokio::spawn(async move {
            let result = fetch.await;
            inner.apply(generation, result);
            let view = inner.state.borrow().view.clone();
            view
        })
    }

    /// Re-issues a refresh every `period`, starting immediately. Each tick is
    /// spawned so a hung request never delays the cadence; a late response
    /// from an older tick is discarded once a newer one is issued.
    pub fn spawn_periodic_refresh(&self, period: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!(cache = cache.name(), "Scheduled refresh tick.");
                drop(cache.spawn_fetch());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    type Reply = oneshot::Sender<Result<u32, DashboardError>>;

    /// Fetcher whose responses are released by the test, one sender per call.
    fn scripted_cache() -> (ResourceCache<u32>, Arc<Mutex<VecDeque<Reply>>>) {
        let replies: Arc<Mutex<VecDeque<Reply>>> = Arc::new(Mutex::new(VecDeque::new()));
        let calls = Arc::clone(&replies);
        let fetcher: Fetcher<u32> = Arc::new(move || {
            let (tx, rx) = oneshot::channel();
            calls.lock().unwrap().push_back(tx);
            Box::pin(async move {
                rx.await
                    .unwrap_or_else(|_| Err(DashboardError::Network("dropped".into())))
            }) as FetchFuture<u32>
        });
        (ResourceCache::new("test", fetcher), replies)
    }

    fn next_reply(replies: &Arc<Mutex<VecDeque<Reply>>>) -> Reply {
        replies.lock().unwrap().pop_front().unwrap()
    }

    #[tokio::test]
    async fn test_superseded_result_is_discarded() {
        let (cache, replies) = scripted_cache();

        let first = cache.refresh();
        let second = cache.refresh();
        let first_reply = next_reply(&replies);
        let second_reply = next_reply(&replies);

        second_reply.send(Ok(2)).unwrap();
        assert_eq!(*second.await.value().unwrap(), 2);

        first_reply.send(Ok(1)).unwrap();
        let view = first.await;
        assert_eq!(*view.value().unwrap(), 2);
        assert_eq!(cache.state().generation, 2);
        assert!(!cache.is_refreshing());
    }

    #[tokio::test]
    async fn test_older_result_ignored_even_if_newer_still_in_flight() {
        let (cache, replies) = scripted_cache();

        let first = cache.refresh();
        let _second = cache.refresh();
        next_reply(&replies).send(Ok(1)).unwrap();

        assert!(first.await.is_pending());
        assert!(cache.is_refreshing());
    }

    #[tokio::test]
    async fn test_abandoned_refresh_still_lands() {
        let (cache, replies) = scripted_cache();

        let _first = cache.invalidate();
        let waited =
            tokio::time::timeout(Duration::from_millis(1), cache.refresh()).await;
        assert!(waited.is_err());

        next_reply(&replies).send(Ok(1)).unwrap();
        next_reply(&replies).send(Ok(2)).unwrap();

        let mut rx = cache.subscribe();
        let state = rx
            .wait_for(|state| state.generation >= 2 && !state.refreshing)
            .await
            .unwrap()
            .clone();
        assert_eq!(state.generation, 2);
        assert_eq!(*state.view.value().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_last_good_value() {
        let (cache, replies) = scripted_cache();

        let ok = cache.refresh();
        next_reply(&replies).send(Ok(10)).unwrap();
        ok.await;

        let failing = cache.refresh();
        // Readers see the old value while the refresh is in flight.
        assert_eq!(*cache.view().value().unwrap(), 10);
        assert!(cache.is_refreshing());

        next_reply(&replies)
            .send(Err(DashboardError::Network("refused".into())))
            .unwrap();
        let view = failing.await;
        assert!(matches!(view.error(), Some(DashboardError::Network(_))));
        assert_eq!(*view.value().unwrap(), 10);
        // No automatic retry.
        assert!(replies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_access_is_pending() {
        let cache = ResourceCache::from_fn("stats", || async { Ok::<u32, DashboardError>(3) });
        assert!(cache.get().is_pending());

        let mut rx = cache.subscribe();
        rx.wait_for(|state| !state.view.is_pending()).await.unwrap();
        assert_eq!(*cache.get().value().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_refresh_reissues_requests() {
        let counter = Arc::new(AtomicU64::new(0));
        let calls = Arc::clone(&counter);
        let cache = ResourceCache::from_fn("stats", move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<u64, DashboardError>(n) }
        });

        let handle = cache.spawn_periodic_refresh(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(65)).await;
        handle.abort();

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(*cache.view().value().unwrap(), 3);
    }
}
