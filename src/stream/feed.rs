use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::connection::{LiveEventStream, Subscription};
use crate::error::DashboardError;
use crate::gateway::DashboardApi;
use crate::models::{LogQuery, LogRecord};

pub type SharedLogFeed = Arc<Mutex<LogFeed>>;

/// Append-only display buffer for log records, oldest first. Once `capacity`
/// is reached the oldest records fall off the front.
#[derive(Debug, Clone)]
pub struct LogFeed {
    records: VecDeque<LogRecord>,
    capacity: usize,
}

impl LogFeed {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn shared(capacity: usize) -> SharedLogFeed {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    pub fn push(&mut self, record: LogRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Appends a page as returned by `GET /api/logs` (newest first), so the
    /// buffer stays in arrival order.
    pub fn seed(&mut self, newest_first: Vec<LogRecord>) {
        for record in newest_first.into_iter().rev() {
            self.push(record);
        }
    }

    /// Fetches the latest page from the backend and seeds the buffer with it.
    pub async fn load_recent(
        &mut self,
        api: &dyn DashboardApi,
        query: &LogQuery,
    ) -> Result<usize, DashboardError> {
        let page = api.list_logs(query).await?;
        let count = page.len();
        debug!(count, "Seeding log feed from history.");
        self.seed(page);
        Ok(count)
    }

    pub fn records(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter()
    }

    pub fn latest(&self) -> Option<&LogRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Appends every record the stream delivers to `feed` until the returned
/// subscription is dropped.
pub fn follow(feed: &SharedLogFeed, stream: &LiveEventStream) -> Subscription {
    let feed = Arc::clone(feed);
    stream.subscribe(move |record| {
        if let Ok(mut feed) = feed.lock() {
            feed.push(record.clone());
        }
    })
}
