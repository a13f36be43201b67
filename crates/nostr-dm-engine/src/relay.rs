use crate::Result;
use async_trait::async_trait;
use nostr::{Event, Filter};
use std::time::Duration;
use tokio::sync::mpsc;

pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Live feed token returned by [`RelayPool::subscribe`]. Events arrive on
/// `events` until the pool closes the stream or `unsubscribe` is invoked.
pub struct Subscription {
    pub id: String,
    pub events: mpsc::Receiver<Event>,
    unsubscribe: Option<Unsubscribe>,
}

impl Subscription {
    pub fn new(
        id: impl Into<String>,
        events: mpsc::Receiver<Event>,
        unsubscribe: Option<Unsubscribe>,
    ) -> Self {
        Self {
            id: id.into(),
            events,
            unsubscribe,
        }
    }

    pub(crate) fn split(self) -> (mpsc::Receiver<Event>, Option<Unsubscribe>) {
        (self.events, self.unsubscribe)
    }
}

/// Relay connectivity seam.
///
/// Implementations own connection management and reconnect policy; the
/// engine only issues one-shot filtered queries, long-lived subscriptions,
/// and publishes.
#[async_trait]
pub trait RelayPool: Send + Sync {
    /// One-shot filtered fetch, bounded by `timeout`.
    async fn query(&self, filters: Vec<Filter>, timeout: Duration) -> Result<Vec<Event>>;

    /// Open a long-lived subscription for the given filters.
    async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription>;

    /// Publish a signed event, resolving once acknowledged.
    async fn publish(&self, event: Event) -> Result<()>;
}
