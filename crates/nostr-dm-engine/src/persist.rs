use crate::{CacheStore, Reducer, Signer};
use nostr::PublicKey;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct PersistInner {
    cache: CacheStore,
    signer: Arc<dyn Signer>,
    user: PublicKey,
    reducer: Arc<Reducer>,
    debounce: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl PersistInner {
    fn flush(&self) {
        let doc = self.reducer.to_cache_document();
        match self.cache.write(&self.user, &doc, Some(self.signer.as_ref())) {
            Ok(()) => debug!(participants = doc.participants.len(), "cache flushed"),
            Err(err) => warn!(error = %err, "cache flush failed"),
        }
    }
}

/// Debounced writer of the conversation map back to the cache store.
///
/// Live traffic coalesces into one write per debounce window; backfills that
/// produced new messages flush immediately.
#[derive(Clone)]
pub struct PersistScheduler {
    inner: Arc<PersistInner>,
}

impl PersistScheduler {
    pub fn new(
        cache: CacheStore,
        signer: Arc<dyn Signer>,
        user: PublicKey,
        reducer: Arc<Reducer>,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PersistInner {
                cache,
                signer,
                user,
                reducer,
                debounce,
                pending: Mutex::new(None),
            }),
        }
    }

    /// Arm (or re-arm) the single-shot flush timer.
    pub fn schedule_debounced(&self) {
        let inner = Arc::clone(&self.inner);
        let mut pending = self.inner.pending.lock().unwrap();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            inner.flush();
        }));
    }

    /// Flush right now, cancelling any armed timer.
    pub fn flush_now(&self) {
        if let Some(previous) = self.inner.pending.lock().unwrap().take() {
            previous.abort();
        }
        self.inner.flush();
    }
}
