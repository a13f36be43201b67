#![allow(dead_code)]

use async_trait::async_trait;
use nostr::nips::{nip04, nip44};
use nostr::{Event, EventBuilder, Filter, Keys, Kind, PublicKey, Tag, Timestamp, UnsignedEvent};
use nostr_dm_engine::{Error, RelayPool, Result, Subscription, Unsubscribe};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

struct LiveSub {
    filters: Vec<Filter>,
    tx: mpsc::Sender<Event>,
    closed: Arc<AtomicBool>,
}

/// Scripted in-memory relay pool.
///
/// Query pages are queued per protocol ahead of time; live subscriptions
/// receive whatever `emit` pushes, gated by their filters.
#[derive(Default)]
pub struct MockRelayPool {
    nip04_pages: Mutex<VecDeque<Vec<Event>>>,
    nip17_pages: Mutex<VecDeque<Vec<Event>>>,
    nip04_queries: Mutex<Vec<Vec<Filter>>>,
    nip17_queries: Mutex<Vec<Vec<Filter>>>,
    fail_queries: AtomicBool,
    fail_publish: AtomicBool,
    published: Mutex<Vec<Event>>,
    subs: Mutex<Vec<LiveSub>>,
    sub_counter: AtomicUsize,
}

impl MockRelayPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue_nip04_page(&self, events: Vec<Event>) {
        self.nip04_pages.lock().unwrap().push_back(events);
    }

    pub fn queue_nip17_page(&self, events: Vec<Event>) {
        self.nip17_pages.lock().unwrap().push_back(events);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Event> {
        self.published.lock().unwrap().clone()
    }

    pub fn nip04_queries(&self) -> Vec<Vec<Filter>> {
        self.nip04_queries.lock().unwrap().clone()
    }

    pub fn nip17_queries(&self) -> Vec<Vec<Filter>> {
        self.nip17_queries.lock().unwrap().clone()
    }

    pub fn open_subscription_count(&self) -> usize {
        self.subs
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.closed.load(Ordering::SeqCst))
            .count()
    }

    pub fn total_subscription_count(&self) -> usize {
        self.subs.lock().unwrap().len()
    }

    /// Deliver an event to every open subscription whose filters match.
    pub async fn emit(&self, event: Event) {
        let targets: Vec<mpsc::Sender<Event>> = self
            .subs
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.closed.load(Ordering::SeqCst))
            .filter(|s| s.filters.iter().any(|f| f.match_event(&event)))
            .map(|s| s.tx.clone())
            .collect();
        for tx in targets {
            let _ = tx.send(event.clone()).await;
        }
    }

    fn is_nip17(filters: &[Filter]) -> bool {
        filters.first().is_some_and(|f| {
            filter_json(f)["kinds"]
                .as_array()
                .is_some_and(|kinds| kinds.iter().any(|k| k.as_u64() == Some(1059)))
        })
    }
}

#[async_trait]
impl RelayPool for MockRelayPool {
    async fn query(&self, filters: Vec<Filter>, _timeout: Duration) -> Result<Vec<Event>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(Error::Relay("scripted query failure".to_string()));
        }
        if Self::is_nip17(&filters) {
            self.nip17_queries.lock().unwrap().push(filters);
            Ok(self
                .nip17_pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        } else {
            self.nip04_queries.lock().unwrap().push(filters);
            Ok(self
                .nip04_pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }
    }

    async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(64);
        let closed = Arc::new(AtomicBool::new(false));
        let id = self.sub_counter.fetch_add(1, Ordering::SeqCst);
        self.subs.lock().unwrap().push(LiveSub {
            filters,
            tx,
            closed: closed.clone(),
        });
        let closer: Unsubscribe = Box::new(move || closed.store(true, Ordering::SeqCst));
        Ok(Subscription::new(format!("mock-{}", id), rx, Some(closer)))
    }

    async fn publish(&self, event: Event) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(Error::Publish("scripted publish failure".to_string()));
        }
        self.published.lock().unwrap().push(event);
        Ok(())
    }
}

/// Relay-JSON view of a filter, for asserting on `since` / `kinds` / tags.
pub fn filter_json(filter: &Filter) -> serde_json::Value {
    serde_json::to_value(filter).unwrap()
}

/// A signed kind-4 event from `sender` to `recipient`.
pub fn signed_dm(sender: &Keys, recipient: &PublicKey, plaintext: &str, created_at: u64) -> Event {
    let content = nip04::encrypt(sender.secret_key(), recipient, plaintext).unwrap();
    let tags = vec![Tag::parse(&["p".to_string(), recipient.to_hex()]).unwrap()];
    EventBuilder::new(Kind::from(4), &content, tags)
        .custom_created_at(Timestamp::from(created_at))
        .to_unsigned_event(sender.public_key())
        .sign(sender)
        .unwrap()
}

/// An unsigned rumor with a computed id.
pub fn rumor(
    author: PublicKey,
    kind: u16,
    content: &str,
    created_at: u64,
    tags: Vec<Vec<String>>,
) -> UnsignedEvent {
    let parsed_tags: Vec<Tag> = tags.iter().map(|tag| Tag::parse(tag).unwrap()).collect();
    let mut rumor = EventBuilder::new(Kind::from(kind), content, parsed_tags)
        .custom_created_at(Timestamp::from(created_at))
        .to_unsigned_event(author);
    rumor.ensure_id();
    rumor
}

/// Seal `rumor` with `seal_keys` and wrap it for `reader` under a fresh
/// ephemeral key, pinning the wrap's (fuzzable) outer timestamp.
pub fn gift_wrap(
    seal_keys: &Keys,
    reader: &PublicKey,
    rumor: &UnsignedEvent,
    outer_created_at: u64,
) -> Event {
    let rumor_json = serde_json::to_string(rumor).unwrap();
    let seal_content = nip44::encrypt(
        seal_keys.secret_key(),
        reader,
        rumor_json,
        nip44::Version::V2,
    )
    .unwrap();
    let seal = EventBuilder::new(Kind::from(13), &seal_content, Vec::new())
        .custom_created_at(rumor.created_at)
        .to_unsigned_event(seal_keys.public_key())
        .sign(seal_keys)
        .unwrap();

    let wrap_keys = Keys::generate();
    let wrap_content = nip44::encrypt(
        wrap_keys.secret_key(),
        reader,
        serde_json::to_string(&seal).unwrap(),
        nip44::Version::V2,
    )
    .unwrap();
    let tags = vec![Tag::parse(&["p".to_string(), reader.to_hex()]).unwrap()];
    EventBuilder::new(Kind::from(1059), &wrap_content, tags)
        .custom_created_at(Timestamp::from(outer_created_at))
        .to_unsigned_event(wrap_keys.public_key())
        .sign(&wrap_keys)
        .unwrap()
}
