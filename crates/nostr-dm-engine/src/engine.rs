use crate::{
    decode_nip04, decode_nip17, fetch_nip04_history, fetch_nip17_history, now_seconds,
    send::{build_gift_wraps, build_nip04_event, build_optimistic, compose_text, imeta_tags},
    CacheStore, ConversationSummary, Decoded, Error, EventHandler, LastSync, Participant,
    PersistScheduler, Protocol, ProtocolMode, Reducer, RelayPool, Result, ScanProgress,
    SendParams, Signer, StorageAdapter, SubscriptionManager, CACHE_FLUSH_DEBOUNCE,
};
use nostr::PublicKey;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadPhase {
    Idle,
    Cache,
    Relays,
    Subscriptions,
    Ready,
}

#[derive(Clone)]
pub struct EngineConfig {
    pub protocol_mode: ProtocolMode,
    /// Whether an inbound NIP-17 event that failed to decode still marks its
    /// conversation as a NIP-17 one (the historical behavior).
    pub mark_protocol_on_errored: bool,
    pub flush_debounce: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            protocol_mode: ProtocolMode::Both,
            mark_protocol_on_errored: true,
            flush_debounce: CACHE_FLUSH_DEBOUNCE,
        }
    }
}

/// Everything a UI needs to render, taken as one consistent snapshot.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub conversations: Vec<ConversationSummary>,
    #[serde(skip)]
    pub messages: HashMap<PublicKey, Participant>,
    pub is_loading: bool,
    pub loading_phase: LoadPhase,
    pub is_doing_initial_load: bool,
    pub last_sync: LastSync,
    #[serde(rename = "isNIP4Connected")]
    pub nip04_connected: bool,
    #[serde(rename = "isNIP17Connected")]
    pub nip17_connected: bool,
    pub protocol_mode: ProtocolMode,
    pub scan_progress: ScanProgress,
}

struct EngineInner {
    user: PublicKey,
    signer: Arc<dyn Signer>,
    pool: Arc<dyn RelayPool>,
    cache: CacheStore,
    reducer: Arc<Reducer>,
    subscriptions: SubscriptionManager,
    persist: PersistScheduler,
    config: EngineConfig,
    phase: Mutex<LoadPhase>,
    is_loading: AtomicBool,
    initial_load_done: AtomicBool,
    scan: Mutex<ScanProgress>,
    relay_url: Mutex<Option<String>>,
    background: Mutex<Option<JoinHandle<()>>>,
}

/// Session-scoped direct-message engine.
///
/// Drives `IDLE -> CACHE -> READY` synchronously so cached history renders
/// immediately, then backfills from relays and opens live subscriptions in
/// the background. One instance per authenticated user; account changes mean
/// dropping the engine and building a new one.
#[derive(Clone)]
pub struct DmEngine {
    inner: Arc<EngineInner>,
}

impl DmEngine {
    pub fn new(
        signer: Arc<dyn Signer>,
        pool: Arc<dyn RelayPool>,
        storage: Arc<dyn StorageAdapter>,
        config: EngineConfig,
    ) -> Self {
        let user = signer.public_key();
        let cache = CacheStore::new(storage);
        let reducer = Arc::new(Reducer::new(user, config.mark_protocol_on_errored));
        let subscriptions = SubscriptionManager::new(pool.clone(), user);
        let persist = PersistScheduler::new(
            cache.clone(),
            signer.clone(),
            user,
            reducer.clone(),
            config.flush_debounce,
        );

        Self {
            inner: Arc::new(EngineInner {
                user,
                signer,
                pool,
                cache,
                reducer,
                subscriptions,
                persist,
                config,
                phase: Mutex::new(LoadPhase::Idle),
                is_loading: AtomicBool::new(false),
                initial_load_done: AtomicBool::new(false),
                scan: Mutex::new(ScanProgress::default()),
                relay_url: Mutex::new(None),
                background: Mutex::new(None),
            }),
        }
    }

    pub fn user(&self) -> PublicKey {
        self.inner.user
    }

    /// Run the initial load. Returns once cached history is available; relay
    /// sync and subscriptions continue on a background task.
    pub async fn start(&self) {
        let inner = &self.inner;
        if inner.initial_load_done.load(Ordering::SeqCst) {
            return;
        }
        if inner.is_loading.swap(true, Ordering::SeqCst) {
            // A concurrent start is already driving the sequence.
            return;
        }

        inner.set_phase(LoadPhase::Cache);
        match inner.cache.read(&inner.user, Some(inner.signer.as_ref())) {
            Ok(Some(doc)) => {
                inner.reducer.load_cached(doc);
                info!(last_sync = ?inner.reducer.last_sync(), "conversations loaded from cache");
            }
            Ok(None) => debug!("no usable cache document, deferring to relay backfill"),
            Err(err) => warn!(error = %err, "cache read failed, continuing in memory"),
        }

        // Cached history is now renderable; flag order matters so a
        // dependency-driven re-entry cannot retrigger the load.
        inner.set_phase(LoadPhase::Ready);
        inner.initial_load_done.store(true, Ordering::SeqCst);
        inner.is_loading.store(false, Ordering::SeqCst);

        let task_inner = Arc::clone(inner);
        let handle = tokio::spawn(async move {
            sync_and_subscribe(task_inner).await;
        });
        *inner.background.lock().unwrap() = Some(handle);
    }

    /// Await the background relay sync spawned by the last `start`.
    pub async fn wait_for_sync(&self) {
        let handle = self.inner.background.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Optimistically record an outgoing message, then encrypt and publish
    /// the wire events. On failure the placeholder stays marked as sending;
    /// the caller surfaces the error.
    pub async fn send_message(&self, params: SendParams) -> Result<()> {
        let inner = &self.inner;
        match params.protocol {
            Protocol::Nip04 if !inner.config.protocol_mode.nip04_enabled() => {
                return Err(Error::ProtocolDisabled("nip04"));
            }
            Protocol::Nip17 if !inner.config.protocol_mode.nip17_enabled() => {
                return Err(Error::ProtocolDisabled("nip17"));
            }
            _ => {}
        }
        if params.recipient == inner.user {
            return Err(Error::InvalidEvent(
                "cannot start a conversation with yourself".to_string(),
            ));
        }

        let now = now_seconds();
        let text = compose_text(&params.content, &params.attachments);
        let imeta = imeta_tags(&params.attachments);

        let optimistic = build_optimistic(
            inner.user,
            &params.recipient,
            &text,
            &imeta,
            params.protocol,
            now,
        );
        inner
            .reducer
            .apply_optimistic(optimistic, params.recipient, params.protocol);
        inner.persist.schedule_debounced();

        match params.protocol {
            Protocol::Nip04 => {
                let event = build_nip04_event(
                    inner.signer.as_ref(),
                    &params.recipient,
                    &text,
                    &imeta,
                    now,
                )?;
                inner.pool.publish(event).await?;
            }
            Protocol::Nip17 => {
                let (recipient_wrap, self_wrap) = build_gift_wraps(
                    inner.signer.as_ref(),
                    &params.recipient,
                    &text,
                    &imeta,
                    now,
                )?;
                let (sent, echoed) = tokio::join!(
                    inner.pool.publish(recipient_wrap),
                    inner.pool.publish(self_wrap)
                );
                sent?;
                echoed?;
            }
        }

        debug!(protocol = params.protocol.label(), "message published");
        Ok(())
    }

    /// Tear everything down, wipe the cached document, and rebuild from the
    /// relays. Used on relay changes and explicit refresh gestures.
    pub async fn clear_cache_and_refetch(&self) {
        let inner = &self.inner;
        info!("clearing cache and refetching");

        inner.subscriptions.stop_all();
        if let Some(handle) = inner.background.lock().unwrap().take() {
            handle.abort();
        }
        if let Err(err) = inner.cache.delete(&inner.user) {
            warn!(error = %err, "failed to delete cache document");
        }
        inner.reducer.clear();
        *inner.scan.lock().unwrap() = ScanProgress::default();
        inner.set_phase(LoadPhase::Idle);
        inner.initial_load_done.store(false, Ordering::SeqCst);
        inner.is_loading.store(false, Ordering::SeqCst);

        self.start().await;
    }

    /// Record the effective relay URL; a change from a previously observed
    /// value forces a full cache clear and refetch.
    pub async fn set_relay_url(&self, url: &str) {
        let changed = {
            let mut current = self.inner.relay_url.lock().unwrap();
            let changed = matches!(current.as_deref(), Some(previous) if previous != url);
            *current = Some(url.to_string());
            changed
        };
        if changed {
            info!(url, "relay url changed");
            self.clear_cache_and_refetch().await;
        }
    }

    /// Close subscriptions, cancel background work, and flush once.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.subscriptions.stop_all();
        if let Some(handle) = inner.background.lock().unwrap().take() {
            handle.abort();
        }
        inner.persist.flush_now();
        debug!("engine shut down");
    }

    pub fn snapshot(&self) -> EngineState {
        let inner = &self.inner;
        EngineState {
            conversations: inner.reducer.summaries(),
            messages: inner.reducer.participants(),
            is_loading: inner.is_loading.load(Ordering::SeqCst),
            loading_phase: *inner.phase.lock().unwrap(),
            is_doing_initial_load: !inner.initial_load_done.load(Ordering::SeqCst),
            last_sync: inner.reducer.last_sync(),
            nip04_connected: inner.subscriptions.is_connected(Protocol::Nip04),
            nip17_connected: inner.subscriptions.is_connected(Protocol::Nip17),
            protocol_mode: inner.config.protocol_mode,
            scan_progress: *inner.scan.lock().unwrap(),
        }
    }
}

impl EngineInner {
    fn set_phase(&self, phase: LoadPhase) {
        *self.phase.lock().unwrap() = phase;
        debug!(?phase, "load phase");
    }

    fn ingest_live(&self, protocol: Protocol, event: &nostr::Event) {
        let decoded = match protocol {
            Protocol::Nip04 => decode_nip04(event, &self.user, self.signer.as_ref()),
            Protocol::Nip17 => Some(decode_nip17(event, &self.user, self.signer.as_ref())),
        };
        let Some(Decoded {
            message, partner, ..
        }) = decoded
        else {
            return;
        };
        if self.reducer.add_single(message, partner, protocol) {
            self.persist.schedule_debounced();
        }
    }
}

fn live_handler(inner: &Arc<EngineInner>, protocol: Protocol) -> EventHandler {
    let inner = Arc::clone(inner);
    Arc::new(move |event| inner.ingest_live(protocol, &event))
}

/// Background half of the initial load: parallel backfills, then live
/// subscriptions. Every failure degrades; the engine always lands in READY.
async fn sync_and_subscribe(inner: Arc<EngineInner>) {
    inner.set_phase(LoadPhase::Relays);
    let last_sync = inner.reducer.last_sync();
    let mode = inner.config.protocol_mode;

    let nip04_scan = Arc::clone(&inner);
    let nip17_scan = Arc::clone(&inner);
    let (nip04_outcome, nip17_outcome) = tokio::join!(
        async {
            if !mode.nip04_enabled() {
                return None;
            }
            Some(
                fetch_nip04_history(
                    inner.pool.as_ref(),
                    &inner.user,
                    last_sync.nip04,
                    move |scanned| nip04_scan.scan.lock().unwrap().nip04_scanned = scanned,
                )
                .await,
            )
        },
        async {
            if !mode.nip17_enabled() {
                return None;
            }
            Some(
                fetch_nip17_history(
                    inner.pool.as_ref(),
                    &inner.user,
                    last_sync.nip17,
                    move |scanned| nip17_scan.scan.lock().unwrap().nip17_scanned = scanned,
                )
                .await,
            )
        },
    );

    let mut new_messages = 0;
    let mut newest_nip04 = None;
    let mut newest_nip17 = None;

    if let Some(outcome) = nip04_outcome {
        let batch: Vec<Decoded> = outcome
            .events
            .iter()
            .filter_map(|event| decode_nip04(event, &inner.user, inner.signer.as_ref()))
            .collect();
        new_messages += inner.reducer.merge(batch);
        if outcome.batches_ok > 0 {
            // The relay has been asked, even if it had nothing: record it so
            // the next session does not rescan the same empty range.
            inner.reducer.set_last_sync(Protocol::Nip04, now_seconds());
        }
        newest_nip04 = outcome.newest;
    }

    if let Some(outcome) = nip17_outcome {
        let batch: Vec<Decoded> = outcome
            .events
            .iter()
            .map(|event| decode_nip17(event, &inner.user, inner.signer.as_ref()))
            .collect();
        new_messages += inner.reducer.merge(batch);
        if outcome.batches_ok > 0 {
            inner.reducer.set_last_sync(Protocol::Nip17, now_seconds());
        }
        newest_nip17 = outcome.newest;
    }

    if new_messages > 0 {
        info!(new_messages, "relay backfill produced new messages");
        inner.persist.flush_now();
    }

    inner.set_phase(LoadPhase::Subscriptions);
    let last_sync = inner.reducer.last_sync();
    if mode.nip04_enabled() {
        if let Err(err) = inner
            .subscriptions
            .start(
                Protocol::Nip04,
                newest_nip04,
                last_sync,
                live_handler(&inner, Protocol::Nip04),
            )
            .await
        {
            warn!(error = %err, "NIP-04 subscription failed to open");
        }
    }
    if mode.nip17_enabled() {
        if let Err(err) = inner
            .subscriptions
            .start(
                Protocol::Nip17,
                newest_nip17,
                last_sync,
                live_handler(&inner, Protocol::Nip17),
            )
            .await
        {
            warn!(error = %err, "NIP-17 subscription failed to open");
        }
    }

    inner.set_phase(LoadPhase::Ready);
}
