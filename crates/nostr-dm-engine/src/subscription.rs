use crate::{
    now_seconds, LastSync, Protocol, RelayPool, Result, Unsubscribe, DM_KIND,
    GIFT_WRAP_FUZZ_SECONDS, GIFT_WRAP_KIND, NIP04_SUBSCRIPTION_OVERLAP_SECONDS,
};
use nostr::{Event, Filter, Kind, PublicKey, Timestamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

struct LiveSubscription {
    unsubscribe: Option<Unsubscribe>,
    pump: JoinHandle<()>,
}

impl LiveSubscription {
    fn close(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
        self.pump.abort();
    }
}

/// Holds at most one live relay subscription per protocol and routes every
/// yielded event into the supplied handler. Restarting a protocol closes the
/// previous handle first; an error on one protocol never tears down the
/// other.
pub struct SubscriptionManager {
    pool: Arc<dyn RelayPool>,
    user: PublicKey,
    nip04: Mutex<Option<LiveSubscription>>,
    nip17: Mutex<Option<LiveSubscription>>,
    nip04_connected: Arc<AtomicBool>,
    nip17_connected: Arc<AtomicBool>,
}

impl SubscriptionManager {
    pub fn new(pool: Arc<dyn RelayPool>, user: PublicKey) -> Self {
        Self {
            pool,
            user,
            nip04: Mutex::new(None),
            nip17: Mutex::new(None),
            nip04_connected: Arc::new(AtomicBool::new(false)),
            nip17_connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open (or replace) the live subscription for a protocol.
    pub async fn start(
        &self,
        protocol: Protocol,
        since: Option<u64>,
        last_sync: LastSync,
        handler: EventHandler,
    ) -> Result<()> {
        self.stop(protocol);

        let since = subscription_since(protocol, since, last_sync);
        let filters = match protocol {
            Protocol::Nip04 => vec![
                Filter::new()
                    .kind(Kind::from(DM_KIND))
                    .pubkey(self.user)
                    .since(Timestamp::from(since)),
                Filter::new()
                    .kind(Kind::from(DM_KIND))
                    .author(self.user)
                    .since(Timestamp::from(since)),
            ],
            Protocol::Nip17 => vec![Filter::new()
                .kind(Kind::from(GIFT_WRAP_KIND))
                .pubkey(self.user)
                .since(Timestamp::from(since))],
        };

        let subscription = match self.pool.subscribe(filters).await {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(protocol = protocol.label(), error = %err, "subscription open failed");
                self.connected_flag(protocol).store(false, Ordering::SeqCst);
                return Err(err);
            }
        };

        debug!(protocol = protocol.label(), since, id = %subscription.id, "subscription open");
        let connected = self.connected_flag(protocol).clone();
        connected.store(true, Ordering::SeqCst);

        let (mut events, unsubscribe) = subscription.split();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                handler(event);
            }
            // Stream ended without an explicit stop; reconnecting is the
            // relay pool's business, not ours.
            warn!("subscription stream closed");
            connected.store(false, Ordering::SeqCst);
        });

        let replaced = self
            .slot(protocol)
            .lock()
            .unwrap()
            .replace(LiveSubscription { unsubscribe, pump });
        if let Some(previous) = replaced {
            previous.close();
        }

        Ok(())
    }

    pub fn stop(&self, protocol: Protocol) {
        if let Some(live) = self.slot(protocol).lock().unwrap().take() {
            debug!(protocol = protocol.label(), "subscription closed");
            live.close();
        }
        self.connected_flag(protocol).store(false, Ordering::SeqCst);
    }

    pub fn stop_all(&self) {
        self.stop(Protocol::Nip04);
        self.stop(Protocol::Nip17);
    }

    pub fn is_connected(&self, protocol: Protocol) -> bool {
        self.connected_flag(protocol).load(Ordering::SeqCst)
    }

    fn slot(&self, protocol: Protocol) -> &Mutex<Option<LiveSubscription>> {
        match protocol {
            Protocol::Nip04 => &self.nip04,
            Protocol::Nip17 => &self.nip17,
        }
    }

    fn connected_flag(&self, protocol: Protocol) -> &Arc<AtomicBool> {
        match protocol {
            Protocol::Nip04 => &self.nip04_connected,
            Protocol::Nip17 => &self.nip17_connected,
        }
    }
}

/// Lower bound for a live subscription.
///
/// Falls back from the explicit argument to the protocol's watermark (with a
/// small redelivery overlap) to the current time; NIP-17 additionally backs
/// off by the gift-wrap fuzz window.
pub(crate) fn subscription_since(
    protocol: Protocol,
    since: Option<u64>,
    last_sync: LastSync,
) -> u64 {
    let watermark = match protocol {
        Protocol::Nip04 => last_sync.nip04,
        Protocol::Nip17 => last_sync.nip17,
    };
    let base = since
        .or_else(|| watermark.map(|t| t.saturating_sub(NIP04_SUBSCRIPTION_OVERLAP_SECONDS)))
        .unwrap_or_else(now_seconds);
    match protocol {
        Protocol::Nip04 => base,
        Protocol::Nip17 => base.saturating_sub(GIFT_WRAP_FUZZ_SECONDS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nip04_since_prefers_explicit_argument() {
        let last_sync = LastSync {
            nip04: Some(500),
            nip17: None,
        };
        assert_eq!(
            subscription_since(Protocol::Nip04, Some(1000), last_sync),
            1000
        );
    }

    #[test]
    fn nip04_since_overlaps_watermark() {
        let last_sync = LastSync {
            nip04: Some(500),
            nip17: None,
        };
        assert_eq!(subscription_since(Protocol::Nip04, None, last_sync), 490);
    }

    #[test]
    fn nip17_since_backs_off_by_fuzz_window() {
        let last_sync = LastSync {
            nip04: None,
            nip17: Some(1_700_100_000),
        };
        assert_eq!(
            subscription_since(Protocol::Nip17, Some(1_700_100_000), last_sync),
            1_700_100_000 - 172_800
        );
        assert_eq!(
            subscription_since(Protocol::Nip17, None, last_sync),
            1_700_100_000 - 10 - 172_800
        );
    }

    #[test]
    fn missing_watermark_falls_back_to_now() {
        let since = subscription_since(Protocol::Nip04, None, LastSync::default());
        assert!(since >= now_seconds().saturating_sub(2));
    }
}
