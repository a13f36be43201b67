use crate::{
    RelayPool, DM_KIND, FETCH_BATCH_SIZE, FETCH_SCAN_CAP, GIFT_WRAP_FUZZ_SECONDS,
    GIFT_WRAP_KIND, NIP04_FETCH_TIMEOUT, NIP17_FETCH_TIMEOUT,
};
use nostr::{Event, Filter, Kind, PublicKey, Timestamp};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Result of one backfill sweep.
///
/// `batches_ok` counts queries that completed; when it is zero the sweep
/// failed before touching the relay and the caller must not advance its
/// watermark.
pub struct FetchOutcome {
    pub events: Vec<Event>,
    pub newest: Option<u64>,
    pub batches_ok: usize,
}

/// Backfill kind-4 history with paired to-me / from-me filters.
///
/// Loops until a batch comes back short, empty, or the scan cap is reached.
/// Transport errors break the loop without failing the sweep.
pub async fn fetch_nip04_history(
    pool: &dyn RelayPool,
    user: &PublicKey,
    since: Option<u64>,
    mut on_progress: impl FnMut(usize),
) -> FetchOutcome {
    let mut cursor = since;
    let mut seen: HashSet<String> = HashSet::new();
    let mut events: Vec<Event> = Vec::new();
    let mut batches_ok = 0;

    loop {
        let mut to_me = Filter::new()
            .kind(Kind::from(DM_KIND))
            .pubkey(*user)
            .limit(FETCH_BATCH_SIZE);
        let mut from_me = Filter::new()
            .kind(Kind::from(DM_KIND))
            .author(*user)
            .limit(FETCH_BATCH_SIZE);
        if let Some(s) = cursor {
            to_me = to_me.since(Timestamp::from(s));
            from_me = from_me.since(Timestamp::from(s));
        }

        let batch = match pool
            .query(vec![to_me, from_me], NIP04_FETCH_TIMEOUT)
            .await
        {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "NIP-04 backfill query failed");
                break;
            }
        };
        batches_ok += 1;

        if batch.is_empty() {
            break;
        }

        let batch_len = batch.len();

        // Next `since`: the older of the two filter halves' oldest events.
        let oldest_to_me = batch
            .iter()
            .filter(|e| references_pubkey(e, user))
            .map(|e| e.created_at.as_u64())
            .min();
        let oldest_from_me = batch
            .iter()
            .filter(|e| e.pubkey == *user)
            .map(|e| e.created_at.as_u64())
            .min();
        let next_cursor = match (oldest_to_me, oldest_from_me) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        for event in batch {
            if is_valid_nip04(&event) && seen.insert(event.id.to_hex()) {
                events.push(event);
            }
        }
        on_progress(events.len());

        if batch_len < FETCH_BATCH_SIZE {
            break;
        }
        if events.len() >= FETCH_SCAN_CAP {
            warn!(scanned = events.len(), "NIP-04 backfill hit the scan cap");
            break;
        }

        cursor = next_cursor.or(cursor);
    }

    let newest = events.iter().map(|e| e.created_at.as_u64()).max();
    debug!(count = events.len(), batches = batches_ok, "NIP-04 backfill done");
    FetchOutcome {
        events,
        newest,
        batches_ok,
    }
}

/// Backfill kind-1059 gift wraps addressed to the user.
///
/// Wrap timestamps are fuzzed within +/- 2 days, so the effective `since` is
/// pushed back by the fuzz window; the id-level dedup downstream absorbs the
/// overlap.
pub async fn fetch_nip17_history(
    pool: &dyn RelayPool,
    user: &PublicKey,
    since: Option<u64>,
    mut on_progress: impl FnMut(usize),
) -> FetchOutcome {
    let mut cursor = since.map(|s| s.saturating_sub(GIFT_WRAP_FUZZ_SECONDS));
    let mut seen: HashSet<String> = HashSet::new();
    let mut events: Vec<Event> = Vec::new();
    let mut batches_ok = 0;

    loop {
        let mut filter = Filter::new()
            .kind(Kind::from(GIFT_WRAP_KIND))
            .pubkey(*user)
            .limit(FETCH_BATCH_SIZE);
        if let Some(s) = cursor {
            filter = filter.since(Timestamp::from(s));
        }

        let batch = match pool.query(vec![filter], NIP17_FETCH_TIMEOUT).await {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "NIP-17 backfill query failed");
                break;
            }
        };
        batches_ok += 1;

        if batch.is_empty() {
            break;
        }

        let batch_len = batch.len();
        let next_cursor = batch.iter().map(|e| e.created_at.as_u64()).min();

        for event in batch {
            if seen.insert(event.id.to_hex()) {
                events.push(event);
            }
        }
        on_progress(events.len());

        if batch_len < FETCH_BATCH_SIZE {
            break;
        }
        if events.len() >= FETCH_SCAN_CAP {
            warn!(scanned = events.len(), "NIP-17 backfill hit the scan cap");
            break;
        }

        cursor = next_cursor.or(cursor);
    }

    let newest = events.iter().map(|e| e.created_at.as_u64()).max();
    debug!(count = events.len(), batches = batches_ok, "NIP-17 backfill done");
    FetchOutcome {
        events,
        newest,
        batches_ok,
    }
}

fn is_valid_nip04(event: &Event) -> bool {
    event.kind.as_u16() == DM_KIND
        && !event.content.is_empty()
        && event
            .tags
            .iter()
            .any(|t| t.as_slice().first().map(|s| s.as_str()) == Some("p"))
}

fn references_pubkey(event: &Event, pubkey: &PublicKey) -> bool {
    let hex = pubkey.to_hex();
    event.tags.iter().any(|t| {
        let v = t.as_slice();
        v.first().map(|s| s.as_str()) == Some("p") && v.get(1).map(|s| s.as_str()) == Some(hex.as_str())
    })
}
