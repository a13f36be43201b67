use crate::{
    now_seconds, CacheDocument, ConversationSummary, Decoded, DecryptedMessage, LastSync,
    Participant, Protocol, JUST_ARRIVED_WINDOW_SECONDS, OPTIMISTIC_MATCH_WINDOW_SECONDS,
};
use nostr::PublicKey;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct ReducerState {
    participants: HashMap<PublicKey, Participant>,
    last_sync: LastSync,
}

/// Sole owner of the conversation map and last-sync watermarks.
///
/// Every ingestion path (cache load, backfill, live subscription, optimistic
/// send) funnels through here and dedupes by event id, so redelivery is
/// harmless. Each operation is one atomic transformation under the state
/// lock; callers never read-modify-write across await points.
pub struct Reducer {
    user: PublicKey,
    mark_protocol_on_errored: bool,
    state: Mutex<ReducerState>,
}

impl Reducer {
    pub fn new(user: PublicKey, mark_protocol_on_errored: bool) -> Self {
        Self {
            user,
            mark_protocol_on_errored,
            state: Mutex::new(ReducerState::default()),
        }
    }

    /// Merge a decoded backfill batch. Returns how many messages were new.
    pub fn merge(&self, batch: Vec<Decoded>) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut added = 0;
        for decoded in batch {
            if self.ingest(&mut state, decoded.message, decoded.partner, decoded.protocol) {
                added += 1;
            }
        }
        added
    }

    /// Ingest one live message. Returns whether the map changed.
    pub fn add_single(
        &self,
        message: DecryptedMessage,
        partner: PublicKey,
        protocol: Protocol,
    ) -> bool {
        let mut state = self.state.lock().unwrap();
        self.ingest(&mut state, message, partner, protocol)
    }

    /// Optimistic placeholders take the same path as real messages.
    pub fn apply_optimistic(
        &self,
        message: DecryptedMessage,
        partner: PublicKey,
        protocol: Protocol,
    ) -> bool {
        self.add_single(message, partner, protocol)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.participants.clear();
        state.last_sync = LastSync::default();
    }

    /// Populate from a cache document. Stored content is plaintext, so each
    /// message's decrypted view is copied from it (unless it was persisted in
    /// an errored state).
    pub fn load_cached(&self, doc: CacheDocument) {
        let mut state = self.state.lock().unwrap();
        for (peer_hex, mut participant) in doc.participants {
            let Ok(peer) = PublicKey::from_hex(&peer_hex) else {
                debug!(peer = %peer_hex, "skipping cached participant with invalid pubkey");
                continue;
            };
            if peer == self.user {
                continue;
            }
            for message in &mut participant.messages {
                if message.error.is_none() {
                    message.decrypted_content = Some(message.content.clone());
                }
            }
            participant.messages.sort_by_key(|m| m.created_at);
            participant.last_activity = participant
                .messages
                .last()
                .map(|m| m.created_at)
                .unwrap_or(participant.last_activity);
            state.participants.insert(peer, participant);
        }
        state.last_sync = doc.last_sync;
    }

    pub fn last_sync(&self) -> LastSync {
        self.state.lock().unwrap().last_sync
    }

    /// Advance a protocol watermark. Never moves backwards within a session.
    pub fn set_last_sync(&self, protocol: Protocol, timestamp: u64) {
        let mut state = self.state.lock().unwrap();
        let slot = match protocol {
            Protocol::Nip04 => &mut state.last_sync.nip04,
            Protocol::Nip17 => &mut state.last_sync.nip17,
        };
        *slot = Some(slot.map_or(timestamp, |current| current.max(timestamp)));
    }

    pub fn participants(&self) -> HashMap<PublicKey, Participant> {
        self.state.lock().unwrap().participants.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().participants.is_empty()
    }

    /// Snapshot for persistence: plaintext moves into `content` so the cache
    /// document can be sealed as a single blob.
    pub fn to_cache_document(&self) -> CacheDocument {
        let state = self.state.lock().unwrap();
        let participants = state
            .participants
            .iter()
            .map(|(peer, participant)| {
                let mut stored = participant.clone();
                for message in &mut stored.messages {
                    if let Some(plaintext) = message.decrypted_content.take() {
                        message.content = plaintext;
                    }
                    message.seal = None;
                }
                (peer.to_hex(), stored)
            })
            .collect();
        CacheDocument {
            participants,
            last_sync: state.last_sync,
        }
    }

    /// Derived conversation list, most recent activity first.
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        let state = self.state.lock().unwrap();
        let mut summaries: Vec<ConversationSummary> = state
            .participants
            .iter()
            .map(|(peer, participant)| {
                let is_known = participant
                    .messages
                    .iter()
                    .any(|m| m.pubkey == self.user);
                let last_message = participant.last_message();
                ConversationSummary {
                    pubkey: *peer,
                    last_message: last_message.cloned(),
                    last_activity: participant.last_activity,
                    has_nip04: participant.has_nip04,
                    has_nip17: participant.has_nip17,
                    is_known,
                    is_request: !is_known,
                    last_message_from_user: last_message
                        .map(|m| m.pubkey == self.user)
                        .unwrap_or(false),
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        summaries
    }

    fn ingest(
        &self,
        state: &mut ReducerState,
        mut message: DecryptedMessage,
        partner: PublicKey,
        protocol: Protocol,
    ) -> bool {
        if partner == self.user {
            debug!("refusing to bucket a conversation under the user's own pubkey");
            return false;
        }

        if message.client_first_seen.is_none() && !message.is_sending {
            let now = now_seconds();
            if now.saturating_sub(message.created_at) < JUST_ARRIVED_WINDOW_SECONDS {
                message.client_first_seen = Some(now);
            }
        }

        let bucket = state.participants.entry(partner).or_default();

        if bucket.messages.iter().any(|m| m.id == message.id) {
            return false;
        }

        let errored = message.error.is_some();

        // A real event may confirm a pending optimistic placeholder: same
        // author, same plaintext, within the matching window. The
        // placeholder's created_at and client_first_seen are kept so the
        // message does not jump position in the UI.
        let placeholder_index = if message.is_sending {
            None
        } else {
            bucket.messages.iter().position(|m| {
                m.is_sending
                    && m.pubkey == message.pubkey
                    && m.decrypted_content == message.decrypted_content
                    && m.created_at.abs_diff(message.created_at)
                        <= OPTIMISTIC_MATCH_WINDOW_SECONDS
            })
        };

        match placeholder_index {
            Some(index) => {
                let placeholder = &bucket.messages[index];
                message.created_at = placeholder.created_at;
                message.client_first_seen = placeholder.client_first_seen;
                bucket.messages[index] = message;
            }
            None => bucket.messages.push(message),
        }

        // Stable sort: on equal timestamps the existing message keeps its
        // place ahead of a later arrival.
        bucket.messages.sort_by_key(|m| m.created_at);
        bucket.last_activity = bucket.messages.last().map(|m| m.created_at).unwrap_or(0);

        if !errored || self.mark_protocol_on_errored {
            match protocol {
                Protocol::Nip04 => bucket.has_nip04 = true,
                Protocol::Nip17 => bucket.has_nip17 = true,
            }
        }

        true
    }
}
