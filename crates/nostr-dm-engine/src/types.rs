use nostr::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DM_KIND: u16 = 4;
pub const SEAL_KIND: u16 = 13;
pub const CHAT_KIND: u16 = 14;
pub const FILE_CHAT_KIND: u16 = 15;
pub const GIFT_WRAP_KIND: u16 = 1059;

pub const FETCH_BATCH_SIZE: usize = 1000;
pub const FETCH_SCAN_CAP: usize = 20_000;
pub const NIP04_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
pub const NIP17_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Gift wraps carry a `created_at` randomized within +/- 2 days of the real
/// send time. Every `since` used for NIP-17 backfill or subscription must be
/// pushed back by this much or fuzzed-backward wraps are missed.
pub const GIFT_WRAP_FUZZ_SECONDS: u64 = 2 * 24 * 60 * 60;
pub const NIP04_SUBSCRIPTION_OVERLAP_SECONDS: u64 = 10;

pub const OPTIMISTIC_MATCH_WINDOW_SECONDS: u64 = 30;
pub const JUST_ARRIVED_WINDOW_SECONDS: u64 = 5;
pub const CACHE_FLUSH_DEBOUNCE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Nip04,
    Nip17,
}

impl Protocol {
    pub fn label(&self) -> &'static str {
        match self {
            Protocol::Nip04 => "nip4",
            Protocol::Nip17 => "nip17",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProtocolMode {
    #[default]
    Both,
    Nip04Only,
    Nip17Only,
}

impl ProtocolMode {
    pub fn nip04_enabled(&self) -> bool {
        matches!(self, ProtocolMode::Both | ProtocolMode::Nip04Only)
    }

    pub fn nip17_enabled(&self) -> bool {
        matches!(self, ProtocolMode::Both | ProtocolMode::Nip17Only)
    }
}

/// Application view of a single direct message.
///
/// Nostr event fields are kept verbatim (for NIP-17 the outer wrap's content
/// blob is preserved in `content` while the rumor provides everything else).
/// Exactly one of `decrypted_content` / `error` is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptedMessage {
    pub id: String,
    pub pubkey: PublicKey,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,

    #[serde(
        rename = "decryptedContent",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub decrypted_content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,

    /// Set on locally constructed placeholders until the published event
    /// echoes back through a subscription. Never persisted.
    #[serde(skip)]
    pub is_sending: bool,

    /// Wall-clock stamp applied when a message arrives less than
    /// [`JUST_ARRIVED_WINDOW_SECONDS`] after its `created_at`. UI animation
    /// hint only; never persisted, never affects ordering.
    #[serde(skip)]
    pub client_first_seen: Option<u64>,

    /// The kind-13 seal a NIP-17 message was unwrapped from.
    #[serde(skip)]
    pub seal: Option<Box<nostr::Event>>,
}

impl DecryptedMessage {
    /// Build from a signed event, leaving the decryption outcome unset.
    pub fn from_event(event: &nostr::Event) -> Self {
        Self {
            id: event.id.to_hex(),
            pubkey: event.pubkey,
            created_at: event.created_at.as_u64(),
            kind: event.kind.as_u16(),
            tags: tags_to_vec(&event.tags),
            content: event.content.clone(),
            sig: event.sig.to_string(),
            decrypted_content: None,
            error: None,
            is_sending: false,
            client_first_seen: None,
            seal: None,
        }
    }
}

/// One peer conversation bucket. Also the persisted per-peer shape of the
/// cache document (`is_sending` / `client_first_seen` / `seal` never reach
/// disk).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Participant {
    #[serde(default)]
    pub messages: Vec<DecryptedMessage>,

    #[serde(rename = "lastActivity", default)]
    pub last_activity: u64,

    #[serde(rename = "hasNIP4", default)]
    pub has_nip04: bool,

    #[serde(rename = "hasNIP17", default)]
    pub has_nip17: bool,
}

impl Participant {
    pub fn last_message(&self) -> Option<&DecryptedMessage> {
        self.messages.last()
    }
}

/// Per-protocol high-water timestamps. Serialized field names match the
/// on-disk cache document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSync {
    #[serde(rename = "nip4", default)]
    pub nip04: Option<u64>,

    #[serde(default)]
    pub nip17: Option<u64>,
}

/// Persisted snapshot: one document per user, keyed by peer pubkey hex.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheDocument {
    #[serde(default)]
    pub participants: HashMap<String, Participant>,

    #[serde(rename = "lastSync", default)]
    pub last_sync: LastSync,
}

/// Prevalidated upload record handed to the send pipeline. `tags` carries
/// integrity hashes as produced by the uploader, e.g. `["x", "<sha256>"]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub mime_type: String,
    pub size: u64,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
}

/// Derived conversation-list item, recomputed from the conversation map.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub pubkey: PublicKey,
    pub last_message: Option<DecryptedMessage>,
    pub last_activity: u64,
    #[serde(rename = "hasNIP4")]
    pub has_nip04: bool,
    #[serde(rename = "hasNIP17")]
    pub has_nip17: bool,
    /// The user has sent at least one message to this peer.
    pub is_known: bool,
    pub is_request: bool,
    pub last_message_from_user: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub nip04_scanned: usize,
    pub nip17_scanned: usize,
}

pub fn tags_to_vec(tags: &[nostr::Tag]) -> Vec<Vec<String>> {
    tags.iter().map(|t| t.clone().to_vec()).collect()
}

pub fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
