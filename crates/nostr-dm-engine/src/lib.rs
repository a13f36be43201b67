//! Client-side encrypted direct-message engine for Nostr.
//!
//! Maintains a consistent decrypted view of every one-to-one conversation a
//! user participates in, across the legacy NIP-04 kind-4 scheme and the
//! NIP-17 gift-wrap scheme, with an encrypted local cache, bounded relay
//! backfill, live subscriptions, and an optimistic send path.
//!
//! The relay pool, the signer, and the storage backend are seams
//! ([`RelayPool`], [`Signer`], [`StorageAdapter`]); everything else lives
//! here.

mod cache;
mod decode;
mod engine;
mod error;
mod fetch;
mod file_storage;
mod persist;
mod reducer;
mod relay;
mod send;
mod signer;
mod storage;
mod subscription;
mod types;

pub use cache::CacheStore;
pub use decode::{decode_nip04, decode_nip17, Decoded};
pub use engine::{DmEngine, EngineConfig, EngineState, LoadPhase};
pub use error::{Error, Result};
pub use fetch::{fetch_nip04_history, fetch_nip17_history, FetchOutcome};
pub use file_storage::FileStorageAdapter;
pub use persist::PersistScheduler;
pub use reducer::Reducer;
pub use relay::{RelayPool, Subscription, Unsubscribe};
pub use send::{build_gift_wraps, build_nip04_event, compose_text, imeta_tags, SendParams};
pub use signer::{LocalSigner, Signer};
pub use storage::{InMemoryStorage, StorageAdapter};
pub use subscription::{EventHandler, SubscriptionManager};
pub use types::*;
