use crate::{CacheDocument, Result, Signer, StorageAdapter};
use nostr::PublicKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Envelope written when the signer can seal the document with NIP-44.
#[derive(Serialize, Deserialize)]
struct SealedEnvelope {
    encrypted: bool,
    data: String,
}

/// Per-user cache document store.
///
/// Messages inside the document carry plaintext content; the whole document
/// is sealed as one blob when a NIP-44 signer is available, so loading needs
/// a single decryption instead of one per message, and the at-rest form never
/// holds plaintext outside the envelope.
#[derive(Clone)]
pub struct CacheStore {
    storage: Arc<dyn StorageAdapter>,
}

impl CacheStore {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    /// Storage namespace for a hosting origin, so two applications sharing a
    /// machine do not collide.
    pub fn database_name(origin: &str) -> String {
        format!("dm-cache-{}", origin)
    }

    pub fn write(
        &self,
        user: &PublicKey,
        doc: &CacheDocument,
        signer: Option<&dyn Signer>,
    ) -> Result<()> {
        let json = serde_json::to_string(doc)?;

        let payload = match signer {
            Some(signer) if signer.supports_nip44() => {
                let data = signer.nip44_encrypt(user, &json)?;
                serde_json::to_string(&SealedEnvelope {
                    encrypted: true,
                    data,
                })?
            }
            // Backward compatibility path: store the document as-is.
            _ => json,
        };

        self.storage.put(&user.to_hex(), payload)
    }

    /// Returns `None` on miss and on any decrypt or parse failure, so the
    /// engine falls through to a relay-only backfill. Storage I/O errors
    /// still bubble up.
    pub fn read(
        &self,
        user: &PublicKey,
        signer: Option<&dyn Signer>,
    ) -> Result<Option<CacheDocument>> {
        let Some(raw) = self.storage.get(&user.to_hex())? else {
            return Ok(None);
        };

        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "discarding unparseable cache document");
                return Ok(None);
            }
        };

        if value.get("encrypted").and_then(|v| v.as_bool()) == Some(true) {
            let Some(data) = value.get("data").and_then(|v| v.as_str()) else {
                warn!("encrypted cache envelope is missing its data field");
                return Ok(None);
            };
            let Some(signer) = signer.filter(|s| s.supports_nip44()) else {
                warn!("cache document is encrypted but no NIP-44 signer is available");
                return Ok(None);
            };
            let json = match signer.nip44_decrypt(user, data) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to decrypt cache document");
                    return Ok(None);
                }
            };
            match serde_json::from_str(&json) {
                Ok(doc) => Ok(Some(doc)),
                Err(err) => {
                    warn!(error = %err, "decrypted cache document did not parse");
                    Ok(None)
                }
            }
        } else {
            match serde_json::from_value(value) {
                Ok(doc) => Ok(Some(doc)),
                Err(err) => {
                    debug!(error = %err, "plaintext cache document did not parse");
                    Ok(None)
                }
            }
        }
    }

    pub fn delete(&self, user: &PublicKey) -> Result<()> {
        self.storage.del(&user.to_hex())
    }
}
