use crate::{Error, Result};
use nostr::nips::{nip04, nip44};
use nostr::{Keys, PublicKey, UnsignedEvent};

/// Signing and encryption seam.
///
/// NIP-04 and NIP-44 support are optional per signer; callers probe the
/// `supports_*` methods and degrade to errored messages when a capability is
/// missing.
pub trait Signer: Send + Sync {
    fn public_key(&self) -> PublicKey;

    fn sign_event(&self, event: UnsignedEvent) -> Result<nostr::Event>;

    fn supports_nip04(&self) -> bool;

    fn supports_nip44(&self) -> bool;

    fn nip04_encrypt(&self, peer: &PublicKey, plaintext: &str) -> Result<String>;

    fn nip04_decrypt(&self, peer: &PublicKey, ciphertext: &str) -> Result<String>;

    fn nip44_encrypt(&self, peer: &PublicKey, plaintext: &str) -> Result<String>;

    fn nip44_decrypt(&self, peer: &PublicKey, payload: &str) -> Result<String>;
}

/// Signer backed by an in-process keypair.
#[derive(Clone)]
pub struct LocalSigner {
    keys: Keys,
}

impl LocalSigner {
    pub fn new(keys: Keys) -> Self {
        Self { keys }
    }

    pub fn generate() -> Self {
        Self::new(Keys::generate())
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }
}

impl Signer for LocalSigner {
    fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    fn sign_event(&self, mut event: UnsignedEvent) -> Result<nostr::Event> {
        event.ensure_id();
        event
            .sign(&self.keys)
            .map_err(|e| Error::InvalidEvent(e.to_string()))
    }

    fn supports_nip04(&self) -> bool {
        true
    }

    fn supports_nip44(&self) -> bool {
        true
    }

    fn nip04_encrypt(&self, peer: &PublicKey, plaintext: &str) -> Result<String> {
        Ok(nip04::encrypt(self.keys.secret_key(), peer, plaintext)?)
    }

    fn nip04_decrypt(&self, peer: &PublicKey, ciphertext: &str) -> Result<String> {
        Ok(nip04::decrypt(self.keys.secret_key(), peer, ciphertext)?)
    }

    fn nip44_encrypt(&self, peer: &PublicKey, plaintext: &str) -> Result<String> {
        Ok(nip44::encrypt(
            self.keys.secret_key(),
            peer,
            plaintext,
            nip44::Version::V2,
        )?)
    }

    fn nip44_decrypt(&self, peer: &PublicKey, payload: &str) -> Result<String> {
        Ok(nip44::decrypt(self.keys.secret_key(), peer, payload)?)
    }
}
