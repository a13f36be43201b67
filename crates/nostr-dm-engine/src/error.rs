use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Signer does not support {0}")]
    SignerCapability(&'static str),

    #[error("Protocol disabled: {0}")]
    ProtocolDisabled(&'static str),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Hex(#[from] hex::FromHexError),

    #[error(transparent)]
    NostrKey(#[from] nostr::key::Error),

    #[error(transparent)]
    Nip04(#[from] nostr::nips::nip04::Error),

    #[error(transparent)]
    Nip44(#[from] nostr::nips::nip44::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
