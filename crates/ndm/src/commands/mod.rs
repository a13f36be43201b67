pub mod identity;
pub mod message;

use anyhow::Result;
use nostr_dm_engine::{
    CacheStore, DmEngine, FileStorageAdapter, LocalSigner, RelayPool, Signer, StorageAdapter,
};
use std::path::Path;
use std::sync::Arc;

use crate::config::Settings;
use crate::nostr_client::{connect_client, SdkRelayPool};

/// Wire local keys, the relay client, and file-backed storage into an engine.
pub(crate) async fn build_engine(settings: &Settings, data_dir: &Path) -> Result<DmEngine> {
    let keys = settings.keys()?;
    let signer: Arc<dyn Signer> = Arc::new(LocalSigner::new(keys));

    let client = connect_client(settings).await?;
    let pool: Arc<dyn RelayPool> = Arc::new(SdkRelayPool::new(client));

    let storage: Arc<dyn StorageAdapter> = Arc::new(FileStorageAdapter::new(
        data_dir.join(CacheStore::database_name("ndm")),
    )?);

    let engine = DmEngine::new(signer, pool, storage, settings.engine_config());
    // Record the effective relay set so a later change triggers a refetch.
    engine.set_relay_url(&settings.relay_fingerprint()).await;
    Ok(engine)
}

/// Resolve an npub or hex string to a pubkey.
pub(crate) fn parse_pubkey(target: &str) -> Result<nostr::PublicKey> {
    if target.starts_with("npub1") {
        use nostr::FromBech32;
        return nostr::PublicKey::from_bech32(target)
            .map_err(|_| anyhow::anyhow!("Invalid npub: {}", target));
    }
    nostr::PublicKey::from_hex(target).map_err(|_| anyhow::anyhow!("Invalid pubkey: {}", target))
}

/// The cache store as the CLI wires it, for commands that touch it directly.
pub(crate) fn open_cache(data_dir: &Path) -> Result<CacheStore> {
    Ok(CacheStore::new(Arc::new(FileStorageAdapter::new(
        data_dir.join(CacheStore::database_name("ndm")),
    )?)))
}
