use anyhow::Result;
use std::path::Path;

use super::open_cache;
use crate::config::Settings;
use crate::output::Printer;

/// Login with a private key (nsec or hex)
pub fn login(key: &str, settings: &Settings, data_dir: &Path, printer: &Printer) -> Result<()> {
    let mut settings = settings.clone();
    let pubkey = settings.login(key)?;
    settings.store(data_dir)?;

    printer.result(&serde_json::json!({
        "pubkey": pubkey.to_hex(),
        "npub": nostr::ToBech32::to_bech32(&pubkey)?,
    }));
    Ok(())
}

/// Logout and remove local data, including the message cache
pub fn logout(settings: &Settings, data_dir: &Path, printer: &Printer) -> Result<()> {
    let mut settings = settings.clone();
    if let Ok(keys) = settings.keys() {
        let _ = open_cache(data_dir)?.delete(&keys.public_key());
    }
    settings.logout();
    settings.store(data_dir)?;

    printer.note("Logged out");
    Ok(())
}

/// Show current identity
pub fn whoami(settings: &Settings, printer: &Printer) -> Result<()> {
    let pubkey = settings.keys()?.public_key();

    printer.result(&serde_json::json!({
        "pubkey": pubkey.to_hex(),
        "npub": nostr::ToBech32::to_bech32(&pubkey)?,
        "relays": settings.relays(),
        "protocol": settings.protocol,
    }));
    Ok(())
}
