use anyhow::{Context, Result};
use nostr_dm_engine::{EngineConfig, ProtocolMode};
use serde::{Deserialize, Serialize};
use std::path::Path;

const SETTINGS_FILE: &str = "settings.json";

/// Relays used until the user configures their own set.
fn bootstrap_relays() -> Vec<String> {
    ["wss://relay.damus.io", "wss://relay.nostr.band", "wss://nos.lol"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Which wire protocols the engine runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolChoice {
    #[default]
    Both,
    Nip04,
    Nip17,
}

impl ProtocolChoice {
    pub fn mode(self) -> ProtocolMode {
        match self {
            ProtocolChoice::Both => ProtocolMode::Both,
            ProtocolChoice::Nip04 => ProtocolMode::Nip04Only,
            ProtocolChoice::Nip17 => ProtocolMode::Nip17Only,
        }
    }
}

/// Everything `ndm` keeps between invocations: the signing key, the relay
/// set, and the protocol selection handed to the engine. Lives as one JSON
/// file in the data directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    secret_key: Option<String>,
    pub relays: Vec<String>,
    pub protocol: ProtocolChoice,
}

impl Settings {
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("could not read {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("malformed settings in {}", path.display()))
    }

    pub fn store(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join(SETTINGS_FILE);
        let tmp = data_dir.join(format!("{}.tmp", SETTINGS_FILE));
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)
            .with_context(|| format!("could not write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("could not write {}", path.display()))?;
        Ok(())
    }

    /// Accepts an nsec or hex secret key; keeps it normalized to hex.
    pub fn login(&mut self, key: &str) -> Result<nostr::PublicKey> {
        let keys = nostr::Keys::parse(key).context("not a valid nsec or hex secret key")?;
        self.secret_key = Some(keys.secret_key().to_secret_hex());
        Ok(keys.public_key())
    }

    pub fn logout(&mut self) {
        self.secret_key = None;
    }

    pub fn is_logged_in(&self) -> bool {
        self.secret_key.is_some()
    }

    pub fn keys(&self) -> Result<nostr::Keys> {
        let key = self
            .secret_key
            .as_deref()
            .context("not logged in, run 'ndm login <key>' first")?;
        nostr::Keys::parse(key).context("stored secret key is unreadable")
    }

    pub fn relays(&self) -> Vec<String> {
        if self.relays.is_empty() {
            bootstrap_relays()
        } else {
            self.relays.clone()
        }
    }

    /// Order-insensitive identifier for the active relay set; the engine
    /// compares it across sessions to decide on a full refetch.
    pub fn relay_fingerprint(&self) -> String {
        let mut relays = self.relays();
        relays.sort();
        relays.join(" ")
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            protocol_mode: self.protocol.mode(),
            ..EngineConfig::default()
        }
    }
}
