use anyhow::Result;
use nostr::PublicKey;
use nostr_dm_engine::{Participant, Protocol, SendParams};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use super::{build_engine, open_cache, parse_pubkey};
use crate::config::{ProtocolChoice, Settings};
use crate::output::Printer;

/// Send a message. Gift wraps unless `--nip04` or the configured protocol
/// says otherwise.
pub async fn send(
    recipient: &str,
    message: &str,
    nip04: bool,
    settings: &Settings,
    data_dir: &Path,
    printer: &Printer,
) -> Result<()> {
    let recipient = parse_pubkey(recipient)?;
    let engine = build_engine(settings, data_dir).await?;
    engine.start().await;

    let protocol = if nip04 || settings.protocol == ProtocolChoice::Nip04 {
        Protocol::Nip04
    } else {
        Protocol::Nip17
    };
    engine
        .send_message(SendParams {
            recipient,
            content: message.to_string(),
            protocol,
            attachments: vec![],
        })
        .await?;

    // Persists the optimistic message alongside the cached history.
    engine.shutdown().await;

    printer.result(&serde_json::json!({
        "recipient": recipient.to_hex(),
        "protocol": protocol.label(),
    }));
    Ok(())
}

/// List conversations from the cached view, then exit.
pub async fn conversations(settings: &Settings, data_dir: &Path, printer: &Printer) -> Result<()> {
    let engine = build_engine(settings, data_dir).await?;
    engine.start().await;

    let state = engine.snapshot();
    printer.result(&state.conversations);

    engine.shutdown().await;
    Ok(())
}

/// Show the messages of one conversation after a relay sync.
pub async fn read(
    peer: &str,
    limit: usize,
    settings: &Settings,
    data_dir: &Path,
    printer: &Printer,
) -> Result<()> {
    let peer = parse_pubkey(peer)?;
    let engine = build_engine(settings, data_dir).await?;
    engine.start().await;
    engine.wait_for_sync().await;

    let state = engine.snapshot();
    let messages = state
        .messages
        .get(&peer)
        .map(|participant| {
            participant
                .messages
                .iter()
                .rev()
                .take(limit)
                .rev()
                .cloned()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    printer.result(&messages);

    engine.shutdown().await;
    Ok(())
}

/// Run the full engine and stream incoming messages until interrupted.
pub async fn listen(
    fresh: bool,
    settings: &Settings,
    data_dir: &Path,
    printer: &Printer,
) -> Result<()> {
    if fresh {
        // Refresh gesture: drop the cached view before loading.
        let keys = settings.keys()?;
        let _ = open_cache(data_dir)?.delete(&keys.public_key());
    }

    let engine = build_engine(settings, data_dir).await?;
    engine.start().await;

    let state = engine.snapshot();
    printer.stream(
        "ready",
        serde_json::json!({
            "conversations": state.conversations.len(),
            "lastSync": state.last_sync,
        }),
    );

    // History already on screen is not streamed again; seed the seen set.
    let mut seen: HashSet<String> = HashSet::new();
    let _ = drain_new_messages(&state.messages, &mut seen);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }

        let state = engine.snapshot();
        for payload in drain_new_messages(&state.messages, &mut seen) {
            printer.stream("message", payload);
        }
    }

    engine.shutdown().await;
    printer.note("Stopped");
    Ok(())
}

/// Wipe the cached conversation document for the current user.
pub async fn clear(settings: &Settings, data_dir: &Path, printer: &Printer) -> Result<()> {
    let keys = settings.keys()?;
    open_cache(data_dir)?.delete(&keys.public_key())?;

    printer.note("Cache cleared; next load will refetch from relays");
    Ok(())
}

/// Stream payloads for messages not reported yet.
///
/// Optimistic placeholders are held back; their reconciled form arrives under
/// the real event id and streams then. Every reported id lands in `seen`, so
/// polling the same snapshot again yields nothing.
fn drain_new_messages(
    messages: &HashMap<PublicKey, Participant>,
    seen: &mut HashSet<String>,
) -> Vec<serde_json::Value> {
    let mut payloads = Vec::new();
    for (peer, participant) in messages {
        for message in &participant.messages {
            if message.is_sending || !seen.insert(message.id.clone()) {
                continue;
            }
            payloads.push(serde_json::json!({
                "peer": peer.to_hex(),
                "id": message.id,
                "from": message.pubkey.to_hex(),
                "content": message.decrypted_content,
                "error": message.error,
                "timestamp": message.created_at,
            }));
        }
    }
    payloads
}
