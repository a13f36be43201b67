use crate::{
    tags_to_vec, DecryptedMessage, Error, Protocol, Result, Signer, CHAT_KIND, FILE_CHAT_KIND,
    SEAL_KIND,
};
use nostr::{Event, JsonUtil, PublicKey, Tag, UnsignedEvent};
use tracing::debug;

/// A decoded message bucketed to its conversation partner.
pub struct Decoded {
    pub message: DecryptedMessage,
    pub partner: PublicKey,
    pub protocol: Protocol,
}

pub(crate) fn first_p_tag(tags: &[Tag]) -> Option<PublicKey> {
    tags.iter().find_map(|t| {
        let v = t.as_slice();
        if v.first().map(|s| s.as_str()) != Some("p") {
            return None;
        }
        v.get(1).and_then(|hex| PublicKey::from_hex(hex).ok())
    })
}

/// Decode a kind-4 event.
///
/// The partner is the `p` tag when the author is the user, otherwise the
/// author. Events whose partner is absent or resolves to the user are
/// rejected outright; decrypt failures still yield a message (with `error`
/// set) so the UI can show a locked placeholder.
pub fn decode_nip04(event: &Event, user: &PublicKey, signer: &dyn Signer) -> Option<Decoded> {
    let partner = if event.pubkey == *user {
        match first_p_tag(&event.tags) {
            Some(partner) => partner,
            None => {
                debug!(id = %event.id, "kind-4 event from self has no recipient tag");
                return None;
            }
        }
    } else {
        event.pubkey
    };

    if partner == *user {
        debug!(id = %event.id, "rejecting kind-4 event addressed to self");
        return None;
    }

    let mut message = DecryptedMessage::from_event(event);

    if !signer.supports_nip04() {
        message.error = Some("signer does not support NIP-04".to_string());
    } else {
        match signer.nip04_decrypt(&partner, &event.content) {
            Ok(plaintext) => message.decrypted_content = Some(plaintext),
            Err(err) => {
                debug!(id = %event.id, error = %err, "NIP-04 decrypt failed");
                message.error = Some(err.to_string());
            }
        }
    }

    Some(Decoded {
        message,
        partner,
        protocol: Protocol::Nip04,
    })
}

/// Decode a kind-1059 gift wrap: wrap -> seal -> rumor.
///
/// Any failure along the chain degrades to an errored message bucketed to the
/// wrap's (ephemeral) author, so the conversation still surfaces.
pub fn decode_nip17(event: &Event, user: &PublicKey, signer: &dyn Signer) -> Decoded {
    match unwrap_gift_wrap(event, user, signer) {
        Ok(decoded) => decoded,
        Err(err) => {
            debug!(id = %event.id, error = %err, "failed to unwrap gift wrap");
            let mut message = DecryptedMessage::from_event(event);
            message.error = Some(err.to_string());
            Decoded {
                message,
                partner: event.pubkey,
                protocol: Protocol::Nip17,
            }
        }
    }
}

fn unwrap_gift_wrap(event: &Event, user: &PublicKey, signer: &dyn Signer) -> Result<Decoded> {
    if !signer.supports_nip44() {
        return Err(Error::SignerCapability("nip44"));
    }

    let seal_json = signer.nip44_decrypt(&event.pubkey, &event.content)?;
    let seal =
        Event::from_json(&seal_json).map_err(|e| Error::InvalidEvent(e.to_string()))?;
    if seal.kind.as_u16() != SEAL_KIND {
        return Err(Error::InvalidEvent(format!(
            "expected a kind-13 seal, got kind {}",
            seal.kind.as_u16()
        )));
    }

    let rumor_json = signer.nip44_decrypt(&seal.pubkey, &seal.content)?;
    let mut rumor: UnsignedEvent = serde_json::from_str(&rumor_json)?;

    let kind = rumor.kind.as_u16();
    if kind != CHAT_KIND && kind != FILE_CHAT_KIND {
        return Err(Error::InvalidEvent(format!(
            "unexpected inner kind {}",
            kind
        )));
    }

    // A seal only proves authorship of itself; a rumor claiming another
    // author would let the seal's author impersonate a third party.
    if rumor.pubkey != seal.pubkey {
        return Err(Error::InvalidEvent(
            "inner author does not match seal author".to_string(),
        ));
    }

    let partner = if seal.pubkey == *user {
        first_p_tag(&rumor.tags)
            .ok_or_else(|| Error::InvalidEvent("sent message has no recipient tag".to_string()))?
    } else {
        seal.pubkey
    };
    if partner == *user {
        return Err(Error::InvalidEvent(
            "conversation partner resolves to self".to_string(),
        ));
    }

    // The rumor id is the canonical message id used for deduplication; its
    // created_at is the real send time (the wrap's is fuzzed).
    rumor.ensure_id();
    let message = DecryptedMessage {
        id: rumor
            .id
            .map(|id| id.to_hex())
            .ok_or_else(|| Error::InvalidEvent("rumor id could not be computed".to_string()))?,
        pubkey: rumor.pubkey,
        created_at: rumor.created_at.as_u64(),
        kind,
        tags: tags_to_vec(&rumor.tags),
        // Keep the wrap's original ciphertext blob for audit.
        content: event.content.clone(),
        sig: String::new(),
        decrypted_content: Some(rumor.content.clone()),
        error: None,
        is_sending: false,
        client_first_seen: None,
        seal: Some(Box::new(seal)),
    };

    Ok(Decoded {
        message,
        partner,
        protocol: Protocol::Nip17,
    })
}
