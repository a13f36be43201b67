use crate::{
    Attachment, DecryptedMessage, Error, Protocol, Result, Signer, CHAT_KIND, DM_KIND,
    FILE_CHAT_KIND, GIFT_WRAP_FUZZ_SECONDS, GIFT_WRAP_KIND, SEAL_KIND,
};
use nostr::nips::nip44;
use nostr::{EventBuilder, Keys, Kind, PublicKey, Tag, Timestamp};

/// Parameters for one outgoing message.
#[derive(Debug, Clone)]
pub struct SendParams {
    pub recipient: PublicKey,
    pub content: String,
    pub protocol: Protocol,
    pub attachments: Vec<Attachment>,
}

/// Attachment URLs are appended to the text, separated by a blank line.
pub fn compose_text(content: &str, attachments: &[Attachment]) -> String {
    if attachments.is_empty() {
        return content.to_string();
    }
    let urls = attachments
        .iter()
        .map(|a| a.url.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    if content.is_empty() {
        urls
    } else {
        format!("{}\n\n{}", content, urls)
    }
}

/// One NIP-92 `imeta` tag per attachment: URL, MIME type, size, display name,
/// plus any integrity hashes carried in the upload metadata.
pub fn imeta_tags(attachments: &[Attachment]) -> Vec<Vec<String>> {
    attachments
        .iter()
        .map(|a| {
            let mut tag = vec![
                "imeta".to_string(),
                format!("url {}", a.url),
                format!("m {}", a.mime_type),
                format!("size {}", a.size),
                format!("name {}", a.name),
            ];
            for extra in &a.tags {
                if let [key, value, ..] = extra.as_slice() {
                    if key == "x" || key == "ox" {
                        tag.push(format!("{} {}", key, value));
                    }
                }
            }
            tag
        })
        .collect()
}

/// Local placeholder applied to the reducer before any network work. Its kind
/// matches the real wire event (4, or the kind-14 rumor) so reconciliation
/// lines up when the echo arrives.
pub fn build_optimistic(
    user: PublicKey,
    recipient: &PublicKey,
    text: &str,
    imeta: &[Vec<String>],
    protocol: Protocol,
    now: u64,
) -> DecryptedMessage {
    let id = format!(
        "optimistic-{}-{}",
        crate::now_millis(),
        &uuid::Uuid::new_v4().to_string()[..8]
    );
    let mut tags = vec![vec!["p".to_string(), recipient.to_hex()]];
    tags.extend(imeta.iter().cloned());

    DecryptedMessage {
        id,
        pubkey: user,
        created_at: now,
        kind: match protocol {
            Protocol::Nip04 => DM_KIND,
            Protocol::Nip17 => CHAT_KIND,
        },
        tags,
        content: String::new(),
        sig: String::new(),
        decrypted_content: Some(text.to_string()),
        error: None,
        is_sending: true,
        client_first_seen: Some(now),
        seal: None,
    }
}

/// Encrypt and sign a single kind-4 event.
pub fn build_nip04_event(
    signer: &dyn Signer,
    recipient: &PublicKey,
    text: &str,
    imeta: &[Vec<String>],
    now: u64,
) -> Result<nostr::Event> {
    if !signer.supports_nip04() {
        return Err(Error::SignerCapability("nip04"));
    }

    let ciphertext = signer.nip04_encrypt(recipient, text)?;
    let mut tags = vec![parse_tag(&["p".to_string(), recipient.to_hex()])?];
    for tag in imeta {
        tags.push(parse_tag(tag)?);
    }

    let template = EventBuilder::new(Kind::from(DM_KIND), &ciphertext, tags)
        .custom_created_at(Timestamp::from(now))
        .to_unsigned_event(signer.public_key());
    signer.sign_event(template)
}

/// Build the two kind-1059 gift wraps for one NIP-17 send: one addressed to
/// the recipient and one to the user, so the sender's own subscription can
/// replay sent history. The shared rumor is never signed and never published
/// on its own.
pub fn build_gift_wraps(
    signer: &dyn Signer,
    recipient: &PublicKey,
    text: &str,
    imeta: &[Vec<String>],
    now: u64,
) -> Result<(nostr::Event, nostr::Event)> {
    if !signer.supports_nip44() {
        return Err(Error::SignerCapability("nip44"));
    }

    let user = signer.public_key();
    let kind = if imeta.is_empty() {
        CHAT_KIND
    } else {
        FILE_CHAT_KIND
    };

    let mut tags = vec![parse_tag(&["p".to_string(), recipient.to_hex()])?];
    for tag in imeta {
        tags.push(parse_tag(tag)?);
    }
    let mut rumor = EventBuilder::new(Kind::from(kind), text, tags)
        .custom_created_at(Timestamp::from(now))
        .to_unsigned_event(user);
    rumor.ensure_id();
    let rumor_json = serde_json::to_string(&rumor)?;

    let recipient_seal = seal_rumor(signer, recipient, &rumor_json, now)?;
    let self_seal = seal_rumor(signer, &user, &rumor_json, now)?;

    let recipient_wrap = wrap_seal(recipient, &recipient_seal, now)?;
    let self_wrap = wrap_seal(&user, &self_seal, now)?;
    Ok((recipient_wrap, self_wrap))
}

/// Kind-13 seal: the rumor encrypted to one reader, signed by the sender.
fn seal_rumor(
    signer: &dyn Signer,
    reader: &PublicKey,
    rumor_json: &str,
    now: u64,
) -> Result<nostr::Event> {
    let content = signer.nip44_encrypt(reader, rumor_json)?;
    let template = EventBuilder::new(Kind::from(SEAL_KIND), &content, Vec::new())
        .custom_created_at(Timestamp::from(now))
        .to_unsigned_event(signer.public_key());
    signer.sign_event(template)
}

/// Kind-1059 wrap: the seal encrypted to its reader under a freshly generated
/// key, with a fuzzed timestamp. Reusing the user's key here would undo the
/// sender-identity hiding, so the wrap key is always random.
fn wrap_seal(reader: &PublicKey, seal: &nostr::Event, now: u64) -> Result<nostr::Event> {
    let wrap_keys = Keys::generate();
    let content = nip44::encrypt(
        wrap_keys.secret_key(),
        reader,
        serde_json::to_string(seal)?,
        nip44::Version::V2,
    )?;

    let unsigned = EventBuilder::new(
        Kind::from(GIFT_WRAP_KIND),
        &content,
        vec![parse_tag(&["p".to_string(), reader.to_hex()])?],
    )
    .custom_created_at(Timestamp::from(fuzzed_timestamp(now)))
    .to_unsigned_event(wrap_keys.public_key());
    unsigned
        .sign(&wrap_keys)
        .map_err(|e| Error::InvalidEvent(e.to_string()))
}

/// Uniformly random in [now - 2 days, now + 2 days].
fn fuzzed_timestamp(now: u64) -> u64 {
    let window = 2 * GIFT_WRAP_FUZZ_SECONDS;
    now.saturating_sub(GIFT_WRAP_FUZZ_SECONDS) + rand::random::<u64>() % window
}

fn parse_tag(tag: &[String]) -> Result<Tag> {
    Tag::parse(tag).map_err(|e| Error::InvalidEvent(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalSigner;

    fn attachment() -> Attachment {
        Attachment {
            url: "https://files.example.com/abc.png".to_string(),
            mime_type: "image/png".to_string(),
            size: 2048,
            name: "abc.png".to_string(),
            tags: vec![
                vec!["x".to_string(), "deadbeef".to_string()],
                vec!["alt".to_string(), "ignored".to_string()],
            ],
        }
    }

    #[test]
    fn compose_text_appends_urls_after_blank_line() {
        assert_eq!(compose_text("hi", &[]), "hi");
        assert_eq!(
            compose_text("hi", &[attachment()]),
            "hi\n\nhttps://files.example.com/abc.png"
        );
        assert_eq!(
            compose_text("", &[attachment()]),
            "https://files.example.com/abc.png"
        );
    }

    #[test]
    fn imeta_tags_carry_metadata_and_hashes() {
        let tags = imeta_tags(&[attachment()]);
        assert_eq!(tags.len(), 1);
        let tag = &tags[0];
        assert_eq!(tag[0], "imeta");
        assert!(tag.contains(&"url https://files.example.com/abc.png".to_string()));
        assert!(tag.contains(&"m image/png".to_string()));
        assert!(tag.contains(&"size 2048".to_string()));
        assert!(tag.contains(&"name abc.png".to_string()));
        assert!(tag.contains(&"x deadbeef".to_string()));
        assert!(!tag.iter().any(|entry| entry.starts_with("alt ")));
    }

    #[test]
    fn optimistic_message_shape() {
        let user = Keys::generate().public_key();
        let recipient = Keys::generate().public_key();
        let message = build_optimistic(user, &recipient, "ping", &[], Protocol::Nip17, 1000);

        assert!(message.id.starts_with("optimistic-"));
        assert!(message.is_sending);
        assert_eq!(message.kind, CHAT_KIND);
        assert_eq!(message.created_at, 1000);
        assert_eq!(message.decrypted_content.as_deref(), Some("ping"));
        assert_eq!(message.client_first_seen, Some(1000));
        assert!(message.sig.is_empty());
        assert!(message.content.is_empty());
        assert_eq!(message.tags[0], vec!["p".to_string(), recipient.to_hex()]);
    }

    #[test]
    fn nip04_event_is_encrypted_and_tagged() {
        let signer = LocalSigner::generate();
        let recipient = Keys::generate().public_key();
        let event =
            build_nip04_event(&signer, &recipient, "secret", &[], 1_700_000_000).unwrap();

        assert_eq!(event.kind.as_u16(), DM_KIND);
        assert_ne!(event.content, "secret");
        assert!(event.content.contains("?iv="));
        assert!(event.verify().is_ok());

        let recipient_hex = recipient.to_hex();
        assert!(event.tags.iter().any(|t| {
            let v = t.as_slice();
            v.first().map(|s| s.as_str()) == Some("p")
                && v.get(1).map(|s| s.as_str()) == Some(recipient_hex.as_str())
        }));
    }

    #[test]
    fn gift_wraps_use_distinct_ephemeral_authors() {
        let signer = LocalSigner::generate();
        let user = signer.public_key();
        let recipient = Keys::generate().public_key();
        let now = crate::now_seconds();

        let (recipient_wrap, self_wrap) =
            build_gift_wraps(&signer, &recipient, "hello", &[], now).unwrap();

        for wrap in [&recipient_wrap, &self_wrap] {
            assert_eq!(wrap.kind.as_u16(), GIFT_WRAP_KIND);
            assert!(wrap.verify().is_ok());
            assert_ne!(wrap.pubkey, user);
            let created = wrap.created_at.as_u64();
            assert!(created >= now - GIFT_WRAP_FUZZ_SECONDS);
            assert!(created <= now + GIFT_WRAP_FUZZ_SECONDS);
        }
        assert_ne!(recipient_wrap.pubkey, self_wrap.pubkey);

        let p_tag = |event: &nostr::Event| {
            event
                .tags
                .iter()
                .find_map(|t| t.as_slice().get(1).cloned())
                .unwrap()
        };
        assert_eq!(p_tag(&recipient_wrap), recipient.to_hex());
        assert_eq!(p_tag(&self_wrap), user.to_hex());
    }

    #[test]
    fn attachments_select_the_file_rumor_kind() {
        let signer = LocalSigner::generate();
        let recipient_keys = Keys::generate();
        let recipient = recipient_keys.public_key();
        let now = crate::now_seconds();

        let imeta = imeta_tags(&[attachment()]);
        let text = compose_text("look", &[attachment()]);
        let (recipient_wrap, _) =
            build_gift_wraps(&signer, &recipient, &text, &imeta, now).unwrap();

        // Unwrap as the recipient to check the inner kind.
        let recipient_signer = LocalSigner::new(recipient_keys);
        let decoded = crate::decode_nip17(&recipient_wrap, &recipient, &recipient_signer);
        assert!(decoded.message.error.is_none());
        assert_eq!(decoded.message.kind, FILE_CHAT_KIND);
        assert_eq!(decoded.message.decrypted_content.as_deref(), Some(text.as_str()));
    }
}
