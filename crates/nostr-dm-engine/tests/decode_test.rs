mod common;

use common::{gift_wrap, rumor, signed_dm};
use nostr::Keys;
use nostr_dm_engine::{
    build_gift_wraps, decode_nip04, decode_nip17, LocalSigner, Protocol, Signer,
};

#[test]
fn nip04_incoming_message_buckets_under_author() {
    let user_signer = LocalSigner::generate();
    let user = user_signer.public_key();
    let peer_keys = Keys::generate();
    let peer = peer_keys.public_key();

    let event = signed_dm(&peer_keys, &user, "hello there", 1_700_000_000);
    let decoded = decode_nip04(&event, &user, &user_signer).unwrap();

    assert_eq!(decoded.partner, peer);
    assert_eq!(decoded.protocol, Protocol::Nip04);
    assert_eq!(decoded.message.decrypted_content.as_deref(), Some("hello there"));
    assert!(decoded.message.error.is_none());
    assert_eq!(decoded.message.created_at, 1_700_000_000);
    assert_eq!(decoded.message.kind, 4);
}

#[test]
fn nip04_outgoing_message_buckets_under_recipient() {
    let user_keys = Keys::generate();
    let user_signer = LocalSigner::new(user_keys.clone());
    let user = user_signer.public_key();
    let peer = Keys::generate().public_key();

    let event = signed_dm(&user_keys, &peer, "sent by me", 1_700_000_000);
    let decoded = decode_nip04(&event, &user, &user_signer).unwrap();

    assert_eq!(decoded.partner, peer);
    assert_eq!(decoded.message.decrypted_content.as_deref(), Some("sent by me"));
}

#[test]
fn nip04_self_addressed_and_untagged_events_are_rejected() {
    let user_keys = Keys::generate();
    let user_signer = LocalSigner::new(user_keys.clone());
    let user = user_signer.public_key();

    // Addressed to the user by the user.
    let to_self = signed_dm(&user_keys, &user, "note to self", 1_700_000_000);
    assert!(decode_nip04(&to_self, &user, &user_signer).is_none());

    // Authored by the user with no p tag at all.
    let ciphertext = user_signer.nip04_encrypt(&user, "untagged").unwrap();
    let untagged = nostr::EventBuilder::new(nostr::Kind::from(4), &ciphertext, Vec::new())
        .to_unsigned_event(user)
        .sign(&user_keys)
        .unwrap();
    assert!(decode_nip04(&untagged, &user, &user_signer).is_none());
}

#[test]
fn nip04_decrypt_failure_degrades_to_errored_message() {
    let intended = Keys::generate().public_key();
    let peer_keys = Keys::generate();

    let event = signed_dm(&peer_keys, &intended, "for someone else", 1_700_000_000);

    // Deliver it to an unrelated signer: the shared secret will not match.
    let other_signer = LocalSigner::generate();
    let decoded = decode_nip04(&event, &other_signer.public_key(), &other_signer).unwrap();
    assert!(decoded.message.error.is_some());
    assert!(decoded.message.decrypted_content.is_none());
    assert_eq!(decoded.partner, peer_keys.public_key());
}

#[test]
fn nip17_recipient_unwraps_incoming_wrap() {
    let sender_signer = LocalSigner::generate();
    let recipient_keys = Keys::generate();
    let recipient = recipient_keys.public_key();

    let now = nostr_dm_engine::now_seconds();
    let (recipient_wrap, _) =
        build_gift_wraps(&sender_signer, &recipient, "hi", &[], now).unwrap();

    let recipient_signer = LocalSigner::new(recipient_keys);
    let decoded = decode_nip17(&recipient_wrap, &recipient, &recipient_signer);

    assert!(decoded.message.error.is_none());
    assert_eq!(decoded.partner, sender_signer.public_key());
    assert_eq!(decoded.message.pubkey, sender_signer.public_key());
    assert_eq!(decoded.message.decrypted_content.as_deref(), Some("hi"));
    assert_eq!(decoded.message.kind, 14);
    assert!(decoded.message.sig.is_empty());
    assert!(decoded.message.seal.is_some());
    // The wrap's ciphertext blob is preserved for audit.
    assert_eq!(decoded.message.content, recipient_wrap.content);
}

#[test]
fn nip17_sender_unwraps_own_echo_to_recipient_bucket() {
    let sender_signer = LocalSigner::generate();
    let sender = sender_signer.public_key();
    let recipient = Keys::generate().public_key();

    let now = nostr_dm_engine::now_seconds();
    let (_, self_wrap) = build_gift_wraps(&sender_signer, &recipient, "yo", &[], now).unwrap();

    let decoded = decode_nip17(&self_wrap, &sender, &sender_signer);
    assert!(decoded.message.error.is_none());
    assert_eq!(decoded.partner, recipient);
    assert_eq!(decoded.message.pubkey, sender);
}

#[test]
fn nip17_inner_timestamp_wins_over_fuzzed_outer() {
    let sender_keys = Keys::generate();
    let recipient_keys = Keys::generate();
    let recipient = recipient_keys.public_key();

    let inner_created = 1_700_099_500;
    let outer_created = 1_699_950_000; // fuzzed far into the past
    let inner = rumor(
        sender_keys.public_key(),
        14,
        "delayed on the wire",
        inner_created,
        vec![vec!["p".to_string(), recipient.to_hex()]],
    );
    let wrap = gift_wrap(&sender_keys, &recipient, &inner, outer_created);

    let recipient_signer = LocalSigner::new(recipient_keys);
    let decoded = decode_nip17(&wrap, &recipient, &recipient_signer);

    assert!(decoded.message.error.is_none());
    assert_eq!(decoded.message.created_at, inner_created);
    assert_eq!(decoded.message.id, inner.id.unwrap().to_hex());
}

#[test]
fn nip17_invalid_inner_kind_degrades_to_errored_message() {
    let sender_keys = Keys::generate();
    let recipient_keys = Keys::generate();
    let recipient = recipient_keys.public_key();

    let inner = rumor(sender_keys.public_key(), 1, "not a DM", 1_700_000_000, vec![]);
    let wrap = gift_wrap(&sender_keys, &recipient, &inner, 1_700_000_000);

    let recipient_signer = LocalSigner::new(recipient_keys);
    let decoded = decode_nip17(&wrap, &recipient, &recipient_signer);

    assert!(decoded.message.error.is_some());
    assert!(decoded.message.decrypted_content.is_none());
    // Best-effort bucketing under the wrap's ephemeral author.
    assert_eq!(decoded.partner, wrap.pubkey);
}

#[test]
fn nip17_rumor_claiming_another_author_is_rejected() {
    let seal_keys = Keys::generate();
    let impersonated = Keys::generate().public_key();
    let recipient_keys = Keys::generate();
    let recipient = recipient_keys.public_key();

    let inner = rumor(
        impersonated,
        14,
        "forged",
        1_700_000_000,
        vec![vec!["p".to_string(), recipient.to_hex()]],
    );
    let wrap = gift_wrap(&seal_keys, &recipient, &inner, 1_700_000_000);

    let recipient_signer = LocalSigner::new(recipient_keys);
    let decoded = decode_nip17(&wrap, &recipient, &recipient_signer);
    assert!(decoded.message.error.is_some());
}

#[test]
fn nip17_wrap_for_someone_else_degrades_to_errored_message() {
    let sender_keys = Keys::generate();
    let recipient = Keys::generate().public_key();

    let inner = rumor(
        sender_keys.public_key(),
        14,
        "hi",
        1_700_000_000,
        vec![vec!["p".to_string(), recipient.to_hex()]],
    );
    let wrap = gift_wrap(&sender_keys, &recipient, &inner, 1_700_000_000);

    // A bystander cannot decrypt the wrap at all.
    let bystander = LocalSigner::generate();
    let decoded = decode_nip17(&wrap, &bystander.public_key(), &bystander);
    assert!(decoded.message.error.is_some());
    assert_eq!(decoded.partner, wrap.pubkey);
}
