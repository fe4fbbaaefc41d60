//! Tampered envelopes
//!
//! Any modification of a sealed envelope must fail with a typed error and
//! leave the receiver's stored state exactly as it was.

mod common;

use std::sync::Arc;

use common::{Codec, party, user};
use parley_core::{CodecError, MemoryDirectory, SessionStore};
use parley_crypto::{AuthenticationTag, TAG_SIZE};
use parley_proto::{Envelope, SessionId};
use proptest::prelude::*;

async fn established() -> (Codec, Codec) {
    let directory = Arc::new(MemoryDirectory::new());
    let alice = party("alice", &directory, 1).await;
    let bob = party("bob", &directory, 2).await;
    let hello = alice.encrypt(&user("bob"), b"hello").await.unwrap();
    bob.decrypt(&user("alice"), &hello).await.unwrap();
    (alice, bob)
}

#[tokio::test]
async fn flipped_ciphertext_bit_rejected() {
    let (alice, bob) = established().await;
    let envelope = alice.encrypt(&user("bob"), b"attack at dawn").await.unwrap();
    let before = bob.session_snapshot(&user("alice")).unwrap();

    let mut tampered = envelope.clone();
    tampered.ciphertext[3] ^= 0x01;
    let result = bob.decrypt(&user("alice"), &tampered).await;

    assert!(matches!(result, Err(CodecError::AuthenticationFailed)));
    assert_eq!(bob.session_snapshot(&user("alice")).unwrap(), before);
    assert_eq!(bob.decrypt(&user("alice"), &envelope).await.unwrap(), b"attack at dawn");
}

#[tokio::test]
async fn flipped_tag_bit_rejected() {
    let (alice, bob) = established().await;
    let envelope = alice.encrypt(&user("bob"), b"attack at dawn").await.unwrap();
    let before = bob.session_snapshot(&user("alice")).unwrap();

    // Both halves of the tag: poly1305 and the commitment
    for index in [0, TAG_SIZE - 1] {
        let mut bytes = *envelope.tag.as_bytes();
        bytes[index] ^= 0x80;
        let mut tampered = envelope.clone();
        tampered.tag = AuthenticationTag::from_bytes(bytes);

        let result = bob.decrypt(&user("alice"), &tampered).await;
        assert!(matches!(result, Err(CodecError::AuthenticationFailed)));
        assert_eq!(bob.session_snapshot(&user("alice")).unwrap(), before);
    }
}

#[tokio::test]
async fn altered_header_rejected() {
    let (alice, bob) = established().await;
    let envelope = alice.encrypt(&user("bob"), b"pay 10").await.unwrap();
    let next = alice.encrypt(&user("bob"), b"pay 1000").await.unwrap();
    let before = bob.session_snapshot(&user("alice")).unwrap();

    // Bound as associated data: swapping the counter selects the wrong key
    let mut reordered = next.clone();
    reordered.header.counter = envelope.header.counter;
    let result = bob.decrypt(&user("alice"), &reordered).await;
    assert!(matches!(result, Err(CodecError::AuthenticationFailed)));

    let mut misrouted = envelope.clone();
    misrouted.header.session_id = SessionId::from_bytes([0xAB; 16]);
    let result = bob.decrypt(&user("alice"), &misrouted).await;
    assert!(matches!(result, Err(CodecError::SessionMismatch)));

    assert_eq!(bob.session_snapshot(&user("alice")).unwrap(), before);
}

#[tokio::test]
async fn tampered_handshake_consumes_nothing() {
    let directory = Arc::new(MemoryDirectory::new());
    let alice = party("alice", &directory, 1).await;
    let bob = party("bob", &directory, 2).await;
    let hello = alice.encrypt(&user("bob"), b"hello").await.unwrap();
    let id = hello.header.prekey.unwrap().one_time_prekey_id.unwrap();

    let mut tampered = hello.clone();
    tampered.ciphertext[0] ^= 0xFF;
    let result = bob.decrypt(&user("alice"), &tampered).await;

    assert!(matches!(result, Err(CodecError::AuthenticationFailed)));
    assert!(bob.session_snapshot(&user("alice")).unwrap().is_none());
    assert!(bob.store().identity(&user("alice")).unwrap().is_none());
    assert!(bob.store().one_time_prekey(id).unwrap().is_some());
    assert_eq!(bob.decrypt(&user("alice"), &hello).await.unwrap(), b"hello");
}

#[tokio::test]
async fn envelope_for_another_recipient_rejected() {
    let directory = Arc::new(MemoryDirectory::new());
    let alice = party("alice", &directory, 1).await;
    let bob = party("bob", &directory, 2).await;
    let carol = party("carol", &directory, 3).await;

    let for_bob = alice.encrypt(&user("bob"), b"for bob only").await.unwrap();
    bob.decrypt(&user("alice"), &for_bob).await.unwrap();
    let for_carol = alice.encrypt(&user("carol"), b"for carol").await.unwrap();
    carol.decrypt(&user("alice"), &for_carol).await.unwrap();
    let reply = bob.encrypt(&user("alice"), b"ack").await.unwrap();
    alice.decrypt(&user("bob"), &reply).await.unwrap();

    let next_for_bob = alice.encrypt(&user("bob"), b"secret").await.unwrap();
    let result = carol.decrypt(&user("alice"), &next_for_bob).await;
    assert!(matches!(result, Err(CodecError::SessionMismatch)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any plaintext survives a round trip through the wire format.
    #[test]
    fn arbitrary_plaintext_round_trips(
        plaintext in proptest::collection::vec(any::<u8>(), 0..2048)
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let opened = runtime.block_on(async {
            let (alice, bob) = established().await;
            let envelope = alice.encrypt(&user("bob"), &plaintext).await.unwrap();
            let wire = Envelope::decode(&envelope.encode().unwrap()).unwrap();
            bob.decrypt(&user("alice"), &wire).await.unwrap()
        });
        prop_assert_eq!(opened, plaintext);
    }

    /// No single bit flip anywhere in the encoded envelope is accepted.
    #[test]
    fn single_bit_flips_never_accepted(index in any::<usize>(), bit in 0u8..8) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let accepted = runtime.block_on(async {
            let (alice, bob) = established().await;
            let envelope = alice.encrypt(&user("bob"), b"integrity").await.unwrap();
            let mut bytes = envelope.encode().unwrap().to_vec();
            let index = index % bytes.len();
            bytes[index] ^= 1 << bit;

            match Envelope::decode(&bytes) {
                Ok(tampered) => {
                    let sender = tampered.header.sender.clone();
                    bob.decrypt(&sender, &tampered).await.is_ok()
                },
                Err(_) => false,
            }
        });
        prop_assert!(!accepted);
    }
}
