//! Symmetric ratchet over [`Session`] snapshots.
//!
//! Each call takes a session, derives the message key from the *pre-advance*
//! chain key, and returns an advanced copy plus the message key. The input is
//! never modified, so a caller that fails later (bad tag, store error) still
//! holds the untouched session.
//!
//! ```text
//! session.chain[n] ──► message_key[n]
//!        │
//!        └─────────► session'.chain[n+1], counter n+1
//! ```
//!
//! Skipped message keys are not retained. A receiver that sees counter `n+k`
//! derives past the `k` missing positions and discards them, so those
//! messages can no longer be opened if they arrive late.

use parley_crypto::{ChainKey, MessageKey, derive_message_key, derive_next_chain_key};

use crate::{error::RatchetError, session::Session};

/// Advance the sending chain by one message.
///
/// # Errors
///
/// - `ChainNotInitialized` if the session has no sending chain
/// - `CounterExhausted` if the send counter would overflow
pub fn advance_sending_chain(session: &Session) -> Result<(Session, MessageKey), RatchetError> {
    let chain_key = session.sending_chain.as_ref().ok_or(RatchetError::ChainNotInitialized)?;
    let send_counter =
        session.send_counter.checked_add(1).ok_or(RatchetError::CounterExhausted)?;

    let message_key = derive_message_key(chain_key);
    let mut next = session.clone();
    next.sending_chain = Some(derive_next_chain_key(chain_key));
    next.send_counter = send_counter;

    tracing::debug!(
        session_id = %session.session_id,
        counter = session.send_counter,
        "advanced sending chain"
    );
    Ok((next, message_key))
}

/// Advance the receiving chain by one message.
///
/// # Errors
///
/// - `ChainNotInitialized` if the session has no receiving chain
/// - `CounterExhausted` if the receive counter would overflow
pub fn advance_receiving_chain(session: &Session) -> Result<(Session, MessageKey), RatchetError> {
    advance_receiving_chain_to(session, session.receive_counter, 0)
}

/// Advance the receiving chain to the message at `counter`.
///
/// Positions between the current receive counter and `counter` are skipped
/// (at most `max_skip` of them) and their keys discarded.
///
/// # Errors
///
/// - `ChainNotInitialized` if the session has no receiving chain
/// - `StaleCounter` if `counter` is behind the chain (replay or duplicate)
/// - `TooManySkipped` if more than `max_skip` positions would be skipped
/// - `CounterExhausted` if the receive counter would overflow
pub fn advance_receiving_chain_to(
    session: &Session,
    counter: u32,
    max_skip: u32,
) -> Result<(Session, MessageKey), RatchetError> {
    let chain_key = session.receiving_chain.as_ref().ok_or(RatchetError::ChainNotInitialized)?;

    if counter < session.receive_counter {
        return Err(RatchetError::StaleCounter { counter, current: session.receive_counter });
    }
    let skip = counter - session.receive_counter;
    if skip > max_skip {
        return Err(RatchetError::TooManySkipped { counter, skip, max: max_skip });
    }
    let receive_counter = counter.checked_add(1).ok_or(RatchetError::CounterExhausted)?;

    let mut current: ChainKey = chain_key.clone();
    for _ in 0..skip {
        current = derive_next_chain_key(&current);
    }

    let message_key = derive_message_key(&current);
    let mut next = session.clone();
    next.receiving_chain = Some(derive_next_chain_key(&current));
    next.receive_counter = receive_counter;

    tracing::debug!(
        session_id = %session.session_id,
        counter,
        skipped = skip,
        "advanced receiving chain"
    );
    Ok((next, message_key))
}

#[cfg(test)]
mod tests {
    use parley_crypto::{
        BaseKeyPublic, DhSecret, IdentityKeyPair, KEY_SIZE, SignedPreKeyPublic, agree_as_initiator,
        agree_as_responder,
    };
    use parley_proto::{PreKeyHeader, UserId};

    use super::*;
    use crate::session::ParticipantPair;

    fn pair() -> (Session, Session) {
        let alice = IdentityKeyPair::from_secrets([1; KEY_SIZE], [2; KEY_SIZE]);
        let bob = IdentityKeyPair::from_secrets([3; KEY_SIZE], [4; KEY_SIZE]);
        let spk = DhSecret::from_bytes([5; KEY_SIZE]);
        let base = DhSecret::from_bytes([6; KEY_SIZE]);
        let base_public = BaseKeyPublic::from_bytes(base.public_bytes());
        let participants =
            ParticipantPair::new(UserId::new("alice").unwrap(), UserId::new("bob").unwrap());

        let a = agree_as_initiator(
            &alice,
            &base,
            &bob.public(),
            &SignedPreKeyPublic::from_bytes(spk.public_bytes()),
            None,
        )
        .unwrap();
        let b = agree_as_responder(&bob, &spk, None, &alice.public(), &base_public).unwrap();

        let handshake = PreKeyHeader {
            identity: alice.public(),
            base_key: base_public,
            signed_prekey_id: 1,
            one_time_prekey_id: None,
        };
        (
            Session::initiate(participants.clone(), alice.public(), bob.public(), a, handshake),
            Session::respond(participants, bob.public(), alice.public(), b, base_public),
        )
    }

    #[test]
    fn sender_and_receiver_derive_same_keys() {
        let (mut alice, mut bob) = pair();

        for _ in 0..5 {
            let (next_alice, sent) = advance_sending_chain(&alice).unwrap();
            let (next_bob, received) = advance_receiving_chain(&bob).unwrap();
            assert_eq!(sent, received);
            alice = next_alice;
            bob = next_bob;
        }
        assert_eq!(alice.send_counter(), 5);
        assert_eq!(bob.receive_counter(), 5);
    }

    #[test]
    fn message_key_comes_from_pre_advance_chain() {
        let (alice, _) = pair();
        let before = alice.sending_chain.clone().unwrap();

        let (next, key) = advance_sending_chain(&alice).unwrap();

        assert_eq!(key, derive_message_key(&before));
        assert_eq!(next.sending_chain, Some(derive_next_chain_key(&before)));
        assert_eq!(alice.send_counter(), 0);
    }

    #[test]
    fn directions_use_distinct_chains() {
        let (alice, bob) = pair();

        let (_, alice_first) = advance_sending_chain(&alice).unwrap();
        let (_, bob_first) = advance_sending_chain(&bob).unwrap();

        assert_ne!(alice_first, bob_first);
    }

    #[test]
    fn missing_chain_rejected() {
        let (mut alice, _) = pair();
        alice.sending_chain = None;
        alice.receiving_chain = None;

        assert_eq!(
            advance_sending_chain(&alice).map(|_| ()),
            Err(RatchetError::ChainNotInitialized)
        );
        assert_eq!(
            advance_receiving_chain(&alice).map(|_| ()),
            Err(RatchetError::ChainNotInitialized)
        );
    }

    #[test]
    fn skip_ahead_matches_sequential_derivation() {
        let (mut alice, bob) = pair();
        let mut sent = Vec::new();
        for _ in 0..4 {
            let (next, key) = advance_sending_chain(&alice).unwrap();
            sent.push(key);
            alice = next;
        }

        let (bob, key) = advance_receiving_chain_to(&bob, 3, 10).unwrap();

        assert_eq!(key, sent[3]);
        assert_eq!(bob.receive_counter(), 4);
    }

    #[test]
    fn stale_and_far_counters_rejected() {
        let (_, bob) = pair();
        let (bob, _) = advance_receiving_chain(&bob).unwrap();

        assert_eq!(
            advance_receiving_chain_to(&bob, 0, 10).map(|_| ()),
            Err(RatchetError::StaleCounter { counter: 0, current: 1 })
        );
        assert_eq!(
            advance_receiving_chain_to(&bob, 20, 10).map(|_| ()),
            Err(RatchetError::TooManySkipped { counter: 20, skip: 19, max: 10 })
        );
    }

    #[test]
    fn counter_exhaustion_rejected() {
        let (mut alice, _) = pair();
        alice.send_counter = u32::MAX;

        assert_eq!(advance_sending_chain(&alice).map(|_| ()), Err(RatchetError::CounterExhausted));
    }
}
