//! Per-pair session state.
//!
//! A [`Session`] is a value: ratchet functions take a snapshot and return an
//! advanced copy, which the caller persists. Nothing mutates a stored session
//! in place.
//!
//! # Lifecycle
//!
//! ```text
//!  Initiator                                   Responder
//!  ─────────                                   ─────────
//!  establish()  ── pending_prekey = Some ──>   accept() on first envelope
//!      │                                           │ remote_base_key = Some
//!      │  envelopes carry the handshake header     │
//!      │  <──────── first reply ───────────────────┘
//!  pending_prekey = None
//! ```
//!
//! # Records
//!
//! The store keeps one [`SessionRecord`] per pair: the current session plus
//! the sessions it superseded. Superseded sessions still open late envelopes
//! addressed to them, so re-establishment and simultaneous initiation never
//! strand messages in flight.

use parley_crypto::{BaseKeyPublic, ChainKey, IdentityPublicKey, RootKey, SessionSecrets};
use parley_proto::{PreKeyHeader, SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Which side ran the initiator half of the establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Fetched the bundle and sent first
    Initiator,
    /// Published the bundle and accepted the handshake
    Responder,
}

/// Canonical, order-independent pair of session participants.
///
/// `ParticipantPair::new(a, b) == ParticipantPair::new(b, a)`, so both
/// directions of a conversation map to one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantPair {
    low: UserId,
    high: UserId,
}

impl ParticipantPair {
    /// Canonicalize two participants.
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b { Self { low: a, high: b } } else { Self { low: b, high: a } }
    }

    /// Lexicographically smaller participant.
    pub fn low(&self) -> &UserId {
        &self.low
    }

    /// Lexicographically larger participant.
    pub fn high(&self) -> &UserId {
        &self.high
    }

    /// Stable string key, unambiguous for any pair of ids.
    pub fn storage_key(&self) -> String {
        format!("{}:{}{}", self.low.as_str().len(), self.low, self.high)
    }
}

/// Mutable cryptographic state shared with one remote party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub(crate) participants: ParticipantPair,
    pub(crate) session_id: SessionId,
    pub(crate) role: Role,
    pub(crate) local_identity: IdentityPublicKey,
    pub(crate) remote_identity: IdentityPublicKey,
    pub(crate) root_key: RootKey,
    pub(crate) sending_chain: Option<ChainKey>,
    pub(crate) receiving_chain: Option<ChainKey>,
    pub(crate) send_counter: u32,
    pub(crate) receive_counter: u32,
    pub(crate) previous_counter: u32,
    pub(crate) pending_prekey: Option<PreKeyHeader>,
    pub(crate) remote_base_key: Option<BaseKeyPublic>,
}

impl Session {
    /// Seed an initiator session. Envelopes carry `handshake` until the
    /// responder answers.
    pub(crate) fn initiate(
        participants: ParticipantPair,
        local_identity: IdentityPublicKey,
        remote_identity: IdentityPublicKey,
        secrets: SessionSecrets,
        handshake: PreKeyHeader,
    ) -> Self {
        Self {
            participants,
            session_id: SessionId::from_bytes(secrets.session_id),
            role: Role::Initiator,
            local_identity,
            remote_identity,
            root_key: secrets.root_key,
            sending_chain: Some(secrets.initiator_chain),
            receiving_chain: Some(secrets.responder_chain),
            send_counter: 0,
            receive_counter: 0,
            previous_counter: 0,
            pending_prekey: Some(handshake),
            remote_base_key: None,
        }
    }

    /// Seed a responder session from an accepted handshake.
    pub(crate) fn respond(
        participants: ParticipantPair,
        local_identity: IdentityPublicKey,
        remote_identity: IdentityPublicKey,
        secrets: SessionSecrets,
        remote_base_key: BaseKeyPublic,
    ) -> Self {
        Self {
            participants,
            session_id: SessionId::from_bytes(secrets.session_id),
            role: Role::Responder,
            local_identity,
            remote_identity,
            root_key: secrets.root_key,
            sending_chain: Some(secrets.responder_chain),
            receiving_chain: Some(secrets.initiator_chain),
            send_counter: 0,
            receive_counter: 0,
            previous_counter: 0,
            pending_prekey: None,
            remote_base_key: Some(remote_base_key),
        }
    }

    /// Drop the handshake header once the peer has proven it holds the
    /// session.
    pub(crate) fn acknowledged(mut self) -> Self {
        self.pending_prekey = None;
        self
    }

    /// Participants of this session.
    pub fn participants(&self) -> &ParticipantPair {
        &self.participants
    }

    /// Session identifier shared with the peer.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Local role in the establishment.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Local identity the session was established with.
    pub fn local_identity(&self) -> &IdentityPublicKey {
        &self.local_identity
    }

    /// Remote identity the session was established with.
    pub fn remote_identity(&self) -> &IdentityPublicKey {
        &self.remote_identity
    }

    /// Root key (reserved for the DH ratchet).
    pub fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    /// Number of messages sent on the current sending chain.
    pub fn send_counter(&self) -> u32 {
        self.send_counter
    }

    /// Number of message positions consumed on the receiving chain.
    pub fn receive_counter(&self) -> u32 {
        self.receive_counter
    }

    /// Length of the previous sending chain (reserved for the DH ratchet).
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    /// Whether a sending chain has been seeded.
    pub fn has_sending_chain(&self) -> bool {
        self.sending_chain.is_some()
    }

    /// Whether a receiving chain has been seeded.
    pub fn has_receiving_chain(&self) -> bool {
        self.receiving_chain.is_some()
    }

    /// Handshake header still attached to outgoing envelopes.
    pub fn pending_prekey(&self) -> Option<&PreKeyHeader> {
        self.pending_prekey.as_ref()
    }

    /// Initiator base key this responder session was accepted from.
    pub fn remote_base_key(&self) -> Option<&BaseKeyPublic> {
        self.remote_base_key.as_ref()
    }

    /// Associated data bound into every message: initiator identity followed
    /// by responder identity.
    pub fn associated_data(&self) -> [u8; 2 * IdentityPublicKey::SIZE] {
        let (initiator, responder) = match self.role {
            Role::Initiator => (&self.local_identity, &self.remote_identity),
            Role::Responder => (&self.remote_identity, &self.local_identity),
        };
        let mut out = [0u8; 2 * IdentityPublicKey::SIZE];
        out[..IdentityPublicKey::SIZE].copy_from_slice(&initiator.to_bytes());
        out[IdentityPublicKey::SIZE..].copy_from_slice(&responder.to_bytes());
        out
    }

    /// Remote participant, given the local user.
    pub fn remote_user(&self, local: &UserId) -> &UserId {
        let ParticipantPair { low, high } = &self.participants;
        if low == local { high } else { low }
    }
}

/// Superseded sessions kept per pair, newest first.
pub const MAX_ARCHIVED_SESSIONS: usize = 40;

/// Every session held with one remote party.
///
/// The current session encrypts. Archived sessions only decrypt. The base key
/// of every accepted handshake is remembered, including handshakes whose
/// sessions have since been evicted from the archive, so no handshake is
/// accepted twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    current: Session,
    archived: Vec<Session>,
    accepted_base_keys: Vec<BaseKeyPublic>,
}

impl SessionRecord {
    /// Record holding a single session.
    pub fn new(current: Session) -> Self {
        let mut record = Self { current, archived: Vec::new(), accepted_base_keys: Vec::new() };
        if let Some(base_key) = record.current.remote_base_key {
            record.accepted_base_keys.push(base_key);
        }
        record
    }

    /// Session used for outgoing envelopes.
    pub fn current(&self) -> &Session {
        &self.current
    }

    /// Superseded sessions, newest first.
    pub fn archived(&self) -> &[Session] {
        &self.archived
    }

    /// Participants every session in the record belongs to.
    pub fn participants(&self) -> &ParticipantPair {
        self.current.participants()
    }

    /// Consume the record, keeping the current session.
    pub fn into_current(self) -> Session {
        self.current
    }

    /// Current or archived session with `session_id`.
    pub fn find(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions().find(|session| session.session_id == session_id)
    }

    /// Current or archived session accepted from the handshake with
    /// `base_key`.
    pub fn find_accepted(&self, base_key: &BaseKeyPublic) -> Option<&Session> {
        self.sessions().find(|session| session.remote_base_key.as_ref() == Some(base_key))
    }

    /// Whether a handshake with `base_key` was ever accepted for this pair.
    pub fn has_accepted(&self, base_key: &BaseKeyPublic) -> bool {
        self.accepted_base_keys.contains(base_key)
    }

    /// Replace the held session with the same id as `session`.
    ///
    /// Returns `false` if the record holds no such session.
    pub(crate) fn update(&mut self, session: Session) -> bool {
        let slot = if self.current.session_id == session.session_id {
            Some(&mut self.current)
        } else {
            self.archived.iter_mut().find(|held| held.session_id == session.session_id)
        };
        match slot {
            Some(slot) => {
                *slot = session;
                true
            },
            None => false,
        }
    }

    /// Make `session` current, archiving the previous current session.
    pub(crate) fn promote(&mut self, session: Session) {
        self.remember(&session);
        let previous = std::mem::replace(&mut self.current, session);
        self.push_archived(previous);
    }

    /// Keep `session` for decryption only.
    pub(crate) fn archive(&mut self, session: Session) {
        self.remember(&session);
        self.push_archived(session);
    }

    fn sessions(&self) -> impl Iterator<Item = &Session> {
        std::iter::once(&self.current).chain(&self.archived)
    }

    fn remember(&mut self, session: &Session) {
        if let Some(base_key) = session.remote_base_key
            && !self.has_accepted(&base_key)
        {
            self.accepted_base_keys.push(base_key);
        }
    }

    fn push_archived(&mut self, session: Session) {
        self.archived.insert(0, session);
        self.archived.truncate(MAX_ARCHIVED_SESSIONS);
    }
}

#[cfg(test)]
mod tests {
    use parley_crypto::{KEY_SIZE, SESSION_ID_SIZE};

    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn accepted(seed: u8) -> Session {
        let secrets = SessionSecrets {
            root_key: RootKey::from_bytes([seed; KEY_SIZE]),
            initiator_chain: ChainKey::from_bytes([seed; KEY_SIZE]),
            responder_chain: ChainKey::from_bytes([!seed; KEY_SIZE]),
            session_id: [seed; SESSION_ID_SIZE],
        };
        Session::respond(
            ParticipantPair::new(user("alice"), user("bob")),
            IdentityPublicKey::from_parts([1; KEY_SIZE], [2; KEY_SIZE]),
            IdentityPublicKey::from_parts([3; KEY_SIZE], [4; KEY_SIZE]),
            secrets,
            BaseKeyPublic::from_bytes([seed; KEY_SIZE]),
        )
    }

    fn base_key(seed: u8) -> BaseKeyPublic {
        BaseKeyPublic::from_bytes([seed; KEY_SIZE])
    }

    #[test]
    fn promote_archives_previous_session() {
        let mut record = SessionRecord::new(accepted(1));
        record.promote(accepted(2));

        assert_eq!(record.current().session_id(), accepted(2).session_id());
        assert_eq!(record.archived(), &[accepted(1)]);
        assert!(record.find(accepted(1).session_id()).is_some());
        assert_eq!(record.find_accepted(&base_key(1)), Some(&accepted(1)));
        assert!(record.has_accepted(&base_key(1)));
        assert!(record.has_accepted(&base_key(2)));
        assert!(!record.has_accepted(&base_key(3)));
    }

    #[test]
    fn archive_keeps_current_session() {
        let mut record = SessionRecord::new(accepted(1));
        record.archive(accepted(2));

        assert_eq!(record.current(), &accepted(1));
        assert_eq!(record.find_accepted(&base_key(2)), Some(&accepted(2)));
    }

    #[test]
    fn evicted_sessions_stay_accepted() {
        let mut record = SessionRecord::new(accepted(0));
        for seed in 1..=(MAX_ARCHIVED_SESSIONS as u8 + 1) {
            record.promote(accepted(seed));
        }

        assert_eq!(record.archived().len(), MAX_ARCHIVED_SESSIONS);
        assert!(record.find_accepted(&base_key(0)).is_none());
        assert!(record.has_accepted(&base_key(0)));
    }

    #[test]
    fn update_replaces_matching_session_only() {
        let mut record = SessionRecord::new(accepted(1));
        record.promote(accepted(2));

        let mut advanced = accepted(1);
        advanced.receive_counter = 5;
        assert!(record.update(advanced));
        assert_eq!(record.find(accepted(1).session_id()).unwrap().receive_counter(), 5);
        assert_eq!(record.current().receive_counter(), 0);

        assert!(!record.update(accepted(9)));
    }

    #[test]
    fn pair_is_order_independent() {
        let ab = ParticipantPair::new(user("alice"), user("bob"));
        let ba = ParticipantPair::new(user("bob"), user("alice"));

        assert_eq!(ab, ba);
        assert_eq!(ab.storage_key(), ba.storage_key());
        assert_eq!(ab.low(), &user("alice"));
    }

    #[test]
    fn storage_keys_do_not_collide_across_splits() {
        let a = ParticipantPair::new(user("ab"), user("c"));
        let b = ParticipantPair::new(user("a"), user("bc"));

        assert_ne!(a.storage_key(), b.storage_key());
    }
}
