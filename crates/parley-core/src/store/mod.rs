//! Session store abstraction.
//!
//! A [`SessionStore`] keeps everything a device must remember between calls,
//! split into three namespaces:
//!
//! - **identity**: the local identity key pair and the pinned identity of
//!   every remote user
//! - **prekey**: signed and one-time prekeys, by id
//! - **session**: a [`SessionRecord`] per canonical participant pair
//!
//! Backends implement the raw get/put/remove operations and the one
//! multi-namespace write, [`SessionStore::complete_handshake`]. Trust rules
//! and the not-found distinctions are provided on top of them, so every
//! backend applies the same policy.
//!
//! # Backends
//!
//! - [`MemoryStore`]: in-process maps, for tests and ephemeral clients
//! - [`RedbStore`]: embedded database file with every record sealed under a
//!   device storage key

mod encrypted;
mod memory;

pub use encrypted::RedbStore;
pub use memory::MemoryStore;

use parley_crypto::{IdentityKeyPair, IdentityPublicKey};
use parley_proto::UserId;

use crate::{
    error::StoreError,
    keys::{OneTimePreKey, SignedPreKey},
    session::{ParticipantPair, Session, SessionRecord},
};

/// Everything an accepted handshake writes, committed as one unit.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeCompletion<'a> {
    /// Initiator of the handshake
    pub remote: &'a UserId,
    /// Identity the initiator presented, pinned for `remote`
    pub identity: &'a IdentityPublicKey,
    /// One-time prekey the handshake used, consumed by the write
    pub one_time_prekey_id: Option<u32>,
    /// Session record holding the accepted session
    pub record: &'a SessionRecord,
}

/// Durable storage for identities, prekeys and sessions.
///
/// Implementations are internally synchronized. `take_one_time_prekey` and
/// `complete_handshake` must be atomic: when several callers race for one
/// one-time prekey, exactly one receives it.
pub trait SessionStore: Send + Sync {
    /// Local identity key pair, if provisioned.
    fn local_identity(&self) -> Result<Option<IdentityKeyPair>, StoreError>;

    /// Store the local identity key pair.
    fn put_local_identity(&self, identity: &IdentityKeyPair) -> Result<(), StoreError>;

    /// Pinned identity of a remote user.
    fn identity(&self, remote: &UserId) -> Result<Option<IdentityPublicKey>, StoreError>;

    /// Pin a remote identity, replacing any earlier one.
    fn put_identity(&self, remote: &UserId, key: &IdentityPublicKey) -> Result<(), StoreError>;

    /// Forget a remote identity.
    fn remove_identity(&self, remote: &UserId) -> Result<(), StoreError>;

    /// Signed prekey by id.
    fn signed_prekey(&self, id: u32) -> Result<Option<SignedPreKey>, StoreError>;

    /// All stored signed prekeys, ascending by id.
    fn signed_prekeys(&self) -> Result<Vec<SignedPreKey>, StoreError>;

    /// Store a signed prekey.
    fn put_signed_prekey(&self, key: &SignedPreKey) -> Result<(), StoreError>;

    /// Remove a signed prekey (after rotation, once in-flight handshakes drain).
    fn remove_signed_prekey(&self, id: u32) -> Result<(), StoreError>;

    /// Unconsumed one-time prekey by id.
    fn one_time_prekey(&self, id: u32) -> Result<Option<OneTimePreKey>, StoreError>;

    /// Store a one-time prekey.
    fn put_one_time_prekey(&self, key: &OneTimePreKey) -> Result<(), StoreError>;

    /// Atomically remove and return a one-time prekey.
    fn take_one_time_prekey(&self, id: u32) -> Result<Option<OneTimePreKey>, StoreError>;

    /// Id the next generated one-time prekey will receive.
    ///
    /// Never decreases, so ids of consumed keys are never handed out again.
    fn next_one_time_prekey_id(&self) -> Result<u32, StoreError>;

    /// Advance the next one-time prekey id.
    fn set_next_one_time_prekey_id(&self, next: u32) -> Result<(), StoreError>;

    /// Session record for a participant pair.
    fn session_record(
        &self,
        participants: &ParticipantPair,
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// Store a session record under its participant pair.
    fn put_session_record(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// Remove every session held for a pair.
    fn remove_session(&self, participants: &ParticipantPair) -> Result<(), StoreError>;

    /// Commit an accepted handshake in one atomic write: consume the
    /// one-time prekey (if any), pin the initiator identity and store the
    /// session record.
    ///
    /// Returns `true` when a *different* pinned identity was overwritten.
    ///
    /// # Errors
    ///
    /// `NotFound` if the one-time prekey is gone. Nothing is written then,
    /// nor on any other error.
    fn complete_handshake(&self, completion: &HandshakeCompletion<'_>) -> Result<bool, StoreError>;

    /// Current session for a participant pair.
    fn session(&self, participants: &ParticipantPair) -> Result<Option<Session>, StoreError> {
        Ok(self.session_record(participants)?.map(SessionRecord::into_current))
    }

    /// Store `session` for its pair.
    ///
    /// Replaces the held session with the same id, or else makes `session`
    /// current and archives the previous current session.
    fn put_session(&self, session: &Session) -> Result<(), StoreError> {
        let record = match self.session_record(session.participants())? {
            Some(mut record) => {
                if !record.update(session.clone()) {
                    record.promote(session.clone());
                }
                record
            },
            None => SessionRecord::new(session.clone()),
        };
        self.put_session_record(&record)
    }

    /// Whether `key` may be used for `remote`.
    ///
    /// True on first use (nothing pinned) or when the pinned key matches
    /// bit-for-bit. False signals a possible key substitution.
    fn is_trusted_identity(
        &self,
        remote: &UserId,
        key: &IdentityPublicKey,
    ) -> Result<bool, StoreError> {
        Ok(self.identity(remote)?.is_none_or(|pinned| pinned == *key))
    }

    /// Pin `key` for `remote`.
    ///
    /// Returns `true` only when a *different* pinned identity was overwritten.
    /// Callers must surface that to the user; it is never a silent success.
    fn save_identity(&self, remote: &UserId, key: &IdentityPublicKey) -> Result<bool, StoreError> {
        match self.identity(remote)? {
            Some(pinned) if pinned == *key => Ok(false),
            Some(_) => {
                self.put_identity(remote, key)?;
                Ok(true)
            },
            None => {
                self.put_identity(remote, key)?;
                Ok(false)
            },
        }
    }

    /// Atomically consume a one-time prekey.
    ///
    /// The returned key is marked consumed and is gone from the store.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key does not exist or was already consumed.
    fn consume_one_time_prekey(&self, id: u32) -> Result<OneTimePreKey, StoreError> {
        let mut key =
            self.take_one_time_prekey(id)?.ok_or(StoreError::NotFound("one-time prekey"))?;
        key.consumed = true;
        Ok(key)
    }

    /// Load a session that must exist.
    ///
    /// # Errors
    ///
    /// `NotFound` if no session exists for the pair.
    fn load_session(&self, participants: &ParticipantPair) -> Result<Session, StoreError> {
        self.session(participants)?.ok_or(StoreError::NotFound("session"))
    }
}
