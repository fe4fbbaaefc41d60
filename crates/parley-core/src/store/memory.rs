//! In-memory session store.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
};

use parley_crypto::{IdentityKeyPair, IdentityPublicKey};
use parley_proto::UserId;

use super::{HandshakeCompletion, SessionStore};
use crate::{
    error::StoreError,
    keys::{OneTimePreKey, SignedPreKey},
    session::{ParticipantPair, SessionRecord},
};

#[derive(Default)]
struct Inner {
    local_identity: Option<IdentityKeyPair>,
    identities: HashMap<UserId, IdentityPublicKey>,
    signed_prekeys: BTreeMap<u32, SignedPreKey>,
    one_time_prekeys: BTreeMap<u32, OneTimePreKey>,
    next_one_time_prekey_id: u32,
    sessions: HashMap<ParticipantPair, SessionRecord>,
}

/// Session store backed by in-process maps.
///
/// One mutex guards all namespaces, so every operation (including
/// `take_one_time_prekey`) is atomic. Contents are lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

impl SessionStore for MemoryStore {
    fn local_identity(&self) -> Result<Option<IdentityKeyPair>, StoreError> {
        Ok(self.lock()?.local_identity.clone())
    }

    fn put_local_identity(&self, identity: &IdentityKeyPair) -> Result<(), StoreError> {
        self.lock()?.local_identity = Some(identity.clone());
        Ok(())
    }

    fn identity(&self, remote: &UserId) -> Result<Option<IdentityPublicKey>, StoreError> {
        Ok(self.lock()?.identities.get(remote).copied())
    }

    fn put_identity(&self, remote: &UserId, key: &IdentityPublicKey) -> Result<(), StoreError> {
        self.lock()?.identities.insert(remote.clone(), *key);
        Ok(())
    }

    fn remove_identity(&self, remote: &UserId) -> Result<(), StoreError> {
        self.lock()?.identities.remove(remote);
        Ok(())
    }

    fn signed_prekey(&self, id: u32) -> Result<Option<SignedPreKey>, StoreError> {
        Ok(self.lock()?.signed_prekeys.get(&id).cloned())
    }

    fn signed_prekeys(&self) -> Result<Vec<SignedPreKey>, StoreError> {
        Ok(self.lock()?.signed_prekeys.values().cloned().collect())
    }

    fn put_signed_prekey(&self, key: &SignedPreKey) -> Result<(), StoreError> {
        self.lock()?.signed_prekeys.insert(key.id, key.clone());
        Ok(())
    }

    fn remove_signed_prekey(&self, id: u32) -> Result<(), StoreError> {
        self.lock()?.signed_prekeys.remove(&id);
        Ok(())
    }

    fn one_time_prekey(&self, id: u32) -> Result<Option<OneTimePreKey>, StoreError> {
        Ok(self.lock()?.one_time_prekeys.get(&id).cloned())
    }

    fn put_one_time_prekey(&self, key: &OneTimePreKey) -> Result<(), StoreError> {
        self.lock()?.one_time_prekeys.insert(key.id, key.clone());
        Ok(())
    }

    fn take_one_time_prekey(&self, id: u32) -> Result<Option<OneTimePreKey>, StoreError> {
        Ok(self.lock()?.one_time_prekeys.remove(&id))
    }

    fn next_one_time_prekey_id(&self) -> Result<u32, StoreError> {
        Ok(self.lock()?.next_one_time_prekey_id)
    }

    fn set_next_one_time_prekey_id(&self, next: u32) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.next_one_time_prekey_id = inner.next_one_time_prekey_id.max(next);
        Ok(())
    }

    fn session_record(
        &self,
        participants: &ParticipantPair,
    ) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.lock()?.sessions.get(participants).cloned())
    }

    fn put_session_record(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.lock()?.sessions.insert(record.participants().clone(), record.clone());
        Ok(())
    }

    fn remove_session(&self, participants: &ParticipantPair) -> Result<(), StoreError> {
        self.lock()?.sessions.remove(participants);
        Ok(())
    }

    fn complete_handshake(&self, completion: &HandshakeCompletion<'_>) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        if let Some(id) = completion.one_time_prekey_id {
            inner.one_time_prekeys.remove(&id).ok_or(StoreError::NotFound("one-time prekey"))?;
        }
        let previous = inner.identities.insert(completion.remote.clone(), *completion.identity);
        inner.sessions.insert(completion.record.participants().clone(), completion.record.clone());
        Ok(previous.is_some_and(|pinned| pinned != *completion.identity))
    }
}
