//! Shared fixtures for codec integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use parley_core::{
    CodecConfig, EntropyError, Environment, HandshakeCompletion, MemoryDirectory, MemoryStore,
    MessageCodec, OneTimePreKey, ParticipantPair, SessionRecord, SessionStore, SignedPreKey,
    StoreError,
};
use parley_crypto::{IdentityKeyPair, IdentityPublicKey};
use parley_proto::UserId;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Deterministic RNG shared by clones.
#[derive(Clone)]
pub struct SeededEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SeededEnv {
    pub fn new(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }
}

impl Environment for SeededEnv {
    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        self.rng.lock().map_err(|_| EntropyError("rng lock poisoned".into()))?.fill_bytes(buffer);
        Ok(())
    }
}

/// Environment whose RNG always fails.
#[derive(Clone)]
pub struct FailingEnv;

impl Environment for FailingEnv {
    fn random_bytes(&self, _buffer: &mut [u8]) -> Result<(), EntropyError> {
        Err(EntropyError("no entropy in tests".into()))
    }
}

pub type Codec<S = MemoryStore> = MessageCodec<S, MemoryDirectory, SeededEnv>;

pub fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

pub fn config() -> CodecConfig {
    CodecConfig { one_time_prekey_batch: 4, ..CodecConfig::default() }
}

/// Codec over a fresh memory store. Not provisioned.
pub fn codec(name: &str, directory: &Arc<MemoryDirectory>, seed: u64) -> Codec {
    codec_with(name, directory, MemoryStore::new(), seed, config())
}

pub fn codec_with<S: SessionStore>(
    name: &str,
    directory: &Arc<MemoryDirectory>,
    store: S,
    seed: u64,
    config: CodecConfig,
) -> Codec<S> {
    MessageCodec::new(user(name), store, Arc::clone(directory), SeededEnv::new(seed), config)
}

/// Provisioned codec over a fresh memory store.
pub async fn party(name: &str, directory: &Arc<MemoryDirectory>, seed: u64) -> Codec {
    let codec = codec(name, directory, seed);
    codec.provision().await.unwrap();
    codec
}

/// Runs before a handshake commits; an error aborts the commit.
pub type CommitHook =
    Box<dyn Fn(&MemoryStore, &HandshakeCompletion<'_>) -> Result<(), StoreError> + Send + Sync>;

/// Memory store that runs a hook before every handshake commit.
pub struct HookedStore {
    pub inner: MemoryStore,
    pub before_commit: CommitHook,
}

impl HookedStore {
    pub fn new(
        before_commit: impl Fn(&MemoryStore, &HandshakeCompletion<'_>) -> Result<(), StoreError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self { inner: MemoryStore::new(), before_commit: Box::new(before_commit) }
    }
}

impl SessionStore for HookedStore {
    fn local_identity(&self) -> Result<Option<IdentityKeyPair>, StoreError> {
        self.inner.local_identity()
    }

    fn put_local_identity(&self, identity: &IdentityKeyPair) -> Result<(), StoreError> {
        self.inner.put_local_identity(identity)
    }

    fn identity(&self, remote: &UserId) -> Result<Option<IdentityPublicKey>, StoreError> {
        self.inner.identity(remote)
    }

    fn put_identity(&self, remote: &UserId, key: &IdentityPublicKey) -> Result<(), StoreError> {
        self.inner.put_identity(remote, key)
    }

    fn remove_identity(&self, remote: &UserId) -> Result<(), StoreError> {
        self.inner.remove_identity(remote)
    }

    fn signed_prekey(&self, id: u32) -> Result<Option<SignedPreKey>, StoreError> {
        self.inner.signed_prekey(id)
    }

    fn signed_prekeys(&self) -> Result<Vec<SignedPreKey>, StoreError> {
        self.inner.signed_prekeys()
    }

    fn put_signed_prekey(&self, key: &SignedPreKey) -> Result<(), StoreError> {
        self.inner.put_signed_prekey(key)
    }

    fn remove_signed_prekey(&self, id: u32) -> Result<(), StoreError> {
        self.inner.remove_signed_prekey(id)
    }

    fn one_time_prekey(&self, id: u32) -> Result<Option<OneTimePreKey>, StoreError> {
        self.inner.one_time_prekey(id)
    }

    fn put_one_time_prekey(&self, key: &OneTimePreKey) -> Result<(), StoreError> {
        self.inner.put_one_time_prekey(key)
    }

    fn take_one_time_prekey(&self, id: u32) -> Result<Option<OneTimePreKey>, StoreError> {
        self.inner.take_one_time_prekey(id)
    }

    fn next_one_time_prekey_id(&self) -> Result<u32, StoreError> {
        self.inner.next_one_time_prekey_id()
    }

    fn set_next_one_time_prekey_id(&self, next: u32) -> Result<(), StoreError> {
        self.inner.set_next_one_time_prekey_id(next)
    }

    fn session_record(
        &self,
        participants: &ParticipantPair,
    ) -> Result<Option<SessionRecord>, StoreError> {
        self.inner.session_record(participants)
    }

    fn put_session_record(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.inner.put_session_record(record)
    }

    fn remove_session(&self, participants: &ParticipantPair) -> Result<(), StoreError> {
        self.inner.remove_session(participants)
    }

    fn complete_handshake(&self, completion: &HandshakeCompletion<'_>) -> Result<bool, StoreError> {
        (self.before_commit)(&self.inner, completion)?;
        self.inner.complete_handshake(completion)
    }
}
