//! Encrypt/decrypt entry points.
//!
//! [`MessageCodec`] ties the pieces together for one local user: it loads or
//! establishes the session, drives the ratchet, seals or opens the payload
//! and persists the advanced session.
//!
//! # Flow
//!
//! ```text
//!  encrypt(remote, pt)                decrypt(remote, envelope)
//!  ───────────────────                ─────────────────────────
//!  lock(pair)                         lock(pair)
//!  record? ── no ──> fetch bundle     handshake header?
//!     │              establish()        ├─ accepted before ──> open with that session
//!     ▼                                 ├─ session evicted ──> HandshakeReplayed
//!  advance current sending chain        ├─ new ──────────────> accept, open, commit
//!  seal(header || ad)                   └─ none ─────────────> open session named by id
//!  persist ──> Envelope
//! ```
//!
//! # Handshakes
//!
//! A new handshake replaces the current session unless both sides initiated
//! at once, which shows as a current session still waiting for its first
//! reply. Both sides then keep the session of the handshake with the lower
//! base key as current and archive the other, so they converge on one
//! session. Archived sessions keep decrypting envelopes addressed to them,
//! and their counters reject replays of those envelopes.
//!
//! # Locking
//!
//! Every call holds the session's async lock from load to persist, so two
//! encrypts on one session never reuse a counter and two first sends never
//! establish twice. Locks are per participant pair; calls for different
//! pairs run concurrently. Idle locks are pruned once the table holds
//! [`LOCK_TABLE_PRUNE_AT`] entries.
//!
//! # Failure
//!
//! Nothing is persisted on a failed decrypt. A tampered envelope leaves the
//! stored session exactly as it was, and a retransmission still decrypts.
//! An accepted handshake is committed in one atomic store write.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use parley_crypto::{BaseKeyPublic, IdentityPublicKey, MessageKey, open_message, seal_message};
use parley_proto::{Envelope, EnvelopeHeader, PreKeyHeader, ProtocolError, UserId};

use crate::{
    bundle::{OneTimePreKeyEntry, PublishedPreKeys, SignedPreKeyEntry},
    config::CodecConfig,
    directory::Directory,
    env::Environment,
    error::{CodecError, DirectoryError, KeyMaterialError, StoreError},
    establishment::{accept, check_bundle, establish},
    keys::{
        OneTimePreKey, generate_identity_key_pair, generate_one_time_prekeys,
        generate_signed_prekey,
    },
    ratchet::{advance_receiving_chain_to, advance_sending_chain},
    session::{ParticipantPair, Session, SessionRecord},
    store::{HandshakeCompletion, SessionStore},
};

/// Lock table size at which locks nobody holds or awaits are dropped.
pub const LOCK_TABLE_PRUNE_AT: usize = 1024;

type SessionLock = Arc<tokio::sync::Mutex<()>>;

/// Message codec for one local user.
///
/// Generic over its collaborators so tests can run against in-memory stores,
/// in-memory directories and seeded RNGs.
pub struct MessageCodec<S: SessionStore, D: Directory, E: Environment> {
    local_user: UserId,
    store: S,
    directory: Arc<D>,
    env: E,
    config: CodecConfig,
    locks: Mutex<HashMap<ParticipantPair, SessionLock>>,
}

impl<S: SessionStore, D: Directory, E: Environment> MessageCodec<S, D, E> {
    /// Create a codec for `local_user`.
    pub fn new(
        local_user: UserId,
        store: S,
        directory: Arc<D>,
        env: E,
        config: CodecConfig,
    ) -> Self {
        Self { local_user, store, directory, env, config, locks: Mutex::new(HashMap::new()) }
    }

    /// User this codec encrypts and decrypts for.
    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// Underlying session store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Codec configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Encrypt `plaintext` for `remote`.
    ///
    /// Establishes a session first if none exists. The session is persisted
    /// with its advanced sending chain before the envelope is returned.
    ///
    /// # Errors
    ///
    /// - `SelfSession` if `remote` is the local user
    /// - `Protocol` if the plaintext exceeds the envelope size limit
    /// - `FetchTimeout` / `Directory` if the bundle cannot be fetched
    /// - `Establish` if the bundle is incomplete, invalid or untrusted
    /// - `Ratchet` if the sending chain is exhausted
    /// - `Store` if the session cannot be loaded or persisted
    pub async fn encrypt(
        &self,
        remote: &UserId,
        plaintext: &[u8],
    ) -> Result<Envelope, CodecError> {
        if plaintext.len() > Envelope::MAX_CIPHERTEXT_SIZE {
            return Err(ProtocolError::CiphertextTooLarge {
                size: plaintext.len(),
                max: Envelope::MAX_CIPHERTEXT_SIZE,
            }
            .into());
        }
        let participants = self.participants(remote)?;
        let lock = self.session_lock(&participants);
        let _guard = lock.lock().await;

        let mut record = match self.store.session_record(&participants)? {
            Some(record) => record,
            None => SessionRecord::new(self.establish_with(remote).await?),
        };
        let session = record.current().clone();

        let (advanced, message_key) = advance_sending_chain(&session)?;
        let header = EnvelopeHeader {
            sender: self.local_user.clone(),
            session_id: session.session_id(),
            counter: session.send_counter(),
            previous_counter: session.previous_counter(),
            prekey: session.pending_prekey().copied(),
        };
        let (ciphertext, tag) =
            seal_message(&message_key, &message_aad(&header, &session), plaintext)?;

        record.update(advanced);
        self.store.put_session_record(&record)?;
        Ok(Envelope { header, ciphertext, tag })
    }

    /// Decrypt an envelope from `remote`.
    ///
    /// A handshake envelope for a session this device does not hold yet
    /// completes the responder side of the establishment. Envelopes for
    /// archived sessions still decrypt.
    ///
    /// # Errors
    ///
    /// - `SenderMismatch` if the envelope names a different sender
    /// - `SessionNotFound` if there is no session and no handshake header
    /// - `SessionMismatch` if no held session has the envelope's session id
    /// - `HandshakeReplayed` if the handshake was accepted before and its
    ///   session has been evicted
    /// - `AuthenticationFailed` on any tag or commitment mismatch
    /// - `OneTimePreKeyConsumed` if a concurrent establishment used the
    ///   one-time prekey first
    /// - `Ratchet` for stale or too-far-ahead counters
    /// - `Establish` if the handshake is untrusted or names unknown prekeys
    /// - `Store` if the session cannot be loaded or persisted
    pub async fn decrypt(
        &self,
        remote: &UserId,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, CodecError> {
        if envelope.header.sender != *remote {
            return Err(CodecError::SenderMismatch {
                expected: remote.clone(),
                actual: envelope.header.sender.clone(),
            });
        }
        let participants = self.participants(remote)?;
        let lock = self.session_lock(&participants);
        let _guard = lock.lock().await;

        match (self.store.session_record(&participants)?, envelope.header.prekey) {
            (record, Some(handshake)) => self.open_handshake(remote, record, &handshake, envelope),
            (Some(record), None) => {
                let session = record
                    .find(envelope.header.session_id)
                    .cloned()
                    .ok_or(CodecError::SessionMismatch)?;
                self.open_held(record, &session, envelope)
            },
            (None, None) => Err(CodecError::SessionNotFound(remote.clone())),
        }
    }

    /// Create and publish this device's keys.
    ///
    /// Generates the identity if absent and a signed prekey if none is held,
    /// then a batch of `one_time_prekey_batch` one-time prekeys. Calling it
    /// again keeps the identity and publishes a fresh batch.
    ///
    /// # Errors
    ///
    /// - `KeyMaterial` if key generation fails
    /// - `FetchTimeout` / `Directory` if publishing fails
    /// - `Store` if the keys cannot be persisted
    pub async fn provision(&self) -> Result<PublishedPreKeys, CodecError> {
        let identity = match self.store.local_identity()? {
            Some(identity) => identity,
            None => {
                let identity = generate_identity_key_pair(&self.env)?;
                self.store.put_local_identity(&identity)?;
                tracing::info!(user = %self.local_user, "identity generated");
                identity
            },
        };
        let signed_prekey = match self.store.signed_prekeys()?.pop() {
            Some(key) => key,
            None => {
                let key = generate_signed_prekey(&self.env, &identity, 1)?;
                self.store.put_signed_prekey(&key)?;
                key
            },
        };
        let one_time_prekeys = self.store_one_time_prekeys(self.config.one_time_prekey_batch)?;

        let published = PublishedPreKeys {
            identity: identity.public(),
            signed_prekey: signed_prekey.entry(),
            one_time_prekeys,
        };
        self.publish(published.clone()).await?;

        tracing::info!(
            user = %self.local_user,
            signed_prekey = signed_prekey.id,
            one_time_prekeys = published.one_time_prekeys.len(),
            "prekeys published"
        );
        Ok(published)
    }

    /// Replace the advertised signed prekey.
    ///
    /// The previous key stays in the store so in-flight handshakes that name
    /// it still complete; remove it with
    /// [`SessionStore::remove_signed_prekey`] once they have drained.
    ///
    /// # Errors
    ///
    /// - `NotProvisioned` if the device has no identity
    /// - `KeyMaterial` if key generation fails or ids are exhausted
    /// - `FetchTimeout` / `Directory` if publishing fails
    pub async fn rotate_signed_prekey(&self) -> Result<SignedPreKeyEntry, CodecError> {
        let identity = self.store.local_identity()?.ok_or(CodecError::NotProvisioned)?;
        let next_id = match self.store.signed_prekeys()?.last() {
            Some(current) => current.id.checked_add(1).ok_or(KeyMaterialError::KeyIdExhausted)?,
            None => 1,
        };

        let key = generate_signed_prekey(&self.env, &identity, next_id)?;
        self.store.put_signed_prekey(&key)?;
        self.publish(PublishedPreKeys {
            identity: identity.public(),
            signed_prekey: key.entry(),
            one_time_prekeys: Vec::new(),
        })
        .await?;

        tracing::info!(user = %self.local_user, signed_prekey = key.id, "signed prekey rotated");
        Ok(key.entry())
    }

    /// Generate and publish `count` more one-time prekeys.
    ///
    /// # Errors
    ///
    /// - `NotProvisioned` if the device has no identity or signed prekey
    /// - `KeyMaterial` if key generation fails or ids are exhausted
    /// - `FetchTimeout` / `Directory` if publishing fails
    pub async fn replenish_one_time_prekeys(
        &self,
        count: u32,
    ) -> Result<Vec<OneTimePreKeyEntry>, CodecError> {
        let identity = self.store.local_identity()?.ok_or(CodecError::NotProvisioned)?;
        let signed_prekey = self.store.signed_prekeys()?.pop().ok_or(CodecError::NotProvisioned)?;

        let one_time_prekeys = self.store_one_time_prekeys(count)?;
        self.publish(PublishedPreKeys {
            identity: identity.public(),
            signed_prekey: signed_prekey.entry(),
            one_time_prekeys: one_time_prekeys.clone(),
        })
        .await?;

        tracing::debug!(user = %self.local_user, count, "one-time prekeys replenished");
        Ok(one_time_prekeys)
    }

    /// Approve `key` as the identity of `remote`.
    ///
    /// Returns `true` if a different identity was pinned before. The session
    /// established under the old identity is removed in that case, so the
    /// next message establishes afresh.
    ///
    /// # Errors
    ///
    /// - `SelfSession` if `remote` is the local user
    /// - `Store` if the store cannot be updated
    pub async fn trust_identity(
        &self,
        remote: &UserId,
        key: &IdentityPublicKey,
    ) -> Result<bool, CodecError> {
        let participants = self.participants(remote)?;
        let lock = self.session_lock(&participants);
        let _guard = lock.lock().await;

        let changed = self.store.save_identity(remote, key)?;
        if changed {
            tracing::warn!(remote = %remote, "identity changed, session removed");
            self.store.remove_session(&participants)?;
        }
        Ok(changed)
    }

    /// Current session with `remote`, if any.
    ///
    /// # Errors
    ///
    /// `Store` if the session cannot be loaded.
    pub fn session_snapshot(&self, remote: &UserId) -> Result<Option<Session>, CodecError> {
        let participants = ParticipantPair::new(self.local_user.clone(), remote.clone());
        Ok(self.store.session(&participants)?)
    }

    fn participants(&self, remote: &UserId) -> Result<ParticipantPair, CodecError> {
        if *remote == self.local_user {
            return Err(CodecError::SelfSession);
        }
        Ok(ParticipantPair::new(self.local_user.clone(), remote.clone()))
    }

    fn session_lock(&self, participants: &ParticipantPair) -> SessionLock {
        // The table holds no invariants a panicking holder could break
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() >= LOCK_TABLE_PRUNE_AT {
            // Holders and waiters each own a clone
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(locks.entry(participants.clone()).or_default())
    }

    async fn establish_with(&self, remote: &UserId) -> Result<Session, CodecError> {
        let fetch = self.directory.fetch_prekey_bundle(remote);
        let mut bundle = self.bounded(self.config.bundle_fetch_timeout, remote, fetch).await?;
        check_bundle(&self.store, remote, &bundle)?;

        if let Some(one_time_prekey) = bundle.one_time_prekey {
            let marked = self
                .bounded(
                    self.config.directory_timeout,
                    remote,
                    self.directory.mark_one_time_prekey_consumed(remote, one_time_prekey.id),
                )
                .await;
            match marked {
                Ok(()) => {},
                Err(CodecError::Directory(DirectoryError::AlreadyConsumed { .. })) => {
                    tracing::warn!(
                        remote = %remote,
                        key_id = one_time_prekey.id,
                        "one-time prekey taken by another initiator, establishing without it"
                    );
                    bundle.one_time_prekey = None;
                },
                Err(error) => return Err(error),
            }
        }

        Ok(establish(&self.store, &self.env, &self.local_user, remote, &bundle)?)
    }

    /// Open with a held session and persist it back into its record.
    fn open_held(
        &self,
        mut record: SessionRecord,
        session: &Session,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, CodecError> {
        let (advanced, plaintext) = self.open(session, envelope)?;
        record.update(advanced.acknowledged());
        self.store.put_session_record(&record)?;
        Ok(plaintext)
    }

    fn open_handshake(
        &self,
        remote: &UserId,
        record: Option<SessionRecord>,
        handshake: &PreKeyHeader,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, CodecError> {
        if let Some(record) = &record {
            if let Some(session) = record.find_accepted(&handshake.base_key).cloned() {
                return self.open_held(record.clone(), &session, envelope);
            }
            if record.has_accepted(&handshake.base_key) {
                tracing::warn!(remote = %remote, "replayed handshake rejected");
                return Err(CodecError::HandshakeReplayed(remote.clone()));
            }
        }

        let session = accept(&self.store, &self.local_user, remote, handshake)?;
        let (accepted, plaintext) = self.open(&session, envelope)?;
        let session_id = accepted.session_id();

        let record = match record {
            None => SessionRecord::new(accepted),
            Some(mut record) => {
                if supersedes(record.current(), &handshake.base_key) {
                    tracing::info!(remote = %remote, "new handshake replaces current session");
                    record.promote(accepted);
                } else {
                    tracing::info!(remote = %remote, "concurrent handshake archived");
                    record.archive(accepted);
                }
                record
            },
        };
        self.commit_handshake(remote, handshake, &record)?;

        tracing::info!(
            remote = %remote,
            session_id = %session_id,
            signed_prekey = handshake.signed_prekey_id,
            one_time_prekey = ?handshake.one_time_prekey_id,
            "session accepted"
        );
        Ok(plaintext)
    }

    fn commit_handshake(
        &self,
        remote: &UserId,
        handshake: &PreKeyHeader,
        record: &SessionRecord,
    ) -> Result<(), CodecError> {
        let completion = HandshakeCompletion {
            remote,
            identity: &handshake.identity,
            one_time_prekey_id: handshake.one_time_prekey_id,
            record,
        };
        match self.store.complete_handshake(&completion) {
            Ok(true) => {
                tracing::warn!(remote = %remote, "pinned identity replaced during handshake");
                Ok(())
            },
            Ok(false) => Ok(()),
            Err(StoreError::NotFound(what)) => Err(match handshake.one_time_prekey_id {
                Some(id) => CodecError::OneTimePreKeyConsumed(id),
                None => StoreError::NotFound(what).into(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    /// Advance to the envelope's counter and open it. Persists nothing.
    fn open(
        &self,
        session: &Session,
        envelope: &Envelope,
    ) -> Result<(Session, Vec<u8>), CodecError> {
        if session.session_id() != envelope.header.session_id {
            return Err(CodecError::SessionMismatch);
        }
        let (advanced, message_key) =
            advance_receiving_chain_to(session, envelope.header.counter, self.config.max_skip)?;
        let plaintext = open_envelope(&message_key, session, envelope)?;
        Ok((advanced, plaintext))
    }

    async fn publish(&self, prekeys: PublishedPreKeys) -> Result<(), CodecError> {
        self.bounded(
            self.config.directory_timeout,
            &self.local_user,
            self.directory.publish_prekeys(&self.local_user, prekeys),
        )
        .await
    }

    async fn bounded<T>(
        &self,
        limit: Duration,
        user: &UserId,
        request: impl Future<Output = Result<T, DirectoryError>>,
    ) -> Result<T, CodecError> {
        match tokio::time::timeout(limit, request).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::warn!(user = %user, ?limit, "directory request timed out");
                Err(CodecError::FetchTimeout(user.clone()))
            },
        }
    }

    fn store_one_time_prekeys(&self, count: u32) -> Result<Vec<OneTimePreKeyEntry>, CodecError> {
        let start = self.store.next_one_time_prekey_id()?;
        let next = start.checked_add(count).ok_or(KeyMaterialError::KeyIdExhausted)?;
        let keys = generate_one_time_prekeys(&self.env, start, count)?;

        // Reserve the ids before storing so a crash never reissues them
        self.store.set_next_one_time_prekey_id(next)?;
        for key in &keys {
            self.store.put_one_time_prekey(key)?;
        }
        Ok(keys.iter().map(OneTimePreKey::entry).collect())
    }
}

/// Whether a new handshake with `base_key` replaces `current`.
///
/// Only a current session still awaiting its first reply can win: of two
/// crossing handshakes, the one with the lower base key is kept.
fn supersedes(current: &Session, base_key: &BaseKeyPublic) -> bool {
    current.pending_prekey().is_none_or(|own| base_key.as_bytes() < own.base_key.as_bytes())
}

fn message_aad(header: &EnvelopeHeader, session: &Session) -> Vec<u8> {
    let mut aad = header.to_bytes();
    aad.extend_from_slice(&session.associated_data());
    aad
}

fn open_envelope(
    message_key: &MessageKey,
    session: &Session,
    envelope: &Envelope,
) -> Result<Vec<u8>, CodecError> {
    let aad = message_aad(&envelope.header, session);
    open_message(message_key, &aad, &envelope.ciphertext, &envelope.tag).map_err(|_| {
        tracing::warn!(
            sender = %envelope.header.sender,
            session_id = %envelope.header.session_id,
            counter = envelope.header.counter,
            "message authentication failed"
        );
        CodecError::AuthenticationFailed
    })
}
