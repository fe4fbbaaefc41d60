//! Encrypted session store on an embedded redb database.
//!
//! # Layout
//!
//! Three tables, one per namespace, each mapping a string key to a sealed
//! record:
//!
//! ```text
//! identity   "local"                   → IdentityKeyPair
//!            "remote:<user>"           → IdentityPublicKey
//! prekey     "signed:<id>"             → SignedPreKey
//!            "one-time:<id>"           → OneTimePreKey
//!            "meta:next-one-time"      → u32
//! session    "<len>:<low><high>"       → SessionRecord
//! ```
//!
//! Ids are zero-padded so lexicographic key order is numeric order.
//!
//! # Security
//!
//! Records hold private keys and chain keys, so each value is CBOR-encoded
//! and sealed with XChaCha20-Poly1305 under the device [`StorageKey`], using
//! a fresh random nonce and `table || 0x00 || key` as associated data. A
//! record that fails to open is reported as `Corrupt`, never skipped, and
//! no write transaction that read a corrupt record is committed.

use std::path::Path;

use parley_crypto::{
    IdentityKeyPair, IdentityPublicKey, RECORD_NONCE_SIZE, StorageKey, open_record, seal_record,
};
use parley_proto::UserId;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};
use zeroize::Zeroizing;

use super::{HandshakeCompletion, SessionStore};
use crate::{
    env::Environment,
    error::StoreError,
    keys::{OneTimePreKey, SignedPreKey},
    session::{ParticipantPair, SessionRecord},
};

#[derive(Clone, Copy)]
struct Namespace {
    name: &'static str,
    table: TableDefinition<'static, &'static str, &'static [u8]>,
}

const IDENTITY: Namespace = Namespace { name: "identity", table: TableDefinition::new("identity") };
const PREKEY: Namespace = Namespace { name: "prekey", table: TableDefinition::new("prekey") };
const SESSION: Namespace = Namespace { name: "session", table: TableDefinition::new("session") };

const LOCAL_IDENTITY_KEY: &str = "local";
const NEXT_ONE_TIME_KEY: &str = "meta:next-one-time";
const SIGNED_PREFIX: &str = "signed:";
// ';' sorts immediately after ':'
const SIGNED_RANGE_END: &str = "signed;";

fn remote_identity_key(remote: &UserId) -> String {
    format!("remote:{remote}")
}

fn signed_prekey_key(id: u32) -> String {
    format!("{SIGNED_PREFIX}{id:010}")
}

fn one_time_prekey_key(id: u32) -> String {
    format!("one-time:{id:010}")
}

fn backend<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Session store persisted in a redb database file.
pub struct RedbStore<E: Environment> {
    db: Database,
    key: StorageKey,
    env: E,
}

impl<E: Environment> RedbStore<E> {
    /// Open (or create) the database at `path`.
    ///
    /// `key` must be the same key the database was created with; records
    /// sealed under another key fail to open as `Corrupt`.
    ///
    /// # Errors
    ///
    /// `Backend` if the file cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>, key: StorageKey, env: E) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(backend)?;

        let txn = db.begin_write().map_err(backend)?;
        for namespace in [IDENTITY, PREKEY, SESSION] {
            txn.open_table(namespace.table).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;

        Ok(Self { db, key, env })
    }

    fn seal<T: Serialize>(
        &self,
        namespace: Namespace,
        key: &str,
        value: &T,
    ) -> Result<Vec<u8>, StoreError> {
        let mut plaintext = Zeroizing::new(Vec::new());
        ciborium::into_writer(value, &mut *plaintext)
            .map_err(|err| {
                StoreError::Backend(format!("encode {} record: {err}", namespace.name))
            })?;

        let nonce = self.env.random_array::<RECORD_NONCE_SIZE>()?;
        seal_record(&self.key, nonce, &record_aad(namespace, key), &plaintext).map_err(backend)
    }

    fn open_value<T: DeserializeOwned>(
        &self,
        namespace: Namespace,
        key: &str,
        sealed: &[u8],
    ) -> Result<T, StoreError> {
        let plaintext = Zeroizing::new(
            open_record(&self.key, &record_aad(namespace, key), sealed).map_err(|_| {
                StoreError::Corrupt {
                    table: namespace.name,
                    reason: format!("{key}: authentication failed"),
                }
            })?,
        );
        ciborium::from_reader(plaintext.as_slice()).map_err(|err| StoreError::Corrupt {
            table: namespace.name,
            reason: format!("{key}: {err}"),
        })
    }

    fn get<T: DeserializeOwned>(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(namespace.table).map_err(backend)?;
        let sealed = table.get(key).map_err(backend)?.map(|guard| guard.value().to_vec());

        sealed.map(|sealed| self.open_value(namespace, key, &sealed)).transpose()
    }

    fn put<T: Serialize>(
        &self,
        namespace: Namespace,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let sealed = self.seal(namespace, key, value)?;

        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(namespace.table).map_err(backend)?;
            table.insert(key, sealed.as_slice()).map_err(backend)?;
        }
        txn.commit().map_err(backend)
    }

    fn remove(&self, namespace: Namespace, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        let mut table = txn.open_table(namespace.table).map_err(backend)?;
        let removed = table.remove(key).map_err(backend)?.map(|guard| guard.value().to_vec());
        drop(table);
        txn.commit().map_err(backend)?;
        Ok(removed)
    }
}

fn record_aad(namespace: Namespace, key: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(namespace.name.len() + 1 + key.len());
    aad.extend_from_slice(namespace.name.as_bytes());
    aad.push(0);
    aad.extend_from_slice(key.as_bytes());
    aad
}

impl<E: Environment> SessionStore for RedbStore<E> {
    fn local_identity(&self) -> Result<Option<IdentityKeyPair>, StoreError> {
        self.get(IDENTITY, LOCAL_IDENTITY_KEY)
    }

    fn put_local_identity(&self, identity: &IdentityKeyPair) -> Result<(), StoreError> {
        self.put(IDENTITY, LOCAL_IDENTITY_KEY, identity)
    }

    fn identity(&self, remote: &UserId) -> Result<Option<IdentityPublicKey>, StoreError> {
        self.get(IDENTITY, &remote_identity_key(remote))
    }

    fn put_identity(&self, remote: &UserId, key: &IdentityPublicKey) -> Result<(), StoreError> {
        self.put(IDENTITY, &remote_identity_key(remote), key)
    }

    fn remove_identity(&self, remote: &UserId) -> Result<(), StoreError> {
        self.remove(IDENTITY, &remote_identity_key(remote)).map(|_| ())
    }

    fn signed_prekey(&self, id: u32) -> Result<Option<SignedPreKey>, StoreError> {
        self.get(PREKEY, &signed_prekey_key(id))
    }

    fn signed_prekeys(&self) -> Result<Vec<SignedPreKey>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(PREKEY.table).map_err(backend)?;

        let mut keys = Vec::new();
        for entry in table.range(SIGNED_PREFIX..SIGNED_RANGE_END).map_err(backend)? {
            let (key, value) = entry.map_err(backend)?;
            keys.push(self.open_value(PREKEY, key.value(), value.value())?);
        }
        Ok(keys)
    }

    fn put_signed_prekey(&self, key: &SignedPreKey) -> Result<(), StoreError> {
        self.put(PREKEY, &signed_prekey_key(key.id), key)
    }

    fn remove_signed_prekey(&self, id: u32) -> Result<(), StoreError> {
        self.remove(PREKEY, &signed_prekey_key(id)).map(|_| ())
    }

    fn one_time_prekey(&self, id: u32) -> Result<Option<OneTimePreKey>, StoreError> {
        self.get(PREKEY, &one_time_prekey_key(id))
    }

    fn put_one_time_prekey(&self, key: &OneTimePreKey) -> Result<(), StoreError> {
        self.put(PREKEY, &one_time_prekey_key(key.id), key)
    }

    fn take_one_time_prekey(&self, id: u32) -> Result<Option<OneTimePreKey>, StoreError> {
        let key = one_time_prekey_key(id);
        let txn = self.db.begin_write().map_err(backend)?;
        let taken = {
            let mut table = txn.open_table(PREKEY.table).map_err(backend)?;
            let sealed =
                table.remove(key.as_str()).map_err(backend)?.map(|guard| guard.value().to_vec());
            sealed.map(|sealed| self.open_value(PREKEY, &key, &sealed)).transpose()?
        };
        txn.commit().map_err(backend)?;
        Ok(taken)
    }

    fn next_one_time_prekey_id(&self) -> Result<u32, StoreError> {
        Ok(self.get(PREKEY, NEXT_ONE_TIME_KEY)?.unwrap_or(0))
    }

    fn set_next_one_time_prekey_id(&self, next: u32) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(PREKEY.table).map_err(backend)?;
            let current =
                table.get(NEXT_ONE_TIME_KEY).map_err(backend)?.map(|guard| guard.value().to_vec());
            let current: u32 = match current {
                Some(sealed) => self.open_value(PREKEY, NEXT_ONE_TIME_KEY, &sealed)?,
                None => 0,
            };
            if next > current {
                let sealed = self.seal(PREKEY, NEXT_ONE_TIME_KEY, &next)?;
                table.insert(NEXT_ONE_TIME_KEY, sealed.as_slice()).map_err(backend)?;
            }
        }
        txn.commit().map_err(backend)
    }

    fn session_record(
        &self,
        participants: &ParticipantPair,
    ) -> Result<Option<SessionRecord>, StoreError> {
        self.get(SESSION, &participants.storage_key())
    }

    fn put_session_record(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.put(SESSION, &record.participants().storage_key(), record)
    }

    fn remove_session(&self, participants: &ParticipantPair) -> Result<(), StoreError> {
        self.remove(SESSION, &participants.storage_key()).map(|_| ())
    }

    fn complete_handshake(&self, completion: &HandshakeCompletion<'_>) -> Result<bool, StoreError> {
        let identity_key = remote_identity_key(completion.remote);
        let session_key = completion.record.participants().storage_key();
        let sealed_identity = self.seal(IDENTITY, &identity_key, completion.identity)?;
        let sealed_record = self.seal(SESSION, &session_key, completion.record)?;

        // Dropping the transaction on any early return aborts every write
        let txn = self.db.begin_write().map_err(backend)?;
        if let Some(id) = completion.one_time_prekey_id {
            let mut prekeys = txn.open_table(PREKEY.table).map_err(backend)?;
            let consumed = prekeys.remove(one_time_prekey_key(id).as_str()).map_err(backend)?;
            if consumed.is_none() {
                return Err(StoreError::NotFound("one-time prekey"));
            }
        }
        let changed = {
            let mut identities = txn.open_table(IDENTITY.table).map_err(backend)?;
            let pinned = identities
                .get(identity_key.as_str())
                .map_err(backend)?
                .map(|guard| guard.value().to_vec());
            let pinned: Option<IdentityPublicKey> = pinned
                .map(|sealed| self.open_value(IDENTITY, &identity_key, &sealed))
                .transpose()?;
            identities.insert(identity_key.as_str(), sealed_identity.as_slice()).map_err(backend)?;
            pinned.is_some_and(|pinned| pinned != *completion.identity)
        };
        {
            let mut sessions = txn.open_table(SESSION.table).map_err(backend)?;
            sessions.insert(session_key.as_str(), sealed_record.as_slice()).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(changed)
    }
}
