//! Prekey directory abstraction.
//!
//! The directory is the one network collaborator the core talks to: devices
//! publish their prekeys to it, and initiators fetch a bundle from it before
//! the first message to a user.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use parley_crypto::IdentityPublicKey;
use parley_proto::UserId;

use crate::{
    bundle::{OneTimePreKeyEntry, PreKeyBundle, PublishedPreKeys, SignedPreKeyEntry},
    error::DirectoryError,
};

/// Source of other users' prekey bundles.
///
/// One-time prekeys are handed out by `fetch_prekey_bundle` but only leave
/// the pool through `mark_one_time_prekey_consumed`. That call is the
/// arbiter when two initiators fetched the same key: exactly one succeeds,
/// the other gets `AlreadyConsumed` and establishes without it.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Fetch a bundle for `user`.
    ///
    /// Returns `NotFound` if the user never published keys.
    async fn fetch_prekey_bundle(&self, user: &UserId) -> Result<PreKeyBundle, DirectoryError>;

    /// Publish keys for `user`.
    ///
    /// Replaces the identity and signed prekey, and adds the one-time prekeys
    /// to the pool.
    async fn publish_prekeys(
        &self,
        user: &UserId,
        prekeys: PublishedPreKeys,
    ) -> Result<(), DirectoryError>;

    /// Remove a one-time prekey from the pool.
    ///
    /// Returns `AlreadyConsumed` if another establishment removed it first.
    async fn mark_one_time_prekey_consumed(
        &self,
        user: &UserId,
        key_id: u32,
    ) -> Result<(), DirectoryError>;
}

struct Published {
    identity: IdentityPublicKey,
    signed_prekey: Option<SignedPreKeyEntry>,
    one_time_prekeys: BTreeMap<u32, OneTimePreKeyEntry>,
}

/// In-process directory.
///
/// Hands out the lowest-numbered remaining one-time prekey.
#[derive(Default)]
pub struct MemoryDirectory {
    users: Mutex<HashMap<UserId, Published>>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of one-time prekeys left for `user`.
    pub fn one_time_prekeys_remaining(&self, user: &UserId) -> Result<usize, DirectoryError> {
        Ok(self.lock()?.get(user).map_or(0, |published| published.one_time_prekeys.len()))
    }

    /// Withdraw the signed prekey of `user`, leaving an incomplete bundle.
    pub fn withdraw_signed_prekey(&self, user: &UserId) -> Result<(), DirectoryError> {
        if let Some(published) = self.lock()?.get_mut(user) {
            published.signed_prekey = None;
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<UserId, Published>>, DirectoryError> {
        self.users.lock().map_err(|_| DirectoryError::Unavailable("directory lock poisoned".into()))
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn fetch_prekey_bundle(&self, user: &UserId) -> Result<PreKeyBundle, DirectoryError> {
        let users = self.lock()?;
        let published = users.get(user).ok_or_else(|| DirectoryError::NotFound(user.clone()))?;

        Ok(PreKeyBundle {
            identity: published.identity,
            signed_prekey: published.signed_prekey,
            one_time_prekey: published.one_time_prekeys.values().next().copied(),
        })
    }

    async fn publish_prekeys(
        &self,
        user: &UserId,
        prekeys: PublishedPreKeys,
    ) -> Result<(), DirectoryError> {
        let mut users = self.lock()?;
        let published = users.entry(user.clone()).or_insert_with(|| Published {
            identity: prekeys.identity,
            signed_prekey: None,
            one_time_prekeys: BTreeMap::new(),
        });

        if published.identity != prekeys.identity {
            // New device identity: old one-time prekeys belong to the old identity
            published.one_time_prekeys.clear();
        }
        published.identity = prekeys.identity;
        published.signed_prekey = Some(prekeys.signed_prekey);
        published.one_time_prekeys.extend(prekeys.one_time_prekeys.into_iter().map(|k| (k.id, k)));
        Ok(())
    }

    async fn mark_one_time_prekey_consumed(
        &self,
        user: &UserId,
        key_id: u32,
    ) -> Result<(), DirectoryError> {
        let mut users = self.lock()?;
        let published = users.get_mut(user).ok_or_else(|| DirectoryError::NotFound(user.clone()))?;

        published
            .one_time_prekeys
            .remove(&key_id)
            .map(|_| ())
            .ok_or_else(|| DirectoryError::AlreadyConsumed { user: user.clone(), key_id })
    }
}
