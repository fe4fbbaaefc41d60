//! Prekey bundles as they move through the directory.

use parley_crypto::{IdentityPublicKey, OneTimePreKeyPublic, Signature, SignedPreKeyPublic};
use serde::{Deserialize, Serialize};

/// Public view of a signed prekey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKeyEntry {
    /// Key id
    pub id: u32,
    /// Public key
    pub public: SignedPreKeyPublic,
    /// Identity signature over `public`
    pub signature: Signature,
}

/// Public view of a one-time prekey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKeyEntry {
    /// Key id
    pub id: u32,
    /// Public key
    pub public: OneTimePreKeyPublic,
}

/// Read-only snapshot of a user's published keys, consumed by one
/// establishment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    /// Owner's identity key
    pub identity: IdentityPublicKey,
    /// Active signed prekey; establishment fails without it
    pub signed_prekey: Option<SignedPreKeyEntry>,
    /// One-time prekey, absent when the pool is exhausted
    pub one_time_prekey: Option<OneTimePreKeyEntry>,
}

/// Keys a device hands to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPreKeys {
    /// Device identity key
    pub identity: IdentityPublicKey,
    /// Signed prekey to advertise (replaces any earlier one)
    pub signed_prekey: SignedPreKeyEntry,
    /// One-time prekeys to add to the pool
    pub one_time_prekeys: Vec<OneTimePreKeyEntry>,
}
