//! Key material generation.
//!
//! Produces identity keys, signed prekeys and one-time prekeys from the
//! environment's random source. Outputs are plain values; persisting and
//! publishing them is the caller's job.
//!
//! Private key bytes pass through [`Zeroizing`] buffers so no copy outlives
//! the key it was used to build.

use parley_crypto::{
    CryptoError, DhSecret, IdentityKeyPair, IdentityPublicKey, KEY_SIZE, OneTimePreKeyPublic,
    Signature, SignedPreKeyPublic,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    bundle::{OneTimePreKeyEntry, SignedPreKeyEntry},
    env::Environment,
    error::KeyMaterialError,
};

/// Medium-term prekey signed by the identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKey {
    /// Monotonic key id
    pub id: u32,
    /// Published half
    pub public: SignedPreKeyPublic,
    /// Private half, never leaves the device
    pub private: DhSecret,
    /// Identity signature over `public`
    pub signature: Signature,
}

impl SignedPreKey {
    /// Public view for bundles.
    pub fn entry(&self) -> SignedPreKeyEntry {
        SignedPreKeyEntry { id: self.id, public: self.public, signature: self.signature }
    }
}

/// Single-use prekey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimePreKey {
    /// Key id, unique for the lifetime of the device
    pub id: u32,
    /// Published half
    pub public: OneTimePreKeyPublic,
    /// Private half, never leaves the device
    pub private: DhSecret,
    /// Set once an establishment has used this key
    pub consumed: bool,
}

impl OneTimePreKey {
    /// Public view for bundles.
    pub fn entry(&self) -> OneTimePreKeyEntry {
        OneTimePreKeyEntry { id: self.id, public: self.public }
    }
}

/// Generate a fresh long-term identity.
///
/// # Errors
///
/// `EntropyUnavailable` if the random source cannot be read.
pub fn generate_identity_key_pair<E: Environment>(
    env: &E,
) -> Result<IdentityKeyPair, KeyMaterialError> {
    let dh = random_secret(env)?;
    let signing = random_secret(env)?;
    Ok(IdentityKeyPair::from_secrets(*dh, *signing))
}

/// Generate a signed prekey and sign its public bytes with `identity`.
///
/// # Errors
///
/// `EntropyUnavailable` if the random source cannot be read.
pub fn generate_signed_prekey<E: Environment>(
    env: &E,
    identity: &IdentityKeyPair,
    key_id: u32,
) -> Result<SignedPreKey, KeyMaterialError> {
    let private = DhSecret::from_bytes(*random_secret(env)?);
    let public = SignedPreKeyPublic::from_bytes(private.public_bytes());
    let signature = identity.sign(public.as_bytes());

    Ok(SignedPreKey { id: key_id, public, private, signature })
}

/// Generate `count` one-time prekeys with sequential ids from `start_id`.
///
/// # Errors
///
/// - `EntropyUnavailable` if the random source cannot be read
/// - `KeyIdExhausted` if the id range would overflow
pub fn generate_one_time_prekeys<E: Environment>(
    env: &E,
    start_id: u32,
    count: u32,
) -> Result<Vec<OneTimePreKey>, KeyMaterialError> {
    start_id.checked_add(count).ok_or(KeyMaterialError::KeyIdExhausted)?;

    (0..count)
        .map(|offset| {
            let private = DhSecret::from_bytes(*random_secret(env)?);
            Ok(OneTimePreKey {
                id: start_id + offset,
                public: OneTimePreKeyPublic::from_bytes(private.public_bytes()),
                private,
                consumed: false,
            })
        })
        .collect()
}

/// Generate the ephemeral base key for one establishment.
///
/// # Errors
///
/// `EntropyUnavailable` if the random source cannot be read.
pub fn generate_base_key<E: Environment>(env: &E) -> Result<DhSecret, KeyMaterialError> {
    Ok(DhSecret::from_bytes(*random_secret(env)?))
}

/// Check a signed prekey's signature against its owner's identity.
///
/// # Errors
///
/// `InvalidSignature` or `InvalidPublicKey` if verification fails.
pub fn verify_signed_prekey(
    identity: &IdentityPublicKey,
    public: &SignedPreKeyPublic,
    signature: &Signature,
) -> Result<(), CryptoError> {
    identity.verify(public.as_bytes(), signature)
}

fn random_secret<E: Environment>(env: &E) -> Result<Zeroizing<[u8; KEY_SIZE]>, KeyMaterialError> {
    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    env.random_bytes(bytes.as_mut_slice())?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    };

    use super::*;
    use crate::error::EntropyError;

    #[derive(Clone, Default)]
    struct CountingEnv(Arc<AtomicU8>);

    impl Environment for CountingEnv {
        fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
            buffer.fill(self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1));
            Ok(())
        }
    }

    #[derive(Clone)]
    struct NoEntropy;

    impl Environment for NoEntropy {
        fn random_bytes(&self, _buffer: &mut [u8]) -> Result<(), EntropyError> {
            Err(EntropyError("device not ready".into()))
        }
    }

    #[test]
    fn signed_prekey_signature_verifies() {
        let env = CountingEnv::default();
        let identity = generate_identity_key_pair(&env).unwrap();
        let prekey = generate_signed_prekey(&env, &identity, 7).unwrap();

        assert_eq!(prekey.id, 7);
        let verified = verify_signed_prekey(&identity.public(), &prekey.public, &prekey.signature);
        assert!(verified.is_ok());
    }

    #[test]
    fn signed_prekey_rejected_under_other_identity() {
        let env = CountingEnv::default();
        let identity = generate_identity_key_pair(&env).unwrap();
        let other = generate_identity_key_pair(&env).unwrap();
        let prekey = generate_signed_prekey(&env, &identity, 1).unwrap();

        assert_eq!(
            verify_signed_prekey(&other.public(), &prekey.public, &prekey.signature),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn one_time_prekeys_have_sequential_ids_and_distinct_keys() {
        let env = CountingEnv::default();
        let keys = generate_one_time_prekeys(&env, 10, 5).unwrap();

        let ids: Vec<u32> = keys.iter().map(|k| k.id).collect();
        assert_eq!(ids, vec![10, 11, 12, 13, 14]);
        assert!(keys.iter().all(|k| !k.consumed));
        assert_ne!(keys[0].public, keys[1].public);
    }

    #[test]
    fn one_time_prekey_ids_must_not_overflow() {
        let env = CountingEnv::default();

        assert_eq!(
            generate_one_time_prekeys(&env, u32::MAX, 2).map(|k| k.len()),
            Err(KeyMaterialError::KeyIdExhausted)
        );
    }

    #[test]
    fn entropy_failure_surfaces() {
        let result = generate_identity_key_pair(&NoEntropy);

        assert!(matches!(result, Err(KeyMaterialError::EntropyUnavailable(_))));
    }
}
