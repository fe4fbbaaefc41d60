//! X3DH key agreement.
//!
//! Both parties compute the same three or four X25519 agreements, in a fixed
//! order, and feed them through HKDF:
//!
//! ```text
//! DH1 = DH(IK_A, SPK_B)     initiator identity   × responder signed prekey
//! DH2 = DH(EK_A, IK_B)      initiator base key   × responder identity
//! DH3 = DH(EK_A, SPK_B)     initiator base key   × responder signed prekey
//! DH4 = DH(EK_A, OPK_B)     initiator base key   × responder one-time prekey (optional)
//!
//! SK = HKDF-SHA256(salt = 0^32, ikm = 0xFF^32 || DH1 || DH2 || DH3 [|| DH4])
//! ```
//!
//! SK is then expanded once more into the session's starting secrets:
//!
//! ```text
//! root (32) │ chain initiator→responder (32) │ chain responder→initiator (32) │ session id (16)
//! ```
//!
//! # Security
//!
//! DH1 and DH2 authenticate both identities, DH3 gives forward secrecy against
//! identity key compromise, and DH4 (when present) protects against later
//! compromise of the signed prekey. Any non-contributory agreement aborts.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    error::CryptoError,
    keys::{
        BaseKeyPublic, ChainKey, DhSecret, IdentityKeyPair, IdentityPublicKey, KEY_SIZE,
        OneTimePreKeyPublic, RootKey, SESSION_ID_SIZE, SignedPreKeyPublic,
    },
};

const X3DH_INFO: &[u8] = b"parley-x3dh-v1";
const SESSION_INFO: &[u8] = b"parley-session-v1";

/// Curve25519 domain separator prefixed to the agreement outputs.
const DOMAIN_PREFIX: [u8; KEY_SIZE] = [0xFF; KEY_SIZE];

const SECRETS_SIZE: usize = 3 * KEY_SIZE + SESSION_ID_SIZE;

/// Starting secrets of a session, identical on both sides.
#[derive(Debug)]
pub struct SessionSecrets {
    /// Root key (reserved for the DH ratchet)
    pub root_key: RootKey,
    /// Chain carrying initiator → responder messages
    pub initiator_chain: ChainKey,
    /// Chain carrying responder → initiator messages
    pub responder_chain: ChainKey,
    /// Session identifier shared by both parties
    pub session_id: [u8; SESSION_ID_SIZE],
}

/// Run the initiator side of X3DH against a responder's published keys.
///
/// `base_key` is a fresh ephemeral secret used for this establishment only.
///
/// # Errors
///
/// `InvalidPublicKey` if any agreement is non-contributory.
pub fn agree_as_initiator(
    identity: &IdentityKeyPair,
    base_key: &DhSecret,
    remote_identity: &IdentityPublicKey,
    signed_prekey: &SignedPreKeyPublic,
    one_time_prekey: Option<&OneTimePreKeyPublic>,
) -> Result<SessionSecrets, CryptoError> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(5 * KEY_SIZE));
    ikm.extend_from_slice(&DOMAIN_PREFIX);
    ikm.extend_from_slice(identity.dh_secret().agree(signed_prekey.as_bytes())?.as_slice());
    ikm.extend_from_slice(base_key.agree(remote_identity.dh_bytes())?.as_slice());
    ikm.extend_from_slice(base_key.agree(signed_prekey.as_bytes())?.as_slice());
    if let Some(one_time) = one_time_prekey {
        ikm.extend_from_slice(base_key.agree(one_time.as_bytes())?.as_slice());
    }

    derive_session_secrets(&ikm)
}

/// Run the responder side of X3DH from the initiator's handshake values.
///
/// `signed_prekey` and `one_time_prekey` are the private halves matching the
/// ids the initiator named.
///
/// # Errors
///
/// `InvalidPublicKey` if any agreement is non-contributory.
pub fn agree_as_responder(
    identity: &IdentityKeyPair,
    signed_prekey: &DhSecret,
    one_time_prekey: Option<&DhSecret>,
    remote_identity: &IdentityPublicKey,
    base_key: &BaseKeyPublic,
) -> Result<SessionSecrets, CryptoError> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(5 * KEY_SIZE));
    ikm.extend_from_slice(&DOMAIN_PREFIX);
    ikm.extend_from_slice(signed_prekey.agree(remote_identity.dh_bytes())?.as_slice());
    ikm.extend_from_slice(identity.dh_secret().agree(base_key.as_bytes())?.as_slice());
    ikm.extend_from_slice(signed_prekey.agree(base_key.as_bytes())?.as_slice());
    if let Some(one_time) = one_time_prekey {
        ikm.extend_from_slice(one_time.agree(base_key.as_bytes())?.as_slice());
    }

    derive_session_secrets(&ikm)
}

fn derive_session_secrets(ikm: &[u8]) -> Result<SessionSecrets, CryptoError> {
    let mut shared = Zeroizing::new([0u8; KEY_SIZE]);
    Hkdf::<Sha256>::new(Some(&[0u8; KEY_SIZE]), ikm)
        .expand(X3DH_INFO, shared.as_mut_slice())
        .map_err(|_| CryptoError::KeyDerivation)?;

    let mut okm = Zeroizing::new([0u8; SECRETS_SIZE]);
    Hkdf::<Sha256>::new(None, shared.as_slice())
        .expand(SESSION_INFO, okm.as_mut_slice())
        .map_err(|_| CryptoError::KeyDerivation)?;

    let mut root = [0u8; KEY_SIZE];
    let mut initiator = [0u8; KEY_SIZE];
    let mut responder = [0u8; KEY_SIZE];
    let mut session_id = [0u8; SESSION_ID_SIZE];
    root.copy_from_slice(&okm[..KEY_SIZE]);
    initiator.copy_from_slice(&okm[KEY_SIZE..2 * KEY_SIZE]);
    responder.copy_from_slice(&okm[2 * KEY_SIZE..3 * KEY_SIZE]);
    session_id.copy_from_slice(&okm[3 * KEY_SIZE..]);

    Ok(SessionSecrets {
        root_key: RootKey::from_bytes(root),
        initiator_chain: ChainKey::from_bytes(initiator),
        responder_chain: ChainKey::from_bytes(responder),
        session_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Responder {
        identity: IdentityKeyPair,
        signed_prekey: DhSecret,
        one_time_prekey: DhSecret,
    }

    fn responder() -> Responder {
        Responder {
            identity: IdentityKeyPair::from_secrets([20; KEY_SIZE], [21; KEY_SIZE]),
            signed_prekey: DhSecret::from_bytes([22; KEY_SIZE]),
            one_time_prekey: DhSecret::from_bytes([23; KEY_SIZE]),
        }
    }

    fn initiator() -> (IdentityKeyPair, DhSecret) {
        (
            IdentityKeyPair::from_secrets([10; KEY_SIZE], [11; KEY_SIZE]),
            DhSecret::from_bytes([12; KEY_SIZE]),
        )
    }

    #[test]
    fn both_sides_derive_same_secrets_with_one_time_prekey() {
        let bob = responder();
        let (alice, base) = initiator();
        let spk = SignedPreKeyPublic::from_bytes(bob.signed_prekey.public_bytes());
        let opk = OneTimePreKeyPublic::from_bytes(bob.one_time_prekey.public_bytes());

        let a =
            agree_as_initiator(&alice, &base, &bob.identity.public(), &spk, Some(&opk)).unwrap();
        let b = agree_as_responder(
            &bob.identity,
            &bob.signed_prekey,
            Some(&bob.one_time_prekey),
            &alice.public(),
            &BaseKeyPublic::from_bytes(base.public_bytes()),
        )
        .unwrap();

        assert_eq!(a.root_key, b.root_key);
        assert_eq!(a.initiator_chain, b.initiator_chain);
        assert_eq!(a.responder_chain, b.responder_chain);
        assert_eq!(a.session_id, b.session_id);
        assert_ne!(a.initiator_chain, a.responder_chain);
    }

    #[test]
    fn both_sides_derive_same_secrets_without_one_time_prekey() {
        let bob = responder();
        let (alice, base) = initiator();
        let spk = SignedPreKeyPublic::from_bytes(bob.signed_prekey.public_bytes());

        let a = agree_as_initiator(&alice, &base, &bob.identity.public(), &spk, None).unwrap();
        let b = agree_as_responder(
            &bob.identity,
            &bob.signed_prekey,
            None,
            &alice.public(),
            &BaseKeyPublic::from_bytes(base.public_bytes()),
        )
        .unwrap();

        assert_eq!(a.root_key, b.root_key);
        assert_eq!(a.session_id, b.session_id);
    }

    #[test]
    fn one_time_prekey_changes_secrets() {
        let bob = responder();
        let (alice, base) = initiator();
        let spk = SignedPreKeyPublic::from_bytes(bob.signed_prekey.public_bytes());
        let opk = OneTimePreKeyPublic::from_bytes(bob.one_time_prekey.public_bytes());

        let with = agree_as_initiator(&alice, &base, &bob.identity.public(), &spk, Some(&opk))
            .unwrap();
        let without =
            agree_as_initiator(&alice, &base, &bob.identity.public(), &spk, None).unwrap();

        assert_ne!(with.root_key, without.root_key);
    }

    #[test]
    fn low_order_prekey_rejected() {
        let bob = responder();
        let (alice, base) = initiator();
        let spk = SignedPreKeyPublic::from_bytes([0u8; KEY_SIZE]);

        let result = agree_as_initiator(&alice, &base, &bob.identity.public(), &spk, None);
        assert!(matches!(result, Err(CryptoError::InvalidPublicKey)));
    }
}
