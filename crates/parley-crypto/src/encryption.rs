//! Per-message sealing with XChaCha20-Poly1305 and a key commitment.
//!
//! Each message key is expanded into everything the message needs:
//!
//! ```text
//! HKDF-SHA256(ikm = message_key, info = "parley-message-v1")
//!   → cipher key (32) │ XChaCha20 nonce (24) │ commitment key (32)
//! ```
//!
//! The nonce is derived rather than random because a message key is used for
//! exactly one message. The 48-byte authentication tag is the Poly1305 tag
//! followed by `HMAC-SHA256(commitment key, aad)`.
//!
//! # Security
//!
//! Poly1305 alone is not key-committing: a crafted ciphertext can open under
//! two different keys. The commitment binds the ciphertext to one message key
//! and is checked (in constant time) before decryption is attempted. Both
//! checks fail with the same `AuthenticationFailed`.

use chacha20poly1305::{
    Key, Tag, XChaCha20Poly1305, XNonce,
    aead::{AeadInPlace, KeyInit},
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    error::CryptoError,
    keys::{KEY_SIZE, MessageKey},
};

/// Size of the Poly1305 tag in bytes.
const POLY1305_TAG_SIZE: usize = 16;

/// Size of the key commitment in bytes.
const COMMITMENT_SIZE: usize = 32;

/// Size of the full authentication tag in bytes.
pub const TAG_SIZE: usize = POLY1305_TAG_SIZE + COMMITMENT_SIZE;

const NONCE_SIZE: usize = 24;
const MESSAGE_INFO: &[u8] = b"parley-message-v1";

/// Authentication tag carried next to each ciphertext.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AuthenticationTag([u8; TAG_SIZE]);

impl AuthenticationTag {
    /// Wrap raw tag bytes.
    pub const fn from_bytes(bytes: [u8; TAG_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw tag bytes.
    pub const fn as_bytes(&self) -> &[u8; TAG_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for AuthenticationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, ..] = self.0;
        write!(f, "AuthenticationTag({a:02x}{b:02x}{c:02x}{d:02x}..)")
    }
}

struct MessageSecrets {
    cipher_key: Zeroizing<[u8; KEY_SIZE]>,
    nonce: [u8; NONCE_SIZE],
    commitment_key: Zeroizing<[u8; KEY_SIZE]>,
}

impl MessageSecrets {
    fn derive(message_key: &MessageKey) -> Result<Self, CryptoError> {
        let mut okm = Zeroizing::new([0u8; 2 * KEY_SIZE + NONCE_SIZE]);
        Hkdf::<Sha256>::new(None, message_key.as_bytes())
            .expand(MESSAGE_INFO, okm.as_mut_slice())
            .map_err(|_| CryptoError::KeyDerivation)?;

        let mut cipher_key = Zeroizing::new([0u8; KEY_SIZE]);
        let mut nonce = [0u8; NONCE_SIZE];
        let mut commitment_key = Zeroizing::new([0u8; KEY_SIZE]);
        cipher_key.copy_from_slice(&okm[..KEY_SIZE]);
        nonce.copy_from_slice(&okm[KEY_SIZE..KEY_SIZE + NONCE_SIZE]);
        commitment_key.copy_from_slice(&okm[KEY_SIZE + NONCE_SIZE..]);

        Ok(Self { cipher_key, nonce, commitment_key })
    }

    fn commitment_mac(&self, aad: &[u8]) -> Result<Hmac<Sha256>, CryptoError> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(self.commitment_key.as_slice())
            .map_err(|_| CryptoError::KeyDerivation)?;
        mac.update(aad);
        Ok(mac)
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(self.cipher_key.as_slice()))
    }
}

/// Seal a plaintext under a message key.
///
/// `aad` is authenticated but not encrypted. Returns the ciphertext (same
/// length as the plaintext) and the authentication tag.
///
/// # Errors
///
/// - `KeyDerivation` if key expansion fails
/// - `Encryption` if the plaintext exceeds the cipher's length limit
pub fn seal_message(
    message_key: &MessageKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, AuthenticationTag), CryptoError> {
    let secrets = MessageSecrets::derive(message_key)?;

    let mut buffer = plaintext.to_vec();
    let poly_tag = secrets
        .cipher()
        .encrypt_in_place_detached(XNonce::from_slice(&secrets.nonce), aad, &mut buffer)
        .map_err(|_| CryptoError::Encryption)?;
    let commitment = secrets.commitment_mac(aad)?.finalize().into_bytes();

    let mut tag = [0u8; TAG_SIZE];
    tag[..POLY1305_TAG_SIZE].copy_from_slice(&poly_tag);
    tag[POLY1305_TAG_SIZE..].copy_from_slice(&commitment);

    Ok((buffer, AuthenticationTag(tag)))
}

/// Open a sealed message.
///
/// Never returns partial plaintext: the output exists only if both the
/// commitment and the Poly1305 tag verify.
///
/// # Errors
///
/// - `AuthenticationFailed` on any tag, commitment, key or `aad` mismatch
/// - `KeyDerivation` if key expansion fails
pub fn open_message(
    message_key: &MessageKey,
    aad: &[u8],
    ciphertext: &[u8],
    tag: &AuthenticationTag,
) -> Result<Vec<u8>, CryptoError> {
    let secrets = MessageSecrets::derive(message_key)?;

    secrets
        .commitment_mac(aad)?
        .verify_slice(&tag.0[POLY1305_TAG_SIZE..])
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    let mut buffer = ciphertext.to_vec();
    secrets
        .cipher()
        .decrypt_in_place_detached(
            XNonce::from_slice(&secrets.nonce),
            aad,
            &mut buffer,
            Tag::from_slice(&tag.0[..POLY1305_TAG_SIZE]),
        )
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    Ok(buffer)
}
