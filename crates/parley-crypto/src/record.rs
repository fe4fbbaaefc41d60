//! Sealing of records at rest.
//!
//! Persistent stores keep private keys and chain keys, so every stored value is
//! encrypted with XChaCha20-Poly1305 under a device [`StorageKey`]. Layout:
//!
//! ```text
//! nonce (24) │ ciphertext │ tag (16)
//! ```
//!
//! The caller supplies a random nonce (192 bits makes random nonces safe) and
//! associated data naming the record's slot, so a record copied into another
//! slot fails to open.

use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{error::CryptoError, keys::StorageKey};

/// Size of the random nonce prefixed to every sealed record.
pub const RECORD_NONCE_SIZE: usize = 24;

/// Seal `plaintext` for storage.
///
/// # Errors
///
/// `Encryption` if the plaintext exceeds the cipher's length limit.
pub fn seal_record(
    key: &StorageKey,
    nonce: [u8; RECORD_NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Encryption)?;

    let mut sealed = Vec::with_capacity(RECORD_NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a record sealed by [`seal_record`].
///
/// # Errors
///
/// `AuthenticationFailed` if the record is truncated, was sealed under another
/// key, or was sealed for another slot.
pub fn open_record(key: &StorageKey, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < RECORD_NONCE_SIZE {
        return Err(CryptoError::AuthenticationFailed);
    }
    let (nonce, ciphertext) = sealed.split_at(RECORD_NONCE_SIZE);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_opens_in_its_own_slot_only() {
        let key = StorageKey::from_bytes([5; 32]);
        let sealed = seal_record(&key, [9; RECORD_NONCE_SIZE], b"session/alice", b"state").unwrap();

        assert_eq!(open_record(&key, b"session/alice", &sealed).unwrap(), b"state");
        assert_eq!(
            open_record(&key, b"session/bob", &sealed),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn other_storage_key_rejected() {
        let sealed =
            seal_record(&StorageKey::from_bytes([5; 32]), [9; RECORD_NONCE_SIZE], b"", b"state")
                .unwrap();

        let result = open_record(&StorageKey::from_bytes([6; 32]), b"", &sealed);
        assert_eq!(result, Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn truncated_record_rejected() {
        let key = StorageKey::from_bytes([5; 32]);

        assert_eq!(open_record(&key, b"", &[0u8; 10]), Err(CryptoError::AuthenticationFailed));
    }
}
