//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors from key agreement, signing and message sealing.
///
/// Variants deliberately carry no detail about *why* an authentication check
/// failed. Callers map every tag or commitment mismatch to the same outcome.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Ed25519 signature did not verify against the claimed key
    #[error("signature verification failed")]
    InvalidSignature,

    /// Public key bytes are not a usable curve point, or a Diffie-Hellman
    /// agreement with them produced a non-contributory result
    #[error("invalid public key")]
    InvalidPublicKey,

    /// HKDF expansion was asked for more output than it can produce
    #[error("key derivation failed")]
    KeyDerivation,

    /// AEAD tag or key commitment did not verify
    #[error("authentication failed")]
    AuthenticationFailed,

    /// AEAD encryption failed (plaintext exceeds cipher limits)
    #[error("encryption failed")]
    Encryption,
}
