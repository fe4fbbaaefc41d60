//! Parley Cryptographic Primitives
//!
//! Cryptographic building blocks for Parley sessions. Pure functions with
//! deterministic outputs. Callers provide random bytes, so the same code runs
//! under the OS RNG in production and under seeded RNGs in tests.
//!
//! # Key Lifecycle
//!
//! ```text
//! Identity keys + Signed prekey + One-time prekey (responder bundle)
//!        │
//!        ▼ X3DH (3 or 4 X25519 agreements)
//! Shared secret
//!        │
//!        ▼ HKDF-Expand
//! Root key │ Chain (initiator→responder) │ Chain (responder→initiator) │ Session id
//!        │
//!        ▼ HMAC(chain, 0x01) / HMAC(chain, 0x02)
//! Message key (used once)   Next chain key
//!        │
//!        ▼ HKDF-Expand
//! XChaCha20-Poly1305 key + nonce │ Commitment key
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - Chain keys are one-way: the next chain key reveals nothing about the
//!   previous one
//! - Message keys are derived, used for one message and dropped
//! - Secret key types zeroize their memory on drop
//!
//! Authenticity:
//! - Signed prekeys carry an Ed25519 signature by the owner's identity key
//! - Every message is sealed with an AEAD tag plus a key commitment, so a
//!   ciphertext opens under exactly one message key
//! - Non-contributory X25519 results (low-order points) are rejected

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod agreement;
pub mod chain;
pub mod encryption;
pub mod error;
pub mod keys;
pub mod record;

pub use agreement::{SessionSecrets, agree_as_initiator, agree_as_responder};
pub use chain::{derive_message_key, derive_next_chain_key};
pub use encryption::{AuthenticationTag, TAG_SIZE, open_message, seal_message};
pub use error::CryptoError;
pub use keys::{
    BaseKeyPublic, ChainKey, DhSecret, IdentityKeyPair, IdentityPublicKey, KEY_SIZE, MessageKey,
    OneTimePreKeyPublic, RootKey, SESSION_ID_SIZE, SIGNATURE_SIZE, Signature, SignedPreKeyPublic,
    StorageKey,
};
pub use record::{RECORD_NONCE_SIZE, open_record, seal_record};
