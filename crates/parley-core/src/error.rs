//! Error types for the session core.
//!
//! Errors fall into four groups and callers treat each group differently:
//!
//! - Precondition errors (`ChainNotInitialized`, `BundleIncomplete`): caller
//!   misuse, surfaced and never retried
//! - Trust errors (`InvalidSignedPreKey`, `UntrustedIdentity`): need a human
//!   decision before the session may be used
//! - Verification errors (`AuthenticationFailed`): hostile or corrupted
//!   message, dropped without touching state
//! - Transient I/O (`StoreError::Backend`, `DirectoryError::Unavailable`,
//!   `FetchTimeout`): propagated for the caller's retry policy; the core never
//!   retries

use parley_crypto::CryptoError;
use parley_proto::{ProtocolError, UserId};
use thiserror::Error;

/// Random source could not be read.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("entropy source unavailable: {0}")]
pub struct EntropyError(pub String);

/// Errors from key generation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyMaterialError {
    /// Platform RNG could not be read
    #[error(transparent)]
    EntropyUnavailable(#[from] EntropyError),

    /// Prekey id space is exhausted
    #[error("prekey id space exhausted")]
    KeyIdExhausted,
}

/// Errors from session store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Requested record does not exist (expected, e.g. no session yet)
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Record exists but cannot be authenticated or decoded (fatal)
    #[error("corrupt {table} record: {reason}")]
    Corrupt {
        /// Namespace the record lives in
        table: &'static str,
        /// What went wrong
        reason: String,
    },

    /// Backend I/O failed (transient, propagated)
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Record sealing needed randomness that was unavailable
    #[error(transparent)]
    Entropy(#[from] EntropyError),
}

/// Errors from the symmetric ratchet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RatchetError {
    /// Chain key for this direction has not been seeded
    #[error("chain not initialized")]
    ChainNotInitialized,

    /// Counter would overflow its wire width
    #[error("message counter exhausted")]
    CounterExhausted,

    /// Message counter is behind the chain (replay or already-processed message)
    #[error("stale counter {counter}, chain is at {current}")]
    StaleCounter {
        /// Counter carried by the message
        counter: u32,
        /// Next counter the chain expects
        current: u32,
    },

    /// Message is further ahead than the skip limit allows
    #[error("counter {counter} skips {skip} messages (max {max})")]
    TooManySkipped {
        /// Counter carried by the message
        counter: u32,
        /// Messages that would be skipped
        skip: u32,
        /// Configured limit
        max: u32,
    },
}

/// Errors from the prekey directory.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// No bundle published for this user
    #[error("no prekey bundle for {0}")]
    NotFound(UserId),

    /// One-time prekey was already handed to another establishment
    #[error("one-time prekey {key_id} of {user} already consumed")]
    AlreadyConsumed {
        /// Owner of the prekey
        user: UserId,
        /// Prekey id
        key_id: u32,
    },

    /// Directory could not be reached (transient)
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Errors from session establishment.
#[derive(Debug, Error)]
pub enum EstablishError {
    /// Bundle has no signed prekey
    #[error("prekey bundle has no signed prekey")]
    BundleIncomplete,

    /// Signed prekey signature does not verify against the bundle identity
    #[error("signed prekey signature invalid")]
    InvalidSignedPreKey,

    /// Remote identity differs from the pinned one; needs user approval
    #[error("identity of {0} does not match the trusted identity")]
    UntrustedIdentity(UserId),

    /// Local identity has not been provisioned
    #[error("local identity not provisioned")]
    MissingLocalIdentity,

    /// Handshake names a signed prekey this device does not hold
    #[error("unknown signed prekey {0}")]
    UnknownSignedPreKey(u32),

    /// Handshake names a one-time prekey that is unknown or already consumed
    #[error("unknown or consumed one-time prekey {0}")]
    UnknownOneTimePreKey(u32),

    /// Ephemeral key generation failed
    #[error(transparent)]
    KeyMaterial(#[from] KeyMaterialError),

    /// Key agreement failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Store access failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from [`crate::MessageCodec`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// No session with the sender and the envelope carries no handshake
    #[error("no session with {0}")]
    SessionNotFound(UserId),

    /// Tag or commitment mismatch; message dropped, state untouched
    #[error("message authentication failed")]
    AuthenticationFailed,

    /// Directory request (fetch, consume, publish) did not complete in time
    #[error("directory request for {0} timed out")]
    FetchTimeout(UserId),

    /// Device has no identity or signed prekey yet
    #[error("device not provisioned")]
    NotProvisioned,

    /// Envelope sender is not the expected remote user
    #[error("envelope sent by {actual}, expected {expected}")]
    SenderMismatch {
        /// User the caller expected
        expected: UserId,
        /// User named in the envelope
        actual: UserId,
    },

    /// Envelope belongs to a different session than the stored one
    #[error("envelope session does not match")]
    SessionMismatch,

    /// Another establishment consumed the one-time prekey first
    #[error("one-time prekey {0} already consumed")]
    OneTimePreKeyConsumed(u32),

    /// Handshake was accepted before and its session is no longer held
    #[error("handshake from {0} already accepted")]
    HandshakeReplayed(UserId),

    /// Local and remote user are the same
    #[error("cannot open a session with self")]
    SelfSession,

    /// Establishment failed
    #[error(transparent)]
    Establish(#[from] EstablishError),

    /// Ratchet step failed
    #[error(transparent)]
    Ratchet(#[from] RatchetError),

    /// Store access failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Directory request failed
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Key generation failed
    #[error(transparent)]
    KeyMaterial(#[from] KeyMaterialError),

    /// Sealing failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Envelope encoding failed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
