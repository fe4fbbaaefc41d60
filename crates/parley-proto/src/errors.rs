//! Protocol error types.

use thiserror::Error;

/// Result alias for wire-format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding envelopes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input ended before a field could be read
    #[error("envelope truncated: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required by the field being read
        needed: usize,
        /// Bytes left in the input
        available: usize,
    },

    /// Version byte is not one this build understands
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    /// Flags byte has bits set that are not defined
    #[error("unknown envelope flags {0:#04x}")]
    UnknownFlags(u8),

    /// Presence marker was neither 0 nor 1
    #[error("invalid presence marker {0}")]
    InvalidPresenceMarker(u8),

    /// Absent one-time prekey carries a non-zero id
    #[error("absent one-time prekey has id {0}")]
    AbsentKeyId(u32),

    /// User identifier is empty, too long, or not UTF-8
    #[error("invalid user id: {0}")]
    InvalidUserId(&'static str),

    /// Ciphertext length exceeds the envelope limit
    #[error("ciphertext too large: {size} bytes (max {max})")]
    CiphertextTooLarge {
        /// Claimed or actual ciphertext size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Bytes remain after a complete envelope
    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),
}
