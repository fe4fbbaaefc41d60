//! Wire format for Parley sessions.
//!
//! An envelope is a compact big-endian header followed by the ciphertext and
//! a fixed-size authentication tag. The encoded header doubles as associated
//! data for the message seal, so every routing field (sender, session,
//! counters, handshake values) is authenticated.
//!
//! ```text
//! ┌─────────┬───────┬────────┬────────────┬─────────┬──────────┬──────────────┐
//! │ version │ flags │ sender │ session id │ counter │ previous │ [handshake]  │
//! └─────────┴───────┴────────┴────────────┴─────────┴──────────┴──────────────┘
//! ┌──────────────────┬────────────┬──────────────┐
//! │ ciphertext len   │ ciphertext │ tag (48)     │
//! └──────────────────┴────────────┴──────────────┘
//! ```
//!
//! # Security
//!
//! Decoding never trusts lengths: every read is bounds-checked, ciphertexts
//! are capped at 16 MiB, and unknown versions, flags and trailing bytes are
//! rejected rather than ignored.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod envelope;
pub mod errors;
pub mod flags;
pub mod ids;

pub use envelope::{Envelope, EnvelopeHeader, PreKeyHeader};
pub use errors::{ProtocolError, Result};
pub use flags::EnvelopeFlags;
pub use ids::{SessionId, UserId};
