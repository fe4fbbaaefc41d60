//! Envelope flags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Flags byte of an envelope header.
    ///
    /// Undefined bits must be zero; decoders reject anything else so a future
    /// flag is never silently ignored.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EnvelopeFlags: u8 {
        /// A handshake header follows the counters
        const PREKEY = 0b0000_0001;
    }
}
