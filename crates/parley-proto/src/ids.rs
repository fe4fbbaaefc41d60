//! Identifiers carried on the wire.

use std::fmt;

use parley_crypto::SESSION_ID_SIZE;
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Opaque user identifier assigned by the account system.
///
/// Must be 1 to 255 bytes of UTF-8, so its length fits the envelope's one-byte
/// length prefix. Ordering is bytewise, which is what canonical participant
/// pairs sort by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Maximum encoded length in bytes.
    pub const MAX_LEN: usize = 255;

    /// Validate and wrap a user identifier.
    ///
    /// # Errors
    ///
    /// `InvalidUserId` if the identifier is empty or longer than
    /// [`Self::MAX_LEN`] bytes.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(ProtocolError::InvalidUserId("empty"));
        }
        if id.len() > Self::MAX_LEN {
            return Err(ProtocolError::InvalidUserId("longer than 255 bytes"));
        }
        Ok(Self(id))
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session identifier derived during establishment, shared by both parties.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId([u8; SESSION_ID_SIZE]);

impl SessionId {
    /// Wrap raw identifier bytes.
    pub const fn from_bytes(bytes: [u8; SESSION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw identifier bytes.
    pub const fn as_bytes(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({self})")
    }
}
