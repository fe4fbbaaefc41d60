//! Envelope encoding and decoding.
//!
//! # Layout (version 1, big-endian)
//!
//! ```text
//! u8    version
//! u8    flags                      (bit 0: handshake header present)
//! u8    sender length L            (1..=255)
//! L     sender (UTF-8)
//! 16    session id
//! u32   counter
//! u32   previous counter
//! [handshake header]
//!   32  initiator identity, X25519 half
//!   32  initiator identity, Ed25519 half
//!   32  base key
//!   u32 signed prekey id
//!   u8  one-time prekey present    (0 | 1)
//!   u32 one-time prekey id         (0 when absent)
//! u32   ciphertext length N        (<= 16 MiB)
//! N     ciphertext
//! 48    authentication tag
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parley_crypto::{
    AuthenticationTag, BaseKeyPublic, IdentityPublicKey, KEY_SIZE, SESSION_ID_SIZE, TAG_SIZE,
};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    flags::EnvelopeFlags,
    ids::{SessionId, UserId},
};

/// Handshake values an initiator attaches until the responder answers.
///
/// Carries everything the responder needs to run its side of the key
/// agreement: who is calling, the ephemeral base key, and which of the
/// responder's prekeys were used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyHeader {
    /// Initiator's identity public key
    pub identity: IdentityPublicKey,
    /// Initiator's ephemeral key for this establishment
    pub base_key: BaseKeyPublic,
    /// Id of the responder's signed prekey that was used
    pub signed_prekey_id: u32,
    /// Id of the responder's one-time prekey, if one was used
    pub one_time_prekey_id: Option<u32>,
}

impl PreKeyHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 3 * KEY_SIZE + 4 + 1 + 4;
}

/// Authenticated header of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Sending user
    pub sender: UserId,
    /// Session the message belongs to
    pub session_id: SessionId,
    /// Position of the message in the sender's chain
    pub counter: u32,
    /// Length of the sender's previous chain (reserved for the DH ratchet)
    pub previous_counter: u32,
    /// Handshake values, present until the initiator hears back
    pub prekey: Option<PreKeyHeader>,
}

impl EnvelopeHeader {
    /// Current envelope version.
    pub const VERSION: u8 = 1;

    /// Flags implied by the header contents.
    pub fn flags(&self) -> EnvelopeFlags {
        if self.prekey.is_some() { EnvelopeFlags::PREKEY } else { EnvelopeFlags::empty() }
    }

    /// Encoded header bytes, used as associated data when sealing.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.to_vec()
    }

    fn encoded_len(&self) -> usize {
        let prekey = if self.prekey.is_some() { PreKeyHeader::SIZE } else { 0 };
        3 + self.sender.as_str().len() + SESSION_ID_SIZE + 8 + prekey
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(Self::VERSION);
        buf.put_u8(self.flags().bits());
        // UserId guarantees 1..=255 bytes
        buf.put_u8(self.sender.as_str().len() as u8);
        buf.put_slice(self.sender.as_str().as_bytes());
        buf.put_slice(self.session_id.as_bytes());
        buf.put_u32(self.counter);
        buf.put_u32(self.previous_counter);

        if let Some(prekey) = &self.prekey {
            buf.put_slice(prekey.identity.dh_bytes());
            buf.put_slice(prekey.identity.signing_bytes());
            buf.put_slice(prekey.base_key.as_bytes());
            buf.put_u32(prekey.signed_prekey_id);
            match prekey.one_time_prekey_id {
                Some(id) => {
                    buf.put_u8(1);
                    buf.put_u32(id);
                },
                None => {
                    buf.put_u8(0);
                    buf.put_u32(0);
                },
            }
        }
    }

    fn decode_from(buf: &mut &[u8]) -> Result<Self> {
        let version = read_u8(buf)?;
        if version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let raw_flags = read_u8(buf)?;
        let flags =
            EnvelopeFlags::from_bits(raw_flags).ok_or(ProtocolError::UnknownFlags(raw_flags))?;

        let sender_len = usize::from(read_u8(buf)?);
        ensure(buf, sender_len)?;
        let sender = std::str::from_utf8(&buf[..sender_len])
            .map_err(|_| ProtocolError::InvalidUserId("not UTF-8"))?
            .to_owned();
        buf.advance(sender_len);
        let sender = UserId::new(sender)?;

        let session_id = SessionId::from_bytes(read_array(buf)?);
        let counter = read_u32(buf)?;
        let previous_counter = read_u32(buf)?;

        let prekey = if flags.contains(EnvelopeFlags::PREKEY) {
            let identity = IdentityPublicKey::from_parts(read_array(buf)?, read_array(buf)?);
            let base_key = BaseKeyPublic::from_bytes(read_array(buf)?);
            let signed_prekey_id = read_u32(buf)?;
            let present = read_u8(buf)?;
            let id = read_u32(buf)?;
            let one_time_prekey_id = match present {
                0 if id == 0 => None,
                0 => return Err(ProtocolError::AbsentKeyId(id)),
                1 => Some(id),
                other => return Err(ProtocolError::InvalidPresenceMarker(other)),
            };
            Some(PreKeyHeader { identity, base_key, signed_prekey_id, one_time_prekey_id })
        } else {
            None
        };

        Ok(Self { sender, session_id, counter, previous_counter, prekey })
    }
}

/// A sealed message as it travels between parties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Authenticated header
    pub header: EnvelopeHeader,
    /// Encrypted payload
    pub ciphertext: Vec<u8>,
    /// Poly1305 tag followed by the key commitment
    pub tag: AuthenticationTag,
}

impl Envelope {
    /// Maximum ciphertext size (16 MiB).
    pub const MAX_CIPHERTEXT_SIZE: usize = 16 * 1024 * 1024;

    /// Encode to wire bytes.
    ///
    /// # Errors
    ///
    /// `CiphertextTooLarge` if the ciphertext exceeds
    /// [`Self::MAX_CIPHERTEXT_SIZE`].
    pub fn encode(&self) -> Result<Bytes> {
        if self.ciphertext.len() > Self::MAX_CIPHERTEXT_SIZE {
            return Err(ProtocolError::CiphertextTooLarge {
                size: self.ciphertext.len(),
                max: Self::MAX_CIPHERTEXT_SIZE,
            });
        }

        let capacity = self.header.encoded_len() + 4 + self.ciphertext.len() + TAG_SIZE;
        let mut buf = BytesMut::with_capacity(capacity);
        self.header.encode_into(&mut buf);
        buf.put_u32(self.ciphertext.len() as u32);
        buf.put_slice(&self.ciphertext);
        buf.put_slice(self.tag.as_bytes());
        Ok(buf.freeze())
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// - `Truncated` if the input ends early
    /// - `UnsupportedVersion`, `UnknownFlags`, `InvalidPresenceMarker`,
    ///   `AbsentKeyId` for malformed header fields
    /// - `InvalidUserId` if the sender is not valid UTF-8
    /// - `CiphertextTooLarge` if the length prefix exceeds the limit
    /// - `TrailingBytes` if input remains after the tag
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;
        let header = EnvelopeHeader::decode_from(&mut buf)?;

        let len = read_u32(&mut buf)? as usize;
        if len > Self::MAX_CIPHERTEXT_SIZE {
            return Err(ProtocolError::CiphertextTooLarge {
                size: len,
                max: Self::MAX_CIPHERTEXT_SIZE,
            });
        }
        ensure(buf, len)?;
        let ciphertext = buf[..len].to_vec();
        buf.advance(len);

        let tag = AuthenticationTag::from_bytes(read_array(&mut buf)?);

        if !buf.is_empty() {
            return Err(ProtocolError::TrailingBytes(buf.len()));
        }

        Ok(Self { header, ciphertext, tag })
    }
}

fn ensure(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(ProtocolError::Truncated { needed, available: buf.len() });
    }
    Ok(())
}

fn read_u8(buf: &mut &[u8]) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_u32(buf: &mut &[u8]) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

fn read_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N]> {
    ensure(buf, N)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(prekey: Option<PreKeyHeader>) -> EnvelopeHeader {
        EnvelopeHeader {
            sender: UserId::new("alice").unwrap(),
            session_id: SessionId::from_bytes([7; SESSION_ID_SIZE]),
            counter: 3,
            previous_counter: 0,
            prekey,
        }
    }

    fn prekey(one_time_prekey_id: Option<u32>) -> PreKeyHeader {
        PreKeyHeader {
            identity: IdentityPublicKey::from_parts([1; KEY_SIZE], [2; KEY_SIZE]),
            base_key: BaseKeyPublic::from_bytes([3; KEY_SIZE]),
            signed_prekey_id: 9,
            one_time_prekey_id,
        }
    }

    fn envelope(prekey: Option<PreKeyHeader>) -> Envelope {
        Envelope {
            header: header(prekey),
            ciphertext: b"sealed".to_vec(),
            tag: AuthenticationTag::from_bytes([0xEE; TAG_SIZE]),
        }
    }

    #[test]
    fn decode_inverts_encode() {
        for prekey in [None, Some(prekey(None)), Some(prekey(Some(42)))] {
            let original = envelope(prekey);
            let bytes = original.encode().unwrap();

            assert_eq!(Envelope::decode(&bytes).unwrap(), original);
        }
    }

    #[test]
    fn header_bytes_are_envelope_prefix() {
        let original = envelope(Some(prekey(Some(1))));
        let bytes = original.encode().unwrap();
        let header = original.header.to_bytes();

        assert!(bytes.starts_with(&header));
        assert_eq!(header.len(), 3 + 5 + SESSION_ID_SIZE + 8 + PreKeyHeader::SIZE);
    }

    #[test]
    fn unknown_version_rejected() {
        let mut bytes = envelope(None).encode().unwrap().to_vec();
        bytes[0] = 2;

        assert_eq!(Envelope::decode(&bytes), Err(ProtocolError::UnsupportedVersion(2)));
    }

    #[test]
    fn unknown_flags_rejected() {
        let mut bytes = envelope(None).encode().unwrap().to_vec();
        bytes[1] = 0x80;

        assert_eq!(Envelope::decode(&bytes), Err(ProtocolError::UnknownFlags(0x80)));
    }

    #[test]
    fn invalid_presence_marker_rejected() {
        let mut bytes = envelope(Some(prekey(None))).encode().unwrap().to_vec();
        let marker = 3 + 5 + SESSION_ID_SIZE + 8 + 3 * KEY_SIZE + 4;
        bytes[marker] = 2;

        assert_eq!(Envelope::decode(&bytes), Err(ProtocolError::InvalidPresenceMarker(2)));
    }

    #[test]
    fn absent_one_time_prekey_must_have_zero_id() {
        let mut bytes = envelope(Some(prekey(None))).encode().unwrap().to_vec();
        let id = 3 + 5 + SESSION_ID_SIZE + 8 + 3 * KEY_SIZE + 4 + 1;
        bytes[id + 3] = 9;

        assert_eq!(Envelope::decode(&bytes), Err(ProtocolError::AbsentKeyId(9)));
    }

    #[test]
    fn truncation_rejected_at_every_length() {
        let bytes = envelope(Some(prekey(Some(5)))).encode().unwrap();

        for len in 0..bytes.len() {
            assert!(
                matches!(Envelope::decode(&bytes[..len]), Err(ProtocolError::Truncated { .. })),
                "length {len} decoded"
            );
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = envelope(None).encode().unwrap().to_vec();
        bytes.push(0);

        assert_eq!(Envelope::decode(&bytes), Err(ProtocolError::TrailingBytes(1)));
    }

    #[test]
    fn oversize_length_prefix_rejected() {
        let original = envelope(None);
        let header_len = original.header.to_bytes().len();
        let mut bytes = original.encode().unwrap().to_vec();
        bytes[header_len..header_len + 4].copy_from_slice(&u32::MAX.to_be_bytes());

        assert!(matches!(Envelope::decode(&bytes), Err(ProtocolError::CiphertextTooLarge { .. })));
    }

    #[test]
    fn zero_length_sender_rejected() {
        let original = envelope(None);
        let mut bytes = original.encode().unwrap().to_vec();
        bytes[2] = 0;

        assert!(matches!(Envelope::decode(&bytes), Err(ProtocolError::InvalidUserId(_))));
    }
}
