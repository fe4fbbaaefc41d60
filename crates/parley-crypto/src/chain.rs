//! Symmetric chain key derivation.
//!
//! One step of the symmetric ratchet:
//!
//! ```text
//! chain_key[n]
//!   ├── HMAC-SHA256(chain_key[n], 0x01) → message_key[n]
//!   └── HMAC-SHA256(chain_key[n], 0x02) → chain_key[n+1]
//! ```
//!
//! The two constants separate the outputs, so a message key never doubles as
//! a chain key. HMAC is one-way: holding `chain_key[n+1]` reveals nothing
//! about `chain_key[n]` or any message key derived before it.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::keys::{ChainKey, KEY_SIZE, MessageKey};

const MESSAGE_KEY_CONSTANT: &[u8] = &[0x01];
const CHAIN_KEY_CONSTANT: &[u8] = &[0x02];

/// Derive the message key for the current chain position.
pub fn derive_message_key(chain_key: &ChainKey) -> MessageKey {
    MessageKey::from_bytes(hmac_sha256(chain_key.as_bytes(), MESSAGE_KEY_CONSTANT))
}

/// Derive the chain key for the next chain position.
pub fn derive_next_chain_key(chain_key: &ChainKey) -> ChainKey {
    ChainKey::from_bytes(hmac_sha256(chain_key.as_bytes(), CHAIN_KEY_CONSTANT))
}

// HKDF-Extract is HMAC(salt, ikm), and unlike `Hmac::new_from_slice` it has
// no error path for a 32-byte key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; KEY_SIZE] {
    let (prk, _) = Hkdf::<Sha256>::extract(Some(key), data);
    let mut out = [0u8; KEY_SIZE];
    out.copy_from_slice(&prk);
    out
}

#[cfg(test)]
mod tests {
    use hmac::{Hmac, Mac};

    use super::*;

    #[test]
    fn matches_plain_hmac() {
        let chain_key = ChainKey::from_bytes([7; KEY_SIZE]);

        let mut mac = Hmac::<Sha256>::new_from_slice(chain_key.as_bytes()).unwrap();
        mac.update(&[0x01]);
        let expected = mac.finalize().into_bytes();

        assert_eq!(derive_message_key(&chain_key).as_bytes().as_slice(), expected.as_slice());
    }

    #[test]
    fn message_and_chain_outputs_differ() {
        let chain_key = ChainKey::from_bytes([7; KEY_SIZE]);

        let message_key = derive_message_key(&chain_key);
        let next = derive_next_chain_key(&chain_key);

        assert_ne!(message_key.as_bytes(), next.as_bytes());
        assert_ne!(next.as_bytes(), chain_key.as_bytes());
    }

    #[test]
    fn derivation_is_deterministic() {
        let chain_key = ChainKey::from_bytes([42; KEY_SIZE]);

        assert_eq!(derive_message_key(&chain_key), derive_message_key(&chain_key));
        assert_eq!(derive_next_chain_key(&chain_key), derive_next_chain_key(&chain_key));
    }
}
