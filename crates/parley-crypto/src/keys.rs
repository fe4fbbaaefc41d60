//! Key types, one newtype per role.
//!
//! Public keys are `Copy` and compared bit-for-bit. Secret keys zeroize on
//! drop and never print their contents. Mixing roles (passing a one-time
//! prekey where a signed prekey is expected) is a type error.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, SeqAccess, Visitor},
};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

/// Size of X25519 keys, Ed25519 public keys and symmetric keys in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Size of a session identifier in bytes.
pub const SESSION_ID_SIZE: usize = 16;

macro_rules! public_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name([u8; KEY_SIZE]);

        impl $name {
            /// Wrap raw public key bytes.
            pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self(bytes)
            }

            /// Raw public key bytes.
            pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    concat!(stringify!($name), "({:02x}{:02x}{:02x}{:02x}..)"),
                    self.0[0], self.0[1], self.0[2], self.0[3]
                )
            }
        }
    };
}

macro_rules! secret_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
        pub struct $name([u8; KEY_SIZE]);

        impl $name {
            /// Wrap raw secret bytes.
            pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self(bytes)
            }

            /// Raw secret bytes.
            pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(concat!(stringify!($name), "(<redacted>)"))
            }
        }
    };
}

public_key!(
    /// Public half of a signed prekey (medium-term X25519 key).
    SignedPreKeyPublic
);

public_key!(
    /// Public half of a one-time prekey (single-use X25519 key).
    OneTimePreKeyPublic
);

public_key!(
    /// Public half of the initiator's ephemeral key for one establishment.
    BaseKeyPublic
);

secret_key!(
    /// Private half of an X25519 key (identity, prekey or ephemeral).
    DhSecret
);

secret_key!(
    /// Root key seeded by establishment. Changes only on a DH ratchet step.
    RootKey
);

secret_key!(
    /// Symmetric chain key. Advances one-way after every message.
    ChainKey
);

secret_key!(
    /// Per-message key. Used for exactly one message and never persisted.
    MessageKey
);

secret_key!(
    /// Key sealing records at rest in a persistent session store.
    StorageKey
);

impl DhSecret {
    /// X25519 public key for this secret.
    pub fn public_bytes(&self) -> [u8; KEY_SIZE] {
        let secret = StaticSecret::from(self.0);
        *PublicKey::from(&secret).as_bytes()
    }

    /// X25519 agreement with a peer public key.
    ///
    /// # Errors
    ///
    /// `InvalidPublicKey` if the result is non-contributory (peer sent a
    /// low-order point).
    pub fn agree(
        &self,
        their_public: &[u8; KEY_SIZE],
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
        let secret = StaticSecret::from(self.0);
        let shared = secret.diffie_hellman(&PublicKey::from(*their_public));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(Zeroizing::new(*shared.as_bytes()))
    }
}

/// Ed25519 signature over a signed prekey's public bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Wrap raw signature bytes.
    pub const fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw signature bytes.
    pub const fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, ..] = self.0;
        write!(f, "Signature({a:02x}{b:02x}{c:02x}{d:02x}..)")
    }
}

// serde only derives fixed arrays up to 32 elements
impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SignatureVisitor;

        impl<'de> Visitor<'de> for SignatureVisitor {
            type Value = Signature;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{SIGNATURE_SIZE} signature bytes")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Signature, E> {
                let bytes: [u8; SIGNATURE_SIZE] =
                    v.try_into().map_err(|_| E::invalid_length(v.len(), &self))?;
                Ok(Signature(bytes))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Signature, A::Error> {
                let mut bytes = [0u8; SIGNATURE_SIZE];
                for (i, byte) in bytes.iter_mut().enumerate() {
                    *byte = seq.next_element()?.ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }
                Ok(Signature(bytes))
            }
        }

        deserializer.deserialize_bytes(SignatureVisitor)
    }
}

/// Public half of a long-term identity: X25519 agreement key plus Ed25519
/// signing key.
///
/// Trust decisions compare both halves bit-for-bit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityPublicKey {
    dh: [u8; KEY_SIZE],
    signing: [u8; KEY_SIZE],
}

impl IdentityPublicKey {
    /// Encoded size: `dh || signing`.
    pub const SIZE: usize = 2 * KEY_SIZE;

    /// Assemble from the two public halves.
    pub const fn from_parts(dh: [u8; KEY_SIZE], signing: [u8; KEY_SIZE]) -> Self {
        Self { dh, signing }
    }

    /// X25519 agreement half.
    pub const fn dh_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.dh
    }

    /// Ed25519 verification half.
    pub const fn signing_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.signing
    }

    /// Canonical encoding `dh || signing`.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..KEY_SIZE].copy_from_slice(&self.dh);
        out[KEY_SIZE..].copy_from_slice(&self.signing);
        out
    }

    /// Verify an Ed25519 signature made by this identity.
    ///
    /// Uses strict verification (rejects small-order keys and malleable
    /// signatures).
    ///
    /// # Errors
    ///
    /// - `InvalidPublicKey` if the signing half is not a valid Ed25519 point
    /// - `InvalidSignature` if verification fails
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let key =
            VerifyingKey::from_bytes(&self.signing).map_err(|_| CryptoError::InvalidPublicKey)?;
        let signature = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        key.verify_strict(message, &signature).map_err(|_| CryptoError::InvalidSignature)
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IdentityPublicKey({:02x}{:02x}{:02x}{:02x}../{:02x}{:02x}{:02x}{:02x}..)",
            self.dh[0],
            self.dh[1],
            self.dh[2],
            self.dh[3],
            self.signing[0],
            self.signing[1],
            self.signing[2],
            self.signing[3]
        )
    }
}

/// Long-term identity key pair. Private halves never leave the device.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    dh: DhSecret,
    signing_seed: [u8; KEY_SIZE],
}

impl IdentityKeyPair {
    /// Build from caller-provided random bytes.
    pub fn from_secrets(dh: [u8; KEY_SIZE], signing_seed: [u8; KEY_SIZE]) -> Self {
        Self { dh: DhSecret::from_bytes(dh), signing_seed }
    }

    /// Agreement secret used in X3DH.
    pub fn dh_secret(&self) -> &DhSecret {
        &self.dh
    }

    /// Public identity published in bundles.
    pub fn public(&self) -> IdentityPublicKey {
        let signing = SigningKey::from_bytes(&self.signing_seed);
        IdentityPublicKey::from_parts(self.dh.public_bytes(), signing.verifying_key().to_bytes())
    }

    /// Sign a message with the identity signing key (deterministic Ed25519).
    pub fn sign(&self, message: &[u8]) -> Signature {
        let signing = SigningKey::from_bytes(&self.signing_seed);
        Signature::from_bytes(signing.sign(message).to_bytes())
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair").field("public", &self.public()).finish_non_exhaustive()
    }
}
