//! Parley session core
//!
//! Establishes pairwise sessions and encrypts/decrypts messages with
//! forward-secret, per-message keys.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────┐
//!  plaintext  ───> │ MessageCodec │ ───> Envelope
//!                  └──────┬───────┘
//!          ┌──────────────┼──────────────────┐
//!          ▼              ▼                  ▼
//!   ┌─────────────┐ ┌───────────┐    ┌──────────────┐
//!   │Establishment│ │  Ratchet  │    │ SessionStore │
//!   └──────┬──────┘ └───────────┘    └──────────────┘
//!          ▼
//!   ┌─────────────┐ ┌───────────┐
//!   │ KeyMaterial │ │ Directory │
//!   └─────────────┘ └───────────┘
//! ```
//!
//! Ratchet and establishment logic are plain functions over `Session` values.
//! All effects are supplied by the caller: randomness through
//! [`env::Environment`], persistence through [`store::SessionStore`], and
//! prekey bundles through [`directory::Directory`]. The same code runs against
//! the OS RNG and an encrypted redb file in production, and against seeded
//! RNGs and in-memory maps in tests.
//!
//! # Components
//!
//! - [`keys`]: Identity, signed prekey and one-time prekey generation
//! - [`bundle`]: Prekey bundles as published and fetched
//! - [`session`]: Per-pair session state
//! - [`ratchet`]: Symmetric chain advancement
//! - [`establishment`]: X3DH initiator and responder
//! - [`codec`]: Encrypt/decrypt entry points with per-session locking
//! - [`store`]: Session store trait and backends
//! - [`directory`]: Prekey directory trait and in-memory directory
//! - [`mod@env`]: Environment abstraction (RNG)
//! - [`config`]: Codec configuration
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod bundle;
pub mod codec;
pub mod config;
pub mod directory;
pub mod env;
pub mod error;
pub mod establishment;
pub mod keys;
pub mod ratchet;
pub mod session;
pub mod store;

pub use bundle::{OneTimePreKeyEntry, PreKeyBundle, PublishedPreKeys, SignedPreKeyEntry};
pub use codec::MessageCodec;
pub use config::CodecConfig;
pub use directory::{Directory, MemoryDirectory};
pub use env::{Environment, SystemEnv};
pub use error::{
    CodecError, DirectoryError, EntropyError, EstablishError, KeyMaterialError, RatchetError,
    StoreError,
};
pub use keys::{OneTimePreKey, SignedPreKey};
pub use session::{ParticipantPair, Role, Session, SessionRecord};
pub use store::{HandshakeCompletion, MemoryStore, RedbStore, SessionStore};
