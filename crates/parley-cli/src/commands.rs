//! Subcommand implementations.

use std::{
    io::{self, Write},
    path::Path,
    sync::Arc,
};

use parley_core::{
    CodecConfig, CodecError, MemoryDirectory, MemoryStore, MessageCodec, PublishedPreKeys,
    RedbStore, SessionStore, StoreError, SystemEnv,
};
use parley_crypto::{IdentityPublicKey, StorageKey};
use parley_proto::{ProtocolError, UserId};
use thiserror::Error;

/// Errors surfaced to the operator.
#[derive(Debug, Error)]
pub enum CliError {
    /// Codec operation failed
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Store could not be opened or read
    #[error(transparent)]
    Store(#[from] StoreError),

    /// User id rejected
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Output could not be written
    #[error("write failed: {0}")]
    Io(#[from] io::Error),

    /// Demo conversation produced the wrong plaintext
    #[error("demo message {0} did not round-trip")]
    Mismatch(u32),
}

/// Provision a device store and print what was published.
pub async fn provision(
    path: &Path,
    storage_key: StorageKey,
    user: &str,
    one_time_prekeys: u32,
) -> Result<(), CliError> {
    let store = RedbStore::open(path, storage_key, SystemEnv)?;
    let config = CodecConfig { one_time_prekey_batch: one_time_prekeys, ..CodecConfig::default() };
    let directory = Arc::new(MemoryDirectory::new());
    let codec = MessageCodec::new(UserId::new(user)?, store, directory, SystemEnv, config);

    let published = codec.provision().await?;

    let mut out = io::stdout().lock();
    writeln!(out, "store:    {}", path.display())?;
    writeln!(out, "user:     {user}")?;
    write_bundle(&mut out, &published)?;
    Ok(())
}

/// Print the identity and prekeys held in a device store.
pub fn show(path: &Path, storage_key: StorageKey) -> Result<(), CliError> {
    let store = RedbStore::open(path, storage_key, SystemEnv)?;
    let mut out = io::stdout().lock();

    writeln!(out, "store:    {}", path.display())?;
    let Some(identity) = store.local_identity()? else {
        writeln!(out, "not provisioned")?;
        return Ok(());
    };
    write_identity(&mut out, &identity.public())?;

    for key in store.signed_prekeys()? {
        writeln!(out, "signed:   #{} {}", key.id, hex::encode(key.public.as_bytes()))?;
    }
    writeln!(out, "next one-time prekey id: {}", store.next_one_time_prekey_id()?)?;
    Ok(())
}

/// Run a conversation between two in-memory devices.
pub async fn demo(messages: u32) -> Result<(), CliError> {
    let directory = Arc::new(MemoryDirectory::new());
    let alice = demo_device("alice", &directory)?;
    let bob = demo_device("bob", &directory)?;
    alice.provision().await?;
    bob.provision().await?;

    let mut out = io::stdout().lock();
    for i in 0..messages {
        let (sender, recipient) = if i % 2 == 0 { (&alice, &bob) } else { (&bob, &alice) };
        let text = format!("message {i} from {}", sender.local_user());

        let envelope = sender.encrypt(recipient.local_user(), text.as_bytes()).await?;
        let wire = envelope.encode()?;
        let opened = recipient.decrypt(sender.local_user(), &envelope).await?;
        if opened != text.as_bytes() {
            return Err(CliError::Mismatch(i));
        }

        writeln!(
            out,
            "{} -> {}  counter={} handshake={} bytes={}  {text:?}",
            sender.local_user(),
            recipient.local_user(),
            envelope.header.counter,
            envelope.header.prekey.is_some(),
            wire.len(),
        )?;
    }

    if let Some(session) = alice.session_snapshot(bob.local_user())? {
        writeln!(
            out,
            "session {}  sent={} received={}",
            session.session_id(),
            session.send_counter(),
            session.receive_counter()
        )?;
    }
    Ok(())
}

fn demo_device(
    name: &str,
    directory: &Arc<MemoryDirectory>,
) -> Result<MessageCodec<MemoryStore, MemoryDirectory, SystemEnv>, CliError> {
    let config = CodecConfig { one_time_prekey_batch: 4, ..CodecConfig::default() };
    Ok(MessageCodec::new(
        UserId::new(name)?,
        MemoryStore::new(),
        Arc::clone(directory),
        SystemEnv,
        config,
    ))
}

fn write_identity(out: &mut impl Write, identity: &IdentityPublicKey) -> io::Result<()> {
    writeln!(out, "identity: {}", hex::encode(identity.to_bytes()))
}

fn write_bundle(out: &mut impl Write, published: &PublishedPreKeys) -> io::Result<()> {
    write_identity(out, &published.identity)?;
    let signed = &published.signed_prekey;
    writeln!(out, "signed:   #{} {}", signed.id, hex::encode(signed.public.as_bytes()))?;
    writeln!(out, "          sig {}", hex::encode(signed.signature.as_bytes()))?;

    match (published.one_time_prekeys.first(), published.one_time_prekeys.last()) {
        (Some(first), Some(last)) => writeln!(
            out,
            "one-time: {} keys, #{}..=#{}",
            published.one_time_prekeys.len(),
            first.id,
            last.id
        ),
        _ => writeln!(out, "one-time: none"),
    }
}
