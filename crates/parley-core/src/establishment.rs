//! X3DH session establishment.
//!
//! # Initiator
//!
//! 1. Check the bundle: a signed prekey must be present and its signature
//!    must verify against the bundle's identity key. This is what stops a
//!    compromised directory from substituting its own prekey.
//! 2. Check trust: the bundle identity must match the pinned identity (or
//!    nothing is pinned yet).
//! 3. Generate a base key and run the initiator agreement.
//! 4. Persist the session and pin the identity.
//!
//! # Responder
//!
//! The responder runs its side from the handshake header on the initiator's
//! first envelope. [`accept`] only derives; the codec persists the session
//! (and consumes the one-time prekey) once that envelope authenticates.

use parley_crypto::{BaseKeyPublic, agree_as_initiator, agree_as_responder};
use parley_proto::{PreKeyHeader, UserId};

use crate::{
    bundle::{PreKeyBundle, SignedPreKeyEntry},
    env::Environment,
    error::EstablishError,
    keys::{generate_base_key, verify_signed_prekey},
    session::{ParticipantPair, Session},
    store::SessionStore,
};

/// Validate a bundle before any of its keys are used.
///
/// Returns the verified signed prekey.
///
/// # Errors
///
/// - `BundleIncomplete` if the bundle has no signed prekey
/// - `InvalidSignedPreKey` if its signature does not verify
/// - `UntrustedIdentity` if the identity differs from the pinned one
pub fn check_bundle<S: SessionStore>(
    store: &S,
    remote_user: &UserId,
    bundle: &PreKeyBundle,
) -> Result<SignedPreKeyEntry, EstablishError> {
    let signed_prekey = bundle.signed_prekey.ok_or(EstablishError::BundleIncomplete)?;
    verify_signed_prekey(&bundle.identity, &signed_prekey.public, &signed_prekey.signature)
        .map_err(|_| EstablishError::InvalidSignedPreKey)?;

    if !store.is_trusted_identity(remote_user, &bundle.identity)? {
        tracing::warn!(remote = %remote_user, "bundle identity differs from pinned identity");
        return Err(EstablishError::UntrustedIdentity(remote_user.clone()));
    }

    Ok(signed_prekey)
}

/// Establish a session as initiator from a fetched bundle.
///
/// The session is persisted and the remote identity pinned before returning.
///
/// # Errors
///
/// - Any [`check_bundle`] error
/// - `MissingLocalIdentity` if this device has no identity yet
/// - `KeyMaterial` if the base key cannot be generated
/// - `Crypto` if an agreement is non-contributory
/// - `Store` if persisting fails
pub fn establish<S: SessionStore, E: Environment>(
    store: &S,
    env: &E,
    local_user: &UserId,
    remote_user: &UserId,
    bundle: &PreKeyBundle,
) -> Result<Session, EstablishError> {
    let signed_prekey = check_bundle(store, remote_user, bundle)?;
    let identity = store.local_identity()?.ok_or(EstablishError::MissingLocalIdentity)?;

    let base_key = generate_base_key(env)?;
    let secrets = agree_as_initiator(
        &identity,
        &base_key,
        &bundle.identity,
        &signed_prekey.public,
        bundle.one_time_prekey.as_ref().map(|entry| &entry.public),
    )?;

    let handshake = PreKeyHeader {
        identity: identity.public(),
        base_key: BaseKeyPublic::from_bytes(base_key.public_bytes()),
        signed_prekey_id: signed_prekey.id,
        one_time_prekey_id: bundle.one_time_prekey.map(|entry| entry.id),
    };
    let session = Session::initiate(
        ParticipantPair::new(local_user.clone(), remote_user.clone()),
        identity.public(),
        bundle.identity,
        secrets,
        handshake,
    );

    store.put_session(&session)?;
    store.save_identity(remote_user, &bundle.identity)?;

    tracing::info!(
        remote = %remote_user,
        session_id = %session.session_id(),
        signed_prekey = signed_prekey.id,
        one_time_prekey = ?handshake.one_time_prekey_id,
        "session established"
    );
    Ok(session)
}

/// Derive the responder session for a handshake header.
///
/// Nothing is persisted and no prekey is consumed.
///
/// # Errors
///
/// - `UntrustedIdentity` if the initiator identity differs from the pinned one
/// - `MissingLocalIdentity` if this device has no identity yet
/// - `UnknownSignedPreKey` / `UnknownOneTimePreKey` if a named prekey is not
///   held (rotated out, or already consumed)
/// - `Crypto` if an agreement is non-contributory
pub fn accept<S: SessionStore>(
    store: &S,
    local_user: &UserId,
    remote_user: &UserId,
    handshake: &PreKeyHeader,
) -> Result<Session, EstablishError> {
    if !store.is_trusted_identity(remote_user, &handshake.identity)? {
        tracing::warn!(remote = %remote_user, "handshake identity differs from pinned identity");
        return Err(EstablishError::UntrustedIdentity(remote_user.clone()));
    }

    let identity = store.local_identity()?.ok_or(EstablishError::MissingLocalIdentity)?;
    let signed_prekey = store
        .signed_prekey(handshake.signed_prekey_id)?
        .ok_or(EstablishError::UnknownSignedPreKey(handshake.signed_prekey_id))?;
    let one_time_prekey = match handshake.one_time_prekey_id {
        Some(id) => {
            Some(store.one_time_prekey(id)?.ok_or(EstablishError::UnknownOneTimePreKey(id))?)
        },
        None => None,
    };

    let secrets = agree_as_responder(
        &identity,
        &signed_prekey.private,
        one_time_prekey.as_ref().map(|key| &key.private),
        &handshake.identity,
        &handshake.base_key,
    )?;

    Ok(Session::respond(
        ParticipantPair::new(local_user.clone(), remote_user.clone()),
        identity.public(),
        handshake.identity,
        secrets,
        handshake.base_key,
    ))
}
