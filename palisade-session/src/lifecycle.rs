//! Key lifecycle: one-time reserve refills, scheduled PQ-KEM rotation, and
//! emergency full rotation.
//!
//! Every mutation follows the same discipline: prepare new material, verify
//! preconditions under the *current* signing key, build the next full
//! context value, seal, single store write, install in memory, and only
//! then publish. A failure before the write leaves state untouched; a
//! failure after it leaves persisted state ahead of what peers know, which
//! the next refresh round propagates.

use std::sync::atomic::Ordering;

use chrono::Utc;
use uuid::Uuid;

use palisade_envelope::{
    gen_classical_kem_keypair, gen_pqkem_keypair, gen_signing_keypair, SigningPrivate,
};

use crate::error::SessionError;
use crate::receiver::RotationScope;
use crate::session::Session;
use crate::types::{
    OneTimePrivate, RotatedKeyBundle, SignedDeviceConfiguration, SignedOneTimeKey,
};

impl Session {
    // -----------------------------------------------------------------------
    // One-time key refill
    // -----------------------------------------------------------------------

    /// Top up the one-time reserves that have dropped to the low watermark.
    ///
    /// Generates a full batch per depleted kind, signs the new publics under
    /// the current signing key, persists the grown context atomically, and
    /// republishes the configuration. Returns whether a refill happened.
    /// Concurrent invocations from one process coalesce.
    pub async fn refill_one_time_keys_if_needed(&self) -> Result<bool, SessionError> {
        if self.inner.refill_in_flight.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let result = self.refill_inner().await;
        self.inner.refill_in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn refill_inner(&self) -> Result<bool, SessionError> {
        let mut state = self.inner.state.lock().await;
        let context = state
            .context
            .as_ref()
            .ok_or(SessionError::SessionNotInitialized)?;

        let watermark = self.inner.config.low_watermark;
        let batch = self.inner.config.batch_size;
        let keys = &context.session_user.device_keys;
        let need_classical = keys.one_time_classical_count() <= watermark;
        let need_pqkem = keys.one_time_pqkem_count() <= watermark;
        if !need_classical && !need_pqkem {
            return Ok(false);
        }

        let signing = keys.signing_private()?;
        let device_id = context.device_id();

        let mut next = context.clone();
        let mut added_classical = 0;
        let mut added_pqkem = 0;
        if need_classical {
            let (privates, signed) = generate_one_time_classical(batch, device_id, &signing);
            added_classical = signed.len();
            next.active_user_configuration
                .signed_one_time_classical
                .extend(signed);
            next.session_user
                .device_keys
                .one_time_classical_privates
                .extend(privates);
        }
        if need_pqkem {
            let (privates, signed) = generate_one_time_pqkem(batch, device_id, &signing);
            added_pqkem = signed.len();
            next.active_user_configuration
                .signed_one_time_pqkem
                .extend(signed);
            next.session_user
                .device_keys
                .one_time_pqkem_privates
                .extend(privates);
        }

        let configuration = next.active_user_configuration.clone();
        self.persist_context_locked(&mut state, next).await?;
        drop(state);

        self.inner
            .transport
            .publish_user_configuration(configuration, true)
            .await?;
        self.inner
            .receiver
            .reserves_refilled(added_classical, added_pqkem);
        tracing::debug!(added_classical, added_pqkem, "one-time reserves refilled");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Scheduled PQ-KEM rotation
    // -----------------------------------------------------------------------

    /// Rotate the final PQ-KEM key if the rotation interval has elapsed.
    /// Returns whether a rotation occurred.
    pub async fn rotate_pqkem_if_needed(&self) -> Result<bool, SessionError> {
        let mut state = self.inner.state.lock().await;
        let context = state
            .context
            .as_ref()
            .ok_or(SessionError::SessionNotInitialized)?;

        let elapsed = Utc::now() - context.session_user.device_keys.rotate_keys_at;
        let interval = chrono::Duration::from_std(self.inner.config.rotation_interval)
            .unwrap_or(chrono::Duration::MAX);
        if elapsed < interval {
            return Ok(false);
        }

        let signing_public = context.active_user_configuration.signing_public()?;
        let signing_private = context.session_user.device_keys.signing_private()?;
        let device_id = context.device_id();
        let secret_name = context.secret_name().to_string();

        let index = context
            .active_user_configuration
            .signed_devices
            .iter()
            .position(|d| d.device.device_id == device_id)
            .ok_or_else(|| {
                SessionError::InvalidDeviceIdentity(
                    "local device missing from active configuration".into(),
                )
            })?;
        // Precondition: the entry we are about to replace verifies under the
        // current key.
        let mut device =
            context.active_user_configuration.signed_devices[index].verify(&signing_public)?;

        let (pqkem_private, pqkem_public) = gen_pqkem_keypair();
        device.final_pqkem_public = pqkem_public.to_bytes();
        let resigned = SignedDeviceConfiguration::sign(device, &signing_private);

        let mut next = context.clone();
        next.active_user_configuration.signed_devices[index] = resigned.clone();
        next.session_user.device_keys.final_pqkem_private = pqkem_private.to_bytes();
        next.session_user.device_keys.final_pqkem_key_id = Uuid::new_v4();
        next.session_user.device_keys.rotate_keys_at = Utc::now();

        self.persist_context_locked(&mut state, next).await?;
        drop(state);

        self.inner
            .transport
            .publish_rotated_keys(
                &secret_name,
                device_id,
                RotatedKeyBundle {
                    psk_data: signing_public.to_bytes().to_vec(),
                    signed_device: resigned,
                },
            )
            .await?;
        self.inner.receiver.keys_rotated(RotationScope::PqKem);
        tracing::info!(%device_id, "scheduled PQ-KEM rotation completed");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Emergency full rotation
    // -----------------------------------------------------------------------

    /// Replace signing, long-term, and PQ-KEM keys, assuming every long-lived
    /// secret is potentially leaked.
    ///
    /// Peers verifying against the old signing key will fail until they
    /// re-verify fingerprints out of band. The `is_rotating_keys` flag is
    /// held for the duration so concurrent outbound writers can wait.
    pub async fn rotate_all_on_compromise(&self) -> Result<(), SessionError> {
        self.inner.rotating_keys.store(true, Ordering::SeqCst);
        let result = self.rotate_all_inner().await;
        self.inner.rotating_keys.store(false, Ordering::SeqCst);
        result
    }

    async fn rotate_all_inner(&self) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        let context = state
            .context
            .as_ref()
            .ok_or(SessionError::SessionNotInitialized)?;

        let old_signing_public = context.active_user_configuration.signing_public()?;
        let device_id = context.device_id();
        let secret_name = context.secret_name().to_string();

        let index = context
            .active_user_configuration
            .signed_devices
            .iter()
            .position(|d| d.device.device_id == device_id)
            .ok_or_else(|| {
                SessionError::InvalidDeviceIdentity(
                    "local device missing from active configuration".into(),
                )
            })?;
        // Precondition check still runs under the old key.
        let mut device =
            context.active_user_configuration.signed_devices[index].verify(&old_signing_public)?;

        let (signing_private, signing_public) = gen_signing_keypair();
        let (long_term_private, long_term_public) = gen_classical_kem_keypair();
        let (pqkem_private, pqkem_public) = gen_pqkem_keypair();

        device.signing_public = signing_public.to_bytes().to_vec();
        device.long_term_public = long_term_public.to_bytes().to_vec();
        device.final_pqkem_public = pqkem_public.to_bytes();
        // Re-signed under the new key, not the old one.
        let resigned = SignedDeviceConfiguration::sign(device, &signing_private);

        let mut next = context.clone();
        {
            let configuration = &mut next.active_user_configuration;
            configuration.signing_public = signing_public.to_bytes().to_vec();
            configuration.signed_devices[index] = resigned.clone();
            // Every signed_* entry must keep verifying against the user's
            // signing key, so companion entries and the one-time batches are
            // re-signed in the same atomic context build.
            for (i, entry) in configuration.signed_devices.iter_mut().enumerate() {
                if i != index {
                    *entry =
                        SignedDeviceConfiguration::sign(entry.device.clone(), &signing_private);
                }
            }
            for entry in configuration.signed_one_time_classical.iter_mut() {
                *entry = SignedOneTimeKey::sign(
                    entry.id,
                    entry.device_id,
                    entry.key.clone(),
                    &signing_private,
                );
            }
            for entry in configuration.signed_one_time_pqkem.iter_mut() {
                *entry = SignedOneTimeKey::sign(
                    entry.id,
                    entry.device_id,
                    entry.key.clone(),
                    &signing_private,
                );
            }

            let keys = &mut next.session_user.device_keys;
            keys.signing_private = signing_private.to_bytes().to_vec();
            keys.long_term_private = long_term_private.to_bytes().to_vec();
            keys.final_pqkem_private = pqkem_private.to_bytes();
            keys.final_pqkem_key_id = Uuid::new_v4();
            keys.rotate_keys_at = Utc::now();
        }

        self.persist_context_locked(&mut state, next).await?;
        drop(state);

        self.inner
            .transport
            .publish_rotated_keys(
                &secret_name,
                device_id,
                RotatedKeyBundle {
                    psk_data: signing_public.to_bytes().to_vec(),
                    signed_device: resigned,
                },
            )
            .await?;
        self.inner.receiver.keys_rotated(RotationScope::Full);
        tracing::warn!(%device_id, "emergency key rotation completed; peers must re-verify");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Batch generation
// ---------------------------------------------------------------------------

pub(crate) fn generate_one_time_classical(
    batch: usize,
    device_id: Uuid,
    signing: &SigningPrivate,
) -> (Vec<OneTimePrivate>, Vec<SignedOneTimeKey>) {
    let mut privates = Vec::with_capacity(batch);
    let mut signed = Vec::with_capacity(batch);
    for _ in 0..batch {
        let id = Uuid::new_v4();
        let (private, public) = gen_classical_kem_keypair();
        privates.push(OneTimePrivate {
            id,
            key: private.to_bytes().to_vec(),
        });
        signed.push(SignedOneTimeKey::sign(
            id,
            device_id,
            public.to_bytes().to_vec(),
            signing,
        ));
    }
    (privates, signed)
}

pub(crate) fn generate_one_time_pqkem(
    batch: usize,
    device_id: Uuid,
    signing: &SigningPrivate,
) -> (Vec<OneTimePrivate>, Vec<SignedOneTimeKey>) {
    let mut privates = Vec::with_capacity(batch);
    let mut signed = Vec::with_capacity(batch);
    for _ in 0..batch {
        let id = Uuid::new_v4();
        let (private, public) = gen_pqkem_keypair();
        privates.push(OneTimePrivate {
            id,
            key: private.to_bytes(),
        });
        signed.push(SignedOneTimeKey::sign(id, device_id, public.to_bytes(), signing));
    }
    (privates, signed)
}
