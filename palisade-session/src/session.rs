//! The session value: delegates, serialized mutable state, and lifecycle of
//! the local session context.
//!
//! One `Session` owns one user's context on this device. All mutations of
//! the context and the refreshed-names set go through a single async mutex;
//! the lock is never held across transport I/O.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use tokio::sync::Mutex;
use uuid::Uuid;
use zeroize::Zeroizing;

use palisade_envelope::{
    aead_open, aead_seal, derive_master_key, fingerprint, gen_classical_kem_keypair,
    gen_pqkem_keypair, gen_signing_keypair, SigningPublic, SALT_BYTES, SYMMETRIC_KEY_BYTES,
};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::lifecycle::{generate_one_time_classical, generate_one_time_pqkem};
use crate::receiver::{NullReceiver, SessionReceiver};
use crate::store::SessionStore;
use crate::transport::SessionTransport;
use crate::types::{
    DeviceKeys, OneTimeKeyHandles, OneTimePrivate, RegistrationState, SessionContext,
    SessionIdentity, SessionUser, SignedDeviceConfiguration, UserConfiguration,
    UserDeviceConfiguration,
};

/// AAD binding sealed context blobs to their purpose.
pub(crate) const CONTEXT_AAD: &[u8] = b"palisade|ctx|v1";

/// Which one-time reserve a key belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OneTimeKind {
    Classical,
    PqKem,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub(crate) struct SessionState {
    pub context: Option<SessionContext>,
    pub master_key: Option<Zeroizing<[u8; SYMMETRIC_KEY_BYTES]>>,
    pub master_salt: Option<[u8; SALT_BYTES]>,
    /// Names already reconciled this process; enables the refresh
    /// short-circuit. Safe to clear at any moment.
    pub refreshed: HashSet<String>,
    /// Adding-contact hint; consumed (cleared) by the next refresh.
    pub contact_hint: Option<OneTimeKeyHandles>,
}

pub(crate) struct SessionInner {
    pub transport: Arc<dyn SessionTransport>,
    pub store: Arc<dyn SessionStore>,
    pub receiver: Arc<dyn SessionReceiver>,
    pub config: SessionConfig,
    pub state: Mutex<SessionState>,
    pub rotating_keys: AtomicBool,
    pub refill_in_flight: AtomicBool,
}

/// Read-only view of the context taken under the lock, used by operations
/// that must not hold the lock across I/O.
pub(crate) struct ContextSnapshot {
    pub db_key: [u8; SYMMETRIC_KEY_BYTES],
    pub secret_name: String,
    pub device_id: Uuid,
    pub our_device_ids: HashSet<Uuid>,
    pub classical_reserve: usize,
    pub pqkem_reserve: usize,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Handle to one user's session identity engine. Cheap to clone; clones
/// share state.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Whether an emergency rotation is currently in flight. Outbound
    /// writers may choose to wait while this is set.
    pub fn is_rotating_keys(&self) -> bool {
        self.inner.rotating_keys.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Context lifecycle
    // -----------------------------------------------------------------------

    /// Create a brand-new session: generate every key, seal and persist the
    /// context, and publish the initial configuration (master device plus
    /// one full one-time batch of each kind).
    pub async fn create_session(
        &self,
        secret_name: &str,
        device_name: Option<&str>,
        password: &str,
    ) -> Result<(), SessionError> {
        {
            let state = self.inner.state.lock().await;
            if state.context.is_some() {
                return Err(SessionError::ConfigurationError(
                    "session already initialized".into(),
                ));
            }
        }

        let mut salt = [0u8; SALT_BYTES];
        OsRng.fill_bytes(&mut salt);
        let master = Zeroizing::new(derive_master_key_blocking(password, salt).await?);

        let (signing_sk, signing_pk) = gen_signing_keypair();
        let (long_term_sk, long_term_pk) = gen_classical_kem_keypair();
        let (pqkem_sk, pqkem_pk) = gen_pqkem_keypair();
        let device_id = Uuid::new_v4();
        let batch = self.inner.config.batch_size;

        let (classical_privates, signed_classical) =
            generate_one_time_classical(batch, device_id, &signing_sk);
        let (pqkem_privates, signed_pqkem) =
            generate_one_time_pqkem(batch, device_id, &signing_sk);

        let device = UserDeviceConfiguration {
            device_id,
            device_name: Some(
                device_name
                    .unwrap_or(&self.inner.config.device_name_base)
                    .to_string(),
            ),
            is_master: true,
            signing_public: signing_pk.to_bytes().to_vec(),
            long_term_public: long_term_pk.to_bytes().to_vec(),
            final_pqkem_public: pqkem_pk.to_bytes(),
        };
        let configuration = UserConfiguration {
            signing_public: signing_pk.to_bytes().to_vec(),
            signed_devices: vec![SignedDeviceConfiguration::sign(device, &signing_sk)],
            signed_one_time_classical: signed_classical,
            signed_one_time_pqkem: signed_pqkem,
        };

        let mut database_encryption_key = vec![0u8; SYMMETRIC_KEY_BYTES];
        OsRng.fill_bytes(&mut database_encryption_key);

        let context = SessionContext {
            session_user: SessionUser {
                secret_name: secret_name.to_string(),
                device_id,
                device_keys: DeviceKeys {
                    device_id,
                    signing_private: signing_sk.to_bytes().to_vec(),
                    long_term_private: long_term_sk.to_bytes().to_vec(),
                    final_pqkem_private: pqkem_sk.to_bytes(),
                    final_pqkem_key_id: Uuid::new_v4(),
                    one_time_classical_privates: classical_privates,
                    one_time_pqkem_privates: pqkem_privates,
                    rotate_keys_at: Utc::now(),
                },
            },
            database_encryption_key,
            session_context_id: draw_session_context_id(&HashSet::new()),
            active_user_configuration: configuration.clone(),
            registration_state: RegistrationState::Registered,
        };

        let sealed = seal_context(&context, &master, &salt)?;
        self.inner.store.update_local_session_context(sealed).await?;

        {
            let mut state = self.inner.state.lock().await;
            state.context = Some(context);
            state.master_key = Some(master);
            state.master_salt = Some(salt);
            state.refreshed.clear();
        }

        self.inner
            .transport
            .publish_user_configuration(configuration, true)
            .await
    }

    /// Open the persisted context with `password` and install it.
    pub async fn start_session(&self, password: &str) -> Result<(), SessionError> {
        let sealed = self
            .inner
            .store
            .fetch_local_session_context()
            .await?
            .ok_or(SessionError::SessionNotInitialized)?;
        if sealed.len() < SALT_BYTES {
            return Err(SessionError::SessionDecryptionError);
        }

        let mut salt = [0u8; SALT_BYTES];
        salt.copy_from_slice(&sealed[..SALT_BYTES]);
        let master = Zeroizing::new(derive_master_key_blocking(password, salt).await?);

        let document = Zeroizing::new(aead_open(&master, &sealed[SALT_BYTES..], CONTEXT_AAD)?);
        let context: SessionContext =
            serde_cbor::from_slice(&document).map_err(|_| SessionError::SessionDecryptionError)?;

        let mut state = self.inner.state.lock().await;
        state.context = Some(context);
        state.master_key = Some(master);
        state.master_salt = Some(salt);
        state.refreshed.clear();
        Ok(())
    }

    /// Drop the in-memory context and caches; the persisted context stays.
    pub async fn end_session(&self) {
        let mut state = self.inner.state.lock().await;
        state.context = None;
        state.master_key = None;
        state.master_salt = None;
        state.refreshed.clear();
        state.contact_hint = None;
    }

    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.context.is_some()
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub async fn secret_name(&self) -> Result<String, SessionError> {
        let state = self.inner.state.lock().await;
        let context = state
            .context
            .as_ref()
            .ok_or(SessionError::SessionNotInitialized)?;
        Ok(context.secret_name().to_string())
    }

    pub async fn device_id(&self) -> Result<Uuid, SessionError> {
        let state = self.inner.state.lock().await;
        let context = state
            .context
            .as_ref()
            .ok_or(SessionError::SessionNotInitialized)?;
        Ok(context.device_id())
    }

    pub async fn active_configuration(&self) -> Result<UserConfiguration, SessionError> {
        let state = self.inner.state.lock().await;
        let context = state
            .context
            .as_ref()
            .ok_or(SessionError::SessionNotInitialized)?;
        Ok(context.active_user_configuration.clone())
    }

    /// Current one-time reserve counts: `(classical, pqkem)`.
    pub async fn one_time_reserves(&self) -> Result<(usize, usize), SessionError> {
        let state = self.inner.state.lock().await;
        let keys = &state
            .context
            .as_ref()
            .ok_or(SessionError::SessionNotInitialized)?
            .session_user
            .device_keys;
        Ok((keys.one_time_classical_count(), keys.one_time_pqkem_count()))
    }

    /// Re-publish the active configuration (e.g. after a rotation persisted
    /// but its publication was cut short).
    pub async fn publish_active_configuration(&self) -> Result<(), SessionError> {
        let configuration = self.active_configuration().await?;
        self.inner
            .transport
            .publish_user_configuration(configuration, true)
            .await
    }

    /// All decodable local identities.
    pub async fn identities(&self) -> Result<Vec<SessionIdentity>, SessionError> {
        let db_key = {
            let state = self.inner.state.lock().await;
            state
                .context
                .as_ref()
                .ok_or(SessionError::SessionNotInitialized)?
                .database_key()?
        };
        self.load_identities(&db_key).await
    }

    // -----------------------------------------------------------------------
    // Contact hints
    // -----------------------------------------------------------------------

    /// Store the one-time key ids a contact request carried; the next
    /// refresh binds them instead of fetching fresh ones.
    pub async fn set_contact_hint(&self, handles: OneTimeKeyHandles) {
        let mut state = self.inner.state.lock().await;
        state.contact_hint = Some(handles);
    }

    // -----------------------------------------------------------------------
    // Fingerprints
    // -----------------------------------------------------------------------

    /// The safety-number fingerprint shared with a peer, for out-of-band
    /// verification (mandatory after an emergency rotation).
    pub async fn verification_fingerprint(
        &self,
        remote_name: &str,
        remote_signing_public: &[u8],
    ) -> Result<String, SessionError> {
        let (local_name, local_signing) = {
            let state = self.inner.state.lock().await;
            let context = state
                .context
                .as_ref()
                .ok_or(SessionError::SessionNotInitialized)?;
            (
                context.secret_name().to_string(),
                context.active_user_configuration.signing_public()?,
            )
        };
        let remote = SigningPublic::from_bytes(remote_signing_public)
            .map_err(|_| SessionError::ConfigurationError("malformed signing key".into()))?;
        Ok(fingerprint(&local_name, &local_signing, remote_name, &remote))
    }

    // -----------------------------------------------------------------------
    // One-time private claims (driven by the ratchet layer)
    // -----------------------------------------------------------------------

    /// Remove a one-time private that a peer has claimed and persist the
    /// shrunken context. Returns `None` when the key was already consumed.
    pub async fn consume_one_time_private(
        &self,
        kind: OneTimeKind,
        id: Uuid,
    ) -> Result<Option<OneTimePrivate>, SessionError> {
        let mut state = self.inner.state.lock().await;
        let context = state
            .context
            .as_ref()
            .ok_or(SessionError::SessionNotInitialized)?;

        let mut next = context.clone();
        let taken = {
            let keys = &mut next.session_user.device_keys;
            match kind {
                OneTimeKind::Classical => keys.take_one_time_classical(id),
                OneTimeKind::PqKem => keys.take_one_time_pqkem(id),
            }
        };
        let Some(taken) = taken else {
            return Ok(None);
        };

        self.persist_context_locked(&mut state, next).await?;
        Ok(Some(taken))
    }

    /// Handle an inbound identity-creation notice: decode the id pair the
    /// peer bound and retire the matching one-time privates. Ids already
    /// consumed are ignored, which also deduplicates replayed notices.
    pub async fn process_identity_notice(&self, payload: &[u8]) -> Result<(), SessionError> {
        let handles = crate::canon::decode_identity_notice(payload)?;
        if let Some(id) = handles.classical_id {
            self.consume_one_time_private(OneTimeKind::Classical, id)
                .await?;
        }
        if let Some(id) = handles.pqkem_id {
            self.consume_one_time_private(OneTimeKind::PqKem, id).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    pub(crate) async fn snapshot(&self) -> Result<ContextSnapshot, SessionError> {
        let state = self.inner.state.lock().await;
        let context = state
            .context
            .as_ref()
            .ok_or(SessionError::SessionNotInitialized)?;
        let keys = &context.session_user.device_keys;

        let mut our_device_ids: HashSet<Uuid> = context
            .active_user_configuration
            .verified_devices()?
            .into_iter()
            .map(|d| d.device_id)
            .collect();
        our_device_ids.insert(context.device_id());

        Ok(ContextSnapshot {
            db_key: context.database_key()?,
            secret_name: context.secret_name().to_string(),
            device_id: context.device_id(),
            our_device_ids,
            classical_reserve: keys.one_time_classical_count(),
            pqkem_reserve: keys.one_time_pqkem_count(),
        })
    }

    /// Seal `next` under the installed master key, write it through the
    /// store, and install it in memory. Caller holds the state lock; this is
    /// the single-writer serialization point for the context.
    pub(crate) async fn persist_context_locked(
        &self,
        state: &mut SessionState,
        next: SessionContext,
    ) -> Result<(), SessionError> {
        let master = state
            .master_key
            .as_ref()
            .ok_or(SessionError::SessionNotInitialized)?;
        let salt = state.master_salt.ok_or(SessionError::SessionNotInitialized)?;
        let sealed = seal_context(&next, master, &salt)?;
        self.inner.store.update_local_session_context(sealed).await?;
        state.context = Some(next);
        Ok(())
    }

    pub(crate) async fn load_identities(
        &self,
        db_key: &[u8; SYMMETRIC_KEY_BYTES],
    ) -> Result<Vec<SessionIdentity>, SessionError> {
        let records = self.inner.store.fetch_all_session_identities().await?;
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id();
            match SessionIdentity::from_record(record, db_key) {
                Some(identity) => out.push(identity),
                // Missing or tampered; either way unreadable. Leave it in
                // place for forensics, just don't surface it.
                None => tracing::warn!(%id, "skipping unreadable identity record"),
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

pub(crate) fn seal_context(
    context: &SessionContext,
    master: &[u8; SYMMETRIC_KEY_BYTES],
    salt: &[u8; SALT_BYTES],
) -> Result<Vec<u8>, SessionError> {
    let document = Zeroizing::new(
        serde_cbor::to_vec(context).map_err(|_| SessionError::SessionEncryptionError)?,
    );
    let sealed = aead_seal(master, &document, CONTEXT_AAD)?;
    let mut out = Vec::with_capacity(SALT_BYTES + sealed.len());
    out.extend_from_slice(salt);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// The Argon2 derivation is CPU-heavy; run it off the async workers.
async fn derive_master_key_blocking(
    password: &str,
    salt: [u8; SALT_BYTES],
) -> Result<[u8; SYMMETRIC_KEY_BYTES], SessionError> {
    let password = password.as_bytes().to_vec();
    let derived = tokio::task::spawn_blocking(move || derive_master_key(&password, &salt))
        .await
        .map_err(|_| SessionError::SessionEncryptionError)??;
    Ok(derived)
}

/// Draw a session context id uniformly from [1, 2^63), rejecting collisions
/// with `used`.
pub(crate) fn draw_session_context_id(used: &HashSet<i64>) -> i64 {
    loop {
        let candidate = (OsRng.next_u64() >> 1) as i64;
        if candidate >= 1 && !used.contains(&candidate) {
            return candidate;
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds a [`Session`] from its delegates. Transport and store are
/// required; the receiver defaults to [`NullReceiver`].
pub struct SessionBuilder {
    transport: Option<Arc<dyn SessionTransport>>,
    store: Option<Arc<dyn SessionStore>>,
    receiver: Arc<dyn SessionReceiver>,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            store: None,
            receiver: Arc::new(NullReceiver),
            config: SessionConfig::default(),
        }
    }

    pub fn transport(mut self, transport: Arc<dyn SessionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn receiver(mut self, receiver: Arc<dyn SessionReceiver>) -> Self {
        self.receiver = receiver;
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Session, SessionError> {
        let transport = self.transport.ok_or(SessionError::TransportNotInitialized)?;
        let store = self.store.ok_or(SessionError::DatabaseNotInitialized)?;
        Ok(Session {
            inner: Arc::new(SessionInner {
                transport,
                store,
                receiver: self.receiver,
                config: self.config,
                state: Mutex::new(SessionState {
                    context: None,
                    master_key: None,
                    master_salt: None,
                    refreshed: HashSet::new(),
                    contact_hint: None,
                }),
                rotating_keys: AtomicBool::new(false),
                refill_in_flight: AtomicBool::new(false),
            }),
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
