//! Transport delegate: how the engine talks to the key-distribution server.
//!
//! The wire protocol is out of scope; the engine only sees this trait. An
//! in-process [`MemoryTransport`] doubles as the server for tests and
//! ephemeral use.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SessionError;
use crate::types::{OneTimeKeyHandles, RotatedKeyBundle, UserConfiguration};

// ---------------------------------------------------------------------------
// Delegate trait
// ---------------------------------------------------------------------------

/// Backend for configuration discovery and publication.
///
/// Implement this over your wire protocol. All methods may suspend and may
/// be slow (seconds under load).
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Fetch the authoritative configuration of `secret_name`.
    async fn find_configuration(
        &self,
        secret_name: &str,
    ) -> Result<UserConfiguration, SessionError>;

    /// Ask the server to hand out one unclaimed one-time key id pair for a
    /// device. Either id may be absent when reserves are drained.
    async fn fetch_one_time_keys(
        &self,
        secret_name: &str,
        device_id: Uuid,
    ) -> Result<OneTimeKeyHandles, SessionError>;

    /// Publish the local user's full configuration.
    async fn publish_user_configuration(
        &self,
        configuration: UserConfiguration,
        update_key_bundle: bool,
    ) -> Result<(), SessionError>;

    /// Publish a re-signed device entry after a key rotation.
    async fn publish_rotated_keys(
        &self,
        secret_name: &str,
        device_id: Uuid,
        bundle: RotatedKeyBundle,
    ) -> Result<(), SessionError>;

    /// Tell a peer which of their one-time keys we bound, by sending a
    /// zero-text message whose transport info carries the encoded id pair.
    async fn notify_identity_creation(
        &self,
        secret_name: &str,
        payload: Vec<u8>,
    ) -> Result<(), SessionError>;
}

// ---------------------------------------------------------------------------
// In-memory transport (test server double)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ServerState {
    configurations: RwLock<HashMap<String, UserConfiguration>>,
    claimed_one_time: Mutex<HashSet<Uuid>>,
    notices: Mutex<Vec<(String, Vec<u8>)>>,
    rotations: Mutex<Vec<(String, Uuid, RotatedKeyBundle)>>,
    publishes: Mutex<Vec<(String, bool)>>,
    find_calls: AtomicUsize,
}

/// In-process transport sharing one server state between handles.
///
/// Each handle publishes under its own `local_name`; `handle_for` derives a
/// handle for another user on the same server so multi-party flows can be
/// exercised without a network.
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<ServerState>,
    local_name: String,
}

impl MemoryTransport {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(ServerState::default()),
            local_name: local_name.into(),
        }
    }

    /// A handle for another user backed by the same server state.
    pub fn handle_for(&self, local_name: impl Into<String>) -> Self {
        Self {
            state: self.state.clone(),
            local_name: local_name.into(),
        }
    }

    /// Seed or overwrite a stored configuration directly.
    pub fn insert_configuration(&self, secret_name: impl Into<String>, config: UserConfiguration) {
        self.state
            .configurations
            .write()
            .unwrap()
            .insert(secret_name.into(), config);
    }

    pub fn configuration(&self, secret_name: &str) -> Option<UserConfiguration> {
        self.state
            .configurations
            .read()
            .unwrap()
            .get(secret_name)
            .cloned()
    }

    /// Recorded identity-creation notices: `(recipient, payload)`.
    pub fn notices(&self) -> Vec<(String, Vec<u8>)> {
        self.state.notices.lock().unwrap().clone()
    }

    /// Recorded rotation publications.
    pub fn rotations(&self) -> Vec<(String, Uuid, RotatedKeyBundle)> {
        self.state.rotations.lock().unwrap().clone()
    }

    /// Recorded full-configuration publications: `(publisher, update_key_bundle)`.
    pub fn publishes(&self) -> Vec<(String, bool)> {
        self.state.publishes.lock().unwrap().clone()
    }

    pub fn find_calls(&self) -> usize {
        self.state.find_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionTransport for MemoryTransport {
    async fn find_configuration(
        &self,
        secret_name: &str,
    ) -> Result<UserConfiguration, SessionError> {
        self.state.find_calls.fetch_add(1, Ordering::SeqCst);
        self.configuration(secret_name)
            .ok_or_else(|| SessionError::TransportError(format!("no configuration for {}", secret_name)))
    }

    async fn fetch_one_time_keys(
        &self,
        secret_name: &str,
        device_id: Uuid,
    ) -> Result<OneTimeKeyHandles, SessionError> {
        let config = self.configuration(secret_name).ok_or_else(|| {
            SessionError::TransportError(format!("no configuration for {}", secret_name))
        })?;

        let mut claimed = self.state.claimed_one_time.lock().unwrap();
        let classical_id = config
            .signed_one_time_classical
            .iter()
            .find(|k| k.device_id == device_id && !claimed.contains(&k.id))
            .map(|k| k.id);
        if let Some(id) = classical_id {
            claimed.insert(id);
        }
        let pqkem_id = config
            .signed_one_time_pqkem
            .iter()
            .find(|k| k.device_id == device_id && !claimed.contains(&k.id))
            .map(|k| k.id);
        if let Some(id) = pqkem_id {
            claimed.insert(id);
        }

        Ok(OneTimeKeyHandles {
            classical_id,
            pqkem_id,
        })
    }

    async fn publish_user_configuration(
        &self,
        configuration: UserConfiguration,
        update_key_bundle: bool,
    ) -> Result<(), SessionError> {
        self.state
            .configurations
            .write()
            .unwrap()
            .insert(self.local_name.clone(), configuration);
        self.state
            .publishes
            .lock()
            .unwrap()
            .push((self.local_name.clone(), update_key_bundle));
        Ok(())
    }

    async fn publish_rotated_keys(
        &self,
        secret_name: &str,
        device_id: Uuid,
        bundle: RotatedKeyBundle,
    ) -> Result<(), SessionError> {
        {
            let mut configs = self.state.configurations.write().unwrap();
            if let Some(config) = configs.get_mut(secret_name) {
                config.signing_public = bundle.psk_data.clone();
                if let Some(entry) = config
                    .signed_devices
                    .iter_mut()
                    .find(|d| d.device.device_id == device_id)
                {
                    *entry = bundle.signed_device.clone();
                }
            }
        }
        self.state
            .rotations
            .lock()
            .unwrap()
            .push((secret_name.to_string(), device_id, bundle));
        Ok(())
    }

    async fn notify_identity_creation(
        &self,
        secret_name: &str,
        payload: Vec<u8>,
    ) -> Result<(), SessionError> {
        self.state
            .notices
            .lock()
            .unwrap()
            .push((secret_name.to_string(), payload));
        Ok(())
    }
}
