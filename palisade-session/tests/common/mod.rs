//! Shared test fixtures: a remote user double and a wired-up local session.

// Each integration test binary uses a different slice of these helpers.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use palisade_envelope::{
    gen_classical_kem_keypair, gen_pqkem_keypair, gen_signing_keypair, SigningPrivate,
};
use palisade_session::{
    MemoryReceiver, MemoryStore, MemoryTransport, Session, SessionConfig,
    SignedDeviceConfiguration, SignedOneTimeKey, UserConfiguration, UserDeviceConfiguration,
};

pub const PASSWORD: &str = "correct horse battery staple";

/// A fabricated correspondent whose configuration we control entirely.
pub struct RemoteUser {
    pub signing: SigningPrivate,
    pub configuration: UserConfiguration,
}

impl RemoteUser {
    /// Build a user with `device_count` verified devices, each carrying
    /// `one_time_per_device` classical and PQ-KEM one-time keys.
    pub fn new(device_count: usize, one_time_per_device: usize) -> Self {
        let (signing, signing_public) = gen_signing_keypair();
        let mut signed_devices = Vec::new();
        let mut signed_one_time_classical = Vec::new();
        let mut signed_one_time_pqkem = Vec::new();

        for i in 0..device_count {
            let device_id = Uuid::new_v4();
            let device = UserDeviceConfiguration {
                device_id,
                device_name: Some(format!("peer-{}", i)),
                is_master: i == 0,
                signing_public: signing_public.to_bytes().to_vec(),
                long_term_public: gen_classical_kem_keypair().1.to_bytes().to_vec(),
                final_pqkem_public: gen_pqkem_keypair().1.to_bytes(),
            };
            signed_devices.push(SignedDeviceConfiguration::sign(device, &signing));

            for _ in 0..one_time_per_device {
                signed_one_time_classical.push(SignedOneTimeKey::sign(
                    Uuid::new_v4(),
                    device_id,
                    gen_classical_kem_keypair().1.to_bytes().to_vec(),
                    &signing,
                ));
                signed_one_time_pqkem.push(SignedOneTimeKey::sign(
                    Uuid::new_v4(),
                    device_id,
                    gen_pqkem_keypair().1.to_bytes(),
                    &signing,
                ));
            }
        }

        Self {
            signing,
            configuration: UserConfiguration {
                signing_public: signing_public.to_bytes().to_vec(),
                signed_devices,
                signed_one_time_classical,
                signed_one_time_pqkem,
            },
        }
    }

    pub fn device_ids(&self) -> Vec<Uuid> {
        self.configuration
            .signed_devices
            .iter()
            .map(|d| d.device.device_id)
            .collect()
    }

    /// Drop the device at `index` (and its one-time keys) from the
    /// configuration, as the server would after a retirement.
    pub fn retire_device(&mut self, index: usize) {
        let removed = self.configuration.signed_devices.remove(index);
        let id = removed.device.device_id;
        self.configuration
            .signed_one_time_classical
            .retain(|k| k.device_id != id);
        self.configuration
            .signed_one_time_pqkem
            .retain(|k| k.device_id != id);
    }

    /// Rotate the long-term key of the device at `index`, re-signing its
    /// entry.
    pub fn rotate_long_term(&mut self, index: usize) -> Vec<u8> {
        let mut device = self.configuration.signed_devices[index].device.clone();
        let fresh = gen_classical_kem_keypair().1.to_bytes().to_vec();
        device.long_term_public = fresh.clone();
        self.configuration.signed_devices[index] =
            SignedDeviceConfiguration::sign(device, &self.signing);
        fresh
    }
}

pub struct Harness {
    pub session: Session,
    pub transport: Arc<MemoryTransport>,
    pub store: Arc<MemoryStore>,
    pub receiver: Arc<MemoryReceiver>,
}

/// A session for `name` with in-memory delegates, already created and
/// published.
pub async fn local_session(name: &str, config: SessionConfig) -> Harness {
    let transport = Arc::new(MemoryTransport::new(name));
    let store = Arc::new(MemoryStore::new());
    let receiver = Arc::new(MemoryReceiver::new());
    let session = Session::builder()
        .transport(transport.clone())
        .store(store.clone())
        .receiver(receiver.clone())
        .config(config)
        .build()
        .unwrap();
    session
        .create_session(name, Some("local"), PASSWORD)
        .await
        .unwrap();
    Harness {
        session,
        transport,
        store,
        receiver,
    }
}

/// A config with small batches so tests stay quick.
pub fn small_config() -> SessionConfig {
    SessionConfig {
        low_watermark: 3,
        batch_size: 5,
        ..SessionConfig::default()
    }
}

/// A config whose rotation interval has effectively always elapsed.
pub fn due_rotation_config() -> SessionConfig {
    SessionConfig {
        rotation_interval: Duration::ZERO,
        ..small_config()
    }
}
