//! Receiver delegate: notifications produced by the engine for the
//! surrounding subsystems (UI, contact book, push layer).
//!
//! Every method has an empty default so implementors subscribe only to what
//! they care about.

use std::sync::Mutex;

use uuid::Uuid;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Which key material a rotation replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationScope {
    /// Scheduled rotation of the final PQ-KEM key only.
    PqKem,
    /// Emergency rotation of signing, long-term, and PQ-KEM keys.
    Full,
}

/// A recorded notification (used by [`MemoryReceiver`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiverEvent {
    IdentityCreated { secret_name: String, device_id: Uuid },
    IdentityRemoved { secret_name: String, device_id: Uuid },
    IdentityUpdated { secret_name: String, device_id: Uuid },
    KeysRotated { scope: RotationScope },
    ReservesRefilled { classical: usize, pqkem: usize },
}

// ---------------------------------------------------------------------------
// Delegate trait
// ---------------------------------------------------------------------------

/// Sink for engine notifications.
pub trait SessionReceiver: Send + Sync {
    fn identity_created(&self, _secret_name: &str, _device_id: Uuid) {}
    fn identity_removed(&self, _secret_name: &str, _device_id: Uuid) {}
    fn identity_updated(&self, _secret_name: &str, _device_id: Uuid) {}
    fn keys_rotated(&self, _scope: RotationScope) {}
    fn reserves_refilled(&self, _classical: usize, _pqkem: usize) {}
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

/// Discards every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullReceiver;

impl SessionReceiver for NullReceiver {}

/// Records notifications in memory (testing and ephemeral use).
#[derive(Debug, Default)]
pub struct MemoryReceiver {
    events: Mutex<Vec<ReceiverEvent>>,
}

impl MemoryReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReceiverEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    fn record(&self, event: ReceiverEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionReceiver for MemoryReceiver {
    fn identity_created(&self, secret_name: &str, device_id: Uuid) {
        self.record(ReceiverEvent::IdentityCreated {
            secret_name: secret_name.to_string(),
            device_id,
        });
    }

    fn identity_removed(&self, secret_name: &str, device_id: Uuid) {
        self.record(ReceiverEvent::IdentityRemoved {
            secret_name: secret_name.to_string(),
            device_id,
        });
    }

    fn identity_updated(&self, secret_name: &str, device_id: Uuid) {
        self.record(ReceiverEvent::IdentityUpdated {
            secret_name: secret_name.to_string(),
            device_id,
        });
    }

    fn keys_rotated(&self, scope: RotationScope) {
        self.record(ReceiverEvent::KeysRotated { scope });
    }

    fn reserves_refilled(&self, classical: usize, pqkem: usize) {
        self.record(ReceiverEvent::ReservesRefilled { classical, pqkem });
    }
}

/// Forwards notifications to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReceiver;

impl SessionReceiver for TracingReceiver {
    fn identity_created(&self, secret_name: &str, device_id: Uuid) {
        tracing::info!(secret_name, %device_id, "session identity created");
    }

    fn identity_removed(&self, secret_name: &str, device_id: Uuid) {
        tracing::info!(secret_name, %device_id, "session identity removed");
    }

    fn identity_updated(&self, secret_name: &str, device_id: Uuid) {
        tracing::info!(secret_name, %device_id, "session identity updated");
    }

    fn keys_rotated(&self, scope: RotationScope) {
        tracing::info!(?scope, "device keys rotated");
    }

    fn reserves_refilled(&self, classical: usize, pqkem: usize) {
        tracing::info!(classical, pqkem, "one-time key reserves refilled");
    }
}
