//! # Palisade Session
//!
//! Client-side session identity engine for a hybrid classical +
//! post-quantum secure-messaging SDK: signature-verified device discovery,
//! exactly-once binding of one-time pre-keys to per-device session
//! identities, reconciliation of the local view against the peer's
//! authoritative configuration, and scheduled or emergency rotation of the
//! local device's long-lived keys.
//!
//! ## Quick Start
//!
//! ```ignore
//! use palisade_session::{MemoryStore, MemoryTransport, Session};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let transport = Arc::new(MemoryTransport::new("alice"));
//! let session = Session::builder()
//!     .transport(transport.clone())
//!     .store(Arc::new(MemoryStore::new()))
//!     .build()
//!     .unwrap();
//!
//! session.create_session("alice", Some("laptop"), "passphrase").await.unwrap();
//!
//! // Discover bob's devices and bind sessions to his pre-keys.
//! let identities = session.refresh_identities("bob").await.unwrap();
//!
//! // Housekeeping.
//! session.rotate_pqkem_if_needed().await.unwrap();
//! # });
//! ```
//!
//! ## Concurrency
//!
//! One async mutex serializes every mutation of the session context and the
//! refreshed-names cache; it is never held across transport I/O. Identity
//! records with distinct ids may be written concurrently. Reserve refills
//! triggered by a refresh run as detached tasks and never fail the refresh.

pub mod canon;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod receiver;
pub mod refresh;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

pub use config::SessionConfig;
pub use error::SessionError;
pub use receiver::{
    MemoryReceiver, NullReceiver, ReceiverEvent, RotationScope, SessionReceiver,
    TracingReceiver,
};
pub use refresh::RefreshOptions;
pub use session::{OneTimeKind, Session, SessionBuilder};
pub use store::{FileStore, MemoryStore, SessionStore};
pub use transport::{MemoryTransport, SessionTransport};
pub use types::{
    DeviceKeys, IdentityProps, OneTimeKeyHandles, OneTimePrivate, RegistrationState,
    RotatedKeyBundle, SessionContext, SessionIdentity, SessionUser, SignedDeviceConfiguration,
    SignedOneTimeKey, UserConfiguration, UserDeviceConfiguration,
};
