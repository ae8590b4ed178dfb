//! # Palisade Envelope
//!
//! Crypto primitives facade and sealed record envelope for the Palisade
//! session identity engine.
//!
//! ## Quick Start
//!
//! ```rust
//! use palisade_envelope::SecureRecord;
//! use serde::{Deserialize, Serialize};
//! use uuid::Uuid;
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Note { #[serde(rename = "a")] text: String }
//!
//! let key = [7u8; 32];
//! let record = SecureRecord::new(
//!     Uuid::new_v4(),
//!     &Note { text: "hello".into() },
//!     &key,
//! ).unwrap();
//!
//! let note: Note = record.props(&key).unwrap();
//! assert_eq!(note.text, "hello");
//! ```
//!
//! ## Security Properties
//!
//! - **Hybrid key material**: classical X25519 alongside ML-KEM-1024 —
//!   session secrecy holds if either primitive holds
//! - **Uniform errors**: every decrypt failure produces one opaque type
//! - **Id binding**: sealed records are AAD-bound to their plaintext id
//! - **Frozen coding keys**: payload field names never change once released
//!
//! ## What's NOT Provided
//!
//! - The ratchet itself (encapsulation/decapsulation is driven above)
//! - Key lifecycle management (see `palisade-session`)
//! - Streaming encryption
//! - Constant-time guarantees beyond what the underlying crates give

#![deny(unsafe_code)]

mod aead;
mod error;
mod fingerprint;
mod kdf;
mod kem;
mod record;
mod sign;

pub use aead::{
    aead_open, aead_seal, AEAD_TAG_BYTES, MIN_SEALED_BYTES, NONCE_BYTES, SYMMETRIC_KEY_BYTES,
};
pub use error::{DecryptionError, EncryptionError, KdfError, SignatureError};
pub use fingerprint::{fingerprint, fingerprints_match};
pub use kdf::{derive_master_key, derive_record_key, PROTOCOL_ID, SALT_BYTES};
pub use kem::{
    gen_classical_kem_keypair, gen_pqkem_keypair, KemPrivate, KemPublic, PqKemPrivate,
    PqKemPublic, KEM_PRIVATE_BYTES, KEM_PUBLIC_BYTES, PQKEM_PRIVATE_BYTES, PQKEM_PUBLIC_BYTES,
};
pub use record::SecureRecord;
pub use sign::{
    gen_signing_keypair, Signature, SigningPrivate, SigningPublic, SIGNATURE_BYTES,
    SIGNING_PRIVATE_BYTES, SIGNING_PUBLIC_BYTES,
};
