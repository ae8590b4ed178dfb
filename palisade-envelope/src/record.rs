//! Secure record envelope: a typed payload sealed under a symmetric key.
//!
//! A record is `(id, sealed)`. The payload is serialized to a canonical CBOR
//! document and sealed with AES-256-GCM under a key derived per record
//! (HKDF of the store key and the record id), with the id bound as AAD so a
//! blob cannot be replayed under another id.
//!
//! Payload types use obfuscated single-letter serde field names; those keys
//! and the declaration order are a frozen wire contract.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::aead::{aead_open, aead_seal, SYMMETRIC_KEY_BYTES};
use crate::error::EncryptionError;
use crate::kdf::derive_record_key;

/// An opaque sealed record with a stable plaintext id.
///
/// The store layer moves these without interpreting them; only holders of
/// the symmetric key can materialize the properties.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureRecord {
    #[serde(with = "uuid::serde::compact")]
    id: Uuid,
    #[serde(with = "serde_bytes")]
    sealed: Vec<u8>,
}

impl SecureRecord {
    /// Serialize `props` canonically and seal it under `key`.
    pub fn new<P: Serialize>(
        id: Uuid,
        props: &P,
        key: &[u8; SYMMETRIC_KEY_BYTES],
    ) -> Result<Self, EncryptionError> {
        let sealed = seal_props(id, props, key)?;
        Ok(Self { id, sealed })
    }

    /// Rehydrate a record fetched from a store.
    pub fn from_parts(id: Uuid, sealed: Vec<u8>) -> Self {
        Self { id, sealed }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sealed_bytes(&self) -> &[u8] {
        &self.sealed
    }

    /// Decrypt and decode the properties.
    ///
    /// Returns `None` on any decrypt or decode failure; a missing payload
    /// and a tampered payload are indistinguishable here by design.
    pub fn props<P: DeserializeOwned>(&self, key: &[u8; SYMMETRIC_KEY_BYTES]) -> Option<P> {
        let record_key = Zeroizing::new(derive_record_key(key, self.id.as_bytes()).ok()?);
        let plaintext =
            Zeroizing::new(aead_open(&record_key, &self.sealed, self.id.as_bytes()).ok()?);
        serde_cbor::from_slice(&plaintext).ok()
    }

    /// Re-seal the record in place with new properties, returning the
    /// re-decoded payload (or `None` if the new blob does not round-trip).
    pub fn update<P: Serialize + DeserializeOwned>(
        &mut self,
        key: &[u8; SYMMETRIC_KEY_BYTES],
        props: &P,
    ) -> Option<P> {
        let sealed = seal_props(self.id, props, key).ok()?;
        self.sealed = sealed;
        self.props(key)
    }
}

fn seal_props<P: Serialize>(
    id: Uuid,
    props: &P,
    key: &[u8; SYMMETRIC_KEY_BYTES],
) -> Result<Vec<u8>, EncryptionError> {
    let document = Zeroizing::new(serde_cbor::to_vec(props).map_err(|_| EncryptionError)?);
    let record_key =
        Zeroizing::new(derive_record_key(key, id.as_bytes()).map_err(|_| EncryptionError)?);
    aead_seal(&record_key, &document, id.as_bytes())
}
