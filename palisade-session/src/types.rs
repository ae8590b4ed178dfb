//! Core data model: device configurations, signed bundles, device keys,
//! session identities, and the session context.
//!
//! Everything that is sealed or travels through a delegate serializes with
//! obfuscated single-letter field names; those keys are a frozen wire
//! contract. UUIDs are 16-byte big-endian, timestamps UTC milliseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use palisade_envelope::{
    KemPrivate, PqKemPrivate, SecureRecord, Signature, SigningPrivate, SigningPublic,
    SYMMETRIC_KEY_BYTES,
};

use crate::canon;
use crate::error::SessionError;

// ---------------------------------------------------------------------------
// Public per-device configuration
// ---------------------------------------------------------------------------

/// Public description of one device belonging to a user.
///
/// Equality is by `device_id` alone; key rotation does not make a device a
/// different device.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserDeviceConfiguration {
    #[serde(rename = "a", with = "uuid::serde::compact")]
    pub device_id: Uuid,
    #[serde(rename = "b")]
    pub device_name: Option<String>,
    #[serde(rename = "c")]
    pub is_master: bool,
    #[serde(rename = "d", with = "serde_bytes")]
    pub signing_public: Vec<u8>,
    #[serde(rename = "e", with = "serde_bytes")]
    pub long_term_public: Vec<u8>,
    #[serde(rename = "f", with = "serde_bytes")]
    pub final_pqkem_public: Vec<u8>,
}

impl PartialEq for UserDeviceConfiguration {
    fn eq(&self, other: &Self) -> bool {
        self.device_id == other.device_id
    }
}

impl Eq for UserDeviceConfiguration {}

// ---------------------------------------------------------------------------
// Signed wrappers
// ---------------------------------------------------------------------------

/// A device configuration under the owner's signing key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedDeviceConfiguration {
    #[serde(rename = "a")]
    pub device: UserDeviceConfiguration,
    #[serde(rename = "b", with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl SignedDeviceConfiguration {
    /// Sign `device` under the owner's signing key.
    pub fn sign(device: UserDeviceConfiguration, key: &SigningPrivate) -> Self {
        let signature = key.sign(&canon::device_signing_bytes(&device)).to_bytes().to_vec();
        Self { device, signature }
    }

    /// Decode and verify in one step, yielding the embedded device.
    pub fn verify(&self, key: &SigningPublic) -> Result<UserDeviceConfiguration, SessionError> {
        let sig = Signature::from_bytes(&self.signature)
            .map_err(|_| SessionError::InvalidSignature)?;
        key.verify(&canon::device_signing_bytes(&self.device), &sig)?;
        Ok(self.device.clone())
    }
}

/// A one-time public key bound to a device under the owner's signing key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedOneTimeKey {
    #[serde(rename = "a", with = "uuid::serde::compact")]
    pub id: Uuid,
    #[serde(rename = "b", with = "uuid::serde::compact")]
    pub device_id: Uuid,
    #[serde(rename = "c", with = "serde_bytes")]
    pub key: Vec<u8>,
    #[serde(rename = "d", with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl SignedOneTimeKey {
    pub fn sign(id: Uuid, device_id: Uuid, key_bytes: Vec<u8>, key: &SigningPrivate) -> Self {
        let signature = key
            .sign(&canon::one_time_signing_bytes(id, device_id, &key_bytes))
            .to_bytes()
            .to_vec();
        Self {
            id,
            device_id,
            key: key_bytes,
            signature,
        }
    }

    /// Decode and verify in one step, yielding the raw public key bytes.
    pub fn verify(&self, key: &SigningPublic) -> Result<Vec<u8>, SessionError> {
        let sig = Signature::from_bytes(&self.signature)
            .map_err(|_| SessionError::InvalidSignature)?;
        key.verify(
            &canon::one_time_signing_bytes(self.id, self.device_id, &self.key),
            &sig,
        )?;
        Ok(self.key.clone())
    }
}

// ---------------------------------------------------------------------------
// Public per-user configuration
// ---------------------------------------------------------------------------

/// The authoritative public configuration of a user: signing key, signed
/// devices, and published one-time key bundles.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserConfiguration {
    #[serde(rename = "a", with = "serde_bytes")]
    pub signing_public: Vec<u8>,
    #[serde(rename = "b")]
    pub signed_devices: Vec<SignedDeviceConfiguration>,
    #[serde(rename = "c")]
    pub signed_one_time_classical: Vec<SignedOneTimeKey>,
    #[serde(rename = "d")]
    pub signed_one_time_pqkem: Vec<SignedOneTimeKey>,
}

impl UserConfiguration {
    pub fn signing_public(&self) -> Result<SigningPublic, SessionError> {
        SigningPublic::from_bytes(&self.signing_public)
            .map_err(|_| SessionError::ConfigurationError("malformed signing key".into()))
    }

    /// Verify every signed device entry. Any failure fails the whole set.
    pub fn verified_devices(&self) -> Result<Vec<UserDeviceConfiguration>, SessionError> {
        let key = self.signing_public()?;
        self.signed_devices.iter().map(|d| d.verify(&key)).collect()
    }

    pub fn find_one_time_classical(&self, id: Uuid) -> Option<&SignedOneTimeKey> {
        self.signed_one_time_classical.iter().find(|k| k.id == id)
    }

    pub fn find_one_time_pqkem(&self, id: Uuid) -> Option<&SignedOneTimeKey> {
        self.signed_one_time_pqkem.iter().find(|k| k.id == id)
    }

    pub fn first_one_time_classical_for(&self, device_id: Uuid) -> Option<&SignedOneTimeKey> {
        self.signed_one_time_classical
            .iter()
            .find(|k| k.device_id == device_id)
    }

    pub fn first_one_time_pqkem_for(&self, device_id: Uuid) -> Option<&SignedOneTimeKey> {
        self.signed_one_time_pqkem
            .iter()
            .find(|k| k.device_id == device_id)
    }
}

// ---------------------------------------------------------------------------
// Private device key material (local device only)
// ---------------------------------------------------------------------------

/// A one-time private key held until a peer claims its public half.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct OneTimePrivate {
    #[serde(rename = "a", with = "uuid::serde::compact")]
    #[zeroize(skip)]
    pub id: Uuid,
    #[serde(rename = "b", with = "serde_bytes")]
    pub key: Vec<u8>,
}

/// Every private key of the local device. Wiped on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct DeviceKeys {
    #[serde(rename = "a", with = "uuid::serde::compact")]
    #[zeroize(skip)]
    pub device_id: Uuid,
    #[serde(rename = "b", with = "serde_bytes")]
    pub signing_private: Vec<u8>,
    #[serde(rename = "c", with = "serde_bytes")]
    pub long_term_private: Vec<u8>,
    #[serde(rename = "d", with = "serde_bytes")]
    pub final_pqkem_private: Vec<u8>,
    #[serde(rename = "e", with = "uuid::serde::compact")]
    #[zeroize(skip)]
    pub final_pqkem_key_id: Uuid,
    #[serde(rename = "f")]
    pub one_time_classical_privates: Vec<OneTimePrivate>,
    #[serde(rename = "g")]
    pub one_time_pqkem_privates: Vec<OneTimePrivate>,
    #[serde(rename = "h", with = "chrono::serde::ts_milliseconds")]
    #[zeroize(skip)]
    pub rotate_keys_at: DateTime<Utc>,
}

impl DeviceKeys {
    pub fn signing_private(&self) -> Result<SigningPrivate, SessionError> {
        SigningPrivate::from_bytes(&self.signing_private)
            .map_err(|_| SessionError::SessionDecryptionError)
    }

    pub fn long_term_private(&self) -> Result<KemPrivate, SessionError> {
        KemPrivate::from_bytes(&self.long_term_private)
            .map_err(|_| SessionError::SessionDecryptionError)
    }

    pub fn final_pqkem_private(&self) -> Result<PqKemPrivate, SessionError> {
        PqKemPrivate::from_bytes(&self.final_pqkem_private)
            .map_err(|_| SessionError::SessionDecryptionError)
    }

    pub fn one_time_classical_count(&self) -> usize {
        self.one_time_classical_privates.len()
    }

    pub fn one_time_pqkem_count(&self) -> usize {
        self.one_time_pqkem_privates.len()
    }

    /// Remove and return a claimed one-time classical private.
    pub fn take_one_time_classical(&mut self, id: Uuid) -> Option<OneTimePrivate> {
        let pos = self
            .one_time_classical_privates
            .iter()
            .position(|k| k.id == id)?;
        Some(self.one_time_classical_privates.remove(pos))
    }

    /// Remove and return a claimed one-time PQ-KEM private.
    pub fn take_one_time_pqkem(&mut self, id: Uuid) -> Option<OneTimePrivate> {
        let pos = self
            .one_time_pqkem_privates
            .iter()
            .position(|k| k.id == id)?;
        Some(self.one_time_pqkem_privates.remove(pos))
    }
}

impl core::fmt::Debug for DeviceKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceKeys")
            .field("device_id", &self.device_id)
            .field("one_time_classical", &self.one_time_classical_privates.len())
            .field("one_time_pqkem", &self.one_time_pqkem_privates.len())
            .field("rotate_keys_at", &self.rotate_keys_at)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Session identity (local record of one remote device)
// ---------------------------------------------------------------------------

/// Sealed properties of a session identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentityProps {
    #[serde(rename = "a")]
    pub secret_name: String,
    #[serde(rename = "b", with = "uuid::serde::compact")]
    pub device_id: Uuid,
    #[serde(rename = "c")]
    pub session_context_id: i64,
    #[serde(rename = "d", with = "serde_bytes")]
    pub long_term_public: Vec<u8>,
    #[serde(rename = "e", with = "serde_bytes")]
    pub signing_public: Vec<u8>,
    #[serde(rename = "f", with = "serde_bytes")]
    pub pqkem_public: Vec<u8>,
    #[serde(rename = "g", with = "serde_bytes")]
    pub one_time_public: Option<Vec<u8>>,
    #[serde(rename = "h", with = "serde_bytes")]
    pub ratchet_state: Option<Vec<u8>>,
    #[serde(rename = "i")]
    pub device_name: String,
    #[serde(rename = "j")]
    pub is_master: bool,
}

/// One remote device's identity: the decoded props plus the sealed record
/// the store holds.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionIdentity {
    record: SecureRecord,
    props: IdentityProps,
}

impl SessionIdentity {
    /// Seal fresh props into a new record.
    pub fn create(
        props: IdentityProps,
        key: &[u8; SYMMETRIC_KEY_BYTES],
    ) -> Result<Self, SessionError> {
        let record = SecureRecord::new(Uuid::new_v4(), &props, key)?;
        Ok(Self { record, props })
    }

    /// Decode a record fetched from the store. `None` if the blob does not
    /// open under `key` (missing and tampered are indistinguishable).
    pub fn from_record(record: SecureRecord, key: &[u8; SYMMETRIC_KEY_BYTES]) -> Option<Self> {
        let props: IdentityProps = record.props(key)?;
        Some(Self { record, props })
    }

    pub fn id(&self) -> Uuid {
        self.record.id()
    }

    pub fn props(&self) -> &IdentityProps {
        &self.props
    }

    pub fn record(&self) -> &SecureRecord {
        &self.record
    }

    /// Replace the props and re-seal the record in place.
    pub fn update_props(
        &mut self,
        key: &[u8; SYMMETRIC_KEY_BYTES],
        props: IdentityProps,
    ) -> Result<(), SessionError> {
        self.props = self
            .record
            .update(key, &props)
            .ok_or(SessionError::SessionEncryptionError)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session context (singleton per user on this device)
// ---------------------------------------------------------------------------

/// Whether this device has completed registration with the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationState {
    #[serde(rename = "r")]
    Registered,
    #[serde(rename = "u")]
    Unregistered,
}

/// The local user as known to this device.
#[derive(Clone, Debug, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SessionUser {
    #[serde(rename = "a")]
    #[zeroize(skip)]
    pub secret_name: String,
    #[serde(rename = "b", with = "uuid::serde::compact")]
    #[zeroize(skip)]
    pub device_id: Uuid,
    #[serde(rename = "c")]
    pub device_keys: DeviceKeys,
}

/// Mutable root state for one user on this device. Persisted sealed under
/// the app-derived key; mutated only through the key lifecycle manager.
#[derive(Clone, Debug, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SessionContext {
    #[serde(rename = "a")]
    pub session_user: SessionUser,
    #[serde(rename = "b", with = "serde_bytes")]
    pub database_encryption_key: Vec<u8>,
    #[serde(rename = "c")]
    #[zeroize(skip)]
    pub session_context_id: i64,
    #[serde(rename = "d")]
    #[zeroize(skip)]
    pub active_user_configuration: UserConfiguration,
    #[serde(rename = "e")]
    #[zeroize(skip)]
    pub registration_state: RegistrationState,
}

impl SessionContext {
    pub fn secret_name(&self) -> &str {
        &self.session_user.secret_name
    }

    pub fn device_id(&self) -> Uuid {
        self.session_user.device_id
    }

    pub fn database_key(&self) -> Result<[u8; SYMMETRIC_KEY_BYTES], SessionError> {
        self.database_encryption_key
            .as_slice()
            .try_into()
            .map_err(|_| SessionError::SessionDecryptionError)
    }
}

// ---------------------------------------------------------------------------
// Transport exchange values
// ---------------------------------------------------------------------------

/// One-time key ids handed out by the transport (or a contact hint).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimeKeyHandles {
    #[serde(rename = "a")]
    pub classical_id: Option<Uuid>,
    #[serde(rename = "b")]
    pub pqkem_id: Option<Uuid>,
}

/// Payload for `publish_rotated_keys`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RotatedKeyBundle {
    /// The signing public the re-signed device verifies under.
    #[serde(rename = "a", with = "serde_bytes")]
    pub psk_data: Vec<u8>,
    #[serde(rename = "b")]
    pub signed_device: SignedDeviceConfiguration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_envelope::{
        gen_classical_kem_keypair, gen_pqkem_keypair, gen_signing_keypair,
    };

    fn device(signing_public: Vec<u8>) -> UserDeviceConfiguration {
        UserDeviceConfiguration {
            device_id: Uuid::new_v4(),
            device_name: Some("laptop".into()),
            is_master: true,
            signing_public,
            long_term_public: gen_classical_kem_keypair().1.to_bytes().to_vec(),
            final_pqkem_public: gen_pqkem_keypair().1.to_bytes(),
        }
    }

    #[test]
    fn device_equality_is_by_id() {
        let (_, pk) = gen_signing_keypair();
        let a = device(pk.to_bytes().to_vec());
        let mut b = a.clone();
        b.long_term_public = gen_classical_kem_keypair().1.to_bytes().to_vec();
        assert_eq!(a, b);
        let mut c = a.clone();
        c.device_id = Uuid::new_v4();
        assert_ne!(a, c);
    }

    #[test]
    fn signed_device_verifies_under_signer() {
        let (sk, pk) = gen_signing_keypair();
        let signed = SignedDeviceConfiguration::sign(device(pk.to_bytes().to_vec()), &sk);
        assert!(signed.verify(&pk).is_ok());
    }

    #[test]
    fn signed_device_rejects_other_key() {
        let (sk, pk) = gen_signing_keypair();
        let (_, other) = gen_signing_keypair();
        let signed = SignedDeviceConfiguration::sign(device(pk.to_bytes().to_vec()), &sk);
        assert_eq!(signed.verify(&other), Err(SessionError::InvalidSignature));
    }

    #[test]
    fn signed_device_rejects_mutation() {
        let (sk, pk) = gen_signing_keypair();
        let mut signed = SignedDeviceConfiguration::sign(device(pk.to_bytes().to_vec()), &sk);
        signed.device.long_term_public = gen_classical_kem_keypair().1.to_bytes().to_vec();
        assert_eq!(signed.verify(&pk), Err(SessionError::InvalidSignature));
    }

    #[test]
    fn one_time_key_roundtrip() {
        let (sk, pk) = gen_signing_keypair();
        let (_, otk) = gen_classical_kem_keypair();
        let signed = SignedOneTimeKey::sign(
            Uuid::new_v4(),
            Uuid::new_v4(),
            otk.to_bytes().to_vec(),
            &sk,
        );
        assert_eq!(signed.verify(&pk).unwrap(), otk.to_bytes().to_vec());
    }

    #[test]
    fn verified_devices_fails_closed() {
        let (sk, pk) = gen_signing_keypair();
        let good = SignedDeviceConfiguration::sign(device(pk.to_bytes().to_vec()), &sk);
        let mut bad = SignedDeviceConfiguration::sign(device(pk.to_bytes().to_vec()), &sk);
        bad.device.is_master = false;

        let config = UserConfiguration {
            signing_public: pk.to_bytes().to_vec(),
            signed_devices: vec![good, bad],
            signed_one_time_classical: vec![],
            signed_one_time_pqkem: vec![],
        };
        assert_eq!(
            config.verified_devices(),
            Err(SessionError::InvalidSignature)
        );
    }

    #[test]
    fn take_one_time_private_consumes_exactly_once() {
        let id = Uuid::new_v4();
        let mut keys = DeviceKeys {
            device_id: Uuid::new_v4(),
            signing_private: vec![0; 32],
            long_term_private: vec![0; 32],
            final_pqkem_private: vec![0; 32],
            final_pqkem_key_id: Uuid::new_v4(),
            one_time_classical_privates: vec![OneTimePrivate {
                id,
                key: vec![1, 2, 3],
            }],
            one_time_pqkem_privates: vec![],
            rotate_keys_at: Utc::now(),
        };
        assert!(keys.take_one_time_classical(id).is_some());
        assert!(keys.take_one_time_classical(id).is_none());
        assert_eq!(keys.one_time_classical_count(), 0);
    }
}
