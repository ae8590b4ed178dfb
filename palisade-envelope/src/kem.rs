//! KEM key material: classical X25519 and post-quantum ML-KEM-1024.
//!
//! The facade only generates and serializes key material; encapsulation is
//! driven by the ratchet layer above this crate.
//!
//! Key serialization:
//!   KemPublic      = x25519_pk[32]
//!   KemPrivate     = x25519_sk[32]
//!   PqKemPublic    = mlkem1024_ek[1568]      (raw encapsulation key)
//!   PqKemPrivate   = mlkem1024_dk[3168]      (encoded decapsulation key)

use ml_kem::{EncodedSizeUser, KemCore, MlKem1024, MlKem1024Params};
use rand_core::OsRng;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::error::DecryptionError;

type Ek = ml_kem::kem::EncapsulationKey<MlKem1024Params>;
type Dk = ml_kem::kem::DecapsulationKey<MlKem1024Params>;

pub const KEM_PUBLIC_BYTES: usize = 32;
pub const KEM_PRIVATE_BYTES: usize = 32;
pub const PQKEM_PUBLIC_BYTES: usize = 1568;
pub const PQKEM_PRIVATE_BYTES: usize = 3168;

// ---------------------------------------------------------------------------
// Classical (X25519)
// ---------------------------------------------------------------------------

/// X25519 public key.
#[derive(Clone, PartialEq, Eq)]
pub struct KemPublic {
    inner: X25519PublicKey,
}

impl KemPublic {
    pub fn to_bytes(&self) -> [u8; KEM_PUBLIC_BYTES] {
        *self.inner.as_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecryptionError> {
        let arr: [u8; KEM_PUBLIC_BYTES] = bytes.try_into().map_err(|_| DecryptionError)?;
        Ok(Self {
            inner: X25519PublicKey::from(arr),
        })
    }
}

impl core::fmt::Debug for KemPublic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "KemPublic({:02x?}…)", &self.to_bytes()[..4])
    }
}

/// X25519 static secret.
#[derive(Clone)]
pub struct KemPrivate {
    inner: StaticSecret,
}

impl KemPrivate {
    pub fn to_bytes(&self) -> [u8; KEM_PRIVATE_BYTES] {
        self.inner.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecryptionError> {
        let arr: [u8; KEM_PRIVATE_BYTES] = bytes.try_into().map_err(|_| DecryptionError)?;
        Ok(Self {
            inner: StaticSecret::from(arr),
        })
    }

    pub fn public(&self) -> KemPublic {
        KemPublic {
            inner: X25519PublicKey::from(&self.inner),
        }
    }
}

/// Generate a fresh X25519 keypair.
pub fn gen_classical_kem_keypair() -> (KemPrivate, KemPublic) {
    let sk = StaticSecret::random_from_rng(OsRng);
    let pk = X25519PublicKey::from(&sk);
    (KemPrivate { inner: sk }, KemPublic { inner: pk })
}

// ---------------------------------------------------------------------------
// Post-quantum (ML-KEM-1024)
// ---------------------------------------------------------------------------

/// ML-KEM-1024 encapsulation key (raw bytes on the wire).
#[derive(Clone)]
pub struct PqKemPublic {
    inner: Ek,
}

impl PqKemPublic {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.as_bytes().as_slice().to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecryptionError> {
        let arr: [u8; PQKEM_PUBLIC_BYTES] = bytes.try_into().map_err(|_| DecryptionError)?;
        Ok(Self {
            inner: Ek::from_bytes(&arr.into()),
        })
    }
}

impl PartialEq for PqKemPublic {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PqKemPublic {}

impl core::fmt::Debug for PqKemPublic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PqKemPublic({:02x?}…)", &self.to_bytes()[..4])
    }
}

/// ML-KEM-1024 decapsulation key (held in its encoded form).
pub struct PqKemPrivate {
    inner: Dk,
}

impl PqKemPrivate {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.as_bytes().as_slice().to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecryptionError> {
        let arr: [u8; PQKEM_PRIVATE_BYTES] = bytes.try_into().map_err(|_| DecryptionError)?;
        Ok(Self {
            inner: Dk::from_bytes(&arr.into()),
        })
    }
}

/// Generate a fresh ML-KEM-1024 keypair: (encoded private, raw public).
pub fn gen_pqkem_keypair() -> (PqKemPrivate, PqKemPublic) {
    let (dk, ek) = MlKem1024::generate(&mut OsRng);
    (PqKemPrivate { inner: dk }, PqKemPublic { inner: ek })
}
