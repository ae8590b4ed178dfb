//! Classical signatures: Ed25519.
//!
//! Key serialization:
//!   SigningPublic   = ed25519 verifying key[32]
//!   SigningPrivate  = ed25519 seed[32]
//!   Signature       = ed25519 signature[64]

use ed25519_dalek::{Signer, Verifier};
use rand_core::OsRng;
use zeroize::Zeroize;

use crate::error::{DecryptionError, SignatureError};

pub const SIGNING_PUBLIC_BYTES: usize = 32;
pub const SIGNING_PRIVATE_BYTES: usize = 32;
pub const SIGNATURE_BYTES: usize = 64;

// ---------------------------------------------------------------------------
// Public key
// ---------------------------------------------------------------------------

/// Ed25519 verifying key.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningPublic {
    inner: ed25519_dalek::VerifyingKey,
}

impl SigningPublic {
    pub fn to_bytes(&self) -> [u8; SIGNING_PUBLIC_BYTES] {
        self.inner.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecryptionError> {
        let arr: [u8; SIGNING_PUBLIC_BYTES] =
            bytes.try_into().map_err(|_| DecryptionError)?;
        let inner =
            ed25519_dalek::VerifyingKey::from_bytes(&arr).map_err(|_| DecryptionError)?;
        Ok(Self { inner })
    }

    /// Verify `sig` over `message`. Failure is a [`SignatureError`], never a
    /// decode error.
    pub fn verify(&self, message: &[u8], sig: &Signature) -> Result<(), SignatureError> {
        self.inner
            .verify(message, &sig.inner)
            .map_err(|_| SignatureError)
    }
}

impl core::fmt::Debug for SigningPublic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SigningPublic({:02x?}…)", &self.to_bytes()[..4])
    }
}

// ---------------------------------------------------------------------------
// Private key
// ---------------------------------------------------------------------------

/// Ed25519 signing key. Seed bytes are wiped on drop.
#[derive(Clone)]
pub struct SigningPrivate {
    inner: ed25519_dalek::SigningKey,
}

impl SigningPrivate {
    pub fn to_bytes(&self) -> [u8; SIGNING_PRIVATE_BYTES] {
        self.inner.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecryptionError> {
        let mut arr: [u8; SIGNING_PRIVATE_BYTES] =
            bytes.try_into().map_err(|_| DecryptionError)?;
        let inner = ed25519_dalek::SigningKey::from_bytes(&arr);
        arr.zeroize();
        Ok(Self { inner })
    }

    pub fn public(&self) -> SigningPublic {
        SigningPublic {
            inner: self.inner.verifying_key(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            inner: self.inner.sign(message),
        }
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// Detached Ed25519 signature.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; SIGNATURE_BYTES] {
        self.inner.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecryptionError> {
        let arr: [u8; SIGNATURE_BYTES] = bytes.try_into().map_err(|_| DecryptionError)?;
        Ok(Self {
            inner: ed25519_dalek::Signature::from_bytes(&arr),
        })
    }
}

impl core::fmt::Debug for Signature {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Signature({:02x?}…)", &self.to_bytes()[..4])
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Generate a fresh Ed25519 keypair.
pub fn gen_signing_keypair() -> (SigningPrivate, SigningPublic) {
    let sk = ed25519_dalek::SigningKey::generate(&mut OsRng);
    let pk = sk.verifying_key();
    (
        SigningPrivate { inner: sk },
        SigningPublic { inner: pk },
    )
}
