//! Unified error types for the envelope layer.
//!
//! Decryption failures are a single opaque unit type: wrong key, tampered
//! ciphertext, and malformed input are indistinguishable to the caller
//! (oracle discipline). Signature verification failure is its own type and
//! is never folded into decode failure.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionError;

impl fmt::Display for EncryptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "encryption failed")
    }
}

impl std::error::Error for EncryptionError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptionError;

impl fmt::Display for DecryptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decryption failed")
    }
}

impl std::error::Error for DecryptionError {}

/// Normalize encrypt-path errors seen during re-seal into decrypt errors.
impl From<EncryptionError> for DecryptionError {
    fn from(_: EncryptionError) -> Self {
        DecryptionError
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureError;

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signature verification failed")
    }
}

impl std::error::Error for SignatureError {}

/// Password KDF failures. Salt problems stay distinguishable so callers can
/// surface them as configuration faults rather than crypto faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfError {
    /// The salt is unusable (wrong length).
    Salt,
    /// Key derivation itself failed.
    Derive,
}

impl fmt::Display for KdfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KdfError::Salt => write!(f, "invalid salt"),
            KdfError::Derive => write!(f, "key derivation failed"),
        }
    }
}

impl std::error::Error for KdfError {}
