//! Key derivation.
//!
//! Two layers:
//!   master = Argon2id(password, salt) → 32 bytes  (app symmetric key)
//!   record = HKDF-SHA256(master, info = PROTOCOL_ID || b"|rec|" || id) → 32 bytes
//!
//! The info prefix is a frozen wire contract: changing it orphans every
//! sealed record in existing stores.

use argon2::Argon2;
use hkdf::Hkdf;
use sha2::Sha256;

use crate::aead::SYMMETRIC_KEY_BYTES;
use crate::error::KdfError;

/// Protocol identifier for KDF domain separation.
pub const PROTOCOL_ID: &[u8] = b"palisade-env-v1";

/// Recommended salt length for [`derive_master_key`].
pub const SALT_BYTES: usize = 16;

/// Derive the application symmetric key from a password. Argon2id with the
/// crate's default cost parameters; deliberately slow.
pub fn derive_master_key(
    password: &[u8],
    salt: &[u8],
) -> Result<[u8; SYMMETRIC_KEY_BYTES], KdfError> {
    let mut out = [0u8; SYMMETRIC_KEY_BYTES];
    Argon2::default()
        .hash_password_into(password, salt, &mut out)
        .map_err(|e| match e {
            argon2::Error::SaltTooShort | argon2::Error::SaltTooLong => KdfError::Salt,
            _ => KdfError::Derive,
        })?;
    Ok(out)
}

/// Derive a per-record sealing key from a master key and a record-scoped
/// info suffix (the record id bytes).
pub fn derive_record_key(
    master: &[u8; SYMMETRIC_KEY_BYTES],
    id: &[u8],
) -> Result<[u8; SYMMETRIC_KEY_BYTES], KdfError> {
    let mut info = Vec::with_capacity(PROTOCOL_ID.len() + 6 + id.len());
    info.extend_from_slice(PROTOCOL_ID);
    info.extend_from_slice(b"|rec|");
    info.extend_from_slice(id);

    let hk = Hkdf::<Sha256>::new(None, master);
    let mut out = [0u8; SYMMETRIC_KEY_BYTES];
    hk.expand(&info, &mut out).map_err(|_| KdfError::Derive)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_key_is_deterministic() {
        let a = derive_master_key(b"password", &[7u8; SALT_BYTES]).unwrap();
        let b = derive_master_key(b"password", &[7u8; SALT_BYTES]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn master_key_varies_with_salt() {
        let a = derive_master_key(b"password", &[1u8; SALT_BYTES]).unwrap();
        let b = derive_master_key(b"password", &[2u8; SALT_BYTES]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn short_salt_is_salt_error() {
        assert_eq!(
            derive_master_key(b"password", &[0u8; 4]),
            Err(KdfError::Salt)
        );
    }

    #[test]
    fn record_keys_are_scoped_by_id() {
        let master = [9u8; SYMMETRIC_KEY_BYTES];
        let a = derive_record_key(&master, b"id-a").unwrap();
        let b = derive_record_key(&master, b"id-b").unwrap();
        assert_ne!(a, b);
    }
}
