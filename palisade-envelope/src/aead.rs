//! AEAD: AES-256-GCM with the nonce carried in the blob.
//!
//! Blob layout: nonce[12] || aead_ct[16+]

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use getrandom::getrandom;

use crate::error::{DecryptionError, EncryptionError};

pub const SYMMETRIC_KEY_BYTES: usize = 32;
pub const NONCE_BYTES: usize = 12;
pub const AEAD_TAG_BYTES: usize = 16;

/// Minimum sealed blob size: nonce + tag.
pub const MIN_SEALED_BYTES: usize = NONCE_BYTES + AEAD_TAG_BYTES;

/// Seal `plaintext` under `key` with a fresh random nonce.
pub fn aead_seal(
    key: &[u8; SYMMETRIC_KEY_BYTES],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let mut nonce = [0u8; NONCE_BYTES];
    getrandom(&mut nonce).map_err(|_| EncryptionError)?;

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError)?;
    let n = Nonce::from_slice(&nonce);
    let payload = Payload { msg: plaintext, aad };
    let ct = cipher.encrypt(n, payload).map_err(|_| EncryptionError)?;

    let mut out = Vec::with_capacity(NONCE_BYTES + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Open a blob produced by [`aead_seal`]. Any failure is [`DecryptionError`].
pub fn aead_open(
    key: &[u8; SYMMETRIC_KEY_BYTES],
    sealed: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, DecryptionError> {
    if sealed.len() < MIN_SEALED_BYTES {
        return Err(DecryptionError);
    }
    let (nonce, ct) = sealed.split_at(NONCE_BYTES);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| DecryptionError)?;
    let n = Nonce::from_slice(nonce);
    let payload = Payload { msg: ct, aad };
    cipher.decrypt(n, payload).map_err(|_| DecryptionError)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; SYMMETRIC_KEY_BYTES] {
        let mut k = [0u8; SYMMETRIC_KEY_BYTES];
        getrandom(&mut k).unwrap();
        k
    }

    #[test]
    fn roundtrip() {
        let k = key();
        let sealed = aead_seal(&k, b"secret", b"aad").unwrap();
        assert_eq!(aead_open(&k, &sealed, b"aad").unwrap(), b"secret");
    }

    #[test]
    fn roundtrip_empty_plaintext() {
        let k = key();
        let sealed = aead_seal(&k, b"", b"aad").unwrap();
        assert_eq!(aead_open(&k, &sealed, b"aad").unwrap(), b"");
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = aead_seal(&key(), b"secret", b"aad").unwrap();
        assert_eq!(aead_open(&key(), &sealed, b"aad"), Err(DecryptionError));
    }

    #[test]
    fn wrong_aad_fails() {
        let k = key();
        let sealed = aead_seal(&k, b"secret", b"good").unwrap();
        assert_eq!(aead_open(&k, &sealed, b"bad"), Err(DecryptionError));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let k = key();
        let mut sealed = aead_seal(&k, b"secret", b"aad").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(aead_open(&k, &sealed, b"aad"), Err(DecryptionError));
    }

    #[test]
    fn tampered_nonce_fails() {
        let k = key();
        let mut sealed = aead_seal(&k, b"secret", b"aad").unwrap();
        sealed[0] ^= 0x01;
        assert_eq!(aead_open(&k, &sealed, b"aad"), Err(DecryptionError));
    }

    #[test]
    fn short_blob_fails() {
        assert_eq!(
            aead_open(&key(), &[0u8; MIN_SEALED_BYTES - 1], b""),
            Err(DecryptionError)
        );
    }
}
