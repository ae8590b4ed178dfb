//! Human-verifiable fingerprints for out-of-band identity checks.
//!
//! After an emergency key rotation, peers can no longer trust a signing key
//! they verified before; the only recovery is comparing fingerprints over a
//! side channel. Algorithm:
//!
//! 1. Form `name_bytes || signing_public[32]` for both parties.
//! 2. Sort the two blobs lexicographically and concatenate.
//! 3. SHA-512 the result.
//! 4. Render the first 30 bytes as 10 groups of 5 decimal digits.
//!
//! Both parties compute the same 60-digit string regardless of direction.

use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

use crate::sign::SigningPublic;

const FINGERPRINT_GROUPS: usize = 10;
const BYTES_PER_GROUP: usize = 3;

/// Compute the shared fingerprint for two `(name, signing key)` identities.
pub fn fingerprint(
    local_name: &str,
    local_signing: &SigningPublic,
    remote_name: &str,
    remote_signing: &SigningPublic,
) -> String {
    let mut a = local_name.as_bytes().to_vec();
    a.extend_from_slice(&local_signing.to_bytes());
    let mut b = remote_name.as_bytes().to_vec();
    b.extend_from_slice(&remote_signing.to_bytes());
    if b < a {
        core::mem::swap(&mut a, &mut b);
    }

    let mut hasher = Sha512::new();
    hasher.update(&a);
    hasher.update(&b);
    let digest = hasher.finalize();

    let mut out = String::with_capacity(FINGERPRINT_GROUPS * 6);
    for group in 0..FINGERPRINT_GROUPS {
        let chunk = &digest[group * BYTES_PER_GROUP..(group + 1) * BYTES_PER_GROUP];
        let n = u32::from_be_bytes([0, chunk[0], chunk[1], chunk[2]]) % 100_000;
        if group > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:05}", n));
    }
    out
}

/// Constant-time comparison of two rendered fingerprints.
pub fn fingerprints_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
