//! Canonical byte layouts for signature coverage and transport notices.
//!
//! These encodings are deliberately independent of serde: a signature must
//! never move because a serde model was refactored. Layouts (all lengths
//! big-endian u16, UUIDs 16-byte big-endian):
//!
//!   device  = b"palisade|dev|v1" || device_id[16] || is_master[1]
//!             || len || signing_public || len || long_term_public
//!             || len || final_pqkem_public
//!             || name_flag[1] || (len || device_name_utf8)?
//!
//!   one-time = b"palisade|otk|v1" || id[16] || device_id[16] || len || key
//!
//!   notice   = b"palisade|ntf|v1" || flags[1] || curve_id[16]? || pqkem_id[16]?
//!              (flags bit 0: curve id present, bit 1: pqkem id present)

use uuid::Uuid;

use crate::error::SessionError;
use crate::types::{OneTimeKeyHandles, UserDeviceConfiguration};

pub const DEVICE_PREFIX: &[u8] = b"palisade|dev|v1";
pub const ONE_TIME_PREFIX: &[u8] = b"palisade|otk|v1";
pub const NOTICE_PREFIX: &[u8] = b"palisade|ntf|v1";

const NOTICE_FLAG_CURVE: u8 = 0x01;
const NOTICE_FLAG_PQKEM: u8 = 0x02;

fn push_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u16).to_be_bytes());
    out.extend_from_slice(field);
}

/// Signature coverage for a device configuration.
pub fn device_signing_bytes(device: &UserDeviceConfiguration) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        DEVICE_PREFIX.len()
            + 16
            + 1
            + 6
            + device.signing_public.len()
            + device.long_term_public.len()
            + device.final_pqkem_public.len()
            + 3
            + device.device_name.as_ref().map_or(0, |n| n.len()),
    );
    out.extend_from_slice(DEVICE_PREFIX);
    out.extend_from_slice(device.device_id.as_bytes());
    out.push(device.is_master as u8);
    push_field(&mut out, &device.signing_public);
    push_field(&mut out, &device.long_term_public);
    push_field(&mut out, &device.final_pqkem_public);
    match &device.device_name {
        Some(name) => {
            out.push(0x01);
            push_field(&mut out, name.as_bytes());
        }
        None => out.push(0x00),
    }
    out
}

/// Signature coverage for a one-time key entry.
pub fn one_time_signing_bytes(id: Uuid, device_id: Uuid, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ONE_TIME_PREFIX.len() + 34 + key.len());
    out.extend_from_slice(ONE_TIME_PREFIX);
    out.extend_from_slice(id.as_bytes());
    out.extend_from_slice(device_id.as_bytes());
    push_field(&mut out, key);
    out
}

/// Encode the identity-creation notice carried in a zero-text message's
/// transport info: which one-time key ids the sender bound.
pub fn encode_identity_notice(handles: &OneTimeKeyHandles) -> Vec<u8> {
    let mut flags = 0u8;
    if handles.classical_id.is_some() {
        flags |= NOTICE_FLAG_CURVE;
    }
    if handles.pqkem_id.is_some() {
        flags |= NOTICE_FLAG_PQKEM;
    }

    let mut out = Vec::with_capacity(NOTICE_PREFIX.len() + 33);
    out.extend_from_slice(NOTICE_PREFIX);
    out.push(flags);
    if let Some(id) = handles.classical_id {
        out.extend_from_slice(id.as_bytes());
    }
    if let Some(id) = handles.pqkem_id {
        out.extend_from_slice(id.as_bytes());
    }
    out
}

/// Strict decode of an identity-creation notice.
pub fn decode_identity_notice(bytes: &[u8]) -> Result<OneTimeKeyHandles, SessionError> {
    let malformed = || SessionError::ConfigurationError("malformed identity notice".into());

    let rest = bytes.strip_prefix(NOTICE_PREFIX).ok_or_else(malformed)?;
    let (&flags, mut rest) = rest.split_first().ok_or_else(malformed)?;
    if flags & !(NOTICE_FLAG_CURVE | NOTICE_FLAG_PQKEM) != 0 {
        return Err(malformed());
    }

    let mut read_id = |present: bool| -> Result<Option<Uuid>, SessionError> {
        if !present {
            return Ok(None);
        }
        if rest.len() < 16 {
            return Err(malformed());
        }
        let (head, tail) = rest.split_at(16);
        rest = tail;
        let arr: [u8; 16] = head.try_into().map_err(|_| malformed())?;
        Ok(Some(Uuid::from_bytes(arr)))
    };

    let classical_id = read_id(flags & NOTICE_FLAG_CURVE != 0)?;
    let pqkem_id = read_id(flags & NOTICE_FLAG_PQKEM != 0)?;
    if !rest.is_empty() {
        return Err(malformed());
    }

    Ok(OneTimeKeyHandles {
        classical_id,
        pqkem_id,
    })
}
