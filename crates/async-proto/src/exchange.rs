//! Wire format for the pre-key exchange packet (§4.5).
//!
//! Layout (big-endian):
//!
//! ```text
//! offset  size  field
//!  0      4    magic "PKEY"
//!  4      1    version = 1
//!  5     32    sender identity public (signing key)
//! 37     32    sender ephemeral agreement public
//! 69      2    key_count N  (1 <= N <= 255)
//! 71   N*32    N one-time public keys
//!  *     64    Ed25519 signature over all prior bytes
//! ```
//!
//! This crate only handles byte layout; it has no cryptographic
//! dependencies. Signing and signature verification are the responsibility
//! of the crate that owns the identity keys, over the signed region this
//! module exposes.

use bytes::BufMut;

use crate::errors::{ProtocolError, Result};

/// Magic prefix identifying a pre-key exchange packet.
pub const MAGIC: [u8; 4] = *b"PKEY";

/// Wire format version.
pub const VERSION: u8 = 1;

/// Length of the fixed header preceding the one-time key list.
pub const HEADER_LEN: usize = 4 + 1 + 32 + 32 + 2;

/// Length in bytes of a single public key.
pub const KEY_LEN: usize = 32;

/// Length in bytes of the trailing Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Maximum number of one-time keys a single packet may carry; bounded by
/// the 2-byte `key_count` field's intended range in §4.5.
pub const MAX_KEY_COUNT: usize = 255;

/// The unsigned body of a pre-key exchange packet, ready to be signed.
///
/// Built by [`encode_unsigned`]; sign the returned bytes and pass the
/// signature to [`append_signature`] to produce the full wire packet.
#[must_use]
pub fn encode_unsigned(
    sender_identity_signing: &[u8; 32],
    sender_ephemeral_agreement: &[u8; 32],
    one_time_keys: &[[u8; 32]],
) -> Result<Vec<u8>> {
    if one_time_keys.is_empty() || one_time_keys.len() > MAX_KEY_COUNT {
        return Err(ProtocolError::KeyCountOutOfRange {
            count: u32::try_from(one_time_keys.len()).unwrap_or(u32::MAX),
        });
    }

    let mut out = Vec::with_capacity(HEADER_LEN + one_time_keys.len() * KEY_LEN);
    out.put_slice(&MAGIC);
    out.put_u8(VERSION);
    out.put_slice(sender_identity_signing);
    out.put_slice(sender_ephemeral_agreement);
    #[allow(clippy::cast_possible_truncation)]
    out.put_u16(one_time_keys.len() as u16);
    for key in one_time_keys {
        out.put_slice(key);
    }

    Ok(out)
}

/// Append a 64-byte Ed25519 signature to an unsigned body, producing the
/// complete wire packet.
#[must_use]
pub fn append_signature(mut unsigned: Vec<u8>, signature: &[u8; SIGNATURE_LEN]) -> Vec<u8> {
    unsigned.put_slice(signature);
    unsigned
}

/// A pre-key exchange packet split into its constituent fields, with the
/// signed region and signature separated out for the caller to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedExchange {
    /// Sender's Ed25519 identity signing public key.
    pub sender_identity_signing: [u8; 32],
    /// Sender's ephemeral X25519 agreement public key.
    pub sender_ephemeral_agreement: [u8; 32],
    /// One-time agreement public keys offered by the sender.
    pub one_time_keys: Vec<[u8; 32]>,
    /// The bytes that were signed (everything before the signature).
    pub signed_bytes: Vec<u8>,
    /// The trailing 64-byte Ed25519 signature, to be verified by the
    /// caller against `sender_identity_signing`.
    pub signature: [u8; SIGNATURE_LEN],
}

/// Parse a pre-key exchange packet's structure, without verifying its
/// signature.
///
/// # Errors
///
/// Returns [`ProtocolError::Truncated`] if `bytes` is shorter than the
/// minimum packet size, [`ProtocolError::InvalidMagic`] /
/// [`ProtocolError::UnsupportedVersion`] if the header does not match,
/// [`ProtocolError::KeyCountOutOfRange`] if `key_count` is zero, and
/// [`ProtocolError::LengthMismatch`] if the declared key count does not
/// match the packet's actual length.
pub fn parse(bytes: &[u8]) -> Result<ParsedExchange> {
    let min_len = HEADER_LEN + KEY_LEN + SIGNATURE_LEN;
    if bytes.len() < min_len {
        return Err(ProtocolError::Truncated { expected: min_len, actual: bytes.len() });
    }

    if bytes[0..4] != MAGIC {
        return Err(ProtocolError::InvalidMagic);
    }
    if bytes[4] != VERSION {
        return Err(ProtocolError::UnsupportedVersion { version: bytes[4] });
    }

    let mut sender_identity_signing = [0u8; 32];
    sender_identity_signing.copy_from_slice(&bytes[5..37]);

    let mut sender_ephemeral_agreement = [0u8; 32];
    sender_ephemeral_agreement.copy_from_slice(&bytes[37..69]);

    let key_count = u16::from_be_bytes([bytes[69], bytes[70]]) as usize;
    if key_count == 0 || key_count > MAX_KEY_COUNT {
        return Err(ProtocolError::KeyCountOutOfRange { count: key_count as u32 });
    }

    let expected_total = HEADER_LEN + key_count * KEY_LEN + SIGNATURE_LEN;
    if bytes.len() != expected_total {
        return Err(ProtocolError::LengthMismatch { expected: expected_total, actual: bytes.len() });
    }

    let mut one_time_keys = Vec::with_capacity(key_count);
    let mut offset = HEADER_LEN;
    for _ in 0..key_count {
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[offset..offset + KEY_LEN]);
        one_time_keys.push(key);
        offset += KEY_LEN;
    }

    let signed_bytes = bytes[..offset].to_vec();

    let mut signature = [0u8; SIGNATURE_LEN];
    signature.copy_from_slice(&bytes[offset..offset + SIGNATURE_LEN]);

    Ok(ParsedExchange {
        sender_identity_signing,
        sender_ephemeral_agreement,
        one_time_keys,
        signed_bytes,
        signature,
    })
}
