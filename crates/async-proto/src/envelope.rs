//! Wire format for the obfuscated envelope stored and returned by untrusted
//! storage nodes (§6).
//!
//! Layout (big-endian):
//!
//! ```text
//! offset  size  field
//!  0      32    recipient_pseudonym
//! 32      32    sender_pseudonym
//! 64       8    epoch
//! 72      24    nonce
//! 96       1    message_type
//! 97       4    ciphertext_len
//! 101      *    ciphertext
//! ```
//!
//! Storage nodes only ever see these opaque fields; `stored_at` and `ttl`
//! are bookkeeping kept server-side and are not part of the wire shape.

#![allow(clippy::expect_used, reason = "slice lengths are bounds-checked immediately above")]

use bytes::{BufMut, Bytes};

use crate::errors::{ProtocolError, Result};

/// Maximum ciphertext length accepted, matching the padded-plaintext ceiling
/// plus AEAD overhead with generous headroom.
pub const MAX_CIPHERTEXT_SIZE: usize = 1 << 20;

const FIXED_LEN: usize = 32 + 32 + 8 + 24 + 1 + 4;

/// The opaque, pseudonymized envelope exchanged with storage nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObfuscatedEnvelope {
    /// Epoch-scoped recipient pseudonym.
    pub recipient_pseudonym: [u8; 32],
    /// Epoch-scoped sender pseudonym.
    pub sender_pseudonym: [u8; 32],
    /// Epoch this envelope was sealed under.
    pub epoch: u64,
    /// XChaCha20 nonce.
    pub nonce: [u8; 24],
    /// Application-defined message type tag, carried unencrypted so storage
    /// nodes could in principle prioritize delivery without decrypting
    /// (unused by the reference implementation, but part of the wire
    /// contract).
    pub message_type: u8,
    /// AEAD ciphertext of the padded plaintext.
    pub ciphertext: Bytes,
}

impl ObfuscatedEnvelope {
    /// Encode this envelope into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] if the ciphertext exceeds
    /// [`MAX_CIPHERTEXT_SIZE`].
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.ciphertext.len() > MAX_CIPHERTEXT_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.ciphertext.len(),
                max: MAX_CIPHERTEXT_SIZE,
            });
        }

        dst.put_slice(&self.recipient_pseudonym);
        dst.put_slice(&self.sender_pseudonym);
        dst.put_u64(self.epoch);
        dst.put_slice(&self.nonce);
        dst.put_u8(self.message_type);
        #[allow(clippy::cast_possible_truncation)]
        dst.put_u32(self.ciphertext.len() as u32);
        dst.put_slice(&self.ciphertext);

        Ok(())
    }

    /// Encode into a freshly allocated buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FIXED_LEN + self.ciphertext.len());
        self.encode(&mut out).expect("caller-controlled ciphertext length already validated");
        out
    }

    /// Decode an envelope from its wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] if `bytes` is shorter than the
    /// fixed header, and [`ProtocolError::LengthMismatch`] if the declared
    /// ciphertext length does not match the remaining bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FIXED_LEN {
            return Err(ProtocolError::Truncated { expected: FIXED_LEN, actual: bytes.len() });
        }

        let mut recipient_pseudonym = [0u8; 32];
        recipient_pseudonym.copy_from_slice(&bytes[0..32]);

        let mut sender_pseudonym = [0u8; 32];
        sender_pseudonym.copy_from_slice(&bytes[32..64]);

        let epoch = u64::from_be_bytes(bytes[64..72].try_into().expect("8-byte slice"));

        let mut nonce = [0u8; 24];
        nonce.copy_from_slice(&bytes[72..96]);

        let message_type = bytes[96];

        let ciphertext_len =
            u32::from_be_bytes(bytes[97..101].try_into().expect("4-byte slice")) as usize;

        if ciphertext_len > MAX_CIPHERTEXT_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: ciphertext_len,
                max: MAX_CIPHERTEXT_SIZE,
            });
        }

        let remaining = bytes.len() - FIXED_LEN;
        if remaining != ciphertext_len {
            return Err(ProtocolError::LengthMismatch { expected: ciphertext_len, actual: remaining });
        }

        let ciphertext = Bytes::copy_from_slice(&bytes[FIXED_LEN..]);

        Ok(Self {
            recipient_pseudonym,
            sender_pseudonym,
            epoch,
            nonce,
            message_type,
            ciphertext,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sample() -> ObfuscatedEnvelope {
        ObfuscatedEnvelope {
            recipient_pseudonym: [1u8; 32],
            sender_pseudonym: [2u8; 32],
            epoch: 42,
            nonce: [3u8; 24],
            message_type: 7,
            ciphertext: Bytes::from_static(b"sealed bytes"),
        }
    }

    #[test]
    fn round_trip() {
        let envelope = sample();
        let bytes = envelope.to_bytes();
        let decoded = ObfuscatedEnvelope::decode(&bytes).unwrap();
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn rejects_truncated_header() {
        let bytes = vec![0u8; FIXED_LEN - 1];
        assert_eq!(
            ObfuscatedEnvelope::decode(&bytes),
            Err(ProtocolError::Truncated { expected: FIXED_LEN, actual: FIXED_LEN - 1 })
        );
    }

    #[test]
    fn rejects_ciphertext_length_mismatch() {
        let envelope = sample();
        let mut bytes = envelope.to_bytes();
        bytes.push(0xFF); // trailing garbage byte beyond declared length
        assert!(matches!(
            ObfuscatedEnvelope::decode(&bytes),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn rejects_oversized_declared_length() {
        let mut bytes = vec![0u8; FIXED_LEN];
        bytes[97..101].copy_from_slice(&(MAX_CIPHERTEXT_SIZE as u32 + 1).to_be_bytes());
        assert!(matches!(
            ObfuscatedEnvelope::decode(&bytes),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    proptest! {
        #[test]
        fn round_trip_arbitrary_ciphertext(ciphertext in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let envelope = ObfuscatedEnvelope {
                recipient_pseudonym: [9u8; 32],
                sender_pseudonym: [8u8; 32],
                epoch: 7,
                nonce: [1u8; 24],
                message_type: 1,
                ciphertext: Bytes::from(ciphertext),
            };
            let bytes = envelope.to_bytes();
            let decoded = ObfuscatedEnvelope::decode(&bytes).unwrap();
            prop_assert_eq!(envelope, decoded);
        }
    }
}
