//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors produced by the crypto primitives in this crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD encryption failed (should not happen with valid inputs).
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD authentication tag did not verify, or the ciphertext was
    /// otherwise invalid.
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Short diagnostic, never includes key material.
        reason: String,
    },

    /// Ed25519 signature did not verify.
    #[error("signature verification failed")]
    InvalidSignature,

    /// A key supplied to a primitive had the wrong length or was otherwise
    /// malformed.
    #[error("invalid key material: {reason}")]
    InvalidKey {
        /// Short diagnostic.
        reason: String,
    },

    /// The epoch manager was constructed with a non-positive duration.
    #[error("invalid epoch duration")]
    InvalidEpochDuration,

    /// No envelope pseudonym in the valid window matched ours.
    #[error("envelope is not addressed to us")]
    NotForUs,
}
