//! Errors produced while framing and parsing wire structures.

use thiserror::Error;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding wire formats.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The 4-byte magic prefix did not match the expected value.
    #[error("invalid magic bytes")]
    InvalidMagic,

    /// The version byte is not one this crate understands.
    #[error("unsupported version: {version}")]
    UnsupportedVersion {
        /// The version byte actually present.
        version: u8,
    },

    /// Fewer bytes were supplied than the structure requires.
    #[error("truncated input: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum required length.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// A length-prefixed field's declared length does not match the
    /// remaining input.
    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Expected length.
        expected: usize,
        /// Actual remaining length.
        actual: usize,
    },

    /// The pre-key exchange packet's `key_count` field was zero or exceeded
    /// the 255-key maximum the 2-byte field can address per §4.5.
    #[error("key count {count} out of range (1..=255)")]
    KeyCountOutOfRange {
        /// The out-of-range count.
        count: u32,
    },

    /// A ciphertext (or other variable-length field) exceeded the maximum
    /// size this protocol allows.
    #[error("payload too large: {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Size actually supplied.
        size: usize,
        /// Maximum permitted size.
        max: usize,
    },
}
