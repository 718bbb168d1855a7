//! Error types for pre-key storage, forward security, and exchange parsing.
//!
//! One enum per layer boundary, each wrapping rather than stringifying the
//! layer beneath it, so a caller several layers up can still match on the
//! original cause.

use thiserror::Error;
use toxcore_async_crypto::CryptoError;
use toxcore_async_proto::ProtocolError;

/// Errors from [`crate::prekey_store::PreKeyStore`].
#[derive(Error, Debug)]
pub enum PreKeyStoreError {
    /// No bundle exists for the requested peer.
    #[error("no pre-key bundle for this peer")]
    NoBundle,

    /// A bundle exists but has no unused keys left.
    #[error("pre-key bundle exhausted")]
    Exhausted,

    /// Reading or writing the encrypted bundle file failed.
    #[error("bundle persistence failed: {0}")]
    Persistence(#[source] std::io::Error),

    /// The bundle's ciphertext did not authenticate under our identity key
    /// (cross-identity leftover); callers should skip, not fail.
    #[error("bundle did not authenticate under current identity")]
    NotOurs,

    /// The bundle authenticated but the plaintext did not deserialize.
    #[error("bundle content corrupt: {0}")]
    Corrupt(String),

    /// A cryptographic primitive failed while wrapping/unwrapping a bundle.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Errors from [`crate::forward_security::ForwardSecurityManager`].
#[derive(Error, Debug)]
pub enum ForwardSecurityError {
    /// `can_send` was false: fewer than [`crate::model::PREKEY_MINIMUM`]
    /// keys remain from this peer.
    #[error("insufficient pre-keys remaining from peer")]
    InsufficientPreKeys,

    /// The underlying pre-key store rejected the operation.
    #[error(transparent)]
    Store(#[from] PreKeyStoreError),

    /// A cryptographic primitive failed while sealing a forward-secure
    /// message.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Building or parsing an exchange packet failed.
    #[error(transparent)]
    Codec(#[from] ExchangeCodecError),
}

/// Errors from parsing and verifying pre-key exchange packets
/// ([`crate::exchange`]).
#[derive(Error, Debug)]
pub enum ExchangeCodecError {
    /// The packet's byte structure was invalid.
    #[error(transparent)]
    Malformed(#[from] ProtocolError),

    /// The sender is not an established friend; packet dropped as spam
    /// defense (P9).
    #[error("sender is not a known friend")]
    UnknownSender,

    /// The Ed25519 signature did not verify.
    #[error(transparent)]
    InvalidSignature(#[from] CryptoError),
}
