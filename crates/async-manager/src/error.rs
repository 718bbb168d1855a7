//! Errors produced by [`crate::manager::AsyncManager`] (§7).
//!
//! Each lower-layer error is wrapped, never stringified, so callers several
//! layers up can still match on the original cause — the same convention
//! `toxcore-async-core::error` and `toxcore-async-storage::error` follow.

use thiserror::Error;
use toxcore_async_core::{ExchangeCodecError, ForwardSecurityError};
use toxcore_async_crypto::CryptoError;
use toxcore_async_storage::StorageError;

use crate::transport::TransportError;

/// Errors surfaced by [`crate::manager::AsyncManager`].
#[derive(Error, Debug)]
pub enum AsyncManagerError {
    /// `send_async` was called for a peer whose presence is marked online;
    /// callers should deliver directly instead of going through storage.
    #[error("recipient is currently online; send directly instead")]
    RecipientOnline,

    /// The forward-security layer rejected the operation.
    #[error(transparent)]
    ForwardSecurity(#[from] ForwardSecurityError),

    /// A cryptographic primitive failed (obfuscation wrap/unwrap, epoch
    /// validation).
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The storage layer rejected the operation.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Building or parsing a pre-key exchange packet failed.
    #[error(transparent)]
    Exchange(#[from] ExchangeCodecError),

    /// The configured [`crate::transport::Transport`] failed to deliver a
    /// packet.
    #[error("transport error: {0}")]
    Transport(String),

    /// CBOR encoding or decoding a [`toxcore_async_core::model::ForwardSecureMessage`]
    /// failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// No network address is known for the given peer, so a direct packet
    /// (e.g. a pre-key exchange) cannot be sent.
    #[error("no known address for peer")]
    NoAddress,
}

impl From<TransportError> for AsyncManagerError {
    fn from(error: TransportError) -> Self {
        Self::Transport(error.to_string())
    }
}
