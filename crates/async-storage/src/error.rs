//! Errors from the storage-node ([`crate::message_storage`]) and
//! storage-client ([`crate::storage_client`]) roles.

use thiserror::Error;
use toxcore_async_proto::ProtocolError;

/// Errors surfaced by [`crate::message_storage::MessageStorage`] and
/// [`crate::storage_client::StorageClient`].
#[derive(Error, Debug)]
pub enum StorageError {
    /// The local storage node is at capacity; the PUT was rejected.
    #[error("storage node is full")]
    StorageFull,

    /// No storage nodes are configured on this client.
    #[error("no storage nodes available")]
    NoNodesAvailable,

    /// Every configured node rejected or failed the PUT after retries.
    #[error("put failed against all {attempted} node(s)")]
    PutFailed {
        /// Number of nodes attempted.
        attempted: usize,
    },

    /// A remote node's transport failed. Retried per policy before this is
    /// surfaced (§7).
    #[error("storage node transport error: {0}")]
    NetworkError(String),

    /// The envelope failed to decode off the wire.
    #[error(transparent)]
    Codec(#[from] ProtocolError),
}
