//! Capability interface for a single storage node as seen by
//! [`crate::storage_client::StorageClient`] (§6).
//!
//! `StorageClient` depends only on this trait, never on a concrete
//! transport, mirroring how the core crate depends on `CryptoProvider`
//! rather than a concrete crypto library.

use async_trait::async_trait;
use toxcore_async_proto::ObfuscatedEnvelope;

use crate::{error::StorageError, message_storage::StoredMessage};

/// A storage node reachable by [`crate::storage_client::StorageClient`].
///
/// Implementations may be in-process (wrapping a local
/// [`crate::message_storage::MessageStorage`]) or remote over a network
/// transport; the client does not distinguish between them.
#[async_trait]
pub trait StorageNode: Send + Sync {
    /// Store an envelope on this node.
    async fn put(&self, envelope: ObfuscatedEnvelope) -> Result<[u8; 16], StorageError>;

    /// Retrieve all non-expired messages for any of `recipient_pseudonyms`.
    async fn get(&self, recipient_pseudonyms: &[[u8; 32]]) -> Result<Vec<StoredMessage>, StorageError>;
}

/// Adapts a local [`crate::message_storage::MessageStorage`] to the
/// [`StorageNode`] interface, so the same code path exercises both
/// single-process tests and a multi-node deployment.
pub struct LocalStorageNode {
    storage: crate::message_storage::MessageStorage,
}

impl LocalStorageNode {
    /// Wrap a local store as a node.
    #[must_use]
    pub fn new(storage: crate::message_storage::MessageStorage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl StorageNode for LocalStorageNode {
    async fn put(&self, envelope: ObfuscatedEnvelope) -> Result<[u8; 16], StorageError> {
        self.storage.store(envelope)
    }

    async fn get(&self, recipient_pseudonyms: &[[u8; 32]]) -> Result<Vec<StoredMessage>, StorageError> {
        Ok(recipient_pseudonyms.iter().flat_map(|pseudonym| self.storage.retrieve(pseudonym)).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message_storage::MessageStorage;

    fn envelope_for(recipient: [u8; 32]) -> ObfuscatedEnvelope {
        ObfuscatedEnvelope {
            recipient_pseudonym: recipient,
            sender_pseudonym: [1u8; 32],
            epoch: 0,
            nonce: [0u8; 24],
            message_type: 0,
            ciphertext: bytes::Bytes::from_static(b"x"),
        }
    }

    #[tokio::test]
    async fn local_node_round_trips_through_storage_node_trait() {
        let node = LocalStorageNode::new(MessageStorage::new(crate::message_storage::MINIMAL_STORAGE_CAPACITY));
        let recipient = [3u8; 32];
        node.put(envelope_for(recipient)).await.unwrap();

        let found = node.get(&[recipient]).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn local_node_get_spans_multiple_pseudonyms() {
        let node = LocalStorageNode::new(MessageStorage::new(crate::message_storage::MINIMAL_STORAGE_CAPACITY));
        node.put(envelope_for([4u8; 32])).await.unwrap();
        node.put(envelope_for([5u8; 32])).await.unwrap();

        let found = node.get(&[[4u8; 32], [5u8; 32], [6u8; 32]]).await.unwrap();
        assert_eq!(found.len(), 2);
    }
}
