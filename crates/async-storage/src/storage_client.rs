//! Client-side view of the storage network (§4.6, C5): retried PUTs and
//! deduplicated concurrent-fan-out GETs across whatever nodes are known.

use std::{
    collections::HashSet,
    sync::Arc,
    time::Duration,
};

use tokio::sync::RwLock;
use toxcore_async_proto::ObfuscatedEnvelope;
use tracing::{debug, warn};

use crate::{error::StorageError, message_storage::StoredMessage, storage_node::StorageNode};

/// Per-node PUT attempts before giving up on that node.
const PUT_RETRIES: u32 = 3;

/// Base backoff between PUT attempts; doubles each retry.
const PUT_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default per-attempt PUT timeout.
const DEFAULT_PUT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default per-node GET timeout (adaptive up to 15s is a caller concern via
/// [`StorageClient::with_retrieval_timeout`]).
const DEFAULT_RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Talks to a set of [`StorageNode`]s on behalf of the orchestrator.
///
/// Holds no cryptographic material; it only moves already-sealed
/// [`ObfuscatedEnvelope`]s and already-assigned pseudonyms.
pub struct StorageClient {
    nodes: RwLock<Vec<Arc<dyn StorageNode>>>,
    put_timeout: Duration,
    retrieval_timeout: Duration,
}

impl StorageClient {
    /// Build a client over an initial set of nodes.
    #[must_use]
    pub fn new(nodes: Vec<Arc<dyn StorageNode>>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
            put_timeout: DEFAULT_PUT_TIMEOUT,
            retrieval_timeout: DEFAULT_RETRIEVAL_TIMEOUT,
        }
    }

    /// Override the per-attempt PUT timeout (default 3s).
    #[must_use]
    pub fn with_put_timeout(mut self, timeout: Duration) -> Self {
        self.put_timeout = timeout;
        self
    }

    /// Override the per-node GET timeout (default 5s).
    #[must_use]
    pub fn with_retrieval_timeout(mut self, timeout: Duration) -> Self {
        self.retrieval_timeout = timeout;
        self
    }

    /// Add a node to the known set.
    pub async fn add_node(&self, node: Arc<dyn StorageNode>) {
        self.nodes.write().await.push(node);
    }

    /// Store `envelope` on at least one known node.
    ///
    /// Each node gets up to [`PUT_RETRIES`] attempts with exponential
    /// backoff, capped by [`Self::with_put_timeout`] per attempt. Nodes are
    /// tried sequentially; the first ACK wins.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoNodesAvailable`] if no nodes are
    /// configured, or [`StorageError::PutFailed`] if every node exhausted
    /// its retries without an ACK.
    pub async fn put(&self, envelope: ObfuscatedEnvelope) -> Result<(), StorageError> {
        let nodes = self.nodes.read().await.clone();
        if nodes.is_empty() {
            return Err(StorageError::NoNodesAvailable);
        }

        for node in &nodes {
            if self.put_with_retry(node.as_ref(), &envelope).await {
                return Ok(());
            }
        }

        Err(StorageError::PutFailed { attempted: nodes.len() })
    }

    async fn put_with_retry(&self, node: &dyn StorageNode, envelope: &ObfuscatedEnvelope) -> bool {
        let mut delay = PUT_RETRY_BASE_DELAY;
        for attempt in 0..PUT_RETRIES {
            let result = tokio::time::timeout(self.put_timeout, node.put(envelope.clone())).await;
            match result {
                Ok(Ok(_message_id)) => return true,
                Ok(Err(err)) => debug!(attempt, %err, "storage node rejected put"),
                Err(_) => debug!(attempt, "storage node put timed out"),
            }
            if attempt + 1 < PUT_RETRIES {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        false
    }

    /// Fan out a GET for `recipient_pseudonyms` to every known node
    /// concurrently, merging and deduplicating by `message_id`.
    ///
    /// A node that times out or errors simply contributes nothing; partial
    /// results from the nodes that did respond in time are still valid
    /// (§4.6, §5 cancellation semantics).
    #[must_use]
    pub async fn get(&self, recipient_pseudonyms: &[[u8; 32]]) -> Vec<StoredMessage> {
        let nodes = self.nodes.read().await.clone();
        let queries = nodes.iter().map(|node| {
            let node = Arc::clone(node);
            let pseudonyms = recipient_pseudonyms.to_vec();
            let timeout = self.retrieval_timeout;
            async move { tokio::time::timeout(timeout, node.get(&pseudonyms)).await }
        });

        let results = futures_join_all(queries).await;

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for result in results {
            match result {
                Ok(Ok(messages)) => {
                    for message in messages {
                        if seen.insert(message.message_id) {
                            merged.push(message);
                        }
                    }
                },
                Ok(Err(err)) => warn!(%err, "storage node get failed"),
                Err(_) => warn!("storage node get timed out"),
            }
        }

        merged
    }
}

/// Minimal `join_all` so this crate does not need a dependency on `futures`
/// for a single call site; awaits each future in turn after spawning them.
async fn futures_join_all<F, T>(iter: impl IntoIterator<Item = F>) -> Vec<T>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = iter.into_iter().map(tokio::spawn).collect();
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(value) = handle.await {
            out.push(value);
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::message_storage::MessageStorage;
    use crate::storage_node::LocalStorageNode;

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

    struct AlwaysFailsNode;

    #[async_trait]
    impl StorageNode for AlwaysFailsNode {
        async fn put(&self, _envelope: ObfuscatedEnvelope) -> Result<[u8; 16], StorageError> {
            Err(StorageError::NetworkError("refused".into()))
        }

        async fn get(&self, _recipient_pseudonyms: &[[u8; 32]]) -> Result<Vec<StoredMessage>, StorageError> {
            Err(StorageError::NetworkError("refused".into()))
        }
    }

    struct CountingNode {
        attempts: AtomicU32,
        inner: LocalStorageNode,
    }

    #[async_trait]
    impl StorageNode for CountingNode {
        async fn put(&self, envelope: ObfuscatedEnvelope) -> Result<[u8; 16], StorageError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(envelope).await
        }

        async fn get(&self, recipient_pseudonyms: &[[u8; 32]]) -> Result<Vec<StoredMessage>, StorageError> {
            self.inner.get(recipient_pseudonyms).await
        }
    }

    #[tokio::test]
    async fn put_succeeds_with_no_nodes_configured_is_an_error() {
        let client = StorageClient::new(Vec::new());
        assert!(matches!(client.put(envelope_for([1u8; 32])).await, Err(StorageError::NoNodesAvailable)));
    }

    #[tokio::test]
    async fn put_fails_after_every_node_exhausts_retries() {
        let client = StorageClient::new(vec![Arc::new(AlwaysFailsNode), Arc::new(AlwaysFailsNode)])
            .with_put_timeout(Duration::from_millis(50));
        let result = client.put(envelope_for([1u8; 32])).await;
        assert!(matches!(result, Err(StorageError::PutFailed { attempted: 2 })));
    }

    #[tokio::test]
    async fn put_succeeds_as_soon_as_one_node_acks() {
        let good = LocalStorageNode::new(MessageStorage::new(crate::message_storage::MINIMAL_STORAGE_CAPACITY));
        let client = StorageClient::new(vec![Arc::new(AlwaysFailsNode), Arc::new(good)]);
        assert!(client.put(envelope_for([2u8; 32])).await.is_ok());
    }

    #[tokio::test]
    async fn get_dedups_across_nodes_that_share_a_message() {
        let storage = MessageStorage::new(crate::message_storage::MINIMAL_STORAGE_CAPACITY);
        let recipient = [3u8; 32];
        storage.store(envelope_for(recipient)).unwrap();

        let node_a = Arc::new(LocalStorageNode::new(storage.clone()));
        let node_b = Arc::new(LocalStorageNode::new(storage));

        let client = StorageClient::new(vec![node_a, node_b]);
        let found = client.get(&[recipient]).await;
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn get_returns_partial_results_when_one_node_fails() {
        let storage = MessageStorage::new(crate::message_storage::MINIMAL_STORAGE_CAPACITY);
        let recipient = [4u8; 32];
        storage.store(envelope_for(recipient)).unwrap();

        let good = Arc::new(LocalStorageNode::new(storage));
        let client = StorageClient::new(vec![Arc::new(AlwaysFailsNode), good]);

        let found = client.get(&[recipient]).await;
        assert_eq!(found.len(), 1);
    }
}
