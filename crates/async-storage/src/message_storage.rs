//! Local storage-node role (§4.8, C7): holds opaque, pseudonymized envelopes
//! on behalf of untrusted remote peers until they are retrieved or expire.
//!
//! Storage nodes never see plaintext or identity keys, only the pseudonymized
//! [`ObfuscatedEnvelope`] wire shape; this module's job is bookkeeping
//! (capacity, expiry, per-recipient ordering), not cryptography.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use rand::RngCore;
use toxcore_async_proto::ObfuscatedEnvelope;

use crate::error::StorageError;

/// Lower bound on local capacity regardless of reported disk space.
pub const MINIMAL_STORAGE_CAPACITY: usize = 1_000;

/// Upper bound on local capacity regardless of reported disk space.
pub const MAX_STORAGE_CAPACITY: usize = 1_000_000;

/// How long a stored message remains retrievable before it is eligible for
/// [`MessageStorage::cleanup_expired`].
pub const MESSAGE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Rough average entry size used to translate a disk-space probe into a
/// message-count capacity.
const AVG_ENTRY_SIZE_BYTES: u64 = 2048;

/// An envelope held by a storage node, with node-local bookkeeping the wire
/// format itself does not carry.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Node-assigned id, used for deletion and cross-node dedup during
    /// [`crate::storage_client::StorageClient::get`] fan-out.
    pub message_id: [u8; 16],
    /// The opaque envelope as received from the sender.
    pub envelope: ObfuscatedEnvelope,
    /// When this node accepted the envelope.
    pub stored_at: SystemTime,
    /// When this entry becomes eligible for cleanup.
    pub expires_at: SystemTime,
}

struct Inner {
    by_recipient: HashMap<[u8; 32], Vec<StoredMessage>>,
    count: usize,
    capacity: usize,
}

/// In-memory storage-node implementation.
///
/// All state lives behind a single [`Mutex`]; operations are O(recipient's
/// queue length) at worst. Serves as the reference/test storage-node
/// backend; a disk-backed node can implement
/// [`crate::storage_node::StorageNode`] directly against the same contract.
#[derive(Clone)]
pub struct MessageStorage {
    inner: Arc<Mutex<Inner>>,
}

impl MessageStorage {
    /// Create an empty store with an initial capacity (message count).
    ///
    /// `initial_capacity` is clamped to
    /// `[MINIMAL_STORAGE_CAPACITY, MAX_STORAGE_CAPACITY]`.
    #[must_use]
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = initial_capacity.clamp(MINIMAL_STORAGE_CAPACITY, MAX_STORAGE_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner { by_recipient: HashMap::new(), count: 0, capacity })),
        }
    }

    /// Store an envelope, returning its node-assigned message id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::StorageFull`] if the node is at capacity.
    #[allow(clippy::expect_used, reason = "lock poisoning is an invariant violation, not a recoverable error")]
    pub fn store(&self, envelope: ObfuscatedEnvelope) -> Result<[u8; 16], StorageError> {
        let mut inner = self.inner.lock().expect("message storage lock poisoned");

        if inner.count >= inner.capacity {
            return Err(StorageError::StorageFull);
        }

        let mut message_id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut message_id);

        let now = SystemTime::now();
        let recipient = envelope.recipient_pseudonym;
        let stored = StoredMessage { message_id, envelope, stored_at: now, expires_at: now + MESSAGE_TTL };

        inner.by_recipient.entry(recipient).or_default().push(stored);
        inner.count += 1;

        Ok(message_id)
    }

    /// All non-expired messages addressed to `recipient_pseudonym`, ordered
    /// by `stored_at`.
    #[allow(clippy::expect_used, reason = "lock poisoning is an invariant violation, not a recoverable error")]
    #[must_use]
    pub fn retrieve(&self, recipient_pseudonym: &[u8; 32]) -> Vec<StoredMessage> {
        let inner = self.inner.lock().expect("message storage lock poisoned");
        let now = SystemTime::now();
        inner
            .by_recipient
            .get(recipient_pseudonym)
            .into_iter()
            .flatten()
            .filter(|m| m.expires_at > now)
            .cloned()
            .collect()
    }

    /// Remove a single message. Idempotent: deleting a missing or
    /// already-deleted id is not an error.
    #[allow(clippy::expect_used, reason = "lock poisoning is an invariant violation, not a recoverable error")]
    pub fn delete(&self, message_id: &[u8; 16], recipient_pseudonym: &[u8; 32]) {
        let mut inner = self.inner.lock().expect("message storage lock poisoned");
        if let Some(queue) = inner.by_recipient.get_mut(recipient_pseudonym) {
            let before = queue.len();
            queue.retain(|m| &m.message_id != message_id);
            let removed = before - queue.len();
            inner.count -= removed;
        }
    }

    /// Remove all expired entries, returning how many were removed.
    #[allow(clippy::expect_used, reason = "lock poisoning is an invariant violation, not a recoverable error")]
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock().expect("message storage lock poisoned");
        let now = SystemTime::now();
        let mut removed = 0;
        inner.by_recipient.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|m| m.expires_at > now);
            removed += before - queue.len();
            !queue.is_empty()
        });
        inner.count -= removed;
        removed
    }

    /// Reprobe available disk space and adjust capacity. Never shrinks below
    /// the number of messages currently stored.
    #[allow(clippy::expect_used, reason = "lock poisoning is an invariant violation, not a recoverable error")]
    pub fn update_capacity(&self, available_bytes: u64) {
        let mut inner = self.inner.lock().expect("message storage lock poisoned");
        let probed = (available_bytes / AVG_ENTRY_SIZE_BYTES) as usize;
        let clamped = probed.clamp(MINIMAL_STORAGE_CAPACITY, MAX_STORAGE_CAPACITY);
        inner.capacity = clamped.max(inner.count);
    }

    /// Number of messages currently stored, across all recipients.
    #[allow(clippy::expect_used, reason = "lock poisoning is an invariant violation, not a recoverable error")]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("message storage lock poisoned").count
    }

    /// True iff no messages are currently stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
