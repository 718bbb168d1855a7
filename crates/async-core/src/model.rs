//! Data model shared by the pre-key store and forward security manager (§3).

use std::{
    collections::VecDeque,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use toxcore_async_crypto::{KeyPair, PreKeyPair, PublicKeyPair};

/// A peer's long-term identity: Ed25519 signing key plus X25519 agreement
/// key. Alias over the crypto crate's public key pair, since the data model
/// and the crypto layer describe exactly the same 64-byte value.
pub type IdentityKey = PublicKeyPair;

/// Maximum pre-keys held in a single bundle.
pub const MAX_KEYS_PER_BUNDLE: u32 = 100;

/// Bundle is due for refresh once remaining unused keys drop to or below
/// this count.
pub const PREKEY_REFRESH_THRESHOLD: u32 = 20;

/// Hard floor: a bundle at or below this many remaining keys can no longer
/// be consumed from by [`crate::forward_security::ForwardSecurityManager`].
pub const PREKEY_MINIMUM: usize = 5;

/// Below this many offered keys from a peer, a new exchange should be
/// requested even though sends can still proceed.
pub const PREKEY_LOW_WATERMARK: usize = 25;

/// Bundles older than this are torn down by `cleanup_expired`.
pub const MAX_PREKEY_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// A serializable snapshot of one unused pre-key, used only for at-rest
/// persistence (the live in-memory form is [`PreKeyPair`], which zeroizes on
/// drop and is never serialized directly).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPreKey {
    /// Wire id of the pre-key.
    pub id: u32,
    /// Public agreement key.
    pub public: [u8; 32],
    /// Private agreement scalar. Only ever touches disk inside the AEAD
    /// ciphertext written by [`crate::prekey_store::PreKeyStore`].
    pub secret: [u8; 32],
}

/// Our-side bundle of one-time pre-keys offered to a specific peer, plus the
/// bookkeeping needed to decide when to refresh or expire it.
pub struct PreKeyBundle {
    /// The peer this bundle is addressed to.
    pub peer_pk: IdentityKey,
    /// Unused pre-keys, oldest-consumable first.
    pub keys: Vec<PreKeyPair>,
    /// Count of keys already consumed from this bundle.
    pub used_count: u32,
    /// Total capacity (`keys.len() + used_count` until cleanup).
    pub max_keys: u32,
    /// When this bundle was generated.
    pub created_at: SystemTime,
    /// Last time we offered a refreshed bundle to this peer, if any.
    pub last_refresh_offer: Option<SystemTime>,
}

impl PreKeyBundle {
    /// Generate a fresh bundle of [`MAX_KEYS_PER_BUNDLE`] pre-keys for
    /// `peer_pk`.
    pub fn generate<R: rand_core::RngCore + rand_core::CryptoRng>(
        peer_pk: IdentityKey,
        rng: &mut R,
    ) -> Self {
        let keys = (0..MAX_KEYS_PER_BUNDLE).map(|_| PreKeyPair::generate(rng)).collect();
        Self {
            peer_pk,
            keys,
            used_count: 0,
            max_keys: MAX_KEYS_PER_BUNDLE,
            created_at: SystemTime::now(),
            last_refresh_offer: None,
        }
    }

    /// Remaining unused pre-keys. Invariant P1: `remaining() + used_count ==
    /// max_keys`.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.max_keys - self.used_count
    }

    /// True once `remaining() <= `[`PREKEY_REFRESH_THRESHOLD`] or the bundle
    /// has aged past [`MAX_PREKEY_AGE`].
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.remaining() <= PREKEY_REFRESH_THRESHOLD || self.is_expired()
    }

    /// True once the bundle is fully consumed or has aged past
    /// [`MAX_PREKEY_AGE`].
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.used_count >= self.max_keys
            || self.created_at.elapsed().is_ok_and(|age| age > MAX_PREKEY_AGE)
    }

    /// Public halves of every unused key, in order, for materializing an
    /// outbound exchange packet.
    #[must_use]
    pub fn public_keys(&self) -> Vec<(u32, [u8; 32])> {
        self.keys.iter().map(|key| (key.id(), key.public_bytes())).collect()
    }
}

/// One of a peer's one-time agreement keys, offered to us via a pre-key
/// exchange packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerPreKeyEntry {
    /// Wire id the peer assigned to this key.
    pub id: u32,
    /// The key's public agreement component.
    pub public_key: [u8; 32],
}

/// A peer's offered pre-keys, consumed one at a time from the front as we
/// send them forward-secure messages.
#[derive(Debug, Clone, Default)]
pub struct PeerPreKeyList {
    entries: VecDeque<PeerPreKeyEntry>,
}

impl PeerPreKeyList {
    /// Construct from a freshly received exchange packet's key list.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = PeerPreKeyEntry>) -> Self {
        Self { entries: entries.into_iter().collect() }
    }

    /// Number of keys remaining.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no keys remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume and return the oldest offered key.
    pub fn pop_front(&mut self) -> Option<PeerPreKeyEntry> {
        self.entries.pop_front()
    }

    /// Replace the entire list (a new exchange always replaces, never
    /// merges).
    pub fn replace(&mut self, entries: impl IntoIterator<Item = PeerPreKeyEntry>) {
        self.entries = entries.into_iter().collect();
    }
}

/// Message type tag carried alongside forward-secure and obfuscated
/// payloads.
pub type MessageType = u8;

/// A message encrypted for forward-secure delivery via a consumed one-time
/// pre-key.
///
/// CBOR-serialized by `toxcore-async-manager` before being handed to
/// [`toxcore_async_crypto::Obfuscation::wrap`] for the storage-facing
/// obfuscation layer; storage nodes never see this shape directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardSecureMessage {
    /// Random message identifier, used for dedup during retrieval fan-out.
    pub message_id: [u8; 32],
    /// Sender's long-term identity.
    pub sender_pk: IdentityKey,
    /// Recipient's long-term identity.
    pub recipient_pk: IdentityKey,
    /// Id of the one-time pre-key consumed to encrypt this message.
    pub prekey_id: u32,
    /// AEAD ciphertext of the (padded) plaintext.
    pub encrypted_data: Vec<u8>,
    /// AEAD nonce.
    pub nonce: [u8; 24],
    /// Application-defined message type.
    pub message_type: MessageType,
}

/// A message queued for a peer who was offline or had no available
/// pre-keys at send time.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    /// Plaintext bytes to send once the peer becomes reachable.
    pub plaintext: Vec<u8>,
    /// Application-defined message type.
    pub message_type: MessageType,
    /// When this message was enqueued.
    pub enqueued_at: SystemTime,
}

impl PendingMessage {
    /// Construct a pending message enqueued at the current time.
    #[must_use]
    pub fn new(plaintext: Vec<u8>, message_type: MessageType) -> Self {
        Self { plaintext, message_type, enqueued_at: SystemTime::now() }
    }
}

/// A consumed one-time pre-key's key pair, returned by
/// [`crate::prekey_store::PreKeyStore::get_available`].
pub struct ConsumedPreKey {
    /// Wire id of the consumed key.
    pub id: u32,
    /// Its agreement key pair (wiped from the store before this is
    /// returned).
    pub keypair: KeyPair,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn bundle_remaining_matches_invariant() {
        let peer = PublicKeyPair { signing: [0; 32], agreement: [0; 32] };
        let bundle = PreKeyBundle::generate(peer, &mut OsRng);
        assert_eq!(bundle.remaining() + bundle.used_count, bundle.max_keys);
        assert_eq!(bundle.keys.len() as u32, bundle.remaining());
    }

    #[test]
    fn peer_prekey_list_pops_in_order() {
        let mut list = PeerPreKeyList::from_entries([
            PeerPreKeyEntry { id: 1, public_key: [1; 32] },
            PeerPreKeyEntry { id: 2, public_key: [2; 32] },
        ]);
        assert_eq!(list.pop_front().unwrap().id, 1);
        assert_eq!(list.pop_front().unwrap().id, 2);
        assert!(list.pop_front().is_none());
    }

    #[test]
    fn replace_discards_previous_entries() {
        let mut list =
            PeerPreKeyList::from_entries([PeerPreKeyEntry { id: 1, public_key: [1; 32] }]);
        list.replace([PeerPreKeyEntry { id: 2, public_key: [2; 32] }]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.pop_front().unwrap().id, 2);
    }
}
