//! Consumes one-time pre-keys offered by peers to seal forward-secure
//! messages, and tracks how many such keys each peer has left to offer us
//! (§4.4, C4).

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use toxcore_async_crypto::{CryptoProvider, IdentityKeyPair};
use tracing::debug;

use crate::{
    error::ForwardSecurityError,
    exchange,
    model::{ForwardSecureMessage, IdentityKey, MessageType, PeerPreKeyList, PREKEY_LOW_WATERMARK, PREKEY_MINIMUM},
    prekey_store::PreKeyStore,
};

const SEND_KEY_INFO: &[u8] = b"toxcore-async-forward-secure-send-key-v1";

#[allow(clippy::expect_used, reason = "lock poisoning is an invariant violation, not a recoverable error")]
fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().expect("forward security lock poisoned")
}

#[allow(clippy::expect_used, reason = "lock poisoning is an invariant violation, not a recoverable error")]
fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().expect("forward security lock poisoned")
}

/// Tracks peers' offered one-time pre-keys and seals outgoing messages
/// against our own [`PreKeyStore`]-backed bundles.
///
/// `peer_pre_keys` holds keys peers have *offered us*: consuming one via
/// [`Self::send_forward_secure`] lets us encrypt to that peer without a
/// synchronous handshake. Our own offered keys live in [`PreKeyStore`] and
/// are consumed by peers sending to us, not by this manager.
pub struct ForwardSecurityManager<P: CryptoProvider> {
    provider: Arc<P>,
    identity: Arc<IdentityKeyPair>,
    prekey_store: Arc<PreKeyStore<P>>,
    peer_pre_keys: RwLock<HashMap<[u8; 64], PeerPreKeyList>>,
}

impl<P: CryptoProvider> ForwardSecurityManager<P> {
    /// Construct a manager over an already-open [`PreKeyStore`].
    #[must_use]
    pub fn new(provider: Arc<P>, identity: Arc<IdentityKeyPair>, prekey_store: Arc<PreKeyStore<P>>) -> Self {
        Self { provider, identity, prekey_store, peer_pre_keys: RwLock::new(HashMap::new()) }
    }

    /// True iff more than [`PREKEY_MINIMUM`] of `peer_pk`'s offered keys
    /// remain unconsumed.
    #[must_use]
    pub fn can_send(&self, peer_pk: &IdentityKey) -> bool {
        read(&self.peer_pre_keys).get(&peer_pk.to_bytes()).is_some_and(|list| list.len() > PREKEY_MINIMUM)
    }

    /// Seal `plaintext` for `peer_pk`, consuming the oldest pre-key that
    /// peer has offered us.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardSecurityError::InsufficientPreKeys`] if
    /// [`Self::can_send`] is false, which callers should treat as a signal
    /// to queue the message and request a fresh exchange instead.
    pub fn send_forward_secure(
        &self,
        peer_pk: &IdentityKey,
        plaintext: &[u8],
        message_type: MessageType,
    ) -> Result<ForwardSecureMessage, ForwardSecurityError> {
        if !self.can_send(peer_pk) {
            return Err(ForwardSecurityError::InsufficientPreKeys);
        }

        let entry = {
            let mut peers = write(&self.peer_pre_keys);
            let list = peers.get_mut(&peer_pk.to_bytes()).ok_or(ForwardSecurityError::InsufficientPreKeys)?;
            list.pop_front().ok_or(ForwardSecurityError::InsufficientPreKeys)?
        };

        let shared_secret = self.identity.agree(&entry.public_key);

        let mut key = [0u8; 32];
        self.provider.hkdf_sha256(None, &shared_secret, SEND_KEY_INFO, &mut key)?;

        let mut nonce = [0u8; 24];
        self.provider.random_fill(&mut nonce);

        let encrypted_data = self.provider.aead_encrypt(&key, &nonce, plaintext)?;

        let mut message_id = [0u8; 32];
        self.provider.random_fill(&mut message_id);

        Ok(ForwardSecureMessage {
            message_id,
            sender_pk: self.identity.public(),
            recipient_pk: *peer_pk,
            prekey_id: entry.id,
            encrypted_data,
            nonce,
            message_type,
        })
    }

    /// Open a [`ForwardSecureMessage`] addressed to us, consuming the
    /// one-time pre-key `message.prekey_id` was sealed against.
    ///
    /// Pre-key ids are never carried on the wire inside the message itself
    /// (only implicitly, by consumption order): the sender sealed against
    /// whichever key [`crate::prekey_store::PreKeyStore::public_keys_for`]
    /// listed first at exchange time, so the recipient consumes the same
    /// position via [`crate::prekey_store::PreKeyStore::get_available`].
    ///
    /// # Errors
    ///
    /// Returns [`ForwardSecurityError::Store`] if our bundle has no
    /// unconsumed key left, or [`ForwardSecurityError::Crypto`] if
    /// decryption fails (tampered ciphertext or a desynced consumption
    /// order).
    pub fn receive_forward_secure(&self, message: &ForwardSecureMessage) -> Result<Vec<u8>, ForwardSecurityError> {
        let consumed = self.prekey_store.get_available(&message.sender_pk)?;
        let shared_secret = consumed.keypair.agree(&message.sender_pk.agreement);

        let mut key = [0u8; 32];
        self.provider.hkdf_sha256(None, &shared_secret, SEND_KEY_INFO, &mut key)?;

        Ok(self.provider.aead_decrypt(&key, &message.nonce, &message.encrypted_data)?)
    }

    /// True if we should request a fresh exchange from `peer_pk`: either our
    /// own bundle offered to them needs refreshing, or their offered keys
    /// have dropped below [`PREKEY_LOW_WATERMARK`].
    #[must_use]
    pub fn needs_key_exchange(&self, peer_pk: &IdentityKey) -> bool {
        if self.prekey_store.needs_refresh(peer_pk) {
            return true;
        }
        read(&self.peer_pre_keys).get(&peer_pk.to_bytes()).is_none_or(|list| list.len() < PREKEY_LOW_WATERMARK)
    }

    /// Build a signed exchange packet offering our current pre-key bundle to
    /// `peer_pk`, refreshing the bundle first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardSecurityError::Store`] if the bundle cannot be
    /// generated, refreshed, or read back.
    pub fn exchange_pre_keys(&self, peer_pk: IdentityKey) -> Result<Vec<u8>, ForwardSecurityError> {
        if self.prekey_store.needs_refresh(&peer_pk) {
            self.prekey_store.refresh(peer_pk)?;
        }

        let public_keys = self.prekey_store.public_keys_for(&peer_pk)?;
        let ephemeral = self.provider.generate_prekey().public_bytes();

        Ok(exchange::create(&self.identity, &ephemeral, &public_keys)?)
    }

    /// Record an incoming exchange, replacing (never merging) whatever keys
    /// we previously held for `exchange.sender_pk`.
    pub fn process_exchange(&self, exchange: &exchange::Exchange) {
        write(&self.peer_pre_keys).insert(exchange.sender_pk.to_bytes(), PeerPreKeyList::from_entries(exchange.pre_keys.clone()));
        debug!(peer = %exchange.sender_pk.to_hex(), offered = exchange.pre_keys.len(), "recorded peer pre-key exchange");
    }

    /// Drop peer entries with no keys left and delegate to the pre-key
    /// store's own expiry sweep, returning the total number of records
    /// removed across both.
    pub fn cleanup_expired_data(&self) -> usize {
        let mut peers = write(&self.peer_pre_keys);
        let before = peers.len();
        peers.retain(|_, list| !list.is_empty());
        let peer_entries_removed = before - peers.len();
        drop(peers);

        peer_entries_removed + self.prekey_store.cleanup_expired()
    }
}
