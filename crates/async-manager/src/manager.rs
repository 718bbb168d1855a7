//! The async store-and-forward orchestrator (§4.9): wires pre-key exchange,
//! forward security, obfuscation, storage, and transport into one runtime.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{sync::RwLock, sync::watch, task::JoinHandle};
use toxcore_async_core::{
    ForwardSecurityManager, PreKeyStore,
    model::{ForwardSecureMessage, IdentityKey, MessageType, PendingMessage},
};
use toxcore_async_crypto::{CryptoProvider, IdentityKeyPair, Obfuscation, PublicKeyPair, recipient_pseudonym};
use toxcore_async_proto::ObfuscatedEnvelope;
use toxcore_async_storage::{StorageClient, StoredMessage};
use tracing::{debug, warn};

use crate::{
    config::AsyncConfig,
    error::AsyncManagerError,
    retrieval_scheduler::RetrievalScheduler,
    transport::{Address, Packet, PacketKind, Transport},
};

/// Bound on how many delivered message ids are remembered for dedup across
/// retrieval ticks. Sized generously above any plausible in-flight backlog;
/// storage's own 24h TTL is what actually bounds redelivery in the long run
/// (see `DESIGN.md` — this crate intentionally has no delete operation).
const DEDUP_CAPACITY: usize = 4096;

/// Callback invoked with a newly delivered plaintext message.
pub type MessageHandler = Arc<dyn Fn(IdentityKey, Vec<u8>, MessageType) + Send + Sync>;

struct FriendState {
    peer_pk: IdentityKey,
    address: Option<Address>,
    online: bool,
    pending: VecDeque<PendingMessage>,
}

impl FriendState {
    fn new(peer_pk: IdentityKey) -> Self {
        Self { peer_pk, address: None, online: false, pending: VecDeque::new() }
    }
}

/// Fixed-capacity FIFO membership set used to skip redelivering a message the
/// retrieval loop has already handed to the application handler.
struct DedupTracker {
    capacity: usize,
    order: VecDeque<[u8; 32]>,
    seen: HashSet<[u8; 32]>,
}

impl DedupTracker {
    fn new(capacity: usize) -> Self {
        Self { capacity, order: VecDeque::with_capacity(capacity), seen: HashSet::with_capacity(capacity) }
    }

    /// Record `id`, returning `true` if it had not been seen before.
    fn insert(&mut self, id: [u8; 32]) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

/// Orchestrates pre-key exchange, forward-secure sealing, epoch-scoped
/// obfuscation, and store-and-forward delivery for one local identity.
///
/// Generic over [`CryptoProvider`] for the same reason
/// [`ForwardSecurityManager`] is: tests can swap in a deterministic or
/// fault-injecting provider without touching orchestration logic.
pub struct AsyncManager<P: CryptoProvider> {
    identity: Arc<IdentityKeyPair>,
    forward_security: Arc<ForwardSecurityManager<P>>,
    storage: Arc<StorageClient>,
    obfuscation: Obfuscation,
    epochs: toxcore_async_crypto::EpochManager,
    transport: Arc<dyn Transport>,
    scheduler: Arc<RetrievalScheduler>,
    friends: RwLock<HashMap<[u8; 64], FriendState>>,
    handler: RwLock<Option<MessageHandler>>,
    delivered: Mutex<DedupTracker>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<P: CryptoProvider + 'static> AsyncManager<P> {
    /// Build a manager over an already-open [`PreKeyStore`], a storage
    /// client, and a transport, returning it ready to register friends and
    /// send/receive messages. Does not start the maintenance/retrieval
    /// tasks; call [`Self::spawn_maintenance_tasks`] once background polling
    /// should begin.
    ///
    /// # Errors
    ///
    /// Returns [`AsyncManagerError::Crypto`] if `config.epoch_duration` is
    /// zero.
    pub async fn new(
        provider: Arc<P>,
        identity: Arc<IdentityKeyPair>,
        prekey_store: Arc<PreKeyStore<P>>,
        storage: Arc<StorageClient>,
        transport: Arc<dyn Transport>,
        config: AsyncConfig,
    ) -> Result<Arc<Self>, AsyncManagerError> {
        let epochs = config.epoch_manager()?;
        let forward_security = Arc::new(ForwardSecurityManager::new(provider, Arc::clone(&identity), prekey_store));
        let scheduler = Arc::new(RetrievalScheduler::new(config.scheduler_config()));
        let (shutdown_tx, _) = watch::channel(false);

        let manager = Arc::new(Self {
            identity,
            forward_security,
            storage,
            obfuscation: Obfuscation::new(epochs),
            epochs,
            transport,
            scheduler,
            friends: RwLock::new(HashMap::new()),
            handler: RwLock::new(None),
            delivered: Mutex::new(DedupTracker::new(DEDUP_CAPACITY)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });

        Arc::clone(&manager).register_transport_handler().await;
        Ok(manager)
    }

    /// Our own long-term public identity.
    #[must_use]
    pub fn identity(&self) -> IdentityKey {
        self.identity.public()
    }

    /// Register the handler invoked with every newly delivered plaintext
    /// message, replacing any prior registration.
    pub async fn set_handler(&self, handler: MessageHandler) {
        *self.handler.write().await = Some(handler);
    }

    /// Record a friend's network address and make them known to the
    /// spam-defense gate on incoming pre-key exchange packets.
    pub async fn register_friend(&self, peer_pk: IdentityKey, address: Address) {
        let mut friends = self.friends.write().await;
        let entry = friends.entry(peer_pk.to_bytes()).or_insert_with(|| FriendState::new(peer_pk));
        entry.address = Some(address);
    }

    /// Mark a friend online or offline. Going online triggers an immediate,
    /// focused delivery attempt scoped to that single friend (§4.9) rather
    /// than waiting for the next periodic retrieval tick.
    pub async fn set_friend_online_status(&self, peer_pk: IdentityKey, online: bool) {
        {
            let mut friends = self.friends.write().await;
            let entry = friends.entry(peer_pk.to_bytes()).or_insert_with(|| FriendState::new(peer_pk));
            entry.online = online;
        }
        if online {
            self.handle_peer_online(peer_pk).await;
        }
    }

    /// Start the background maintenance and retrieval tasks. Safe to call
    /// once per manager; call [`Self::shutdown`] to stop them.
    pub fn spawn_maintenance_tasks(self: &Arc<Self>) {
        let retrieval_manager = Arc::clone(self);
        let retrieval_shutdown = self.shutdown_tx.subscribe();
        let retrieval_handle = tokio::spawn(async move { retrieval_manager.retrieval_loop(retrieval_shutdown).await });

        let cleanup_manager = Arc::clone(self);
        let cleanup_shutdown = self.shutdown_tx.subscribe();
        let cleanup_handle = tokio::spawn(async move { cleanup_manager.cleanup_loop(cleanup_shutdown).await });

        #[allow(clippy::expect_used, reason = "lock poisoning is an invariant violation, not a recoverable error")]
        let mut tasks = self.tasks.lock().expect("task list lock poisoned");
        tasks.push(retrieval_handle);
        tasks.push(cleanup_handle);
    }

    /// Signal every background task to stop and wait for them to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.transport.close().await;

        #[allow(clippy::expect_used, reason = "lock poisoning is an invariant violation, not a recoverable error")]
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().expect("task list lock poisoned").drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Send `plaintext` to `peer_pk`, sealing it forward-securely and
    /// delivering it through storage.
    ///
    /// If the peer is marked online, returns
    /// [`AsyncManagerError::RecipientOnline`] — direct delivery is outside
    /// this crate's scope and callers should use whatever live-session
    /// channel they maintain instead. If no pre-keys remain for the peer,
    /// the message is queued and a fresh exchange is requested.
    ///
    /// # Errors
    ///
    /// See [`AsyncManagerError`].
    pub async fn send_async(
        &self,
        peer_pk: IdentityKey,
        plaintext: Vec<u8>,
        message_type: MessageType,
    ) -> Result<(), AsyncManagerError> {
        {
            let friends = self.friends.read().await;
            if friends.get(&peer_pk.to_bytes()).is_some_and(|f| f.online) {
                return Err(AsyncManagerError::RecipientOnline);
            }
        }

        if self.forward_security.can_send(&peer_pk) {
            return self.seal_and_store(peer_pk, &plaintext, message_type).await;
        }

        {
            let mut friends = self.friends.write().await;
            let entry = friends.entry(peer_pk.to_bytes()).or_insert_with(|| FriendState::new(peer_pk));
            entry.pending.push_back(PendingMessage::new(plaintext, message_type));
        }

        if self.forward_security.needs_key_exchange(&peer_pk)
            && let Err(err) = self.send_pre_key_exchange(peer_pk).await
        {
            warn!(%err, "failed to request pre-key exchange after queuing message");
        }

        Ok(())
    }

    /// Request a fresh pre-key exchange from `peer_pk` over the registered
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns [`AsyncManagerError::NoAddress`] if no address has been
    /// registered for the peer via [`Self::register_friend`].
    pub async fn send_pre_key_exchange(&self, peer_pk: IdentityKey) -> Result<(), AsyncManagerError> {
        let packet_bytes = self.forward_security.exchange_pre_keys(peer_pk)?;
        let address = {
            let friends = self.friends.read().await;
            friends.get(&peer_pk.to_bytes()).and_then(|friend| friend.address.clone()).ok_or(AsyncManagerError::NoAddress)?
        };
        self.transport.send(Packet { kind: PacketKind::AsyncPreKeyExchange, bytes: packet_bytes }, &address).await?;
        Ok(())
    }

    async fn seal_and_store(
        &self,
        peer_pk: IdentityKey,
        plaintext: &[u8],
        message_type: MessageType,
    ) -> Result<(), AsyncManagerError> {
        let message = self.forward_security.send_forward_secure(&peer_pk, plaintext, message_type)?;

        let mut cbor = Vec::new();
        ciborium::into_writer(&message, &mut cbor).map_err(|err| AsyncManagerError::Codec(err.to_string()))?;

        let shared_secret = self.identity.agree(&peer_pk.agreement);
        let wrapped = self.obfuscation.wrap(&peer_pk, &cbor, &shared_secret, &mut rand::rngs::OsRng)?;

        self.storage.put(to_wire_envelope(wrapped)).await?;
        Ok(())
    }

    async fn handle_peer_online(&self, peer_pk: IdentityKey) {
        self.deliver_stored_messages(peer_pk).await;
        self.drain_pending(peer_pk).await;
    }

    /// Narrow retrieval scoped to a single newly-online peer: only that
    /// peer's shared secret is tried as an unwrap candidate, unlike the
    /// periodic loop which must try every known friend (recipient
    /// pseudonyms are derived from our identity alone, so a single GET
    /// response can contain messages from any sender).
    async fn deliver_stored_messages(&self, peer_pk: IdentityKey) {
        let found = self.storage.get(&self.our_recipient_pseudonyms()).await;
        let shared_secret = self.identity.agree(&peer_pk.agreement);
        let candidates = vec![(peer_pk, shared_secret.to_vec())];
        for stored in found {
            self.process_stored_message(&stored, &candidates).await;
        }
    }

    async fn drain_pending(&self, peer_pk: IdentityKey) {
        if !self.forward_security.can_send(&peer_pk) {
            return;
        }
        let pending: VecDeque<PendingMessage> = {
            let mut friends = self.friends.write().await;
            match friends.get_mut(&peer_pk.to_bytes()) {
                Some(state) => std::mem::take(&mut state.pending),
                None => return,
            }
        };
        for message in pending {
            if let Err(err) = self.seal_and_store(peer_pk, &message.plaintext, message.message_type).await {
                warn!(%err, "failed to flush a queued message after pre-keys became available");
            }
        }
    }

    async fn register_transport_handler(self: Arc<Self>) {
        let weak = Arc::downgrade(&self);
        self.transport
            .register_handler(
                PacketKind::AsyncPreKeyExchange,
                Arc::new(move |packet: Packet| {
                    let Some(manager) = weak.upgrade() else { return };
                    tokio::spawn(async move { manager.handle_incoming_exchange_packet(packet.bytes).await });
                }),
            )
            .await;
    }

    async fn handle_incoming_exchange_packet(&self, bytes: Vec<u8>) {
        let known_identities: HashMap<[u8; 32], IdentityKey> = {
            let friends = self.friends.read().await;
            friends.values().map(|friend| (friend.peer_pk.signing, friend.peer_pk)).collect()
        };

        let exchange =
            match toxcore_async_core::exchange::parse_and_verify(&bytes, |signing| known_identities.get(signing).copied()) {
                Ok(exchange) => exchange,
                Err(err) => {
                    warn!(%err, "rejected incoming pre-key exchange packet");
                    return;
                },
            };

        self.forward_security.process_exchange(&exchange);
        self.drain_pending(exchange.sender_pk).await;

        // The packet we just processed only offered us the sender's bundle,
        // letting us send to them — it does nothing for messages we have
        // queued for them. Reciprocate by offering our own bundle back if we
        // still need one from them, so a single `send_async` on either side
        // bootstraps both directions without a separate "request" packet
        // kind. `needs_key_exchange` is false once our bundle is fresh and
        // theirs is no longer low, so this cannot loop.
        if self.forward_security.needs_key_exchange(&exchange.sender_pk)
            && let Err(err) = self.send_pre_key_exchange(exchange.sender_pk).await
        {
            warn!(%err, "failed to reciprocate pre-key exchange");
        }
    }

    async fn retrieval_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            let interval = self.scheduler.next_interval().await;
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                () = tokio::time::sleep(interval) => {
                    if self.scheduler.should_send_cover().await {
                        self.perform_cover_retrieval().await;
                    }
                    self.perform_real_retrieval().await;
                }
            }
        }
    }

    async fn cleanup_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(60 * 60));
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let removed = self.forward_security.cleanup_expired_data();
                    if removed > 0 {
                        debug!(removed, "swept expired pre-key bookkeeping");
                    }
                }
            }
        }
    }

    /// Periodic retrieval against our own recipient pseudonyms, trying every
    /// known friend as an unwrap candidate for each returned envelope.
    async fn perform_real_retrieval(&self) {
        let found = self.storage.get(&self.our_recipient_pseudonyms()).await;

        if found.is_empty() {
            self.scheduler.on_empty_result();
            // No `Result` crosses the `StorageClient::get` boundary (per-node
            // failures are already absorbed there), so an empty result is
            // the only signal available here; it doubles as the counter the
            // retrieval-health telemetry reads.
            self.scheduler.record_retrieval_error();
            return;
        }

        self.scheduler.on_non_empty_result();
        let candidates = self.build_candidates().await;
        for stored in found {
            self.process_stored_message(&stored, &candidates).await;
        }
    }

    /// A decoy GET against a random pseudonym, indistinguishable on the wire
    /// from a real retrieval, interleaved per [`RetrievalScheduler::should_send_cover`].
    async fn perform_cover_retrieval(&self) {
        let mut decoy = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut decoy);
        let _ = self.storage.get(&[decoy]).await;
        self.scheduler.record_retrieval_error();
    }

    async fn build_candidates(&self) -> Vec<(PublicKeyPair, Vec<u8>)> {
        let friends = self.friends.read().await;
        friends.values().map(|friend| (friend.peer_pk, self.identity.agree(&friend.peer_pk.agreement).to_vec())).collect()
    }

    async fn process_stored_message(&self, stored: &StoredMessage, candidates: &[(PublicKeyPair, Vec<u8>)]) {
        let wrapped = to_wrapped_envelope(&stored.envelope);
        let Ok((sender_pk, cbor_bytes)) = self.obfuscation.unwrap(&self.identity(), &wrapped, candidates) else {
            return;
        };

        let message: ForwardSecureMessage = match ciborium::from_reader(cbor_bytes.as_slice()) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "failed to decode a forward-secure message that passed obfuscation unwrap");
                return;
            },
        };

        if message.sender_pk != sender_pk {
            warn!("sender pseudonym matched a candidate whose identity disagrees with the embedded sender_pk");
            return;
        }

        if !self.mark_delivered(message.message_id) {
            return;
        }

        match self.forward_security.receive_forward_secure(&message) {
            Ok(plaintext) => self.dispatch_to_handler(message.sender_pk, plaintext, message.message_type).await,
            Err(err) => warn!(%err, "failed to open a forward-secure message"),
        }
    }

    async fn dispatch_to_handler(&self, sender_pk: IdentityKey, plaintext: Vec<u8>, message_type: MessageType) {
        let handler = self.handler.read().await.clone();
        if let Some(handler) = handler {
            tokio::spawn(async move { handler(sender_pk, plaintext, message_type) });
        }
    }

    fn mark_delivered(&self, message_id: [u8; 32]) -> bool {
        #[allow(clippy::expect_used, reason = "lock poisoning is an invariant violation, not a recoverable error")]
        self.delivered.lock().expect("dedup lock poisoned").insert(message_id)
    }

    fn our_recipient_pseudonyms(&self) -> Vec<[u8; 32]> {
        let our_pk = self.identity();
        self.epochs.recent_epochs().iter().map(|&epoch| recipient_pseudonym(&our_pk, epoch)).collect()
    }
}

fn to_wire_envelope(wrapped: toxcore_async_crypto::WrappedEnvelope) -> ObfuscatedEnvelope {
    ObfuscatedEnvelope {
        recipient_pseudonym: wrapped.recipient_pseudonym,
        sender_pseudonym: wrapped.sender_pseudonym,
        epoch: wrapped.epoch,
        nonce: wrapped.nonce,
        message_type: 0,
        ciphertext: bytes::Bytes::from(wrapped.ciphertext),
    }
}

fn to_wrapped_envelope(envelope: &ObfuscatedEnvelope) -> toxcore_async_crypto::WrappedEnvelope {
    toxcore_async_crypto::WrappedEnvelope {
        recipient_pseudonym: envelope.recipient_pseudonym,
        sender_pseudonym: envelope.sender_pseudonym,
        ciphertext: envelope.ciphertext.to_vec(),
        nonce: envelope.nonce,
        epoch: envelope.epoch,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rand::rngs::OsRng;
    use toxcore_async_core::PreKeyStore;
    use toxcore_async_crypto::DefaultCryptoProvider;
    use toxcore_async_storage::{LocalStorageNode, MessageStorage, MINIMAL_STORAGE_CAPACITY};

    use toxcore_async_harness::DirectChannelTransport;

    use super::*;

    async fn build_manager(
        tmp: &std::path::Path,
        transport: Arc<dyn Transport>,
        storage: MessageStorage,
    ) -> (Arc<AsyncManager<DefaultCryptoProvider>>, Arc<IdentityKeyPair>) {
        let provider = Arc::new(DefaultCryptoProvider::new());
        let identity = Arc::new(IdentityKeyPair::generate(&mut OsRng));
        let prekey_store = Arc::new(PreKeyStore::open(Arc::clone(&provider), Arc::clone(&identity), tmp).unwrap());
        let client = Arc::new(StorageClient::new(vec![Arc::new(LocalStorageNode::new(storage))]));

        let manager = AsyncManager::new(provider, Arc::clone(&identity), prekey_store, client, transport, AsyncConfig::default())
            .await
            .unwrap();

        (manager, identity)
    }

    #[tokio::test]
    async fn happy_path_send_then_receive_after_exchange() {
        let storage = MessageStorage::new(MINIMAL_STORAGE_CAPACITY);
        let (transport_a, transport_b) = DirectChannelTransport::pair("alice".into(), "bob".into());

        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        let (alice, alice_identity) = build_manager(tmp_a.path(), transport_a, storage.clone()).await;
        let (bob, bob_identity) = build_manager(tmp_b.path(), transport_b, storage).await;

        alice.register_friend(bob_identity.public(), "bob".into()).await;
        bob.register_friend(alice_identity.public(), "alice".into()).await;

        // Bob offers pre-keys to Alice over the transport.
        bob.send_pre_key_exchange(alice_identity.public()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        bob.set_handler(Arc::new(move |_sender, plaintext, _message_type| {
            received_clone.lock().unwrap().push(plaintext);
        }))
        .await;

        alice.send_async(bob_identity.public(), b"hi bob".to_vec(), 0).await.unwrap();

        bob.set_friend_online_status(alice_identity.public(), true).await;

        assert_eq!(received.lock().unwrap().as_slice(), &[b"hi bob".to_vec()]);
    }

    #[tokio::test]
    async fn send_without_prekeys_queues_and_requests_exchange() {
        let storage = MessageStorage::new(MINIMAL_STORAGE_CAPACITY);
        let (transport_a, transport_b) = DirectChannelTransport::pair("alice".into(), "bob".into());

        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        let (alice, alice_identity) = build_manager(tmp_a.path(), transport_a, storage.clone()).await;
        let (bob, bob_identity) = build_manager(tmp_b.path(), transport_b, storage).await;

        alice.register_friend(bob_identity.public(), "bob".into()).await;
        bob.register_friend(alice_identity.public(), "alice".into()).await;

        let delivered_count = Arc::new(AtomicUsize::new(0));
        let delivered_clone = Arc::clone(&delivered_count);
        bob.set_handler(Arc::new(move |_sender, _plaintext, _message_type| {
            delivered_clone.fetch_add(1, Ordering::SeqCst);
        }))
        .await;

        // Alice has no pre-keys from Bob yet: this queues the message and
        // triggers an outbound exchange request. Bob's handler reciprocates
        // with his own bundle, which lets Alice drain the queue into storage
        // without either side calling `send_pre_key_exchange` by hand.
        alice.send_async(bob_identity.public(), b"queued".to_vec(), 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(delivered_count.load(Ordering::SeqCst), 0);

        // Bob comes online and pulls the message Alice already stored for him.
        bob.set_friend_online_status(alice_identity.public(), true).await;

        assert_eq!(delivered_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tampered_exchange_packet_is_rejected_and_leaves_can_send_false() {
        let storage = MessageStorage::new(MINIMAL_STORAGE_CAPACITY);
        let (transport_a, transport_b) = DirectChannelTransport::pair("alice".into(), "bob".into());

        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        let (alice, alice_identity) = build_manager(tmp_a.path(), transport_a, storage.clone()).await;
        let (bob, bob_identity) = build_manager(tmp_b.path(), transport_b, storage).await;

        alice.register_friend(bob_identity.public(), "bob".into()).await;
        bob.register_friend(alice_identity.public(), "alice".into()).await;

        let mut tampered = bob.forward_security.exchange_pre_keys(alice_identity.public()).unwrap();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xFF;

        alice.handle_incoming_exchange_packet(tampered).await;
        assert!(!alice.forward_security.can_send(&bob_identity.public()));
    }

    #[tokio::test]
    async fn exchange_from_unregistered_sender_is_rejected() {
        let storage = MessageStorage::new(MINIMAL_STORAGE_CAPACITY);
        let (transport_a, transport_b) = DirectChannelTransport::pair("alice".into(), "bob".into());

        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        let (alice, _alice_identity) = build_manager(tmp_a.path(), transport_a, storage.clone()).await;
        let (bob, bob_identity) = build_manager(tmp_b.path(), transport_b, storage).await;

        // Alice never registered Bob as a friend, so his offer should be
        // dropped by the spam-defense gate before any keys are recorded.
        let packet = bob.forward_security.exchange_pre_keys(bob_identity.public()).unwrap();
        alice.handle_incoming_exchange_packet(packet).await;
        assert!(!alice.forward_security.can_send(&bob_identity.public()));
    }
}
