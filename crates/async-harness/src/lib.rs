//! In-process simulation harness for the async store-and-forward runtime.
//!
//! [`DirectChannelTransport`] is a two-party [`Transport`] pair wired
//! entirely over `tokio::sync::mpsc` channels, sufficient for exercising
//! [`AsyncManager`](toxcore_async_manager::AsyncManager) end-to-end without a
//! real network. A production deployment substitutes a network-backed
//! `Transport` impl; the orchestrator does not know the difference.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use toxcore_async_manager::{Address, Packet, PacketHandler, PacketKind, Transport, TransportError};

/// A two-party direct-channel [`Transport`] pair, wired entirely in-process
/// over `tokio::sync::mpsc` channels.
///
/// [`DirectChannelTransport::pair`] returns two endpoints that can only ever
/// talk to each other, matching the single-friend scenarios in the
/// end-to-end test suite.
pub struct DirectChannelTransport {
    address: Address,
    peer_address: Address,
    outbound: mpsc::UnboundedSender<Packet>,
    handlers: Arc<RwLock<HashMap<PacketKind, PacketHandler>>>,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl DirectChannelTransport {
    /// Build a connected pair of transports addressed as `address_a` and
    /// `address_b`, each able to send only to the other.
    #[must_use]
    pub fn pair(address_a: Address, address_b: Address) -> (Arc<Self>, Arc<Self>) {
        let (tx_a_to_b, rx_a_to_b) = mpsc::unbounded_channel();
        let (tx_b_to_a, rx_b_to_a) = mpsc::unbounded_channel();

        let handlers_a = Arc::new(RwLock::new(HashMap::new()));
        let handlers_b = Arc::new(RwLock::new(HashMap::new()));

        let a = Arc::new(Self {
            address: address_a.clone(),
            peer_address: address_b.clone(),
            outbound: tx_a_to_b,
            handlers: Arc::clone(&handlers_a),
            closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        });
        let b = Arc::new(Self {
            address: address_b,
            peer_address: address_a,
            outbound: tx_b_to_a,
            handlers: Arc::clone(&handlers_b),
            closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        });

        spawn_dispatch(rx_b_to_a, handlers_a);
        spawn_dispatch(rx_a_to_b, handlers_b);

        (a, b)
    }
}

fn spawn_dispatch(
    mut rx: mpsc::UnboundedReceiver<Packet>,
    handlers: Arc<RwLock<HashMap<PacketKind, PacketHandler>>>,
) {
    tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            let handler = handlers.read().await.get(&packet.kind).cloned();
            if let Some(handler) = handler {
                handler(packet);
            }
        }
    });
}

#[async_trait]
impl Transport for DirectChannelTransport {
    async fn send(&self, packet: Packet, address: &Address) -> Result<(), TransportError> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if *address != self.peer_address {
            return Err(TransportError::UnknownAddress(address.clone()));
        }
        self.outbound.send(packet).map_err(|_| TransportError::Closed)
    }

    fn local_address(&self) -> Address {
        self.address.clone()
    }

    async fn register_handler(&self, kind: PacketKind, handler: PacketHandler) {
        self.handlers.write().await.insert(kind, handler);
    }

    async fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn pair_delivers_packet_to_registered_handler() {
        let (a, b) = DirectChannelTransport::pair("alice".into(), "bob".into());

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        b.register_handler(
            PacketKind::AsyncPreKeyExchange,
            Arc::new(move |packet: Packet| {
                received_clone.lock().unwrap().push(packet.bytes);
            }),
        )
        .await;

        a.send(Packet { kind: PacketKind::AsyncPreKeyExchange, bytes: vec![1, 2, 3] }, &b.local_address())
            .await
            .unwrap();

        // Let the dispatch task run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(received.lock().unwrap().as_slice(), &[vec![1u8, 2, 3]]);
    }

    #[tokio::test]
    async fn send_to_unknown_address_is_rejected() {
        let (a, _b) = DirectChannelTransport::pair("alice".into(), "bob".into());
        let result = a.send(Packet { kind: PacketKind::AsyncPreKeyExchange, bytes: vec![] }, &"mallory".to_string()).await;
        assert!(matches!(result, Err(TransportError::UnknownAddress(_))));
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let (a, _b) = DirectChannelTransport::pair("alice".into(), "bob".into());
        a.close().await;
        let result = a.send(Packet { kind: PacketKind::AsyncPreKeyExchange, bytes: vec![] }, &"bob".to_string()).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
