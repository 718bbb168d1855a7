//! Abstract transport capability (§6).
//!
//! [`AsyncManager`](crate::manager::AsyncManager) depends only on the
//! [`Transport`] trait, never on a concrete network stack. The production
//! implementation (QUIC, or whatever carries the rest of this network's
//! traffic) lives outside this crate; an in-process test double lives in the
//! `toxcore-async-harness` crate, pulled in only as a dev-dependency by
//! crates that need it for end-to-end tests.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Opaque network address of a peer. Left as a string rather than a
/// concrete `SocketAddr` so non-IP transports (onion routing, DHT lookups)
/// remain expressible.
pub type Address = String;

/// Packet kinds referenced by §6 of the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// A signed pre-key exchange packet ([`toxcore_async_core::exchange`]).
    AsyncPreKeyExchange,
    /// A response to a retrieval poll. Unused by the in-process test double,
    /// which resolves retrieval through [`toxcore_async_storage::StorageClient`]
    /// directly rather than over this transport.
    AsyncRetrieveResponse,
}

/// A framed packet handed to or received from a [`Transport`].
#[derive(Debug, Clone)]
pub struct Packet {
    /// What kind of packet this is, used to route to the right handler.
    pub kind: PacketKind,
    /// Packet payload, already encoded by the caller (e.g. the bytes
    /// returned by [`toxcore_async_core::exchange::create`]).
    pub bytes: Vec<u8>,
}

/// Callback invoked when a packet of a registered kind arrives.
pub type PacketHandler = Arc<dyn Fn(Packet) + Send + Sync>;

/// Errors from sending or configuring a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// No route to the given address is known to this transport.
    #[error("no route to address {0}")]
    UnknownAddress(Address),
    /// The transport has been closed.
    #[error("transport is closed")]
    Closed,
}

/// Capability interface over a network transport (§6).
///
/// Realized as an `async_trait` object (`Arc<dyn Transport>`) rather than a
/// generic parameter, so a manager can hold one without naming a concrete
/// transport type.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `packet` to `address`.
    async fn send(&self, packet: Packet, address: &Address) -> Result<(), TransportError>;

    /// This transport's own address, as peers would dial it.
    fn local_address(&self) -> Address;

    /// Register (replacing any prior registration) the handler invoked for
    /// packets of `kind`.
    async fn register_handler(&self, kind: PacketKind, handler: PacketHandler);

    /// Shut the transport down; subsequent `send` calls fail.
    async fn close(&self);
}
