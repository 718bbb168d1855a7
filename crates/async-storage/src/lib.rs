//! Storage-node and storage-client roles for the asynchronous messaging
//! store-and-forward path (§4.6, §4.8).
//!
//! This crate holds no cryptographic material: it moves already-sealed
//! [`toxcore_async_proto::ObfuscatedEnvelope`]s between an in-process or
//! remote [`StorageNode`] and the orchestrator crate that drives delivery.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod message_storage;
pub mod storage_client;
pub mod storage_node;

pub use error::StorageError;
pub use message_storage::{MessageStorage, StoredMessage, MAX_STORAGE_CAPACITY, MESSAGE_TTL, MINIMAL_STORAGE_CAPACITY};
pub use storage_client::StorageClient;
pub use storage_node::{LocalStorageNode, StorageNode};
