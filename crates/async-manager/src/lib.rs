//! Async manager
//!
//! Orchestrates the asynchronous store-and-forward messaging subsystem:
//! pre-key exchange, forward-secure sealing, epoch-scoped obfuscation, and
//! retrieval pacing, wired around an abstract [`Transport`] and an abstract
//! [`toxcore_async_storage::StorageClient`].
//!
//! # Architecture
//!
//! [`AsyncManager`] holds one local identity's runtime state and exposes the
//! operations a caller drives it with: registering friends, sending messages
//! while a peer is offline, handling peer presence changes, and running the
//! background retrieval loop. Everything below it — [`toxcore_async_core`],
//! [`toxcore_async_crypto`], [`toxcore_async_storage`] — is Sans-IO; this
//! crate is where those pieces meet `tokio`.
//!
//! # Components
//!
//! - [`AsyncManager`]: top-level orchestrator, one per local identity
//! - [`AsyncConfig`]: retrieval pacing, epoch duration, and timeout knobs
//! - [`RetrievalScheduler`] / [`SchedulerConfig`]: jittered, backoff-aware
//!   retrieval pacing and cover-traffic gating
//! - [`Transport`]: abstract packet delivery; the `toxcore-async-harness`
//!   crate provides an in-process two-party test double for end-to-end tests

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod error;
mod manager;
mod retrieval_scheduler;
pub mod transport;

pub use config::AsyncConfig;
pub use error::AsyncManagerError;
pub use manager::{AsyncManager, MessageHandler};
pub use retrieval_scheduler::{RetrievalScheduler, SchedulerConfig};
pub use transport::{Address, Packet, PacketHandler, PacketKind, Transport, TransportError};
