//! Core asynchronous messaging state machine: pre-key bundles, forward
//! security, and pre-key exchange packet handling (§3-§4.5 of the system
//! design).
//!
//! This crate holds no transport or storage logic; it is driven by
//! `toxcore-async-manager`, which owns the tokio runtime and wires these
//! types to a transport and a storage client.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod exchange;
pub mod forward_security;
pub mod model;
pub mod prekey_store;

pub use error::{ExchangeCodecError, ForwardSecurityError, PreKeyStoreError};
pub use exchange::Exchange;
pub use forward_security::ForwardSecurityManager;
pub use model::{
    ConsumedPreKey, ForwardSecureMessage, IdentityKey, MessageType, PeerPreKeyEntry, PeerPreKeyList,
    PendingMessage, PreKeyBundle, StoredPreKey, MAX_KEYS_PER_BUNDLE, MAX_PREKEY_AGE, PREKEY_LOW_WATERMARK,
    PREKEY_MINIMUM, PREKEY_REFRESH_THRESHOLD,
};
pub use prekey_store::PreKeyStore;
