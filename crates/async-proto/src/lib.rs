//! Wire formats for the asynchronous store-and-forward subsystem.
//!
//! Two independent wire structures live here:
//!
//! - [`envelope::ObfuscatedEnvelope`]: the pseudonymized, encrypted blob
//!   exchanged with untrusted storage nodes.
//! - [`exchange`]: the pre-key exchange packet, split into unsigned
//!   encoding, signature attachment, and structural parsing. Cryptographic
//!   signing and verification happen one layer up, over the byte ranges
//!   this module exposes.
//!
//! This crate intentionally has no cryptographic dependencies: it only
//! knows how to lay bytes out and read them back.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod envelope;
pub mod errors;
pub mod exchange;

pub use envelope::ObfuscatedEnvelope;
pub use errors::{ProtocolError, Result};
pub use exchange::ParsedExchange;
