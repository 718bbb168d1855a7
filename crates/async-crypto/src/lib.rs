//! Cryptographic primitives for the asynchronous store-and-forward subsystem.
//!
//! # Key Lifecycle
//!
//! ```text
//! Identity Key Pair (Ed25519 + X25519)
//!        │
//!        ▼
//! One-Time Pre-Key Pairs ── generated in batches of 100 per peer
//!        │
//!        ▼ (ECDH with consumed pre-key)
//! Shared Secret ── HKDF ──▶ AEAD Key
//!        │
//!        ▼
//! XChaCha20-Poly1305 Encryption ──▶ Ciphertext
//! ```
//!
//! Each pre-key is consumed exactly once and its private scalar is zeroized
//! immediately after use, so compromise of a later message never exposes an
//! earlier one.
//!
//! # Pseudonyms
//!
//! Recipient and sender pseudonyms are derived per-epoch via HKDF-SHA256 from
//! the recipient's identity public key. Storage nodes see only these opaque
//! 32-byte values, never real identities.
//!
//! # Security
//!
//! Forward Secrecy:
//! - Pre-keys are one-time; consumption wipes the private scalar
//! - Epoch rotation invalidates pseudonym linkage across time windows
//!
//! Authenticity:
//! - Pre-key exchange packets are Ed25519-signed by the offering peer
//! - XChaCha20-Poly1305 AEAD provides tamper-proof encryption

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod epoch;
mod error;
mod keys;
mod obfuscation;
mod provider;

pub use epoch::EpochManager;
pub use error::CryptoError;
pub use keys::{IdentityKeyPair, KeyPair, PreKeyPair, PublicKeyPair};
pub use obfuscation::{Obfuscation, PAD_SIZES, WrappedEnvelope, pad_plaintext, recipient_pseudonym, sender_pseudonym};
pub use provider::{CryptoProvider, DefaultCryptoProvider};
