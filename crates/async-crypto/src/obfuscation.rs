//! Epoch-scoped pseudonyms and envelope wrapping (§4.2).
//!
//! Recipient and sender pseudonyms are 32-byte HKDF-SHA256 outputs, so that
//! storage nodes holding [`WrappedEnvelope`]s cannot link messages across
//! epochs or to real identities.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use rand_core::{CryptoRng, RngCore};
use sha2::Sha256;

use crate::{epoch::EpochManager, error::CryptoError, keys::PublicKeyPair};

/// Domain-separation label for recipient pseudonym derivation.
const RECIPIENT_INFO: &[u8] = b"toxcore-async-recipient";

/// Domain-separation label for sender pseudonym derivation.
const SENDER_INFO: &[u8] = b"toxcore-async-sender";

/// Standard padded sizes plaintexts are rounded up to before encryption, to
/// resist traffic analysis on ciphertext length.
pub const PAD_SIZES: [usize; 3] = [256, 1024, 4096];

/// Pad `plaintext` up to the next size in [`PAD_SIZES`] (or leave it
/// unpadded if it already exceeds the largest bucket).
///
/// Padding format: the original length as a big-endian `u32` prefix,
/// followed by the plaintext, followed by zero bytes to the target size.
#[must_use]
pub fn pad_plaintext(plaintext: &[u8]) -> Vec<u8> {
    let needed = plaintext.len() + 4;
    let target = PAD_SIZES.iter().copied().find(|&size| size >= needed).unwrap_or(needed);

    let mut out = Vec::with_capacity(target);
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(plaintext.len() as u32).to_be_bytes());
    out.extend_from_slice(plaintext);
    out.resize(target, 0);
    out
}

/// Inverse of [`pad_plaintext`].
fn unpad_plaintext(padded: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if padded.len() < 4 {
        return Err(CryptoError::DecryptionFailed { reason: "padded message too short".into() });
    }
    let len = u32::from_be_bytes([padded[0], padded[1], padded[2], padded[3]]) as usize;
    let body = &padded[4..];
    if len > body.len() {
        return Err(CryptoError::DecryptionFailed {
            reason: "padded length prefix exceeds body".into(),
        });
    }
    Ok(body[..len].to_vec())
}

/// Derive the recipient pseudonym for `peer_pk` at `epoch`.
#[must_use]
pub fn recipient_pseudonym(peer_pk: &PublicKeyPair, epoch: u64) -> [u8; 32] {
    derive_pseudonym(&peer_pk.to_bytes(), epoch, RECIPIENT_INFO)
}

/// Derive the sender pseudonym for a shared secret at `epoch`.
#[must_use]
pub fn sender_pseudonym(shared_secret: &[u8], epoch: u64) -> [u8; 32] {
    derive_pseudonym(shared_secret, epoch, SENDER_INFO)
}

fn derive_pseudonym(ikm: &[u8], epoch: u64, info_label: &[u8]) -> [u8; 32] {
    let salt = epoch.to_le_bytes();
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), ikm);
    let mut out = [0u8; 32];
    let Ok(()) = hkdf.expand(info_label, &mut out) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    out
}

fn derive_aead_key(shared_secret: &[u8], epoch: u64) -> [u8; 32] {
    let salt = epoch.to_le_bytes();
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut key = [0u8; 32];
    let Ok(()) = hkdf.expand(b"toxcore-async-envelope-key", &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    key
}

/// A sealed, pseudonymized message ready to be stored at an untrusted
/// storage node. Corresponds to the crypto-layer half of the wire
/// `ObfuscatedEnvelope` (§6); the storage layer adds `stored_at`/`ttl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedEnvelope {
    /// Opaque recipient identifier for this epoch.
    pub recipient_pseudonym: [u8; 32],
    /// Opaque sender identifier for this epoch.
    pub sender_pseudonym: [u8; 32],
    /// AEAD ciphertext of the padded plaintext.
    pub ciphertext: Vec<u8>,
    /// 24-byte XChaCha20 nonce.
    pub nonce: [u8; 24],
    /// Epoch this envelope was wrapped under.
    pub epoch: u64,
}

/// Epoch-scoped pseudonym derivation and envelope wrap/unwrap (C2).
#[derive(Debug, Clone, Copy)]
pub struct Obfuscation {
    epochs: EpochManager,
}

impl Obfuscation {
    /// Construct over the given epoch manager.
    #[must_use]
    pub fn new(epochs: EpochManager) -> Self {
        Self { epochs }
    }

    /// Seal `plaintext` addressed to `recipient_pk`, under `shared_secret`
    /// (an ECDH output or forward-secure message key shared with the
    /// recipient), tagged with the current epoch.
    pub fn wrap<R: RngCore + CryptoRng>(
        &self,
        recipient_pk: &PublicKeyPair,
        plaintext: &[u8],
        shared_secret: &[u8],
        rng: &mut R,
    ) -> Result<WrappedEnvelope, CryptoError> {
        let epoch = self.epochs.current_epoch();
        let padded = pad_plaintext(plaintext);

        let key = derive_aead_key(shared_secret, epoch);
        let mut nonce = [0u8; 24];
        rng.fill_bytes(&mut nonce);

        let cipher = XChaCha20Poly1305::new((&key).into());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), padded.as_slice())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(WrappedEnvelope {
            recipient_pseudonym: recipient_pseudonym(recipient_pk, epoch),
            sender_pseudonym: sender_pseudonym(shared_secret, epoch),
            ciphertext,
            nonce,
            epoch,
        })
    }

    /// Attempt to open `envelope` as `our_pk`.
    ///
    /// `candidates` enumerates (peer identity, shared secret) pairs for
    /// peers we might be receiving from — e.g. every friend with an active
    /// forward-secure session. For each candidate we check whether the
    /// envelope's `recipient_pseudonym` matches ours for any epoch in the
    /// retrieval window, and whether its `sender_pseudonym` matches the
    /// candidate's derived pseudonym, before attempting AEAD decryption.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NotForUs`] if no epoch/candidate combination
    /// matches, or [`CryptoError::DecryptionFailed`] if a pseudonym matched
    /// but the AEAD tag did not verify (should not happen unless the
    /// envelope was tampered with).
    pub fn unwrap(
        &self,
        our_pk: &PublicKeyPair,
        envelope: &WrappedEnvelope,
        candidates: &[(PublicKeyPair, Vec<u8>)],
    ) -> Result<(PublicKeyPair, Vec<u8>), CryptoError> {
        if !self.epochs.recent_epochs().contains(&envelope.epoch) {
            return Err(CryptoError::NotForUs);
        }

        if recipient_pseudonym(our_pk, envelope.epoch) != envelope.recipient_pseudonym {
            return Err(CryptoError::NotForUs);
        }

        for (sender_pk, shared_secret) in candidates {
            if sender_pseudonym(shared_secret, envelope.epoch) != envelope.sender_pseudonym {
                continue;
            }

            let key = derive_aead_key(shared_secret, envelope.epoch);
            let cipher = XChaCha20Poly1305::new((&key).into());
            let Ok(padded) =
                cipher.decrypt(XNonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
            else {
                continue;
            };

            let plaintext = unpad_plaintext(&padded)?;
            return Ok((*sender_pk, plaintext));
        }

        Err(CryptoError::NotForUs)
    }
}
