//! Capability trait over the cryptographic primitives (§6), so higher layers
//! depend on an abstraction rather than concrete algorithm choices.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;

use crate::{
    error::CryptoError,
    keys::{IdentityKeyPair, KeyPair, PreKeyPair, PublicKeyPair},
};

/// Everything above this crate needs from cryptography, gathered behind one
/// trait so tests can swap in deterministic or faulty implementations
/// without touching call sites.
pub trait CryptoProvider: Send + Sync {
    /// Generate a fresh long-term identity key pair.
    fn generate_identity(&self) -> IdentityKeyPair;

    /// Generate a fresh one-time pre-key.
    fn generate_prekey(&self) -> PreKeyPair;

    /// Sign `message` under `identity`'s Ed25519 key.
    fn sign(&self, identity: &IdentityKeyPair, message: &[u8]) -> [u8; 64];

    /// Verify an Ed25519 signature under `public`.
    fn verify(
        &self,
        public: &PublicKeyPair,
        message: &[u8],
        signature: &[u8; 64],
    ) -> Result<(), CryptoError>;

    /// X25519 Diffie-Hellman between `ours` and `their_public`.
    fn ecdh(&self, ours: &KeyPair, their_public: &[u8; 32]) -> [u8; 32];

    /// HKDF-SHA256 expand, filling `out` from `ikm` under `salt`/`info`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if `out` exceeds HKDF's maximum
    /// output length (255 * 32 bytes), which no caller in this workspace
    /// should ever request.
    fn hkdf_sha256(
        &self,
        salt: Option<&[u8]>,
        ikm: &[u8],
        info: &[u8],
        out: &mut [u8],
    ) -> Result<(), CryptoError>;

    /// Encrypt `plaintext` with XChaCha20-Poly1305 under `key`/`nonce`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] if the underlying AEAD
    /// implementation rejects the inputs.
    fn aead_encrypt(&self, key: &[u8; 32], nonce: &[u8; 24], plaintext: &[u8])
    -> Result<Vec<u8>, CryptoError>;

    /// Decrypt and authenticate `ciphertext` under `key`/`nonce`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] if the authentication tag
    /// does not verify.
    fn aead_decrypt(
        &self,
        key: &[u8; 32],
        nonce: &[u8; 24],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Fill `out` with cryptographically secure random bytes, e.g. for a
    /// fresh AEAD nonce.
    fn random_fill(&self, out: &mut [u8]);
}

/// Production [`CryptoProvider`] backed by `ed25519-dalek`, `x25519-dalek`,
/// `chacha20poly1305`, and `hkdf`, sourcing randomness from the OS CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCryptoProvider;

impl DefaultCryptoProvider {
    /// Construct a new instance. Holds no state; cheap to create per call
    /// site or share behind an `Arc`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CryptoProvider for DefaultCryptoProvider {
    fn generate_identity(&self) -> IdentityKeyPair {
        IdentityKeyPair::generate(&mut OsRng)
    }

    fn generate_prekey(&self) -> PreKeyPair {
        PreKeyPair::generate(&mut OsRng)
    }

    fn sign(&self, identity: &IdentityKeyPair, message: &[u8]) -> [u8; 64] {
        identity.sign(message)
    }

    fn verify(
        &self,
        public: &PublicKeyPair,
        message: &[u8],
        signature: &[u8; 64],
    ) -> Result<(), CryptoError> {
        public.verify(message, signature)
    }

    fn ecdh(&self, ours: &KeyPair, their_public: &[u8; 32]) -> [u8; 32] {
        ours.agree(their_public)
    }

    fn hkdf_sha256(
        &self,
        salt: Option<&[u8]>,
        ikm: &[u8],
        info: &[u8],
        out: &mut [u8],
    ) -> Result<(), CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(salt, ikm);
        hkdf.expand(info, out)
            .map_err(|_| CryptoError::InvalidKey { reason: "HKDF output too long".into() })
    }

    fn aead_encrypt(
        &self,
        key: &[u8; 32],
        nonce: &[u8; 24],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = XChaCha20Poly1305::new(key.into());
        cipher
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    fn aead_decrypt(
        &self,
        key: &[u8; 32],
        nonce: &[u8; 24],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = XChaCha20Poly1305::new(key.into());
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed { reason: "AEAD tag mismatch".into() })
    }

    fn random_fill(&self, out: &mut [u8]) {
        use rand_core::RngCore;
        OsRng.fill_bytes(out);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip_through_provider() {
        let provider = DefaultCryptoProvider::new();
        let identity = provider.generate_identity();
        let public = identity.public();
        let sig = provider.sign(&identity, b"packet bytes");
        assert!(provider.verify(&public, b"packet bytes", &sig).is_ok());
    }

    #[test]
    fn aead_round_trip_through_provider() {
        let provider = DefaultCryptoProvider::new();
        let mut key = [0u8; 32];
        let mut nonce = [0u8; 24];
        provider.random_fill(&mut key);
        provider.random_fill(&mut nonce);

        let ciphertext = provider.aead_encrypt(&key, &nonce, b"payload").unwrap();
        let plaintext = provider.aead_decrypt(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(plaintext, b"payload");
    }

    #[test]
    fn aead_decrypt_rejects_wrong_key() {
        let provider = DefaultCryptoProvider::new();
        let mut key = [0u8; 32];
        let mut other_key = [1u8; 32];
        let mut nonce = [0u8; 24];
        provider.random_fill(&mut key);
        provider.random_fill(&mut other_key);
        provider.random_fill(&mut nonce);

        let ciphertext = provider.aead_encrypt(&key, &nonce, b"payload").unwrap();
        assert!(provider.aead_decrypt(&other_key, &nonce, &ciphertext).is_err());
    }

    #[test]
    fn hkdf_is_deterministic_for_same_inputs() {
        let provider = DefaultCryptoProvider::new();
        let mut out1 = [0u8; 32];
        let mut out2 = [0u8; 32];
        provider.hkdf_sha256(Some(b"salt"), b"ikm", b"info", &mut out1).unwrap();
        provider.hkdf_sha256(Some(b"salt"), b"ikm", b"info", &mut out2).unwrap();
        assert_eq!(out1, out2);
    }

    #[test]
    fn ecdh_is_symmetric_through_provider() {
        let provider = DefaultCryptoProvider::new();
        let alice = KeyPair::generate(&mut OsRng);
        let bob = KeyPair::generate(&mut OsRng);
        let shared_a = provider.ecdh(&alice, &bob.public_bytes());
        let shared_b = provider.ecdh(&bob, &alice.public_bytes());
        assert_eq!(shared_a, shared_b);
    }
}
