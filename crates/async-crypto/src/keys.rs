//! Identity, agreement, and pre-key key material.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Secret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// The 64-byte public identity of a peer: a 32-byte Ed25519 signing key
/// followed by a 32-byte X25519 agreement key.
///
/// This is the `IdentityKey` of the data model (§3): every participant owns
/// a long-term key pair with these two public components.
///
/// `Serialize`/`Deserialize` let this type travel inside a CBOR-encoded
/// `ForwardSecureMessage` (the orchestrator layer wraps those before storage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKeyPair {
    /// Ed25519 verifying key, used to authenticate pre-key exchange packets.
    pub signing: [u8; 32],
    /// X25519 agreement key, used for ECDH with one-time pre-keys.
    pub agreement: [u8; 32],
}

impl PublicKeyPair {
    /// Concatenated 64-byte wire representation (signing || agreement).
    #[must_use]
    pub fn to_bytes(self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.signing);
        out[32..].copy_from_slice(&self.agreement);
        out
    }

    /// Hex encoding of the wire representation, used as the on-disk filename
    /// stem for a peer's pre-key bundle.
    #[must_use]
    pub fn to_hex(self) -> String {
        self.to_bytes().iter().map(|b| format!("{b:02x}")).collect()
    }

    fn verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.signing)
            .map_err(|e| CryptoError::InvalidKey { reason: e.to_string() })
    }

    /// Verify an Ed25519 signature over `message` under this identity's
    /// signing key.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> Result<(), CryptoError> {
        let key = self.verifying_key()?;
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        key.verify(message, &sig).map_err(|_| CryptoError::InvalidSignature)
    }
}

/// Long-term identity key pair, combining Ed25519 signing and X25519
/// agreement private material.
///
/// The crypto library is assumed to bind these two components; this
/// implementation derives independent key pairs for each, which is a valid
/// reading of the data model's "an implementation may derive one from the
/// other" allowance.
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    signing: SigningKey,
    agreement: X25519Secret,
}

impl IdentityKeyPair {
    /// Generate a fresh identity key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let signing = SigningKey::generate(rng);
        let agreement = X25519Secret::random_from_rng(rng);
        Self { signing, agreement }
    }

    /// Public half of this identity.
    #[must_use]
    pub fn public(&self) -> PublicKeyPair {
        PublicKeyPair {
            signing: self.signing.verifying_key().to_bytes(),
            agreement: X25519Public::from(&self.agreement).to_bytes(),
        }
    }

    /// Sign `message` with the Ed25519 signing key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    /// Perform X25519 Diffie-Hellman with a peer's agreement public key.
    #[must_use]
    pub fn agree(&self, their_public: &[u8; 32]) -> [u8; 32] {
        self.agreement.diffie_hellman(&X25519Public::from(*their_public)).to_bytes()
    }
}

/// A single asymmetric key pair used for X25519 agreement (one-time
/// pre-keys are agreement-only; they are never used to sign).
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    secret: X25519Secret,
    #[zeroize(skip)]
    public: X25519Public,
}

impl KeyPair {
    /// Generate a fresh agreement key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = X25519Secret::random_from_rng(rng);
        let public = X25519Public::from(&secret);
        Self { secret, public }
    }

    /// Reconstruct a key pair from raw bytes, e.g. when loading a pre-key
    /// bundle back out of encrypted-at-rest storage.
    #[must_use]
    pub fn from_raw(secret: [u8; 32], public: [u8; 32]) -> Self {
        Self { secret: X25519Secret::from(secret), public: X25519Public::from(public) }
    }

    /// Raw 32-byte private scalar, for wrapping under an at-rest AEAD key.
    /// Callers must never persist or transmit this unencrypted.
    #[must_use]
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// 32-byte public agreement key.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Perform X25519 Diffie-Hellman with a peer's public key.
    #[must_use]
    pub fn agree(&self, their_public: &[u8; 32]) -> [u8; 32] {
        self.secret.diffie_hellman(&X25519Public::from(*their_public)).to_bytes()
    }

    /// Overwrite the private scalar in place, independent of `Drop`.
    ///
    /// Used by [`crate::epoch`]-adjacent stores that remove a consumed
    /// pre-key slot but want the wipe to happen before the slot is dropped
    /// by the caller, satisfying the "wipe-before-return" invariant (P3).
    pub fn wipe(&mut self) {
        self.secret.zeroize();
    }
}

/// A one-time pre-key: an id used to reference it on the wire, plus the
/// underlying agreement key pair.
///
/// Does not itself derive [`ZeroizeOnDrop`]: `keypair`'s own `Drop` impl
/// already wipes the private scalar when a `PreKeyPair` is dropped, and
/// leaving this struct `Drop`-free lets callers destructure it by value
/// (see [`PreKeyPair::into_parts`]) to hand the key pair to a consumer
/// without cloning the private material.
pub struct PreKeyPair {
    id: u32,
    keypair: KeyPair,
}

impl PreKeyPair {
    /// Generate a fresh pre-key with a random 32-bit id.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self { id: rng.next_u32(), keypair: KeyPair::generate(rng) }
    }

    /// Construct from parts (used when restoring persisted state).
    #[must_use]
    pub fn from_parts(id: u32, keypair: KeyPair) -> Self {
        Self { id, keypair }
    }

    /// Wire id of this pre-key.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Public agreement key.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; 32] {
        self.keypair.public_bytes()
    }

    /// Reference to the underlying key pair.
    #[must_use]
    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Securely wipe the private scalar. Called by the pre-key store
    /// immediately after copying out the keypair for consumption, before the
    /// slot is removed from the bundle.
    pub fn wipe(&mut self) {
        self.keypair.wipe();
    }

    /// Consume `self`, returning its id and key pair by value.
    ///
    /// Lets a pre-key store take ownership of a one-time key's private
    /// material when an incoming message references it, without ever
    /// cloning the private scalar.
    #[must_use]
    pub fn into_parts(self) -> (u32, KeyPair) {
        (self.id, self.keypair)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn identity_sign_verify_roundtrip() {
        let mut rng = OsRng;
        let identity = IdentityKeyPair::generate(&mut rng);
        let public = identity.public();

        let msg = b"pre-key exchange packet";
        let sig = identity.sign(msg);

        assert!(public.verify(msg, &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails_verify() {
        let mut rng = OsRng;
        let identity = IdentityKeyPair::generate(&mut rng);
        let public = identity.public();

        let sig = identity.sign(b"original");
        assert!(public.verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn agreement_is_symmetric() {
        let mut rng = OsRng;
        let alice = IdentityKeyPair::generate(&mut rng);
        let bob = KeyPair::generate(&mut rng);

        let shared_a = alice.agree(&bob.public_bytes());
        let shared_b = bob.agree(&alice.public().agreement);

        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn keypair_survives_raw_round_trip() {
        let mut rng = OsRng;
        let original = KeyPair::generate(&mut rng);
        let restored = KeyPair::from_raw(original.secret_bytes(), original.public_bytes());
        assert_eq!(original.public_bytes(), restored.public_bytes());

        let peer = KeyPair::generate(&mut rng);
        assert_eq!(original.agree(&peer.public_bytes()), restored.agree(&peer.public_bytes()));
    }

    #[test]
    fn into_parts_preserves_id_and_keypair() {
        let mut rng = OsRng;
        let prekey = PreKeyPair::generate(&mut rng);
        let id = prekey.id();
        let public = prekey.public_bytes();
        let (returned_id, keypair) = prekey.into_parts();
        assert_eq!(returned_id, id);
        assert_eq!(keypair.public_bytes(), public);
    }

    #[test]
    fn prekey_ids_are_random() {
        let mut rng = OsRng;
        let a = PreKeyPair::generate(&mut rng);
        let b = PreKeyPair::generate(&mut rng);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn hex_encoding_round_trips_length() {
        let mut rng = OsRng;
        let identity = IdentityKeyPair::generate(&mut rng);
        let hex = identity.public().to_hex();
        assert_eq!(hex.len(), 128);
    }
}
