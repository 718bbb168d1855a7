//! Manages our-side one-time pre-key bundles, persisted encrypted-at-rest
//! (§4.3, C3).

#![allow(clippy::expect_used, reason = "lock poisoning and fixed-width slice conversions are both invariant violations, not recoverable errors")]

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use toxcore_async_crypto::{CryptoProvider, IdentityKeyPair, KeyPair, PreKeyPair, PublicKeyPair};
use tracing::{debug, warn};

use crate::{
    error::PreKeyStoreError,
    model::{ConsumedPreKey, IdentityKey, PreKeyBundle, StoredPreKey},
};

const WRAP_KEY_INFO: &[u8] = b"toxcore-async-prekey-store-wrap-key-v1";
const WRAP_KEY_DOMAIN_MESSAGE: &[u8] = b"toxcore-async-prekey-store-wrap-key-domain-v1";

#[derive(Debug, Serialize, Deserialize)]
struct StoredBundle {
    peer_pk: [u8; 64],
    keys: Vec<StoredPreKey>,
    used_count: u32,
    max_keys: u32,
    created_at_unix_secs: u64,
    last_refresh_offer_unix_secs: Option<u64>,
}

/// Manages our-side pre-key bundles: one per peer we expect to receive
/// forward-secure messages from.
///
/// All mutation goes through a single exclusive lock; reads (`needs_refresh`
/// checks) use the same lock in shared mode. `Clone`s share the same
/// in-memory state and data directory.
pub struct PreKeyStore<P: CryptoProvider> {
    provider: Arc<P>,
    identity: Arc<IdentityKeyPair>,
    data_dir: PathBuf,
    bundles: RwLock<HashMap<[u8; 64], PreKeyBundle>>,
}

impl<P: CryptoProvider> PreKeyStore<P> {
    /// Construct a store rooted at `<data_dir>/prekeys/`, wrapping bundle
    /// ciphertext under a key derived from `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`PreKeyStoreError::Persistence`] if the pre-keys directory
    /// cannot be created.
    pub fn open(
        provider: Arc<P>,
        identity: Arc<IdentityKeyPair>,
        data_dir: impl Into<PathBuf>,
    ) -> Result<Self, PreKeyStoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(Self::prekeys_dir(&data_dir)).map_err(PreKeyStoreError::Persistence)?;
        let store = Self { provider, identity, data_dir, bundles: RwLock::new(HashMap::new()) };
        store.load_all()?;
        Ok(store)
    }

    fn prekeys_dir(data_dir: &Path) -> PathBuf {
        data_dir.join("prekeys")
    }

    fn bundle_path(&self, peer_pk: &IdentityKey) -> PathBuf {
        Self::prekeys_dir(&self.data_dir).join(format!("{}.json.enc", peer_pk.to_hex()))
    }

    fn wrap_key(&self) -> [u8; 32] {
        let domain_signature = self.identity.sign(WRAP_KEY_DOMAIN_MESSAGE);
        let mut key = [0u8; 32];
        self.provider
            .hkdf_sha256(None, &domain_signature, WRAP_KEY_INFO, &mut key)
            .expect("32-byte HKDF output is always within range");
        key
    }

    /// Load every bundle file from disk into memory, skipping files that do
    /// not authenticate under our identity and logging corrupt-but-ours
    /// files as warnings, per §4.3.
    fn load_all(&self) -> Result<(), PreKeyStoreError> {
        let dir = Self::prekeys_dir(&self.data_dir);
        let Ok(entries) = fs::read_dir(&dir) else { return Ok(()) };

        let mut loaded = self.bundles.write().expect("pre-key store lock poisoned");
        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("enc") {
                continue;
            }

            match self.read_bundle_file(&path) {
                Ok(bundle) => {
                    let key = bundle.peer_pk.to_bytes();
                    loaded.insert(key, bundle);
                },
                Err(PreKeyStoreError::NotOurs) => {
                    debug!(path = %path.display(), "skipping pre-key bundle from another identity");
                },
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "pre-key bundle file failed to load");
                },
            }
        }
        Ok(())
    }

    fn read_bundle_file(&self, path: &Path) -> Result<PreKeyBundle, PreKeyStoreError> {
        let raw = fs::read(path).map_err(PreKeyStoreError::Persistence)?;
        if raw.len() < 24 {
            return Err(PreKeyStoreError::Corrupt("file shorter than nonce".into()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(24);
        let nonce: [u8; 24] = nonce_bytes.try_into().expect("split at 24");

        let key = self.wrap_key();
        let plaintext = self
            .provider
            .aead_decrypt(&key, &nonce, ciphertext)
            .map_err(|_| PreKeyStoreError::NotOurs)?;

        let stored: StoredBundle = ciborium::de::from_reader(plaintext.as_slice())
            .map_err(|e| PreKeyStoreError::Corrupt(e.to_string()))?;

        Ok(self.bundle_from_stored(stored))
    }

    fn bundle_from_stored(&self, stored: StoredBundle) -> PreKeyBundle {
        let peer_pk = PublicKeyPair {
            signing: stored.peer_pk[..32].try_into().expect("32-byte slice"),
            agreement: stored.peer_pk[32..].try_into().expect("32-byte slice"),
        };
        let keys = stored
            .keys
            .into_iter()
            .map(|k| PreKeyPair::from_parts(k.id, KeyPair::from_raw(k.secret, k.public)))
            .collect();
        PreKeyBundle {
            peer_pk,
            keys,
            used_count: stored.used_count,
            max_keys: stored.max_keys,
            created_at: UNIX_EPOCH + std::time::Duration::from_secs(stored.created_at_unix_secs),
            last_refresh_offer: stored
                .last_refresh_offer_unix_secs
                .map(|s| UNIX_EPOCH + std::time::Duration::from_secs(s)),
        }
    }

    fn persist(&self, bundle: &PreKeyBundle) -> Result<(), PreKeyStoreError> {
        let stored = StoredBundle {
            peer_pk: bundle.peer_pk.to_bytes(),
            keys: bundle
                .keys
                .iter()
                .map(|k| StoredPreKey { id: k.id(), public: k.public_bytes(), secret: k.keypair().secret_bytes() })
                .collect(),
            used_count: bundle.used_count,
            max_keys: bundle.max_keys,
            created_at_unix_secs: bundle
                .created_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            last_refresh_offer_unix_secs: bundle.last_refresh_offer.map(|t| {
                t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
            }),
        };

        let mut plaintext = Vec::new();
        ciborium::ser::into_writer(&stored, &mut plaintext)
            .map_err(|e| PreKeyStoreError::Corrupt(e.to_string()))?;

        let mut nonce = [0u8; 24];
        self.provider.random_fill(&mut nonce);
        let key = self.wrap_key();
        let ciphertext =
            self.provider.aead_encrypt(&key, &nonce, &plaintext).map_err(PreKeyStoreError::Crypto)?;

        let mut file_contents = Vec::with_capacity(24 + ciphertext.len());
        file_contents.extend_from_slice(&nonce);
        file_contents.extend_from_slice(&ciphertext);

        let path = self.bundle_path(&bundle.peer_pk);
        write_file_mode_0600(&path, &file_contents).map_err(PreKeyStoreError::Persistence)
    }

    /// Generate a fresh 100-key bundle for `peer_pk`, overwriting any prior
    /// bundle.
    ///
    /// # Errors
    ///
    /// Returns [`PreKeyStoreError::Persistence`] if the bundle cannot be
    /// written to disk.
    pub fn generate(&self, peer_pk: IdentityKey) -> Result<(), PreKeyStoreError> {
        let mut rng = PreKeyRng(&*self.provider);
        let bundle = PreKeyBundle::generate(peer_pk, &mut rng);
        self.persist(&bundle)?;
        self.bundles.write().expect("pre-key store lock poisoned").insert(peer_pk.to_bytes(), bundle);
        Ok(())
    }

    /// Atomically consume and return the first unused pre-key offered to
    /// `peer_pk`.
    ///
    /// # Errors
    ///
    /// Returns [`PreKeyStoreError::NoBundle`] if no bundle exists, or
    /// [`PreKeyStoreError::Exhausted`] if the bundle has no unused keys.
    pub fn get_available(&self, peer_pk: &IdentityKey) -> Result<ConsumedPreKey, PreKeyStoreError> {
        let mut bundles = self.bundles.write().expect("pre-key store lock poisoned");
        let bundle = bundles.get_mut(&peer_pk.to_bytes()).ok_or(PreKeyStoreError::NoBundle)?;

        if bundle.keys.is_empty() {
            return Err(PreKeyStoreError::Exhausted);
        }

        let consumed = bundle.keys.remove(0);
        bundle.used_count += 1;
        let (id, keypair) = consumed.into_parts();

        self.persist(bundle)?;
        Ok(ConsumedPreKey { id, keypair })
    }

    /// Public halves of every unused key in `peer_pk`'s bundle, for building
    /// an outbound exchange packet.
    ///
    /// # Errors
    ///
    /// Returns [`PreKeyStoreError::NoBundle`] if no bundle exists for this
    /// peer.
    pub fn public_keys_for(&self, peer_pk: &IdentityKey) -> Result<Vec<(u32, [u8; 32])>, PreKeyStoreError> {
        let bundles = self.bundles.read().expect("pre-key store lock poisoned");
        let bundle = bundles.get(&peer_pk.to_bytes()).ok_or(PreKeyStoreError::NoBundle)?;
        Ok(bundle.public_keys())
    }

    /// True iff `peer_pk` has no bundle, a low-remaining bundle, or an aged
    /// one.
    #[must_use]
    pub fn needs_refresh(&self, peer_pk: &IdentityKey) -> bool {
        let bundles = self.bundles.read().expect("pre-key store lock poisoned");
        bundles.get(&peer_pk.to_bytes()).is_none_or(PreKeyBundle::needs_refresh)
    }

    /// Atomically replace `peer_pk`'s bundle with a freshly generated one.
    ///
    /// Readers never observe an intermediate empty bundle (P4): the old
    /// bundle stays in the map (and on disk) until the new one is fully
    /// generated and persisted, then the map entry is swapped in one step
    /// under the write lock.
    ///
    /// # Errors
    ///
    /// Returns [`PreKeyStoreError::Persistence`] if the new bundle cannot be
    /// written to disk.
    pub fn refresh(&self, peer_pk: IdentityKey) -> Result<(), PreKeyStoreError> {
        let mut rng = PreKeyRng(&*self.provider);
        let new_bundle = PreKeyBundle::generate(peer_pk, &mut rng);
        self.persist(&new_bundle)?;
        self.bundles.write().expect("pre-key store lock poisoned").insert(peer_pk.to_bytes(), new_bundle);
        Ok(())
    }

    /// Remove bundles that are fully consumed or past [`crate::model::MAX_PREKEY_AGE`],
    /// returning the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut bundles = self.bundles.write().expect("pre-key store lock poisoned");
        let expired: Vec<[u8; 64]> = bundles
            .iter()
            .filter(|(_, bundle)| bundle.is_expired())
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            bundles.remove(key);
            let peer_pk = PublicKeyPair {
                signing: key[..32].try_into().expect("32-byte slice"),
                agreement: key[32..].try_into().expect("32-byte slice"),
            };
            let _ = fs::remove_file(self.bundle_path(&peer_pk));
        }

        expired.len()
    }
}

/// Adapts a [`CryptoProvider`] into an [`rand_core::RngCore`] source, so
/// pre-key generation draws randomness through the same injected provider
/// every other operation in this crate uses.
struct PreKeyRng<'a, P: CryptoProvider + ?Sized>(&'a P);

impl<P: CryptoProvider + ?Sized> rand_core::RngCore for PreKeyRng<'_, P> {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.0.random_fill(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.0.random_fill(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.random_fill(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.0.random_fill(dest);
        Ok(())
    }
}

impl<P: CryptoProvider + ?Sized> rand_core::CryptoRng for PreKeyRng<'_, P> {}

#[cfg(unix)]
fn write_file_mode_0600(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::{fs::OpenOptions, io::Write, os::unix::fs::OpenOptionsExt};

    let mut file = OpenOptions::new().create(true).write(true).truncate(true).mode(0o600).open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_file_mode_0600(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    fs::write(path, contents)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::rngs::OsRng;
    use toxcore_async_crypto::DefaultCryptoProvider;

    use super::*;

    fn store(dir: &Path) -> PreKeyStore<DefaultCryptoProvider> {
        let identity = Arc::new(IdentityKeyPair::generate(&mut OsRng));
        PreKeyStore::open(Arc::new(DefaultCryptoProvider::new()), identity, dir).unwrap()
    }

    #[test]
    fn generate_produces_full_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let peer = IdentityKeyPair::generate(&mut OsRng).public();

        store.generate(peer).unwrap();
        assert!(!store.needs_refresh(&peer));
    }

    #[test]
    fn get_available_consumes_exactly_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let peer = IdentityKeyPair::generate(&mut OsRng).public();
        store.generate(peer).unwrap();

        let mut seen_ids = std::collections::HashSet::new();
        for _ in 0..100 {
            let consumed = store.get_available(&peer).unwrap();
            assert!(seen_ids.insert(consumed.id), "pre-key id reused");
        }

        assert!(matches!(store.get_available(&peer), Err(PreKeyStoreError::Exhausted)));
    }

    #[test]
    fn get_available_without_bundle_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let peer = IdentityKeyPair::generate(&mut OsRng).public();
        assert!(matches!(store.get_available(&peer), Err(PreKeyStoreError::NoBundle)));
    }

    #[test]
    fn needs_refresh_once_near_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let peer = IdentityKeyPair::generate(&mut OsRng).public();
        store.generate(peer).unwrap();

        for _ in 0..80 {
            store.get_available(&peer).unwrap();
        }
        assert!(store.needs_refresh(&peer));
    }

    #[test]
    fn refresh_restores_full_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let peer = IdentityKeyPair::generate(&mut OsRng).public();
        store.generate(peer).unwrap();

        for _ in 0..90 {
            store.get_available(&peer).unwrap();
        }
        assert!(store.needs_refresh(&peer));

        store.refresh(peer).unwrap();
        assert!(!store.needs_refresh(&peer));
    }

    #[test]
    fn reopening_store_reloads_bundle_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let identity = Arc::new(IdentityKeyPair::generate(&mut OsRng));
        let peer = IdentityKeyPair::generate(&mut OsRng).public();

        {
            let store =
                PreKeyStore::open(Arc::new(DefaultCryptoProvider::new()), identity.clone(), tmp.path())
                    .unwrap();
            store.generate(peer).unwrap();
        }

        let reopened =
            PreKeyStore::open(Arc::new(DefaultCryptoProvider::new()), identity, tmp.path()).unwrap();
        assert!(!reopened.needs_refresh(&peer));
    }

    #[test]
    fn bundle_from_different_identity_is_skipped_not_errored() {
        let tmp = tempfile::tempdir().unwrap();
        let identity_a = Arc::new(IdentityKeyPair::generate(&mut OsRng));
        let identity_b = Arc::new(IdentityKeyPair::generate(&mut OsRng));
        let peer = IdentityKeyPair::generate(&mut OsRng).public();

        {
            let store =
                PreKeyStore::open(Arc::new(DefaultCryptoProvider::new()), identity_a, tmp.path())
                    .unwrap();
            store.generate(peer).unwrap();
        }

        // identity_b cannot decrypt identity_a's bundle; load_all should
        // silently skip it rather than failing to open.
        let store_b =
            PreKeyStore::open(Arc::new(DefaultCryptoProvider::new()), identity_b, tmp.path())
                .unwrap();
        assert!(store_b.needs_refresh(&peer));
    }
}
