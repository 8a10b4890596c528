//! A small passphrase-protected key store.
//!
//! Secrets are sealed at rest with XChaCha20-Poly1305 under a key stretched
//! from the passphrase with Argon2id. Unlocking a key keeps the opened keypair
//! in memory (zeroized on drop) until it's locked again, which is what the
//! packet signer needs: `sign(handle, message)` without a passphrase prompt per
//! packet.

use crate::{
    crypto::sign_key::{SignKeypair, SignKeypairPublic, SignKeypairSignature},
    error::{Error, Result},
    util,
};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::{CryptoRng, RngCore};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// A constant that provides a default for CPU difficulty for interactive key derivation
pub const KDF_OPS_INTERACTIVE: u32 = 2;
/// A constant that provides a default for mem difficulty for interactive key derivation
pub const KDF_MEM_INTERACTIVE: u32 = 65536;

/// Keys are looked up by their public half.
pub type KeyHandle = SignKeypairPublic;

/// Argon2id cost parameters for the key store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, getset::CopyGetters)]
#[getset(get_copy = "pub")]
#[serde(default)]
pub struct KeyStoreParams {
    /// Argon2 iterations
    ops: u32,
    /// Argon2 memory, in KiB
    mem: u32,
}

impl KeyStoreParams {
    /// Create a new set of params.
    pub fn new(ops: u32, mem: u32) -> Self {
        Self { ops, mem }
    }
}

impl Default for KeyStoreParams {
    fn default() -> Self {
        Self::new(KDF_OPS_INTERACTIVE, KDF_MEM_INTERACTIVE)
    }
}

/// Derive a symmetric key from a passphrase and salt.
pub fn derive_secret_key(passphrase: &[u8], salt: &[u8; 16], params: &KeyStoreParams) -> Result<Zeroizing<[u8; 32]>> {
    const LEN: usize = 32;
    let mut key = Zeroizing::new([0u8; LEN]);
    let argon2_ctx = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::new(params.mem(), params.ops(), 1, Some(LEN)).map_err(|_| Error::CryptoKDFFailed)?,
    );
    argon2_ctx
        .hash_password_into(passphrase, salt, &mut *key)
        .map_err(|_| Error::CryptoKDFFailed)?;
    Ok(key)
}

/// A secret seed sealed under a passphrase-derived key.
#[derive(Clone)]
struct SealedKey {
    salt: [u8; 16],
    nonce: [u8; 24],
    ciphertext: Vec<u8>,
}

impl SealedKey {
    fn seal<R: RngCore + CryptoRng>(rng: &mut R, params: &KeyStoreParams, passphrase: &[u8], secret: &[u8; 32]) -> Result<Self> {
        let mut salt = [0u8; 16];
        let mut nonce = [0u8; 24];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);
        let key = derive_secret_key(passphrase, &salt, params)?;
        let cipher = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key.as_slice()));
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), secret.as_slice())
            .map_err(|_| Error::CryptoSealFailed)?;
        Ok(Self { salt, nonce, ciphertext })
    }

    fn open(&self, params: &KeyStoreParams, passphrase: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let key = derive_secret_key(passphrase, &self.salt, params)?;
        let cipher = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key.as_slice()));
        let opened = Zeroizing::new(
            cipher
                .decrypt(XNonce::from_slice(&self.nonce), self.ciphertext.as_slice())
                .map_err(|_| Error::CryptoOpenFailed)?,
        );
        let mut secret = Zeroizing::new([0u8; 32]);
        if opened.len() != secret.len() {
            return Err(Error::CryptoOpenFailed);
        }
        secret.copy_from_slice(&opened);
        Ok(secret)
    }
}

struct Slot {
    sealed: SealedKey,
    unlocked: Option<SignKeypair>,
}

/// Holds sealed signing keys, and the opened copies of the ones currently
/// unlocked.
pub struct KeyStore {
    params: KeyStoreParams,
    slots: RwLock<HashMap<KeyHandle, Slot>>,
}

impl KeyStore {
    /// Create an empty key store.
    pub fn new(params: KeyStoreParams) -> Self {
        Self {
            params,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Seal an existing ed25519 seed under `passphrase` and store it, locked.
    pub fn import_key<R: RngCore + CryptoRng>(&self, rng: &mut R, secret: [u8; 32], passphrase: &[u8]) -> Result<KeyHandle> {
        let keypair = SignKeypair::new_ed25519_from_bytes(secret);
        let sealed = SealedKey::seal(rng, &self.params, passphrase, keypair.secret_bytes())?;
        let handle = keypair.public();
        util::write(&self.slots).insert(handle, Slot { sealed, unlocked: None });
        info!(key = %handle, "key imported");
        Ok(handle)
    }

    /// Generate a brand new key and store it, locked.
    pub fn new_key<R: RngCore + CryptoRng>(&self, rng: &mut R, passphrase: &[u8]) -> Result<KeyHandle> {
        let mut seed = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut *seed);
        self.import_key(rng, *seed, passphrase)
    }

    /// Open a key with its passphrase so it can sign.
    pub fn unlock(&self, handle: &KeyHandle, passphrase: &[u8]) -> Result<()> {
        let sealed = {
            let slots = util::read(&self.slots);
            slots.get(handle).ok_or(Error::KeyStoreKeyNotFound)?.sealed.clone()
        };
        // argon2 is slow on purpose, keep it outside the lock
        let secret = sealed.open(&self.params, passphrase)?;
        let keypair = SignKeypair::new_ed25519_from_bytes(*secret);
        if &keypair.public() != handle {
            return Err(Error::CryptoOpenFailed);
        }
        let mut slots = util::write(&self.slots);
        let slot = slots.get_mut(handle).ok_or(Error::KeyStoreKeyNotFound)?;
        slot.unlocked = Some(keypair);
        debug!(key = %handle, "key unlocked");
        Ok(())
    }

    /// Drop the opened copy of a key.
    pub fn lock(&self, handle: &KeyHandle) -> Result<()> {
        let mut slots = util::write(&self.slots);
        let slot = slots.get_mut(handle).ok_or(Error::KeyStoreKeyNotFound)?;
        slot.unlocked = None;
        debug!(key = %handle, "key locked");
        Ok(())
    }

    /// Sign a message with an unlocked key.
    pub fn sign(&self, handle: &KeyHandle, message: &[u8]) -> Result<SignKeypairSignature> {
        let slots = util::read(&self.slots);
        let slot = slots.get(handle).ok_or(Error::KeyStoreKeyNotFound)?;
        let keypair = slot.unlocked.as_ref().ok_or(Error::KeyStoreLocked)?;
        Ok(keypair.sign(message))
    }

    /// Public key behind a handle.
    pub fn public(&self, handle: &KeyHandle) -> Result<SignKeypairPublic> {
        let slots = util::read(&self.slots);
        slots.get(handle).ok_or(Error::KeyStoreKeyNotFound)?;
        Ok(*handle)
    }

    /// Whether the key is currently unlocked.
    pub fn is_unlocked(&self, handle: &KeyHandle) -> bool {
        util::read(&self.slots).get(handle).map(|slot| slot.unlocked.is_some()).unwrap_or(false)
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new(KeyStoreParams::default())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Cheap argon2 settings so tests don't crawl.
    pub(crate) fn test_params() -> KeyStoreParams {
        KeyStoreParams::new(1, 4096)
    }

    #[test]
    fn derive_is_deterministic() {
        let salt = [3u8; 16];
        let key1 = derive_secret_key(b"ZONING IS COMMUNISM", &salt, &test_params()).unwrap();
        let key2 = derive_secret_key(b"ZONING IS COMMUNISM", &salt, &test_params()).unwrap();
        let key3 = derive_secret_key(b"zoning is communism", &salt, &test_params()).unwrap();
        assert_eq!(*key1, *key2);
        assert_ne!(*key1, *key3);
    }

    #[test]
    fn unlock_sign_lock() {
        let mut rng = crate::util::test::rng();
        let store = KeyStore::new(test_params());
        let handle = store.new_key(&mut rng, b"hunter2").unwrap();
        assert!(!store.is_unlocked(&handle));
        assert_eq!(store.sign(&handle, b"hello"), Err(Error::KeyStoreLocked));

        assert_eq!(store.unlock(&handle, b"hunter3"), Err(Error::CryptoOpenFailed));
        store.unlock(&handle, b"hunter2").unwrap();
        assert!(store.is_unlocked(&handle));
        let sig = store.sign(&handle, b"hello").unwrap();
        assert_eq!(handle.verify(&sig, b"hello"), Ok(()));

        store.lock(&handle).unwrap();
        assert_eq!(store.sign(&handle, b"hello"), Err(Error::KeyStoreLocked));
    }

    #[test]
    fn import_matches_keypair() {
        let mut rng = crate::util::test::rng();
        let store = KeyStore::new(test_params());
        let keypair = SignKeypair::new_ed25519_from_bytes([17; 32]);
        let handle = store.import_key(&mut rng, [17; 32], b"pass").unwrap();
        assert_eq!(handle, keypair.public());
        assert_eq!(store.public(&handle), Ok(keypair.public()));
        store.unlock(&handle, b"pass").unwrap();
        assert_eq!(store.sign(&handle, b"msg").unwrap(), keypair.sign(b"msg"));
    }

    #[test]
    fn unknown_handle() {
        let store = KeyStore::new(test_params());
        let stranger = SignKeypair::new_ed25519_from_bytes([1; 32]).public();
        assert_eq!(store.unlock(&stranger, b"x"), Err(Error::KeyStoreKeyNotFound));
        assert_eq!(store.sign(&stranger, b"x"), Err(Error::KeyStoreKeyNotFound));
        assert_eq!(store.lock(&stranger), Err(Error::KeyStoreKeyNotFound));
        assert_eq!(store.public(&stranger), Err(Error::KeyStoreKeyNotFound));
    }
}
