//! Cryptographic building blocks: the tagged blake3 hash engine used by every
//! tree, Ed25519 signing keys, and the passphrase-sealed key store that the
//! packet signer draws from.

pub mod hash;
pub mod keystore;
pub mod sign_key;
