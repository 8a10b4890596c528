//! Welcome to the relay core.
//!
//! A relay holds identities. Each identity is a sparse Merkle tree of claims
//! (which keys it has authorized, and whatever else it cares to say about
//! itself), and the relay keeps one more tree on top, tracking the root of
//! every identity tree it holds along with the names it has handed out. The
//! root of that top tree gets committed to a public ledger every so often, so
//! anyone holding a proof can check it against something the relay can't take
//! back.
//!
//! On top of the trees sit signed packets: small, typed, expiring envelopes an
//! identity signs with one of its operational keys. Each packet carries the
//! proof that the signing key belongs to the issuer, so a verifier needs
//! nothing but the published roots to check it. Identity assertions also
//! answer a one-time nonce so they can't be replayed.
//!
//! Roughly, bottom up:
//!
//! - [`crypto`]: hashing, signing keys, and the sealed key store.
//! - [`merkle`]: the tree itself, and the storage it writes to.
//! - [`claim`]: what goes in the trees, and proofs that it's there.
//! - [`store`]: every identity tree plus the relay tree.
//! - [`publisher`]: gets relay roots onto the ledger.
//! - [`packet`]: signing, verifying, nonces, discovery.
//! - [`relay`]: all of the above wired together.

pub mod error;
pub mod util;
pub mod claim;
pub mod config;
pub mod crypto;
pub mod identity;
pub mod merkle;
pub mod packet;
pub mod publisher;
pub mod relay;
pub mod store;
