//! The main error enum for the project lives here, and documents the various
//! conditions that can arise while interacting with the relay.
//!
//! Errors are grouped by the part of the system that raises them. Verification
//! errors are deliberately fine-grained: a caller auditing a failed packet needs
//! to tell "bad signature" apart from "expired" apart from "replayed".

use thiserror::Error;

/// This is our error enum. It contains an entry for any part of the system in
/// which an expectation is not met or a problem occurs.
#[derive(Error, Debug)]
pub enum Error {
    /// A byte value had the wrong length for the type it was decoded into.
    #[error("bad length")]
    BadLength,

    /// Claim entry has a reserved byte set, an out-of-range field, or an
    /// invalid flag combination.
    #[error("malformed claim entry: {0}")]
    ClaimMalformed(&'static str),

    /// The claim we asked a proof for has been superseded by its next version.
    #[error("claim has been revoked")]
    ClaimRevoked,

    /// The claim type tag in an entry is not one we know.
    #[error("unknown claim type {0}")]
    ClaimUnknownVariant(u64),

    /// Failed to open a sealed secret (bad passphrase or tampered data).
    #[error("failed to open a sealed object")]
    CryptoOpenFailed,

    /// Could not derive a key from a passphrase.
    #[error("key derivation from passphrase failed")]
    CryptoKDFFailed,

    /// Failed to seal a secret.
    #[error("failed to seal a secret")]
    CryptoSealFailed,

    /// A signature failed to verify.
    #[error("the given signature/public key/data combo does not verify")]
    CryptoSignatureVerificationFailed,

    /// An error while decoding base64.
    #[error("base64 decode error")]
    DeserializeBase64(#[from] base64::DecodeError),

    /// An error while decoding hex.
    #[error("hex decode error")]
    DeserializeHex(#[from] hex::FromHexError),

    /// An identity ID failed to parse (bad length or checksum).
    #[error("invalid identity id")]
    IdentityIDInvalid,

    /// The key handle does not exist in the key store.
    #[error("key not found in key store")]
    KeyStoreKeyNotFound,

    /// The key exists but has not been unlocked.
    #[error("key is locked")]
    KeyStoreLocked,

    /// Insertion would need more levels than the tree allows.
    #[error("tree depth exceeded")]
    MerkleDepthExceeded,

    /// A different entry already lives under this HIndex. Trees are append-only.
    #[error("an entry with the same hindex and a different hvalue already exists")]
    MerkleDuplicateKey,

    /// A non-existence proof was requested for an entry that exists.
    #[error("entry exists in the tree")]
    MerkleEntryExists,

    /// A node referenced by the tree is missing from storage.
    #[error("node missing from storage")]
    MerkleNodeMissing,

    /// The entry (or root) asked for is not in the tree.
    #[error("entry not found")]
    MerkleNotFound,

    /// A stored node or encoded proof could not be decoded.
    #[error("malformed merkle data: {0}")]
    MerkleMalformed(&'static str),

    /// No nonce with this value is outstanding (never issued, or already
    /// consumed).
    #[error("unknown nonce")]
    NonceUnknown,

    /// The nonce existed but expired before it was consumed.
    #[error("nonce expired")]
    NonceExpired,

    /// The nonce was issued for a different origin.
    #[error("nonce origin mismatch")]
    NonceOriginMismatch,

    /// Packet `iat + ttl` is in the past.
    #[error("packet expired")]
    PacketExpired,

    /// A proof of claim inside the packet does not verify.
    #[error("invalid proof of claim")]
    PacketInvalidProof,

    /// The packet signature does not verify with the authorized key.
    #[error("invalid packet signature")]
    PacketInvalidSignature,

    /// The signing key claim is not an operational AuthorizeKSign claim of the
    /// issuer.
    #[error("signing key is not authorized for the issuer")]
    PacketKeyNotAuthorized,

    /// The packet could not be decoded, or is not in canonical form.
    #[error("malformed packet: {0}")]
    PacketMalformed(&'static str),

    /// The asserted name does not belong to the issuer.
    #[error("name does not resolve to the issuer")]
    PacketNameMismatch,

    /// The proof cites a root we never saw published, or one too old.
    #[error("proof root is stale or unknown")]
    PacketStaleRoot,

    /// The packet type tag is not one we know.
    #[error("unknown packet type: {0}")]
    PacketUnknownType(String),

    /// Trust gating was requested and the issuer is not trusted.
    #[error("issuer is not trusted")]
    PacketUntrustedIssuer,

    /// The ledger refused or failed to take our root. Retryable.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// An error while reading/writing json.
    #[error("json error")]
    SerializeJson(#[from] serde_json::Error),

    /// An error while reading yaml.
    #[error("yaml error")]
    SerializeYaml(#[from] serde_yaml::Error),

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Genesis was called for an identity that already has a tree.
    #[error("identity already exists")]
    StoreIdentityExists,

    /// That claim type is written by the relay into its own tree, never into
    /// an identity tree.
    #[error("claim type only lives in the relay tree")]
    StoreRelayOnlyClaim,

    /// No tree exists for the given identity.
    #[error("unknown identity")]
    StoreUnknownIdentity,

    /// A claim's previous version isn't in the tree.
    #[error("previous version of the claim is missing")]
    StoreVersionGap,
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        // serde_json::Error and friends are not comparable, so compare the
        // debug form. good enough for asserting in tests.
        format!("{:?}", self) == format!("{:?}", other)
    }
}

/// Wraps `std::result::Result` around our `Error` enum
pub type Result<T> = std::result::Result<T, Error>;
