//! Ed25519 signing keys, wrapped in enums so another algorithm can be added
//! later without touching every caller.

use crate::{
    error::{Error, Result},
    util::ser::{self, serde_via_string},
};
use rand::{CryptoRng, RngCore};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Algorithm byte for Ed25519, as it appears inside AuthorizeKSign claims.
pub const ALGO_ED25519: u8 = 0;

/// A signature derived from a signing keypair.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SignKeypairSignature {
    Ed25519([u8; 64]),
}

impl SignKeypairSignature {
    /// Parse raw signature bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 64] = bytes.try_into().map_err(|_| Error::BadLength)?;
        Ok(Self::Ed25519(arr))
    }
}

impl AsRef<[u8]> for SignKeypairSignature {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Ed25519(sig) => sig.as_ref(),
        }
    }
}

impl fmt::Display for SignKeypairSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ser::base64_encode(self))
    }
}

impl fmt::Debug for SignKeypairSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignKeypairSignature({})", self)
    }
}

impl FromStr for SignKeypairSignature {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::from_bytes(&ser::base64_decode(s)?)
    }
}

serde_via_string!(SignKeypairSignature);

/// An asymmetric signing keypair. The secret half is wiped on drop.
#[derive(Clone)]
pub enum SignKeypair {
    /// Ed25519 signing keypair
    Ed25519 { public: [u8; 32], secret: Zeroizing<[u8; 32]> },
}

impl SignKeypair {
    /// Create a new ed25519 keypair
    pub fn new_ed25519<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut randbuf = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut *randbuf);
        Self::new_ed25519_from_bytes(*randbuf)
    }

    /// Create a new ed25519 keypair from a cryptographic seed
    pub fn new_ed25519_from_bytes(secret_bytes: [u8; 32]) -> Self {
        let secret = ed25519_consensus::SigningKey::from(secret_bytes);
        Self::Ed25519 {
            public: secret.verification_key().to_bytes(),
            secret: Zeroizing::new(secret_bytes),
        }
    }

    /// Sign a message.
    pub fn sign(&self, data: &[u8]) -> SignKeypairSignature {
        match self {
            Self::Ed25519 { secret, .. } => {
                let seckey = ed25519_consensus::SigningKey::from(**secret);
                SignKeypairSignature::Ed25519(seckey.sign(data).to_bytes())
            }
        }
    }

    /// Verify a value with a detached signature.
    pub fn verify(&self, signature: &SignKeypairSignature, data: &[u8]) -> Result<()> {
        self.public().verify(signature, data)
    }

    /// Grab the public half of this keypair.
    pub fn public(&self) -> SignKeypairPublic {
        match self {
            Self::Ed25519 { public, .. } => SignKeypairPublic::Ed25519(*public),
        }
    }

    /// The raw secret seed. Only the key store should be touching this.
    pub(crate) fn secret_bytes(&self) -> &[u8; 32] {
        match self {
            Self::Ed25519 { secret, .. } => secret,
        }
    }
}

impl fmt::Debug for SignKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print secrets, not even in tests
        write!(f, "SignKeypair({})", self.public())
    }
}

impl PartialEq for SignKeypair {
    fn eq(&self, other: &Self) -> bool {
        self.public() == other.public()
    }
}

/// An asymmetric signing public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignKeypairPublic {
    /// Ed25519 signing public key
    Ed25519([u8; 32]),
}

impl SignKeypairPublic {
    /// Rebuild a public key from the algorithm byte and key bytes stored in a
    /// claim.
    pub fn from_algo_bytes(algo: u8, bytes: [u8; 32]) -> Option<Self> {
        match algo {
            ALGO_ED25519 => Some(Self::Ed25519(bytes)),
            _ => None,
        }
    }

    /// The algorithm byte for this key.
    pub fn algo(&self) -> u8 {
        match self {
            Self::Ed25519(_) => ALGO_ED25519,
        }
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        match self {
            Self::Ed25519(bytes) => bytes,
        }
    }

    /// Verify a value with a detached signature given the public key of the
    /// signer.
    pub fn verify(&self, signature: &SignKeypairSignature, data: &[u8]) -> Result<()> {
        match (self, signature) {
            (Self::Ed25519(pubkey_bytes), SignKeypairSignature::Ed25519(sig_bytes)) => {
                let pubkey = ed25519_consensus::VerificationKey::try_from(*pubkey_bytes)
                    .map_err(|_| Error::CryptoSignatureVerificationFailed)?;
                let sig = ed25519_consensus::Signature::from(*sig_bytes);
                pubkey.verify(&sig, data).map_err(|_| Error::CryptoSignatureVerificationFailed)
            }
        }
    }
}

impl fmt::Display for SignKeypairPublic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ser::base64_encode(self.as_bytes()))
    }
}

impl fmt::Debug for SignKeypairPublic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignKeypairPublic({})", self)
    }
}

impl FromStr for SignKeypairPublic {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; 32] = ser::base64_decode(s)?.try_into().map_err(|_| Error::BadLength)?;
        Ok(Self::Ed25519(bytes))
    }
}

serde_via_string!(SignKeypairPublic);
