//! Identity IDs.
//!
//! An identity is named by the tree it was born with: we build a throwaway
//! tree holding the three genesis key claims and take the front of its root.
//! Same keys, same ID, on any relay.
//!
//! ```text
//! type (2) || genesis (27) || checksum (2)
//! ```
//!
//! The checksum is the little-endian u16 sum of the first 29 bytes. It won't
//! stop an attacker, but it catches typos and truncation in pasted IDs.

use crate::{
    claim::{Claim, ClaimAuthorizeKSign, KeyUsage},
    crypto::sign_key::SignKeypairPublic,
    error::{Error, Result},
    merkle::{MemStorage, MerkleTree},
    util::ser::{self, serde_via_string},
};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Length of an identity ID.
pub const ID_BYTES: usize = 31;
const GENESIS_BYTES: usize = 27;

/// The only ID type so far.
pub const TYPE_DEFAULT: [u8; 2] = [0x00, 0x00];

/// A relay identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityID([u8; ID_BYTES]);

impl IdentityID {
    /// Assemble an ID from its type and genesis bytes, computing the checksum.
    pub fn from_parts(ty: [u8; 2], genesis: [u8; GENESIS_BYTES]) -> Self {
        let mut bytes = [0u8; ID_BYTES];
        bytes[..2].copy_from_slice(&ty);
        bytes[2..29].copy_from_slice(&genesis);
        let checksum = checksum(&bytes[..29]);
        bytes[29..].copy_from_slice(&checksum.to_le_bytes());
        Self(bytes)
    }

    /// Parse raw ID bytes, checking length and checksum.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; ID_BYTES] = bytes.try_into().map_err(|_| Error::IdentityIDInvalid)?;
        let expected = checksum(&bytes[..29]).to_le_bytes();
        if bytes[29..] != expected {
            return Err(Error::IdentityIDInvalid);
        }
        Ok(Self(bytes))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// The two type bytes.
    pub fn id_type(&self) -> [u8; 2] {
        [self.0[0], self.0[1]]
    }
}

fn checksum(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |acc, b| acc.wrapping_add(*b as u16))
}

impl fmt::Display for IdentityID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ser::base64_encode(self.0))
    }
}

impl fmt::Debug for IdentityID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityID({})", self)
    }
}

impl FromStr for IdentityID {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let bytes = ser::base64_decode(s).map_err(|_| Error::IdentityIDInvalid)?;
        Self::from_bytes(&bytes)
    }
}

serde_via_string!(IdentityID);

/// The genesis claims for a set of keys, in insertion order: operational,
/// recovery, revocation.
pub fn genesis_claims(op: &SignKeypairPublic, rec: &SignKeypairPublic, rev: &SignKeypairPublic) -> [Claim; 3] {
    [
        ClaimAuthorizeKSign::new(0, *op, KeyUsage::OPERATIONAL).into(),
        ClaimAuthorizeKSign::new(0, *rec, KeyUsage::RECOVERY).into(),
        ClaimAuthorizeKSign::new(0, *rev, KeyUsage::REVOCATION).into(),
    ]
}

/// Work out the ID a set of genesis keys produces, along with the claims that
/// seed the identity's tree.
pub fn calculate_genesis(
    op: &SignKeypairPublic,
    rec: &SignKeypairPublic,
    rev: &SignKeypairPublic,
    max_levels: usize,
) -> Result<(IdentityID, [Claim; 3])> {
    let claims = genesis_claims(op, rec, rev);
    let mut tree = MerkleTree::new(Arc::new(MemStorage::new()), max_levels)?;
    for claim in &claims {
        tree.insert(&claim.entry())?;
    }
    let mut genesis = [0u8; GENESIS_BYTES];
    genesis.copy_from_slice(&tree.root().as_bytes()[..GENESIS_BYTES]);
    Ok((IdentityID::from_parts(TYPE_DEFAULT, genesis), claims))
}
