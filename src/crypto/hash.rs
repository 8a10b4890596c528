//! The hash engine behind every tree in the relay.
//!
//! Everything is blake3 with a single domain byte up front, so a leaf can never
//! be mistaken for a middle node (or a name for a claim element) even if the
//! bytes being hashed happen to line up.

use crate::{
    error::{Error, Result},
    util::ser::{self, serde_via_string},
};
use std::fmt;
use std::str::FromStr;

/// Width of a single field element.
pub const ELEM_BYTES: usize = 32;

/// One field element of an entry.
pub type ElemBytes = [u8; ELEM_BYTES];

/// Domain separation tags. Each use of the hash engine gets its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HashTag {
    /// Hashing a run of entry elements (HIndex / HValue).
    Elems = 0x00,
    /// A middle node: `H(0x01 || left || right)`.
    Middle = 0x01,
    /// A leaf node: `H(0x02 || hindex || hvalue)`.
    Leaf = 0x02,
    /// A human-readable name, for AssignName claims.
    Name = 0x03,
}

/// A 32-byte hash. The all-zero hash is reserved to mean "empty node."
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// The hash of an empty subtree.
    pub const EMPTY: Hash = Hash([0u8; 32]);

    /// Wrap raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash a set of byte slices under the given domain tag.
    pub fn tagged(tag: HashTag, parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[tag as u8]);
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Hash a run of field elements.
    pub fn elems(elems: &[ElemBytes]) -> Self {
        let parts = elems.iter().map(|e| e.as_slice()).collect::<Vec<_>>();
        Self::tagged(HashTag::Elems, &parts)
    }

    /// Hash a middle node from its children.
    pub fn middle(left: &Hash, right: &Hash) -> Self {
        Self::tagged(HashTag::Middle, &[left.as_bytes(), right.as_bytes()])
    }

    /// Hash a leaf node from its HIndex/HValue.
    pub fn leaf(hindex: &Hash, hvalue: &Hash) -> Self {
        Self::tagged(HashTag::Leaf, &[hindex.as_bytes(), hvalue.as_bytes()])
    }

    /// Hash a name.
    pub fn name(name: &str) -> Self {
        Self::tagged(HashTag::Name, &[name.as_bytes()])
    }

    /// Grab the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Is this the empty hash?
    pub fn is_empty(&self) -> bool {
        self == &Self::EMPTY
    }

    /// Path bit `i` of this hash when used as a tree key: bit `i % 8`, LSB
    /// first, of byte `i / 8`.
    pub fn bit(&self, i: usize) -> bool {
        (self.0[i / 8] >> (i % 8)) & 1 == 1
    }

    /// Try to build a hash from a slice.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| Error::BadLength)?;
        Ok(Self(arr))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ser::hex_encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl FromStr for Hash {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(ser::hex_decode_array(s)?))
    }
}

serde_via_string!(Hash);
