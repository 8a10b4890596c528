//! The fixed-width unit every tree stores.

use crate::{
    crypto::hash::{ElemBytes, Hash, ELEM_BYTES},
    error::{Error, Result},
    util::ser::{self, serde_via_string},
};
use std::fmt;
use std::str::FromStr;

/// Number of elements in an entry.
pub const ENTRY_ELEMS: usize = 8;
/// Size of an encoded entry.
pub const ENTRY_BYTES: usize = ENTRY_ELEMS * ELEM_BYTES;

/// Eight 32-byte elements. The first four are the index half (hashed into the
/// HIndex, which is where the entry lives in a tree), the last four the value
/// half (hashed into the HValue).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entry {
    data: [ElemBytes; ENTRY_ELEMS],
}

impl Entry {
    /// Build an entry from its index and value halves.
    pub fn new(index: [ElemBytes; 4], value: [ElemBytes; 4]) -> Self {
        let mut data = [[0u8; ELEM_BYTES]; ENTRY_ELEMS];
        data[..4].copy_from_slice(&index);
        data[4..].copy_from_slice(&value);
        Self { data }
    }

    /// Build an entry from all eight elements.
    pub fn from_elems(data: [ElemBytes; ENTRY_ELEMS]) -> Self {
        Self { data }
    }

    /// All elements.
    pub fn elems(&self) -> &[ElemBytes; ENTRY_ELEMS] {
        &self.data
    }

    /// Mutable access, used by the claim codec when assembling entries.
    pub(crate) fn elems_mut(&mut self) -> &mut [ElemBytes; ENTRY_ELEMS] {
        &mut self.data
    }

    /// The index half.
    pub fn index(&self) -> &[ElemBytes] {
        &self.data[..4]
    }

    /// The value half.
    pub fn value(&self) -> &[ElemBytes] {
        &self.data[4..]
    }

    /// The tree key of this entry.
    pub fn hindex(&self) -> Hash {
        Hash::elems(self.index())
    }

    /// The integrity value of this entry.
    pub fn hvalue(&self) -> Hash {
        Hash::elems(self.value())
    }

    /// The hash of the leaf node holding this entry.
    pub fn leaf_hash(&self) -> Hash {
        Hash::leaf(&self.hindex(), &self.hvalue())
    }

    /// Flatten into bytes.
    pub fn to_bytes(&self) -> [u8; ENTRY_BYTES] {
        let mut out = [0u8; ENTRY_BYTES];
        for (chunk, elem) in out.chunks_exact_mut(ELEM_BYTES).zip(self.data.iter()) {
            chunk.copy_from_slice(elem);
        }
        out
    }

    /// Read an entry back out of bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ENTRY_BYTES {
            return Err(Error::BadLength);
        }
        let mut data = [[0u8; ELEM_BYTES]; ENTRY_ELEMS];
        for (elem, chunk) in data.iter_mut().zip(bytes.chunks_exact(ELEM_BYTES)) {
            elem.copy_from_slice(chunk);
        }
        Ok(Self { data })
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            data: [[0u8; ELEM_BYTES]; ENTRY_ELEMS],
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ser::hex_encode(self.to_bytes()))
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entry({})", self)
    }
}

impl FromStr for Entry {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::from_bytes(&ser::hex_decode(s)?)
    }
}

serde_via_string!(Entry);
