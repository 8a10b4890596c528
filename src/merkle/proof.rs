//! Merkle proofs, and their compact wire encoding.
//!
//! ```text
//! [0]                  format (0x01)
//! [1]                  flags: bit 0 existence, bit 1 aux leaf present
//! [2]                  depth (number of levels walked)
//! [3..3+ceil(depth/8)] bitmap, bit i set when the sibling at level i is non-empty
//! ...                  the non-empty siblings, 32 bytes each, in level order
//! ...                  aux leaf (hindex || hvalue), only when flagged
//! ```

use crate::{
    crypto::hash::Hash,
    error::{Error, Result},
    util::ser::{self, serde_via_string},
};
use std::fmt;
use std::str::FromStr;

const PROOF_FORMAT: u8 = 0x01;
const FLAG_EXISTENCE: u8 = 0b01;
const FLAG_AUX: u8 = 0b10;

/// A different leaf that occupies the spot where the key we're proving absent
/// would sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofAux {
    pub hindex: Hash,
    pub hvalue: Hash,
}

/// A path from a leaf (or the empty spot where it would be) up to a root.
#[derive(Clone, PartialEq, Eq, getset::Getters, getset::CopyGetters)]
pub struct Proof {
    /// Whether this proves existence (true) or non-existence (false).
    #[getset(get_copy = "pub")]
    existence: bool,
    /// Siblings from the root down (index 0 is level 0), empties included.
    #[getset(get = "pub")]
    siblings: Vec<Hash>,
    /// Set when non-existence is shown by a divergent leaf rather than an empty
    /// slot.
    #[getset(get = "pub")]
    aux: Option<ProofAux>,
}

impl Proof {
    pub(crate) fn new(existence: bool, siblings: Vec<Hash>, aux: Option<ProofAux>) -> Self {
        Self { existence, siblings, aux }
    }

    /// How many levels down the terminal node sits.
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// Fold a node hash at the bottom of this path up to the root it implies.
    pub fn root_from(&self, node: Hash, hindex: &Hash) -> Hash {
        self.siblings.iter().enumerate().rev().fold(node, |acc, (lvl, sibling)| {
            if hindex.bit(lvl) {
                Hash::middle(sibling, &acc)
            } else {
                Hash::middle(&acc, sibling)
            }
        })
    }

    /// Check this proof against `root` for the leaf `(hindex, hvalue)`.
    ///
    /// For non-existence proofs `hvalue` is ignored: the proof shows that
    /// nothing lives under `hindex` at all.
    pub fn verify(&self, root: &Hash, hindex: &Hash, hvalue: &Hash) -> bool {
        if self.existence {
            return self.aux.is_none() && &self.root_from(Hash::leaf(hindex, hvalue), hindex) == root;
        }
        match &self.aux {
            Some(aux) => {
                // the divergent leaf has to actually sit on our path
                if &aux.hindex == hindex || !(0..self.depth()).all(|i| aux.hindex.bit(i) == hindex.bit(i)) {
                    return false;
                }
                &self.root_from(Hash::leaf(&aux.hindex, &aux.hvalue), hindex) == root
            }
            None => &self.root_from(Hash::EMPTY, hindex) == root,
        }
    }

    /// Compact binary form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let depth = self.depth();
        let mut flags = 0u8;
        if self.existence {
            flags |= FLAG_EXISTENCE;
        }
        if self.aux.is_some() {
            flags |= FLAG_AUX;
        }
        let mut bitmap = vec![0u8; (depth + 7) / 8];
        let mut siblings = Vec::new();
        for (lvl, sibling) in self.siblings.iter().enumerate() {
            if !sibling.is_empty() {
                bitmap[lvl / 8] |= 1 << (lvl % 8);
                siblings.extend_from_slice(sibling.as_bytes());
            }
        }
        let mut out = vec![PROOF_FORMAT, flags, depth as u8];
        out.extend_from_slice(&bitmap);
        out.extend_from_slice(&siblings);
        if let Some(aux) = &self.aux {
            out.extend_from_slice(aux.hindex.as_bytes());
            out.extend_from_slice(aux.hvalue.as_bytes());
        }
        out
    }

    /// Parse the compact binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (header, rest) = match bytes {
            [format, flags, depth, rest @ ..] => ([*format, *flags, *depth], rest),
            _ => return Err(Error::MerkleMalformed("proof too short")),
        };
        let [format, flags, depth] = header;
        if format != PROOF_FORMAT {
            return Err(Error::MerkleMalformed("unknown proof format"));
        }
        if flags & !(FLAG_EXISTENCE | FLAG_AUX) != 0 {
            return Err(Error::MerkleMalformed("unknown proof flags"));
        }
        let existence = flags & FLAG_EXISTENCE != 0;
        let has_aux = flags & FLAG_AUX != 0;
        if existence && has_aux {
            return Err(Error::MerkleMalformed("existence proof with aux leaf"));
        }
        let depth = depth as usize;
        let bitmap_len = (depth + 7) / 8;
        if rest.len() < bitmap_len {
            return Err(Error::MerkleMalformed("proof truncated"));
        }
        let (bitmap, mut rest) = rest.split_at(bitmap_len);
        // no stray bits past the depth
        if (depth..bitmap_len * 8).any(|i| bitmap[i / 8] >> (i % 8) & 1 == 1) {
            return Err(Error::MerkleMalformed("bitmap bits past depth"));
        }
        let mut siblings = Vec::with_capacity(depth);
        for lvl in 0..depth {
            if bitmap[lvl / 8] >> (lvl % 8) & 1 == 1 {
                if rest.len() < 32 {
                    return Err(Error::MerkleMalformed("proof truncated"));
                }
                let (sibling, tail) = rest.split_at(32);
                let sibling = Hash::try_from_slice(sibling)?;
                if sibling.is_empty() {
                    return Err(Error::MerkleMalformed("empty sibling marked present"));
                }
                siblings.push(sibling);
                rest = tail;
            } else {
                siblings.push(Hash::EMPTY);
            }
        }
        let aux = if has_aux {
            if rest.len() != 64 {
                return Err(Error::MerkleMalformed("bad aux leaf"));
            }
            let aux = ProofAux {
                hindex: Hash::try_from_slice(&rest[..32])?,
                hvalue: Hash::try_from_slice(&rest[32..])?,
            };
            rest = &[];
            Some(aux)
        } else {
            None
        };
        if !rest.is_empty() {
            return Err(Error::MerkleMalformed("trailing bytes after proof"));
        }
        Ok(Self { existence, siblings, aux })
    }
}

impl fmt::Display for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ser::hex_encode(self.to_bytes()))
    }
}

impl fmt::Debug for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proof({})", self)
    }
}

impl FromStr for Proof {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::from_bytes(&ser::hex_decode(s)?)
    }
}

serde_via_string!(Proof);
