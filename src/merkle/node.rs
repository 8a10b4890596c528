use crate::{
    claim::{Entry, ENTRY_BYTES},
    crypto::hash::{Hash, HashTag},
    error::{Error, Result},
};

/// A node in the tree. Empty nodes are never stored; their hash is all zeros.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Empty,
    Leaf(Entry),
    Middle { left: Hash, right: Hash },
}

impl Node {
    /// A middle node with `child` placed on the side selected by `bit`, and
    /// `sibling` on the other.
    pub fn middle_with(bit: bool, child: Hash, sibling: Hash) -> Self {
        if bit {
            Self::Middle { left: sibling, right: child }
        } else {
            Self::Middle { left: child, right: sibling }
        }
    }

    /// Hash of this node.
    pub fn hash(&self) -> Hash {
        match self {
            Self::Empty => Hash::EMPTY,
            Self::Leaf(entry) => entry.leaf_hash(),
            Self::Middle { left, right } => Hash::middle(left, right),
        }
    }

    /// Storage encoding: a tag byte then the node body.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Empty => vec![HashTag::Elems as u8],
            Self::Leaf(entry) => {
                let mut out = Vec::with_capacity(1 + ENTRY_BYTES);
                out.push(HashTag::Leaf as u8);
                out.extend_from_slice(&entry.to_bytes());
                out
            }
            Self::Middle { left, right } => {
                let mut out = Vec::with_capacity(65);
                out.push(HashTag::Middle as u8);
                out.extend_from_slice(left.as_bytes());
                out.extend_from_slice(right.as_bytes());
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes.split_first() {
            Some((tag, body)) if *tag == HashTag::Leaf as u8 => {
                let entry = Entry::from_bytes(body).map_err(|_| Error::MerkleMalformed("bad leaf node"))?;
                Ok(Self::Leaf(entry))
            }
            Some((tag, body)) if *tag == HashTag::Middle as u8 && body.len() == 64 => Ok(Self::Middle {
                left: Hash::try_from_slice(&body[..32])?,
                right: Hash::try_from_slice(&body[32..])?,
            }),
            Some((tag, body)) if *tag == HashTag::Elems as u8 && body.is_empty() => Ok(Self::Empty),
            _ => Err(Error::MerkleMalformed("unknown node encoding")),
        }
    }
}
