//! A sparse Merkle tree over claim entries.
//!
//! Entries are addressed by the bits of their HIndex, so there's no balancing
//! and the shape of the tree depends only on which entries are in it, never on
//! the order they went in. The tree is compressed: a leaf sits at the
//! shallowest level where its path prefix is unique, and gets pushed down (with
//! middle nodes filling the gap) only when another leaf shows up sharing that
//! prefix.
//!
//! Nodes are stored by hash and never deleted. That makes the tree an
//! append-only log with every historical root still walkable, which is what
//! lets the relay hand out proofs against whatever root it last published
//! (see the `*_at` methods) while new claims keep landing.

use crate::{
    claim::Entry,
    crypto::hash::Hash,
    error::{Error, Result},
};
use std::sync::Arc;
use tracing::trace;

mod node;
mod proof;
mod storage;

pub use node::Node;
pub use proof::{Proof, ProofAux};
pub use storage::{MemStorage, Storage};

/// Deepest tree we can encode a proof for (depth is a single byte).
pub const MAX_LEVELS_LIMIT: usize = 255;

/// Storage key holding the current root. Node keys are always 32 bytes, so
/// this can't collide with one.
const ROOT_KEY: &[u8] = b"current_root";

/// A sparse Merkle tree bound to a (prefixed) storage backend.
pub struct MerkleTree {
    storage: Arc<dyn Storage>,
    root: Hash,
    max_levels: usize,
}

impl MerkleTree {
    /// Open the tree in `storage`, picking up the last root written there (or
    /// starting empty).
    pub fn new(storage: Arc<dyn Storage>, max_levels: usize) -> Result<Self> {
        if max_levels == 0 || max_levels > MAX_LEVELS_LIMIT {
            return Err(Error::MerkleDepthExceeded);
        }
        let root = match storage.get(ROOT_KEY)? {
            Some(bytes) => Hash::try_from_slice(&bytes).map_err(|_| Error::MerkleMalformed("bad stored root"))?,
            None => Hash::EMPTY,
        };
        Ok(Self { storage, root, max_levels })
    }

    /// Whether a tree has ever been written to this storage.
    pub fn exists_in(storage: &dyn Storage) -> Result<bool> {
        Ok(storage.get(ROOT_KEY)?.is_some())
    }

    /// The current root.
    pub fn root(&self) -> Hash {
        self.root
    }

    /// The maximum number of levels.
    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    fn get_node(&self, key: &Hash) -> Result<Node> {
        if key.is_empty() {
            return Ok(Node::Empty);
        }
        let bytes = self.storage.get(key.as_bytes())?.ok_or(Error::MerkleNodeMissing)?;
        Node::decode(&bytes)
    }

    /// Add an entry.
    ///
    /// Inserting an entry that's already present is a no-op. Inserting a
    /// different entry under an existing HIndex fails with
    /// `MerkleDuplicateKey`: trees never overwrite. Either way, a failed insert
    /// leaves the tree exactly as it was.
    pub fn insert(&mut self, entry: &Entry) -> Result<()> {
        let mut batch = Vec::new();
        let new_root = self.add_leaf(&mut batch, entry, &entry.hindex(), &self.root, 0)?;
        if new_root == self.root {
            return Ok(());
        }
        let mut writes = batch
            .into_iter()
            .map(|node: Node| (node.hash().as_bytes().to_vec(), node.encode()))
            .collect::<Vec<_>>();
        writes.push((ROOT_KEY.to_vec(), new_root.as_bytes().to_vec()));
        self.storage.write_batch(writes)?;
        trace!(root = %new_root, hindex = %entry.hindex(), "entry inserted");
        self.root = new_root;
        Ok(())
    }

    fn add_leaf(&self, batch: &mut Vec<Node>, entry: &Entry, hindex: &Hash, key: &Hash, lvl: usize) -> Result<Hash> {
        if lvl >= self.max_levels {
            return Err(Error::MerkleDepthExceeded);
        }
        match self.get_node(key)? {
            Node::Empty => {
                let leaf = Node::Leaf(*entry);
                let hash = leaf.hash();
                batch.push(leaf);
                Ok(hash)
            }
            Node::Leaf(existing) => {
                let existing_hindex = existing.hindex();
                if &existing_hindex == hindex {
                    if existing.hvalue() == entry.hvalue() {
                        return Ok(*key);
                    }
                    return Err(Error::MerkleDuplicateKey);
                }
                self.push_leaf(batch, entry, hindex, &existing, &existing_hindex, lvl)
            }
            Node::Middle { left, right } => {
                let bit = hindex.bit(lvl);
                let (child, sibling) = if bit { (right, left) } else { (left, right) };
                let new_child = self.add_leaf(batch, entry, hindex, &child, lvl + 1)?;
                let middle = Node::middle_with(bit, new_child, sibling);
                let hash = middle.hash();
                batch.push(middle);
                Ok(hash)
            }
        }
    }

    /// Push an existing leaf down until its path and the new leaf's path split.
    fn push_leaf(&self, batch: &mut Vec<Node>, entry: &Entry, hindex: &Hash, old: &Entry, old_hindex: &Hash, lvl: usize) -> Result<Hash> {
        // both leaves have to fit at lvl + 1
        if lvl + 2 > self.max_levels {
            return Err(Error::MerkleDepthExceeded);
        }
        let bit = hindex.bit(lvl);
        let middle = if bit == old_hindex.bit(lvl) {
            let next = self.push_leaf(batch, entry, hindex, old, old_hindex, lvl + 1)?;
            Node::middle_with(bit, next, Hash::EMPTY)
        } else {
            let leaf = Node::Leaf(*entry);
            let leaf_hash = leaf.hash();
            batch.push(leaf);
            Node::middle_with(bit, leaf_hash, old.leaf_hash())
        };
        let hash = middle.hash();
        batch.push(middle);
        Ok(hash)
    }

    /// Walk from `root` along `hindex`, collecting siblings, until we hit an
    /// empty node or a leaf.
    fn walk(&self, root: &Hash, hindex: &Hash) -> Result<(Vec<Hash>, Node)> {
        let mut siblings = Vec::new();
        let mut key = *root;
        for lvl in 0..self.max_levels {
            match self.get_node(&key)? {
                Node::Middle { left, right } => {
                    if hindex.bit(lvl) {
                        siblings.push(left);
                        key = right;
                    } else {
                        siblings.push(right);
                        key = left;
                    }
                }
                terminal => return Ok((siblings, terminal)),
            }
        }
        Err(Error::MerkleDepthExceeded)
    }

    /// Look up an entry by HIndex.
    pub fn get_entry(&self, hindex: &Hash) -> Result<Entry> {
        self.get_entry_at(&self.root, hindex)
    }

    /// Look up an entry by HIndex as of a past root.
    pub fn get_entry_at(&self, root: &Hash, hindex: &Hash) -> Result<Entry> {
        match self.walk(root, hindex)? {
            (_, Node::Leaf(entry)) if &entry.hindex() == hindex => Ok(entry),
            _ => Err(Error::MerkleNotFound),
        }
    }

    /// Prove `hindex` is in the tree.
    pub fn prove_existence(&self, hindex: &Hash) -> Result<Proof> {
        self.prove_existence_at(&self.root, hindex)
    }

    /// Prove `hindex` was in the tree as of `root`.
    pub fn prove_existence_at(&self, root: &Hash, hindex: &Hash) -> Result<Proof> {
        match self.walk(root, hindex)? {
            (siblings, Node::Leaf(entry)) if &entry.hindex() == hindex => Ok(Proof::new(true, siblings, None)),
            _ => Err(Error::MerkleNotFound),
        }
    }

    /// Prove nothing lives under `hindex`.
    pub fn prove_non_existence(&self, hindex: &Hash) -> Result<Proof> {
        self.prove_non_existence_at(&self.root, hindex)
    }

    /// Prove nothing lived under `hindex` as of `root`.
    pub fn prove_non_existence_at(&self, root: &Hash, hindex: &Hash) -> Result<Proof> {
        match self.walk(root, hindex)? {
            (siblings, Node::Empty) => Ok(Proof::new(false, siblings, None)),
            (siblings, Node::Leaf(entry)) => {
                let aux_hindex = entry.hindex();
                if &aux_hindex == hindex {
                    return Err(Error::MerkleEntryExists);
                }
                let aux = ProofAux {
                    hindex: aux_hindex,
                    hvalue: entry.hvalue(),
                };
                Ok(Proof::new(false, siblings, Some(aux)))
            }
            (_, Node::Middle { .. }) => Err(Error::MerkleMalformed("walk ended on a middle node")),
        }
    }

    /// Every entry reachable from the current root, left to right.
    pub fn entries(&self) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(key) = stack.pop() {
            match self.get_node(&key)? {
                Node::Empty => {}
                Node::Leaf(entry) => out.push(entry),
                Node::Middle { left, right } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::{Claim, ClaimBasic};

    const DEPTH: usize = 140;

    fn tree() -> MerkleTree {
        MerkleTree::new(Arc::new(MemStorage::new()), DEPTH).unwrap()
    }

    fn basic(i: u8, v: u8) -> Entry {
        Claim::from(ClaimBasic::new(0, [[i; 32], [0; 32], [0; 32]], [[v; 32], [0; 32], [0; 32], [0; 32]])).entry()
    }

    /// An entry whose hindex starts with the given bits, found by brute force.
    fn entry_with_prefix(bits: &[bool], salt: u8) -> Entry {
        for i in 0..=u16::MAX {
            let mut index = [[0u8; 32]; 3];
            index[0][..2].copy_from_slice(&i.to_le_bytes());
            index[1][0] = salt;
            let entry = Claim::from(ClaimBasic::new(0, index, [[salt; 32]; 4])).entry();
            let hi = entry.hindex();
            if bits.iter().enumerate().all(|(n, b)| hi.bit(n) == *b) {
                return entry;
            }
        }
        panic!("no entry with that prefix");
    }

    #[test]
    fn empty_tree() {
        let tree = tree();
        assert_eq!(tree.root(), Hash::EMPTY);
        let hi = basic(1, 1).hindex();
        assert_eq!(tree.get_entry(&hi), Err(Error::MerkleNotFound));
        assert_eq!(tree.prove_existence(&hi), Err(Error::MerkleNotFound));
        let proof = tree.prove_non_existence(&hi).unwrap();
        assert_eq!(proof.depth(), 0);
        assert!(proof.verify(&Hash::EMPTY, &hi, &Hash::EMPTY));
        assert_eq!(tree.entries().unwrap(), vec![]);
    }

    #[test]
    fn single_leaf_is_the_root() {
        let mut tree = tree();
        let entry = basic(1, 1);
        tree.insert(&entry).unwrap();
        assert_eq!(tree.root(), entry.leaf_hash());
        let proof = tree.prove_existence(&entry.hindex()).unwrap();
        assert_eq!(proof.depth(), 0);
        assert!(proof.verify(&tree.root(), &entry.hindex(), &entry.hvalue()));
    }

    #[test]
    fn insert_and_prove_many() {
        let mut tree = tree();
        let entries = (0..64).map(|i| basic(i, i.wrapping_mul(7))).collect::<Vec<_>>();
        for entry in &entries {
            tree.insert(entry).unwrap();
        }
        let root = tree.root();
        for entry in &entries {
            assert_eq!(tree.get_entry(&entry.hindex()).unwrap(), *entry);
            let proof = tree.prove_existence(&entry.hindex()).unwrap();
            assert!(proof.existence());
            assert!(proof.verify(&root, &entry.hindex(), &entry.hvalue()));
            // wrong value doesn't verify
            assert!(!proof.verify(&root, &entry.hindex(), &Hash::new([1; 32])));
            let decoded = Proof::from_bytes(&proof.to_bytes()).unwrap();
            assert!(decoded.verify(&root, &entry.hindex(), &entry.hvalue()));
        }
        assert_eq!(tree.entries().unwrap().len(), entries.len());
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let entries = (0..40).map(|i| basic(i, 1)).collect::<Vec<_>>();
        let mut forward = tree();
        for entry in &entries {
            forward.insert(entry).unwrap();
        }
        let mut backward = tree();
        for entry in entries.iter().rev() {
            backward.insert(entry).unwrap();
        }
        let mut shuffled = tree();
        for entry in entries.iter().step_by(2).chain(entries.iter().skip(1).step_by(2)) {
            shuffled.insert(entry).unwrap();
        }
        assert_eq!(forward.root(), backward.root());
        assert_eq!(forward.root(), shuffled.root());
    }

    #[test]
    fn duplicate_keys() {
        let mut tree = tree();
        tree.insert(&basic(1, 1)).unwrap();
        tree.insert(&basic(2, 2)).unwrap();
        let root = tree.root();
        // same entry again is a no-op
        tree.insert(&basic(1, 1)).unwrap();
        assert_eq!(tree.root(), root);
        // same hindex, different value is refused
        assert_eq!(tree.insert(&basic(1, 9)), Err(Error::MerkleDuplicateKey));
        assert_eq!(tree.root(), root);
        assert_eq!(tree.get_entry(&basic(1, 1).hindex()).unwrap(), basic(1, 1));
    }

    #[test]
    fn non_existence_empty_and_aux() {
        let mut tree = tree();
        // two leaves that split at level 0, plus a probe sharing a's first bit
        let a = entry_with_prefix(&[false, false], 1);
        let b = entry_with_prefix(&[true], 2);
        tree.insert(&a).unwrap();
        tree.insert(&b).unwrap();
        let root = tree.root();

        let probe = entry_with_prefix(&[false, true], 3).hindex();
        let proof = tree.prove_non_existence(&probe).unwrap();
        assert!(!proof.existence());
        // a sits alone on the left at level 1, so the probe lands on it
        let aux = proof.aux().expect("aux leaf");
        assert_eq!(aux.hindex, a.hindex());
        assert_eq!(proof.depth(), 1);
        assert!(proof.verify(&root, &probe, &Hash::EMPTY));
        assert!(!proof.verify(&root, &a.hindex(), &Hash::EMPTY));

        // now force a middle on the left so the probe ends on an empty slot
        let c = entry_with_prefix(&[false, false, true], 4);
        tree.insert(&c).unwrap();
        let root = tree.root();
        let proof = tree.prove_non_existence(&probe).unwrap();
        assert!(proof.aux().is_none());
        assert_eq!(proof.depth(), 2);
        assert!(proof.verify(&root, &probe, &Hash::EMPTY));

        assert_eq!(tree.prove_non_existence(&a.hindex()), Err(Error::MerkleEntryExists));
    }

    #[test]
    fn historical_roots_stay_provable() {
        let mut tree = tree();
        tree.insert(&basic(1, 1)).unwrap();
        let old_root = tree.root();
        tree.insert(&basic(2, 2)).unwrap();
        tree.insert(&basic(3, 3)).unwrap();

        let hi2 = basic(2, 2).hindex();
        assert!(tree.get_entry(&hi2).is_ok());
        assert_eq!(tree.get_entry_at(&old_root, &hi2), Err(Error::MerkleNotFound));
        let proof = tree.prove_non_existence_at(&old_root, &hi2).unwrap();
        assert!(proof.verify(&old_root, &hi2, &Hash::EMPTY));
        let hi1 = basic(1, 1).hindex();
        let proof = tree.prove_existence_at(&old_root, &hi1).unwrap();
        assert!(proof.verify(&old_root, &hi1, &basic(1, 1).hvalue()));
    }

    #[test]
    fn reopens_at_last_root() {
        let storage = MemStorage::new();
        let prefixed = storage.with_prefix(b"tree");
        assert!(!MerkleTree::exists_in(prefixed.as_ref()).unwrap());
        let mut tree = MerkleTree::new(prefixed.clone(), DEPTH).unwrap();
        tree.insert(&basic(1, 1)).unwrap();
        tree.insert(&basic(2, 2)).unwrap();
        let reopened = MerkleTree::new(prefixed.clone(), DEPTH).unwrap();
        assert_eq!(reopened.root(), tree.root());
        assert!(MerkleTree::exists_in(prefixed.as_ref()).unwrap());
        assert_eq!(reopened.entries().unwrap().len(), 2);
    }

    #[test]
    fn depth_limit() {
        // with two levels, leaves can only go at level 0 or 1
        let mut tree = MerkleTree::new(Arc::new(MemStorage::new()), 2).unwrap();
        let a = entry_with_prefix(&[false, false], 1);
        let b = entry_with_prefix(&[true, false], 2);
        let c = entry_with_prefix(&[false, true], 3);
        tree.insert(&a).unwrap();
        tree.insert(&b).unwrap();
        let root = tree.root();
        let d = entry_with_prefix(&[false, false], 4);
        assert_eq!(tree.insert(&d), Err(Error::MerkleDepthExceeded));
        assert_eq!(tree.root(), root);
        // c parts ways with a at level 1, where a already sits, so the split
        // would need level 2
        assert_eq!(tree.insert(&c), Err(Error::MerkleDepthExceeded));
        assert!(MerkleTree::new(Arc::new(MemStorage::new()), 0).is_err());
        assert!(MerkleTree::new(Arc::new(MemStorage::new()), 256).is_err());
    }
}
