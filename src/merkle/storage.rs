//! Where tree nodes live.
//!
//! The tree only ever needs point reads and atomic batch writes, so that's all
//! the trait asks for. One physical store can back any number of trees by
//! handing each of them a prefixed view.

use crate::{error::Result, util};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A key-value backend for tree nodes.
pub trait Storage: Send + Sync {
    /// Read a value.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write a set of key/value pairs, all or nothing.
    fn write_batch(&self, batch: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()>;

    /// A view of this storage where every key is prefixed with `prefix`.
    fn with_prefix(&self, prefix: &[u8]) -> Arc<dyn Storage>;
}

/// In-memory storage. Clones (and prefixed views) share the same map.
#[derive(Clone, Default)]
pub struct MemStorage {
    prefix: Vec<u8>,
    data: Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in the whole backing map, across all prefixes.
    pub fn len(&self) -> usize {
        util::read(&self.data).len()
    }

    /// Whether the backing map is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }
}

impl Storage for MemStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(util::read(&self.data).get(&self.full_key(key)).cloned())
    }

    fn write_batch(&self, batch: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        let mut data = util::write(&self.data);
        for (key, val) in batch {
            data.insert(self.full_key(&key), val);
        }
        Ok(())
    }

    fn with_prefix(&self, prefix: &[u8]) -> Arc<dyn Storage> {
        Arc::new(Self {
            prefix: self.full_key(prefix),
            data: self.data.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_do_not_collide() {
        let store = MemStorage::new();
        let a = store.with_prefix(b"a");
        let b = store.with_prefix(b"b");
        a.write_batch(vec![(b"key".to_vec(), b"one".to_vec())]).unwrap();
        b.write_batch(vec![(b"key".to_vec(), b"two".to_vec())]).unwrap();
        assert_eq!(a.get(b"key").unwrap(), Some(b"one".to_vec()));
        assert_eq!(b.get(b"key").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.get(b"akey").unwrap(), Some(b"one".to_vec()));
        assert_eq!(a.with_prefix(b"x").get(b"key").unwrap(), None);
        assert_eq!(store.len(), 2);
    }
}
