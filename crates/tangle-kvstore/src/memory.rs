use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::KvResult;
use crate::traits::KvStore;

/// In-memory, `BTreeMap`-based key-value store.
///
/// Intended for tests and embedding. Keys are kept ordered so prefix scans
/// behave like an on-disk LSM or B-tree backend. Values are cloned on
/// read/write.
pub struct InMemoryKvStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryKvStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of keys currently stored, across all realms.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }

    /// Remove all keys from the store.
    pub fn clear(&self) {
        self.entries.write().expect("lock poisoned").clear();
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for InMemoryKvStore {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        let map = self.entries.read().expect("lock poisoned");
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let mut map = self.entries.write().expect("lock poisoned");
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> KvResult<bool> {
        let mut map = self.entries.write().expect("lock poisoned");
        Ok(map.remove(key).is_some())
    }

    fn has(&self, key: &[u8]) -> KvResult<bool> {
        let map = self.entries.read().expect("lock poisoned");
        Ok(map.contains_key(key))
    }

    fn iterate_keys(
        &self,
        prefix: &[u8],
        consumer: &mut dyn FnMut(&[u8]) -> bool,
    ) -> KvResult<()> {
        // Snapshot the matching keys so the consumer may write to the store.
        let keys: Vec<Vec<u8>> = {
            let map = self.entries.read().expect("lock poisoned");
            map.range(prefix.to_vec()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect()
        };
        for key in keys {
            if !consumer(&key) {
                break;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKvStore")
            .field("key_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Core CRUD
    // -----------------------------------------------------------------------

    #[test]
    fn set_and_get() {
        let store = InMemoryKvStore::new();
        store.set(b"key", b"value").unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn set_replaces_value() {
        let store = InMemoryKvStore::new();
        store.set(b"key", b"one").unwrap();
        store.set(b"key", b"two").unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn get_missing_returns_none() {
        let store = InMemoryKvStore::new();
        assert!(store.get(b"missing").unwrap().is_none());
        assert!(!store.has(b"missing").unwrap());
    }

    #[test]
    fn delete_present_and_missing() {
        let store = InMemoryKvStore::new();
        store.set(b"key", b"value").unwrap();
        assert!(store.delete(b"key").unwrap());
        assert!(!store.has(b"key").unwrap());
        assert!(!store.delete(b"key").unwrap());
    }

    // -----------------------------------------------------------------------
    // Iteration
    // -----------------------------------------------------------------------

    #[test]
    fn iterate_keys_is_prefix_scoped_and_ordered() {
        let store = InMemoryKvStore::new();
        store.set(&[1, 3], b"").unwrap();
        store.set(&[1, 1], b"").unwrap();
        store.set(&[2, 0], b"").unwrap();
        store.set(&[1, 2], b"").unwrap();
        store.set(&[0, 9], b"").unwrap();

        let mut seen = Vec::new();
        store
            .iterate_keys(&[1], &mut |k: &[u8]| {
                seen.push(k.to_vec());
                true
            })
            .unwrap();
        assert_eq!(seen, vec![vec![1, 1], vec![1, 2], vec![1, 3]]);
        assert_eq!(store.count_keys(&[1]).unwrap(), 3);
        assert_eq!(store.count_keys(&[]).unwrap(), 5);
    }

    #[test]
    fn iterate_keys_stops_early() {
        let store = InMemoryKvStore::new();
        for i in 0..5u8 {
            store.set(&[7, i], b"").unwrap();
        }
        let mut visited = 0;
        store
            .iterate_keys(&[7], &mut |_: &[u8]| {
                visited += 1;
                visited < 2
            })
            .unwrap();
        assert_eq!(visited, 2);
    }

    #[test]
    fn consumer_may_write_during_iteration() {
        let store = InMemoryKvStore::new();
        store.set(&[1, 1], b"").unwrap();
        store
            .iterate_keys(&[1], &mut |k: &[u8]| {
                store.delete(k).unwrap();
                true
            })
            .unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn clear_and_debug() {
        let store = InMemoryKvStore::default();
        store.set(b"a", b"1").unwrap();
        assert!(format!("{store:?}").contains("key_count"));
        store.clear();
        assert!(store.is_empty());
    }
}
