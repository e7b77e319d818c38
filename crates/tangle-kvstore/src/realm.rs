use std::fmt;
use std::sync::Arc;

use crate::error::KvResult;
use crate::traits::KvStore;

/// A prefix-scoped view over a shared [`KvStore`].
///
/// Every key passed to a realm is stored under `prefix ++ key` in the
/// underlying store. Keys returned from [`Realm::scan_keys`] have the prefix
/// stripped again. Realms are cheap to clone and share the same backend.
#[derive(Clone)]
pub struct Realm {
    store: Arc<dyn KvStore>,
    prefix: Vec<u8>,
}

impl Realm {
    /// Create a realm over `store` namespaced by `prefix`.
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// The namespace prefix of this realm.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Derive a nested realm (`prefix ++ sub`).
    pub fn sub_realm(&self, sub: &[u8]) -> Self {
        let mut prefix = self.prefix.clone();
        prefix.extend_from_slice(sub);
        Self {
            store: Arc::clone(&self.store),
            prefix,
        }
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }

    /// Point read.
    pub fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        self.store.get(&self.full_key(key))
    }

    /// Point write.
    pub fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.store.set(&self.full_key(key), value)
    }

    /// Point delete. Returns `true` if the key existed.
    pub fn delete(&self, key: &[u8]) -> KvResult<bool> {
        self.store.delete(&self.full_key(key))
    }

    /// Existence check.
    pub fn has(&self, key: &[u8]) -> KvResult<bool> {
        self.store.has(&self.full_key(key))
    }

    /// Visit every key of this realm in ascending order, prefix stripped.
    ///
    /// Iteration stops early when `consumer` returns `false`.
    pub fn scan_keys(&self, mut consumer: impl FnMut(&[u8]) -> bool) -> KvResult<()> {
        let prefix_len = self.prefix.len();
        self.store
            .iterate_keys(&self.prefix, &mut |full: &[u8]| consumer(&full[prefix_len..]))
    }

    /// Number of keys in this realm.
    pub fn size_estimate(&self) -> KvResult<usize> {
        self.store.count_keys(&self.prefix)
    }
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("prefix", &self.prefix)
            .finish()
    }
}
