use crate::error::KvResult;

/// Ordered byte-keyed persistent store.
///
/// All implementations must satisfy these invariants:
/// - Single-key reads, writes and deletes are atomic.
/// - Iteration visits keys in ascending byte order.
/// - Values are opaque; the store never interprets them.
/// - All I/O errors are propagated, never silently ignored.
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Write `value` under `key`, replacing any previous value.
    fn set(&self, key: &[u8], value: &[u8]) -> KvResult<()>;

    /// Delete `key`. Returns `true` if the key existed.
    fn delete(&self, key: &[u8]) -> KvResult<bool>;

    /// Check whether `key` exists.
    ///
    /// Default implementation reads the value. Backends may override with a
    /// cheaper existence check.
    fn has(&self, key: &[u8]) -> KvResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Visit every key starting with `prefix`, in ascending order.
    ///
    /// Iteration stops early when `consumer` returns `false`.
    fn iterate_keys(&self, prefix: &[u8], consumer: &mut dyn FnMut(&[u8]) -> bool)
        -> KvResult<()>;

    /// Number of keys starting with `prefix`.
    ///
    /// Default implementation iterates. Backends may override with an
    /// estimate from their own statistics.
    fn count_keys(&self, prefix: &[u8]) -> KvResult<usize> {
        let mut count = 0;
        self.iterate_keys(prefix, &mut |_: &[u8]| {
            count += 1;
            true
        })?;
        Ok(count)
    }
}
