//! Background eviction sweep.
//!
//! The sweeper is a tokio task ticking at
//! [`StorageOptions::sweep_interval`](crate::StorageOptions::sweep_interval).
//! Each tick runs [`ObjectStorage::sweep`] on the blocking pool, since a
//! sweep may write dirty entries back to the persistent store. The task only
//! holds a weak reference to the storage and exits once the storage is
//! dropped, shut down, or explicitly stopped.

use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::storage::{ObjectStorage, StorageInner};
use crate::traits::StorableObject;

pub(crate) struct EvictionTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl<T: StorableObject> ObjectStorage<T> {
    /// Start the periodic eviction sweep on the current tokio runtime.
    ///
    /// Calling this while the sweeper already runs is a no-op. Fails with
    /// [`StorageError::NoRuntime`] outside a runtime.
    pub fn start_eviction(&self) -> StorageResult<()> {
        self.ensure_running()?;
        let runtime = Handle::try_current().map_err(|_| StorageError::NoRuntime)?;

        let mut sweeper = self.inner.sweeper.lock();
        if sweeper.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return Ok(());
        }

        let (stop, stop_rx) = watch::channel(false);
        let period = self.options().sweep_interval;
        let handle = runtime.spawn(eviction_loop(Arc::downgrade(&self.inner), period, stop_rx));
        *sweeper = Some(EvictionTask { stop, handle });
        info!(kind = T::KIND, interval_ms = period.as_millis() as u64, "eviction sweeper started");
        Ok(())
    }

    /// Stop the eviction sweep if it runs. A sweep in progress completes.
    pub fn stop_eviction(&self) {
        if let Some(task) = self.inner.sweeper.lock().take() {
            let _ = task.stop.send(true);
            debug!(kind = T::KIND, "eviction sweeper stopping");
        }
    }

    pub fn is_eviction_running(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }
}

async fn eviction_loop<T: StorableObject>(
    storage: Weak<StorageInner<T>>,
    period: std::time::Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(inner) = storage.upgrade() else {
                    break;
                };
                if inner.is_shut_down() {
                    break;
                }
                let storage = ObjectStorage { inner };
                match tokio::task::spawn_blocking(move || storage.sweep()).await {
                    Ok(report) if report.failed > 0 => {
                        warn!(kind = T::KIND, failed = report.failed, "eviction sweep left dirty entries");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(kind = T::KIND, error = %err, "eviction sweep task failed");
                    }
                }
            }
        }
    }
    debug!(kind = T::KIND, "eviction sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::Note;
    use crate::traits::ObjectKey;
    use crate::StorageOptions;
    use std::time::Duration;
    use tangle_kvstore::{InMemoryKvStore, Realm};

    fn storage(cache_time: Duration) -> (ObjectStorage<Note>, Realm) {
        let realm = Realm::new(Arc::new(InMemoryKvStore::new()), vec![2]);
        let options = StorageOptions::default()
            .with_cache_time(cache_time)
            .with_sweep_interval(Duration::from_millis(10));
        (ObjectStorage::new(realm.clone(), options), realm)
    }

    #[test]
    fn start_outside_runtime_fails() {
        let (storage, _) = storage(Duration::from_millis(10));
        assert!(matches!(storage.start_eviction(), Err(StorageError::NoRuntime)));
        assert!(!storage.is_eviction_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sweeper_evicts_idle_entries() {
        let (storage, realm) = storage(Duration::from_millis(20));
        let note = Note::new(1, "background");
        storage.store(note.clone()).unwrap().release(false);
        assert!(storage.is_cached(note.id));

        storage.start_eviction().unwrap();
        assert!(storage.is_eviction_running());

        let mut evicted = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if !storage.is_cached(note.id) {
                evicted = true;
                break;
            }
        }
        assert!(evicted, "entry should be evicted by the sweeper");
        assert!(realm.has(&note.id.to_key_bytes()).unwrap());
        storage.stop_eviction();
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_halts() {
        let (storage, _) = storage(Duration::from_secs(60));
        storage.start_eviction().unwrap();
        storage.start_eviction().unwrap();
        assert!(storage.is_eviction_running());

        storage.stop_eviction();
        assert!(!storage.is_eviction_running());
        storage.stop_eviction();
    }

    #[tokio::test]
    async fn shutdown_stops_sweeper() {
        let (storage, _) = storage(Duration::from_secs(60));
        storage.start_eviction().unwrap();
        storage.shutdown().unwrap();
        assert!(!storage.is_eviction_running());
        assert!(matches!(storage.start_eviction(), Err(StorageError::ShutDown)));
    }
}
