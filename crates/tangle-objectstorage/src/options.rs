use std::time::Duration;

/// Thresholds for the diagnostic leak detector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeakDetectionOptions {
    /// Maximum number of simultaneous handles on one entry before it is
    /// reported.
    pub max_consumers_per_object: usize,
    /// Maximum time a single handle may be held before it is reported.
    pub max_consumer_hold_time: Duration,
}

impl Default for LeakDetectionOptions {
    fn default() -> Self {
        Self {
            max_consumers_per_object: 20,
            max_consumer_hold_time: Duration::from_secs(240),
        }
    }
}

/// Configuration of one [`ObjectStorage`](crate::ObjectStorage) instance.
#[derive(Clone, Debug)]
pub struct StorageOptions {
    /// How long an unreferenced entry stays cached before eviction.
    /// Zero evicts as soon as the last handle is released.
    pub cache_time: Duration,
    /// Whether objects are read from and written to the persistent realm.
    pub persistence_enabled: bool,
    /// Persist newly created objects immediately instead of on eviction.
    pub store_on_creation: bool,
    /// Leak detection thresholds; `None` disables the detector.
    pub leak_detection: Option<LeakDetectionOptions>,
    /// Interval of the background eviction sweep.
    pub sweep_interval: Duration,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            cache_time: Duration::ZERO,
            persistence_enabled: true,
            store_on_creation: false,
            leak_detection: None,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl StorageOptions {
    pub fn with_cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = cache_time;
        self
    }

    pub fn with_persistence(mut self, enabled: bool) -> Self {
        self.persistence_enabled = enabled;
        self
    }

    pub fn with_store_on_creation(mut self, enabled: bool) -> Self {
        self.store_on_creation = enabled;
        self
    }

    pub fn with_leak_detection(mut self, options: LeakDetectionOptions) -> Self {
        self.leak_detection = Some(options);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = StorageOptions::default();
        assert!(opts.cache_time.is_zero());
        assert!(opts.persistence_enabled);
        assert!(!opts.store_on_creation);
        assert!(opts.leak_detection.is_none());
    }

    #[test]
    fn builder_sets_fields() {
        let opts = StorageOptions::default()
            .with_cache_time(Duration::from_millis(500))
            .with_persistence(false)
            .with_store_on_creation(true)
            .with_leak_detection(LeakDetectionOptions::default())
            .with_sweep_interval(Duration::from_millis(50));
        assert_eq!(opts.cache_time, Duration::from_millis(500));
        assert!(!opts.persistence_enabled);
        assert!(opts.store_on_creation);
        assert_eq!(
            opts.leak_detection.unwrap().max_consumers_per_object,
            20
        );
        assert_eq!(opts.sweep_interval, Duration::from_millis(50));
    }
}
