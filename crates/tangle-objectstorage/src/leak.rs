//! Diagnostic tracking of handles held too long or multiplied too often.
//!
//! The detector never changes storage behaviour. It only records which call
//! site acquired each live handle and reports entries that exceed the
//! configured [`LeakDetectionOptions`].

use std::collections::BTreeMap;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

use crate::options::LeakDetectionOptions;
use crate::traits::ObjectKey;

/// Identifies one live handle in the detector's ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

struct ConsumerRecord<K> {
    key: K,
    acquired_at: Instant,
    location: &'static Location<'static>,
}

/// Why an entry was reported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeakReason {
    /// More simultaneous handles than `max_consumers_per_object`.
    TooManyConsumers { count: usize, max: usize },
    /// At least one handle held longer than `max_consumer_hold_time`.
    HeldTooLong { held: Duration, max: Duration },
}

/// A suspicious entry found by [`LeakDetector::scan`].
#[derive(Clone, Debug)]
pub struct LeakReport<K> {
    pub key: K,
    pub reason: LeakReason,
    /// Acquisition sites of the live handles, oldest first.
    pub holders: Vec<String>,
}

/// Ledger of live handles for one storage.
pub struct LeakDetector<K: ObjectKey> {
    options: LeakDetectionOptions,
    next_id: AtomicU64,
    consumers: DashMap<ConsumerId, ConsumerRecord<K>>,
}

impl<K: ObjectKey> LeakDetector<K> {
    pub fn new(options: LeakDetectionOptions) -> Self {
        Self {
            options,
            next_id: AtomicU64::new(0),
            consumers: DashMap::new(),
        }
    }

    pub fn options(&self) -> &LeakDetectionOptions {
        &self.options
    }

    /// Record a newly issued handle on `key`, acquired at `location`.
    pub fn register(&self, key: K, location: &'static Location<'static>) -> ConsumerId {
        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.consumers.insert(
            id,
            ConsumerRecord {
                key,
                acquired_at: Instant::now(),
                location,
            },
        );
        id
    }

    /// Remove a released handle from the ledger.
    pub fn unregister(&self, id: ConsumerId) {
        self.consumers.remove(&id);
    }

    /// Number of live handles recorded for `key`.
    pub fn active_consumers(&self, key: &K) -> usize {
        self.consumers.iter().filter(|r| r.key == *key).count()
    }

    /// Number of live handles across all keys.
    pub fn total_consumers(&self) -> usize {
        self.consumers.len()
    }

    /// Report every entry exceeding a threshold, logging each finding.
    pub fn scan(&self) -> Vec<LeakReport<K>> {
        let now = Instant::now();
        let mut by_key: BTreeMap<K, Vec<(Duration, &'static Location<'static>)>> = BTreeMap::new();
        for record in self.consumers.iter() {
            by_key
                .entry(record.key)
                .or_default()
                .push((now.saturating_duration_since(record.acquired_at), record.location));
        }

        let mut reports = Vec::new();
        for (key, mut holders) in by_key {
            holders.sort_by(|a, b| b.0.cmp(&a.0));
            let describe = || {
                holders
                    .iter()
                    .map(|(held, loc)| format!("{loc} (held {held:?})"))
                    .collect::<Vec<_>>()
            };

            if holders.len() > self.options.max_consumers_per_object {
                let reason = LeakReason::TooManyConsumers {
                    count: holders.len(),
                    max: self.options.max_consumers_per_object,
                };
                warn!(key = %key, count = holders.len(), "possible handle leak: too many consumers");
                reports.push(LeakReport {
                    key,
                    reason,
                    holders: describe(),
                });
            }

            if let Some((held, location)) = holders.first() {
                if *held > self.options.max_consumer_hold_time {
                    warn!(key = %key, held = ?held, site = %location, "possible handle leak: held too long");
                    reports.push(LeakReport {
                        key,
                        reason: LeakReason::HeldTooLong {
                            held: *held,
                            max: self.options.max_consumer_hold_time,
                        },
                        holders: describe(),
                    });
                }
            }
        }
        reports
    }
}

impl<K: ObjectKey> std::fmt::Debug for LeakDetector<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeakDetector")
            .field("options", &self.options)
            .field("consumers", &self.consumers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tangle_types::MessageId;

    fn detector(max_consumers: usize, max_hold: Duration) -> LeakDetector<MessageId> {
        LeakDetector::new(LeakDetectionOptions {
            max_consumers_per_object: max_consumers,
            max_consumer_hold_time: max_hold,
        })
    }

    #[test]
    fn register_and_unregister() {
        let d = detector(10, Duration::from_secs(60));
        let key = MessageId::from_hash([1; 32]);
        let a = d.register(key, Location::caller());
        let b = d.register(key, Location::caller());
        assert_ne!(a, b);
        assert_eq!(d.active_consumers(&key), 2);

        d.unregister(a);
        assert_eq!(d.active_consumers(&key), 1);
        d.unregister(b);
        assert_eq!(d.total_consumers(), 0);
    }

    #[test]
    fn flags_too_many_consumers() {
        let d = detector(2, Duration::from_secs(60));
        let hot = MessageId::from_hash([1; 32]);
        let cold = MessageId::from_hash([2; 32]);
        for _ in 0..3 {
            d.register(hot, Location::caller());
        }
        d.register(cold, Location::caller());

        let reports = d.scan();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].key, hot);
        assert_eq!(
            reports[0].reason,
            LeakReason::TooManyConsumers { count: 3, max: 2 }
        );
        assert_eq!(reports[0].holders.len(), 3);
        assert!(reports[0].holders[0].contains("leak.rs"));
    }

    #[test]
    fn flags_long_held_consumers() {
        let d = detector(10, Duration::from_millis(1));
        let key = MessageId::from_hash([3; 32]);
        d.register(key, Location::caller());
        std::thread::sleep(Duration::from_millis(10));

        let reports = d.scan();
        assert_eq!(reports.len(), 1);
        assert!(matches!(reports[0].reason, LeakReason::HeldTooLong { .. }));
    }

    #[test]
    fn quiet_when_within_thresholds() {
        let d = detector(10, Duration::from_secs(60));
        d.register(MessageId::from_hash([4; 32]), Location::caller());
        assert!(d.scan().is_empty());
    }
}
