//! Per-key single-flight guard
//!
//! Concurrent misses on the same cache key serialize on one mutex; the holder
//! computes and saves, the others re-check the cache once they get the lock.

use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::sync::Arc;

/// Keyed mutex table shared by every processor of a process
#[derive(Debug, Default)]
pub struct SingleFlight {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Holds the lock for one key until dropped
#[must_use = "the key is only held while the guard is alive"]
pub struct FlightGuard<'a> {
    flight: &'a SingleFlight,
    key: String,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl SingleFlight {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free, then hold it
    pub fn acquire(&self, key: &str) -> FlightGuard<'_> {
        let lock = Arc::clone(self.locks.entry(key.to_string()).or_default().value());
        if lock.is_locked() {
            tracing::debug!(key, "[flight] waiting for in-flight computation");
        }
        let guard = lock.lock_arc();
        FlightGuard {
            flight: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Keys currently held or waited on
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table's own reference left: nobody holds or waits on the key.
        self.flight
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_key_serializes() {
        let flight = Arc::new(SingleFlight::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let (flight, active, max_seen) = (flight.clone(), active.clone(), max_seen.clone());
                thread::spawn(move || {
                    let _guard = flight.acquire("k");
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[test]
    fn test_distinct_keys_do_not_block() {
        let flight = SingleFlight::new();
        let a = flight.acquire("a");
        let b = flight.acquire("b");
        assert_eq!(flight.in_flight(), 2);
        drop(a);
        drop(b);
        assert_eq!(flight.in_flight(), 0);
    }
}
