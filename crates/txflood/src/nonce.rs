//! Per-account nonce reservation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Marks a slot that has not been seeded yet.
const UNSEEDED: u64 = u64::MAX;

/// Next nonce to use for every account of the pool.
///
/// Each account owns its own atomic, so reservations for different accounts
/// never contend and a reservation is a single `fetch_add`.
#[derive(Debug)]
pub struct NonceTracker {
    next: Vec<AtomicU64>,
}

impl NonceTracker {
    /// Creates a tracker with `len` unseeded slots.
    pub fn new(len: usize) -> Self {
        Self { next: (0..len).map(|_| AtomicU64::new(UNSEEDED)).collect() }
    }

    pub fn len(&self) -> usize {
        self.next.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }

    /// Sets the first nonce `reserve_next` will hand out for `index`.
    pub fn seed(&self, index: usize, value: u64) {
        self.next[index].store(value, Ordering::Release);
    }

    /// Returns the current nonce for `index` and advances it by one.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range or was never seeded.
    pub fn reserve_next(&self, index: usize) -> u64 {
        let nonce = self.next[index].fetch_add(1, Ordering::AcqRel);
        assert!(nonce != UNSEEDED, "nonce reserved for unseeded account {index}");
        nonce
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, sync::Arc};

    use super::*;

    #[test]
    fn test_reserve_increments() {
        let tracker = NonceTracker::new(2);
        tracker.seed(0, 7);
        tracker.seed(1, 0);
        assert_eq!(tracker.reserve_next(0), 7);
        assert_eq!(tracker.reserve_next(0), 8);
        assert_eq!(tracker.reserve_next(1), 0);
        assert_eq!(tracker.reserve_next(0), 9);
    }

    #[test]
    #[should_panic(expected = "unseeded")]
    fn test_reserve_before_seed_panics() {
        let tracker = NonceTracker::new(1);
        tracker.reserve_next(0);
    }

    #[test]
    fn test_concurrent_reservations_are_gapless() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 500;
        const SEED: u64 = 42;

        let tracker = Arc::new(NonceTracker::new(1));
        tracker.seed(0, SEED);

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    (0..PER_THREAD).map(|_| tracker.reserve_next(0)).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = BTreeSet::new();
        for handle in handles {
            for nonce in handle.join().unwrap() {
                assert!(seen.insert(nonce), "nonce {nonce} issued twice");
            }
        }

        let expected: BTreeSet<u64> = (SEED..SEED + (THREADS * PER_THREAD) as u64).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reservations_from_tasks() {
        let tracker = Arc::new(NonceTracker::new(3));
        for i in 0..3 {
            tracker.seed(i, 100 * i as u64);
        }

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..300 {
            let tracker = Arc::clone(&tracker);
            tasks.spawn(async move { (i % 3, tracker.reserve_next(i % 3)) });
        }

        let mut per_account: Vec<BTreeSet<u64>> = vec![BTreeSet::new(); 3];
        while let Some(result) = tasks.join_next().await {
            let (account, nonce) = result.unwrap();
            assert!(per_account[account].insert(nonce));
        }

        for (i, nonces) in per_account.iter().enumerate() {
            let base = 100 * i as u64;
            assert_eq!(*nonces, (base..base + 100).collect::<BTreeSet<_>>());
        }
    }
}
