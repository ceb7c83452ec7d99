//! Per-pair serialization boundary.
//!
//! Resets hold a pair exclusively while they read the current quantity and write the
//! checkpoint. Ordinary inserts hold every pair they touch in shared mode, so they never
//! block each other but cannot land inside a reset's read-compute-write window.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, warn};

use crate::common::StockPair;
use crate::errors::ServiceError;

type LockTable = DashMap<StockPair, Arc<RwLock<()>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

enum HeldLock {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// Registry of pair locks. Entries are created on demand and pruned once unused.
#[derive(Clone)]
pub struct PairLocks {
    table: Arc<LockTable>,
    wait: Duration,
}

impl PairLocks {
    pub fn new(wait: Duration) -> Self {
        Self {
            table: Arc::new(DashMap::new()),
            wait,
        }
    }

    /// Exclusive hold on every pair, as taken by the adjustment writer.
    pub async fn exclusive<I>(&self, pairs: I) -> Result<PairGuards, ServiceError>
    where
        I: IntoIterator<Item = StockPair>,
    {
        self.acquire(pairs, LockMode::Exclusive).await
    }

    /// Shared hold on every pair, as taken by ordinary transaction inserts.
    pub async fn shared<I>(&self, pairs: I) -> Result<PairGuards, ServiceError>
    where
        I: IntoIterator<Item = StockPair>,
    {
        self.acquire(pairs, LockMode::Shared).await
    }

    /// Number of pairs with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.table.len()
    }

    async fn acquire<I>(&self, pairs: I, mode: LockMode) -> Result<PairGuards, ServiceError>
    where
        I: IntoIterator<Item = StockPair>,
    {
        // Sorted acquisition keeps multi-pair holders from deadlocking each other.
        let mut pairs: Vec<StockPair> = pairs.into_iter().collect();
        pairs.sort_unstable();
        pairs.dedup();

        let mut guards = PairGuards {
            table: Arc::clone(&self.table),
            pairs: Vec::with_capacity(pairs.len()),
            held: Vec::with_capacity(pairs.len()),
        };

        for pair in pairs {
            let lock = self.lock_for(pair);
            guards.pairs.push(pair);

            let held = match mode {
                LockMode::Shared => tokio::time::timeout(self.wait, lock.read_owned())
                    .await
                    .map(HeldLock::Shared),
                LockMode::Exclusive => tokio::time::timeout(self.wait, lock.write_owned())
                    .await
                    .map(HeldLock::Exclusive),
            };

            match held {
                Ok(held) => guards.held.push(held),
                Err(_) => {
                    counter!("stockledger.lock.contention", 1);
                    warn!(%pair, ?mode, wait_ms = self.wait.as_millis() as u64, "Pair lock wait expired");
                    return Err(ServiceError::ConcurrentModification(pair));
                }
            }
        }

        debug!(pairs = guards.pairs.len(), ?mode, "Pair locks acquired");
        Ok(guards)
    }

    fn lock_for(&self, pair: StockPair) -> Arc<RwLock<()>> {
        Arc::clone(self.table.entry(pair).or_default().value())
    }
}

impl std::fmt::Debug for PairLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairLocks")
            .field("tracked", &self.table.len())
            .field("wait", &self.wait)
            .finish()
    }
}

/// Locks held for a set of pairs; released and pruned on drop.
pub struct PairGuards {
    table: Arc<LockTable>,
    pairs: Vec<StockPair>,
    held: Vec<HeldLock>,
}

impl PairGuards {
    pub fn pairs(&self) -> &[StockPair] {
        &self.pairs
    }
}

impl std::fmt::Debug for PairGuards {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairGuards")
            .field("pairs", &self.pairs)
            .field("held", &self.held.len())
            .finish()
    }
}

impl Drop for PairGuards {
    fn drop(&mut self) {
        self.held.clear();
        for pair in &self.pairs {
            self.table
                .remove_if(pair, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use uuid::Uuid;

    fn pair(w: u128, p: u128) -> StockPair {
        StockPair::new(Uuid::from_u128(w), Uuid::from_u128(p))
    }

    #[tokio::test]
    async fn shared_holders_do_not_block_each_other() {
        let locks = PairLocks::new(Duration::from_millis(50));
        let first = locks.shared([pair(1, 1)]).await.unwrap();
        let second = locks.shared([pair(1, 1), pair(2, 1)]).await.unwrap();
        assert_eq!(second.pairs().len(), 2);
        drop(first);
        drop(second);
    }

    #[tokio::test]
    async fn exclusive_holder_times_out_contenders() {
        let locks = PairLocks::new(Duration::from_millis(20));
        let _held = locks.exclusive([pair(1, 1)]).await.unwrap();

        let err = locks.shared([pair(1, 1)]).await.unwrap_err();
        assert_matches!(err, ServiceError::ConcurrentModification(p) if p == pair(1, 1));

        let err = locks.exclusive([pair(1, 1)]).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn other_pairs_are_unaffected() {
        let locks = PairLocks::new(Duration::from_millis(20));
        let _held = locks.exclusive([pair(1, 1)]).await.unwrap();
        assert!(locks.exclusive([pair(1, 2)]).await.is_ok());
        assert!(locks.exclusive([pair(2, 1)]).await.is_ok());
    }

    #[tokio::test]
    async fn waiter_proceeds_once_holder_releases() {
        let locks = PairLocks::new(Duration::from_secs(2));
        let held = locks.exclusive([pair(3, 3)]).await.unwrap();

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.exclusive([pair(3, 3)]).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(contender.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = PairLocks::new(Duration::from_millis(20));
        {
            let _guards = locks.exclusive([pair(1, 1), pair(1, 2), pair(1, 1)]).await.unwrap();
            assert_eq!(locks.tracked(), 2);
        }
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn failed_acquisition_releases_partial_holds() {
        let locks = PairLocks::new(Duration::from_millis(20));
        let _blocker = locks.exclusive([pair(1, 2)]).await.unwrap();

        assert!(locks.exclusive([pair(1, 1), pair(1, 2)]).await.is_err());
        // pair(1, 1) was taken first and must have been given back
        assert!(locks.exclusive([pair(1, 1)]).await.is_ok());
    }
}
