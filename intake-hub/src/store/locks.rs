//! Per-submission critical sections
//!
//! One async mutex per submission id, created on first use and dropped again
//! once nobody holds or waits for it. Mutations to different ids never
//! contend; mutations to the same id run strictly one after another.

use dashmap::DashMap;
use intake_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockTable = DashMap<Uuid, Arc<Mutex<()>>>;

#[derive(Clone, Default)]
pub struct IdLocks {
    table: Arc<LockTable>,
}

/// Held for the duration of one submission's critical section
pub struct IdGuard {
    id: Uuid,
    table: Arc<LockTable>,
    _guard: OwnedMutexGuard<()>,
}

impl IdLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the critical section for `id`, waiting at most `timeout`
    pub async fn acquire(&self, id: Uuid, timeout: Duration) -> Result<IdGuard> {
        // Clone out of the map so the shard lock is released before awaiting
        let mutex = self
            .table
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let acquired = tokio::time::timeout(timeout, mutex.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(IdGuard {
                id,
                table: Arc::clone(&self.table),
                _guard: guard,
            }),
            Err(_) => {
                self.table.remove_if(&id, |_, m| Arc::strong_count(m) == 1);
                Err(Error::Timeout(format!(
                    "Submission {} is busy (waited {} ms)",
                    id,
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Enter the critical sections of several ids, in ascending id order
    ///
    /// Every caller locking multiple ids goes through here, so two such
    /// callers can never wait on each other in a cycle.
    pub async fn acquire_many(&self, ids: &[Uuid], timeout: Duration) -> Result<Vec<IdGuard>> {
        let mut sorted = ids.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for id in sorted {
            guards.push(self.acquire(id, timeout).await?);
        }
        Ok(guards)
    }

    /// Number of ids with a live critical section
    pub fn active(&self) -> usize {
        self.table.len()
    }
}

impl IdGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for IdGuard {
    fn drop(&mut self) {
        // The table and this guard hold one reference each; any more means
        // someone is waiting and the entry must stay
        self.table.remove_if(&self.id, |_, m| Arc::strong_count(m) <= 2);
    }
}
