//! Per-(user, session) concurrency control.
//!
//! Ensures only one turn runs per session at a time: the Session Manager
//! invariant that at most one Orchestrator is active per key. A second
//! request for the same session waits for the first to finish; requests
//! against different sessions proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the run lock for a session key, waiting if another turn is
    /// already in flight. The permit releases the lock on drop.
    pub async fn acquire(&self, key: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .expect("semaphore is never closed")
    }

    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop locks that aren't currently held, so the map doesn't grow
    /// unboundedly as sessions churn.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}
