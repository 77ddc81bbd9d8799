//! Per-account mutual exclusion.
//!
//! The session authority's writes for one account span three store keys,
//! and a takeover spans several authority calls. Two logins for the same
//! account must not interleave those sequences, or both can observe "no
//! session" and both create one. [`AccountLocks`] hands out one async
//! mutex per username so those sequences run one at a time per account,
//! while different accounts proceed in parallel.
//!
//! This only serializes callers inside one process. Instances sharing a
//! store across machines are not coordinated.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Entries are pruned once the table grows past this many names.
const PRUNE_THRESHOLD: usize = 1024;

/// Table of per-username async locks.
///
/// Locks are created on demand and held weakly, so an account nobody is
/// currently working on costs nothing once its guard drops.
#[derive(Debug, Default)]
pub struct AccountLocks {
    table: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

/// Proof that the holder has exclusive use of one account.
///
/// Released on drop.
#[derive(Debug)]
pub struct AccountGuard {
    username: String,
    _guard: OwnedMutexGuard<()>,
}

impl AccountGuard {
    /// The account this guard covers.
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no one else holds `username`, then returns a guard.
    ///
    /// Not reentrant: acquiring the same username twice from one task
    /// deadlocks.
    pub async fn acquire(&self, username: &str) -> AccountGuard {
        let lock = {
            let mut table = self.table.lock().await;
            if table.len() > PRUNE_THRESHOLD {
                table.retain(|_, weak| weak.strong_count() > 0);
            }
            match table.get(username).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    table.insert(username.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        // The table lock is released before waiting, so a slow holder of
        // one account never blocks lookups for another.
        let guard = lock.lock_owned().await;
        AccountGuard {
            username: username.to_string(),
            _guard: guard,
        }
    }

    /// Number of usernames with a live lock. For tests and diagnostics.
    pub async fn live_count(&self) -> usize {
        self.table
            .lock()
            .await
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
