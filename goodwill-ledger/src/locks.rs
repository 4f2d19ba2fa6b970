//! Row-level locks over storage keys
//!
//! RocksDB has no row locks, so the store keeps an in-process lock table.
//! Claimers use [`RowLocks::try_lock`] and skip rows another transaction
//! holds; settlement uses [`RowLocks::lock`] and waits. Locks are released
//! when the [`RowGuard`] drops, on every exit path.
//!
//! Lock order is always work item before account.

use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Table of currently held row keys
#[derive(Default)]
pub struct RowLocks {
    held: Mutex<HashSet<Vec<u8>>>,
    released: Condvar,
}

impl fmt::Debug for RowLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowLocks")
            .field("held", &self.held.lock().len())
            .finish()
    }
}

impl RowLocks {
    /// Create an empty lock table
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the lock if free; `None` if another holder has it
    pub fn try_lock(self: &Arc<Self>, key: Vec<u8>) -> Option<RowGuard> {
        let mut held = self.held.lock();
        if held.insert(key.clone()) {
            Some(RowGuard {
                locks: Arc::clone(self),
                key,
            })
        } else {
            None
        }
    }

    /// Wait until the lock is free, then take it
    pub fn lock(self: &Arc<Self>, key: Vec<u8>) -> RowGuard {
        let mut held = self.held.lock();
        while held.contains(&key) {
            self.released.wait(&mut held);
        }
        held.insert(key.clone());
        RowGuard {
            locks: Arc::clone(self),
            key,
        }
    }

    /// Number of rows currently locked
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    fn release(&self, key: &[u8]) {
        self.held.lock().remove(key);
        self.released.notify_all();
    }
}

/// Ownership of one locked row
pub struct RowGuard {
    locks: Arc<RowLocks>,
    key: Vec<u8>,
}

impl fmt::Debug for RowGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowGuard").field("key", &self.key).finish()
    }
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}
