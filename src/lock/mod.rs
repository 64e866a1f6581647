//! Tuple-granularity lock manager using wait-die deadlock prevention.
//!
//! Grounded on the original engine's `LockManager`/`TxnList`: one waiter
//! queue per `Rid`, held in the same extendible hash table type used for
//! the buffer pool's page table. A younger transaction requesting a lock
//! that conflicts with an older transaction's entry dies (aborts)
//! immediately rather than waiting; an older transaction waits for a
//! younger one to finish. Granted-shared entries can share a queue
//! position; an exclusive entry, granted or not, blocks everything behind
//! it.
//!
//! The original's single per-queue `waken_txn_id_` signal target is
//! replaced with a `Condvar::wait` predicate loop: every waiter re-checks
//! its own entry's `granted` flag on each wakeup instead of relying on a
//! hand-maintained "who to wake next" field. This is the idiomatic std
//! pattern and sidesteps a real bug in the original: `InsertRead`'s
//! "wake the next waiting reader" step only notifies once reader at a
//! time, leaving later contiguous readers to wait for an extra round
//! trip. Broadcasting and letting every waiter re-check its own state
//! is simpler and strictly more robust.

use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, Result};
use crate::hash::ExtendibleHashTable;
use crate::txn::{Transaction, TransactionState};
use crate::wal::Rid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct Entry {
    txn_id: i32,
    mode: LockMode,
    granted: bool,
}

struct Queue {
    entries: Vec<Entry>,
}

struct QueueHandle {
    state: Mutex<Queue>,
    cv: Condvar,
}

/// Scans the queue from the front, granting every leading entry that is
/// compatible with everything already granted ahead of it. A granted or
/// newly-granted exclusive entry stops the scan: nothing behind it can
/// run concurrently.
fn grant_pending(queue: &mut Queue) {
    for entry in queue.entries.iter_mut() {
        if entry.granted {
            if entry.mode == LockMode::Exclusive {
                return;
            }
            continue;
        }
        entry.granted = true;
        if entry.mode == LockMode::Exclusive {
            return;
        }
    }
}

pub struct LockManager {
    strict_2pl: bool,
    table: ExtendibleHashTable<Rid, Arc<QueueHandle>>,
    create_guard: Mutex<()>,
}

impl LockManager {
    pub fn new(strict_2pl: bool, bucket_size: usize) -> Self {
        LockManager {
            strict_2pl,
            table: ExtendibleHashTable::new(bucket_size),
            create_guard: Mutex::new(()),
        }
    }

    fn queue_for(&self, rid: Rid) -> Arc<QueueHandle> {
        if let Some(handle) = self.table.find(&rid) {
            return handle;
        }
        let _guard = self.create_guard.lock().unwrap();
        if let Some(handle) = self.table.find(&rid) {
            return handle;
        }
        let handle = Arc::new(QueueHandle {
            state: Mutex::new(Queue { entries: Vec::new() }),
            cv: Condvar::new(),
        });
        self.table.insert(rid, Arc::clone(&handle));
        handle
    }

    pub fn lock_shared(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        if txn.state() != TransactionState::Growing {
            txn.abort();
            return Err(Error::TxnAborted(format!(
                "txn {} not growing",
                txn.id()
            )));
        }
        let handle = self.queue_for(rid);
        let mut state = handle.state.lock().unwrap();

        let dies = state
            .entries
            .iter()
            .any(|e| e.mode == LockMode::Exclusive && e.txn_id < txn.id());
        if dies {
            txn.abort();
            return Err(Error::TxnAborted(format!(
                "txn {} wait-died on shared lock for {:?}",
                txn.id(),
                rid
            )));
        }

        state.entries.push(Entry {
            txn_id: txn.id(),
            mode: LockMode::Shared,
            granted: false,
        });
        grant_pending(&mut state);
        handle.cv.notify_all();

        while !is_granted(&state, txn.id()) {
            state = handle.cv.wait(state).unwrap();
        }
        drop(state);
        txn.add_shared_lock(rid);
        Ok(())
    }

    pub fn lock_exclusive(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        if txn.state() != TransactionState::Growing {
            txn.abort();
            return Err(Error::TxnAborted(format!(
                "txn {} not growing",
                txn.id()
            )));
        }
        let handle = self.queue_for(rid);
        let mut state = handle.state.lock().unwrap();

        let dies = state.entries.iter().any(|e| e.txn_id < txn.id());
        if dies {
            txn.abort();
            return Err(Error::TxnAborted(format!(
                "txn {} wait-died on exclusive lock for {:?}",
                txn.id(),
                rid
            )));
        }

        state.entries.push(Entry {
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: false,
        });
        grant_pending(&mut state);
        handle.cv.notify_all();

        while !is_granted(&state, txn.id()) {
            state = handle.cv.wait(state).unwrap();
        }
        drop(state);
        txn.add_exclusive_lock(rid);
        Ok(())
    }

    /// Upgrades an already-held shared lock to exclusive in place, keeping
    /// the entry's queue position so waiters behind it keep their order.
    pub fn lock_upgrade(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        if txn.state() != TransactionState::Growing {
            txn.abort();
            return Err(Error::TxnAborted(format!(
                "txn {} not growing",
                txn.id()
            )));
        }
        let handle = self.queue_for(rid);
        let mut state = handle.state.lock().unwrap();

        let pos = match state
            .entries
            .iter()
            .position(|e| e.txn_id == txn.id() && e.mode == LockMode::Shared && e.granted)
        {
            Some(p) => p,
            None => {
                drop(state);
                txn.abort();
                return Err(Error::TxnAborted(format!(
                    "txn {} upgrade without held shared lock on {:?}",
                    txn.id(),
                    rid
                )));
            }
        };

        let dies = state
            .entries
            .iter()
            .enumerate()
            .any(|(i, e)| i != pos && e.txn_id < txn.id());
        if dies {
            drop(state);
            txn.abort();
            return Err(Error::TxnAborted(format!(
                "txn {} wait-died on lock upgrade for {:?}",
                txn.id(),
                rid
            )));
        }

        state.entries[pos] = Entry {
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: false,
        };
        grant_pending(&mut state);
        handle.cv.notify_all();

        while !is_granted(&state, txn.id()) {
            state = handle.cv.wait(state).unwrap();
        }
        drop(state);
        txn.remove_shared_lock(rid);
        txn.add_exclusive_lock(rid);
        Ok(())
    }

    /// Releases the lock `txn` holds on `rid`. Disallowed mid-growth under
    /// strict two-phase locking (locks are held until the transaction's
    /// commit/abort decision); otherwise drops the transaction to
    /// `Shrinking` the first time it releases anything.
    pub fn unlock(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        if self.strict_2pl && txn.state() == TransactionState::Growing {
            txn.abort();
            return Err(Error::TxnAborted(format!(
                "txn {} released {:?} before commit under strict 2PL",
                txn.id(),
                rid
            )));
        }
        if !self.strict_2pl && txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        let handle = self.queue_for(rid);
        let mut state = handle.state.lock().unwrap();
        let pos = match state.entries.iter().position(|e| e.txn_id == txn.id()) {
            Some(p) => p,
            None => return Err(Error::NotFound),
        };
        state.entries.remove(pos);
        grant_pending(&mut state);
        handle.cv.notify_all();
        drop(state);
        txn.remove_any_lock(rid);
        Ok(())
    }
}

fn is_granted(queue: &Queue, txn_id: i32) -> bool {
    queue
        .entries
        .iter()
        .find(|e| e.txn_id == txn_id)
        .map(|e| e.granted)
        .unwrap_or(false)
}
