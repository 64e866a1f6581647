//! Transaction state, two-phase-locking orchestration, and commit/abort.
//!
//! Grounded on the original engine's `Transaction`/`TransactionManager`
//! (`concurrency/transaction_manager.cpp`): `begin` writes a BEGIN record
//! and remembers its LSN as the transaction's `prev_lsn`; `commit` flushes
//! pending physical deletes, writes COMMIT, waits for persistence, then
//! drops every held lock; `abort` walks the write-set in reverse applying
//! the inverse of each write before writing ABORT. The write-set itself is
//! reshaped from the original's `(table, rid, wtype, tuple)` tuples into
//! boxed inverse closures, since this crate's index has no table-heap layer
//! above it for the write-set to name (see `SPEC_FULL.md` §1's scope note).

use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use log::info;

use crate::error::Result;
use crate::lock::LockManager;
use crate::wal::{LogManager, LogRecord, RecordBody, Rid, INVALID_LSN};

static NEXT_TXN_ID: AtomicI32 = AtomicI32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// A pending write that can be undone. `Delete` carries a `finalize`
/// closure applied on commit (the index has no separate "mark deleted"
/// staging area, so finalize is a no-op for `Insert`/`Update` and only
/// does work for `Delete`).
enum WriteKind {
    Insert,
    Delete,
    Update,
}

struct WriteRecord {
    kind: WriteKind,
    undo: Box<dyn FnOnce() + Send>,
    finalize: Option<Box<dyn FnOnce() + Send>>,
}

/// One unit of two-phase-locked work. Owned by the thread running it; the
/// lock manager never reaches across threads to mutate another
/// transaction's state (see `lock::LockManager`'s module doc).
pub struct Transaction {
    id: i32,
    state: TransactionState,
    shared_locks: HashSet<Rid>,
    exclusive_locks: HashSet<Rid>,
    write_set: Vec<WriteRecord>,
    prev_lsn: i32,
}

impl Transaction {
    fn new(id: i32) -> Self {
        Transaction {
            id,
            state: TransactionState::Growing,
            shared_locks: HashSet::new(),
            exclusive_locks: HashSet::new(),
            write_set: Vec::new(),
            prev_lsn: INVALID_LSN,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    pub fn abort(&mut self) {
        self.state = TransactionState::Aborted;
    }

    pub fn add_shared_lock(&mut self, rid: Rid) {
        self.shared_locks.insert(rid);
    }

    pub fn add_exclusive_lock(&mut self, rid: Rid) {
        self.exclusive_locks.insert(rid);
    }

    pub fn remove_shared_lock(&mut self, rid: Rid) {
        self.shared_locks.remove(&rid);
    }

    pub fn remove_any_lock(&mut self, rid: Rid) {
        self.shared_locks.remove(&rid);
        self.exclusive_locks.remove(&rid);
    }

    pub fn holds_lock(&self, rid: Rid) -> bool {
        self.shared_locks.contains(&rid) || self.exclusive_locks.contains(&rid)
    }

    fn all_locked_rids(&self) -> Vec<Rid> {
        self.shared_locks
            .iter()
            .chain(self.exclusive_locks.iter())
            .copied()
            .collect()
    }

    /// Registers an insert's inverse (a delete) for rollback on abort.
    pub fn record_insert(&mut self, undo: impl FnOnce() + Send + 'static) {
        self.write_set.push(WriteRecord {
            kind: WriteKind::Insert,
            undo: Box::new(undo),
            finalize: None,
        });
    }

    /// Registers a delete's inverse (a re-insert) for rollback on abort,
    /// plus the physical removal to apply once the transaction commits.
    pub fn record_delete(
        &mut self,
        undo: impl FnOnce() + Send + 'static,
        finalize: impl FnOnce() + Send + 'static,
    ) {
        self.write_set.push(WriteRecord {
            kind: WriteKind::Delete,
            undo: Box::new(undo),
            finalize: Some(Box::new(finalize)),
        });
    }

    /// Registers an update's inverse (reapplying the before-image).
    pub fn record_update(&mut self, undo: impl FnOnce() + Send + 'static) {
        self.write_set.push(WriteRecord {
            kind: WriteKind::Update,
            undo: Box::new(undo),
            finalize: None,
        });
    }
}

/// Drives `Transaction::begin`/`commit`/`abort` through the lock manager
/// and write-ahead log. `strict_2pl` and `enable_logging` are carried
/// explicitly (via `Config`) rather than through the lineage's process-wide
/// `ENABLE_LOGGING` flag (spec §9's redesign note).
pub struct TransactionManager {
    lock_manager: Arc<LockManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, log_manager: Option<Arc<LogManager>>) -> Self {
        TransactionManager {
            lock_manager,
            log_manager,
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn begin(&self) -> Transaction {
        let id = NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst);
        let mut txn = Transaction::new(id);
        if let Some(log_manager) = &self.log_manager {
            let lsn = log_manager.append(LogRecord::new(id, INVALID_LSN, RecordBody::Begin));
            txn.prev_lsn = lsn;
        }
        info!("transaction {} begin", id);
        txn
    }

    /// Commits `txn`: finalizes pending physical deletes, writes COMMIT,
    /// waits for it to become durable, then releases every held lock.
    pub fn commit(&self, txn: &mut Transaction) -> Result<()> {
        txn.state = TransactionState::Committed;

        for record in txn.write_set.drain(..) {
            if let Some(finalize) = record.finalize {
                finalize();
            }
        }

        if let Some(log_manager) = &self.log_manager {
            let lsn = log_manager.append(LogRecord::new(
                txn.id,
                txn.prev_lsn,
                RecordBody::Commit,
            ));
            txn.prev_lsn = lsn;
            log_manager.wait_persistent(lsn);
        }

        for rid in txn.all_locked_rids() {
            self.lock_manager.unlock(txn, rid)?;
        }
        info!("transaction {} committed", txn.id);
        Ok(())
    }

    /// Aborts `txn`: undoes the write-set in reverse, writes ABORT, waits
    /// for it to become durable, then releases every held lock.
    pub fn abort(&self, txn: &mut Transaction) -> Result<()> {
        txn.state = TransactionState::Aborted;

        while let Some(record) = txn.write_set.pop() {
            match record.kind {
                WriteKind::Insert | WriteKind::Delete | WriteKind::Update => (record.undo)(),
            }
        }

        if let Some(log_manager) = &self.log_manager {
            let lsn =
                log_manager.append(LogRecord::new(txn.id, txn.prev_lsn, RecordBody::Abort));
            txn.prev_lsn = lsn;
            log_manager.wait_persistent(lsn);
        }

        for rid in txn.all_locked_rids() {
            self.lock_manager.unlock(txn, rid)?;
        }
        info!("transaction {} aborted", txn.id);
        Ok(())
    }
}
