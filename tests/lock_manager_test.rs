//! End-to-end wait-die deadlock prevention across real OS threads, driven
//! through a [`Database`]'s lock manager and transaction manager rather than
//! calling `LockManager` directly (see `src/lock/mod.rs`'s own unit tests
//! for single-threaded coverage of the same rules).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anchor_db::txn::TransactionState;
use anchor_db::wal::Rid;
use anchor_db::{Config, Database};
use tempfile::tempdir;

fn open() -> (tempfile::TempDir, Database) {
    let dir = tempdir().unwrap();
    let db = Database::new(Config::default(), dir.path().join("db"), dir.path().join("log")).unwrap();
    (dir, db)
}

fn rid(n: u32) -> Rid {
    Rid {
        page_id: 0,
        slot_id: n,
    }
}

#[test]
fn younger_transaction_dies_instead_of_blocking_an_older_one() {
    let (_dir, db) = open();
    let mut old = db.begin();
    let mut young = db.begin();
    assert!(old.id() < young.id());

    db.lock_manager().lock_shared(&mut old, rid(1)).unwrap();
    let err = db.lock_manager().lock_exclusive(&mut young, rid(1));
    assert!(err.is_err());
    assert_eq!(young.state(), TransactionState::Aborted);

    db.commit(&mut old).unwrap();
}

#[test]
fn older_transaction_waits_and_proceeds_once_the_younger_one_releases() {
    let (_dir, db) = open();
    let db = Arc::new(db);

    let mut old = db.begin();
    let mut young = db.begin();
    assert!(old.id() < young.id());
    db.lock_manager().lock_shared(&mut young, rid(1)).unwrap();

    let db2 = Arc::clone(&db);
    let handle = thread::spawn(move || {
        db2.lock_manager().lock_exclusive(&mut old, rid(1)).unwrap();
        old
    });

    // give the spawned thread time to block on the queue before releasing
    thread::sleep(Duration::from_millis(50));
    db.lock_manager().unlock(&mut young, rid(1)).unwrap();

    let mut old = handle.join().unwrap();
    assert_eq!(old.state(), TransactionState::Growing);
    db.commit(&mut old).unwrap();
}
