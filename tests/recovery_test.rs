//! Commit durability and crash recovery through a real [`Database`] reopen.
//! `src/recovery.rs`'s own unit tests exercise `recover` directly against a
//! bare buffer pool; these drive the same scenarios through the public
//! `Database` surface, including the transaction manager's begin/commit.

use anchor_db::wal::{LogRecord, RecordBody, Rid, INVALID_LSN};
use anchor_db::{Config, Database};
use tempfile::tempdir;

fn write_byte(db: &Database, page_id: i32, value: u8) {
    let frame = db.buffer_pool().fetch_page(page_id).unwrap();
    frame.write().data_mut()[0] = value;
    db.buffer_pool().unpin_page(page_id, true);
}

#[test]
fn a_committed_transactions_write_survives_a_simulated_crash_and_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");
    let log_path = dir.path().join("log");

    let pid = {
        let db = Database::new(Config::default(), db_path.clone(), log_path.clone()).unwrap();
        let (pid, _frame) = db.buffer_pool().new_page().unwrap();
        db.buffer_pool().unpin_page(pid, false);

        let mut txn = db.begin();
        let rid = Rid {
            page_id: pid,
            slot_id: 0,
        };
        let lsn = db.log_manager().unwrap().append(LogRecord::new(
            txn.id(),
            INVALID_LSN,
            RecordBody::Insert {
                rid,
                tuple: vec![9, 9, 9, 9],
            },
        ));
        db.log_manager().unwrap().wait_persistent(lsn);
        write_byte(&db, pid, 9);
        db.commit(&mut txn).unwrap();
        // no flush_page: only the log, not the page file, remembers this
        // write until recovery replays it
        pid
    };

    let db2 = Database::new(Config::default(), db_path, log_path).unwrap();
    let frame = db2.buffer_pool().fetch_page(pid).unwrap();
    assert_eq!(frame.read().data()[0], 9);
    db2.buffer_pool().unpin_page(pid, false);
}

#[test]
fn an_uncommitted_transactions_write_is_undone_on_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");
    let log_path = dir.path().join("log");

    let pid = {
        let db = Database::new(Config::default(), db_path.clone(), log_path.clone()).unwrap();
        let (pid, _frame) = db.buffer_pool().new_page().unwrap();
        db.buffer_pool().unpin_page(pid, false);

        let txn = db.begin();
        let rid = Rid {
            page_id: pid,
            slot_id: 0,
        };
        let lsn = db.log_manager().unwrap().append(LogRecord::new(
            txn.id(),
            INVALID_LSN,
            RecordBody::Insert {
                rid,
                tuple: vec![7, 7, 7, 7],
            },
        ));
        db.log_manager().unwrap().wait_persistent(lsn);
        write_byte(&db, pid, 7);
        // the process "crashes" here: txn is dropped with no COMMIT/ABORT
        // record ever written, so it is still active at end-of-log
        pid
    };

    let db2 = Database::new(Config::default(), db_path, log_path).unwrap();
    let frame = db2.buffer_pool().fetch_page(pid).unwrap();
    assert_eq!(frame.read().data()[0], 0);
    db2.buffer_pool().unpin_page(pid, false);
}
