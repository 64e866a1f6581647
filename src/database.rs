//! Wires the storage engine's layers together into one running instance.
//!
//! Grounded on the lineage's `common::Database`: a handful of owned
//! components (buffer pool, lock manager, transaction manager, log manager)
//! built from one [`Config`] and shared by `Arc` with anything that needs
//! them. The lineage's version reaches for a `static mut` raw pointer behind
//! a `std::sync::Once`; this crate gets the same "construct once, hand out a
//! `&'static` reference" shape from `once_cell::sync::OnceCell` instead, and
//! keeps the constructor (`Database::new`) public and side-effect-free so
//! tests can build as many independent instances as they like rather than
//! being forced through the global.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use env_logger::Builder;
use once_cell::sync::OnceCell;

use crate::buffer::BufferPoolManager;
use crate::config::Config;
use crate::disk::DiskManager;
use crate::error::Result;
use crate::lock::LockManager;
use crate::recovery;
use crate::txn::{Transaction, TransactionManager};
use crate::wal::LogManager;

/// A single running instance of the engine: one [`Config`], one on-disk
/// database/log file pair, and the buffer pool, lock manager, transaction
/// manager and (optionally) log manager built on top of them.
///
/// Carries no index of its own — a `Database` is the substrate a B+Tree
/// index is built over (`BPlusTree::new(Arc::clone(db.buffer_pool()))`), not
/// a table catalog; see `SPEC_FULL.md` §1 for the table-heap/catalog layer
/// this crate leaves out of scope.
pub struct Database {
    config: Config,
    disk_manager: Arc<DiskManager>,
    buffer_pool: Arc<BufferPoolManager>,
    log_manager: Option<Arc<LogManager>>,
    lock_manager: Arc<LockManager>,
    transaction_manager: TransactionManager,
}

impl Database {
    /// Opens (or creates) the database file at `db_path` and the log file at
    /// `log_path`, replays the log against a fresh buffer pool, and returns
    /// a ready-to-use instance. Recovery always runs, even on a freshly
    /// created pair of files, where it is a no-op (`recovery::recover`
    /// returns immediately on an empty log).
    pub fn new<P: AsRef<Path>>(config: Config, db_path: P, log_path: P) -> Result<Self> {
        let disk_manager = Arc::new(DiskManager::new(db_path, log_path)?);

        let log_manager = if config.enable_logging {
            Some(LogManager::new(
                Arc::clone(&disk_manager),
                config.log_buffer_size,
                config.log_timeout,
            ))
        } else {
            None
        };

        let buffer_pool = Arc::new(BufferPoolManager::new(
            config.pool_size,
            config.bucket_size,
            Arc::clone(&disk_manager),
            log_manager.clone(),
        ));

        recovery::recover(&buffer_pool, &disk_manager)?;

        let lock_manager = Arc::new(LockManager::new(config.strict_2pl, config.bucket_size));
        let transaction_manager =
            TransactionManager::new(Arc::clone(&lock_manager), log_manager.clone());

        Ok(Database {
            config,
            disk_manager,
            buffer_pool,
            log_manager,
            lock_manager,
            transaction_manager,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool
    }

    pub fn log_manager(&self) -> Option<&Arc<LogManager>> {
        self.log_manager.as_ref()
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.transaction_manager
    }

    pub fn begin(&self) -> Transaction {
        self.transaction_manager.begin()
    }

    pub fn commit(&self, txn: &mut Transaction) -> Result<()> {
        self.transaction_manager.commit(txn)
    }

    pub fn abort(&self, txn: &mut Transaction) -> Result<()> {
        self.transaction_manager.abort(txn)
    }

    /// Opens the default on-disk database under `data/default_db/`,
    /// creating the directory on first run, and installs it as the process
    /// singleton returned by [`Database::global`]. Intended for the demo
    /// binary and integration tests that want one shared engine instance
    /// rather than threading a `Database` through every call; unit tests
    /// that need an isolated instance should call [`Database::new`]
    /// directly against a temp directory instead.
    pub fn global() -> &'static Database {
        static INSTANCE: OnceCell<Database> = OnceCell::new();
        INSTANCE.get_or_init(|| {
            let db_path = PathBuf::from("data").join("default_db");
            if !db_path.exists() {
                std::fs::create_dir_all(&db_path).expect("create default_db directory");
            }
            let data_file = db_path.join("anchor.db");
            let log_file = db_path.join("anchor.log");
            Database::new(Config::default(), data_file, log_file)
                .expect("open the default on-disk database")
        })
    }
}

/// Installs an `env_logger` that prefixes every line with level, target,
/// file and line number. Safe to call more than once; only the first call
/// takes effect.
pub fn init_log() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        let mut builder = Builder::from_default_env();
        builder
            .format_timestamp_secs()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} - {}] [{}:{}] {}",
                    record.level(),
                    record.target(),
                    record.file().unwrap_or("?"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .is_test(cfg!(test))
            .try_init()
            .ok();
    });
}
