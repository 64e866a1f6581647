//! A disk-oriented, single-node storage engine core: extendible hash
//! table, buffer pool manager, latch-crabbed B+ tree index, and the
//! lock/transaction/write-ahead-log machinery that gives it two-phase
//! locking and ARIES-style crash recovery.
//!
//! [`Database`] wires every layer together for a caller who just wants a
//! running engine; the individual modules remain usable on their own for
//! anyone testing one layer in isolation.

pub mod btree;
pub mod buffer;
pub mod config;
pub mod database;
pub mod disk;
pub mod error;
pub mod hash;
pub mod latch;
pub mod lock;
pub mod page;
pub mod recovery;
pub mod txn;
pub mod wal;

pub use config::Config;
pub use database::Database;
pub use error::{Error, Result};
