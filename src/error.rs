//! Crate-wide error type.

use std::io;

use thiserror::Error;

/// The closed set of ways a storage-engine operation can fail.
///
/// Structural failures (`IoFailure`, `Corruption`) are meant to propagate to
/// the top of the call stack and halt the affected operation or recovery
/// pass. Logical failures (`Duplicate`, `NotFound`, `TxnAborted`,
/// `OutOfMemoryPage`) are returned to the caller for handling.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no evictable frame available in the buffer pool")]
    OutOfMemoryPage,

    #[error("key already present")]
    Duplicate,

    #[error("key not found")]
    NotFound,

    #[error("transaction aborted: {0}")]
    TxnAborted(String),

    #[error("disk i/o failure: {0}")]
    IoFailure(#[from] io::Error),

    #[error("log or page corruption: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, Error>;
