//! Explicit runtime configuration.
//!
//! The lineage this engine grew from gated recovery/latch/isolation behavior
//! behind Cargo compile-time features and a process-global `ENABLE_LOGGING`
//! flag. Both are replaced here by a plain struct threaded through
//! construction, so a process can run more than one configuration (e.g. one
//! engine per test) without recompiling.

use std::time::Duration;

/// Knobs for a single storage engine instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of frames held by the buffer pool.
    pub pool_size: usize,
    /// Number of slots per extendible-hash bucket.
    pub bucket_size: usize,
    /// Capacity, in bytes, of each of the log manager's two buffers.
    pub log_buffer_size: usize,
    /// How long the flush thread sleeps between forced wakeups.
    pub log_timeout: Duration,
    /// Strict two-phase locking: locks are only released at commit/abort.
    pub strict_2pl: bool,
    /// Whether write-ahead logging is active. Disabling this is intended for
    /// isolated unit tests of components above the log manager; recovery is
    /// meaningless without it.
    pub enable_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pool_size: 64,
            bucket_size: 4,
            log_buffer_size: 4096,
            log_timeout: Duration::from_secs(1),
            strict_2pl: false,
            enable_logging: true,
        }
    }
}
