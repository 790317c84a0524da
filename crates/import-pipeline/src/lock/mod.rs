//! Idempotency locks
//!
//! A lock keyed on the identity of the source file (size and modification
//! time) marks that version of the file as taken. Locks are created once,
//! carry a TTL and are never renewed or released by the pipeline; an expired
//! lock on a file that was never committed points at an earlier failed run.

use async_trait::async_trait;
use import_common::{FileStat, Result};
use std::time::Duration;

pub mod http;
pub mod memory;

pub use http::{HttpLockClient, HttpLockConfig};
pub use memory::MemoryLockStore;

/// Cross-run exclusivity claims keyed by file identity
#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    async fn has_lock(&self, key: &str) -> Result<bool>;

    /// Create a non-renewing lock that expires after `ttl`
    async fn create_lock(&self, key: &str, ttl: Duration) -> Result<()>;
}

/// Lock key for one version of a source file
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use import_common::FileStat;
/// use import_pipeline::lock::lock_key;
///
/// let stat = FileStat::new(1024, Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());
/// assert_eq!(lock_key("sample-import", &stat), "sample-import-1024-1700000000000.csv");
/// ```
pub fn lock_key(prefix: &str, stat: &FileStat) -> String {
    format!("{}-{}-{}.csv", prefix, stat.size, stat.modified_millis())
}
