//! In-process lock store

use async_trait::async_trait;
use import_common::{ImportError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::IdempotencyGuard;

/// TTL lock store held in memory
///
/// Only protects against duplicate runs inside one process. Expired entries
/// are dropped lazily on lookup.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    locks: Mutex<HashMap<String, Instant>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live locks
    pub fn len(&self) -> Result<usize> {
        let locks = self.locks.lock().map_err(|_| Self::poisoned())?;
        let now = Instant::now();
        Ok(locks.values().filter(|expiry| **expiry > now).count())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn poisoned() -> ImportError {
        ImportError::Lock("lock table mutex poisoned".to_string())
    }
}

#[async_trait]
impl IdempotencyGuard for MemoryLockStore {
    async fn has_lock(&self, key: &str) -> Result<bool> {
        let mut locks = self.locks.lock().map_err(|_| Self::poisoned())?;
        match locks.get(key) {
            Some(expiry) if *expiry > Instant::now() => Ok(true),
            Some(_) => {
                debug!(key, "Dropping expired lock");
                locks.remove(key);
                Ok(false)
            },
            None => Ok(false),
        }
    }

    async fn create_lock(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut locks = self.locks.lock().map_err(|_| Self::poisoned())?;
        let now = Instant::now();
        if locks.get(key).is_some_and(|expiry| *expiry > now) {
            return Err(ImportError::Lock(format!("Lock {} is already held", key)));
        }
        locks.insert(key.to_string(), now + ttl);
        debug!(key, ttl_secs = ttl.as_secs(), "Created lock");
        Ok(())
    }
}
