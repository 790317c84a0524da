//! HTTP lock service client
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `GET  /locks/{key}` answers 200 when the lock is held and 404 when not
//! - `POST /locks` with `{"identifier", "ttl", "keepAlive"}` creates a lock;
//!   409 means somebody else holds it

use async_trait::async_trait;
use import_common::{ImportError, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use super::IdempotencyGuard;

/// Default timeout for lock service requests in seconds
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpLockConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_LOCK_TIMEOUT_SECS
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLockRequest<'a> {
    identifier: &'a str,
    /// TTL in seconds
    ttl: u64,
    keep_alive: bool,
}

pub struct HttpLockClient {
    client: Client,
    base_url: String,
}

impl HttpLockClient {
    pub fn new(config: HttpLockConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ImportError::Lock(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn lock_error(action: &str, key: &str, err: impl std::fmt::Display) -> ImportError {
        ImportError::Lock(format!("{} lock {} failed: {}", action, key, err))
    }
}

#[async_trait]
impl IdempotencyGuard for HttpLockClient {
    #[instrument(skip(self))]
    async fn has_lock(&self, key: &str) -> Result<bool> {
        let url = format!("{}/locks/{}", self.base_url, key);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::lock_error("Query", key, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(Self::lock_error("Query", key, status)),
        }
    }

    #[instrument(skip(self))]
    async fn create_lock(&self, key: &str, ttl: Duration) -> Result<()> {
        let url = format!("{}/locks", self.base_url);
        let request = CreateLockRequest {
            identifier: key,
            ttl: ttl.as_secs(),
            keep_alive: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::lock_error("Create", key, e))?;

        match response.status() {
            StatusCode::CONFLICT => Err(Self::lock_error("Create", key, "already held")),
            status if status.is_success() => {
                debug!(key, "Lock created");
                Ok(())
            },
            status => Err(Self::lock_error("Create", key, status)),
        }
    }
}
