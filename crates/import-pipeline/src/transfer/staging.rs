//! Copy the remote source into the staging store

use chrono::{DateTime, SecondsFormat, Utc};
use import_common::{FileStat, Result};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::io::InspectReader;
use tracing::{info, instrument, warn};

use crate::source::RemoteByteSource;
use crate::staging::StagingStore;

pub const STAGED_CONTENT_TYPE: &str = "text/csv";

/// A staged copy of one source file version
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StagedFile {
    pub key: String,
    pub size: u64,
    /// Hex SHA-256 of the staged bytes, unknown for a reused staged copy
    pub sha256: Option<String>,
}

/// Staging key for a source file version staged at `now`
pub fn staged_key(
    staging_prefix: &str,
    lock_prefix: &str,
    stat: &FileStat,
    now: DateTime<Utc>,
) -> String {
    format!(
        "{}/{}-{}-{}-{}.csv",
        staging_prefix.trim_end_matches('/'),
        lock_prefix,
        now.to_rfc3339_opts(SecondsFormat::Millis, true),
        stat.size,
        stat.modified_millis()
    )
}

/// Pipe the source file at `path` into `staging` under `key`
#[instrument(skip(source, staging))]
pub async fn stage_file(
    source: &dyn RemoteByteSource,
    staging: &dyn StagingStore,
    path: &str,
    key: &str,
) -> Result<StagedFile> {
    let started = Instant::now();
    let reader = source.open_read(path).await?;

    let hasher = Arc::new(Mutex::new(Sha256::new()));
    let sink = hasher.clone();
    let inspected = InspectReader::new(reader, move |bytes: &[u8]| {
        if let Ok(mut hasher) = sink.lock() {
            hasher.update(bytes);
        }
    });

    let size = staging
        .write_stream(key, STAGED_CONTENT_TYPE, Box::new(inspected))
        .await?;

    let sha256 = match hasher.lock() {
        Ok(hasher) => Some(hex::encode(hasher.clone().finalize())),
        Err(_) => {
            warn!(key, "Checksum state poisoned, staging without checksum");
            None
        },
    };

    info!(
        key,
        size,
        sha256 = sha256.as_deref().unwrap_or("-"),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Staged source file"
    );

    Ok(StagedFile {
        key: key.to_string(),
        size,
        sha256,
    })
}
