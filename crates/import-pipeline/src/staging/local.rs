//! Local directory staging

use async_trait::async_trait;
use import_common::{ImportError, Result};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, instrument};

use super::StagingStore;
use crate::source::ByteReader;

/// Staging store writing objects as files below a root directory
#[derive(Debug, Clone)]
pub struct LocalStaging {
    root: PathBuf,
}

impl LocalStaging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(Path::new(key.trim_start_matches('/')))
    }
}

#[async_trait]
impl StagingStore for LocalStaging {
    #[instrument(skip(self, reader))]
    async fn write_stream(
        &self,
        key: &str,
        content_type: &str,
        mut reader: ByteReader,
    ) -> Result<u64> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&path).await.map_err(|e| {
            ImportError::Staging(format!("Failed to create {}: {}", path.display(), e))
        })?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        debug!(path = %path.display(), written, "Staged file locally");
        Ok(written)
    }

    async fn read_range(&self, key: &str, start: u64, end: u64) -> Result<ByteReader> {
        let path = self.path_for(key);
        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            ImportError::Staging(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let len = file.metadata().await?.len();
        if start >= len {
            return Err(ImportError::RangeNotSatisfiable {
                key: key.to_string(),
                start,
            });
        }

        file.seek(SeekFrom::Start(start)).await?;
        let limit = end.min(len).saturating_sub(start);
        Ok(Box::new(file.take(limit)))
    }
}
