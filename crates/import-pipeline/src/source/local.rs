//! Local filesystem source

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use import_common::{FileStat, ImportError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ByteReader, RemoteByteSource};

/// Source backed by files below a root directory
#[derive(Debug, Clone)]
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let relative = Path::new(path.trim_start_matches('/'));
        self.root.join(relative)
    }
}

#[async_trait]
impl RemoteByteSource for LocalSource {
    async fn stat(&self, path: &str) -> Result<FileStat> {
        let full = self.resolve(path);
        let metadata = tokio::fs::metadata(&full).await.map_err(|e| {
            ImportError::Source(format!("Failed to stat {}: {}", full.display(), e))
        })?;

        let modified: DateTime<Utc> = metadata.modified()?.into();
        debug!(path = %full.display(), size = metadata.len(), "Stat local source file");

        Ok(FileStat::new(metadata.len(), modified))
    }

    async fn open_read(&self, path: &str) -> Result<ByteReader> {
        let full = self.resolve(path);
        let file = tokio::fs::File::open(&full).await.map_err(|e| {
            ImportError::Source(format!("Failed to open {}: {}", full.display(), e))
        })?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_stat_and_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("samples.csv"), b"a,b\n1,2\n").unwrap();

        let source = LocalSource::new(dir.path());
        let stat = source.stat("/samples.csv").await.unwrap();
        assert_eq!(stat.size, 8);

        let mut reader = source.open_read("samples.csv").await.unwrap();
        let mut contents = String::new();
        reader.read_to_string(&mut contents).await.unwrap();
        assert_eq!(contents, "a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_missing_file_is_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalSource::new(dir.path());

        let err = source.stat("nope.csv").await.unwrap_err();
        assert!(matches!(err, ImportError::Source(_)));
    }
}
