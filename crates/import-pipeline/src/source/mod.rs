//! Remote byte sources
//!
//! A source exposes the identity of the file to import (size and modification
//! time) and a sequential byte stream over its contents.
//!
//! - **ftp**: FTP server access through `suppaftp`
//! - **local**: plain files on a mounted filesystem

use async_trait::async_trait;
use import_common::{FileStat, Result};
use tokio::io::AsyncRead;

pub mod ftp;
pub mod local;

pub use ftp::{FtpConfig, FtpSource};
pub use local::LocalSource;

/// Owned, sendable async byte stream
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Read access to the file being imported
#[async_trait]
pub trait RemoteByteSource: Send + Sync {
    /// Size and modification time of the file at `path`
    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// Sequential stream over the whole file at `path`
    async fn open_read(&self, path: &str) -> Result<ByteReader>;

    /// Release the underlying connection. Called once at session end.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
