//! Staging stores
//!
//! The source file is copied once into a staging store, then read back in
//! byte ranges by the chunk fetcher. Every store signals a range that starts
//! at or beyond the object length with [`ImportError::RangeNotSatisfiable`].
//!
//! [`ImportError::RangeNotSatisfiable`]: import_common::ImportError::RangeNotSatisfiable

use async_trait::async_trait;
use import_common::Result;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::source::ByteReader;

pub mod local;
pub mod s3;

pub use local::LocalStaging;
pub use s3::{S3Staging, S3StagingConfig};

/// Durable copy of the source file with ranged read access
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Write `reader` to completion under `key`, returning the bytes written
    async fn write_stream(&self, key: &str, content_type: &str, reader: ByteReader) -> Result<u64>;

    /// Stream over bytes `[start, end)` of the object under `key`
    ///
    /// A range extending past the end of the object is truncated.
    async fn read_range(&self, key: &str, start: u64, end: u64) -> Result<ByteReader>;
}

/// Read from `reader` until `buf` is full or the stream ends
pub(crate) async fn fill_buffer<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
