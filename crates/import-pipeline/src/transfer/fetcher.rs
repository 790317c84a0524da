//! Chunk fetcher
//!
//! A single actor task owns the read offset of one staged file. Callers send
//! chunk requests over a channel; the actor hands them out FIFO to at most
//! `pool_size` range-read workers, reserving `[offset, offset + size)` for
//! each before it starts so concurrent reads never overlap.
//!
//! A read starting at or beyond the end of the object answers
//! [`ChunkOutcome::EndOfData`]. Any other failure is returned to the caller
//! that asked for the chunk and is not retried; the unread range is handed
//! to the next request instead, so the stream keeps no gap. A worker that
//! panics gives its range back the same way and its caller sees
//! [`ImportError::FetcherClosed`].
//!
//! ```rust,ignore
//! let fetcher = ChunkFetcher::spawn(staging, staged.key.clone(), FetcherConfig::default());
//! while let ChunkOutcome::Data { offset, bytes } = fetcher.next_chunk().await? {
//!     sequencer.push(offset, bytes);
//! }
//! ```

use bytes::Bytes;
use import_common::{ImportError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, trace, warn};

use crate::staging::StagingStore;

/// Default number of bytes per chunk request (1 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default number of concurrent range reads
pub const DEFAULT_FETCH_WORKERS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Size used by [`ChunkFetcher::next_chunk`]
    pub chunk_size: u64,
    /// Maximum number of range reads in flight; 1 reads strictly in sequence
    pub pool_size: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            pool_size: DEFAULT_FETCH_WORKERS,
        }
    }
}

/// Answer to one chunk request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Bytes starting at `offset` of the staged file
    Data { offset: u64, bytes: Bytes },
    EndOfData,
}

/// Counters for one transfer session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    pub bytes_delivered: u64,
    pub chunks_served: u64,
    pub end_of_data_replies: u64,
    pub failed_reads: u64,
}

struct ChunkRequest {
    seq: u64,
    size: u64,
    reply: oneshot::Sender<Result<ChunkOutcome>>,
}

enum Command {
    Fetch(ChunkRequest),
    Stats(oneshot::Sender<TransferStats>),
}

struct ReadDone {
    request: ChunkRequest,
    start: u64,
    end: u64,
    result: Result<Option<Bytes>>,
}

/// Handle to a chunk fetcher actor
///
/// Cheap to clone; the actor stops once every handle is dropped and the last
/// in-flight read has completed.
#[derive(Clone)]
pub struct ChunkFetcher {
    tx: mpsc::UnboundedSender<Command>,
    next_seq: Arc<AtomicU64>,
    chunk_size: u64,
}

impl ChunkFetcher {
    /// Start the actor for the staged object `key`
    pub fn spawn(store: Arc<dyn StagingStore>, key: impl Into<String>, config: FetcherConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = FetchActor {
            store,
            key: key.into(),
            pool_size: config.pool_size.max(1),
            offset: 0,
            gaps: BTreeMap::new(),
            queue: VecDeque::new(),
            workers: JoinSet::new(),
            in_flight: HashMap::new(),
            stats: TransferStats::default(),
        };
        tokio::spawn(actor.run(rx));

        Self {
            tx,
            next_seq: Arc::new(AtomicU64::new(0)),
            chunk_size: config.chunk_size,
        }
    }

    /// Queue a request for up to `size` bytes
    ///
    /// The request is enqueued before this returns; the future resolves once
    /// a worker has served it.
    pub fn request_chunk(&self, size: u64) -> impl Future<Output = Result<ChunkOutcome>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let queued = if size == 0 {
            Err(ImportError::Config("chunk size must be greater than zero".to_string()))
        } else {
            self.tx
                .send(Command::Fetch(ChunkRequest { seq, size, reply }))
                .map_err(|_| ImportError::FetcherClosed)
        };

        async move {
            match queued {
                Ok(()) => rx.await.unwrap_or(Err(ImportError::FetcherClosed)),
                Err(e) => Err(e),
            }
        }
    }

    /// Request a chunk of the configured size
    pub fn next_chunk(&self) -> impl Future<Output = Result<ChunkOutcome>> + Send + 'static {
        self.request_chunk(self.chunk_size)
    }

    pub async fn stats(&self) -> Result<TransferStats> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Stats(reply))
            .map_err(|_| ImportError::FetcherClosed)?;
        rx.await.map_err(|_| ImportError::FetcherClosed)
    }
}

struct FetchActor {
    store: Arc<dyn StagingStore>,
    key: String,
    pool_size: usize,
    /// End of the highest range reserved so far
    offset: u64,
    /// Ranges whose read failed, start -> end
    gaps: BTreeMap<u64, u64>,
    queue: VecDeque<ChunkRequest>,
    workers: JoinSet<ReadDone>,
    /// Range reserved by each running worker
    in_flight: HashMap<Id, (u64, u64)>,
    stats: TransferStats,
}

impl FetchActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut open = true;

        loop {
            self.dispatch();

            tokio::select! {
                command = rx.recv(), if open => match command {
                    Some(Command::Fetch(request)) => self.queue.push_back(request),
                    Some(Command::Stats(reply)) => {
                        let _ = reply.send(self.stats);
                    },
                    None => open = false,
                },
                Some(joined) = self.workers.join_next_with_id(), if !self.workers.is_empty() => match joined {
                    Ok((id, done)) => {
                        self.in_flight.remove(&id);
                        self.complete(done);
                    },
                    Err(e) => {
                        self.stats.failed_reads += 1;
                        error!(key = %self.key, error = %e, "Range read worker panicked");
                        if let Some((start, end)) = self.in_flight.remove(&e.id()) {
                            self.release(start, end);
                        }
                    },
                },
                else => break,
            }
        }

        debug!(key = %self.key, stats = ?self.stats, "Chunk fetcher stopped");
    }

    /// Start reads while requests are queued and the pool has room
    fn dispatch(&mut self) {
        while self.workers.len() < self.pool_size {
            let Some(request) = self.queue.pop_front() else {
                break;
            };
            if request.reply.is_closed() {
                trace!(seq = request.seq, "Dropping abandoned chunk request");
                continue;
            }

            let (start, end) = self.reserve(request.size);
            debug!(
                key = %self.key,
                seq = request.seq,
                start,
                end,
                in_flight = self.workers.len() + 1,
                "Loading chunk"
            );

            let store = self.store.clone();
            let key = self.key.clone();
            let handle = self.workers.spawn(async move {
                let result = read_range(store.as_ref(), &key, start, end).await;
                ReadDone {
                    request,
                    start,
                    end,
                    result,
                }
            });
            self.in_flight.insert(handle.id(), (start, end));
        }
    }

    /// Next range to read: the lowest failed range first, else fresh bytes
    fn reserve(&mut self, size: u64) -> (u64, u64) {
        if let Some((start, end)) = self.gaps.pop_first() {
            let take_end = end.min(start + size);
            if take_end < end {
                self.gaps.insert(take_end, end);
            }
            return (start, take_end);
        }

        let start = self.offset;
        self.offset += size;
        (start, self.offset)
    }

    /// Give an unread range back
    fn release(&mut self, start: u64, end: u64) {
        if end == self.offset {
            self.offset = start;
        } else {
            self.gaps.insert(start, end);
        }
    }

    fn complete(&mut self, done: ReadDone) {
        let ReadDone {
            request,
            start,
            end,
            result,
        } = done;

        let reply = match result {
            Ok(Some(bytes)) => {
                let read_end = start + bytes.len() as u64;
                if read_end < end {
                    // short read: the object ends at read_end
                    self.release(read_end, end);
                }
                self.stats.bytes_delivered += bytes.len() as u64;
                self.stats.chunks_served += 1;
                trace!(seq = request.seq, start, len = bytes.len(), "Chunk served");
                Ok(ChunkOutcome::Data { offset: start, bytes })
            },
            Ok(None) => {
                self.release(start, end);
                self.stats.end_of_data_replies += 1;
                Ok(ChunkOutcome::EndOfData)
            },
            Err(e) => {
                self.release(start, end);
                self.stats.failed_reads += 1;
                warn!(key = %self.key, seq = request.seq, start, error = %e, "Chunk read failed");
                Err(e)
            },
        };

        if request.reply.send(reply).is_err() {
            trace!(seq = request.seq, "Chunk requester went away");
        }
    }
}

/// Read `[start, end)` fully; `None` once the range lies beyond the end
async fn read_range(store: &dyn StagingStore, key: &str, start: u64, end: u64) -> Result<Option<Bytes>> {
    let mut reader = match store.read_range(key, start, end).await {
        Ok(reader) => reader,
        Err(e) if e.is_range_not_satisfiable() => return Ok(None),
        Err(e) => return Err(e),
    };

    let capacity = usize::try_from(end - start).unwrap_or(0);
    let mut buffer = Vec::with_capacity(capacity);
    reader.read_to_end(&mut buffer).await?;

    if buffer.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Bytes::from(buffer)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::source::ByteReader;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    /// In-memory staged object
    struct MemoryObject(Vec<u8>);

    #[async_trait]
    impl StagingStore for MemoryObject {
        async fn write_stream(&self, _key: &str, _content_type: &str, _reader: ByteReader) -> Result<u64> {
            unimplemented!("read-only test store")
        }

        async fn read_range(&self, key: &str, start: u64, end: u64) -> Result<ByteReader> {
            let len = self.0.len() as u64;
            if start >= len {
                return Err(ImportError::RangeNotSatisfiable { key: key.to_string(), start });
            }
            let slice = self.0[start as usize..end.min(len) as usize].to_vec();
            Ok(Box::new(std::io::Cursor::new(slice)))
        }
    }

    /// Panics on the first read starting at `panic_at`
    struct PanickingObject {
        inner: MemoryObject,
        panic_at: u64,
        panicked: AtomicBool,
    }

    #[async_trait]
    impl StagingStore for PanickingObject {
        async fn write_stream(&self, key: &str, content_type: &str, reader: ByteReader) -> Result<u64> {
            self.inner.write_stream(key, content_type, reader).await
        }

        async fn read_range(&self, key: &str, start: u64, end: u64) -> Result<ByteReader> {
            if start == self.panic_at && !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("range read blew up");
            }
            self.inner.read_range(key, start, end).await
        }
    }

    fn fetcher(data: &[u8], chunk_size: u64, pool_size: usize) -> ChunkFetcher {
        ChunkFetcher::spawn(
            Arc::new(MemoryObject(data.to_vec())),
            "obj",
            FetcherConfig { chunk_size, pool_size },
        )
    }

    #[tokio::test]
    async fn test_sequential_reads_then_end_of_data() {
        let fetcher = fetcher(b"hello world", 4, 1);

        let mut chunks = Vec::new();
        while let ChunkOutcome::Data { offset, bytes } = fetcher.next_chunk().await.unwrap() {
            chunks.push((offset, bytes));
        }

        assert_eq!(
            chunks,
            vec![
                (0, Bytes::from_static(b"hell")),
                (4, Bytes::from_static(b"o wo")),
                (8, Bytes::from_static(b"rld")),
            ]
        );
        assert_eq!(fetcher.next_chunk().await.unwrap(), ChunkOutcome::EndOfData);

        let stats = fetcher.stats().await.unwrap();
        assert_eq!(stats.bytes_delivered, 11);
        assert_eq!(stats.chunks_served, 3);
    }

    #[tokio::test]
    async fn test_empty_object_is_end_of_data() {
        let fetcher = fetcher(b"", 8, 2);
        assert_eq!(fetcher.next_chunk().await.unwrap(), ChunkOutcome::EndOfData);
    }

    #[tokio::test]
    async fn test_zero_size_request_is_rejected() {
        let fetcher = fetcher(b"abc", 8, 1);
        assert!(matches!(fetcher.request_chunk(0).await, Err(ImportError::Config(_))));
    }

    #[tokio::test]
    async fn test_concurrent_requests_get_disjoint_ranges() {
        let fetcher = fetcher(b"0123456789abcdef", 4, 4);

        let requests: Vec<_> = (0..4).map(|_| fetcher.next_chunk()).collect();
        let mut offsets = Vec::new();
        for outcome in futures::future::join_all(requests).await {
            match outcome.unwrap() {
                ChunkOutcome::Data { offset, bytes } => {
                    assert_eq!(bytes.len(), 4);
                    offsets.push(offset);
                },
                ChunkOutcome::EndOfData => panic!("unexpected end of data"),
            }
        }
        offsets.sort_unstable();
        assert_eq!(offsets, vec![0, 4, 8, 12]);
    }

    #[test]
    fn test_failed_range_is_handed_out_again() {
        let mut actor = FetchActor {
            store: Arc::new(MemoryObject(Vec::new())),
            key: "obj".to_string(),
            pool_size: 2,
            offset: 0,
            gaps: BTreeMap::new(),
            queue: VecDeque::new(),
            workers: JoinSet::new(),
            in_flight: HashMap::new(),
            stats: TransferStats::default(),
        };

        assert_eq!(actor.reserve(4), (0, 4));
        assert_eq!(actor.reserve(4), (4, 8));

        // earlier range fails while a later one is reserved
        actor.release(0, 4);
        assert_eq!(actor.reserve(2), (0, 2));
        assert_eq!(actor.reserve(4), (2, 4));
        assert_eq!(actor.reserve(4), (8, 12));

        // latest reservation fails: the offset rewinds
        actor.release(8, 12);
        assert_eq!(actor.offset, 8);
    }

    #[tokio::test]
    async fn test_panicked_read_gives_its_range_back() {
        let store = PanickingObject {
            inner: MemoryObject(b"abcdefgh".to_vec()),
            panic_at: 0,
            panicked: AtomicBool::new(false),
        };
        let fetcher = ChunkFetcher::spawn(
            Arc::new(store),
            "obj",
            FetcherConfig {
                chunk_size: 4,
                pool_size: 1,
            },
        );

        assert!(matches!(fetcher.next_chunk().await, Err(ImportError::FetcherClosed)));

        let mut chunks = Vec::new();
        while let ChunkOutcome::Data { offset, bytes } = fetcher.next_chunk().await.unwrap() {
            chunks.push((offset, bytes));
        }
        assert_eq!(
            chunks,
            vec![(0, Bytes::from_static(b"abcd")), (4, Bytes::from_static(b"efgh"))]
        );

        let stats = fetcher.stats().await.unwrap();
        assert_eq!(stats.failed_reads, 1);
    }
}
