//! Source-to-staging copy and chunked reads of the staged file
//!
//! - **staging**: one-time copy of the remote file into the staging store
//! - **fetcher**: actor serving fixed-size range reads of the staged copy

pub mod fetcher;
pub mod staging;

pub use fetcher::{ChunkFetcher, ChunkOutcome, FetcherConfig, TransferStats};
pub use staging::{stage_file, staged_key, StagedFile, STAGED_CONTENT_TYPE};
