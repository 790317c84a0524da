//! Chunked sample import pipeline
//!
//! Copies a delimited data file from a remote source into a staging store
//! once per file version, then streams it back in byte-range chunks, turns
//! the chunks into whole records and submits them to a downstream importer.
//!
//! # Modules
//!
//! - [`source`]: remote byte sources (FTP, local files)
//! - [`staging`]: staging stores (S3-compatible, local directory)
//! - [`lock`]: idempotency locks keyed on file identity
//! - [`transfer`]: staging copy and the chunk fetcher
//! - [`assembler`]: line-boundary safe record assembly
//! - [`importer`]: downstream sample importer
//! - [`report`]: cumulative import report
//! - [`coordinator`]: the import lifecycle
//! - [`config`]: layered configuration

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod assembler;
pub mod config;
pub mod coordinator;
pub mod importer;
pub mod lock;
pub mod report;
pub mod source;
pub mod staging;
pub mod transfer;

pub use assembler::{ChunkSequencer, Record, RecordAssembler};
pub use config::{ImportDefinition, PipelineConfig};
pub use coordinator::{ImportCoordinator, ImportObserver, ImportOutcome, ImportSettings, ImportState};
pub use report::{ImportReport, InvalidDataView};
