//! Record assembly across chunk boundaries
//!
//! Chunks are cut at arbitrary byte offsets, so a line may straddle two or
//! more of them. [`RecordAssembler`] keeps the trailing partial line between
//! calls and only parses text up to the last newline it has seen. Chunks that
//! complete out of order are put back in byte order by [`ChunkSequencer`]
//! before they reach the assembler.

use bytes::Bytes;
use csv::{ReaderBuilder, StringRecord};
use import_common::{ImportError, Result};
use std::collections::BTreeMap;
use tracing::trace;

/// One parsed row, keyed by column name
pub type Record = BTreeMap<String, String>;

/// Turns a byte stream into batches of whole records
#[derive(Debug, Default)]
pub struct RecordAssembler {
    buffer: Vec<u8>,
    header: Option<StringRecord>,
}

impl RecordAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Column names, once the first non-empty line has been parsed
    pub fn header(&self) -> Option<&StringRecord> {
        self.header.as_ref()
    }

    /// Bytes held back waiting for a newline
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Add a chunk and parse every line it completes
    ///
    /// Returns `None` while no complete record is available.
    pub fn absorb(&mut self, chunk: &[u8]) -> Result<Option<Vec<Record>>> {
        self.buffer.extend_from_slice(chunk);

        let Some(newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            trace!(buffered = self.buffer.len(), "No complete line yet");
            return Ok(None);
        };

        let remainder = self.buffer.split_off(newline + 1);
        let complete = std::mem::replace(&mut self.buffer, remainder);
        self.parse(&complete)
    }

    /// Parse whatever is left in the buffer, usually a last line without a
    /// trailing newline
    pub fn flush(&mut self) -> Result<Option<Vec<Record>>> {
        let rest = std::mem::take(&mut self.buffer);
        self.parse(&rest)
    }

    /// Field values are kept verbatim so the result does not depend on where
    /// the chunks were cut; only lines holding nothing but whitespace are
    /// skipped.
    fn parse(&mut self, text: &[u8]) -> Result<Option<Vec<Record>>> {
        if text.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text);

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| ImportError::Parse(format!("Malformed CSV: {}", e)))?;
            if row.len() == 1 && row[0].trim().is_empty() {
                continue;
            }

            let Some(header) = &self.header else {
                self.header = Some(row);
                continue;
            };

            if row.len() != header.len() {
                return Err(ImportError::Parse(format!(
                    "Row has {} fields but the header has {}{}",
                    row.len(),
                    header.len(),
                    row.position()
                        .map(|p| format!(" (line {} of batch)", p.line()))
                        .unwrap_or_default()
                )));
            }

            records.push(
                header
                    .iter()
                    .zip(row.iter())
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect(),
            );
        }

        if records.is_empty() {
            Ok(None)
        } else {
            Ok(Some(records))
        }
    }
}

/// Reorder buffer keyed by byte offset
///
/// Accepts chunks in completion order and releases them in stream order.
#[derive(Debug, Default)]
pub struct ChunkSequencer {
    next_offset: u64,
    pending: BTreeMap<u64, Bytes>,
}

impl ChunkSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of the next byte the sequencer is waiting for
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Insert a chunk and return every chunk that is now contiguous
    pub fn push(&mut self, offset: u64, bytes: Bytes) -> Vec<Bytes> {
        if !bytes.is_empty() {
            self.pending.insert(offset, bytes);
        }

        let mut ready = Vec::new();
        while let Some(bytes) = self.pending.remove(&self.next_offset) {
            self.next_offset += bytes.len() as u64;
            ready.push(bytes);
        }
        ready
    }

    /// True when no chunk is waiting on a gap
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty()
    }
}
