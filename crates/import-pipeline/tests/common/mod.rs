//! Shared in-memory fakes for integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use import_common::{FileStat, ImportError, ImportId, Result};
use import_pipeline::assembler::Record;
use import_pipeline::coordinator::{ImportObserver, ImportOutcome, ImportSettings, ImportState};
use import_pipeline::importer::{BatchResult, CreateImport, SampleImporter, ValidSample};
use import_pipeline::source::{ByteReader, RemoteByteSource};
use import_pipeline::staging::StagingStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// CSV with a header and `rows` numbered rows
pub fn sample_csv(rows: usize) -> Vec<u8> {
    let mut csv = String::from("id,microorganism,substance,patient-age-range-from,patient-age-range-to\n");
    for i in 0..rows {
        csv.push_str(&format!("{},organism-{},substance-{},{},{}\n", i, i % 3, i % 2, i % 90, i % 90 + 9));
    }
    csv.into_bytes()
}

pub fn settings(name: &str) -> ImportSettings {
    ImportSettings {
        import_name: name.to_string(),
        source_path: "/exports/samples.csv".to_string(),
        data_set_name: format!("{}-data", name),
        chunk_size: 64,
        consumer_count: 3,
        fetch_workers: 2,
        lock_ttl: Duration::from_secs(3600),
        staging_prefix: "staged".to_string(),
        lock_prefix: "sample-import".to_string(),
        tallied_fields: vec!["microorganism".to_string(), "substance".to_string()],
        unit_suffixed_fields: vec![
            "patient-age-range-from".to_string(),
            "patient-age-range-to".to_string(),
        ],
        domain: None,
        report_secret: None,
        resume_staged_key: None,
    }
}

/// Remote file held in memory
pub struct MemorySource {
    data: Vec<u8>,
    stat: FileStat,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        let stat = FileStat::new(data.len() as u64, Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());
        Self {
            data,
            stat,
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RemoteByteSource for MemorySource {
    async fn stat(&self, _path: &str) -> Result<FileStat> {
        Ok(self.stat)
    }

    async fn open_read(&self, _path: &str) -> Result<ByteReader> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(std::io::Cursor::new(self.data.clone())))
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Staging store held in memory, with optional injected failures
#[derive(Default)]
pub struct MemoryStaging {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub writes: AtomicUsize,
    /// Range reads starting at or after this offset fail
    pub fail_reads_from: Option<u64>,
    /// Only the first range read starting exactly here fails
    pub fail_once_at: Option<u64>,
    pub fail_writes: bool,
    pub reads: AtomicUsize,
    /// Range reads issued after the first injected failure
    pub reads_after_failure: AtomicUsize,
    pub failed: AtomicBool,
}

impl MemoryStaging {
    pub fn failing_reads_from(offset: u64) -> Self {
        Self {
            fail_reads_from: Some(offset),
            ..Self::default()
        }
    }

    pub fn failing_once_at(offset: u64) -> Self {
        Self {
            fail_once_at: Some(offset),
            ..Self::default()
        }
    }

    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), data);
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl StagingStore for MemoryStaging {
    async fn write_stream(&self, key: &str, _content_type: &str, mut reader: ByteReader) -> Result<u64> {
        if self.fail_writes {
            return Err(ImportError::Staging("injected write failure".to_string()));
        }
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        let len = data.len() as u64;
        self.objects.lock().unwrap().insert(key.to_string(), data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(len)
    }

    async fn read_range(&self, key: &str, start: u64, end: u64) -> Result<ByteReader> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failed.load(Ordering::SeqCst) {
            self.reads_after_failure.fetch_add(1, Ordering::SeqCst);
        }

        let fail_once = self.fail_once_at == Some(start) && !self.failed.swap(true, Ordering::SeqCst);
        if fail_once || self.fail_reads_from.is_some_and(|from| start >= from) {
            self.failed.store(true, Ordering::SeqCst);
            return Err(ImportError::Staging("injected read failure".to_string()));
        }
        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(key)
            .ok_or_else(|| ImportError::Staging(format!("no object {}", key)))?;
        let len = data.len() as u64;
        if start >= len {
            return Err(ImportError::RangeNotSatisfiable {
                key: key.to_string(),
                start,
            });
        }
        let slice = data[start as usize..end.min(len) as usize].to_vec();
        Ok(Box::new(std::io::Cursor::new(slice)))
    }
}

/// Importer that accepts every record and remembers what it saw
#[derive(Default)]
pub struct RecordingImporter {
    pub created: Mutex<Vec<CreateImport>>,
    pub batches: Mutex<Vec<Vec<Record>>>,
    pub committed: Mutex<Vec<ImportId>>,
    pub deleted: Mutex<Vec<ImportId>>,
    pub fail_create: bool,
}

impl RecordingImporter {
    pub fn records(&self) -> Vec<Record> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl SampleImporter for RecordingImporter {
    async fn create_import(&self, request: &CreateImport) -> Result<ImportId> {
        if self.fail_create {
            return Err(ImportError::Importer("create refused".to_string()));
        }
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        Ok(ImportId::new(format!("import-{}", created.len())))
    }

    async fn store_records(&self, _import_id: &ImportId, records: &[Record]) -> Result<BatchResult> {
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(BatchResult {
            imported_count: records.len() as u64,
            valid_samples: records
                .iter()
                .map(|r| ValidSample {
                    original_values: r.clone(),
                })
                .collect(),
            ..BatchResult::default()
        })
    }

    async fn commit(&self, import_id: &ImportId) -> Result<()> {
        self.committed.lock().unwrap().push(import_id.clone());
        Ok(())
    }

    async fn delete(&self, import_id: &ImportId) -> Result<()> {
        self.deleted.lock().unwrap().push(import_id.clone());
        Ok(())
    }
}

/// Observer recording every callback
#[derive(Default)]
pub struct RecordingObserver {
    pub states: Mutex<Vec<ImportState>>,
    pub created: Mutex<Vec<ImportId>>,
    pub ends: Mutex<Vec<std::result::Result<(), String>>>,
}

impl ImportObserver for RecordingObserver {
    fn on_state(&self, state: ImportState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_import_created(&self, import_id: &ImportId) {
        self.created.lock().unwrap().push(import_id.clone());
    }

    fn on_end(&self, result: std::result::Result<&ImportOutcome, &ImportError>) {
        self.ends
            .lock()
            .unwrap()
            .push(result.map(|_| ()).map_err(|e| e.to_string()));
    }
}
