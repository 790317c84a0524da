//! Import coordinator
//!
//! Drives one import of one source file through its lifecycle:
//!
//! ```text
//! Idle -> CheckingLock -> Staging -> StagingDone ----> CreatingImport -> Streaming -> Committing -> Done
//!                      \-> AlreadyStaged ----------/
//!                      \-> Done (no new data)
//! ```
//!
//! Any error after leaving `Idle` ends in `Failed`: a created import is
//! deleted, the source connection is closed and the original error is
//! returned. The idempotency lock is left in place on failure so the same
//! file version is not picked up again before the lock expires.
//!
//! Streaming runs `consumer_count` consumers that each fetch a chunk, feed it
//! through the shared sequencer and assembler, and submit the records that
//! became complete. The first failing consumer records its error and stops
//! the others from requesting more chunks; work already in flight settles on
//! its own.

use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use import_common::{FileStat, ImportError, ImportId, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::assembler::{ChunkSequencer, Record, RecordAssembler};
use crate::config::{LockConfig, PipelineConfig, SourceConfig, StagingConfig};
use crate::importer::{normalize_records, CreateImport, HttpSampleImporter, SampleImporter};
use crate::lock::{lock_key, HttpLockClient, IdempotencyGuard, MemoryLockStore};
use crate::report::ImportReport;
use crate::source::{FtpSource, LocalSource, RemoteByteSource};
use crate::staging::{LocalStaging, S3Staging, StagingStore};
use crate::transfer::{stage_file, staged_key, ChunkFetcher, ChunkOutcome, FetcherConfig, StagedFile, TransferStats};

/// Lifecycle states of one import run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportState {
    Idle,
    CheckingLock,
    Staging,
    StagingDone,
    AlreadyStaged,
    CreatingImport,
    Streaming,
    Committing,
    Done,
    Failed,
}

/// Everything one run needs to know about its import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSettings {
    pub import_name: String,
    pub source_path: String,
    pub data_set_name: String,
    pub chunk_size: u64,
    pub consumer_count: usize,
    pub fetch_workers: usize,
    pub lock_ttl: Duration,
    pub staging_prefix: String,
    pub lock_prefix: String,
    pub tallied_fields: Vec<String>,
    pub unit_suffixed_fields: Vec<String>,
    pub domain: Option<String>,
    pub report_secret: Option<String>,
    /// Reuse this staged object instead of copying the source again
    pub resume_staged_key: Option<String>,
}

/// Result of a finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImportOutcome {
    /// The file version was already taken by an earlier run
    NoNewData { lock_key: String, stat: FileStat },
    Imported {
        import_id: ImportId,
        staged: StagedFile,
        report: ImportReport,
        transfer: TransferStats,
    },
}

/// Answer of a side-effect free probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockProbe {
    pub stat: FileStat,
    pub lock_key: String,
    pub locked: bool,
}

/// Hooks for lifecycle milestones
///
/// Every method defaults to a no-op.
pub trait ImportObserver: Send + Sync {
    fn on_state(&self, _state: ImportState) {}

    fn on_import_created(&self, _import_id: &ImportId) {}

    fn on_end(&self, _result: std::result::Result<&ImportOutcome, &ImportError>) {}
}

/// State shared by the streaming consumers of one run
struct StreamState {
    assembly: Mutex<Assembly>,
    report: Mutex<ImportReport>,
    first_error: Mutex<Option<ImportError>>,
    abort: CancellationToken,
}

impl StreamState {
    /// Keep the first error and stop further chunk requests
    async fn fail(&self, worker: usize, err: ImportError) {
        let mut slot = self.first_error.lock().await;
        if slot.is_none() {
            error!(worker, error = %err, "Streaming consumer failed, aborting");
            *slot = Some(err);
        } else {
            debug!(worker, error = %err, "Further consumer failure after abort");
        }
        self.abort.cancel();
    }
}

#[derive(Default)]
struct Assembly {
    sequencer: ChunkSequencer,
    assembler: RecordAssembler,
}

impl Assembly {
    fn absorb(&mut self, offset: u64, bytes: bytes::Bytes) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for chunk in self.sequencer.push(offset, bytes) {
            if let Some(parsed) = self.assembler.absorb(&chunk)? {
                records.extend(parsed);
            }
        }
        Ok(records)
    }

    fn finish(&mut self) -> Result<Vec<Record>> {
        if !self.sequencer.is_drained() {
            return Err(ImportError::Staging(format!(
                "Staged stream ended with a gap at offset {}",
                self.sequencer.next_offset()
            )));
        }
        Ok(self.assembler.flush()?.unwrap_or_default())
    }
}

pub struct ImportCoordinator {
    source: Arc<dyn RemoteByteSource>,
    staging: Arc<dyn StagingStore>,
    lock: Arc<dyn IdempotencyGuard>,
    importer: Arc<dyn SampleImporter>,
    observer: Option<Arc<dyn ImportObserver>>,
}

impl ImportCoordinator {
    pub fn new(
        source: Arc<dyn RemoteByteSource>,
        staging: Arc<dyn StagingStore>,
        lock: Arc<dyn IdempotencyGuard>,
        importer: Arc<dyn SampleImporter>,
    ) -> Self {
        Self {
            source,
            staging,
            lock,
            importer,
            observer: None,
        }
    }

    /// Wire up the backends selected in `config`
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let source: Arc<dyn RemoteByteSource> = match &config.source {
            SourceConfig::Ftp(ftp) => Arc::new(FtpSource::new(ftp.clone())),
            SourceConfig::Local { root } => Arc::new(LocalSource::new(root)),
        };
        let staging: Arc<dyn StagingStore> = match &config.staging {
            StagingConfig::S3(s3) => Arc::new(S3Staging::new(s3.clone())),
            StagingConfig::Local { root } => Arc::new(LocalStaging::new(root)),
        };
        let lock: Arc<dyn IdempotencyGuard> = match &config.lock {
            LockConfig::Http(http) => Arc::new(HttpLockClient::new(http.clone())?),
            LockConfig::Memory => {
                warn!("Using in-memory locks; duplicate runs across processes are not detected");
                Arc::new(MemoryLockStore::new())
            },
        };
        let importer = Arc::new(HttpSampleImporter::new(config.importer.clone())?);

        Ok(Self::new(source, staging, lock, importer))
    }

    pub fn with_observer(mut self, observer: Arc<dyn ImportObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn transition(&self, state: ImportState) {
        debug!(?state, "Import state changed");
        if let Some(observer) = &self.observer {
            observer.on_state(state);
        }
    }

    /// Stat the source and look up its lock without changing anything
    pub async fn probe(&self, settings: &ImportSettings) -> Result<LockProbe> {
        let probe = self.lookup_lock(settings).await;
        self.close_source().await;
        probe
    }

    async fn lookup_lock(&self, settings: &ImportSettings) -> Result<LockProbe> {
        let stat = self.source.stat(&settings.source_path).await?;
        let key = lock_key(&settings.lock_prefix, &stat);
        let locked = self.lock.has_lock(&key).await?;
        Ok(LockProbe {
            stat,
            lock_key: key,
            locked,
        })
    }

    /// Run one full import cycle
    pub async fn run(&self, settings: &ImportSettings) -> Result<ImportOutcome> {
        let run_id = Uuid::new_v4();
        let span = info_span!("import_run", import = %settings.import_name, run_id = %run_id);

        async {
            self.transition(ImportState::Idle);
            let mut created = None;

            let result = self.attempt(settings, &mut created).await;
            let result = match result {
                Ok(outcome) => {
                    self.close_source().await;
                    Ok(outcome)
                },
                Err(err) => {
                    self.transition(ImportState::Failed);
                    error!(error = %err, "Import failed");
                    self.rollback(created.as_ref()).await;
                    self.close_source().await;
                    Err(err)
                },
            };

            if let Some(observer) = &self.observer {
                observer.on_end(result.as_ref());
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, settings: &ImportSettings, created: &mut Option<ImportId>) -> Result<ImportOutcome> {
        self.transition(ImportState::CheckingLock);
        let stat = self.source.stat(&settings.source_path).await?;
        info!(size = stat.size, modified = %stat.modified, "Source file found");

        let key = lock_key(&settings.lock_prefix, &stat);
        let locked = self.lock.has_lock(&key).await?;

        let staged = match (&settings.resume_staged_key, locked) {
            (None, true) => {
                info!(lock_key = %key, "No new data found");
                self.transition(ImportState::Done);
                return Ok(ImportOutcome::NoNewData { lock_key: key, stat });
            },
            (None, false) => {
                self.transition(ImportState::Staging);
                self.lock.create_lock(&key, settings.lock_ttl).await?;

                let target = staged_key(&settings.staging_prefix, &settings.lock_prefix, &stat, Utc::now());
                let staged = stage_file(
                    self.source.as_ref(),
                    self.staging.as_ref(),
                    &settings.source_path,
                    &target,
                )
                .await?;
                self.transition(ImportState::StagingDone);
                staged
            },
            (Some(existing), locked) => {
                if !locked {
                    self.lock.create_lock(&key, settings.lock_ttl).await?;
                }
                info!(staged_key = %existing, "Reusing staged copy");
                self.transition(ImportState::AlreadyStaged);
                StagedFile {
                    key: existing.clone(),
                    size: stat.size,
                    sha256: None,
                }
            },
        };

        self.transition(ImportState::CreatingImport);
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let request = CreateImport {
            dataset_id: settings.data_set_name.clone(),
            version_id: format!("{}-import-{}", settings.data_set_name, now),
            description: format!(
                "INFECT '{}' data import executed on {}",
                settings.data_set_name, now
            ),
        };
        info!(
            dataset = %request.dataset_id,
            version = %request.version_id,
            "Creating import"
        );
        let import_id = self.importer.create_import(&request).await?;
        *created = Some(import_id.clone());
        if let Some(observer) = &self.observer {
            observer.on_import_created(&import_id);
        }

        let mut report = ImportReport::new(&settings.import_name, &request.version_id, &settings.tallied_fields);
        if let (Some(domain), Some(secret)) = (&settings.domain, &settings.report_secret) {
            report = report.with_links(domain.clone(), secret);
        }

        self.transition(ImportState::Streaming);
        let (mut report, transfer) = self.stream(settings, &staged, &import_id, report).await?;

        self.transition(ImportState::Committing);
        report.finalize(Utc::now());
        self.importer.commit(&import_id).await?;
        info!(
            import_id = %import_id,
            imported = report.imported,
            duplicates = report.duplicate,
            invalid = report.invalid,
            "Import committed"
        );
        info!("{}", report.render_summary());

        self.transition(ImportState::Done);
        Ok(ImportOutcome::Imported {
            import_id,
            staged,
            report,
            transfer,
        })
    }

    async fn stream(
        &self,
        settings: &ImportSettings,
        staged: &StagedFile,
        import_id: &ImportId,
        report: ImportReport,
    ) -> Result<(ImportReport, TransferStats)> {
        let fetcher = ChunkFetcher::spawn(
            self.staging.clone(),
            staged.key.clone(),
            FetcherConfig {
                chunk_size: settings.chunk_size,
                pool_size: settings.fetch_workers,
            },
        );
        let state = StreamState {
            assembly: Mutex::new(Assembly::default()),
            report: Mutex::new(report),
            first_error: Mutex::new(None),
            abort: CancellationToken::new(),
        };

        let consumers = (0..settings.consumer_count.max(1)).map(|worker| {
            let fetcher = &fetcher;
            let state = &state;
            async move {
                match self.consume(worker, settings, fetcher, state, import_id).await {
                    Ok(()) => {},
                    Err(ImportError::Aborted(reason)) => debug!(worker, reason = %reason, "Consumer stopped"),
                    Err(err) => state.fail(worker, err).await,
                }
            }
        });
        join_all(consumers).await;

        if let Some(err) = state.first_error.lock().await.take() {
            return Err(err);
        }

        let remaining = state.assembly.lock().await.finish()?;
        if !remaining.is_empty() {
            self.submit(settings, import_id, remaining, &state).await?;
        }

        let transfer = fetcher.stats().await?;
        info!(
            bytes = transfer.bytes_delivered,
            chunks = transfer.chunks_served,
            "Streaming finished"
        );
        Ok((state.report.into_inner(), transfer))
    }

    async fn consume(
        &self,
        worker: usize,
        settings: &ImportSettings,
        fetcher: &ChunkFetcher,
        state: &StreamState,
        import_id: &ImportId,
    ) -> Result<()> {
        loop {
            if state.abort.is_cancelled() {
                return Err(ImportError::Aborted("no further chunks requested".to_string()));
            }

            let (offset, bytes) = match fetcher.next_chunk().await? {
                ChunkOutcome::Data { offset, bytes } => (offset, bytes),
                ChunkOutcome::EndOfData => {
                    debug!(worker, "Consumer reached end of data");
                    return Ok(());
                },
            };
            debug!(worker, offset, len = bytes.len(), "Got data chunk");

            let records = state.assembly.lock().await.absorb(offset, bytes)?;
            if state.abort.is_cancelled() {
                return Err(ImportError::Aborted(format!(
                    "{} completed records not submitted",
                    records.len()
                )));
            }
            if records.is_empty() {
                continue;
            }
            self.submit(settings, import_id, records, state).await?;
        }
    }

    async fn submit(
        &self,
        settings: &ImportSettings,
        import_id: &ImportId,
        mut records: Vec<Record>,
        state: &StreamState,
    ) -> Result<()> {
        normalize_records(&mut records, &settings.unit_suffixed_fields);
        debug!(records = records.len(), "Sending rows to the importer");

        let result = self.importer.store_records(import_id, &records).await?;
        if !result.invalid_samples.is_empty() {
            debug!(rejected = result.invalid_samples.len(), "Importer rejected rows");
        }

        let mut report = state.report.lock().await;
        report.accumulate(&result);
        debug!(
            imported = report.imported,
            invalid = report.invalid,
            "Batch accumulated"
        );
        Ok(())
    }

    async fn rollback(&self, created: Option<&ImportId>) {
        let Some(import_id) = created else {
            return;
        };
        warn!(import_id = %import_id, "Deleting import");
        if let Err(e) = self.importer.delete(import_id).await {
            warn!(import_id = %import_id, error = %e, "Failed to delete import during rollback");
        }
    }

    async fn close_source(&self) {
        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Failed to close source connection");
        }
    }
}
