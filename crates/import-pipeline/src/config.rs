//! Configuration management
//!
//! Values are layered by `figment`: built-in defaults, then the TOML file
//! (`IMPORT_CONFIG`, default `import.toml`), then `IMPORT_`-prefixed
//! environment variables with `__` separating nested keys, e.g.
//! `IMPORT_TRANSFER__CHUNK_SIZE=262144`. A `.env` file is loaded first.
//!
//! ```toml
//! [transfer]
//! consumer_count = 4
//!
//! [source]
//! kind = "ftp"
//! host = "ftp.example.org"
//!
//! [imports.human]
//! source_path = "/exports/human.csv"
//! data_set_name = "infect-human"
//! domain = "infect.example.org"
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use import_common::{ImportError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordinator::ImportSettings;
use crate::importer::{HttpImporterConfig, DEFAULT_UNIT_SUFFIXED_FIELDS};
use crate::lock::HttpLockConfig;
use crate::source::FtpConfig;
use crate::staging::S3StagingConfig;
use crate::transfer::fetcher::{DEFAULT_CHUNK_SIZE, DEFAULT_FETCH_WORKERS};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Config file used when neither `--config` nor `IMPORT_CONFIG` is given
pub const DEFAULT_CONFIG_FILE: &str = "import.toml";

/// Environment variable naming the config file
pub const CONFIG_FILE_ENV: &str = "IMPORT_CONFIG";

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "IMPORT_";

/// Default number of concurrent streaming consumers
pub const DEFAULT_CONSUMER_COUNT: usize = 4;

/// Default idempotency lock TTL in seconds (12 hours)
pub const DEFAULT_LOCK_TTL_SECS: u64 = 12 * 60 * 60;

/// Default key prefix of staged files
pub const DEFAULT_STAGING_PREFIX: &str = "imports";

/// Default prefix of lock keys and staged file names
pub const DEFAULT_LOCK_PREFIX: &str = "sample-import";

/// Default importer base URL for local development
pub const DEFAULT_IMPORTER_URL: &str = "http://localhost:8080";

/// Default fields tallied over valid samples
pub const DEFAULT_TALLIED_FIELDS: [&str; 2] = ["microorganism", "substance"];

/// Chunking and concurrency tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub chunk_size: u64,
    pub consumer_count: usize,
    pub fetch_workers: usize,
    pub lock_ttl_secs: u64,
    pub staging_prefix: String,
    pub lock_prefix: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            consumer_count: DEFAULT_CONSUMER_COUNT,
            fetch_workers: DEFAULT_FETCH_WORKERS,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            staging_prefix: DEFAULT_STAGING_PREFIX.to_string(),
            lock_prefix: DEFAULT_LOCK_PREFIX.to_string(),
        }
    }
}

/// Where the source file is read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Ftp(FtpConfig),
    Local { root: PathBuf },
}

/// Where the source file is staged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StagingConfig {
    S3(S3StagingConfig),
    Local { root: PathBuf },
}

/// Which idempotency lock backend to use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LockConfig {
    Http(HttpLockConfig),
    /// Process-local; only suitable for single runs and tests
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Secret mixed into publish link tokens
    pub secret: Option<String>,
}

/// One named import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDefinition {
    /// Path of the file on the source
    pub source_path: String,
    pub data_set_name: String,
    /// Front-end domain the report links point to
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_tallied_fields")]
    pub tallied_fields: Vec<String>,
    /// Age fields receiving a unit suffix; empty disables normalization
    #[serde(default = "default_unit_suffixed_fields")]
    pub unit_suffixed_fields: Vec<String>,
}

fn default_tallied_fields() -> Vec<String> {
    DEFAULT_TALLIED_FIELDS.iter().map(|f| f.to_string()).collect()
}

fn default_unit_suffixed_fields() -> Vec<String> {
    DEFAULT_UNIT_SUFFIXED_FIELDS.iter().map(|f| f.to_string()).collect()
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub transfer: TransferConfig,
    pub source: SourceConfig,
    pub staging: StagingConfig,
    pub lock: LockConfig,
    pub importer: HttpImporterConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub imports: BTreeMap<String, ImportDefinition>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transfer: TransferConfig::default(),
            source: SourceConfig::Local {
                root: PathBuf::from("."),
            },
            staging: StagingConfig::Local {
                root: PathBuf::from("./staging"),
            },
            lock: LockConfig::Memory,
            importer: HttpImporterConfig {
                base_url: DEFAULT_IMPORTER_URL.to_string(),
                timeout_secs: crate::importer::http::DEFAULT_IMPORTER_TIMEOUT_SECS,
            },
            report: ReportConfig::default(),
            imports: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `path` (or `IMPORT_CONFIG`) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let figment = Self::figment(&path).merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(&figment)
    }

    /// Defaults overlaid with the TOML file at `path`, if it exists
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(PipelineConfig::default())).merge(Toml::file(path))
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| ImportError::Config(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let transfer = &self.transfer;
        if transfer.chunk_size == 0 {
            return Err(ImportError::Config("transfer.chunk_size must be greater than 0".into()));
        }
        if transfer.consumer_count == 0 {
            return Err(ImportError::Config("transfer.consumer_count must be greater than 0".into()));
        }
        if transfer.fetch_workers == 0 {
            return Err(ImportError::Config("transfer.fetch_workers must be greater than 0".into()));
        }
        if transfer.lock_ttl_secs == 0 {
            return Err(ImportError::Config("transfer.lock_ttl_secs must be greater than 0".into()));
        }
        if transfer.lock_prefix.is_empty() {
            return Err(ImportError::Config("transfer.lock_prefix cannot be empty".into()));
        }

        if self.importer.base_url.is_empty() {
            return Err(ImportError::Config("importer.base_url cannot be empty".into()));
        }

        for (name, import) in &self.imports {
            if import.source_path.trim().is_empty() {
                return Err(ImportError::Config(format!("imports.{}.source_path cannot be empty", name)));
            }
            if import.data_set_name.trim().is_empty() {
                return Err(ImportError::Config(format!(
                    "imports.{}.data_set_name cannot be empty",
                    name
                )));
            }
        }

        if transfer.fetch_workers > transfer.consumer_count {
            tracing::warn!(
                fetch_workers = transfer.fetch_workers,
                consumer_count = transfer.consumer_count,
                "More fetch workers than consumers; extra workers stay idle"
            );
        }

        Ok(())
    }

    pub fn import(&self, name: &str) -> Result<&ImportDefinition> {
        self.imports.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.imports.keys().map(String::as_str).collect();
            ImportError::Config(format!(
                "Unknown import '{}'. Configured imports: [{}]",
                name,
                known.join(", ")
            ))
        })
    }

    /// Run settings for the named import
    pub fn settings_for(&self, name: &str) -> Result<ImportSettings> {
        let import = self.import(name)?;
        Ok(ImportSettings {
            import_name: name.to_string(),
            source_path: import.source_path.clone(),
            data_set_name: import.data_set_name.clone(),
            chunk_size: self.transfer.chunk_size,
            consumer_count: self.transfer.consumer_count,
            fetch_workers: self.transfer.fetch_workers,
            lock_ttl: Duration::from_secs(self.transfer.lock_ttl_secs),
            staging_prefix: self.transfer.staging_prefix.clone(),
            lock_prefix: self.transfer.lock_prefix.clone(),
            tallied_fields: import.tallied_fields.clone(),
            unit_suffixed_fields: import.unit_suffixed_fields.clone(),
            domain: import.domain.clone(),
            report_secret: self.report.secret.clone(),
            resume_staged_key: None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn write_toml(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("import.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            PipelineConfig::from_figment(&PipelineConfig::figment(&dir.path().join("none.toml"))).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_toml_overrides_sections() {
        let (_dir, path) = write_toml(
            r#"
            [transfer]
            chunk_size = 4096
            fetch_workers = 2

            [source]
            kind = "ftp"
            host = "ftp.example.org"

            [staging]
            kind = "s3"
            endpoint = "http://localhost:9000"
            bucket = "imports"
            access_key = "a"
            secret_key = "b"
            path_style = true

            [lock]
            kind = "http"
            base_url = "http://locks.local"

            [imports.human]
            source_path = "/exports/human.csv"
            data_set_name = "infect-human"
            "#,
        );

        let config = PipelineConfig::from_figment(&PipelineConfig::figment(&path)).unwrap();
        assert_eq!(config.transfer.chunk_size, 4096);
        assert_eq!(config.transfer.consumer_count, DEFAULT_CONSUMER_COUNT);
        assert!(matches!(config.source, SourceConfig::Ftp(ref ftp) if ftp.port == 21));
        assert!(matches!(config.staging, StagingConfig::S3(ref s3) if s3.bucket == "imports"));
        assert!(matches!(config.lock, LockConfig::Http(_)));

        let human = config.import("human").unwrap();
        assert_eq!(human.tallied_fields, vec!["microorganism", "substance"]);
        assert_eq!(human.unit_suffixed_fields.len(), 2);
    }

    #[test]
    fn test_zero_values_are_rejected() {
        for key in ["chunk_size", "consumer_count", "fetch_workers", "lock_ttl_secs"] {
            let (_dir, path) = write_toml(&format!("[transfer]\n{} = 0\n", key));
            let err = PipelineConfig::from_figment(&PipelineConfig::figment(&path)).unwrap_err();
            assert!(err.to_string().contains(key), "{} not rejected: {}", key, err);
        }
    }

    #[test]
    fn test_import_without_data_set_name_is_rejected() {
        let (_dir, path) = write_toml(
            "[imports.bad]\nsource_path = \"/a.csv\"\ndata_set_name = \"\"\n",
        );
        let err = PipelineConfig::from_figment(&PipelineConfig::figment(&path)).unwrap_err();
        assert!(err.to_string().contains("imports.bad.data_set_name"));
    }

    #[test]
    fn test_unknown_import_lists_configured_ones() {
        let mut config = PipelineConfig::default();
        config.imports.insert(
            "human".to_string(),
            ImportDefinition {
                source_path: "/h.csv".to_string(),
                data_set_name: "h".to_string(),
                domain: None,
                tallied_fields: default_tallied_fields(),
                unit_suffixed_fields: vec![],
            },
        );

        let err = config.import("vet").unwrap_err();
        assert!(err.to_string().contains("[human]"));

        let settings = config.settings_for("human").unwrap();
        assert_eq!(settings.lock_ttl, Duration::from_secs(DEFAULT_LOCK_TTL_SECS));
        assert!(settings.unit_suffixed_fields.is_empty());
    }
}
