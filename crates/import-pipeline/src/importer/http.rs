//! HTTP client for the sample import service
//!
//! - `POST   /imports` creates an import and answers `{"id": ...}`
//! - `POST   /imports/{id}/samples` stores a batch and answers a [`BatchResult`]
//! - `POST   /imports/{id}/commit` activates the import
//! - `DELETE /imports/{id}` removes a half-finished import

use async_trait::async_trait;
use import_common::{ImportError, ImportId, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{BatchResult, CreateImport, SampleImporter};
use crate::assembler::Record;

/// Default timeout for importer requests in seconds
pub const DEFAULT_IMPORTER_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpImporterConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_IMPORTER_TIMEOUT_SECS
}

#[derive(Debug, Deserialize)]
struct CreatedImport {
    id: ImportId,
}

#[derive(Debug, Serialize)]
struct StoreSamplesRequest<'a> {
    samples: &'a [Record],
}

pub struct HttpSampleImporter {
    client: Client,
    base_url: String,
}

impl HttpSampleImporter {
    pub fn new(config: HttpImporterConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ImportError::Importer(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn import_url(&self, import_id: &ImportId) -> String {
        format!("{}/imports/{}", self.base_url, import_id)
    }

    fn importer_error(action: &str, err: impl std::fmt::Display) -> ImportError {
        ImportError::Importer(format!("{} failed: {}", action, err))
    }
}

#[async_trait]
impl SampleImporter for HttpSampleImporter {
    #[instrument(skip(self, request), fields(dataset = %request.dataset_id))]
    async fn create_import(&self, request: &CreateImport) -> Result<ImportId> {
        let created: CreatedImport = self
            .client
            .post(format!("{}/imports", self.base_url))
            .json(request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::importer_error("Create import", e))?
            .json()
            .await
            .map_err(|e| Self::importer_error("Decode created import", e))?;

        info!(import_id = %created.id, "Created downstream import");
        Ok(created.id)
    }

    #[instrument(skip(self, records), fields(records = records.len()))]
    async fn store_records(&self, import_id: &ImportId, records: &[Record]) -> Result<BatchResult> {
        let result: BatchResult = self
            .client
            .post(format!("{}/samples", self.import_url(import_id)))
            .json(&StoreSamplesRequest { samples: records })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::importer_error("Store samples", e))?
            .json()
            .await
            .map_err(|e| Self::importer_error("Decode batch result", e))?;

        debug!(
            imported = result.imported_count,
            duplicates = result.duplicate_count,
            invalid = result.invalid_samples.len(),
            "Stored batch"
        );
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn commit(&self, import_id: &ImportId) -> Result<()> {
        self.client
            .post(format!("{}/commit", self.import_url(import_id)))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::importer_error("Commit import", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, import_id: &ImportId) -> Result<()> {
        self.client
            .delete(self.import_url(import_id))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::importer_error("Delete import", e))?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{body_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn importer_for(server: &MockServer) -> HttpSampleImporter {
        HttpSampleImporter::new(HttpImporterConfig {
            base_url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_import_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/imports"))
            .and(body_json(serde_json::json!({
                "dataSetIdentifier": "anresis-human",
                "dataVersionIdentifier": "anresis-human-import-2026",
                "dataVersionDescription": "nightly"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "42"})))
            .mount(&server)
            .await;

        let id = importer_for(&server)
            .create_import(&CreateImport {
                dataset_id: "anresis-human".to_string(),
                version_id: "anresis-human-import-2026".to_string(),
                description: "nightly".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(id, ImportId::new("42"));
    }

    #[tokio::test]
    async fn test_store_records_decodes_batch_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/imports/42/samples"))
            .and(body_json(serde_json::json!({"samples": [{"a": "1", "b": "2"}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "importedCount": 1,
                "duplicateCount": 0,
                "validSamples": [{"originalValues": {"a": "1", "b": "2"}}],
                "invalidSamples": []
            })))
            .mount(&server)
            .await;

        let record: Record = [("a", "1"), ("b", "2")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let result = importer_for(&server)
            .store_records(&ImportId::new("42"), &[record])
            .await
            .unwrap();

        assert_eq!(result.imported_count, 1);
        assert_eq!(result.valid_samples.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_and_delete_hit_import_resource() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/imports/7/commit"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/imports/7"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let importer = importer_for(&server);
        let id = ImportId::new("7");
        importer.commit(&id).await.unwrap();
        importer.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_importer_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/imports/7/commit"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = importer_for(&server).commit(&ImportId::new("7")).await.unwrap_err();
        assert!(matches!(err, ImportError::Importer(_)));
    }
}
