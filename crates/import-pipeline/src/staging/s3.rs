//! S3-compatible object storage staging
//!
//! Objects are written with a multipart upload so the source never has to be
//! buffered whole; a source smaller than one part goes through a single
//! `PutObject`. Range reads map onto `GetObject` with a `Range` header, and an
//! HTTP 416 answer becomes [`ImportError::RangeNotSatisfiable`].

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use import_common::{ImportError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{fill_buffer, StagingStore};
use crate::source::ByteReader;

/// Size of each multipart upload part (S3 requires at least 5 MiB)
const PART_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3StagingConfig {
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl S3StagingConfig {
    /// Settings for a local MinIO instance
    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: default_region(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
        }
    }
}

#[derive(Clone)]
pub struct S3Staging {
    client: Client,
    bucket: String,
}

impl S3Staging {
    pub fn new(config: S3StagingConfig) -> Self {
        debug!(
            bucket = %config.bucket,
            endpoint = ?config.endpoint,
            "Initializing S3 staging store"
        );

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "import-staging",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());
        info!("S3 staging client initialized for bucket: {}", config.bucket);

        Self {
            client,
            bucket: config.bucket,
        }
    }

    fn staging_error(action: &str, key: &str, err: impl std::fmt::Display) -> ImportError {
        ImportError::Staging(format!("S3 {} failed for {}: {}", action, key, err))
    }

    async fn put_single(&self, key: &str, content_type: &str, data: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| Self::staging_error("PutObject", key, e))?;
        Ok(())
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Vec<u8>,
        reader: &mut ByteReader,
    ) -> Result<(Vec<CompletedPart>, u64)> {
        let mut parts = Vec::new();
        let mut part_number: i32 = 1;
        let mut total = 0u64;
        let mut next = Some(first);

        while let Some(data) = next.take() {
            total += data.len() as u64;

            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::staging_error("UploadPart", key, e))?;

            parts.push(
                CompletedPart::builder()
                    .e_tag(uploaded.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );
            debug!(key, part_number, total, "Uploaded staging part");
            part_number += 1;

            let mut buf = vec![0u8; PART_SIZE];
            let n = fill_buffer(reader, &mut buf).await?;
            if n > 0 {
                buf.truncate(n);
                next = Some(buf);
            }
        }

        Ok((parts, total))
    }
}

#[async_trait]
impl StagingStore for S3Staging {
    #[instrument(skip(self, reader))]
    async fn write_stream(
        &self,
        key: &str,
        content_type: &str,
        mut reader: ByteReader,
    ) -> Result<u64> {
        let mut first = vec![0u8; PART_SIZE];
        let n = fill_buffer(&mut reader, &mut first).await?;
        first.truncate(n);

        if n < PART_SIZE {
            self.put_single(key, content_type, first).await?;
            info!("Staged {} bytes to s3://{}/{}", n, self.bucket, key);
            return Ok(n as u64);
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| Self::staging_error("CreateMultipartUpload", key, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Self::staging_error("CreateMultipartUpload", key, "no upload id"))?
            .to_string();

        match self.upload_parts(key, &upload_id, first, &mut reader).await {
            Ok((parts, total)) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|e| Self::staging_error("CompleteMultipartUpload", key, e))?;

                info!("Staged {} bytes to s3://{}/{}", total, self.bucket, key);
                Ok(total)
            },
            Err(e) => {
                warn!(key, error = %e, "Multipart upload failed, aborting");
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, error = %abort, "Failed to abort multipart upload");
                }
                Err(e)
            },
        }
    }

    #[instrument(skip(self))]
    async fn read_range(&self, key: &str, start: u64, end: u64) -> Result<ByteReader> {
        if end <= start {
            return Err(ImportError::Staging(format!(
                "Empty range {}..{} requested for {}",
                start, end, key
            )));
        }

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes={}-{}", start, end - 1))
            .send()
            .await;

        match response {
            Ok(output) => Ok(Box::new(Box::pin(output.body.into_async_read()))),
            Err(e) if e.raw_response().map(|r| r.status().as_u16()) == Some(416) => {
                debug!(key, start, "Range starts beyond end of staged object");
                Err(ImportError::RangeNotSatisfiable {
                    key: key.to_string(),
                    start,
                })
            },
            Err(e) => Err(Self::staging_error("GetObject", key, e)),
        }
    }
}
