use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, error};

use super::{ObjectStore, Progress};
use crate::core::{InvoiceError, InvoiceResult, StorageConfig};

// S3 rejects parts below 5 MiB except the last one
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3-compatible backend (AWS, R2, MinIO).
pub struct S3Store {
    client: Client,
    bucket: String,
    cdn_url: Option<String>,
    part_size: usize,
    signed_url_ttl: Duration,
}

fn s3_error<E: std::error::Error>(err: E) -> InvoiceError {
    InvoiceError::storage(DisplayErrorContext(err))
}

impl S3Store {
    pub async fn from_config(config: &StorageConfig) -> anyhow::Result<Self> {
        let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            // MinIO and R2 want path-style addressing
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        Ok(S3Store {
            client,
            bucket: config.bucket.clone(),
            cdn_url: config
                .public_base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            part_size: config.part_size_bytes.max(MIN_PART_SIZE),
            signed_url_ttl: Duration::from_secs(config.signed_url_ttl_seconds),
        })
    }

    async fn put_single(&self, key: &str, data: Bytes, content_type: &str) -> InvoiceResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(s3_error)?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        progress: Progress<'_>,
    ) -> InvoiceResult<()> {
        let multipart = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(s3_error)?;
        let upload_id = multipart
            .upload_id()
            .ok_or_else(|| InvoiceError::Storage("no upload id returned".to_string()))?
            .to_string();

        match self.upload_parts(key, &upload_id, data, progress).await {
            Ok(parts) => {
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
                    .map_err(s3_error)?;
                Ok(())
            }
            Err(err) => {
                error!(key, error = %err, "Multipart upload failed, aborting");
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    error!(key, error = %DisplayErrorContext(abort_err), "Abort failed");
                }
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        data: Bytes,
        progress: Progress<'_>,
    ) -> InvoiceResult<Vec<CompletedPart>> {
        let total = data.len();
        let mut parts = Vec::new();
        let mut offset = 0;
        let mut part_number = 1;

        while offset < total {
            let end = (offset + self.part_size).min(total);
            let part = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(data.slice(offset..end)))
                .send()
                .await
                .map_err(s3_error)?;

            if let Some(etag) = part.e_tag() {
                parts.push(
                    CompletedPart::builder()
                        .part_number(part_number)
                        .e_tag(etag)
                        .build(),
                );
            }

            offset = end;
            part_number += 1;
            if let Some(report) = progress {
                report((offset * 100 / total) as u8);
            }
        }

        Ok(parts)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn backend_tag(&self) -> &'static str {
        "s3"
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        content_type: &str,
        progress: Progress<'_>,
    ) -> InvoiceResult<()> {
        if data.len() > self.part_size {
            debug!(path, parts = data.len().div_ceil(self.part_size), "Multipart upload");
            return self.put_multipart(path, data, content_type, progress).await;
        }

        self.put_single(path, data, content_type).await?;
        if let Some(report) = progress {
            report(100);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> InvoiceResult<Vec<String>> {
        let folder = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix.trim_end_matches('/'))
        };

        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&folder)
            .delimiter("/")
            .max_keys(1000)
            .send()
            .await
            .map_err(s3_error)?;

        Ok(response
            .contents()
            .iter()
            .filter_map(|obj| obj.key())
            .filter_map(|key| key.strip_prefix(folder.as_str()))
            .map(str::to_string)
            .collect())
    }

    async fn delete(&self, path: &str) -> InvoiceResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(s3_error)?;
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        // CDN URL if configured, otherwise S3 URL
        match &self.cdn_url {
            Some(cdn) => format!("{}/{}", cdn, path),
            None => format!("https://{}.s3.amazonaws.com/{}", self.bucket, path),
        }
    }

    async fn signed_upload_url(&self, path: &str, content_type: &str) -> InvoiceResult<String> {
        let presigning_config = PresigningConfig::expires_in(self.signed_url_ttl)
            .map_err(InvoiceError::storage)?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type)
            .presigned(presigning_config)
            .await
            .map_err(s3_error)?;

        Ok(presigned.uri().to_string())
    }
}
