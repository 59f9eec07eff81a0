pub mod memory;
pub mod s3;

pub use memory::MemoryStore;
pub use s3::S3Store;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::{InvoiceError, InvoiceResult, StorageBackendKind, StorageConfig};
use crate::models::UploadedFile;

pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const ALLOWED_FILE_TYPES: [&str; 3] = ["application/pdf", "image/jpeg", "image/png"];
pub const STORAGE_BUCKET: &str = "invoices";

/// Upload progress sink, called with a percentage in 0..=100.
pub type Progress<'a> = Option<&'a (dyn Fn(u8) + Send + Sync)>;

/// Raw object operations a backend has to provide.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        content_type: &str,
        progress: Progress<'_>,
    ) -> InvoiceResult<()>;

    /// Object names (not full keys) directly under `prefix`.
    async fn list(&self, prefix: &str) -> InvoiceResult<Vec<String>>;

    async fn delete(&self, path: &str) -> InvoiceResult<()>;

    fn public_url(&self, path: &str) -> String;

    async fn signed_upload_url(&self, path: &str, content_type: &str) -> InvoiceResult<String>;
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredObject {
    pub path: String,
    pub url: String,
    pub size: u64,
    pub content_type: String,
}

/// Validating front door over an [`ObjectStore`].
#[derive(Clone)]
pub struct StorageGateway {
    backend: Arc<dyn ObjectStore>,
    max_size: u64,
}

impl StorageGateway {
    pub fn new(backend: Arc<dyn ObjectStore>, max_size: u64) -> Self {
        StorageGateway {
            backend,
            max_size: max_size.min(MAX_FILE_SIZE),
        }
    }

    pub async fn from_config(config: &StorageConfig, max_size: u64) -> anyhow::Result<Self> {
        let backend: Arc<dyn ObjectStore> = match config.backend {
            StorageBackendKind::S3 => Arc::new(S3Store::from_config(config).await?),
            StorageBackendKind::Memory => Arc::new(MemoryStore::new(config.public_base_url.clone())),
        };
        Ok(StorageGateway::new(backend, max_size))
    }

    pub fn backend_tag(&self) -> &'static str {
        self.backend.backend_tag()
    }

    pub async fn upload(
        &self,
        file: &UploadedFile,
        path: &str,
        progress: Progress<'_>,
    ) -> InvoiceResult<StoredObject> {
        validate_upload(file, self.max_size)?;
        if path.trim().is_empty() {
            return Err(InvoiceError::InvalidField {
                field: "path".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        debug!(path, size = file.size(), backend = self.backend_tag(), "Uploading file");
        self.backend
            .put(path, file.bytes.clone(), &file.content_type, progress)
            .await?;

        Ok(StoredObject {
            path: path.to_string(),
            url: self.backend.public_url(path),
            size: file.size(),
            content_type: file.content_type.clone(),
        })
    }

    pub fn public_url(&self, path: &str) -> Option<String> {
        if path.trim().is_empty() {
            return None;
        }
        Some(self.backend.public_url(path))
    }

    /// Looks the file up by listing its parent folder. A freshly written
    /// object may not be listed yet on eventually consistent backends.
    pub async fn exists(&self, path: &str) -> InvoiceResult<bool> {
        let (folder, name) = split_path(path);
        if name.is_empty() {
            return Ok(false);
        }
        let names = self.backend.list(folder).await?;
        let found = names.iter().any(|n| n == name);
        if !found {
            warn!(path, "File not listed in its folder");
        }
        Ok(found)
    }

    pub async fn delete(&self, path: &str) -> InvoiceResult<()> {
        debug!(path, "Deleting file");
        self.backend.delete(path).await
    }

    pub async fn signed_upload_url(&self, path: &str, content_type: &str) -> InvoiceResult<String> {
        check_content_type(content_type)?;
        self.backend.signed_upload_url(path, content_type).await
    }
}

pub fn validate_upload(file: &UploadedFile, max_size: u64) -> InvoiceResult<()> {
    if file.size() > max_size {
        return Err(InvoiceError::FileTooLarge {
            size: file.size(),
            max: max_size,
        });
    }
    check_content_type(&file.content_type)
}

fn check_content_type(content_type: &str) -> InvoiceResult<()> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if ALLOWED_FILE_TYPES.contains(&essence.as_str()) {
        Ok(())
    } else {
        Err(InvoiceError::UnsupportedFileType(content_type.to_string()))
    }
}

/// `{user}/{invoice}/{file}`; anonymous uploads get `{timestamp}.{ext}`.
pub fn object_path(user_id: Uuid, invoice_id: Uuid, file: &UploadedFile) -> String {
    let name = file
        .file_name
        .as_deref()
        .map(sanitize_file_name)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| {
            format!(
                "{}.{}",
                Utc::now().timestamp_millis(),
                extension_for(&file.content_type)
            )
        });
    format!("{}/{}/{}", user_id, invoice_id, name)
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        _ => "pdf",
    }
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((folder, name)) => (folder, name),
        None => ("", path),
    }
}
