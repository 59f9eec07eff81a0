use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::{ObjectStore, Progress};
use crate::core::{InvoiceError, InvoiceResult};

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: String,
}

/// Process-local object store for tests and local development.
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredBlob>>,
    base_url: String,
    put_calls: AtomicU64,
    fail_puts: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new(None)
    }
}

impl MemoryStore {
    pub fn new(base_url: Option<String>) -> Self {
        MemoryStore {
            objects: RwLock::new(BTreeMap::new()),
            base_url: base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("memory://{}", super::STORAGE_BUCKET)),
            put_calls: AtomicU64::new(0),
            fail_puts: AtomicBool::new(false),
        }
    }

    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::Relaxed)
    }

    /// Makes subsequent writes fail, to exercise upload error paths.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::Relaxed);
    }

    pub async fn get(&self, path: &str) -> Option<StoredBlob> {
        self.objects.read().await.get(path).cloned()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        content_type: &str,
        progress: Progress<'_>,
    ) -> InvoiceResult<()> {
        self.put_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_puts.load(Ordering::Relaxed) {
            return Err(InvoiceError::Storage("memory store rejected the write".to_string()));
        }
        self.objects.write().await.insert(
            path.to_string(),
            StoredBlob {
                data,
                content_type: content_type.to_string(),
            },
        );
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
        let objects = self.objects.read().await;
        Ok(objects
            .keys()
            .filter_map(|key| key.strip_prefix(folder.as_str()))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn delete(&self, path: &str) -> InvoiceResult<()> {
        self.objects.write().await.remove(path);
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn signed_upload_url(&self, path: &str, _content_type: &str) -> InvoiceResult<String> {
        Ok(format!("{}?upload=1", self.public_url(path)))
    }
}
