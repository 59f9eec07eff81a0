use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

use super::{InvoiceField, InvoiceStatus, Invoice};
use crate::core::InvoiceError;

/// The authenticated caller. Every lifecycle operation takes one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
}

impl Session {
    pub fn new(user_id: Uuid) -> Self {
        Session { user_id }
    }

    pub fn require(session: Option<Session>) -> Result<Session, InvoiceError> {
        session.ok_or(InvoiceError::MissingSession)
    }
}

/// A file handed over by the caller, fully buffered.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: String,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn new(file_name: Option<String>, content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        UploadedFile {
            file_name,
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// File name without its extension, used as the default invoice title.
    pub fn stem(&self) -> Option<String> {
        let name = self.file_name.as_deref()?;
        Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResult {
    pub success: bool,
    pub message: String,
}

impl ExportResult {
    pub fn ok(message: impl Into<String>) -> Self {
        ExportResult {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ExportResult {
            success: false,
            message: message.into(),
        }
    }
}

/// One export attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRecord {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub target: String,
    pub idempotency_key: String,
    pub success: bool,
    pub message: String,
    pub exported_at: DateTime<Utc>,
}

/// Per-item result of a batch write.
#[derive(Debug, Serialize)]
pub struct ItemOutcome {
    pub key: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchOutcome {
    pub items: Vec<ItemOutcome>,
}

impl BatchOutcome {
    pub fn push(&mut self, key: impl Into<String>, result: Result<(), InvoiceError>) {
        let (ok, error) = match result {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };
        self.items.push(ItemOutcome {
            key: key.into(),
            ok,
            error,
        });
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.ok).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|i| !i.ok)
    }

    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|i| i.ok)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub fields: Vec<InvoiceField>,
}

/// Dashboard figures for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvoiceStats {
    pub total: i64,
    pub by_status: BTreeMap<InvoiceStatus, i64>,
    /// Mean confidence of extracted fields; `None` when nothing was extracted.
    pub average_confidence: Option<f64>,
}
