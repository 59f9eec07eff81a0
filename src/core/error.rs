use uuid::Uuid;

use crate::models::InvoiceStatus;

/// Everything that can go wrong while an invoice moves through intake.
///
/// Variants are grouped the way callers react to them: validation errors are
/// reported to the user before anything is attempted, upstream errors come
/// from storage, extraction, export or the database, and precondition errors
/// mean the invoice is in the wrong state for the requested operation.
#[derive(Debug, thiserror::Error)]
pub enum InvoiceError {
    // Validation
    #[error("file is too large ({size} bytes), maximum is {max} bytes")]
    FileTooLarge { size: u64, max: u64 },
    #[error("unsupported file type `{0}`, only PDF, JPEG and PNG are accepted")]
    UnsupportedFileType(String),
    #[error("a user session is required")]
    MissingSession,
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("amount `{field}` must not be negative")]
    NegativeAmount { field: String },
    #[error("required fields are missing a value: {}", .0.join(", "))]
    MissingRequiredFields(Vec<String>),

    // Upstream
    #[error("storage error: {0}")]
    Storage(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("export failed: {0}")]
    Export(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    // Preconditions
    #[error("invoice {0} not found")]
    NotFound(Uuid),
    #[error("extraction template {0} not found")]
    TemplateNotFound(Uuid),
    #[error("file not found in storage: {0}")]
    FileNotFound(String),
    #[error("cannot {action} an invoice in status `{status}`")]
    InvalidTransition {
        action: &'static str,
        status: InvoiceStatus,
    },
    #[error("invoice {0} has no extracted fields")]
    NoFields(Uuid),
    #[error("invoice {0} was modified concurrently")]
    Conflict(Uuid),
    #[error("invoice {0} was already exported with the same content")]
    AlreadyExported(Uuid),
}

impl InvoiceError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        InvoiceError::Storage(err.to_string())
    }

    /// True for errors raised before any external call was made.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            InvoiceError::FileTooLarge { .. }
                | InvoiceError::UnsupportedFileType(_)
                | InvoiceError::MissingSession
                | InvoiceError::InvalidField { .. }
                | InvoiceError::NegativeAmount { .. }
                | InvoiceError::MissingRequiredFields(_)
        )
    }

    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            InvoiceError::FileNotFound(_)
                | InvoiceError::InvalidTransition { .. }
                | InvoiceError::NoFields(_)
                | InvoiceError::Conflict(_)
                | InvoiceError::AlreadyExported(_)
        )
    }
}

pub type InvoiceResult<T> = Result<T, InvoiceError>;
