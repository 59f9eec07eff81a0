use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::FieldKey;
use crate::core::{InvoiceError, InvoiceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Processed,
    Error,
    Validated,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 4] = [
        InvoiceStatus::Pending,
        InvoiceStatus::Processed,
        InvoiceStatus::Error,
        InvoiceStatus::Validated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Processed => "processed",
            InvoiceStatus::Error => "error",
            InvoiceStatus::Validated => "validated",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = InvoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvoiceStatus::Pending),
            "processed" => Ok(InvoiceStatus::Processed),
            "error" => Ok(InvoiceStatus::Error),
            "validated" => Ok(InvoiceStatus::Validated),
            other => Err(InvoiceError::InvalidField {
                field: "status".to_string(),
                reason: format!("unknown status `{}`", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub supplier: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub total_amount: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub status: InvoiceStatus,
    pub file_path: Option<String>,
    pub file_type: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Extraction template selected for this invoice, if any.
    pub fn template_id(&self) -> Option<Uuid> {
        self.metadata
            .as_ref()?
            .get("template_id")?
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }
}

/// Parameters for a new invoice row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    pub user_id: Uuid,
    pub title: String,
    #[serde(default = "default_status")]
    pub status: InvoiceStatus,
    pub file_path: Option<String>,
    pub file_type: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

fn default_status() -> InvoiceStatus {
    InvoiceStatus::Pending
}

impl NewInvoice {
    pub fn pending(user_id: Uuid, title: impl Into<String>) -> Self {
        NewInvoice {
            user_id,
            title: title.into(),
            status: InvoiceStatus::Pending,
            file_path: None,
            file_type: None,
            metadata: None,
        }
    }
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoicePatch {
    pub title: Option<String>,
    pub supplier: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub total_amount: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub status: Option<InvoiceStatus>,
    pub file_path: Option<String>,
    pub file_type: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Columns set back to NULL. A column listed here ignores its value
    /// above.
    #[serde(skip)]
    pub cleared: Vec<ScalarColumn>,
    /// When set, the update only applies if the row still carries this
    /// `updated_at`.
    #[serde(skip)]
    pub expected_updated_at: Option<DateTime<Utc>>,
}

/// Invoice columns mirrored from extracted fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarColumn {
    InvoiceNumber,
    InvoiceDate,
    DueDate,
    Supplier,
    TotalAmount,
    TaxAmount,
}

impl ScalarColumn {
    pub fn for_field(key: &FieldKey) -> Option<Self> {
        match key {
            FieldKey::InvoiceNumber => Some(ScalarColumn::InvoiceNumber),
            FieldKey::Date => Some(ScalarColumn::InvoiceDate),
            FieldKey::DueDate => Some(ScalarColumn::DueDate),
            FieldKey::Supplier => Some(ScalarColumn::Supplier),
            FieldKey::TotalAmount => Some(ScalarColumn::TotalAmount),
            FieldKey::TaxAmount => Some(ScalarColumn::TaxAmount),
            _ => None,
        }
    }
}

impl InvoicePatch {
    pub fn status(status: InvoiceStatus) -> Self {
        InvoicePatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn clears(&self, column: ScalarColumn) -> bool {
        self.cleared.contains(&column)
    }

    pub fn validate(&self) -> InvoiceResult<()> {
        for (name, amount) in [("total_amount", self.total_amount), ("tax_amount", self.tax_amount)] {
            if amount.map_or(false, |a| a.is_sign_negative() && !a.is_zero()) {
                return Err(InvoiceError::NegativeAmount {
                    field: name.to_string(),
                });
            }
        }
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(InvoiceError::InvalidField {
                    field: "title".to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// A save is a create when no identifier is given and an update otherwise.
#[derive(Debug, Clone)]
pub enum SaveInvoice {
    Create(NewInvoice),
    Update { id: Uuid, patch: InvoicePatch },
}

impl From<NewInvoice> for SaveInvoice {
    fn from(new: NewInvoice) -> Self {
        SaveInvoice::Create(new)
    }
}

impl SaveInvoice {
    pub fn update(id: Uuid, patch: InvoicePatch) -> Self {
        SaveInvoice::Update { id, patch }
    }
}
