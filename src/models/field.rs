use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::core::{InvoiceError, InvoiceResult};

/// Key of an extracted field. Known keys map onto invoice columns; anything
/// else a custom schema defines is carried as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldKey {
    InvoiceNumber,
    Date,
    DueDate,
    Supplier,
    TotalAmount,
    TaxAmount,
    Reference,
    Description,
    Custom(String),
}

impl FieldKey {
    pub const KNOWN: [FieldKey; 8] = [
        FieldKey::InvoiceNumber,
        FieldKey::Date,
        FieldKey::DueDate,
        FieldKey::Supplier,
        FieldKey::TotalAmount,
        FieldKey::TaxAmount,
        FieldKey::Reference,
        FieldKey::Description,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            FieldKey::InvoiceNumber => "invoice_number",
            FieldKey::Date => "date",
            FieldKey::DueDate => "due_date",
            FieldKey::Supplier => "supplier",
            FieldKey::TotalAmount => "total_amount",
            FieldKey::TaxAmount => "tax_amount",
            FieldKey::Reference => "reference",
            FieldKey::Description => "description",
            FieldKey::Custom(name) => name,
        }
    }
}

impl From<&str> for FieldKey {
    fn from(value: &str) -> Self {
        match value {
            "invoice_number" => FieldKey::InvoiceNumber,
            "date" => FieldKey::Date,
            "due_date" => FieldKey::DueDate,
            "supplier" => FieldKey::Supplier,
            "total_amount" => FieldKey::TotalAmount,
            "tax_amount" => FieldKey::TaxAmount,
            "reference" => FieldKey::Reference,
            "description" => FieldKey::Description,
            other => FieldKey::Custom(other.to_string()),
        }
    }
}

impl From<String> for FieldKey {
    fn from(value: String) -> Self {
        FieldKey::from(value.as_str())
    }
}

impl From<FieldKey> for String {
    fn from(key: FieldKey) -> Self {
        key.as_str().to_string()
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extraction confidence, always within [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct Confidence(f64);

impl Confidence {
    /// Confidence of a value confirmed by a user.
    pub const CONFIRMED: Confidence = Confidence(1.0);

    pub fn new(value: f64) -> InvoiceResult<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Confidence(value))
        } else {
            Err(InvoiceError::InvalidField {
                field: "confidence".to_string(),
                reason: format!("{} is outside [0, 1]", value),
            })
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Bounding box of a value within the source document. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldPosition {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceField {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub field_name: FieldKey,
    pub field_value: Option<String>,
    pub confidence: Option<f64>,
    pub position: Option<FieldPosition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceField {
    pub fn has_value(&self) -> bool {
        self.field_value
            .as_deref()
            .map_or(false, |v| !v.trim().is_empty())
    }
}

/// One field upsert, keyed by `(invoice_id, field_name)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldWrite {
    pub field_name: FieldKey,
    pub field_value: Option<String>,
    pub confidence: Option<Confidence>,
    pub position: Option<FieldPosition>,
}

impl FieldWrite {
    pub fn confirmed(field_name: FieldKey, value: impl Into<String>) -> Self {
        FieldWrite {
            field_name,
            field_value: Some(value.into()),
            confidence: Some(Confidence::CONFIRMED),
            position: None,
        }
    }
}

pub fn find_value<'a>(fields: &'a [InvoiceField], key: &FieldKey) -> Option<&'a str> {
    fields
        .iter()
        .find(|f| &f.field_name == key)
        .and_then(|f| f.field_value.as_deref())
}
