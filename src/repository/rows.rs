use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{
    ExportRecord, ExtractionSchema, ExtractionTemplate, FieldKey, FieldPosition, Invoice,
    InvoiceField, InvoiceStatus,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn decode(err: impl Into<BoxError>) -> sqlx::Error {
    sqlx::Error::Decode(err.into())
}

/// Current time at the precision timestamps are stored with, so a value
/// read back compares equal to the one written.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(decode)
}

fn parse_uuid(value: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(value).map_err(decode)
}

fn parse_decimal(value: Option<String>) -> Result<Option<Decimal>, sqlx::Error> {
    value
        .map(|v| Decimal::from_str(&v).map_err(decode))
        .transpose()
}

#[derive(sqlx::FromRow)]
pub(super) struct InvoiceRow {
    id: String,
    user_id: String,
    title: String,
    supplier: Option<String>,
    invoice_number: Option<String>,
    invoice_date: Option<String>,
    due_date: Option<String>,
    total_amount: Option<String>,
    tax_amount: Option<String>,
    status: String,
    file_path: Option<String>,
    file_type: Option<String>,
    metadata: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = sqlx::Error;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            id: parse_uuid(&row.id)?,
            user_id: parse_uuid(&row.user_id)?,
            title: row.title,
            supplier: row.supplier,
            invoice_number: row.invoice_number,
            invoice_date: row.invoice_date,
            due_date: row.due_date,
            total_amount: parse_decimal(row.total_amount)?,
            tax_amount: parse_decimal(row.tax_amount)?,
            status: InvoiceStatus::from_str(&row.status).map_err(decode)?,
            file_path: row.file_path,
            file_type: row.file_type,
            metadata: row
                .metadata
                .map(|m| serde_json::from_str(&m).map_err(decode))
                .transpose()?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct FieldRow {
    id: String,
    invoice_id: String,
    field_name: String,
    field_value: Option<String>,
    confidence: Option<f64>,
    position: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<FieldRow> for InvoiceField {
    type Error = sqlx::Error;

    fn try_from(row: FieldRow) -> Result<Self, Self::Error> {
        let position: Option<FieldPosition> = row
            .position
            .map(|p| serde_json::from_str(&p).map_err(decode))
            .transpose()?;
        Ok(InvoiceField {
            id: parse_uuid(&row.id)?,
            invoice_id: parse_uuid(&row.invoice_id)?,
            field_name: FieldKey::from(row.field_name),
            field_value: row.field_value,
            confidence: row.confidence,
            position,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct TemplateRow {
    id: String,
    name: String,
    user_id: Option<String>,
    is_public: bool,
    schema: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TemplateRow> for ExtractionTemplate {
    type Error = sqlx::Error;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        let schema: ExtractionSchema = serde_json::from_str(&row.schema).map_err(decode)?;
        Ok(ExtractionTemplate {
            id: parse_uuid(&row.id)?,
            name: row.name,
            user_id: row.user_id.as_deref().map(parse_uuid).transpose()?,
            is_public: row.is_public,
            schema,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct ExportRow {
    id: String,
    invoice_id: String,
    target: String,
    idempotency_key: String,
    success: bool,
    message: String,
    exported_at: String,
}

impl TryFrom<ExportRow> for ExportRecord {
    type Error = sqlx::Error;

    fn try_from(row: ExportRow) -> Result<Self, Self::Error> {
        Ok(ExportRecord {
            id: parse_uuid(&row.id)?,
            invoice_id: parse_uuid(&row.invoice_id)?,
            target: row.target,
            idempotency_key: row.idempotency_key,
            success: row.success,
            message: row.message,
            exported_at: parse_ts(&row.exported_at)?,
        })
    }
}
