pub mod state;

pub use state::{ensure_allowed, Action};

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::metrics::{record_export, record_transition};
use crate::core::{ConcurrencyPolicy, ExportPolicy, InvoiceError, InvoiceResult};
use crate::export::{build_payload, SageExporter, SagePayload};
use crate::extraction::{ExtractionResult, Extractor};
use crate::models::parsing::{normalize_date, parse_amount};
use crate::models::{
    BatchOutcome, Confidence, ExportRecord, ExportResult, ExtractionSchema, ExtractionTemplate,
    FieldKey, FieldWrite, Invoice, InvoiceDetail, InvoicePatch, InvoiceStats, InvoiceStatus,
    NewInvoice, NewTemplate, SaveInvoice, ScalarColumn, Session, UploadedFile,
};
use crate::repository::{now, ts, InvoiceRepository};
use crate::storage::{object_path, validate_upload, Progress, StorageGateway};

const DEFAULT_TITLE: &str = "Facture";

#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub concurrency: ConcurrencyPolicy,
    pub export_policy: ExportPolicy,
    pub currency: String,
    pub max_upload_size: u64,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        LifecycleOptions {
            concurrency: ConcurrencyPolicy::default(),
            export_policy: ExportPolicy::default(),
            currency: "EUR".to_string(),
            max_upload_size: crate::storage::MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AnalysisOutcome {
    pub invoice: Invoice,
    pub fields: BatchOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

/// Drives invoices through `pending -> processed -> validated` (or `error`),
/// coordinating storage, extraction, persistence and export.
#[derive(Clone)]
pub struct LifecycleManager {
    repo: InvoiceRepository,
    storage: StorageGateway,
    extractor: Arc<dyn Extractor>,
    exporter: Arc<dyn SageExporter>,
    options: LifecycleOptions,
}

impl LifecycleManager {
    pub fn new(
        repo: InvoiceRepository,
        storage: StorageGateway,
        extractor: Arc<dyn Extractor>,
        exporter: Arc<dyn SageExporter>,
        options: LifecycleOptions,
    ) -> Self {
        LifecycleManager {
            repo,
            storage,
            extractor,
            exporter,
            options,
        }
    }

    pub fn repository(&self) -> &InvoiceRepository {
        &self.repo
    }

    pub fn storage(&self) -> &StorageGateway {
        &self.storage
    }

    /// Creates a pending invoice and stores its file. If the upload fails the
    /// invoice row is removed again.
    pub async fn upload(
        &self,
        session: &Session,
        file: UploadedFile,
        title: Option<String>,
        template_id: Option<Uuid>,
        progress: Progress<'_>,
    ) -> InvoiceResult<Invoice> {
        validate_upload(&file, self.options.max_upload_size)?;
        if let Some(template_id) = template_id {
            self.get_template(session, template_id).await?;
        }

        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| file.stem())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());

        let mut new = NewInvoice::pending(session.user_id, title);
        new.file_type = Some(file.content_type.clone());
        new.metadata = template_id.map(|t| serde_json::json!({ "template_id": t.to_string() }));
        let invoice = self.repo.save(new.into()).await?;

        let path = object_path(session.user_id, invoice.id, &file);
        if let Err(err) = self.storage.upload(&file, &path, progress).await {
            error!(invoice_id = %invoice.id, error = %err, "Upload failed, removing invoice");
            if let Err(cleanup) = self.repo.delete(invoice.id).await {
                error!(invoice_id = %invoice.id, error = %cleanup, "Could not remove invoice");
            }
            return Err(err);
        }

        let patch = InvoicePatch {
            file_path: Some(path),
            ..Default::default()
        };
        let invoice = self.repo.save(SaveInvoice::update(invoice.id, patch)).await?;
        info!(invoice_id = %invoice.id, user_id = %session.user_id, "Invoice uploaded");
        Ok(invoice)
    }

    /// Runs extraction on the stored file and records the result.
    pub async fn analyze(
        &self,
        session: &Session,
        id: Uuid,
        progress: Progress<'_>,
    ) -> InvoiceResult<AnalysisOutcome> {
        let report = |p: u8| {
            if let Some(sink) = progress {
                sink(p)
            }
        };
        report(0);

        let invoice = self.owned_invoice(session, id).await?;
        ensure_allowed(Action::Analyze, invoice.status)?;

        let path = invoice
            .file_path
            .clone()
            .ok_or_else(|| InvoiceError::FileNotFound(String::new()))?;
        if !self.storage.exists(&path).await? {
            return Err(InvoiceError::FileNotFound(path));
        }
        let url = self
            .storage
            .public_url(&path)
            .ok_or_else(|| InvoiceError::FileNotFound(path.clone()))?;
        report(10);

        let expected = self.expected_version(&invoice);

        let result = match self.extractor.analyze(&url).await {
            Ok(result) => result,
            Err(err) => {
                error!(invoice_id = %id, extractor = self.extractor.name(), error = %err, "Extraction failed");
                let patch = InvoicePatch {
                    expected_updated_at: expected,
                    ..InvoicePatch::status(state::after_analyze(false))
                };
                match self.repo.save(SaveInvoice::update(id, patch)).await {
                    Ok(_) => record_transition(invoice.status.as_str(), InvoiceStatus::Error.as_str()),
                    Err(status_err) => {
                        error!(invoice_id = %id, error = %status_err, "Could not mark invoice as failed")
                    }
                }
                return Err(err);
            }
        };
        report(80);

        let (writes, mut outcome) = field_writes(&result);
        let patch = InvoicePatch {
            expected_updated_at: expected,
            ..scalar_patch(&writes)
        };
        let updated = self.repo.save(SaveInvoice::update(id, patch)).await?;

        let written = self.repo.upsert_fields(id, &writes).await;
        outcome.items.extend(written.items);
        for failure in outcome.failures() {
            warn!(
                invoice_id = %id,
                field = %failure.key,
                error = failure.error.as_deref().unwrap_or_default(),
                "Field write failed"
            );
        }

        record_transition(invoice.status.as_str(), updated.status.as_str());
        info!(
            invoice_id = %id,
            fields = outcome.succeeded(),
            failed = outcome.items.len() - outcome.succeeded(),
            "Invoice analyzed"
        );
        report(100);

        Ok(AnalysisOutcome {
            invoice: updated,
            fields: outcome,
            raw_text: result.raw_text,
        })
    }

    /// Confirms field values and marks the invoice validated. Values in
    /// `values` are stored with confidence 1.0; other fields are left alone.
    pub async fn validate(
        &self,
        session: &Session,
        id: Uuid,
        values: BTreeMap<FieldKey, String>,
    ) -> InvoiceResult<InvoiceDetail> {
        let invoice = self.owned_invoice(session, id).await?;
        ensure_allowed(Action::Validate, invoice.status)?;

        let fields = self.repo.fields_for(id).await?;
        if fields.is_empty() {
            return Err(InvoiceError::NoFields(id));
        }

        let values: BTreeMap<FieldKey, String> = values
            .into_iter()
            .map(|(k, v)| (k, v.trim().to_string()))
            .collect();
        let writes: Vec<FieldWrite> = values
            .iter()
            .map(|(key, value)| FieldWrite::confirmed(key.clone(), value.clone()))
            .collect();

        let schema = self.active_schema(&invoice).await?;
        let missing = schema.missing_required(&fields, &values);
        if !missing.is_empty() {
            return Err(InvoiceError::MissingRequiredFields(missing));
        }

        for key in [FieldKey::TotalAmount, FieldKey::TaxAmount] {
            let Some(value) = values.get(&key).filter(|v| !v.is_empty()) else {
                continue;
            };
            match parse_amount(value) {
                None => {
                    return Err(InvoiceError::InvalidField {
                        field: key.to_string(),
                        reason: format!("`{}` is not an amount", value),
                    })
                }
                Some(amount) if amount.is_sign_negative() && !amount.is_zero() => {
                    return Err(InvoiceError::NegativeAmount {
                        field: key.to_string(),
                    })
                }
                Some(_) => {}
            }
        }
        let mut patch = scalar_patch(&writes);
        // A blank confirmed value empties the column it mirrors
        patch.cleared = values
            .iter()
            .filter(|(_, value)| value.is_empty())
            .filter_map(|(key, _)| ScalarColumn::for_field(key))
            .collect();

        if invoice.status == InvoiceStatus::Validated {
            // Re-applying confirmed values is a no-op; changing them is not allowed
            let unchanged = values.iter().all(|(key, value)| {
                fields.iter().any(|f| {
                    &f.field_name == key
                        && f.field_value.as_deref().unwrap_or_default() == value.as_str()
                        && f.confidence == Some(Confidence::CONFIRMED.value())
                })
            });
            if !unchanged {
                return Err(InvoiceError::InvalidTransition {
                    action: Action::Validate.as_str(),
                    status: invoice.status,
                });
            }
            return Ok(InvoiceDetail { invoice, fields });
        }

        let patch = InvoicePatch {
            status: Some(InvoiceStatus::Validated),
            expected_updated_at: self.expected_version(&invoice),
            ..patch
        };
        let updated = self.repo.confirm_fields(id, &writes, patch).await?;
        record_transition(invoice.status.as_str(), updated.status.as_str());
        info!(invoice_id = %id, confirmed = writes.len(), "Invoice validated");

        Ok(InvoiceDetail {
            fields: self.repo.fields_for(id).await?,
            invoice: updated,
        })
    }

    /// Submits a validated invoice to Sage. A rejected submission is reported
    /// in the result and leaves the invoice untouched.
    pub async fn export(&self, session: &Session, id: Uuid) -> InvoiceResult<ExportResult> {
        let invoice = self.owned_invoice(session, id).await?;
        ensure_allowed(Action::Export, invoice.status)?;

        let fields = self.repo.fields_for(id).await?;
        let payload = build_payload(&invoice, &fields, &self.options.currency);
        let idempotency_key = format!("{}:{}", id, ts(&invoice.updated_at));

        if self.options.export_policy == ExportPolicy::RejectDuplicate
            && self.repo.has_successful_export(&idempotency_key).await?
        {
            return Err(InvoiceError::AlreadyExported(id));
        }

        let result = match self.exporter.submit(&payload, &idempotency_key).await {
            Ok(message) => ExportResult::ok(message),
            Err(err) => {
                error!(invoice_id = %id, error = %err, "Sage export failed");
                ExportResult::failed(err.to_string())
            }
        };
        record_export(result.success);

        let record = ExportRecord {
            id: Uuid::new_v4(),
            invoice_id: id,
            target: self.exporter.target().to_string(),
            idempotency_key,
            success: result.success,
            message: result.message.clone(),
            exported_at: now(),
        };
        self.repo.record_export(&record).await?;

        if result.success {
            info!(invoice_id = %id, "Invoice exported");
        }
        Ok(result)
    }

    /// The payload an export would submit, without submitting it.
    pub async fn sage_preview(&self, session: &Session, id: Uuid) -> InvoiceResult<SagePayload> {
        let invoice = self.owned_invoice(session, id).await?;
        let fields = self.repo.fields_for(id).await?;
        Ok(build_payload(&invoice, &fields, &self.options.currency))
    }

    /// Removes the invoice, its fields and its stored file. A storage
    /// failure is logged and does not stop the row deletion.
    pub async fn delete(&self, session: &Session, id: Uuid) -> InvoiceResult<()> {
        let invoice = self.owned_invoice(session, id).await?;
        if let Some(path) = invoice.file_path.as_deref() {
            if let Err(err) = self.storage.delete(path).await {
                warn!(invoice_id = %id, path, error = %err, "Could not delete stored file");
            }
        }
        if !self.repo.delete(id).await? {
            return Err(InvoiceError::NotFound(id));
        }
        info!(invoice_id = %id, "Invoice deleted");
        Ok(())
    }

    pub async fn get(&self, session: &Session, id: Uuid) -> InvoiceResult<InvoiceDetail> {
        let invoice = self.owned_invoice(session, id).await?;
        let fields = self.repo.fields_for(id).await?;
        Ok(InvoiceDetail { invoice, fields })
    }

    pub async fn list(&self, session: &Session) -> InvoiceResult<Vec<Invoice>> {
        self.repo.list_for_user(session.user_id).await
    }

    pub async fn file_url(&self, session: &Session, id: Uuid) -> InvoiceResult<Option<String>> {
        let invoice = self.owned_invoice(session, id).await?;
        Ok(invoice
            .file_path
            .as_deref()
            .and_then(|p| self.storage.public_url(p)))
    }

    /// Presigned URL the client can PUT the file to directly.
    pub async fn signed_upload_url(
        &self,
        session: &Session,
        id: Uuid,
        file_name: Option<String>,
        content_type: &str,
    ) -> InvoiceResult<String> {
        let invoice = self.owned_invoice(session, id).await?;
        let placeholder = UploadedFile::new(file_name, content_type, Vec::<u8>::new());
        let path = invoice
            .file_path
            .unwrap_or_else(|| object_path(session.user_id, id, &placeholder));
        self.storage.signed_upload_url(&path, content_type).await
    }

    pub async fn stats(&self, session: &Session) -> InvoiceResult<InvoiceStats> {
        self.repo.stats_for_user(session.user_id).await
    }

    pub async fn list_templates(&self, session: &Session) -> InvoiceResult<Vec<ExtractionTemplate>> {
        self.repo.list_templates(session.user_id).await
    }

    pub async fn get_template(&self, session: &Session, id: Uuid) -> InvoiceResult<ExtractionTemplate> {
        self.repo
            .get_template(id)
            .await?
            .filter(|t| t.visible_to(session.user_id))
            .ok_or(InvoiceError::TemplateNotFound(id))
    }

    pub async fn create_template(
        &self,
        session: &Session,
        new: NewTemplate,
    ) -> InvoiceResult<ExtractionTemplate> {
        self.repo.create_template(Some(session.user_id), new).await
    }

    async fn owned_invoice(&self, session: &Session, id: Uuid) -> InvoiceResult<Invoice> {
        match self.repo.get(id).await? {
            Some(invoice) if invoice.is_owned_by(session.user_id) => Ok(invoice),
            _ => Err(InvoiceError::NotFound(id)),
        }
    }

    /// Version an update must still match, under [`ConcurrencyPolicy::VersionCheck`].
    fn expected_version(&self, invoice: &Invoice) -> Option<chrono::DateTime<chrono::Utc>> {
        match self.options.concurrency {
            ConcurrencyPolicy::VersionCheck => Some(invoice.updated_at),
            ConcurrencyPolicy::LastWriteWins => None,
        }
    }

    /// Schema of the invoice's template, or the default one.
    async fn active_schema(&self, invoice: &Invoice) -> InvoiceResult<ExtractionSchema> {
        let Some(template_id) = invoice.template_id() else {
            return Ok(ExtractionSchema::default());
        };
        match self.repo.get_template(template_id).await? {
            Some(template) => Ok(template.schema),
            None => {
                warn!(invoice_id = %invoice.id, %template_id, "Template gone, using default schema");
                Ok(ExtractionSchema::default())
            }
        }
    }
}

/// Splits an extraction result into writable fields and the ones rejected
/// for an out-of-range confidence.
fn field_writes(result: &ExtractionResult) -> (Vec<FieldWrite>, BatchOutcome) {
    let mut writes = Vec::with_capacity(result.fields.len());
    let mut rejected = BatchOutcome::default();
    for (key, field) in &result.fields {
        match Confidence::new(field.confidence) {
            Ok(confidence) => writes.push(FieldWrite {
                field_name: key.clone(),
                field_value: field.value.clone(),
                confidence: Some(confidence),
                position: field.position,
            }),
            Err(err) => rejected.push(key.as_str(), Err(err)),
        }
    }
    (writes, rejected)
}

/// Copies known fields onto the invoice columns. Unparseable or negative
/// amounts are skipped.
fn scalar_patch(writes: &[FieldWrite]) -> InvoicePatch {
    let mut patch = InvoicePatch::status(state::after_analyze(true));
    for write in writes {
        let Some(value) = write
            .field_value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        else {
            continue;
        };
        let amount = || parse_amount(value).filter(|a| !a.is_sign_negative() || a.is_zero());
        match write.field_name {
            FieldKey::InvoiceNumber => patch.invoice_number = Some(value.to_string()),
            FieldKey::Date => patch.invoice_date = normalize_date(value),
            FieldKey::DueDate => patch.due_date = normalize_date(value),
            FieldKey::Supplier => patch.supplier = Some(value.to_string()),
            FieldKey::TotalAmount => patch.total_amount = amount(),
            FieldKey::TaxAmount => patch.tax_amount = amount(),
            _ => {}
        }
    }
    patch
}
