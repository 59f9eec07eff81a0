mod rows;
mod templates;

pub(crate) use rows::{now, ts};

use futures::future::join_all;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Executor;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::{InvoiceError, InvoiceResult};
use crate::models::{
    BatchOutcome, FieldWrite, Invoice, InvoiceField, InvoicePatch, InvoiceStats, InvoiceStatus,
    NewInvoice, SaveInvoice, ScalarColumn,
};
use rows::{FieldRow, InvoiceRow};

const INVOICE_COLUMNS: &str = "id, user_id, title, supplier, invoice_number, invoice_date, \
     due_date, total_amount, tax_amount, status, file_path, file_type, metadata, created_at, updated_at";

/// Persistence for invoices, their extracted fields, extraction templates
/// and export records, backed by SQLite.
#[derive(Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    pub async fn connect(database_url: &str) -> InvoiceResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // An in-memory database lives and dies with its single connection
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let repo = InvoiceRepository { pool };
        repo.migrate().await?;
        info!(in_memory, "Database ready");
        Ok(repo)
    }

    pub async fn in_memory() -> InvoiceResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn migrate(&self) -> InvoiceResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| InvoiceError::Database(e.into()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn ping(&self) -> InvoiceResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Creates the invoice when no identifier is given, updates it otherwise.
    pub async fn save(&self, save: SaveInvoice) -> InvoiceResult<Invoice> {
        match save {
            SaveInvoice::Create(new) => self.insert(new).await,
            SaveInvoice::Update { id, patch } => self.update(id, patch).await,
        }
    }

    async fn insert(&self, new: NewInvoice) -> InvoiceResult<Invoice> {
        if new.title.trim().is_empty() {
            return Err(InvoiceError::InvalidField {
                field: "title".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        let id = Uuid::new_v4();
        let created = ts(&now());
        let metadata = new.metadata.as_ref().map(|m| m.to_string());

        sqlx::query(
            "INSERT INTO invoices (id, user_id, title, status, file_path, file_type, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        )
        .bind(id.to_string())
        .bind(new.user_id.to_string())
        .bind(new.title.trim())
        .bind(new.status.as_str())
        .bind(new.file_path)
        .bind(new.file_type)
        .bind(metadata)
        .bind(created)
        .execute(&self.pool)
        .await?;

        debug!(invoice_id = %id, "Invoice created");
        self.require(id).await
    }

    async fn update(&self, id: Uuid, patch: InvoicePatch) -> InvoiceResult<Invoice> {
        patch.validate()?;
        if apply_patch(&self.pool, id, &patch).await? == 0 {
            return Err(self.unmatched(id, &patch).await?);
        }
        self.require(id).await
    }

    /// Error for an update that matched no row: a stale version or a missing invoice.
    async fn unmatched(&self, id: Uuid, patch: &InvoicePatch) -> InvoiceResult<InvoiceError> {
        Ok(match (self.get(id).await?, patch.expected_updated_at) {
            (Some(_), Some(_)) => InvoiceError::Conflict(id),
            _ => InvoiceError::NotFound(id),
        })
    }

    /// Writes confirmed field values and applies `patch` in one transaction,
    /// so either all of them land or none do.
    pub async fn confirm_fields(
        &self,
        id: Uuid,
        writes: &[FieldWrite],
        patch: InvoicePatch,
    ) -> InvoiceResult<Invoice> {
        patch.validate()?;
        let mut tx = self.pool.begin().await?;
        for write in writes {
            upsert_field_with(&mut *tx, id, write).await?;
        }
        if apply_patch(&mut *tx, id, &patch).await? == 0 {
            tx.rollback().await?;
            return Err(self.unmatched(id, &patch).await?);
        }
        tx.commit().await?;

        debug!(invoice_id = %id, fields = writes.len(), "Fields confirmed");
        self.require(id).await
    }

    pub async fn get(&self, id: Uuid) -> InvoiceResult<Option<Invoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invoices WHERE id = ?1",
            INVOICE_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Invoice::try_from).transpose()?)
    }

    pub async fn require(&self, id: Uuid) -> InvoiceResult<Invoice> {
        self.get(id).await?.ok_or(InvoiceError::NotFound(id))
    }

    /// The user's invoices, newest first.
    pub async fn list_for_user(&self, user_id: Uuid) -> InvoiceResult<Vec<Invoice>> {
        let rows: Vec<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invoices WHERE user_id = ?1 ORDER BY created_at DESC, id",
            INVOICE_COLUMNS
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| Invoice::try_from(r).map_err(InvoiceError::from))
            .collect()
    }

    /// Removes the invoice; fields and export records go with it.
    pub async fn delete(&self, id: Uuid) -> InvoiceResult<bool> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn fields_for(&self, invoice_id: Uuid) -> InvoiceResult<Vec<InvoiceField>> {
        let rows: Vec<FieldRow> = sqlx::query_as(
            "SELECT id, invoice_id, field_name, field_value, confidence, position, created_at, updated_at
             FROM invoice_fields WHERE invoice_id = ?1 ORDER BY field_name",
        )
        .bind(invoice_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| InvoiceField::try_from(r).map_err(InvoiceError::from))
            .collect()
    }

    /// Inserts or replaces the value stored under `(invoice_id, field_name)`.
    pub async fn upsert_field(&self, invoice_id: Uuid, write: &FieldWrite) -> InvoiceResult<()> {
        upsert_field_with(&self.pool, invoice_id, write).await
    }

    /// Issues all writes concurrently. A failed write does not undo the others.
    pub async fn upsert_fields(&self, invoice_id: Uuid, writes: &[FieldWrite]) -> BatchOutcome {
        let results = join_all(writes.iter().map(|w| self.upsert_field(invoice_id, w))).await;

        let mut outcome = BatchOutcome::default();
        for (write, result) in writes.iter().zip(results) {
            outcome.push(write.field_name.as_str(), result);
        }
        outcome
    }

    pub async fn stats_for_user(&self, user_id: Uuid) -> InvoiceResult<InvoiceStats> {
        let counts: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM invoices WHERE user_id = ?1 GROUP BY status",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let average_confidence: Option<f64> = sqlx::query_scalar(
            "SELECT AVG(f.confidence) FROM invoice_fields f
             JOIN invoices i ON i.id = f.invoice_id
             WHERE i.user_id = ?1 AND f.confidence IS NOT NULL",
        )
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        let mut stats = InvoiceStats {
            average_confidence,
            ..Default::default()
        };
        for status in InvoiceStatus::ALL {
            stats.by_status.insert(status, 0);
        }
        for (status, count) in counts {
            let status = InvoiceStatus::from_str(&status)?;
            stats.by_status.insert(status, count);
            stats.total += count;
        }
        Ok(stats)
    }
}

async fn apply_patch<'e, E>(executor: E, id: Uuid, patch: &InvoicePatch) -> InvoiceResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let expected = patch.expected_updated_at.as_ref().map(ts);

    let result = sqlx::query(
        "UPDATE invoices SET
            title = COALESCE(?1, title),
            supplier = CASE WHEN ?15 THEN NULL ELSE COALESCE(?2, supplier) END,
            invoice_number = CASE WHEN ?16 THEN NULL ELSE COALESCE(?3, invoice_number) END,
            invoice_date = CASE WHEN ?17 THEN NULL ELSE COALESCE(?4, invoice_date) END,
            due_date = CASE WHEN ?18 THEN NULL ELSE COALESCE(?5, due_date) END,
            total_amount = CASE WHEN ?19 THEN NULL ELSE COALESCE(?6, total_amount) END,
            tax_amount = CASE WHEN ?20 THEN NULL ELSE COALESCE(?7, tax_amount) END,
            status = COALESCE(?8, status),
            file_path = COALESCE(?9, file_path),
            file_type = COALESCE(?10, file_type),
            metadata = COALESCE(?11, metadata),
            updated_at = ?12
         WHERE id = ?13 AND (?14 IS NULL OR updated_at = ?14)",
    )
    .bind(patch.title.as_deref().map(str::trim))
    .bind(patch.supplier.as_deref())
    .bind(patch.invoice_number.as_deref())
    .bind(patch.invoice_date.as_deref())
    .bind(patch.due_date.as_deref())
    .bind(patch.total_amount.map(|a| a.to_string()))
    .bind(patch.tax_amount.map(|a| a.to_string()))
    .bind(patch.status.map(|s| s.as_str()))
    .bind(patch.file_path.as_deref())
    .bind(patch.file_type.as_deref())
    .bind(patch.metadata.as_ref().map(|m| m.to_string()))
    .bind(ts(&now()))
    .bind(id.to_string())
    .bind(expected)
    .bind(patch.clears(ScalarColumn::Supplier))
    .bind(patch.clears(ScalarColumn::InvoiceNumber))
    .bind(patch.clears(ScalarColumn::InvoiceDate))
    .bind(patch.clears(ScalarColumn::DueDate))
    .bind(patch.clears(ScalarColumn::TotalAmount))
    .bind(patch.clears(ScalarColumn::TaxAmount))
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

async fn upsert_field_with<'e, E>(executor: E, invoice_id: Uuid, write: &FieldWrite) -> InvoiceResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let position = write
        .position
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| InvoiceError::InvalidField {
            field: write.field_name.to_string(),
            reason: e.to_string(),
        })?;

    sqlx::query(
        "INSERT INTO invoice_fields (id, invoice_id, field_name, field_value, confidence, position, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT (invoice_id, field_name) DO UPDATE SET
            field_value = excluded.field_value,
            confidence = excluded.confidence,
            position = COALESCE(excluded.position, invoice_fields.position),
            updated_at = excluded.updated_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(invoice_id.to_string())
    .bind(write.field_name.as_str())
    .bind(write.field_value.as_deref())
    .bind(write.confidence.map(|c| c.value()))
    .bind(position)
    .bind(ts(&now()))
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, FieldKey};
    use rust_decimal::Decimal;

    async fn repo_with_invoice() -> (InvoiceRepository, Invoice) {
        let repo = InvoiceRepository::in_memory().await.unwrap();
        let invoice = repo
            .save(NewInvoice::pending(Uuid::new_v4(), "EDF").into())
            .await
            .unwrap();
        (repo, invoice)
    }

    #[tokio::test]
    async fn save_creates_then_updates() {
        let (repo, invoice) = repo_with_invoice().await;
        assert_eq!(invoice.status, InvoiceStatus::Pending);

        let patch = InvoicePatch {
            supplier: Some("EDF".into()),
            total_amount: Some(Decimal::new(29400, 2)),
            ..InvoicePatch::status(InvoiceStatus::Processed)
        };
        let updated = repo.save(SaveInvoice::update(invoice.id, patch)).await.unwrap();
        assert_eq!(updated.status, InvoiceStatus::Processed);
        assert_eq!(updated.supplier.as_deref(), Some("EDF"));
        assert_eq!(updated.total_amount, Some(Decimal::new(29400, 2)));
        assert_eq!(updated.title, "EDF");
        assert!(updated.updated_at >= invoice.updated_at);
    }

    #[tokio::test]
    async fn update_of_missing_invoice_is_not_found() {
        let repo = InvoiceRepository::in_memory().await.unwrap();
        let id = Uuid::new_v4();
        let err = repo
            .save(SaveInvoice::update(id, InvoicePatch::status(InvoiceStatus::Error)))
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::NotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let (repo, invoice) = repo_with_invoice().await;
        repo.save(SaveInvoice::update(invoice.id, InvoicePatch::status(InvoiceStatus::Processed)))
            .await
            .unwrap();

        let stale = InvoicePatch {
            expected_updated_at: Some(invoice.updated_at),
            ..InvoicePatch::status(InvoiceStatus::Error)
        };
        let err = repo.save(SaveInvoice::update(invoice.id, stale)).await.unwrap_err();
        assert!(matches!(err, InvoiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn field_upsert_is_keyed_by_name() {
        let (repo, invoice) = repo_with_invoice().await;
        let first = FieldWrite {
            field_name: FieldKey::Supplier,
            field_value: Some("ED F".into()),
            confidence: Some(Confidence::new(0.5).unwrap()),
            position: None,
        };
        repo.upsert_field(invoice.id, &first).await.unwrap();
        repo.upsert_field(invoice.id, &FieldWrite::confirmed(FieldKey::Supplier, "EDF"))
            .await
            .unwrap();

        let fields = repo.fields_for(invoice.id).await.unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field_value.as_deref(), Some("EDF"));
        assert_eq!(fields[0].confidence, Some(1.0));
    }

    #[tokio::test]
    async fn batch_reports_each_write() {
        let (repo, invoice) = repo_with_invoice().await;
        let writes = vec![
            FieldWrite::confirmed(FieldKey::InvoiceNumber, "F-001"),
            FieldWrite::confirmed(FieldKey::Custom("iban".into()), "FR76"),
        ];
        let outcome = repo.upsert_fields(invoice.id, &writes).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.succeeded(), 2);

        // Unknown invoice violates the foreign key
        let orphan = repo.upsert_fields(Uuid::new_v4(), &writes).await;
        assert_eq!(orphan.succeeded(), 0);
    }

    #[tokio::test]
    async fn delete_cascades_to_fields() {
        let (repo, invoice) = repo_with_invoice().await;
        repo.upsert_field(invoice.id, &FieldWrite::confirmed(FieldKey::Supplier, "EDF"))
            .await
            .unwrap();
        assert!(repo.delete(invoice.id).await.unwrap());
        assert!(repo.get(invoice.id).await.unwrap().is_none());
        assert!(repo.fields_for(invoice.id).await.unwrap().is_empty());
        assert!(!repo.delete(invoice.id).await.unwrap());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_scoped_to_user() {
        let repo = InvoiceRepository::in_memory().await.unwrap();
        let user = Uuid::new_v4();
        let older = repo.save(NewInvoice::pending(user, "older").into()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = repo.save(NewInvoice::pending(user, "newer").into()).await.unwrap();
        repo.save(NewInvoice::pending(Uuid::new_v4(), "someone else").into())
            .await
            .unwrap();

        let ids: Vec<Uuid> = repo.list_for_user(user).await.unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[tokio::test]
    async fn stats_count_statuses_and_average_confidence() {
        let (repo, invoice) = repo_with_invoice().await;
        let half = FieldWrite {
            field_name: FieldKey::Date,
            field_value: Some("2024-01-01".into()),
            confidence: Some(Confidence::new(0.5).unwrap()),
            position: None,
        };
        repo.upsert_field(invoice.id, &half).await.unwrap();
        repo.upsert_field(invoice.id, &FieldWrite::confirmed(FieldKey::Supplier, "EDF"))
            .await
            .unwrap();

        let stats = repo.stats_for_user(invoice.user_id).await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.by_status[&InvoiceStatus::Pending], 1);
        assert_eq!(stats.by_status[&InvoiceStatus::Validated], 0);
        assert_eq!(stats.average_confidence, Some(0.75));
    }

    #[tokio::test]
    async fn cleared_columns_are_set_to_null() {
        let (repo, invoice) = repo_with_invoice().await;
        let patch = InvoicePatch {
            supplier: Some("EDF".into()),
            tax_amount: Some(Decimal::new(4900, 2)),
            ..Default::default()
        };
        repo.save(SaveInvoice::update(invoice.id, patch)).await.unwrap();

        let clear = InvoicePatch {
            cleared: vec![ScalarColumn::TaxAmount],
            ..Default::default()
        };
        let updated = repo.save(SaveInvoice::update(invoice.id, clear)).await.unwrap();
        assert_eq!(updated.tax_amount, None);
        assert_eq!(updated.supplier.as_deref(), Some("EDF"));
    }

    #[tokio::test]
    async fn confirmed_fields_and_status_commit_together() {
        let (repo, invoice) = repo_with_invoice().await;
        let writes = vec![FieldWrite::confirmed(FieldKey::Supplier, "EDF")];

        let stale = InvoicePatch {
            expected_updated_at: Some(invoice.updated_at - chrono::Duration::seconds(1)),
            ..InvoicePatch::status(InvoiceStatus::Validated)
        };
        let err = repo.confirm_fields(invoice.id, &writes, stale).await.unwrap_err();
        assert!(matches!(err, InvoiceError::Conflict(_)));
        assert!(repo.fields_for(invoice.id).await.unwrap().is_empty());

        let confirmed = repo
            .confirm_fields(invoice.id, &writes, InvoicePatch::status(InvoiceStatus::Validated))
            .await
            .unwrap();
        assert_eq!(confirmed.status, InvoiceStatus::Validated);
        assert_eq!(repo.fields_for(invoice.id).await.unwrap().len(), 1);
    }
}
