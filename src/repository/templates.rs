use uuid::Uuid;

use super::rows::{ExportRow, TemplateRow};
use super::{now, ts, InvoiceRepository};
use crate::core::{InvoiceError, InvoiceResult};
use crate::models::{ExportRecord, ExtractionTemplate, NewTemplate};

const TEMPLATE_COLUMNS: &str = "id, name, user_id, is_public, schema, created_at, updated_at";

impl InvoiceRepository {
    pub async fn create_template(
        &self,
        owner: Option<Uuid>,
        new: NewTemplate,
    ) -> InvoiceResult<ExtractionTemplate> {
        if new.name.trim().is_empty() {
            return Err(InvoiceError::InvalidField {
                field: "name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        let schema = serde_json::to_string(&new.schema).map_err(|e| InvoiceError::InvalidField {
            field: "schema".to_string(),
            reason: e.to_string(),
        })?;
        let id = Uuid::new_v4();
        let created = ts(&now());

        sqlx::query(
            "INSERT INTO extraction_templates (id, name, user_id, is_public, schema, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        )
        .bind(id.to_string())
        .bind(new.name.trim())
        .bind(owner.map(|u| u.to_string()))
        .bind(new.is_public || owner.is_none())
        .bind(schema)
        .bind(created)
        .execute(&self.pool)
        .await?;

        self.get_template(id)
            .await?
            .ok_or(InvoiceError::TemplateNotFound(id))
    }

    pub async fn get_template(&self, id: Uuid) -> InvoiceResult<Option<ExtractionTemplate>> {
        let row: Option<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {} FROM extraction_templates WHERE id = ?1",
            TEMPLATE_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ExtractionTemplate::try_from).transpose()?)
    }

    /// Public templates plus the ones the user owns.
    pub async fn list_templates(&self, user_id: Uuid) -> InvoiceResult<Vec<ExtractionTemplate>> {
        let rows: Vec<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {} FROM extraction_templates
             WHERE is_public = 1 OR user_id IS NULL OR user_id = ?1
             ORDER BY name, id",
            TEMPLATE_COLUMNS
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| ExtractionTemplate::try_from(r).map_err(InvoiceError::from))
            .collect()
    }

    pub async fn record_export(&self, record: &ExportRecord) -> InvoiceResult<()> {
        sqlx::query(
            "INSERT INTO invoice_exports (id, invoice_id, target, idempotency_key, success, message, exported_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(record.id.to_string())
        .bind(record.invoice_id.to_string())
        .bind(&record.target)
        .bind(&record.idempotency_key)
        .bind(record.success)
        .bind(&record.message)
        .bind(ts(&record.exported_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn has_successful_export(&self, idempotency_key: &str) -> InvoiceResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM invoice_exports WHERE idempotency_key = ?1 AND success = 1",
        )
        .bind(idempotency_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Export attempts for one invoice, oldest first.
    pub async fn exports_for(&self, invoice_id: Uuid) -> InvoiceResult<Vec<ExportRecord>> {
        let rows: Vec<ExportRow> = sqlx::query_as(
            "SELECT id, invoice_id, target, idempotency_key, success, message, exported_at
             FROM invoice_exports WHERE invoice_id = ?1 ORDER BY exported_at, id",
        )
        .bind(invoice_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| ExportRecord::try_from(r).map_err(InvoiceError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractionSchema, NewInvoice};

    #[tokio::test]
    async fn templates_are_scoped_by_visibility() {
        let repo = InvoiceRepository::in_memory().await.unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let shared = repo
            .create_template(
                None,
                NewTemplate {
                    name: "Standard".into(),
                    schema: ExtractionSchema::default(),
                    is_public: false,
                },
            )
            .await
            .unwrap();
        assert!(shared.is_public);

        repo.create_template(
            Some(alice),
            NewTemplate {
                name: "Alice only".into(),
                schema: ExtractionSchema::default(),
                is_public: false,
            },
        )
        .await
        .unwrap();

        assert_eq!(repo.list_templates(alice).await.unwrap().len(), 2);
        let for_bob = repo.list_templates(bob).await.unwrap();
        assert_eq!(for_bob.len(), 1);
        assert_eq!(for_bob[0].schema, ExtractionSchema::default());
    }

    #[tokio::test]
    async fn export_records_are_keyed() {
        let repo = InvoiceRepository::in_memory().await.unwrap();
        let invoice = repo
            .save(NewInvoice::pending(Uuid::new_v4(), "t").into())
            .await
            .unwrap();
        let mut record = ExportRecord {
            id: Uuid::new_v4(),
            invoice_id: invoice.id,
            target: "sage".into(),
            idempotency_key: "k1".into(),
            success: false,
            message: "timeout".into(),
            exported_at: now(),
        };
        repo.record_export(&record).await.unwrap();
        assert!(!repo.has_successful_export("k1").await.unwrap());

        record.id = Uuid::new_v4();
        record.success = true;
        repo.record_export(&record).await.unwrap();
        assert!(repo.has_successful_export("k1").await.unwrap());
        assert_eq!(repo.exports_for(invoice.id).await.unwrap().len(), 2);
    }
}
