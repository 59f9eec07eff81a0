use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use std::time::Duration;
use tracing::debug;

use super::{ExtractedField, ExtractionResult, Extractor};
use crate::core::InvoiceResult;
use crate::models::FieldKey;

/// Stand-in for a real extraction backend: waits, then returns plausible
/// random values with fixed confidences.
pub struct SimulatedExtractor {
    delay: Duration,
}

impl SimulatedExtractor {
    pub fn new(delay: Duration) -> Self {
        SimulatedExtractor { delay }
    }

    fn generate() -> ExtractionResult {
        let mut rng = rand::thread_rng();
        let today = Utc::now().date_naive();
        let total: f64 = rng.gen_range(10.0..1000.0);
        let tax = total * rng.gen_range(0.0..0.2);

        let fields = [
            (
                FieldKey::InvoiceNumber,
                ExtractedField::new(format!("INV-{}", rng.gen_range(10000..100000)), 0.94),
            ),
            (FieldKey::Date, ExtractedField::new(today.to_string(), 0.96)),
            (
                FieldKey::DueDate,
                ExtractedField::new((today + ChronoDuration::days(30)).to_string(), 0.91),
            ),
            (FieldKey::Supplier, ExtractedField::new("Fournisseur Demo", 0.98)),
            (FieldKey::TotalAmount, ExtractedField::new(format!("{:.2}", total), 0.95)),
            (FieldKey::TaxAmount, ExtractedField::new(format!("{:.2}", tax), 0.92)),
            (
                FieldKey::Reference,
                ExtractedField::new(format!("REF-{}", rng.gen_range(1000..10000)), 0.88),
            ),
            (FieldKey::Description, ExtractedField::new("Achat de fournitures", 0.76)),
        ];

        ExtractionResult {
            fields: fields.into_iter().collect(),
            raw_text: Some("Ceci est le texte brut extrait du document...".to_string()),
        }
    }
}

#[async_trait]
impl Extractor for SimulatedExtractor {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn analyze(&self, document_url: &str) -> InvoiceResult<ExtractionResult> {
        debug!(document_url, delay_ms = self.delay.as_millis() as u64, "Simulating extraction");
        tokio::time::sleep(self.delay).await;
        Ok(Self::generate())
    }
}
