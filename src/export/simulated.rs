use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use super::{SageExporter, SagePayload};
use crate::core::InvoiceResult;

pub const SUCCESS_MESSAGE: &str = "Facture exportée avec succès vers Sage";

/// Accepts every payload after a delay.
pub struct SimulatedSageExporter {
    delay: Duration,
}

impl SimulatedSageExporter {
    pub fn new(delay: Duration) -> Self {
        SimulatedSageExporter { delay }
    }
}

#[async_trait]
impl SageExporter for SimulatedSageExporter {
    async fn submit(&self, payload: &SagePayload, idempotency_key: &str) -> InvoiceResult<String> {
        tokio::time::sleep(self.delay).await;
        info!(
            num_facture = %payload.num_facture,
            idempotency_key,
            "Simulated Sage export"
        );
        Ok(SUCCESS_MESSAGE.to_string())
    }
}
