use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::error;

use super::{SageExporter, SagePayload};
use crate::core::{ExportConfig, InvoiceError, InvoiceResult};
use crate::export::simulated::SUCCESS_MESSAGE;

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    message: Option<String>,
}

/// Posts payloads to a Sage import endpoint.
pub struct HttpSageExporter {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSageExporter {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(HttpSageExporter {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn from_config(config: &ExportConfig) -> anyhow::Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("EXPORT__ENDPOINT is required in http mode"))?;
        Self::new(endpoint, config.api_key.clone(), Duration::from_millis(config.timeout_ms))
    }
}

#[async_trait]
impl SageExporter for HttpSageExporter {
    async fn submit(&self, payload: &SagePayload, idempotency_key: &str) -> InvoiceResult<String> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Idempotency-Key", idempotency_key)
            .json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| InvoiceError::Export(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, "Sage rejected the export");
            return Err(InvoiceError::Export(format!("Sage returned {}: {}", status, body)));
        }

        // An empty or non-JSON success body still counts as accepted
        let message = response
            .json::<SubmitResponse>()
            .await
            .ok()
            .and_then(|r| r.message)
            .unwrap_or_else(|| SUCCESS_MESSAGE.to_string());
        Ok(message)
    }
}
