use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

use super::{ExtractionResult, Extractor};
use crate::core::{ExtractionConfig, InvoiceError, InvoiceResult};

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    document_url: &'a str,
}

/// Posts the document URL to an extraction endpoint and reads back an
/// [`ExtractionResult`].
pub struct HttpExtractor {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpExtractor {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpExtractor {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn from_config(config: &ExtractionConfig) -> anyhow::Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("EXTRACTION__ENDPOINT is required in http mode"))?;
        Self::new(
            endpoint,
            config.api_key.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn analyze(&self, document_url: &str) -> InvoiceResult<ExtractionResult> {
        debug!(endpoint = %self.endpoint, "Requesting extraction");
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&AnalyzeRequest { document_url });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| InvoiceError::Extraction(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(%status, "Extraction endpoint returned an error");
            return Err(InvoiceError::Extraction(format!("{}: {}", status, body)));
        }

        response
            .json::<ExtractionResult>()
            .await
            .map_err(|e| InvoiceError::Extraction(format!("invalid extraction payload: {}", e)))
    }
}
