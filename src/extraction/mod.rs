pub mod http;
pub mod simulated;

pub use http::HttpExtractor;
pub use simulated::SimulatedExtractor;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{CollaboratorMode, ExtractionConfig, InvoiceResult};
use crate::models::{FieldKey, FieldPosition};

/// One value read from a document. `confidence` is checked against [0, 1]
/// when the field is written, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    #[serde(default, deserialize_with = "value_as_text")]
    pub value: Option<String>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<FieldPosition>,
}

impl ExtractedField {
    pub fn new(value: impl Into<String>, confidence: f64) -> Self {
        ExtractedField {
            value: Some(value.into()),
            confidence,
            position: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub fields: BTreeMap<FieldKey, ExtractedField>,
    #[serde(default, rename = "rawText", alias = "raw_text", skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

/// Reads invoice fields out of a stored document.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze(&self, document_url: &str) -> InvoiceResult<ExtractionResult>;
}

pub fn from_config(config: &ExtractionConfig) -> anyhow::Result<Arc<dyn Extractor>> {
    Ok(match config.mode {
        CollaboratorMode::Simulated => {
            Arc::new(SimulatedExtractor::new(Duration::from_millis(config.delay_ms)))
        }
        CollaboratorMode::Http => Arc::new(HttpExtractor::from_config(config)?),
    })
}

// Extraction backends are not consistent about numbers vs strings
fn value_as_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
