pub mod http;
pub mod sage;
pub mod simulated;

pub use http::HttpSageExporter;
pub use sage::{build_payload, SagePayload};
pub use simulated::SimulatedSageExporter;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{CollaboratorMode, ExportConfig, InvoiceResult};

/// Hands a payload to the accounting system. Returns the message to show
/// the user on success.
#[async_trait]
pub trait SageExporter: Send + Sync {
    fn target(&self) -> &'static str {
        "sage"
    }

    async fn submit(&self, payload: &SagePayload, idempotency_key: &str) -> InvoiceResult<String>;
}

pub fn from_config(config: &ExportConfig) -> anyhow::Result<Arc<dyn SageExporter>> {
    Ok(match config.mode {
        CollaboratorMode::Simulated => {
            Arc::new(SimulatedSageExporter::new(Duration::from_millis(config.delay_ms)))
        }
        CollaboratorMode::Http => Arc::new(HttpSageExporter::from_config(config)?),
    })
}
