use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::AppConfig;
use crate::export;
use crate::extraction;
use crate::lifecycle::{LifecycleManager, LifecycleOptions};
use crate::repository::InvoiceRepository;
use crate::storage::StorageGateway;

pub type KeyedRateLimiter = Arc<RateLimiter<Uuid, DashMapStateStore<Uuid>, DefaultClock>>;

#[derive(Clone)]
pub struct ApiState {
    pub lifecycle: LifecycleManager,
    pub rate_limiter: KeyedRateLimiter,
    /// Bearer token -> user.
    pub tokens: Arc<HashMap<String, Uuid>>,
    pub config: Arc<AppConfig>,
}

impl ApiState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        // Initialize database
        let repo = InvoiceRepository::connect(&config.database_url).await?;

        // Initialize storage
        let storage = StorageGateway::from_config(&config.storage, config.max_upload_size_bytes).await?;

        // Initialize collaborators
        let extractor = extraction::from_config(&config.extraction)?;
        let exporter = export::from_config(&config.export)?;

        let options = LifecycleOptions {
            concurrency: config.lifecycle.concurrency,
            export_policy: config.export.policy,
            currency: config.export.currency.clone(),
            max_upload_size: config.max_upload_size_bytes,
        };
        let lifecycle = LifecycleManager::new(repo, storage, extractor, exporter, options);

        Self::from_parts(lifecycle, config)
    }

    pub fn from_parts(lifecycle: LifecycleManager, config: AppConfig) -> anyhow::Result<Self> {
        let tokens = config.token_table()?;
        if tokens.is_empty() {
            tracing::warn!("AUTH_TOKENS is empty, every API call will be rejected");
        }

        // Initialize rate limiter
        let per_minute = NonZeroU32::new(config.rate_limit_per_minute)
            .ok_or_else(|| anyhow::anyhow!("RATE_LIMIT_PER_MINUTE must be positive"))?;
        let burst = NonZeroU32::new(config.rate_limit_burst)
            .ok_or_else(|| anyhow::anyhow!("RATE_LIMIT_BURST must be positive"))?;
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        let rate_limiter = Arc::new(RateLimiter::dashmap_with_clock(quota, &DefaultClock::default()));

        Ok(ApiState {
            lifecycle,
            rate_limiter,
            tokens: Arc::new(tokens),
            config: Arc::new(config),
        })
    }
}
