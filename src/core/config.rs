use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::storage::MAX_FILE_SIZE;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_upload_size_bytes: u64,
    pub rate_limit_per_minute: u32,
    pub rate_limit_burst: u32,
    /// `token=user-uuid` pairs, comma separated.
    #[serde(default)]
    pub auth_tokens: String,
    pub storage: StorageConfig,
    pub extraction: ExtractionConfig,
    pub export: ExportConfig,
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    pub bucket: String,
    pub endpoint: Option<String>,
    pub public_base_url: Option<String>,
    pub part_size_bytes: usize,
    pub signed_url_ttl_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    S3,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaboratorMode {
    Simulated,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    pub mode: CollaboratorMode,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub delay_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    pub mode: CollaboratorMode,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub delay_ms: u64,
    pub timeout_ms: u64,
    pub currency: String,
    pub policy: ExportPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportPolicy {
    /// Every export call is submitted, even for an invoice already exported.
    #[default]
    AllowResubmit,
    /// A second successful export of unchanged content is refused.
    RejectDuplicate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    pub concurrency: ConcurrencyPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// Concurrent analyses of one invoice overwrite each other.
    #[default]
    LastWriteWins,
    /// An analysis commits only if the invoice is unchanged since it started.
    VersionCheck,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            concurrency: ConcurrencyPolicy::LastWriteWins,
        }
    }
}

impl AppConfig {
    /// Loads defaults, then overrides from the environment
    /// (`STORAGE__BUCKET`, `EXPORT__POLICY`, ...).
    pub fn load() -> anyhow::Result<Self> {
        let settings = Self::defaults()?
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::finish(settings)
    }

    /// Built-in defaults only, ignoring the environment.
    pub fn from_defaults() -> anyhow::Result<Self> {
        Self::finish(Self::defaults()?.build()?)
    }

    fn defaults() -> anyhow::Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(config::Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8080)?
            .set_default("database_url", "sqlite://invoices.db?mode=rwc")?
            .set_default("max_upload_size_bytes", MAX_FILE_SIZE)?
            .set_default("rate_limit_per_minute", 100)?
            .set_default("rate_limit_burst", 20)?
            .set_default("auth_tokens", "")?
            .set_default("storage.backend", "memory")?
            .set_default("storage.bucket", "invoices")?
            .set_default("storage.part_size_bytes", 5 * 1024 * 1024)?
            .set_default("storage.signed_url_ttl_seconds", 3600)?
            .set_default("extraction.mode", "simulated")?
            .set_default("extraction.delay_ms", 2000)?
            .set_default("extraction.timeout_ms", 30_000)?
            .set_default("export.mode", "simulated")?
            .set_default("export.delay_ms", 1500)?
            .set_default("export.timeout_ms", 15_000)?
            .set_default("export.currency", "EUR")?
            .set_default("export.policy", "allow_resubmit")?
            .set_default("lifecycle.concurrency", "last_write_wins")?)
    }

    fn finish(settings: config::Config) -> anyhow::Result<Self> {
        let mut config: AppConfig = settings.try_deserialize()?;
        config.max_upload_size_bytes = config.max_upload_size_bytes.min(MAX_FILE_SIZE);
        Ok(config)
    }

    /// Parses `auth_tokens` into a token -> user lookup table.
    pub fn token_table(&self) -> anyhow::Result<HashMap<String, Uuid>> {
        parse_token_table(&self.auth_tokens)
    }
}

pub fn parse_token_table(raw: &str) -> anyhow::Result<HashMap<String, Uuid>> {
    let mut table = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (token, user) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("malformed auth token entry `{}`", pair))?;
        table.insert(token.trim().to_string(), Uuid::parse_str(user.trim())?);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_table_parses_pairs() {
        let user = Uuid::new_v4();
        let table = parse_token_table(&format!(" abc={} , ", user)).unwrap();
        assert_eq!(table.get("abc"), Some(&user));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn token_table_rejects_missing_separator() {
        assert!(parse_token_table("abc").is_err());
    }

    #[test]
    fn defaults_deserialize() {
        let config = AppConfig::from_defaults().unwrap();
        assert_eq!(config.storage.bucket, "invoices");
        assert_eq!(config.storage.backend, StorageBackendKind::Memory);
        assert_eq!(config.export.policy, ExportPolicy::AllowResubmit);
        assert_eq!(config.lifecycle.concurrency, ConcurrencyPolicy::LastWriteWins);
        assert_eq!(config.max_upload_size_bytes, MAX_FILE_SIZE);
    }

    #[test]
    fn empty_token_table() {
        assert!(parse_token_table("").unwrap().is_empty());
    }
}
