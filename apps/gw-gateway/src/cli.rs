//! Process bootstrap (CLI/env parsing, storage connect, in-memory state
//! construction). Grounded on
//! `gproxy-core/src/bootstrap/mod.rs::{CliArgs,bootstrap}` — same
//! CLI>ENV precedence via `clap`'s `env` attribute, same sqlite-DSN
//! sanitization helpers, merged onto `gw_common::config::GlobalConfig`
//! instead of the teacher's DB-persisted admin-editable config (this
//! spec has no admin CRUD surface to edit it from, see DESIGN.md).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gw_breaker::{CircuitBreaker, CircuitBreakerConfig};
use gw_common::config::{GlobalConfig, GlobalConfigPatch};
use gw_core::auth::StorageAuth;
use gw_core::pipeline::PipelineDeps;
use gw_limits::{InProcessRedisFacade, LiveRedisFacade, RateLimitGuard, RedisFacade, SessionTracker};
use gw_provider_core::model::ProviderConfig;
use gw_provider_core::provider::Provider;
use gw_rules::error_rule::ErrorRuleCache;
use gw_rules::request_filter::RequestFilterCache;
use gw_storage::GatewayStorage;

use crate::http_provider::HttpProvider;

#[derive(Debug, Clone, Parser)]
#[command(name = "gw-gateway", version, about = "Multi-tenant LLM API gateway")]
pub struct CliArgs {
    /// Database DSN (sqlite/postgres/mysql; defaults to a local sqlite file).
    #[arg(long, env = "GW_DSN")]
    pub dsn: Option<String>,

    /// Bind host.
    #[arg(long, env = "GW_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "GW_PORT")]
    pub port: Option<u16>,

    /// `REDIS_URL` from spec.md §6.4; absence degrades L3-L6 to the
    /// in-process fail-open facade.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "ENABLE_RATE_LIMIT")]
    pub enable_rate_limit: Option<bool>,

    #[arg(long, env = "CLIENT_VERSION_GA_THRESHOLD")]
    pub client_version_ga_threshold: Option<u8>,

    /// Deadline for a single provider dispatch attempt, in seconds.
    #[arg(long, env = "GW_PROVIDER_TIMEOUT_SECS", default_value = "120")]
    pub provider_timeout_secs: u64,
}

pub struct Bootstrap {
    pub storage: Arc<GatewayStorage>,
    pub deps: PipelineDeps,
    pub error_rules: Arc<ErrorRuleCache>,
    pub global: GlobalConfig,
    pub resolve: Arc<dyn Fn(&ProviderConfig) -> Arc<dyn Provider> + Send + Sync>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    bootstrap(CliArgs::parse()).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let dsn = sanitize_dsn_value(args.dsn.clone());
    ensure_sqlite_parent_dir(&dsn)?;

    let patch = GlobalConfigPatch {
        host: sanitize_optional_env_value(args.host.clone()),
        port: args.port,
        dsn: Some(dsn.clone()),
        tz: None,
        tz_offset_hours: None,
        redis_url: sanitize_optional_env_value(args.redis_url.clone()),
        enable_rate_limit: args.enable_rate_limit,
        client_version_ga_threshold: args.client_version_ga_threshold,
        admin_token_hash: None,
        event_redact_sensitive: None,
    };
    let global = patch.into_config()?;

    let storage = Arc::new(GatewayStorage::connect(&dsn).await?);
    storage.sync().await?;

    let redis: Arc<dyn RedisFacade> = match global.redis_url.as_deref() {
        Some(url) => Arc::new(LiveRedisFacade::connect(url).await?),
        None => {
            tracing::warn!(event = "redis_not_configured", "falling back to the in-process rate-limit/breaker facade");
            Arc::new(InProcessRedisFacade::default())
        }
    };

    let sessions = Arc::new(SessionTracker::new(redis.clone()));
    let rate_limiter = Arc::new(RateLimitGuard::new(redis.clone(), sessions.clone()));

    let providers = storage.list_enabled_providers().await?;
    let breaker_configs: HashMap<_, _> = providers
        .iter()
        .map(|provider| (provider.id, CircuitBreakerConfig::default()))
        .collect();
    let breaker = Arc::new(CircuitBreaker::new(breaker_configs, redis.clone()));
    breaker.preload().await;

    let error_rules = Arc::new(ErrorRuleCache::new(&storage.list_error_rules().await?));
    let request_filters = Arc::new(RequestFilterCache::new(storage.list_request_filters().await?));

    let auth = Arc::new(StorageAuth::new(storage.clone()));

    let deps = PipelineDeps {
        storage: storage.clone(),
        auth,
        rate_limiter,
        sessions,
        breaker,
        request_filters,
        redis,
        provider_timeout: Duration::from_secs(args.provider_timeout_secs),
        enable_rate_limit: global.enable_rate_limit,
    };

    let http_client = wreq::Client::builder().build()?;
    let resolve = Arc::new(move |config: &ProviderConfig| {
        Arc::new(HttpProvider::new(http_client.clone(), config.clone())) as Arc<dyn Provider>
    });

    Ok(Bootstrap { storage, deps, error_rules, global, resolve })
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn sanitize_dsn_value(value: Option<String>) -> String {
    sanitize_optional_env_value(value).unwrap_or_else(default_dsn)
}

fn default_dsn() -> String {
    if let Some(data_dir) = sanitize_optional_env_value(std::env::var("GW_DATA_DIR").ok()) {
        let dir = data_dir.trim_end_matches('/');
        return format!("sqlite://{dir}/gw-gateway.db?mode=rwc");
    }
    "sqlite://gw-gateway.db?mode=rwc".to_string()
}

fn ensure_sqlite_parent_dir(dsn: &str) -> anyhow::Result<()> {
    let Some(db_path) = sqlite_file_path_from_dsn(dsn) else {
        return Ok(());
    };
    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent)?;
    Ok(())
}

fn sqlite_file_path_from_dsn(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let path_part = rest.split(['?', '#']).next()?.trim();
    if path_part.is_empty() {
        return None;
    }
    let mut normalized = path_part;
    if let Some(stripped) = normalized.strip_prefix("//") {
        normalized = stripped;
    }
    if normalized.eq_ignore_ascii_case(":memory:") {
        return None;
    }
    Some(PathBuf::from(normalized))
}

#[cfg(test)]
mod tests {
    use super::sqlite_file_path_from_dsn;

    #[test]
    fn sqlite_dsn_resolves_relative_path() {
        let path = sqlite_file_path_from_dsn("sqlite://gw-gateway.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "gw-gateway.db");
    }

    #[test]
    fn sqlite_memory_dsn_is_ignored() {
        assert!(sqlite_file_path_from_dsn("sqlite::memory:").is_none());
        assert!(sqlite_file_path_from_dsn("sqlite://:memory:").is_none());
    }
}
