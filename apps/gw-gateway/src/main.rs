use std::sync::Arc;

use gw_core::pipeline::PipelineDeps;
use gw_provider_core::model::ProviderConfig;
use gw_provider_core::provider::Provider;
use gw_rules::error_rule::ErrorRuleCache;

mod cli;
mod http_provider;
mod routes;

#[derive(Clone)]
pub struct AppState {
    deps: Arc<PipelineDeps>,
    error_rules: Arc<ErrorRuleCache>,
    resolve: Arc<dyn Fn(&ProviderConfig) -> Arc<dyn Provider> + Send + Sync>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let boot = cli::bootstrap_from_env().await?;

    let state = AppState {
        deps: Arc::new(boot.deps),
        error_rules: boot.error_rules,
        resolve: boot.resolve,
    };

    let bind = format!("{}:{}", boot.global.host, boot.global.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(event = "listening", %bind);

    axum::serve(listener, routes::router(state)).await?;
    Ok(())
}
