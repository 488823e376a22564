use anyhow::Result;
use memory_ledger_consolidation::service::DEFAULT_ADDR;
use memory_ledger_consolidation::{router, AppState, ChunkingConfig, ConsolidationConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Memory Ledger Consolidation Service v{}", env!("CARGO_PKG_VERSION"));

    let config = ConsolidationConfig::from_env();
    info!(
        "Thresholds: match {:.2}, auto-merge {:.2}, max evidence {}",
        config.similarity_threshold, config.auto_merge_threshold, config.max_evidence
    );

    let state = AppState::new(config, ChunkingConfig::from_env());
    let app = router(state);

    let addr = std::env::var("CONSOLIDATION_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
