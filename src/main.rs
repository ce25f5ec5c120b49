use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use devicegate::{build_router, config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------
    // Logging
    // -----------------------------
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // -----------------------------
    // Config / shared state
    // -----------------------------
    let config = AppConfig::from_env()?;
    let addr = config.bind_addr.clone();
    info!(
        db = %config.db_path.display(),
        payloads = %config.payload_dir.display(),
        legacy_fallback = config.allow_legacy_fallback,
        "starting device gateway"
    );

    let state = AppState::open(config).await?;
    let app = build_router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("HTTP listening on http://{addr}");
    info!("Agent bridge at http://{addr}/mcp");

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
