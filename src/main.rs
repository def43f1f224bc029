mod api;
mod automation;
mod config;
mod encoding;
mod error;
mod forge;
// Runs inside the host application; the server never calls it.
#[allow(dead_code)]
mod plugin;
mod relay;
mod storage;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::AppState;
use config::Settings;

/// Largest accepted request body (input models are uploaded through the bridge)
const MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

#[tokio::main]
async fn main() -> error::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "da_bridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env().inspect_err(|e| tracing::error!("{}", e))?;
    let addr = settings.bind_addr;

    let state = Arc::new(AppState::new(settings)?);

    let bundles = state.registry.bundles();
    match bundles.list().await {
        Ok(names) if names.is_empty() => {
            tracing::warn!("No app bundle packages found in {:?}", bundles.base_path())
        }
        Ok(names) => tracing::info!("Found {} app bundle packages: {}", names.len(), names.join(", ")),
        Err(e) => tracing::warn!("Could not list app bundle packages: {}", e),
    }

    let app = api::router()
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http());

    tracing::info!("Design Automation bridge starting on http://{}", addr);
    tracing::info!("  Client:   {}", state.settings.nickname);
    tracing::info!("  Webhook:  {}", state.settings.webhook_url);
    tracing::info!("  Region:   {}", state.settings.da_region);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
