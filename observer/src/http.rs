//! The observer's minimal HTTP surface: `/metrics` for Prometheus and
//! `/healthcheck` for the deployment's liveness probe.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use castellum::metrics::gather_metrics;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::info;

pub async fn serve(listen_address: &str, registry: Arc<Registry>, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics_endpoint))
        .with_state(registry);

    let listener = tokio::net::TcpListener::bind(listen_address).await?;
    info!(address = listen_address, "metrics endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

async fn healthcheck() -> &'static str {
    "ok"
}

async fn metrics_endpoint(State(registry): State<Arc<Registry>>) -> String {
    gather_metrics(&registry)
}
