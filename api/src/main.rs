//! The API process: resource configuration, asset and operation listing,
//! and the operation greenlight, plus `/metrics` and `/healthcheck`. Also
//! applies the configuration file's project seeds at startup so seeded
//! resources exist before the first request arrives.

mod error;
mod handlers;
mod models;
mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::MatchedPath;
use axum::{middleware, Router};
use castellum::config::{asset_manager_ids_from_env, AppConfig};
use castellum::scheduler::ShutdownSignal;
use castellum::yamlconfig::YamlConfig;
use castellum::{db, maintenance, metrics, seed};
use clap::Parser;
use dotenv::dotenv;
use plugins::identity::IdentityClient;
use prometheus::Registry;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::state::AppState;

/// How long in-flight requests may drain after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "api")]
#[command(about = "Serves the resource configuration and observation API")]
struct Args {
    /// Path to the operator configuration file.
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api=info,castellum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env().context("reading process configuration")?;
    let file_config = YamlConfig::load(&args.config).context("loading configuration file")?;

    let pool = db::connect(&config.database).await.context("connecting to database")?;
    db::run_migrations(&pool).await.context("running migrations")?;
    info!("database connected and migrations applied");

    let plugin_ids = asset_manager_ids_from_env()?;
    let managers = plugins::build_registry(&plugin_ids)?;
    managers
        .init_all()
        .await
        .map_err(|e| anyhow::anyhow!("initializing asset managers: {e}"))?;
    info!(asset_types = ?managers.asset_types().collect::<Vec<_>>(), "asset managers initialized");

    if !file_config.project_seeds.is_empty() {
        let resolver = IdentityClient::from_env().context("project seeds require an identity service")?;
        let report = seed::apply_seeds(&pool, &resolver, &file_config)
            .await
            .context("applying project seeds")?;
        info!(
            created = report.resources_created,
            updated = report.resources_updated,
            skipped_disabled = report.resources_skipped_disabled,
            invalid = report.resources_invalid,
            unresolved_projects = report.projects_unresolved,
            "project seeds applied"
        );
    }

    let prom = Arc::new(Registry::new());
    metrics::register_all(&prom).context("registering metrics")?;
    if let Err(err) = maintenance::refresh_metrics(&pool).await {
        warn!(error = %err, "initial metrics refresh failed");
    }

    let state = AppState::new(pool, managers, file_config, prom);

    let app = Router::new()
        .merge(routes::resource_routes())
        .merge(routes::health_routes())
        .fallback(handlers::route_not_found)
        .layer(middleware::from_fn(track_request_metrics))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let (signal, shutdown_rx) = ShutdownSignal::new();
    spawn_signal_handler(signal);

    let listener = tokio::net::TcpListener::bind(&config.http.listen_address)
        .await
        .with_context(|| format!("binding {}", config.http.listen_address))?;
    info!(address = %config.http.listen_address, "API listening");

    let mut drain_rx = shutdown_rx.clone();
    let mut server_rx = shutdown_rx;
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_rx.changed().await;
            })
            .await
    });

    tokio::select! {
        result = &mut server => result??,
        _ = async {
            let _ = drain_rx.changed().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            warn!("shutdown grace period elapsed, aborting remaining requests");
            server.abort();
        }
    }
    info!("api shut down");
    Ok(())
}

async fn track_request_metrics(
    req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = std::time::Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    metrics::HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path])
        .observe(start.elapsed().as_secs_f64());
    response
}

fn spawn_signal_handler(signal: ShutdownSignal) {
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("received shutdown signal");
        signal.trigger();
    });
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
    }
}
