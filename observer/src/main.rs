//! The observer process: resource scrapers, asset scrapers, garbage
//! collection and the metrics cron, all running as cooperative loops over a
//! shared connection pool. Deployments must run exactly one observer —
//! asset discovery holds no cross-process lock, so a second instance could
//! double-insert assets.

mod asset_scraper;
mod http;
mod resource_scraper;

use std::sync::Arc;

use anyhow::{Context, Result};
use castellum::config::{asset_manager_ids_from_env, AppConfig};
use castellum::scheduler::{run_cron_loop, run_queued_loop, ShutdownSignal};
use castellum::yamlconfig::YamlConfig;
use castellum::{db, maintenance, metrics};
use clap::Parser;
use dotenv::dotenv;
use prometheus::Registry;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "observer")]
#[command(about = "Scrapes backends and drives the operation state machine")]
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
                .unwrap_or_else(|_| "observer=info,castellum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env().context("reading process configuration")?;
    let file_config = YamlConfig::load(&args.config).context("loading configuration file")?;
    info!(
        max_asset_size_rules = file_config.max_asset_sizes.len(),
        project_seeds = file_config.project_seeds.len(),
        "configuration file loaded"
    );

    let pool = db::connect(&config.database).await.context("connecting to database")?;

    let plugin_ids = asset_manager_ids_from_env()?;
    let registry = plugins::build_registry(&plugin_ids)?;
    registry
        .init_all()
        .await
        .map_err(|e| anyhow::anyhow!("initializing asset managers: {e}"))?;
    info!(asset_types = ?registry.asset_types().collect::<Vec<_>>(), "asset managers initialized");

    let prom = Arc::new(Registry::new());
    metrics::register_all(&prom).context("registering metrics")?;
    if let Err(err) = maintenance::refresh_metrics(&pool).await {
        warn!(error = %err, "initial metrics refresh failed");
    }

    let (signal, shutdown_rx) = ShutdownSignal::new();
    spawn_signal_handler(signal);

    let mut handles = Vec::new();

    for i in 0..config.scheduler.asset_scrape_workers {
        let pool = pool.clone();
        let registry = registry.clone();
        let interval = config.scheduler.asset_scrape_interval;
        let idle = config.scheduler.queued_loop_idle_interval;
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(run_queued_loop(format!("asset-scrape-{i}"), idle, rx, move || {
            let pool = pool.clone();
            let registry = registry.clone();
            async move { asset_scraper::scrape_one_asset(&pool, &registry, interval).await }
        })));
    }

    for i in 0..config.scheduler.resource_scrape_workers {
        let pool = pool.clone();
        let registry = registry.clone();
        let interval = config.scheduler.resource_scrape_interval;
        let idle = config.scheduler.queued_loop_idle_interval;
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(run_queued_loop(format!("resource-scrape-{i}"), idle, rx, move || {
            let pool = pool.clone();
            let registry = registry.clone();
            async move { resource_scraper::scrape_one_resource(&pool, &registry, interval).await }
        })));
    }

    {
        let pool = pool.clone();
        let retention = config.retention.finished_operation_retention;
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(run_cron_loop(
            "garbage-collect",
            config.scheduler.garbage_collect_interval,
            rx,
            move || {
                let pool = pool.clone();
                async move { maintenance::collect_garbage(&pool, retention).await }
            },
        )));
    }

    {
        let pool = pool.clone();
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(run_cron_loop(
            "metrics-refresh",
            config.scheduler.metrics_interval,
            rx,
            move || {
                let pool = pool.clone();
                async move { maintenance::refresh_metrics(&pool).await }
            },
        )));
    }

    let http_result = http::serve(&config.http.listen_address, prom, shutdown_rx.clone()).await;

    for handle in handles {
        let _ = handle.await;
    }
    info!("observer shut down");
    http_result
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
