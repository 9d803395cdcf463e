//! Standalone seed application: reads the configuration file's
//! `project_seeds` and reconciles the resource table against them, exactly
//! as the API does at startup. Useful for applying configuration changes
//! without restarting the API, and as a `--check` lint for the file itself.

use anyhow::{Context, Result};
use castellum::config::DatabaseConfig;
use castellum::yamlconfig::YamlConfig;
use castellum::{db, seed};
use clap::Parser;
use dotenv::dotenv;
use plugins::identity::IdentityClient;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "seeder")]
#[command(about = "Applies the configuration file's project seeds")]
struct Args {
    /// Path to the operator configuration file.
    config: String,

    /// Validate the configuration file and exit without touching the
    /// database.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seeder=info,castellum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = YamlConfig::load(&args.config).context("loading configuration file")?;
    info!(
        max_asset_size_rules = config.max_asset_sizes.len(),
        project_seeds = config.project_seeds.len(),
        "configuration file loaded"
    );

    if args.check {
        info!("configuration file is valid");
        return Ok(());
    }

    let database = DatabaseConfig::from_env()?;
    let pool = db::connect(&database).await.context("connecting to database")?;
    db::run_migrations(&pool).await.context("running migrations")?;

    let resolver = IdentityClient::from_env().context("resolving seeds requires an identity service")?;
    let report = seed::apply_seeds(&pool, &resolver, &config)
        .await
        .context("applying project seeds")?;

    info!(
        created = report.resources_created,
        updated = report.resources_updated,
        skipped_disabled = report.resources_skipped_disabled,
        invalid = report.resources_invalid,
        unresolved_projects = report.projects_unresolved,
        "seed application finished"
    );
    Ok(())
}
