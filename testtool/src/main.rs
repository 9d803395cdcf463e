//! Interactive tool for exercising a single backend plugin without running
//! any of the service processes: list a scope's assets, show one asset's
//! status, and trigger a resize, straight against the backend.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use castellum::config::asset_manager_ids_from_env;
use castellum::yamlconfig::YamlConfig;
use castellum::{AssetManager, ResizeOutcome};
use clap::Parser;
use dotenv::dotenv;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "test-asset-type")]
#[command(about = "Exercises one asset-manager plugin interactively")]
struct Args {
    /// Path to the operator configuration file.
    config: String,
    /// The asset type to exercise (must be served by a loaded plugin).
    asset_type: String,
    /// Optional plugin-specific configuration JSON, as a resource would
    /// carry it.
    config_json: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();
    YamlConfig::load(&args.config).context("loading configuration file")?;

    let plugin_config: Option<serde_json::Value> = match &args.config_json {
        Some(raw) => Some(serde_json::from_str(raw).context("parsing configuration JSON")?),
        None => None,
    };

    let plugin_ids = asset_manager_ids_from_env()?;
    let registry = plugins::build_registry(&plugin_ids)?;
    let Some(manager) = registry.get(&args.asset_type) else {
        bail!(
            "no loaded plugin serves asset type {:?} (loaded: {:?})",
            args.asset_type,
            registry.asset_types().collect::<Vec<_>>()
        );
    };
    manager
        .init()
        .await
        .map_err(|e| anyhow::anyhow!("initializing plugin: {e}"))?;

    let info = manager
        .info_for_asset_type(&args.asset_type)
        .ok_or_else(|| anyhow::anyhow!("plugin does not report info for asset type {:?}", args.asset_type))?;
    println!(
        "asset type {:?}, usage metrics {:?}",
        info.asset_type, info.usage_metrics
    );
    println!("commands: list <scope-uuid> | show <scope-uuid> <asset-uuid> | resize <scope-uuid> <asset-uuid> <new-size> | quit");

    repl(&args.asset_type, plugin_config.as_ref(), manager).await
}

async fn repl(asset_type: &str, config: Option<&serde_json::Value>, manager: Arc<dyn AssetManager>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["quit" | "exit"] => break,
            ["list", scope] => match parse_uuid(scope) {
                Ok(scope_uuid) => match manager.list_assets(asset_type, scope_uuid).await {
                    Ok(uuids) => {
                        println!("{} assets", uuids.len());
                        for uuid in uuids {
                            println!("  {uuid}");
                        }
                    }
                    Err(e) => println!("error: {e}"),
                },
                Err(e) => println!("error: {e}"),
            },
            ["show", scope, asset] => match (parse_uuid(scope), parse_uuid(asset)) {
                (Ok(scope_uuid), Ok(asset_uuid)) => {
                    match manager.get_asset_status(asset_type, scope_uuid, asset_uuid, config).await {
                        Ok(status) => {
                            println!("size: {}", status.size);
                            for (metric, usage) in &status.usage {
                                println!("usage[{metric}]: {usage}");
                            }
                            if let Some(min) = status.strict_minimum_size {
                                println!("strict minimum size: {min}");
                            }
                            if let Some(max) = status.strict_maximum_size {
                                println!("strict maximum size: {max}");
                            }
                        }
                        Err(e) => println!("error: {e}"),
                    }
                }
                (Err(e), _) | (_, Err(e)) => println!("error: {e}"),
            },
            ["resize", scope, asset, size] => {
                let parsed = (parse_uuid(scope), parse_uuid(asset), size.parse::<u64>());
                match parsed {
                    (Ok(scope_uuid), Ok(asset_uuid), Ok(new_size)) => {
                        // The backend wants the current size for sanity
                        // checking, so read it first like the executor does.
                        let old_size = match manager.get_asset_status(asset_type, scope_uuid, asset_uuid, config).await {
                            Ok(status) => status.size,
                            Err(e) => {
                                println!("error reading current size: {e}");
                                continue;
                            }
                        };
                        match manager
                            .set_asset_size(asset_type, scope_uuid, asset_uuid, old_size, new_size, config)
                            .await
                        {
                            Ok(ResizeOutcome::Succeeded) => println!("succeeded: {old_size} -> {new_size}"),
                            Ok(ResizeOutcome::Failed(message)) => println!("failed: {message}"),
                            Ok(ResizeOutcome::Errored(message)) => println!("errored: {message}"),
                            Err(e) => println!("error: {e}"),
                        }
                    }
                    (Err(e), _, _) | (_, Err(e), _) => println!("error: {e}"),
                    (_, _, Err(e)) => println!("error: invalid size: {e}"),
                }
            }
            _ => println!("unknown command; try list/show/resize/quit"),
        }
    }
    Ok(())
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid UUID {raw:?}"))
}
