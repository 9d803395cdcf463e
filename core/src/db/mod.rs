//! The persistence layer: raw parameterized `sqlx::query`/`query_as`
//! against Postgres, one submodule per table family. Queries build without
//! a reachable database, so no compile-time checked macros.

pub mod assets;
pub mod operations;
pub mod resources;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;
use crate::error::StoreError;

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .map_err(StoreError::Sql)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("../migrations").run(pool).await.map_err(|e| StoreError::Invariant(e.to_string()))
}
