//! Application state shared across handlers.

use std::sync::Arc;

use castellum::yamlconfig::YamlConfig;
use castellum::ManagerRegistry;
use prometheus::Registry;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub managers: ManagerRegistry,
    pub file_config: Arc<YamlConfig>,
    pub registry: Arc<Registry>,
}

impl AppState {
    pub fn new(db: PgPool, managers: ManagerRegistry, file_config: YamlConfig, registry: Arc<Registry>) -> Self {
        Self {
            db,
            managers,
            file_config: Arc::new(file_config),
            registry,
        }
    }
}
