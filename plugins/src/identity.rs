//! Client for the identity service that maps `(project_name, domain_name)`
//! pairs to the scope UUIDs everything else keys on. Lookups are cached in a
//! read-only per-process map behind a read-write lock; names never change
//! meaning within a process lifetime, so the cache is never invalidated.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use castellum::seed::ScopeResolver;
use castellum::ConfigError;

pub struct IdentityClient {
    base_url: String,
    client: reqwest::Client,
    cache: RwLock<HashMap<(String, String), Uuid>>,
}

impl IdentityClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        IdentityClient {
            base_url: base_url.into(),
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("CASTELLUM_IDENTITY_URL")
            .map_err(|_| ConfigError::MissingEnv("CASTELLUM_IDENTITY_URL".to_string()))?;
        Ok(Self::new(url))
    }
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    uuid: Uuid,
}

#[async_trait]
impl ScopeResolver for IdentityClient {
    async fn resolve(&self, project_name: &str, domain_name: &str) -> Result<Uuid, ConfigError> {
        let key = (project_name.to_string(), domain_name.to_string());
        if let Ok(cache) = self.cache.read() {
            if let Some(uuid) = cache.get(&key) {
                return Ok(*uuid);
            }
        }

        let url = format!("{}/projects", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("name", project_name), ("domain", domain_name)])
            .send()
            .await
            .map_err(|e| ConfigError::Invalid(format!("identity lookup failed: {e}")))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ConfigError::Invalid(format!(
                "no such project: {project_name}@{domain_name}"
            )));
        }
        let body: ProjectResponse = resp
            .error_for_status()
            .map_err(|e| ConfigError::Invalid(format!("identity lookup failed: {e}")))?
            .json()
            .await
            .map_err(|e| ConfigError::Invalid(format!("malformed identity response: {e}")))?;

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, body.uuid);
        }
        Ok(body.uuid)
    }
}
