//! Per-project-quota plugin: resizes a named OpenStack-style service
//! quota (compute cores, volume gigabytes, ...). Unlike NFS, a resource of
//! this asset type requires a `{"service_type": "..."}` configuration blob
//! naming which quota it tracks, since one project can have many
//! independent quotas.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use castellum::{AssetLookupError, AssetManager, AssetStatusReport, AssetTypeInfo, ManagerError, Resource, ResizeOutcome};

use crate::scout::{ScoutClient, ScoutError};

pub const ASSET_TYPE: &str = "project-quota";

#[derive(Debug, Deserialize)]
struct QuotaConfig {
    service_type: String,
}

fn parse_config(config: Option<&Value>) -> Result<QuotaConfig, ManagerError> {
    if castellum::is_blank_config(config) {
        return Err(ManagerError::NoConfigurationProvided);
    }
    match config {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| ManagerError::Other(format!("invalid project-quota config: {e}"))),
        None => Err(ManagerError::NoConfigurationProvided),
    }
}

pub struct QuotaManager {
    scout: ScoutClient,
}

impl QuotaManager {
    pub fn new(scout_url: impl Into<String>) -> Self {
        QuotaManager {
            scout: ScoutClient::new(scout_url, Duration::from_secs(30)),
        }
    }
}

#[async_trait]
impl AssetManager for QuotaManager {
    fn plugin_type_id(&self) -> &'static str {
        "project-quota"
    }

    async fn init(&self) -> Result<(), ManagerError> {
        Ok(())
    }

    fn info_for_asset_type(&self, asset_type: &str) -> Option<AssetTypeInfo> {
        if asset_type == ASSET_TYPE {
            Some(AssetTypeInfo {
                asset_type: asset_type.to_string(),
                usage_metrics: vec![castellum::SINGULAR_METRIC.to_string()],
            })
        } else {
            None
        }
    }

    fn check_resource_allowed(&self, _asset_type: &str, _scope_uuid: Uuid, config: Option<&Value>, _existing: &[Resource]) -> Result<(), ManagerError> {
        parse_config(config).map(|_| ())
    }

    async fn list_assets(&self, asset_type: &str, scope_uuid: Uuid) -> Result<Vec<Uuid>, ManagerError> {
        self.scout.list_assets(asset_type, scope_uuid).await.map_err(Into::into)
    }

    async fn get_asset_status(
        &self,
        asset_type: &str,
        scope_uuid: Uuid,
        backend_uuid: Uuid,
        config: Option<&Value>,
    ) -> Result<AssetStatusReport, AssetLookupError> {
        parse_config(config).map_err(|e| AssetLookupError::Other(e.to_string()))?;
        self.scout.get_status(asset_type, scope_uuid, backend_uuid, config).await.map_err(Into::into)
    }

    async fn set_asset_size(
        &self,
        asset_type: &str,
        scope_uuid: Uuid,
        backend_uuid: Uuid,
        old_size: u64,
        new_size: u64,
        config: Option<&Value>,
    ) -> Result<ResizeOutcome, AssetLookupError> {
        if let Err(e) = parse_config(config) {
            return Ok(ResizeOutcome::Failed(e.to_string()));
        }
        match self
            .scout
            .set_size(asset_type, scope_uuid, backend_uuid, old_size, new_size, config)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(ScoutError::NotFound) => Err(AssetLookupError::NotFound),
            Err(e) => Ok(ResizeOutcome::Errored(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_service_type_configuration() {
        let manager = QuotaManager::new("http://localhost:9/quota");
        assert_eq!(
            manager.check_resource_allowed("project-quota", Uuid::nil(), None, &[]),
            Err(ManagerError::NoConfigurationProvided)
        );
        assert!(manager
            .check_resource_allowed("project-quota", Uuid::nil(), Some(&serde_json::json!({"service_type": "compute"})), &[])
            .is_ok());
    }

    #[test]
    fn rejects_malformed_configuration() {
        let manager = QuotaManager::new("http://localhost:9/quota");
        assert!(manager
            .check_resource_allowed("project-quota", Uuid::nil(), Some(&serde_json::json!({"wrong_key": 1})), &[])
            .is_err());
    }
}
