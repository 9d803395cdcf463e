//! Network-file-share plugin: a single size/usage metric, no
//! plugin-specific resource configuration. The share service itself
//! (Manila or similar) sits behind a scout endpoint that knows how to
//! list, inspect and resize shares.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use castellum::{AssetLookupError, AssetManager, AssetStatusReport, AssetTypeInfo, ManagerError, Resource, ResizeOutcome};

use crate::scout::{ScoutClient, ScoutError};

pub const ASSET_TYPE: &str = "nfs";

pub struct NfsManager {
    scout: ScoutClient,
}

impl NfsManager {
    pub fn new(scout_url: impl Into<String>) -> Self {
        NfsManager {
            scout: ScoutClient::new(scout_url, Duration::from_secs(30)),
        }
    }
}

#[async_trait]
impl AssetManager for NfsManager {
    fn plugin_type_id(&self) -> &'static str {
        "nfs"
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
        if castellum::is_blank_config(config) {
            Ok(())
        } else {
            Err(ManagerError::NoConfigurationAllowed)
        }
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
    fn info_for_asset_type_only_matches_nfs() {
        let manager = NfsManager::new("http://localhost:9/nfs");
        assert!(manager.info_for_asset_type("nfs").is_some());
        assert!(manager.info_for_asset_type("project-quota").is_none());
    }

    #[test]
    fn rejects_any_configuration() {
        let manager = NfsManager::new("http://localhost:9/nfs");
        assert!(manager.check_resource_allowed("nfs", Uuid::nil(), None, &[]).is_ok());
        assert_eq!(
            manager.check_resource_allowed("nfs", Uuid::nil(), Some(&serde_json::json!({"x": 1})), &[]),
            Err(ManagerError::NoConfigurationAllowed)
        );
    }
}
