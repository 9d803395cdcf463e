//! The `AssetManager` backend contract and the stable-ID plugin registry
//! that resolves an asset type to its manager. The plugin set is closed at
//! link time; there is no dynamic loading, just a lookup table built at
//! startup from `CASTELLUM_ASSET_MANAGERS`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AssetLookupError, ManagerError, ResizeOutcome};
use crate::models::{Resource, UsageMap};

/// Static facts about an asset type a manager exposes at startup.
#[derive(Debug, Clone)]
pub struct AssetTypeInfo {
    pub asset_type: String,
    /// The usage metric names this asset type reports. Single-value backends
    /// report `["singular"]`; server groups report `["cpu", "ram"]`.
    pub usage_metrics: Vec<String>,
}

/// A point-in-time read of a single asset from its backend.
#[derive(Debug, Clone)]
pub struct AssetStatusReport {
    pub size: u64,
    pub usage: UsageMap,
    pub strict_minimum_size: Option<u64>,
    pub strict_maximum_size: Option<u64>,
}

/// The backend-plugin contract every asset type implements. Methods are
/// async because real plugins talk to remote services (Manila, Cinder,
/// Nova, ...) over the network. All calls happen off the transactional
/// path; the caller never holds a database transaction across them.
#[async_trait]
pub trait AssetManager: Send + Sync {
    /// Stable string identifier used as the registry key.
    fn plugin_type_id(&self) -> &'static str;

    /// One-time setup (e.g. opening a client), called once per process at
    /// startup before any other method.
    async fn init(&self) -> Result<(), ManagerError>;

    /// Static capability info for a given asset type served by this plugin,
    /// or `None` if the plugin does not serve it. A plugin may serve more
    /// than one related asset type (e.g. a quota plugin serving one asset
    /// type per OpenStack service).
    fn info_for_asset_type(&self, asset_type: &str) -> Option<AssetTypeInfo>;

    /// Validates a resource's `config_json` against this asset type's
    /// configuration rules, returning `NoConfigurationAllowed` /
    /// `NoConfigurationProvided` for the two well-known sentinel cases.
    /// `existing` holds the scope's other resources so a plugin can refuse
    /// combinations that conflict across asset types.
    fn check_resource_allowed(
        &self,
        asset_type: &str,
        scope_uuid: Uuid,
        config: Option<&Value>,
        existing: &[Resource],
    ) -> Result<(), ManagerError>;

    /// Enumerates backend UUIDs currently present in scope for this asset
    /// type.
    async fn list_assets(&self, asset_type: &str, scope_uuid: Uuid) -> Result<Vec<Uuid>, ManagerError>;

    /// Reads current size/usage for one asset. Returns
    /// `AssetLookupError::NotFound` when the backend object has disappeared.
    async fn get_asset_status(
        &self,
        asset_type: &str,
        scope_uuid: Uuid,
        backend_uuid: Uuid,
        config: Option<&Value>,
    ) -> Result<AssetStatusReport, AssetLookupError>;

    /// Executes a resize. The returned `ResizeOutcome` distinguishes
    /// user-caused failure from infrastructure error; `Err(NotFound)` means
    /// the asset vanished and the caller should delete its row. The caller
    /// never retries `Errored` automatically; it surfaces the message and
    /// waits for the next schedule.
    async fn set_asset_size(
        &self,
        asset_type: &str,
        scope_uuid: Uuid,
        backend_uuid: Uuid,
        old_size: u64,
        new_size: u64,
        config: Option<&Value>,
    ) -> Result<ResizeOutcome, AssetLookupError>;
}

/// `null` and `{}` both count as "no configuration provided" — the API may
/// persist either depending on whether a request omitted the field
/// entirely or sent an empty object, and plugins should not have to care.
pub fn is_blank_config(config: Option<&Value>) -> bool {
    match config {
        None => true,
        Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

/// Bridges the stored `resources.config_json` column (always a concrete
/// `Value`, defaulting to an empty object) to the `Option<&Value>` shape
/// `AssetManager` methods expect.
pub fn resource_config_arg(resource: &crate::models::Resource) -> Option<&Value> {
    if is_blank_config(Some(&resource.config_json)) {
        None
    } else {
        Some(&resource.config_json)
    }
}

/// Registry mapping asset type string to the plugin instance that serves it.
/// Built once at startup from the process's compiled-in plugin list.
#[derive(Clone, Default)]
pub struct ManagerRegistry {
    by_asset_type: BTreeMap<String, Arc<dyn AssetManager>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `manager` for every asset type it reports supporting.
    /// Later registrations for the same asset type replace earlier ones.
    pub fn register(&mut self, manager: Arc<dyn AssetManager>, asset_types: &[&str]) {
        for asset_type in asset_types {
            self.by_asset_type.insert((*asset_type).to_string(), manager.clone());
        }
    }

    pub fn get(&self, asset_type: &str) -> Option<Arc<dyn AssetManager>> {
        self.by_asset_type.get(asset_type).cloned()
    }

    pub fn asset_types(&self) -> impl Iterator<Item = &str> {
        self.by_asset_type.keys().map(|s| s.as_str())
    }

    /// Calls `init` on every distinct registered plugin instance.
    pub async fn init_all(&self) -> Result<(), ManagerError> {
        let mut seen: Vec<*const dyn AssetManager> = Vec::new();
        for manager in self.by_asset_type.values() {
            let ptr = Arc::as_ptr(manager);
            if seen.contains(&ptr) {
                continue;
            }
            seen.push(ptr);
            manager.init().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerRegistry")
            .field("asset_types", &self.by_asset_type.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubManager;

    #[async_trait]
    impl AssetManager for StubManager {
        fn plugin_type_id(&self) -> &'static str {
            "stub"
        }

        async fn init(&self) -> Result<(), ManagerError> {
            Ok(())
        }

        fn info_for_asset_type(&self, asset_type: &str) -> Option<AssetTypeInfo> {
            Some(AssetTypeInfo {
                asset_type: asset_type.to_string(),
                usage_metrics: vec!["singular".to_string()],
            })
        }

        fn check_resource_allowed(
            &self,
            _asset_type: &str,
            _scope_uuid: Uuid,
            config: Option<&Value>,
            _existing: &[Resource],
        ) -> Result<(), ManagerError> {
            if config.is_some() {
                return Err(ManagerError::NoConfigurationAllowed);
            }
            Ok(())
        }

        async fn list_assets(&self, _asset_type: &str, _scope_uuid: Uuid) -> Result<Vec<Uuid>, ManagerError> {
            Ok(vec![])
        }

        async fn get_asset_status(
            &self,
            _asset_type: &str,
            _scope_uuid: Uuid,
            _backend_uuid: Uuid,
            _config: Option<&Value>,
        ) -> Result<AssetStatusReport, AssetLookupError> {
            Err(AssetLookupError::NotFound)
        }

        async fn set_asset_size(
            &self,
            _asset_type: &str,
            _scope_uuid: Uuid,
            _backend_uuid: Uuid,
            _old_size: u64,
            _new_size: u64,
            _config: Option<&Value>,
        ) -> Result<ResizeOutcome, AssetLookupError> {
            Ok(ResizeOutcome::Succeeded)
        }
    }

    #[test]
    fn registry_resolves_by_asset_type() {
        let mut registry = ManagerRegistry::new();
        registry.register(Arc::new(StubManager), &["nfs", "cephfs"]);
        assert!(registry.get("nfs").is_some());
        assert!(registry.get("cephfs").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn check_resource_allowed_rejects_unexpected_config() {
        let manager = StubManager;
        let err = manager
            .check_resource_allowed("nfs", Uuid::nil(), Some(&serde_json::json!({"a": 1})), &[])
            .unwrap_err();
        assert_eq!(err, ManagerError::NoConfigurationAllowed);
    }

    #[tokio::test]
    async fn init_all_visits_each_instance_once() {
        let mut registry = ManagerRegistry::new();
        registry.register(Arc::new(StubManager), &["nfs", "cephfs"]);
        registry.init_all().await.unwrap();
    }
}
