//! The closed set of `AssetManager` implementations this deployment
//! ships: no dynamic loading, just a compiled-in registry keyed by stable
//! plugin ID, matching `CASTELLUM_ASSET_MANAGERS`.

pub mod identity;
pub mod nfs;
pub mod quota;
pub mod scout;
pub mod server_groups;

use std::sync::Arc;

use castellum::{ConfigError, ManagerRegistry};

/// Builds a [`ManagerRegistry`] from the plugin IDs named in
/// `CASTELLUM_ASSET_MANAGERS`, reading each plugin's scout URL from its own
/// `CASTELLUM_<ID>_SCOUT_URL` environment variable (uppercased, dashes
/// mapped to underscores).
pub fn build_registry(plugin_ids: &[String]) -> Result<ManagerRegistry, ConfigError> {
    let mut registry = ManagerRegistry::new();
    for id in plugin_ids {
        match id.as_str() {
            "nfs" => {
                let url = scout_url_env("nfs")?;
                registry.register(Arc::new(nfs::NfsManager::new(url)), &[nfs::ASSET_TYPE]);
            }
            "project-quota" => {
                let url = scout_url_env("project-quota")?;
                registry.register(Arc::new(quota::QuotaManager::new(url)), &[quota::ASSET_TYPE]);
            }
            "server-groups" => {
                let url = scout_url_env("server-groups")?;
                registry.register(Arc::new(server_groups::ServerGroupsManager::new(url)), &[server_groups::ASSET_TYPE]);
            }
            other => return Err(ConfigError::Invalid(format!("unknown asset manager plugin id: {other}"))),
        }
    }
    Ok(registry)
}

fn scout_url_env(plugin_id: &str) -> Result<String, ConfigError> {
    let var_name = format!("CASTELLUM_{}_SCOUT_URL", plugin_id.to_uppercase().replace('-', "_"));
    std::env::var(&var_name).map_err(|_| ConfigError::MissingEnv(var_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_plugin_id() {
        let err = build_registry(&["not-a-real-plugin".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn builds_registry_from_env() {
        std::env::set_var("CASTELLUM_NFS_SCOUT_URL", "http://localhost:9/nfs");
        let registry = build_registry(&["nfs".to_string()]).unwrap();
        assert!(registry.get(nfs::ASSET_TYPE).is_some());
        std::env::remove_var("CASTELLUM_NFS_SCOUT_URL");
    }
}
