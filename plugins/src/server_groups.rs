//! Compute server-groups plugin. Unlike NFS/quota, resizing a server
//! group is asynchronous at the backend: the scout accepts a resize
//! request and then reports progress per member server, so this plugin
//! polls until the group settles or the phase budget runs out (3 min for
//! deletions, 5 min for creations, 10 s poll interval), in which case it
//! yields `errored` with a sorted list of per-server reasons.
//!
//! Two usage metrics apply here (`cpu`, `ram`) rather than the single
//! `singular` metric NFS/quota use.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use castellum::scheduler::ExponentialBackoff;
use castellum::{AssetLookupError, AssetManager, AssetStatusReport, AssetTypeInfo, ManagerError, Resource, ResizeOutcome, UsageMap};

pub const ASSET_TYPE: &str = "server-group";

const DELETE_PHASE_TIMEOUT: Duration = Duration::from_secs(3 * 60);
const CREATE_PHASE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct StatusResponse {
    size: u64,
    #[serde(default)]
    usage: UsageMap,
    in_progress: bool,
    #[serde(default)]
    per_server: Vec<ServerState>,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerState {
    server_id: String,
    #[serde(default)]
    reason: Option<String>,
}

pub struct ServerGroupsManager {
    base_url: String,
    client: reqwest::Client,
}

impl ServerGroupsManager {
    pub fn new(scout_url: impl Into<String>) -> Self {
        ServerGroupsManager {
            base_url: scout_url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn fetch_status(&self, scope_uuid: Uuid, backend_uuid: Uuid) -> Result<StatusResponse, String> {
        let url = format!("{}/groups/{backend_uuid}/status", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("scope_uuid", scope_uuid.to_string())])
            .timeout(POLL_INTERVAL)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err("not_found".to_string());
        }
        resp.error_for_status()
            .map_err(|e| e.to_string())?
            .json::<StatusResponse>()
            .await
            .map_err(|e| e.to_string())
    }

    async fn request_resize(&self, scope_uuid: Uuid, backend_uuid: Uuid, new_size: u64) -> Result<(), String> {
        let url = format!("{}/groups/{backend_uuid}/resize", self.base_url);
        let resp = self
            .client
            .post(&url)
            .query(&[("scope_uuid", scope_uuid.to_string())])
            .json(&serde_json::json!({ "new_size": new_size }))
            .timeout(POLL_INTERVAL)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err("not_found".to_string());
        }
        resp.error_for_status().map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Polls group status until it settles or `budget` elapses, retrying
    /// transient polling failures with backoff rather than failing the
    /// whole phase on one flaky request.
    async fn poll_until_settled(&self, scope_uuid: Uuid, backend_uuid: Uuid, target_size: u64, budget: Duration) -> ResizeOutcome {
        let deadline = Instant::now() + budget;
        let mut backoff = ExponentialBackoff::new(1, 10);

        loop {
            match self.fetch_status(scope_uuid, backend_uuid).await {
                Ok(status) => {
                    backoff.on_success();
                    if !status.in_progress {
                        return if status.size == target_size {
                            ResizeOutcome::Succeeded
                        } else {
                            ResizeOutcome::Failed(format!(
                                "server group settled at size {} instead of requested {target_size}",
                                status.size
                            ))
                        };
                    }
                    if Instant::now() >= deadline {
                        return ResizeOutcome::Errored(timeout_message(&status.per_server));
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(message) => {
                    warn!(%backend_uuid, error = %message, "server-groups: poll attempt failed");
                    if Instant::now() >= deadline {
                        return ResizeOutcome::Errored(format!("polling timed out: {message}"));
                    }
                    tokio::time::sleep(backoff.on_failure()).await;
                }
            }
        }
    }
}

fn timeout_message(per_server: &[ServerState]) -> String {
    let mut entries: Vec<(&str, &str)> = per_server
        .iter()
        .map(|s| (s.server_id.as_str(), s.reason.as_deref().unwrap_or("no reason reported")))
        .collect();
    entries.sort_by_key(|(id, _)| *id);
    let joined = entries
        .iter()
        .map(|(id, reason)| format!("{id}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ");
    format!("timed out waiting for server group to settle: {joined}")
}

#[async_trait]
impl AssetManager for ServerGroupsManager {
    fn plugin_type_id(&self) -> &'static str {
        "server-groups"
    }

    async fn init(&self) -> Result<(), ManagerError> {
        Ok(())
    }

    fn info_for_asset_type(&self, asset_type: &str) -> Option<AssetTypeInfo> {
        if asset_type == ASSET_TYPE {
            Some(AssetTypeInfo {
                asset_type: asset_type.to_string(),
                usage_metrics: vec!["cpu".to_string(), "ram".to_string()],
            })
        } else {
            None
        }
    }

    fn check_resource_allowed(&self, _asset_type: &str, _scope_uuid: Uuid, config: Option<&Value>, _existing: &[Resource]) -> Result<(), ManagerError> {
        if castellum::is_blank_config(config) {
            return Err(ManagerError::NoConfigurationProvided);
        }
        match config.and_then(|v| v.get("flavor_ref")) {
            Some(Value::String(_)) => Ok(()),
            _ => Err(ManagerError::Other("flavor_ref must be a string".into())),
        }
    }

    async fn list_assets(&self, _asset_type: &str, scope_uuid: Uuid) -> Result<Vec<Uuid>, ManagerError> {
        let url = format!("{}/groups", self.base_url);
        #[derive(Deserialize)]
        struct ListResponse {
            group_uuids: Vec<Uuid>,
        }
        let resp = self
            .client
            .get(&url)
            .query(&[("scope_uuid", scope_uuid.to_string())])
            .send()
            .await
            .map_err(|e| ManagerError::Other(e.to_string()))?;
        let body: ListResponse = resp
            .error_for_status()
            .map_err(|e| ManagerError::Other(e.to_string()))?
            .json()
            .await
            .map_err(|e| ManagerError::Other(e.to_string()))?;
        Ok(body.group_uuids)
    }

    async fn get_asset_status(
        &self,
        _asset_type: &str,
        scope_uuid: Uuid,
        backend_uuid: Uuid,
        _config: Option<&Value>,
    ) -> Result<AssetStatusReport, AssetLookupError> {
        let status = self.fetch_status(scope_uuid, backend_uuid).await.map_err(|e| {
            if e == "not_found" {
                AssetLookupError::NotFound
            } else {
                AssetLookupError::Other(e)
            }
        })?;
        Ok(AssetStatusReport {
            size: status.size,
            usage: status.usage,
            strict_minimum_size: None,
            strict_maximum_size: None,
        })
    }

    async fn set_asset_size(
        &self,
        _asset_type: &str,
        scope_uuid: Uuid,
        backend_uuid: Uuid,
        old_size: u64,
        new_size: u64,
        _config: Option<&Value>,
    ) -> Result<ResizeOutcome, AssetLookupError> {
        if let Err(e) = self.request_resize(scope_uuid, backend_uuid, new_size).await {
            if e == "not_found" {
                return Err(AssetLookupError::NotFound);
            }
            return Ok(ResizeOutcome::Errored(e));
        }
        // Shrinking deletes members, growing boots new ones; each phase has
        // its own budget.
        let budget = if new_size < old_size { DELETE_PHASE_TIMEOUT } else { CREATE_PHASE_TIMEOUT };
        Ok(self.poll_until_settled(scope_uuid, backend_uuid, new_size, budget).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_is_sorted_by_server_id() {
        let servers = vec![
            ServerState { server_id: "srv-b".into(), reason: Some("boot failed".into()) },
            ServerState { server_id: "srv-a".into(), reason: None },
        ];
        let message = timeout_message(&servers);
        assert!(message.find("srv-a").unwrap() < message.find("srv-b").unwrap());
        assert!(message.contains("no reason reported"));
        assert!(message.contains("boot failed"));
    }

    #[test]
    fn requires_flavor_ref_configuration() {
        let manager = ServerGroupsManager::new("http://localhost:9/server-groups");
        assert_eq!(
            manager.check_resource_allowed("server-group", Uuid::nil(), None, &[]),
            Err(ManagerError::NoConfigurationProvided)
        );
        assert!(manager
            .check_resource_allowed("server-group", Uuid::nil(), Some(&serde_json::json!({"flavor_ref": "m1.small"})), &[])
            .is_ok());
    }
}
