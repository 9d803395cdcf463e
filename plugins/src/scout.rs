//! A small HTTP client shared by every plugin for talking to its
//! backend's "scout" service: the thing that actually knows how to list,
//! inspect and resize a concrete backend asset. A typed `reqwest::Client`
//! wrapper with its own error enum and per-call timeout.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use castellum::{AssetLookupError, AssetStatusReport, ManagerError, ResizeOutcome, UsageMap};

#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("scout request failed: {0}")]
    Request(String),
    #[error("scout returned malformed response: {0}")]
    MalformedResponse(String),
    #[error("scout reported asset not found")]
    NotFound,
}

impl From<ScoutError> for ManagerError {
    fn from(e: ScoutError) -> Self {
        ManagerError::Other(e.to_string())
    }
}

impl From<ScoutError> for AssetLookupError {
    fn from(e: ScoutError) -> Self {
        match e {
            ScoutError::NotFound => AssetLookupError::NotFound,
            other => AssetLookupError::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ListAssetsQuery<'a> {
    scope_uuid: Uuid,
    asset_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct ListAssetsResponse {
    asset_uuids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
struct StatusQuery<'a> {
    scope_uuid: Uuid,
    asset_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<&'a serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    size: u64,
    #[serde(default)]
    usage: UsageMap,
    strict_minimum_size: Option<u64>,
    strict_maximum_size: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ResizeRequest<'a> {
    scope_uuid: Uuid,
    asset_type: &'a str,
    old_size: u64,
    new_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<&'a serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ResizeOutcomeWire {
    Succeeded,
    Failed,
    Errored,
}

#[derive(Debug, Deserialize)]
struct ResizeResponse {
    outcome: ResizeOutcomeWire,
    error: Option<String>,
}

/// A thin client against one backend's scout endpoint. One instance per
/// plugin, constructed from the plugin's `<PLUGIN>_SCOUT_URL` env var.
pub struct ScoutClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl ScoutClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::ClientBuilder::new()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        ScoutClient {
            base_url: base_url.into(),
            client,
            timeout,
        }
    }

    pub async fn list_assets(&self, asset_type: &str, scope_uuid: Uuid) -> Result<Vec<Uuid>, ScoutError> {
        let url = format!("{}/assets", self.base_url);
        debug!(url = %url, asset_type, %scope_uuid, "scout: list_assets");
        let resp = self
            .client
            .get(&url)
            .query(&ListAssetsQuery { scope_uuid, asset_type })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ScoutError::Request(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ScoutError::NotFound);
        }
        let body: ListAssetsResponse = resp
            .error_for_status()
            .map_err(|e| ScoutError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| ScoutError::MalformedResponse(e.to_string()))?;
        Ok(body.asset_uuids)
    }

    pub async fn get_status(
        &self,
        asset_type: &str,
        scope_uuid: Uuid,
        backend_uuid: Uuid,
        config: Option<&serde_json::Value>,
    ) -> Result<AssetStatusReport, ScoutError> {
        let url = format!("{}/assets/{backend_uuid}/status", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&StatusQuery { scope_uuid, asset_type, config })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ScoutError::Request(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ScoutError::NotFound);
        }
        let body: StatusResponse = resp
            .error_for_status()
            .map_err(|e| ScoutError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| ScoutError::MalformedResponse(e.to_string()))?;
        Ok(AssetStatusReport {
            size: body.size,
            usage: body.usage,
            strict_minimum_size: body.strict_minimum_size,
            strict_maximum_size: body.strict_maximum_size,
        })
    }

    pub async fn set_size(
        &self,
        asset_type: &str,
        scope_uuid: Uuid,
        backend_uuid: Uuid,
        old_size: u64,
        new_size: u64,
        config: Option<&serde_json::Value>,
    ) -> Result<ResizeOutcome, ScoutError> {
        let url = format!("{}/assets/{backend_uuid}/resize", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&ResizeRequest {
                scope_uuid,
                asset_type,
                old_size,
                new_size,
                config,
            })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ScoutError::Request(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ScoutError::NotFound);
        }
        let body: ResizeResponse = resp
            .error_for_status()
            .map_err(|e| ScoutError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| ScoutError::MalformedResponse(e.to_string()))?;
        Ok(match body.outcome {
            ResizeOutcomeWire::Succeeded => ResizeOutcome::Succeeded,
            ResizeOutcomeWire::Failed => ResizeOutcome::Failed(body.error.unwrap_or_default()),
            ResizeOutcomeWire::Errored => ResizeOutcome::Errored(body.error.unwrap_or_default()),
        })
    }
}
