//! Upsert backend speaking the hosted backend's REST dialect.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use gallery_core::config::RemoteConfig;

use crate::backend::{RemoteImageRow, UpsertBackend};
use crate::error::{format_http_error, RemoteError};

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const MIN_TIMEOUT_MS: u64 = 250;

/// Insert-if-absent on the `url` conflict target.
const PREFER_IGNORE_DUPLICATES: &str = "resolution=ignore-duplicates,return=minimal";

#[derive(Debug, Clone)]
pub struct HttpUpsertConfig {
    pub base_url: String,
    pub api_key: String,
    pub table: String,
    pub timeout_ms: u64,
}

impl HttpUpsertConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            table: "gallery_images".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl From<&RemoteConfig> for HttpUpsertConfig {
    fn from(config: &RemoteConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            table: config.table.clone(),
            timeout_ms: config.timeout_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpUpsertBackend {
    endpoint: String,
    api_key: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpUpsertBackend {
    pub fn new(config: HttpUpsertConfig) -> Result<Self, RemoteError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            endpoint: format!("{}/rest/v1/{}?on_conflict=url", base_url, config.table.trim()),
            api_key: config.api_key,
            timeout: Duration::from_millis(config.timeout_ms.max(MIN_TIMEOUT_MS)),
            http: reqwest::Client::new(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl UpsertBackend for HttpUpsertBackend {
    async fn upsert(&self, rows: &[RemoteImageRow]) -> Result<(), RemoteError> {
        let body = serde_json::to_vec(rows).map_err(|e| RemoteError::Encode {
            message: e.to_string(),
        })?;

        let response = self
            .http
            .post(self.endpoint.as_str())
            .header("apikey", self.api_key.as_str())
            .bearer_auth(self.api_key.as_str())
            .header("Prefer", PREFER_IGNORE_DUPLICATES)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| RemoteError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| RemoteError::Read {
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(format_http_error(status, &bytes));
        }

        debug!(rows = rows.len(), %status, "Remote upsert accepted");
        Ok(())
    }
}

fn normalize_base_url(base_url: &str) -> Result<String, RemoteError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(RemoteError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}
