//! HTTP cache invalidation client
//!
//! Posts invalidation requests as JSON to a CDN (or a gateway in front of
//! one). The endpoint answers with the id it assigned to the invalidation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage_traits::{CacheInvalidator, InvalidationReceipt, InvalidationRequest, StorageResult};

/// HTTP invalidator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpInvalidatorConfig {
    /// Endpoint receiving `POST` requests
    pub endpoint: String,
    /// CDN distribution the requests target
    pub distribution_id: String,
    /// Bearer token (optional)
    pub token: Option<String>,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl HttpInvalidatorConfig {
    pub fn new(endpoint: &str, distribution_id: &str) -> Self {
        HttpInvalidatorConfig {
            endpoint: endpoint.to_string(),
            distribution_id: distribution_id.to_string(),
            token: None,
            timeout_ms: 30_000,
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }
}

#[derive(Debug, Serialize)]
struct InvalidationBody<'a> {
    distribution_id: &'a str,
    site: &'a str,
    paths: Vec<&'a str>,
    caller_reference: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvalidationResponse {
    id: String,
}

/// Invalidator speaking JSON over HTTP.
pub struct HttpInvalidator {
    config: HttpInvalidatorConfig,
    http_client: reqwest::Client,
}

impl HttpInvalidator {
    pub fn new(config: HttpInvalidatorConfig) -> StorageResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("quayside/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(HttpInvalidator {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl CacheInvalidator for HttpInvalidator {
    async fn invalidate(
        &self,
        site: &str,
        request: &InvalidationRequest,
    ) -> StorageResult<InvalidationReceipt> {
        let body = InvalidationBody {
            distribution_id: &self.config.distribution_id,
            site,
            paths: request.paths.iter().map(String::as_str).collect(),
            caller_reference: &request.caller_reference,
        };
        debug!(endpoint = %self.config.endpoint, site, "posting invalidation");

        let mut builder = self.http_client.post(&self.config.endpoint).json(&body);
        if let Some(token) = &self.config.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(StorageError::Unavailable(format!(
                "invalidation endpoint returned {}",
                status
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected {
                key: self.config.distribution_id.clone(),
                reason: format!("{}: {}", status, text),
            });
        }

        let parsed: InvalidationResponse = response.json().await?;
        info!(site, invalidation_id = %parsed.id, "invalidation accepted");
        Ok(InvalidationReceipt {
            id: parsed.id,
            requested_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let cfg = HttpInvalidatorConfig::new("https://cdn.example/invalidate", "E123")
            .with_token("secret");
        assert_eq!(cfg.token.as_deref(), Some("secret"));
        assert_eq!(cfg.timeout_ms, 30_000);
    }

    #[test]
    fn body_lists_paths() {
        let req = InvalidationRequest::all_paths("ref");
        let body = InvalidationBody {
            distribution_id: "E123",
            site: "www",
            paths: req.paths.iter().map(String::as_str).collect(),
            caller_reference: &req.caller_reference,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["paths"], serde_json::json!(["/*"]));
        assert_eq!(json["caller_reference"], "ref");
    }

    #[test]
    fn client_builds() {
        assert!(HttpInvalidator::new(HttpInvalidatorConfig::new("http://localhost:1", "E1")).is_ok());
    }
}
