//! Google Compute Engine adapter (Compute REST API v1).
//!
//! Tokens come from the instance metadata server when running on GCE, otherwise from
//! `gcloud auth print-access-token`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::ProviderAdapter;
use super::auth::{TokenCache, run_command_with_retries};
use super::error::{ProviderError, ProviderResult};
use super::types::{OperationRef, OperationResult, Provider, ProviderFault, ProviderInstance};

const COMPUTE_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// The `wait` endpoint returns after roughly two minutes even if the operation is not done.
const OPERATION_WAIT_TIMEOUT: Duration = Duration::from_secs(150);
const OPERATION_WAIT_ROUNDS: usize = 5;
const GCLOUD_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// GCE project and the zones the fleet lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GceConfig {
    pub project: String,
    pub zones: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceList {
    #[serde(default)]
    items: Vec<GceInstance>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GceInstance {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GceOperation {
    name: Option<String>,
    id: Option<String>,
    status: Option<String>,
    status_message: Option<String>,
    error: Option<GceOperationError>,
}

#[derive(Debug, Deserialize)]
struct GceOperationError {
    #[serde(default)]
    errors: Vec<GceErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GceErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

impl GceOperation {
    fn handle(&self) -> Option<String> {
        self.name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.id.clone().filter(|i| !i.is_empty()))
    }

    fn is_done(&self) -> bool {
        self.status.as_deref() == Some("DONE")
    }

    fn fault(&self) -> Option<ProviderFault> {
        let detail = self.error.as_ref()?.errors.first()?;
        let message = detail
            .message
            .clone()
            .or_else(|| self.status_message.clone())
            .unwrap_or_else(|| "Unknown error".to_string());
        Some(ProviderFault::new(
            detail.code.clone().unwrap_or_default(),
            message,
        ))
    }
}

/// Compute Engine implementation of [`ProviderAdapter`].
pub struct GceProvider {
    config: GceConfig,
    http: HttpClient,
    gcloud_path: PathBuf,
    token: TokenCache,
}

impl GceProvider {
    /// Creates an adapter using `gcloud` from `PATH` as the token fallback.
    pub fn new(config: GceConfig) -> Self {
        Self {
            config,
            http: HttpClient::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| HttpClient::new()),
            gcloud_path: PathBuf::from("gcloud"),
            token: TokenCache::new(),
        }
    }

    pub fn config(&self) -> &GceConfig {
        &self.config
    }

    fn zone_url(&self, zone: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}",
            COMPUTE_BASE_URL, self.config.project, zone
        )
    }

    async fn access_token(&self) -> ProviderResult<String> {
        if let Some(token) = self.token.get() {
            return Ok(token);
        }

        match self.metadata_token().await {
            Ok(token) => {
                self.token
                    .store(token.access_token.clone(), Duration::from_secs(token.expires_in));
                Ok(token.access_token)
            }
            Err(e) => {
                tracing::debug!(error = %e, "metadata token unavailable, falling back to gcloud");
                let token = run_command_with_retries(
                    &self.gcloud_path,
                    &["auth", "print-access-token"],
                    "gcloud auth print-access-token",
                )
                .await?;
                if token.is_empty() {
                    return Err(ProviderError::Auth {
                        provider: Provider::Google,
                        message: "gcloud returned an empty token".to_string(),
                    });
                }
                self.token.store(token.clone(), GCLOUD_TOKEN_TTL);
                Ok(token)
            }
        }
    }

    async fn metadata_token(&self) -> ProviderResult<MetadataToken> {
        let resp = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(|e| ProviderError::Auth {
                provider: Provider::Google,
                message: format!("metadata request failed: {e}"),
            })?;

        if !resp.status().is_success() {
            return Err(ProviderError::Auth {
                provider: Provider::Google,
                message: format!("metadata error: {}", resp.status()),
            });
        }

        resp.json().await.map_err(|e| ProviderError::Auth {
            provider: Provider::Google,
            message: format!("failed to read metadata token: {e}"),
        })
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> ProviderResult<T> {
        let token = self.access_token().await?;
        let resp = req
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                provider: Provider::Google,
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.token.clear();
            }
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: Provider::Google,
                status: status.as_u16(),
                message: body,
            });
        }

        resp.json().await.map_err(|e| ProviderError::Decode {
            provider: Provider::Google,
            message: e.to_string(),
        })
    }

    async fn list_zone(&self, zone: &str) -> ProviderResult<Vec<ProviderInstance>> {
        let url = format!("{}/instances", self.zone_url(zone));
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self.http.get(&url);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }
            let page: InstanceList = self.send(req).await?;
            out.extend(
                page.items
                    .into_iter()
                    .map(|i| ProviderInstance::new(i.id, zone, i.status)),
            );

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(out)
    }

    async fn power_call(
        &self,
        verb: &str,
        id: &str,
        zone: &str,
        idempotency_key: &str,
    ) -> ProviderResult<OperationRef> {
        let url = format!("{}/instances/{}/{}", self.zone_url(zone), id, verb);
        let req = self
            .http
            .post(&url)
            .query(&[("requestId", idempotency_key)])
            .body(Vec::new());
        let op: GceOperation = self.send(req).await?;

        op.handle()
            .map(|id| OperationRef { id })
            .ok_or_else(|| ProviderError::MissingOperation {
                provider: Provider::Google,
                id: id.to_string(),
            })
    }
}

#[async_trait]
impl ProviderAdapter for GceProvider {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn list_instances(&self) -> ProviderResult<Vec<ProviderInstance>> {
        let mut all = Vec::new();
        for zone in &self.config.zones {
            all.extend(self.list_zone(zone).await?);
        }
        Ok(all)
    }

    async fn get_status(&self, id: &str, zone: &str) -> ProviderResult<String> {
        let url = format!("{}/instances/{}", self.zone_url(zone), id);
        let instance: GceInstance = self.send(self.http.get(&url)).await?;
        Ok(instance.status)
    }

    async fn start_instance(
        &self,
        id: &str,
        zone: &str,
        idempotency_key: &str,
    ) -> ProviderResult<OperationRef> {
        self.power_call("start", id, zone, idempotency_key).await
    }

    async fn stop_instance(
        &self,
        id: &str,
        zone: &str,
        idempotency_key: &str,
    ) -> ProviderResult<OperationRef> {
        self.power_call("stop", id, zone, idempotency_key).await
    }

    async fn wait_operation(&self, zone: &str, operation_id: &str) -> ProviderResult<OperationResult> {
        let url = format!("{}/operations/{}/wait", self.zone_url(zone), operation_id);

        for round in 1..=OPERATION_WAIT_ROUNDS {
            let req = self
                .http
                .post(&url)
                .timeout(OPERATION_WAIT_TIMEOUT)
                .body(Vec::new());
            let op: GceOperation = self.send(req).await?;
            if op.is_done() {
                return Ok(OperationResult { error: op.fault() });
            }
            tracing::debug!(operation = operation_id, round, "operation not done yet");
        }

        Err(ProviderError::OperationPending {
            operation_id: operation_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_handle_prefers_name() {
        let op: GceOperation =
            serde_json::from_str(r#"{"name":"operation-123","id":"987","status":"RUNNING"}"#)
                .unwrap();
        assert_eq!(op.handle().as_deref(), Some("operation-123"));

        let op: GceOperation = serde_json::from_str(r#"{"id":"987"}"#).unwrap();
        assert_eq!(op.handle().as_deref(), Some("987"));

        let op: GceOperation = serde_json::from_str(r#"{"name":""}"#).unwrap();
        assert!(op.handle().is_none());
    }

    #[test]
    fn test_operation_fault_uses_first_error() {
        let op: GceOperation = serde_json::from_str(
            r#"{
                "name": "operation-1",
                "status": "DONE",
                "error": {"errors": [
                    {"code": "QUOTA_EXCEEDED", "message": "Quota 'CPUS' exceeded."},
                    {"code": "OTHER", "message": "ignored"}
                ]}
            }"#,
        )
        .unwrap();

        assert!(op.is_done());
        let fault = op.fault().unwrap();
        assert_eq!(fault.code, "QUOTA_EXCEEDED");
        assert_eq!(fault.message, "Quota 'CPUS' exceeded.");
    }

    #[test]
    fn test_operation_fault_falls_back_to_status_message() {
        let op: GceOperation = serde_json::from_str(
            r#"{"status":"DONE","statusMessage":"zone exhausted","error":{"errors":[{"code":"ZONE_RESOURCE_POOL_EXHAUSTED"}]}}"#,
        )
        .unwrap();
        assert_eq!(op.fault().unwrap().message, "zone exhausted");

        let ok: GceOperation = serde_json::from_str(r#"{"status":"DONE"}"#).unwrap();
        assert!(ok.fault().is_none());
    }

    #[test]
    fn test_instance_list_tolerates_missing_items() {
        let list: InstanceList = serde_json::from_str(r#"{"kind":"compute#instanceList"}"#).unwrap();
        assert!(list.items.is_empty());
        assert!(list.next_page_token.is_none());
    }
}
