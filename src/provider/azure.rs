//! Azure Resource Manager adapter for virtual machines.
//!
//! Instances are addressed by VM name inside one resource group; the "zone" is the VM location.
//! Start/stop return an `Azure-AsyncOperation` URL which doubles as the operation id.
//! The resource-group listing is requested with `$expand=instanceView` so power state comes
//! back with each row; rows missing it are resolved through the instance view endpoint.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::ProviderAdapter;
use super::auth::TokenCache;
use super::error::{ProviderError, ProviderResult};
use super::types::{OperationRef, OperationResult, Provider, ProviderFault, ProviderInstance};

const ARM_BASE_URL: &str = "https://management.azure.com";
const LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";
const ARM_SCOPE: &str = "https://management.azure.com/.default";
const API_VERSION: &str = "2024-03-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ASYNC_POLL_INTERVAL: Duration = Duration::from_secs(5);
const ASYNC_POLL_LIMIT: Duration = Duration::from_secs(10 * 60);
const POWER_STATE_PREFIX: &str = "PowerState/";

/// Service-principal credentials and the resource group holding the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_id: String,
    pub resource_group: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmList {
    #[serde(default)]
    value: Vec<AzureVm>,
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AzureVm {
    name: String,
    location: String,
    properties: Option<AzureVmProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureVmProperties {
    instance_view: Option<InstanceView>,
}

#[derive(Debug, Default, Deserialize)]
struct InstanceView {
    #[serde(default)]
    statuses: Vec<InstanceStatus>,
}

#[derive(Debug, Deserialize)]
struct InstanceStatus {
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsyncOperationStatus {
    status: String,
    error: Option<AzureFault>,
}

#[derive(Debug, Deserialize)]
struct AzureFault {
    code: Option<String>,
    message: Option<String>,
}

impl InstanceView {
    /// Extracts `x` from the `PowerState/x` status code; VMs without one read as deallocated.
    fn power_state(&self) -> String {
        self.statuses
            .iter()
            .filter_map(|s| s.code.as_deref())
            .find_map(|code| code.strip_prefix(POWER_STATE_PREFIX))
            .unwrap_or("deallocated")
            .to_string()
    }
}

impl AzureVm {
    /// Power state carried by an expanded listing row, if the row has an instance view.
    fn power_state(&self) -> Option<String> {
        self.properties
            .as_ref()
            .and_then(|p| p.instance_view.as_ref())
            .map(InstanceView::power_state)
    }
}

/// Operation URL from a start/deallocate response.
///
/// Only `Azure-AsyncOperation` is accepted: it answers with a JSON status body while in
/// progress, whereas the `Location` URL answers 202 with no body.
fn async_operation_url(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Azure-AsyncOperation")
        .and_then(|v| v.to_str().ok())
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

impl AsyncOperationStatus {
    fn is_in_progress(&self) -> bool {
        self.status.eq_ignore_ascii_case("InProgress")
    }

    fn into_result(self) -> OperationResult {
        if self.status.eq_ignore_ascii_case("Succeeded") {
            return OperationResult::success();
        }
        let status = self.status;
        let fault = match self.error {
            Some(err) => ProviderFault::new(
                err.code.unwrap_or_else(|| status.clone()),
                err.message
                    .unwrap_or_else(|| format!("operation ended with status {status}")),
            ),
            None => ProviderFault::new(status.clone(), format!("operation ended with status {status}")),
        };
        OperationResult::failed(fault)
    }
}

/// Azure implementation of [`ProviderAdapter`].
pub struct AzureProvider {
    config: AzureConfig,
    http: HttpClient,
    token: TokenCache,
}

impl AzureProvider {
    pub fn new(config: AzureConfig) -> Self {
        Self {
            config,
            http: HttpClient::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| HttpClient::new()),
            token: TokenCache::new(),
        }
    }

    fn vms_url(&self) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines",
            ARM_BASE_URL, self.config.subscription_id, self.config.resource_group
        )
    }

    async fn access_token(&self) -> ProviderResult<String> {
        if let Some(token) = self.token.get() {
            return Ok(token);
        }

        let url = format!("{}/{}/oauth2/v2.0/token", LOGIN_BASE_URL, self.config.tenant_id);
        let resp = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("scope", ARM_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Auth {
                provider: Provider::Azure,
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(ProviderError::Auth {
                provider: Provider::Azure,
                message: format!("token endpoint returned {}", resp.status()),
            });
        }

        let token: TokenResponse = resp.json().await.map_err(|e| ProviderError::Auth {
            provider: Provider::Azure,
            message: format!("failed to read token: {e}"),
        })?;
        self.token
            .store(token.access_token.clone(), Duration::from_secs(token.expires_in));
        Ok(token.access_token)
    }

    async fn execute(&self, req: RequestBuilder) -> ProviderResult<Response> {
        let token = self.access_token().await?;
        let resp = req
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                provider: Provider::Azure,
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.token.clear();
            }
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: Provider::Azure,
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> ProviderResult<T> {
        self.execute(req)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode {
                provider: Provider::Azure,
                message: e.to_string(),
            })
    }

    async fn power_call(
        &self,
        verb: &str,
        id: &str,
        idempotency_key: &str,
    ) -> ProviderResult<OperationRef> {
        let url = format!("{}/{}/{}", self.vms_url(), id, verb);
        let req = self
            .http
            .post(&url)
            .query(&[("api-version", API_VERSION)])
            .header("x-ms-client-request-id", idempotency_key)
            .body(Vec::new());
        let resp = self.execute(req).await?;

        async_operation_url(resp.headers())
            .map(|id| OperationRef { id })
            .ok_or_else(|| ProviderError::MissingOperation {
                provider: Provider::Azure,
                id: id.to_string(),
            })
    }
}

#[async_trait]
impl ProviderAdapter for AzureProvider {
    fn provider(&self) -> Provider {
        Provider::Azure
    }

    async fn list_instances(&self) -> ProviderResult<Vec<ProviderInstance>> {
        let mut out = Vec::new();
        let mut next: Option<String> = None;

        loop {
            let req = match &next {
                Some(link) => self.http.get(link),
                None => self
                    .http
                    .get(self.vms_url())
                    .query(&[("api-version", API_VERSION), ("$expand", "instanceView")]),
            };
            let page: VmList = self.send(req).await?;
            for vm in page.value {
                let status = match vm.power_state() {
                    Some(status) => status,
                    None => self.get_status(&vm.name, &vm.location).await?,
                };
                out.push(ProviderInstance::new(vm.name, vm.location, status));
            }

            match page.next_link {
                Some(link) if !link.is_empty() => next = Some(link),
                _ => break,
            }
        }

        Ok(out)
    }

    async fn get_status(&self, id: &str, _zone: &str) -> ProviderResult<String> {
        let url = format!("{}/{}/instanceView", self.vms_url(), id);
        let view: InstanceView = self
            .send(self.http.get(&url).query(&[("api-version", API_VERSION)]))
            .await?;
        Ok(view.power_state())
    }

    async fn start_instance(
        &self,
        id: &str,
        _zone: &str,
        idempotency_key: &str,
    ) -> ProviderResult<OperationRef> {
        self.power_call("start", id, idempotency_key).await
    }

    async fn stop_instance(
        &self,
        id: &str,
        _zone: &str,
        idempotency_key: &str,
    ) -> ProviderResult<OperationRef> {
        self.power_call("deallocate", id, idempotency_key).await
    }

    async fn wait_operation(&self, _zone: &str, operation_id: &str) -> ProviderResult<OperationResult> {
        let deadline = Instant::now() + ASYNC_POLL_LIMIT;

        loop {
            let status: AsyncOperationStatus = self.send(self.http.get(operation_id)).await?;
            if !status.is_in_progress() {
                return Ok(status.into_result());
            }
            if Instant::now() >= deadline {
                return Err(ProviderError::OperationPending {
                    operation_id: operation_id.to_string(),
                });
            }
            tokio::time::sleep(ASYNC_POLL_INTERVAL).await;
        }
    }
}
