//! Hetzner Cloud API client
//!
//! [`CloudApi`] is the capability surface the controller needs from the
//! cloud: list servers, list floating IPs, and assign a floating IP to a
//! server. [`HcloudClient`] implements it over the public REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use tracing::debug;

use fip_common::{Error, Result};

use crate::schema;
use crate::types::{FloatingIp, Instance};

/// Public Hetzner Cloud API endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.hetzner.cloud/v1";

/// Largest page size the API accepts
const PER_PAGE: u32 = 50;

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of an assign request that reached the API
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssignResponse {
    /// HTTP status code returned by the API
    pub status: u16,
}

/// Trait abstracting the cloud API operations used by the controller
///
/// This trait allows substituting the cloud in tests while using the real
/// Hetzner client in production.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// List all compute instances in the project, in API order
    async fn list_instances(&self) -> Result<Vec<Instance>>;

    /// List floating IPs, optionally filtered by a label selector
    async fn list_floating_ips(&self, label_selector: Option<String>) -> Result<Vec<FloatingIp>>;

    /// Assign a floating IP to an instance
    ///
    /// Transport failures are errors. Any HTTP response, whatever its status,
    /// is returned so the caller can check the accepted-status contract.
    async fn assign_floating_ip(&self, floating_ip_id: i64, instance_id: i64)
        -> Result<AssignResponse>;
}

/// [`CloudApi`] implementation for the Hetzner Cloud REST API
#[derive(Clone, Debug)]
pub struct HcloudClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HcloudClient {
    /// Create a client authenticating with the given API token
    pub fn new(token: &str, endpoint: &str) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            Error::configuration("hetzner cloud API token contains invalid characters")
        })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("fip-controller/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::cloud("client", format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch and decode one page of a list endpoint
    async fn get_page<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.endpoint, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::cloud(operation, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::cloud_status(
                operation,
                status.as_u16(),
                api_error_message(&body).unwrap_or_else(|| status.to_string()),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::cloud(operation, format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl CloudApi for HcloudClient {
    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        let mut page = Some(1);

        while let Some(current) = page {
            let resp: schema::ServerListResponse = self
                .get_page(
                    "list_servers",
                    "/servers",
                    &[("page", current.to_string()), ("per_page", PER_PAGE.to_string())],
                )
                .await?;

            for server in resp.servers {
                instances.push(Instance::try_from(server)?);
            }
            page = next_page(resp.meta.as_ref());
        }

        debug!(count = instances.len(), "Fetched servers");
        Ok(instances)
    }

    async fn list_floating_ips(&self, label_selector: Option<String>) -> Result<Vec<FloatingIp>> {
        let mut floating_ips = Vec::new();
        let mut page = Some(1);

        while let Some(current) = page {
            let mut query = vec![("page", current.to_string()), ("per_page", PER_PAGE.to_string())];
            if let Some(ref selector) = label_selector {
                query.push(("label_selector", selector.clone()));
            }

            let resp: schema::FloatingIpListResponse = self
                .get_page("list_floating_ips", "/floating_ips", &query)
                .await?;

            for fip in resp.floating_ips {
                floating_ips.push(FloatingIp::try_from(fip)?);
            }
            page = next_page(resp.meta.as_ref());
        }

        debug!(count = floating_ips.len(), "Fetched floating IPs");
        Ok(floating_ips)
    }

    async fn assign_floating_ip(
        &self,
        floating_ip_id: i64,
        instance_id: i64,
    ) -> Result<AssignResponse> {
        let url = format!(
            "{}/floating_ips/{}/actions/assign",
            self.endpoint, floating_ip_id
        );
        let response = self
            .http
            .post(&url)
            .json(&schema::AssignRequest {
                server: instance_id,
            })
            .send()
            .await
            .map_err(|e| Error::cloud("assign_floating_ip", e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(
                floating_ip_id,
                instance_id,
                status,
                message = api_error_message(&body).unwrap_or_default(),
                "Assign request rejected"
            );
        }

        Ok(AssignResponse { status })
    }
}

fn next_page(meta: Option<&schema::Meta>) -> Option<u32> {
    meta.and_then(|m| m.pagination.as_ref())
        .and_then(|p| p.next_page)
}

fn api_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<schema::ErrorResponse>(body)
        .ok()
        .map(|e| format!("{}: {}", e.error.code, e.error.message))
}
