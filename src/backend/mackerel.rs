//! HTTP client for a Mackerel-compatible monitoring API
//!
//! ## Endpoints
//!
//! - `GET  {base}/api/v0/hosts?service=..&role=..` for discovery
//! - `POST {base}/api/v0/tssdb` for host metric submission
//!
//! Every request carries the API key in the `X-Api-Key` header.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, trace};

use super::{Backend, BackendError, BackendResult, Host};
use crate::metric::MetricValue;

const API_KEY_HEADER: &str = "X-Api-Key";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct HostsResponse {
    hosts: Vec<Host>,
}

#[derive(Debug, Clone)]
pub struct MackerelClient {
    /// HTTP client (reused across requests)
    client: reqwest::Client,

    base_url: String,

    api_key: String,
}

impl MackerelClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> BackendResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(BackendError::InvalidConfig(format!(
                "base url must be http(s), got `{base_url}`"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Turn a non-success response into a [`BackendError::Status`]
    async fn check_status(response: reqwest::Response) -> BackendResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Backend for MackerelClient {
    #[instrument(skip(self))]
    async fn find_hosts(&self, service: &str, roles: &[String]) -> BackendResult<Vec<Host>> {
        let url = format!("{}/api/v0/hosts", self.base_url);

        let mut request = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("service", service)]);

        for role in roles {
            request = request.query(&[("role", role)]);
        }

        trace!("requesting hosts from {url}");

        let response = Self::check_status(request.send().await?).await?;
        let body: HostsResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        debug!("backend returned {} hosts", body.hosts.len());
        Ok(body.hosts)
    }

    #[instrument(skip_all, fields(metrics = batch.len()))]
    async fn post_metrics(&self, batch: &[MetricValue]) -> BackendResult<()> {
        let url = format!("{}/api/v0/tssdb", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(batch)
            .send()
            .await?;

        Self::check_status(response).await?;
        trace!("posted {} metric values", batch.len());
        Ok(())
    }
}
