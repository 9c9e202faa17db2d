//! API client for communicating with the governor HTTP API

use anyhow::{Context, Result};
use governor_lib::{GovernorSnapshot, HealthResponse, ServiceSnapshot};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

/// API client for the governor
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn get_snapshot(&self) -> Result<GovernorSnapshot> {
        self.get("api/v1/snapshot").await
    }

    pub async fn get_service(&self, name: &str) -> Result<ServiceSnapshot> {
        self.get(&format!("api/v1/services/{}", name)).await
    }

    /// Fetch component health. An unhealthy governor answers 503 with the same body.
    pub async fn get_health(&self) -> Result<HealthResponse> {
        let url = self.base_url.join("healthz").context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }
}
