//! HTTP client for the switchd API.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{de::DeserializeOwned, Deserialize};

/// Client for the daemon's control API.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct FullStatus {
    pub linux: String,
    pub windows: String,
    pub locked: bool,
}

#[derive(Debug, Deserialize)]
pub struct SwitchResult {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct LockResponse {
    pub locked: bool,
}

impl ApiClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).context("Invalid token format")?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.client.get(self.url(path)).send().await?;
        self.handle(response).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.client.post(self.url(path)).send().await?;
        self.handle(response).await
    }

    async fn handle<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error {status}: {body}");
        }
        response.json().await.context("Invalid response body")
    }
}
