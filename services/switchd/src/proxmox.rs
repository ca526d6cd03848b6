//! Proxmox VE HTTP API client.
//!
//! Thin typed client over the subset of the Proxmox REST API the switcher
//! needs: one status query and the three power actions, all scoped to QEMU
//! VMs on a single node.
//!
//! Reference: https://pve.proxmox.com/pve-docs/api-viewer/

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::control::{ControlPlane, PowerState, VmId};

/// Errors from the Proxmox API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
}

/// Proxmox API client bound to one cluster node.
pub struct ProxmoxClient {
    client: reqwest::Client,
    base_url: String,
    node: String,
}

/// Every Proxmox response wraps its payload in a `data` field.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct CurrentStatus {
    status: String,
}

impl ProxmoxClient {
    /// Create a client authenticated with the configured API token.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let token = format!(
            "PVEAPIToken={}!{}={}",
            config.pve_user, config.pve_token_name, config.pve_token_value
        );
        let mut value = HeaderValue::from_str(&token)?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!config.pve_verify_tls)
            .build()?;

        Ok(Self {
            client,
            base_url: format!("https://{}:8006/api2/json", config.pve_host),
            node: config.pve_node.clone(),
        })
    }

    fn qemu_url(&self, vmid: VmId, path: &str) -> String {
        format!(
            "{}/nodes/{}/qemu/{}/status/{}",
            self.base_url, self.node, vmid, path
        )
    }

    async fn get_current_status(&self, vmid: VmId) -> Result<CurrentStatus, ApiError> {
        let url = self.qemu_url(vmid, "current");
        debug!(vmid, "GET VM status");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope<CurrentStatus> = response.json().await?;
        Ok(envelope.data)
    }

    /// POST a power action (`shutdown`, `stop`, `start`). The returned
    /// task UPID is not tracked; the switcher polls status instead.
    async fn post_action(&self, vmid: VmId, action: &str) -> Result<(), ApiError> {
        let url = self.qemu_url(vmid, action);
        debug!(vmid, action, "POST VM action");

        let response = self.client.post(&url).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(ApiError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl ControlPlane for ProxmoxClient {
    async fn power_state(&self, vmid: VmId) -> Result<PowerState> {
        let current = self.get_current_status(vmid).await?;
        Ok(PowerState::from_api(&current.status))
    }

    async fn request_shutdown(&self, vmid: VmId) -> Result<()> {
        Ok(self.post_action(vmid, "shutdown").await?)
    }

    async fn request_force_stop(&self, vmid: VmId) -> Result<()> {
        Ok(self.post_action(vmid, "stop").await?)
    }

    async fn request_start(&self, vmid: VmId) -> Result<()> {
        Ok(self.post_action(vmid, "start").await?)
    }
}
