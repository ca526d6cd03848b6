//! Daemon configuration from environment variables.

use std::net::SocketAddr;

use anyhow::{Context, Result};

use crate::control::VmId;

/// Switch daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxmox API host (name or address; port 8006 is implied).
    pub pve_host: String,

    /// API token user, e.g. `switchd@pve`.
    pub pve_user: String,

    /// API token name.
    pub pve_token_name: String,

    /// API token secret.
    pub pve_token_value: String,

    /// Cluster node hosting both VMs.
    pub pve_node: String,

    /// Verify the Proxmox TLS certificate. Off by default since most
    /// single-node installations run with a self-signed certificate.
    pub pve_verify_tls: bool,

    /// VM id of the Linux role.
    pub linux_vmid: VmId,

    /// VM id of the Windows role.
    pub windows_vmid: VmId,

    /// Telegram bot token.
    pub bot_token: String,

    /// The one chat allowed to issue commands; progress goes there too.
    pub bot_chat_id: i64,

    /// Static bearer token for the HTTP API.
    pub api_token: String,

    /// HTTP API listen address.
    pub listen_addr: SocketAddr,

    /// Path of the persisted manual-lock file.
    pub lock_file: String,

    /// Graceful-shutdown wait before force stopping, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `SWITCHD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            pve_host: require("SWITCHD_PVE_HOST")?,
            pve_user: require("SWITCHD_PVE_USER")?,
            pve_token_name: require("SWITCHD_PVE_TOKEN_NAME")?,
            pve_token_value: require("SWITCHD_PVE_TOKEN_VALUE")?,
            pve_node: require("SWITCHD_PVE_NODE")?,
            pve_verify_tls: flag("SWITCHD_PVE_VERIFY_TLS"),
            linux_vmid: parse_var("SWITCHD_LINUX_VM_ID")?,
            windows_vmid: parse_var("SWITCHD_WINDOWS_VM_ID")?,
            bot_token: require("SWITCHD_BOT_TOKEN")?,
            bot_chat_id: parse_var("SWITCHD_BOT_CHAT_ID")?,
            api_token: require("SWITCHD_API_TOKEN")?,
            listen_addr: std::env::var("SWITCHD_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
                .parse()
                .context("Invalid SWITCHD_LISTEN_ADDR")?,
            lock_file: std::env::var("SWITCHD_LOCK_FILE")
                .unwrap_or_else(|_| "switchd.lock".to_string()),
            shutdown_timeout_secs: parse_or("SWITCHD_SHUTDOWN_TIMEOUT_SECS", 180)?,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            pve_host: "pve.example".to_string(),
            pve_user: "switchd@pve".to_string(),
            pve_token_name: "switchd".to_string(),
            pve_token_value: "secret".to_string(),
            pve_node: "pve1".to_string(),
            pve_verify_tls: false,
            linux_vmid: 100,
            windows_vmid: 101,
            bot_token: "token".to_string(),
            bot_chat_id: 1,
            api_token: "api-token".to_string(),
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            lock_file: "switchd.lock".to_string(),
            shutdown_timeout_secs: 180,
        }
    }
}

fn require(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("Missing environment variable: {name}"))
}

fn parse_var<T>(name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    require(name)?
        .parse()
        .with_context(|| format!("Invalid value for {name}"))
}

/// Parse an optional variable. Absence takes the default; a present but
/// unparsable value is a startup error, same as the required variables.
fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("Invalid value for {name}")),
        Err(_) => Ok(default),
    }
}

fn flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable name so the process-global
    // environment never races between tests.

    #[test]
    fn test_parse_or_defaults_when_absent() {
        assert_eq!(parse_or::<u64>("SWITCHD_TEST_ABSENT_TIMEOUT", 180).unwrap(), 180);
    }

    #[test]
    fn test_parse_or_reads_present_value() {
        std::env::set_var("SWITCHD_TEST_SET_TIMEOUT", "60");
        assert_eq!(parse_or::<u64>("SWITCHD_TEST_SET_TIMEOUT", 180).unwrap(), 60);
    }

    #[test]
    fn test_parse_or_rejects_garbage() {
        std::env::set_var("SWITCHD_TEST_GARBAGE_TIMEOUT", "soon");
        let err = parse_or::<u64>("SWITCHD_TEST_GARBAGE_TIMEOUT", 180).unwrap_err();
        assert!(err.to_string().contains("SWITCHD_TEST_GARBAGE_TIMEOUT"));
    }
}
