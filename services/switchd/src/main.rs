//! switchd - single-active VM switch daemon.
//!
//! Exposes an HTTP control surface and a Telegram command loop over the
//! switch orchestrator. Exactly one of the two configured VMs is meant to
//! run at a time; the orchestrator owns the transition between them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use switchd::api::{self, AppState};
use switchd::bot;
use switchd::config::Config;
use switchd::lockfile::LockStore;
use switchd::notify::ProgressSink;
use switchd::proxmox::ProxmoxClient;
use switchd::switcher::{SwitchTiming, Switcher};
use switchd::telegram::{TelegramClient, TelegramSink};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting switchd");

    let config = Config::from_env()?;
    info!(
        pve_host = %config.pve_host,
        pve_node = %config.pve_node,
        linux_vmid = config.linux_vmid,
        windows_vmid = config.windows_vmid,
        listen_addr = %config.listen_addr,
        "Configuration loaded"
    );

    let control = Arc::new(ProxmoxClient::new(&config)?);
    let telegram = Arc::new(TelegramClient::new(&config.bot_token));
    let sink = Arc::new(TelegramSink::new(
        Arc::clone(&telegram),
        config.bot_chat_id,
    ));

    let timing = SwitchTiming {
        shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        ..SwitchTiming::default()
    };
    let switcher = Arc::new(
        Switcher::new(
            control,
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
            LockStore::new(&config.lock_file),
            config.linux_vmid,
            config.windows_vmid,
            timing,
        )
        .await,
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the Telegram command loop
    let bot_handle = tokio::spawn({
        let telegram = Arc::clone(&telegram);
        let sink = Arc::clone(&sink) as Arc<dyn ProgressSink>;
        let switcher = Arc::clone(&switcher);
        let chat_id = config.bot_chat_id;
        let shutdown_rx = shutdown_rx.clone();
        async move { bot::run_bot_loop(telegram, sink, switcher, chat_id, shutdown_rx).await }
    });

    // Start the HTTP API
    let app = api::router(AppState {
        switcher: Arc::clone(&switcher),
        api_token: Arc::from(config.api_token.as_str()),
    });
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "HTTP API listening");
    let server_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = bot_handle => {
            match result {
                Ok(Ok(())) => info!("Telegram loop exited normally"),
                Ok(Err(e)) => error!(error = %e, "Telegram loop error"),
                Err(e) => error!(error = %e, "Telegram task panicked"),
            }
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("HTTP server exited"),
                Ok(Err(e)) => error!(error = %e, "HTTP server error"),
                Err(e) => error!(error = %e, "HTTP server task panicked"),
            }
        }
    }

    // Signal shutdown to the workers
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(Duration::from_secs(1)).await;

    info!("switchd shutdown complete");
    Ok(())
}
