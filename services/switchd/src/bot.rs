//! Telegram command loop.
//!
//! Long-polls `getUpdates` and dispatches commands from the admin chat.
//! Messages from any other chat are ignored; there is exactly one
//! allow-listed caller. Each command runs as its own task so a long
//! transition never blocks `/status`, `/lock` or `/unlock`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::notify::ProgressSink;
use crate::switcher::{Role, Switcher};
use crate::telegram::TelegramClient;

const POLL_TIMEOUT_SECS: u64 = 30;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

const HELP_TEXT: &str = "VM switch commands:\n\
    /status - power state of both VMs and the lock\n\
    /switch_linux - switch to the Linux VM\n\
    /switch_windows - switch to the Windows VM\n\
    /switch - toggle the active VM\n\
    /lock - disable switching\n\
    /unlock - enable switching\n\
    /help - this message";

/// Run the command loop until shutdown.
pub async fn run_bot_loop(
    client: Arc<TelegramClient>,
    sink: Arc<dyn ProgressSink>,
    switcher: Arc<Switcher>,
    admin_chat_id: i64,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!(admin_chat_id, "Starting Telegram command loop");
    let mut offset = 0i64;

    loop {
        tokio::select! {
            updates = client.get_updates(offset, POLL_TIMEOUT_SECS) => {
                match updates {
                    Ok(updates) => {
                        for update in updates {
                            offset = offset.max(update.update_id + 1);

                            let Some(message) = update.message else { continue };
                            if message.chat.id != admin_chat_id {
                                debug!(chat_id = message.chat.id, "Ignoring message from unknown chat");
                                continue;
                            }
                            let Some(text) = message.text else { continue };

                            // Handlers run concurrently with the poll loop;
                            // the orchestrator's guard rejects a second
                            // switch on its own.
                            let sink = Arc::clone(&sink);
                            let switcher = Arc::clone(&switcher);
                            tokio::spawn(async move {
                                handle_command(sink.as_ref(), &switcher, text.trim()).await;
                            });
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "getUpdates failed");
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Telegram command loop shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Strip arguments and a possible `@botname` mention suffix.
fn parse_command(text: &str) -> &str {
    let command = text.split_whitespace().next().unwrap_or("");
    command.split('@').next().unwrap_or(command)
}

async fn handle_command(sink: &dyn ProgressSink, switcher: &Switcher, text: &str) {
    match parse_command(text) {
        "/status" => {
            let status = switcher.full_status().await;
            let reply = format!(
                "System status\nLinux: {}\nWindows: {}\nLocked: {}",
                status.linux, status.windows, status.locked
            );
            sink.notify_once(&reply).await;
        }
        "/lock" => {
            switcher.set_lock(true).await;
            sink.notify_once("System LOCKED. Switching disabled.").await;
        }
        "/unlock" => {
            switcher.set_lock(false).await;
            sink.notify_once("System UNLOCKED.").await;
        }
        "/switch_linux" => run_switch(sink, switcher, Role::Linux).await,
        "/switch_windows" => run_switch(sink, switcher, Role::Windows).await,
        "/switch" => {
            let result = switcher.toggle(false).await;
            if !result.is_ok() {
                sink.notify_once(&result.message).await;
            }
        }
        "/help" => sink.notify_once(HELP_TEXT).await,
        other => debug!(command = other, "Ignoring unknown command"),
    }
}

/// The switch reports its own progress through the sink; a rejection before
/// the progress message opens (lock, guard) is the only case that would
/// otherwise leave the operator without feedback.
async fn run_switch(sink: &dyn ProgressSink, switcher: &Switcher, target: Role) {
    let result = switcher.switch(target, false).await;
    if !result.is_ok() {
        sink.notify_once(&result.message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::MockControlPlane;
    use crate::lockfile::LockStore;
    use crate::notify::{RecordingSink, SinkEvent};
    use crate::switcher::SwitchTiming;

    const LINUX: u32 = 100;
    const WINDOWS: u32 = 101;

    async fn switcher_over(
        control: Arc<MockControlPlane>,
        sink: Arc<RecordingSink>,
    ) -> (Arc<Switcher>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let switcher = Switcher::new(
            control,
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
            LockStore::new(dir.path().join("switchd.lock")),
            LINUX,
            WINDOWS,
            SwitchTiming::default(),
        )
        .await;
        (Arc::new(switcher), dir)
    }

    #[test]
    fn test_parse_command_plain() {
        assert_eq!(parse_command("/status"), "/status");
    }

    #[test]
    fn test_parse_command_with_mention() {
        assert_eq!(parse_command("/switch_linux@my_switch_bot"), "/switch_linux");
    }

    #[test]
    fn test_parse_command_with_arguments() {
        assert_eq!(parse_command("/lock now please"), "/lock");
    }

    #[test]
    fn test_parse_command_empty() {
        assert_eq!(parse_command(""), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_serviced_while_switch_in_flight() {
        let control = Arc::new(
            MockControlPlane::new()
                .with_power(LINUX, crate::control::PowerState::Running)
                .with_power(WINDOWS, crate::control::PowerState::Stopped)
                .stuck_guest(),
        );
        let sink = Arc::new(RecordingSink::new());
        let (switcher, _dir) = switcher_over(Arc::clone(&control), Arc::clone(&sink)).await;

        let switch_task = tokio::spawn({
            let sink = Arc::clone(&sink);
            let switcher = Arc::clone(&switcher);
            async move { handle_command(sink.as_ref(), &switcher, "/switch_windows").await }
        });
        // Let the switch reach the shutdown wait.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        // The guest is stuck, so the switch is parked for the full timeout.
        // A status command issued now must still complete.
        handle_command(sink.as_ref(), &switcher, "/status").await;
        let statuses: Vec<String> = sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Notified(text) if text.starts_with("System status") => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].contains("Linux: running"));

        switch_task.await.unwrap();
        assert_eq!(
            control.power_of(WINDOWS),
            crate::control::PowerState::Running
        );
    }

    #[tokio::test]
    async fn test_lock_command_flips_lock_and_replies() {
        let control = Arc::new(MockControlPlane::new());
        let sink = Arc::new(RecordingSink::new());
        let (switcher, _dir) = switcher_over(control, Arc::clone(&sink)).await;

        handle_command(sink.as_ref(), &switcher, "/lock").await;
        assert!(switcher.is_locked());

        handle_command(sink.as_ref(), &switcher, "/unlock").await;
        assert!(!switcher.is_locked());
    }
}
