//! Integration tests for the switch orchestrator.
//!
//! `MockControlPlane` scripts the hypervisor and records call order;
//! `RecordingSink` captures the progress sequence. Paths that depend on the
//! 180 s shutdown wait run under tokio's paused clock, so deadline expiry is
//! simulated without wall-clock delay.

use std::sync::Arc;

use switchd::control::{Call, MockControlPlane, PowerState};
use switchd::lockfile::LockStore;
use switchd::notify::{RecordingSink, SinkEvent};
use switchd::switcher::{Role, SwitchTiming, Switcher};

const LINUX: u32 = 100;
const WINDOWS: u32 = 101;

struct Harness {
    control: Arc<MockControlPlane>,
    sink: Arc<RecordingSink>,
    switcher: Arc<Switcher>,
    _dir: tempfile::TempDir,
}

async fn harness(control: MockControlPlane) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let control = Arc::new(control);
    let sink = Arc::new(RecordingSink::new());
    let switcher = Switcher::new(
        Arc::clone(&control) as Arc<dyn switchd::ControlPlane>,
        Arc::clone(&sink) as Arc<dyn switchd::notify::ProgressSink>,
        LockStore::new(dir.path().join("lock")),
        LINUX,
        WINDOWS,
        SwitchTiming::default(),
    )
    .await;

    Harness {
        control,
        sink,
        switcher: Arc::new(switcher),
        _dir: dir,
    }
}

/// Linux running, Windows stopped: the canonical starting point.
fn linux_active() -> MockControlPlane {
    MockControlPlane::new()
        .with_power(LINUX, PowerState::Running)
        .with_power(WINDOWS, PowerState::Stopped)
}

// =============================================================================
// Preflight skip
// =============================================================================

#[tokio::test]
async fn already_running_target_skips_with_notification() {
    let h = harness(
        MockControlPlane::new()
            .with_power(LINUX, PowerState::Stopped)
            .with_power(WINDOWS, PowerState::Running),
    )
    .await;

    let result = h.switcher.switch(Role::Windows, false).await;

    assert!(result.is_ok());
    assert_eq!(result.message, "Windows is already running");
    // No shutdown/start was issued, only the preflight query.
    assert!(h.control.control_calls().is_empty());
    assert_eq!(
        h.sink.events(),
        vec![SinkEvent::Notified(
            "Windows is already running. No action taken.".to_string()
        )]
    );
}

#[tokio::test]
async fn already_running_target_quiet_skip_sends_nothing() {
    let h = harness(
        MockControlPlane::new()
            .with_power(LINUX, PowerState::Stopped)
            .with_power(WINDOWS, PowerState::Running),
    )
    .await;

    let result = h.switcher.switch(Role::Windows, true).await;

    assert!(result.is_ok());
    assert_eq!(result.message, "Windows is already running");
    assert!(h.control.control_calls().is_empty());
    assert!(h.sink.events().is_empty());
}

// =============================================================================
// Lock and guard
// =============================================================================

#[tokio::test]
async fn locked_system_rejects_without_side_effects() {
    let h = harness(linux_active()).await;
    h.switcher.set_lock(true).await;

    let result = h.switcher.switch(Role::Windows, false).await;

    assert!(!result.is_ok());
    assert_eq!(result.message, "System is manually locked");
    // Not even a status query went out, and nothing reached the operator.
    assert!(h.control.calls().is_empty());
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn lock_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("lock");

    let first = Switcher::new(
        Arc::new(linux_active()),
        Arc::new(RecordingSink::new()),
        LockStore::new(&lock_path),
        LINUX,
        WINDOWS,
        SwitchTiming::default(),
    )
    .await;
    assert!(!first.is_locked());
    first.set_lock(true).await;

    // A fresh switcher over the same lock file stands in for a restart.
    let second = Switcher::new(
        Arc::new(linux_active()),
        Arc::new(RecordingSink::new()),
        LockStore::new(&lock_path),
        LINUX,
        WINDOWS,
        SwitchTiming::default(),
    )
    .await;
    assert!(second.is_locked());

    second.set_lock(false).await;
    let third = Switcher::new(
        Arc::new(linux_active()),
        Arc::new(RecordingSink::new()),
        LockStore::new(&lock_path),
        LINUX,
        WINDOWS,
        SwitchTiming::default(),
    )
    .await;
    assert!(!third.is_locked());
}

#[tokio::test]
async fn racing_lock_flips_leave_disk_matching_memory() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("lock");

    let switcher = Arc::new(
        Switcher::new(
            Arc::new(linux_active()),
            Arc::new(RecordingSink::new()),
            LockStore::new(&lock_path),
            LINUX,
            WINDOWS,
            SwitchTiming::default(),
        )
        .await,
    );

    // Interleaved lock and unlock calls from concurrent tasks. The flip and
    // its write are one exclusive section, so whichever call completes last
    // must win both in memory and on disk.
    let mut tasks = Vec::new();
    for i in 0..16 {
        let switcher = Arc::clone(&switcher);
        tasks.push(tokio::spawn(async move {
            switcher.set_lock(i % 2 == 0).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let on_disk = LockStore::new(&lock_path).load().await;
    assert_eq!(on_disk, switcher.is_locked());
}

#[tokio::test(start_paused = true)]
async fn concurrent_switch_is_rejected_not_queued() {
    // Stuck guest parks the first switch inside the shutdown wait, holding
    // the guard while the second call races it.
    let h = harness(linux_active().stuck_guest()).await;

    let winner = tokio::spawn({
        let switcher = Arc::clone(&h.switcher);
        async move { switcher.switch(Role::Windows, true).await }
    });

    // Let the winner run up to its first suspension point (the waiter's
    // 1 s poll sleep), at which point it holds the guard.
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let loser = h.switcher.switch(Role::Windows, true).await;
    assert!(!loser.is_ok());
    assert_eq!(loser.message, "An operation is already in progress");

    // The loser issued nothing: every mutating call in the log belongs to
    // the winner's escalation sequence.
    let winner_result = winner.await.unwrap();
    assert!(winner_result.is_ok());
    assert_eq!(
        h.control.control_calls(),
        vec![
            Call::Shutdown(LINUX),
            Call::ForceStop(LINUX),
            Call::Start(WINDOWS)
        ]
    );
}

// =============================================================================
// Escalation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn timeout_escalates_to_exactly_one_force_stop_before_start() {
    let h = harness(linux_active().stuck_guest()).await;

    let result = h.switcher.switch(Role::Windows, true).await;

    assert!(result.is_ok());
    assert_eq!(result.message, "Switched to Windows");
    assert_eq!(
        h.control.control_calls(),
        vec![
            Call::Shutdown(LINUX),
            Call::ForceStop(LINUX),
            Call::Start(WINDOWS)
        ]
    );

    // Exactly one "stuck" update, and it precedes the success update.
    let updates = h.sink.updates();
    let stuck: Vec<usize> = updates
        .iter()
        .enumerate()
        .filter(|(_, text)| text.contains("stuck. Force stopping"))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(stuck.len(), 1);
    let success = updates
        .iter()
        .position(|text| text.contains("Switched to Windows"))
        .expect("success update missing");
    assert!(stuck[0] < success);
}

#[tokio::test(start_paused = true)]
async fn force_stop_failure_aborts_without_start() {
    let h = harness(linux_active().stuck_guest().failing_force_stop()).await;

    let result = h.switcher.switch(Role::Windows, true).await;

    assert!(!result.is_ok());
    assert!(result.message.contains("Critical error stopping Linux"));
    assert_eq!(
        h.control.control_calls(),
        vec![Call::Shutdown(LINUX), Call::ForceStop(LINUX)]
    );

    let updates = h.sink.updates();
    let last = updates.last().expect("no progress updates");
    assert!(last.starts_with("Switch failed."));
}

#[tokio::test(start_paused = true)]
async fn rejected_shutdown_request_still_times_out_into_force_stop() {
    // The shutdown request itself fails; the waiter is the authoritative
    // check and escalates after the deadline.
    let h = harness(linux_active().failing_shutdown()).await;

    let result = h.switcher.switch(Role::Windows, true).await;

    assert!(result.is_ok());
    assert_eq!(
        h.control.control_calls(),
        vec![
            Call::Shutdown(LINUX),
            Call::ForceStop(LINUX),
            Call::Start(WINDOWS)
        ]
    );
}

// =============================================================================
// Start phase
// =============================================================================

#[tokio::test]
async fn happy_path_shuts_down_source_and_starts_target() {
    let h = harness(linux_active()).await;

    let result = h.switcher.switch(Role::Windows, true).await;

    assert!(result.is_ok());
    assert_eq!(result.message, "Switched to Windows");
    assert_eq!(
        h.control.control_calls(),
        vec![Call::Shutdown(LINUX), Call::Start(WINDOWS)]
    );
    assert_eq!(h.control.power_of(LINUX), PowerState::Stopped);
    assert_eq!(h.control.power_of(WINDOWS), PowerState::Running);
}

#[tokio::test]
async fn happy_path_progress_sequence() {
    let h = harness(linux_active()).await;

    h.switcher.switch(Role::Windows, true).await;

    assert_eq!(
        h.sink.events(),
        vec![
            SinkEvent::Opened("Switching to Windows... Initializing.".to_string()),
            SinkEvent::Updated("Switching to Windows... Shutting down Linux...".to_string()),
            SinkEvent::Updated("Switching to Windows... Starting Windows...".to_string()),
            SinkEvent::Updated("Switched to Windows. Windows is starting.".to_string()),
        ]
    );
}

#[tokio::test]
async fn start_failure_is_fatal() {
    let h = harness(linux_active().failing_start()).await;

    let result = h.switcher.switch(Role::Windows, true).await;

    assert!(!result.is_ok());
    assert!(result.message.contains("Failed to start Windows"));
    let updates = h.sink.updates();
    assert!(updates.last().unwrap().starts_with("Switch failed."));
}

#[tokio::test(start_paused = true)]
async fn target_running_since_preflight_is_not_restarted() {
    // The target comes up between preflight and the start phase (another
    // actor won the race): while the switch is parked in the shutdown wait,
    // flip the target to running and let the source finish stopping.
    let h = harness(linux_active().stuck_guest()).await;

    let task = tokio::spawn({
        let switcher = Arc::clone(&h.switcher);
        async move { switcher.switch(Role::Windows, true).await }
    });
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    h.control.set_power(WINDOWS, PowerState::Running);
    h.control.set_power(LINUX, PowerState::Stopped);

    let result = task.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(result.message, "Switched to Windows");
    // The re-check saw the target running: shutdown went out, start did not.
    assert_eq!(h.control.control_calls(), vec![Call::Shutdown(LINUX)]);
    assert!(h
        .sink
        .updates()
        .iter()
        .any(|text| text == "Windows is already running."));
}

#[tokio::test]
async fn preflight_query_failure_is_not_fatal() {
    // Every query fails; preflight proceeds, the source is treated as not
    // running (error state), and the start phase still issues the start.
    let control = MockControlPlane::new().failing_queries();
    let h = harness(control).await;

    let result = h.switcher.switch(Role::Windows, true).await;

    assert!(result.is_ok());
    assert_eq!(h.control.control_calls(), vec![Call::Start(WINDOWS)]);
}

// =============================================================================
// Toggle
// =============================================================================

#[tokio::test]
async fn toggle_switches_away_from_running_role() {
    let h = harness(linux_active()).await;

    let result = h.switcher.toggle(true).await;

    assert!(result.is_ok());
    assert_eq!(result.message, "Switched to Windows");
}

#[tokio::test]
async fn toggle_with_both_stopped_is_an_error() {
    let control = MockControlPlane::new()
        .with_power(LINUX, PowerState::Stopped)
        .with_power(WINDOWS, PowerState::Stopped);
    let h = harness(control).await;

    let result = h.switcher.toggle(true).await;

    assert!(!result.is_ok());
    assert!(result.message.contains("Both VMs are stopped"));
    assert!(h.control.control_calls().is_empty());
}
