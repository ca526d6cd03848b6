//! Switch orchestrator.
//!
//! Exactly one of the two roles is meant to run at a time. `switch` owns
//! the whole transition: preflight check of the target, graceful shutdown
//! of the source with a bounded wait, escalation to a forced stop on
//! timeout, start of the target, and one progress message edited in place
//! at every phase.
//!
//! ## Per-invocation state machine
//!
//! ```text
//! Idle -> PreflightCheck -> ShuttingDownSource -> (AwaitingStop | ForceStopping)
//!      -> StartingTarget -> Done(ok | error)
//! ```
//!
//! Two gates sit in front of the machine: a persisted manual lock that
//! disables switching entirely, and a single-slot guard that rejects (never
//! queues) a second switch while one is in flight.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::control::{ControlPlane, PowerState, VmId};
use crate::lockfile::LockStore;
use crate::notify::{ProgressHandle, ProgressSink};

/// One of the two mutually-exclusive VM identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Linux,
    Windows,
}

impl Role {
    /// The role being displaced when switching to `self`.
    pub fn other(self) -> Role {
        match self {
            Role::Linux => Role::Windows,
            Role::Windows => Role::Linux,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Linux => "Linux",
            Role::Windows => "Windows",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchStatus {
    Ok,
    Error,
}

/// Terminal outcome of a switch, returned to the caller regardless of what
/// was pushed to the progress sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchResult {
    pub status: SwitchStatus,
    pub message: String,
}

impl SwitchResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: SwitchStatus::Ok,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SwitchStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SwitchStatus::Ok
    }
}

/// Verdict of one phase: keep going, short-circuit with a result, or abort.
enum StepOutcome {
    Continue,
    Skip(SwitchResult),
    Abort(SwitchResult),
}

/// Snapshot of both roles plus the manual lock.
#[derive(Debug, Clone, Serialize)]
pub struct FullStatus {
    pub linux: PowerState,
    pub windows: PowerState,
    pub locked: bool,
}

/// Tunables for the shutdown wait and escalation.
#[derive(Debug, Clone)]
pub struct SwitchTiming {
    /// How long to wait for a graceful shutdown before force stopping.
    pub shutdown_timeout: Duration,

    /// Cadence of the shutdown waiter's status polls.
    pub poll_interval: Duration,

    /// Pause after a forced stop before starting the target.
    pub settle_delay: Duration,
}

impl Default for SwitchTiming {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(3),
        }
    }
}

/// Orchestrates transitions between the two roles.
pub struct Switcher {
    control: Arc<dyn ControlPlane>,
    sink: Arc<dyn ProgressSink>,
    lock_store: LockStore,

    /// Operator-set lock disabling all switching. Persisted via
    /// `lock_store`; this flag is authoritative at runtime.
    manual_lock: AtomicBool,

    /// Single-slot guard: at most one switch transition in flight.
    op_guard: Mutex<()>,

    /// Serializes lock flips with their persistence so the on-disk value
    /// always reflects the last completed `set_lock`.
    lock_update: Mutex<()>,

    linux_vmid: VmId,
    windows_vmid: VmId,
    timing: SwitchTiming,
}

impl Switcher {
    /// Build the orchestrator, restoring the persisted lock state.
    pub async fn new(
        control: Arc<dyn ControlPlane>,
        sink: Arc<dyn ProgressSink>,
        lock_store: LockStore,
        linux_vmid: VmId,
        windows_vmid: VmId,
        timing: SwitchTiming,
    ) -> Self {
        let locked = lock_store.load().await;
        Self {
            control,
            sink,
            lock_store,
            manual_lock: AtomicBool::new(locked),
            op_guard: Mutex::new(()),
            lock_update: Mutex::new(()),
            linux_vmid,
            windows_vmid,
            timing,
        }
    }

    fn vmid(&self, role: Role) -> VmId {
        match role {
            Role::Linux => self.linux_vmid,
            Role::Windows => self.windows_vmid,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.manual_lock.load(Ordering::SeqCst)
    }

    /// Flip the manual lock and persist it best effort. The in-memory flag
    /// stays authoritative even if the write fails. Flip and write happen
    /// under one lock, so concurrent calls cannot leave disk and memory
    /// disagreeing.
    pub async fn set_lock(&self, locked: bool) {
        let _update = self.lock_update.lock().await;
        self.manual_lock.store(locked, Ordering::SeqCst);
        info!(locked, "Manual lock updated");
        self.lock_store.save(locked).await;
    }

    /// Power state of a role. Control-plane failures are logged and mapped
    /// to `PowerState::Error`; this never fails the caller.
    pub async fn power_state(&self, role: Role) -> PowerState {
        match self.control.power_state(self.vmid(role)).await {
            Ok(state) => state,
            Err(e) => {
                error!(role = %role, vmid = self.vmid(role), error = %e, "Failed to query power state");
                PowerState::Error
            }
        }
    }

    /// Both roles queried independently, plus the lock flag. A failing
    /// query for one role does not block the other.
    pub async fn full_status(&self) -> FullStatus {
        let (linux, windows) = tokio::join!(
            self.power_state(Role::Linux),
            self.power_state(Role::Windows)
        );
        FullStatus {
            linux,
            windows,
            locked: self.is_locked(),
        }
    }

    /// Switch the active role to `target`.
    ///
    /// `quiet_on_skip` suppresses the one-shot notification when the target
    /// turns out to be running already (used by the HTTP surface, where the
    /// caller gets the result synchronously anyway).
    pub async fn switch(&self, target: Role, quiet_on_skip: bool) -> SwitchResult {
        if self.is_locked() {
            return SwitchResult::error("System is manually locked");
        }

        // Non-blocking: a losing caller is rejected, never queued. The
        // guard is released on every exit path when `_guard` drops.
        let Ok(_guard) = self.op_guard.try_lock() else {
            return SwitchResult::error("An operation is already in progress");
        };

        self.run_switch(target, quiet_on_skip).await
    }

    /// Switch away from whichever role currently runs. Errors when neither
    /// runs, since the target would be ambiguous.
    pub async fn toggle(&self, quiet_on_skip: bool) -> SwitchResult {
        let status = self.full_status().await;
        if status.linux == PowerState::Running {
            self.switch(Role::Windows, quiet_on_skip).await
        } else if status.windows == PowerState::Running {
            self.switch(Role::Linux, quiet_on_skip).await
        } else {
            SwitchResult::error("Both VMs are stopped. Use an explicit switch command.")
        }
    }

    async fn run_switch(&self, target: Role, quiet_on_skip: bool) -> SwitchResult {
        let source = target.other();

        match self.preflight(target, quiet_on_skip).await {
            StepOutcome::Skip(result) | StepOutcome::Abort(result) => return result,
            StepOutcome::Continue => {}
        }

        info!(target = %target, vmid = self.vmid(target), "Switching roles");

        let progress = Progress::open(&*self.sink, target).await;

        if let StepOutcome::Abort(result) = self.shutdown_source(source, target, &progress).await {
            return result;
        }

        self.start_target(target, &progress).await
    }

    /// Skip the transition when the target already runs. A failed check is
    /// non-fatal: the start phase re-checks before acting.
    async fn preflight(&self, target: Role, quiet_on_skip: bool) -> StepOutcome {
        match self.power_state(target).await {
            PowerState::Running => {
                info!(target = %target, "Skipping switch: target already running");
                if !quiet_on_skip {
                    self.sink
                        .notify_once(&format!("{target} is already running. No action taken."))
                        .await;
                }
                StepOutcome::Skip(SwitchResult::ok(format!("{target} is already running")))
            }
            PowerState::Error => {
                warn!(target = %target, "Preflight status check failed, proceeding");
                StepOutcome::Continue
            }
            _ => StepOutcome::Continue,
        }
    }

    /// Graceful shutdown of the source with bounded wait, escalating to a
    /// forced stop on timeout. Only a failed forced stop aborts the switch.
    async fn shutdown_source(
        &self,
        source: Role,
        target: Role,
        progress: &Progress<'_>,
    ) -> StepOutcome {
        progress
            .update(&format!("Switching to {target}... Shutting down {source}..."))
            .await;

        if self.power_state(source).await != PowerState::Running {
            return StepOutcome::Continue;
        }

        // A rejected shutdown request is not fatal: the waiter below is the
        // authoritative check and times out into the escalation path.
        if let Err(e) = self.control.request_shutdown(self.vmid(source)).await {
            error!(source = %source, error = %e, "Shutdown request failed");
        }

        if self
            .wait_for_stop(source, self.timing.shutdown_timeout)
            .await
        {
            return StepOutcome::Continue;
        }

        warn!(source = %source, "Graceful shutdown timed out, force stopping");
        progress
            .update(&format!(
                "Switching to {target}... {source} stuck. Force stopping..."
            ))
            .await;

        if let Err(e) = self.control.request_force_stop(self.vmid(source)).await {
            let message = format!("Critical error stopping {source}: {e}");
            error!(source = %source, error = %e, "Force stop failed");
            progress.update(&format!("Switch failed. {message}")).await;
            return StepOutcome::Abort(SwitchResult::error(message));
        }

        // Give the hypervisor a moment to finish killing the guest.
        tokio::time::sleep(self.timing.settle_delay).await;
        StepOutcome::Continue
    }

    /// Start the target unless it came up on its own since preflight.
    /// A failed start request is fatal.
    async fn start_target(&self, target: Role, progress: &Progress<'_>) -> SwitchResult {
        progress
            .update(&format!("Switching to {target}... Starting {target}..."))
            .await;

        if self.power_state(target).await != PowerState::Running {
            if let Err(e) = self.control.request_start(self.vmid(target)).await {
                let message = format!("Failed to start {target}: {e}");
                error!(target = %target, error = %e, "Start request failed");
                progress.update(&format!("Switch failed. {message}")).await;
                return SwitchResult::error(message);
            }
            progress
                .update(&format!("Switched to {target}. {target} is starting."))
                .await;
        } else {
            progress
                .update(&format!("{target} is already running."))
                .await;
        }

        info!(target = %target, "Switch complete");
        SwitchResult::ok(format!("Switched to {target}"))
    }

    /// Poll once per second until the role reports `stopped` or the
    /// deadline passes. Cooperative: other tasks keep running throughout.
    async fn wait_for_stop(&self, role: Role, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.power_state(role).await == PowerState::Stopped {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }
    }
}

/// One logical progress message: opened once, then edited in place. All
/// updates are no-ops when the channel never opened.
struct Progress<'a> {
    sink: &'a dyn ProgressSink,
    handle: Option<ProgressHandle>,
}

impl<'a> Progress<'a> {
    async fn open(sink: &'a dyn ProgressSink, target: Role) -> Progress<'a> {
        let handle = sink
            .open(&format!("Switching to {target}... Initializing."))
            .await;
        Progress { sink, handle }
    }

    async fn update(&self, text: &str) {
        if let Some(handle) = self.handle {
            self.sink.update(handle, text).await;
        }
    }
}
