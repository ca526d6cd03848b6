//! Control-plane capability for VM power operations.
//!
//! The orchestrator reaches the hypervisor only through this narrow
//! interface: query power state, request a graceful shutdown, force stop,
//! start. `ProxmoxClient` is the production implementation; a mock
//! implementation is provided for testing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Numeric VM identifier as used by the hypervisor.
pub type VmId = u32;

/// Power state of a VM, derived fresh on every query and never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Stopped,
    Unknown,
    Error,
}

impl PowerState {
    /// Map a raw status string from the control plane.
    pub fn from_api(raw: &str) -> Self {
        match raw {
            "running" => PowerState::Running,
            "stopped" => PowerState::Stopped,
            _ => PowerState::Unknown,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PowerState::Running => "running",
            PowerState::Stopped => "stopped",
            PowerState::Unknown => "unknown",
            PowerState::Error => "error",
        };
        f.write_str(label)
    }
}

/// VM power operations.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Query the current power state of a VM.
    async fn power_state(&self, vmid: VmId) -> Result<PowerState>;

    /// Ask the guest to shut down gracefully.
    async fn request_shutdown(&self, vmid: VmId) -> Result<()>;

    /// Kill the VM without giving the guest a say.
    async fn request_force_stop(&self, vmid: VmId) -> Result<()>;

    /// Start the VM.
    async fn request_start(&self, vmid: VmId) -> Result<()>;
}

// =============================================================================
// Mock implementation
// =============================================================================

/// A recorded control-plane call, in issue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Query(VmId),
    Shutdown(VmId),
    ForceStop(VmId),
    Start(VmId),
}

#[derive(Debug, Default)]
struct MockState {
    power: HashMap<VmId, PowerState>,
    calls: Vec<Call>,
    stuck_guest: bool,
    fail_shutdown: bool,
    fail_force_stop: bool,
    fail_start: bool,
    fail_queries: bool,
}

/// Scriptable control plane for tests.
///
/// By default a shutdown request transitions the VM to `stopped`
/// immediately. `stuck_guest` keeps the VM running until a force stop,
/// which is how the escalation path gets exercised.
pub struct MockControlPlane {
    inner: Mutex<MockState>,
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockState::default()),
        }
    }

    /// Set the initial power state of a VM.
    pub fn with_power(self, vmid: VmId, state: PowerState) -> Self {
        self.inner.lock().unwrap().power.insert(vmid, state);
        self
    }

    /// Guest ignores graceful shutdown requests.
    pub fn stuck_guest(self) -> Self {
        self.inner.lock().unwrap().stuck_guest = true;
        self
    }

    /// Shutdown requests fail at the transport level.
    pub fn failing_shutdown(self) -> Self {
        self.inner.lock().unwrap().fail_shutdown = true;
        self
    }

    /// Force-stop requests fail.
    pub fn failing_force_stop(self) -> Self {
        self.inner.lock().unwrap().fail_force_stop = true;
        self
    }

    /// Start requests fail.
    pub fn failing_start(self) -> Self {
        self.inner.lock().unwrap().fail_start = true;
        self
    }

    /// Status queries fail.
    pub fn failing_queries(self) -> Self {
        self.inner.lock().unwrap().fail_queries = true;
        self
    }

    /// All recorded calls, including status queries.
    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Recorded mutating calls (shutdown/force-stop/start), queries omitted.
    pub fn control_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Query(_)))
            .collect()
    }

    /// Current scripted power state of a VM.
    pub fn power_of(&self, vmid: VmId) -> PowerState {
        self.inner
            .lock()
            .unwrap()
            .power
            .get(&vmid)
            .copied()
            .unwrap_or(PowerState::Unknown)
    }

    /// Mutate the scripted power state mid-test.
    pub fn set_power(&self, vmid: VmId, state: PowerState) {
        self.inner.lock().unwrap().power.insert(vmid, state);
    }
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn power_state(&self, vmid: VmId) -> Result<PowerState> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Query(vmid));
        if inner.fail_queries {
            anyhow::bail!("mock control plane: query failure");
        }
        Ok(inner.power.get(&vmid).copied().unwrap_or(PowerState::Unknown))
    }

    async fn request_shutdown(&self, vmid: VmId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Shutdown(vmid));
        if inner.fail_shutdown {
            anyhow::bail!("mock control plane: shutdown rejected");
        }
        if !inner.stuck_guest {
            inner.power.insert(vmid, PowerState::Stopped);
        }
        Ok(())
    }

    async fn request_force_stop(&self, vmid: VmId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::ForceStop(vmid));
        if inner.fail_force_stop {
            anyhow::bail!("mock control plane: force stop failure");
        }
        inner.power.insert(vmid, PowerState::Stopped);
        Ok(())
    }

    async fn request_start(&self, vmid: VmId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Start(vmid));
        if inner.fail_start {
            anyhow::bail!("mock control plane: start failure");
        }
        inner.power.insert(vmid, PowerState::Running);
        Ok(())
    }
}
