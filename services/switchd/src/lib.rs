//! switchd library
//!
//! Keeps exactly one of two Proxmox VMs ("roles") running and orchestrates
//! transitions between them on demand.
//!
//! ## Architecture
//!
//! - **Switcher**: the single-flight state machine owning a transition:
//!   preflight, graceful shutdown with bounded wait, forced-stop
//!   escalation, target start, progress reporting
//! - **ControlPlane**: narrow capability trait over VM power operations
//!   (Proxmox in production, scripted mock in tests)
//! - **ProgressSink**: one logical operator message per switch, edited in
//!   place (Telegram in production, recorder in tests)
//! - **Triggers**: axum HTTP API and a Telegram command loop, both thin
//!   wiring over the switcher

pub mod api;
pub mod bot;
pub mod config;
pub mod control;
pub mod lockfile;
pub mod notify;
pub mod proxmox;
pub mod switcher;
pub mod telegram;

// Re-export commonly used types
pub use control::{ControlPlane, MockControlPlane, PowerState};
pub use switcher::{Role, SwitchResult, Switcher};
