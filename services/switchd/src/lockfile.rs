//! Persisted manual-lock flag.
//!
//! Single-line file containing exactly `LOCKED` or `UNLOCKED`. A missing,
//! unreadable or corrupt file reads back as unlocked, so losing the file
//! can never wedge the system in a locked state. Writes are best effort:
//! a persistence failure is logged and the in-memory flag stays
//! authoritative for the rest of the process lifetime.

use std::path::PathBuf;

use tracing::{error, info};

const LOCKED: &str = "LOCKED";
const UNLOCKED: &str = "UNLOCKED";

/// File-backed store for the manual lock flag.
pub struct LockStore {
    path: PathBuf,
}

impl LockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the persisted lock state. Never fails the caller.
    pub async fn load(&self) -> bool {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let locked = content.trim() == LOCKED;
                if locked {
                    info!(path = %self.path.display(), "Restored LOCKED state");
                }
                locked
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to load lock state");
                false
            }
        }
    }

    /// Persist the lock state. IO failures are logged and swallowed.
    pub async fn save(&self, locked: bool) {
        let content = if locked { LOCKED } else { UNLOCKED };
        if let Err(e) = tokio::fs::write(&self.path, content).await {
            error!(path = %self.path.display(), error = %e, "Failed to save lock state");
        }
    }
}
