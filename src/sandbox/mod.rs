//! Remote sandbox lifecycle.
//!
//! Finds or creates the one tagged sandbox for the active credential, drives
//! it to a healthy state, and re-verifies it during keep-alive:
//! - `health`: bootstrap marker polling and log tailing
//! - `upload`: per-bot secret upload
//! - `lifecycle`: the state machine itself

mod error;
pub(crate) mod health;
mod lifecycle;
mod upload;

pub use error::SandboxError;
pub use health::{BootstrapMarkers, BootstrapStage, HealthVerdict};
pub use lifecycle::{EnsureOutcome, LifecycleManager, LifecycleTimings, SandboxHealth};
pub use upload::{load_allow_list, SecretUploader, UploadSummary};

/// Platform lifecycle states, collapsed to what the manager acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateClass {
    /// Provisioning, Creating, Starting, Queued, Rebuilding: wait.
    Transient,
    /// Candidate-healthy.
    Available,
    /// Stopped or Shutdown: issue a start.
    NeedsStart,
    /// Failed, Error, Deleted, or anything unrecognised: delete.
    TerminalBad,
}

impl StateClass {
    /// Map a raw platform state. Unknown states fail closed as `TerminalBad`.
    pub fn classify(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "provisioning" | "creating" | "starting" | "queued" | "rebuilding" => Self::Transient,
            "available" => Self::Available,
            "stopped" | "shutdown" => Self::NeedsStart,
            _ => Self::TerminalBad,
        }
    }
}
