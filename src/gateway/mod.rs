//! Remote command gateway.
//!
//! The only place that shells out to the remote-access CLI. Each call injects
//! the credential's token (and proxy, when enabled), enforces a timeout,
//! observes cancellation and returns a classified [`GatewayError`].

mod error;
#[cfg(test)]
pub(crate) mod fake;
mod gh;

pub use error::{classify_failure, is_benign_stop, GatewayError};
pub use gh::{GhGateway, GhOptions};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::credentials::Credential;

/// A sandbox as reported by the platform's list call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Parameters of a create call.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub display_tag: String,
    pub machine_type: String,
    pub idle_timeout: String,
}

/// Returned by a streaming callback for each line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineControl {
    Continue,
    Stop,
}

/// How a streamed command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The command exited successfully on its own.
    Completed,
    /// The callback asked to stop and the command was killed.
    Stopped,
}

/// Operations on the remote sandbox platform.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// List every sandbox on the credential's account.
    async fn list_sandboxes(&self, credential: &Credential) -> Result<Vec<SandboxInfo>, GatewayError>;

    /// Raw lifecycle state string of one sandbox.
    async fn sandbox_state(&self, credential: &Credential, name: &str) -> Result<String, GatewayError>;

    /// Create a sandbox on the credential's repository. Returns the CLI's stdout.
    async fn create_sandbox(
        &self,
        credential: &Credential,
        request: &CreateRequest,
    ) -> Result<String, GatewayError>;

    async fn start_sandbox(&self, credential: &Credential, name: &str) -> Result<(), GatewayError>;

    async fn stop_sandbox(&self, credential: &Credential, name: &str) -> Result<(), GatewayError>;

    async fn delete_sandbox(&self, credential: &Credential, name: &str) -> Result<(), GatewayError>;

    /// Run a shell command inside the sandbox over SSH and capture stdout.
    async fn run_remote(
        &self,
        credential: &Credential,
        name: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<String, GatewayError>;

    /// Run a remote command, handing each stdout line to `on_line` until it
    /// returns [`LineControl::Stop`] or the command exits.
    async fn stream_remote(
        &self,
        credential: &Credential,
        name: &str,
        command: &str,
        timeout: Duration,
        on_line: &mut (dyn for<'l> FnMut(&'l str) -> LineControl + Send),
    ) -> Result<StreamEnd, GatewayError>;

    /// Copy a local file into the sandbox.
    async fn copy_to(
        &self,
        credential: &Credential,
        name: &str,
        local: &Path,
        remote: &str,
    ) -> Result<(), GatewayError>;
}
