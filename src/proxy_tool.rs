//! External proxy tool.
//!
//! The proxy tool lives in its own directory and is run as
//! `<command> main.py --ip-auth-only` (re-authorise this machine's IP with the
//! proxy provider) or `<command> main.py --test-and-save-only` (test the pool
//! and write the working proxies to `success_proxy.txt`).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PathsConfig;
use crate::credentials::load_proxies;

const TOOL_SCRIPT: &str = "main.py";
const TOOL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// One invocation mode of the proxy tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    IpAuth,
    TestAndSave,
}

impl SyncMode {
    fn flag(self) -> &'static str {
        match self {
            Self::IpAuth => "--ip-auth-only",
            Self::TestAndSave => "--test-and-save-only",
        }
    }
}

/// Refreshes the local proxy list when every proxy keeps failing.
#[async_trait]
pub trait ProxyRecovery: Send + Sync {
    /// Run the recovery and return the reloaded proxy list.
    async fn recover(&self) -> Result<Vec<String>>;
}

/// Runs the proxy tool as a subprocess.
#[derive(Debug, Clone)]
pub struct ProxySyncTool {
    command: String,
    dir: PathBuf,
    primary: PathBuf,
    fallback: PathBuf,
    timeout: Duration,
    cancel: CancellationToken,
}

impl ProxySyncTool {
    /// Build from resolved paths.
    pub fn from_paths(paths: &PathsConfig, cancel: CancellationToken) -> Self {
        Self {
            command: paths.proxy_tool_command.clone(),
            dir: paths.proxy_tool_dir.clone(),
            primary: paths.proxy_file.clone(),
            fallback: paths.fallback_proxy_file.clone(),
            timeout: TOOL_TIMEOUT,
            cancel,
        }
    }

    /// Run the tool once in `mode`.
    pub async fn run_mode(&self, mode: SyncMode) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!("Proxy tool not started: shutdown requested");
        }
        if !self.dir.is_dir() {
            bail!("Proxy tool directory not found: {}", self.dir.display());
        }

        let mut words = shell_words::split(&self.command)
            .with_context(|| format!("Invalid proxy tool command: {}", self.command))?;
        if words.is_empty() {
            bail!("Proxy tool command is empty");
        }
        let program = words.remove(0);

        info!(mode = mode.flag(), dir = %self.dir.display(), "running proxy tool");
        let child = Command::new(&program)
            .args(&words)
            .arg(TOOL_SCRIPT)
            .arg(mode.flag())
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to launch proxy tool: {program}"))?;

        let output = tokio::select! {
            () = self.cancel.cancelled() => bail!("Proxy tool interrupted by shutdown"),
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Ok(output) => output.context("Failed to wait for proxy tool")?,
                Err(_) => bail!("Proxy tool timed out after {} seconds", self.timeout.as_secs()),
            },
        };

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(target: "hubkeeper::proxy_tool", "{line}");
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Proxy tool {} failed ({}): {}",
                mode.flag(),
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }

    /// Current proxy list on disk.
    pub fn load(&self) -> Vec<String> {
        load_proxies(&self.primary, &self.fallback)
    }
}

#[async_trait]
impl ProxyRecovery for ProxySyncTool {
    async fn recover(&self) -> Result<Vec<String>> {
        self.run_mode(SyncMode::IpAuth).await?;
        self.run_mode(SyncMode::TestAndSave).await?;
        let proxies = self.load();
        info!(count = proxies.len(), "proxy list reloaded");
        Ok(proxies)
    }
}
