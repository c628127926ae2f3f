//! Per-bot secret upload.
//!
//! For every enabled bot in the registry, each allow-listed file found under
//! `<secrets_root>/<bot path>/` is copied to `/workspaces/<repo>/<bot path>/`.
//! Uploads overwrite, so running twice yields the same remote files.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bots::BotRegistry;
use crate::credentials::Credential;
use crate::gateway::{GatewayError, RemoteGateway};

/// Secret file names uploaded when no allow-list file exists.
const DEFAULT_ALLOW_LIST: &[&str] = &[
    "pk.txt",
    "privatekey.txt",
    "token.txt",
    "tokens.txt",
    ".env",
    "config.json",
    "data.txt",
    "query.txt",
    "wallet.txt",
    "settings.yaml",
    "mnemonics.txt",
];

/// Read the allow-list (one file name per line, `#` comments), or the built-in default.
pub fn load_allow_list(path: &Path) -> Vec<String> {
    let parsed: Vec<String> = fs::read_to_string(path)
        .map(|content| {
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    if parsed.is_empty() {
        DEFAULT_ALLOW_LIST.iter().map(|s| (*s).to_string()).collect()
    } else {
        parsed
    }
}

/// Counts from one upload pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: usize,
    /// Bots without a local secrets directory.
    pub skipped: usize,
    pub failed: usize,
}

/// One file to copy.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UploadItem {
    local: PathBuf,
    remote_dir: String,
    remote: String,
}

#[derive(Debug, Clone)]
pub struct SecretUploader {
    registry: BotRegistry,
    secrets_root: PathBuf,
    allow_list: Vec<String>,
    proxy_tool_files: Vec<PathBuf>,
    proxy_tool_remote_dir: String,
    command_timeout: Duration,
}

impl SecretUploader {
    pub fn new(
        registry: BotRegistry,
        secrets_root: PathBuf,
        allow_list: Vec<String>,
        proxy_tool_files: Vec<PathBuf>,
        proxy_tool_remote_dir: String,
        command_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            secrets_root,
            allow_list,
            proxy_tool_files,
            proxy_tool_remote_dir,
            command_timeout,
        }
    }

    /// Plan the copies for a repository workspace. Returns the items and the number of skipped bots.
    fn plan(&self, repo: &str) -> (Vec<UploadItem>, usize) {
        let workspace = format!("/workspaces/{repo}");
        let mut items = Vec::new();
        let mut skipped = 0;

        for bot in self.registry.uploadable() {
            let rel = bot.path.trim_matches('/');
            let local_dir = self.secrets_root.join(rel);
            if !local_dir.is_dir() {
                debug!(bot = %bot.name, dir = %local_dir.display(), "no local secrets, skipping");
                skipped += 1;
                continue;
            }
            let remote_dir = format!("{workspace}/{rel}");
            for file in &self.allow_list {
                let local = local_dir.join(file);
                if local.is_file() {
                    items.push(UploadItem {
                        local,
                        remote: format!("{remote_dir}/{file}"),
                        remote_dir: remote_dir.clone(),
                    });
                }
            }
        }

        let tool_dir = format!("{workspace}/{}", self.proxy_tool_remote_dir.trim_matches('/'));
        for local in &self.proxy_tool_files {
            let Some(file_name) = local.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if local.is_file() {
                items.push(UploadItem {
                    local: local.clone(),
                    remote: format!("{tool_dir}/{file_name}"),
                    remote_dir: tool_dir.clone(),
                });
            } else {
                debug!(file = %local.display(), "proxy tool file missing, skipping");
            }
        }

        (items, skipped)
    }

    /// Copy every planned file into the sandbox.
    ///
    /// Individual copy failures are counted, not fatal. Only cancellation
    /// aborts the pass.
    pub async fn upload(
        &self,
        gateway: &dyn RemoteGateway,
        credential: &Credential,
        name: &str,
    ) -> Result<UploadSummary, GatewayError> {
        let (items, skipped) = self.plan(&credential.repo);
        let mut summary = UploadSummary {
            skipped,
            ..UploadSummary::default()
        };
        if items.is_empty() {
            info!(sandbox = name, "no secret files to upload");
            return Ok(summary);
        }

        let dirs: BTreeSet<&str> = items.iter().map(|i| i.remote_dir.as_str()).collect();
        let quoted: Vec<String> = dirs.iter().map(|d| shell_words::quote(d).into_owned()).collect();
        let mkdir = format!("mkdir -p {}", quoted.join(" "));
        match gateway.run_remote(credential, name, &mkdir, self.command_timeout).await {
            Ok(_) => {}
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => warn!(sandbox = name, error = %e, "failed to create remote secret directories"),
        }

        for item in &items {
            match gateway.copy_to(credential, name, &item.local, &item.remote).await {
                Ok(()) => summary.uploaded += 1,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(
                        sandbox = name,
                        file = %item.local.display(),
                        error = %e,
                        "secret upload failed"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            sandbox = name,
            uploaded = summary.uploaded,
            skipped = summary.skipped,
            failed = summary.failed,
            "secret upload finished"
        );
        Ok(summary)
    }
}
