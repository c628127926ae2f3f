//! `hubkeeper logs`: follow the active sandbox's bootstrap log.

use anyhow::{bail, Result};
use colored::Colorize;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::sandbox::{BootstrapStage, HealthVerdict};
use crate::shutdown;

use super::Services;

pub(crate) fn format_verdict(verdict: HealthVerdict) -> String {
    match verdict {
        HealthVerdict::Healthy => format!("{} Bootstrap finished successfully", "✓".green()),
        HealthVerdict::BootstrapFailed(BootstrapStage::ProxySync) => {
            format!("{} Bootstrap failed during proxy sync", "✗".red())
        }
        HealthVerdict::BootstrapFailed(BootstrapStage::Deploy) => {
            format!("{} Bootstrap failed during bot deployment", "✗".red())
        }
        HealthVerdict::TimedOut => format!("{} No bootstrap marker before the timeout", "⚠".yellow()),
        HealthVerdict::Gone => format!("{} The sandbox no longer exists", "✗".red()),
        HealthVerdict::Cancelled => format!("{} Interrupted", "ℹ".blue()),
    }
}

pub async fn run(config: Config, project_dir: &Path) -> Result<()> {
    let cancel = CancellationToken::new();
    shutdown::install(cancel.clone());

    let services = Services::load(config, project_dir, false, cancel)?;
    let lifecycle = services.lifecycle(services.gateway())?;
    let credential = services.store.current().clone();

    let name = match services.store.active_sandbox() {
        Some(name) => name.to_string(),
        None => match lifecycle.list_tagged(&credential).await?.into_iter().next() {
            Some(sandbox) => sandbox.name,
            None => bail!("No sandbox found for {}", credential.label()),
        },
    };

    println!("{} Following bootstrap log of {}\n", "📜".yellow(), name.cyan().bold());
    let timeout = Duration::from_secs(services.config.polling.health_max_minutes * 60);
    let mut sink = |line: &str| println!("{line}");
    let verdict = lifecycle
        .follow_bootstrap_log(&credential, &name, timeout, &mut sink)
        .await?;

    println!("\n{}", format_verdict(verdict));
    Ok(())
}
