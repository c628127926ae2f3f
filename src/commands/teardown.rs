//! `hubkeeper teardown`: stop or delete the current credential's sandbox.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::shutdown;

use super::Services;

pub async fn run(config: Config, project_dir: &Path, stop_only: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    shutdown::install(cancel.clone());

    let mut services = Services::load(config, project_dir, false, cancel)?;
    let lifecycle = services.lifecycle(services.gateway())?;
    let credential = services.store.current().clone();

    let names = lifecycle
        .teardown_tagged(&credential, stop_only)
        .await
        .with_context(|| format!("Failed to tear down sandboxes of {}", credential.label()))?;

    services.store.set_active_sandbox(None)?;

    let verb = if stop_only { "Stopped" } else { "Deleted" };
    if names.is_empty() {
        println!("\n{} No tagged sandbox for {}.", "ℹ".blue(), credential.label().cyan());
    } else {
        for name in &names {
            println!("{} {verb} {}", "✓".green(), name.cyan());
        }
    }
    Ok(())
}
