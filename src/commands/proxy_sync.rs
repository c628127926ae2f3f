//! `hubkeeper proxy-sync`: run the proxy tool by hand.

use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::proxy_tool::{ProxySyncTool, SyncMode};
use crate::shutdown;

pub async fn run(config: Config, project_dir: &Path, ip_auth: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    shutdown::install(cancel.clone());

    let paths = config.paths.resolved(project_dir);
    let tool = ProxySyncTool::from_paths(&paths, cancel);
    let mode = if ip_auth {
        SyncMode::IpAuth
    } else {
        SyncMode::TestAndSave
    };

    tool.run_mode(mode).await?;

    let proxies = tool.load();
    println!(
        "\n{} Proxy tool finished, {} proxies available",
        "✓".green(),
        proxies.len().to_string().cyan().bold()
    );
    if proxies.is_empty() {
        println!(
            "  {} no working proxies; the loop will connect directly",
            "⚠".yellow()
        );
    }
    Ok(())
}
