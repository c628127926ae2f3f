//! `hubkeeper status`: persisted run state and the active credential.

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use std::fmt::Write;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::credentials::{mask_proxy, mask_token};

use super::Services;

/// What the status screen shows.
#[derive(Debug, Clone)]
pub(crate) struct StatusInfo {
    pub state_file: String,
    pub index: usize,
    pub total: usize,
    pub account: Option<String>,
    pub token: String,
    pub repo: String,
    pub proxy: Option<String>,
    pub proxy_count: usize,
    pub active_sandbox: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub(crate) fn format_status(info: &StatusInfo) -> String {
    let mut out = String::new();

    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   🔁 Hubkeeper Status".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    writeln!(
        &mut out,
        "  Credential: {} of {}",
        (info.index + 1).to_string().cyan().bold(),
        info.total
    )
    .unwrap();
    writeln!(
        &mut out,
        "  Account:    {}",
        info.account.as_deref().unwrap_or("unresolved").cyan()
    )
    .unwrap();
    writeln!(&mut out, "  Token:      {}", info.token.dimmed()).unwrap();
    writeln!(&mut out, "  Repo:       {}", info.repo.cyan()).unwrap();
    writeln!(
        &mut out,
        "  Proxy:      {} ({} in pool)",
        info.proxy.as_deref().unwrap_or("direct").cyan(),
        info.proxy_count
    )
    .unwrap();
    let sandbox = match info.active_sandbox {
        Some(ref name) => name.green().bold(),
        None => "none".yellow(),
    };
    writeln!(&mut out, "  Sandbox:    {sandbox}").unwrap();
    if let Some(updated) = info.updated_at {
        writeln!(
            &mut out,
            "  Updated:    {}",
            updated.format("%Y-%m-%d %H:%M:%S UTC").to_string().cyan()
        )
        .unwrap();
    }
    writeln!(&mut out, "  State file: {}", info.state_file.dimmed()).unwrap();

    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    out
}

pub async fn run(config: Config, project_dir: &Path) -> Result<()> {
    let services = Services::load(config, project_dir, false, CancellationToken::new())?;
    let store = &services.store;
    let current = store.current();

    let info = StatusInfo {
        state_file: store.state_path().display().to_string(),
        index: store.current_index(),
        total: store.len(),
        account: current.account_name.clone(),
        token: mask_token(&current.token),
        repo: current.repo_slug(),
        proxy: current.proxy.as_deref().map(mask_proxy),
        proxy_count: store.proxies().len(),
        active_sandbox: store.active_sandbox().map(String::from),
        updated_at: store.run_state().updated_at,
    };
    println!("{}", format_status(&info));
    if info.active_sandbox.is_some() {
        println!(
            "  {} the sandbox is re-verified by the next {} iteration",
            "ℹ".blue(),
            "hubkeeper run".green()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> StatusInfo {
        StatusInfo {
            state_file: "/project/.hubkeeper-state.json".to_string(),
            index: 0,
            total: 2,
            account: Some("octocat".to_string()),
            token: "ghp_…aaaa".to_string(),
            repo: "octo/hub".to_string(),
            proxy: None,
            proxy_count: 0,
            active_sandbox: Some("octo-hub-1".to_string()),
            updated_at: None,
        }
    }

    #[test]
    fn test_format_status() {
        colored::control::set_override(false);
        let output = format_status(&info());
        assert!(output.contains("Credential: 1 of 2"));
        assert!(output.contains("octocat"));
        assert!(output.contains("ghp_…aaaa"));
        assert!(output.contains("direct (0 in pool)"));
        assert!(output.contains("octo-hub-1"));
        assert!(!output.contains("Updated"));
    }

    #[test]
    fn test_format_status_unresolved_without_sandbox() {
        colored::control::set_override(false);
        let mut info = info();
        info.account = None;
        info.active_sandbox = None;
        info.updated_at = Some(Utc::now());
        let output = format_status(&info);
        assert!(output.contains("unresolved"));
        assert!(output.contains("Sandbox:    none"));
        assert!(output.contains("Updated"));
    }
}
