//! `hubkeeper validate`: check every token against the platform API.

use anyhow::{bail, Result};
use colored::Colorize;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::credentials::{mask_proxy, mask_token};
use crate::quota::QuotaSnapshot;

use super::Services;

/// Outcome for one credential.
#[derive(Debug, Clone)]
pub(crate) struct AccountCheck {
    pub index: usize,
    pub token: String,
    pub proxy: Option<String>,
    pub login: Result<String, String>,
    pub billing: Option<QuotaSnapshot>,
}

pub(crate) fn format_check(check: &AccountCheck) -> String {
    let proxy = check.proxy.as_deref().unwrap_or("direct");
    let head = match &check.login {
        Ok(login) => format!(
            "  {} #{} {} {} via {}",
            "✓".green(),
            check.index + 1,
            login.cyan().bold(),
            check.token.dimmed(),
            proxy.dimmed()
        ),
        Err(e) => format!(
            "  {} #{} {} {}",
            "✗".red(),
            check.index + 1,
            check.token.dimmed(),
            e.red()
        ),
    };

    match &check.billing {
        None => head,
        Some(snapshot) => {
            let detail = match &snapshot.error {
                Some(e) => format!("billing: {e}").red(),
                None if snapshot.quota_ok => format!(
                    "{:.1}/{:.0} core-hours used, {:.1}h left",
                    snapshot.core_hours_used, snapshot.included_core_hours, snapshot.hours_remaining
                )
                .green(),
                None => format!(
                    "{:.1}/{:.0} core-hours used, {:.1}h left (below safety buffer)",
                    snapshot.core_hours_used, snapshot.included_core_hours, snapshot.hours_remaining
                )
                .yellow(),
            };
            format!("{head}\n      {detail}")
        }
    }
}

pub async fn run(config: Config, project_dir: &Path, billing: bool) -> Result<()> {
    let mut services = Services::load(config, project_dir, false, CancellationToken::new())?;
    let quota = services.quota();
    let store = &mut services.store;

    println!(
        "\n{} {} credentials for {}, {} proxies",
        "🔑".yellow(),
        store.len(),
        store.current().repo_slug().cyan(),
        store.proxies().len()
    );

    let mut valid = 0;
    for index in 0..store.len() {
        let login = quota
            .resolve_account(store, index, &services.cancel)
            .await
            .map_err(|e| e.to_string());
        let billing = if billing && login.is_ok() {
            Some(quota.billing_for(store, index, &services.cancel).await)
        } else {
            None
        };
        let credential = &store.credentials()[index];
        let check = AccountCheck {
            index,
            token: mask_token(&credential.token),
            proxy: credential.proxy.as_deref().map(mask_proxy),
            login,
            billing,
        };
        if check.login.is_ok() {
            valid += 1;
        }
        println!("{}", format_check(&check));
    }

    println!("\n  {valid}/{} credentials valid", store.len());
    if valid == 0 {
        bail!("No valid credentials");
    }
    Ok(())
}
