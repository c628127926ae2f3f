//! Formatting functions for rotation loop output.
//!
//! Pure functions returning strings; the command does the printing.

use chrono::Duration;
use colored::Colorize;
use std::fmt::Write;

use crate::credentials::{mask_proxy, CredentialStore};

use super::{LoopReport, TerminationReason};

/// Banner information for display at loop start.
#[derive(Debug, Clone)]
pub(crate) struct BannerInfo {
    pub account: String,
    pub index: usize,
    pub total: usize,
    pub repo: String,
    pub proxy: Option<String>,
    pub proxy_count: usize,
    pub use_proxy: bool,
    pub keep_alive_mins: u64,
    pub max_iterations: Option<u32>,
}

impl BannerInfo {
    pub fn new(store: &CredentialStore, use_proxy: bool, keep_alive_mins: u64, max_iterations: Option<u32>) -> Self {
        let current = store.current();
        Self {
            account: current.label(),
            index: store.current_index(),
            total: store.len(),
            repo: current.repo_slug(),
            proxy: current.proxy.as_deref().map(mask_proxy),
            proxy_count: store.proxies().len(),
            use_proxy,
            keep_alive_mins,
            max_iterations,
        }
    }
}

/// Formats a duration for display (e.g., "2h 5m 30s").
pub(crate) fn format_duration(duration: &Duration) -> String {
    let total_seconds = duration.num_seconds();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Formats the startup banner for display.
pub(crate) fn format_banner(info: &BannerInfo) -> String {
    let mut out = String::new();

    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   🔁 Hubkeeper Rotation Starting".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    writeln!(
        &mut out,
        "  Account:    {} ({}/{})",
        info.account.cyan().bold(),
        info.index + 1,
        info.total
    )
    .unwrap();
    writeln!(&mut out, "  Repo:       {}", info.repo.cyan()).unwrap();
    let proxy = if !info.use_proxy {
        "disabled".red()
    } else if let Some(ref p) = info.proxy {
        format!("{p} (pool of {})", info.proxy_count).green()
    } else {
        "none configured".yellow()
    };
    writeln!(&mut out, "  Proxy:      {proxy}").unwrap();
    writeln!(
        &mut out,
        "  Keep-alive: {}",
        format!("{}m", info.keep_alive_mins).cyan()
    )
    .unwrap();
    writeln!(
        &mut out,
        "  Max:        {}",
        info.max_iterations
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string())
            .cyan()
    )
    .unwrap();

    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "\n  {} to stop\n", "Ctrl+C".dimmed()).unwrap();

    out
}

/// Formats the iteration header line.
pub(crate) fn format_iteration_header(iteration: u32, account: &str) -> String {
    format!(
        "\n{} Iteration {} · {} {}",
        "━".repeat(15).dimmed(),
        iteration.to_string().cyan().bold(),
        account.cyan(),
        "━".repeat(15).dimmed()
    )
}

/// Formats the loop finished summary.
pub(crate) fn format_loop_finished(report: &LoopReport) -> String {
    let mut out = String::new();
    let reason = match report.termination {
        TerminationReason::Cancelled => "stopped by operator",
        TerminationReason::MaxIterations => "max iterations reached",
    };
    writeln!(&mut out, "\n{} Rotation loop finished ({reason}).", "🛑".red()).unwrap();
    writeln!(&mut out, "  Iterations: {}", report.iterations.to_string().cyan()).unwrap();
    writeln!(&mut out, "  Rotations:  {}", report.rotations.to_string().cyan()).unwrap();
    if report.errors > 0 {
        writeln!(&mut out, "  Errors:     {}", report.errors.to_string().yellow()).unwrap();
    }
    writeln!(&mut out, "  Runtime:    {}", format_duration(&report.elapsed).cyan()).unwrap();
    out
}
