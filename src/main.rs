use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod bots;
mod commands;
mod config;
mod credentials;
mod gateway;
mod proxy_tool;
mod quota;
mod retry;
mod sandbox;
mod shutdown;
mod state;

use config::Config;

#[derive(Parser)]
#[command(name = "hubkeeper")]
#[command(
    author,
    version,
    about = "Keeps one healthy Codespaces sandbox running, rotating accounts as quota runs out"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (default: hubkeeper.toml in the current directory)
    #[arg(short, long, global = true, env = "HUBKEEPER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rotation loop
    Run {
        /// Connect directly, ignoring configured proxies
        #[arg(long)]
        no_proxy: bool,

        /// Stop after this many iterations (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        max_iterations: u32,
    },

    /// Check every token against the platform API
    Validate {
        /// Also show each account's remaining quota
        #[arg(long)]
        billing: bool,
    },

    /// Show the persisted run state and active credential
    Status,

    /// Run the proxy tool and reload the proxy list
    ProxySync {
        /// Only re-authorise this machine's IP with the proxy provider
        #[arg(long)]
        ip_auth: bool,
    },

    /// Follow the active sandbox's bootstrap log
    Logs,

    /// Delete the current credential's sandbox
    Teardown {
        /// Stop instead of delete
        #[arg(long)]
        stop: bool,
    },
}

/// Install the subscriber. With `log_dir`, also write a daily-rolling log file there.
fn init_logging(verbose: bool, json: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("hubkeeper=debug")
        } else {
            EnvFilter::new("hubkeeper=info")
        }
    });

    let stdout = if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("hubkeeper")
                .filename_suffix("log")
                .build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout)
        .with(file)
        .with(filter)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = std::env::current_dir()?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path, true)?,
        None => Config::load(&project_dir)?,
    };

    let log_dir = matches!(cli.command, Commands::Run { .. })
        .then(|| config.paths.resolved(&project_dir).log_dir);
    let _guard = init_logging(cli.verbose, cli.log_json, log_dir.as_deref())?;

    match cli.command {
        Commands::Run {
            no_proxy,
            max_iterations,
        } => {
            commands::run::run(config, &project_dir, no_proxy, max_iterations).await?;
        }
        Commands::Validate { billing } => {
            commands::validate::run(config, &project_dir, billing).await?;
        }
        Commands::Status => {
            commands::status::run(config, &project_dir).await?;
        }
        Commands::ProxySync { ip_auth } => {
            commands::proxy_sync::run(config, &project_dir, ip_auth).await?;
        }
        Commands::Logs => {
            commands::logs::run(config, &project_dir).await?;
        }
        Commands::Teardown { stop } => {
            commands::teardown::run(config, &project_dir, stop).await?;
        }
    }

    Ok(())
}
