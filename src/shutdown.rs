//! Operator shutdown handling.
//!
//! The first Ctrl-C (or SIGTERM) cancels the process-wide token so every wait
//! returns and in-flight subprocesses are killed. A second one exits at once.

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exit code for a forced shutdown (128 + SIGINT).
const FORCED_EXIT_CODE: i32 = 130;

/// Spawn the signal watcher for `cancel`.
pub fn install(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        warn!("shutdown requested, stopping after the current step (repeat to force)");
        cancel.cancel();

        wait_for_signal().await;
        warn!("second shutdown request, exiting immediately");
        std::process::exit(FORCED_EXIT_CODE);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_err() {
                        // No Ctrl-C handler; SIGTERM still works.
                        term.recv().await;
                    }
                }
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            ctrl_c_or_never().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c_or_never().await;
}

async fn ctrl_c_or_never() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
}
