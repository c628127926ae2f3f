//! The rotation loop (`hubkeeper run`).
//!
//! Each iteration works on the active credential, strictly in order:
//! 1. resolve the account name if it is still unknown
//! 2. check quota, with one proxy-recovery detour on persistent proxy failure
//! 3. rotate away if quota is not OK
//! 4. ensure a healthy sandbox and record it
//! 5. sleep for the keep-alive interval, then re-check health
//!
//! Failed iterations count towards an emergency teardown and rotation.

mod format;

use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, RotationConfig};
use crate::credentials::CredentialStore;
use crate::proxy_tool::ProxyRecovery;
use crate::quota::{FetchError, QuotaService};
use crate::retry::sleep_or_cancel;
use crate::sandbox::{LifecycleManager, SandboxHealth};
use crate::shutdown;

use super::Services;
use format::{format_banner, format_iteration_header, format_loop_finished, BannerInfo};

/// Timing and error policy of the loop.
#[derive(Debug, Clone)]
pub(crate) struct LoopSettings {
    pub keep_alive: Duration,
    pub error_retry: Duration,
    pub max_consecutive_errors: u32,
    pub rotation_delay: Duration,
    pub emergency_delay: Duration,
    /// `None` runs until cancelled.
    pub max_iterations: Option<u32>,
}

impl LoopSettings {
    pub fn from_config(config: &RotationConfig, max_iterations: u32) -> Self {
        Self {
            keep_alive: Duration::from_secs(config.keep_alive_minutes * 60),
            error_retry: Duration::from_secs(config.error_retry_minutes * 60),
            max_consecutive_errors: config.max_consecutive_errors.max(1),
            rotation_delay: Duration::from_secs(config.rotation_delay_secs),
            emergency_delay: Duration::from_secs(config.emergency_delay_secs),
            max_iterations: (max_iterations > 0).then_some(max_iterations),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TerminationReason {
    Cancelled,
    MaxIterations,
}

/// Summary of a finished loop.
#[derive(Debug, Clone)]
pub(crate) struct LoopReport {
    pub iterations: u32,
    pub rotations: u32,
    pub errors: u32,
    pub termination: TerminationReason,
    pub elapsed: chrono::Duration,
}

/// How one iteration ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    /// A sandbox was ensured and the keep-alive interval passed.
    KeptAlive,
    /// The credential was retired and the next one is active.
    Rotated,
    /// Counts towards the consecutive-error limit.
    Failed(String),
}

/// Shutdown interrupted the iteration.
#[derive(Debug)]
struct Interrupted;

/// The long-running orchestrator.
pub(crate) struct RotationLoop {
    store: CredentialStore,
    quota: QuotaService,
    lifecycle: LifecycleManager,
    recovery: Arc<dyn ProxyRecovery>,
    settings: LoopSettings,
    cancel: CancellationToken,
    consecutive_errors: u32,
}

impl RotationLoop {
    pub fn new(
        store: CredentialStore,
        quota: QuotaService,
        lifecycle: LifecycleManager,
        recovery: Arc<dyn ProxyRecovery>,
        settings: LoopSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            quota,
            lifecycle,
            recovery,
            settings,
            cancel,
            consecutive_errors: 0,
        }
    }

    /// Run until cancelled (or until `max_iterations`).
    pub async fn run(&mut self) -> LoopReport {
        let started = Utc::now();
        let mut report = LoopReport {
            iterations: 0,
            rotations: 0,
            errors: 0,
            termination: TerminationReason::Cancelled,
            elapsed: chrono::Duration::zero(),
        };

        loop {
            if self.cancel.is_cancelled() {
                report.termination = TerminationReason::Cancelled;
                break;
            }
            if self
                .settings
                .max_iterations
                .is_some_and(|max| report.iterations >= max)
            {
                report.termination = TerminationReason::MaxIterations;
                break;
            }

            report.iterations += 1;
            println!("{}", format_iteration_header(report.iterations, &self.store.current().label()));

            match self.iteration().await {
                Ok(Step::KeptAlive) => self.consecutive_errors = 0,
                Ok(Step::Rotated) => {
                    report.rotations += 1;
                    self.consecutive_errors = 0;
                }
                Ok(Step::Failed(message)) => {
                    report.errors += 1;
                    match self.on_error(&message).await {
                        Ok(rotated) => report.rotations += u32::from(rotated),
                        Err(Interrupted) => {
                            report.termination = TerminationReason::Cancelled;
                            break;
                        }
                    }
                }
                Err(Interrupted) => {
                    report.termination = TerminationReason::Cancelled;
                    break;
                }
            }
        }

        report.elapsed = Utc::now() - started;
        info!(
            iterations = report.iterations,
            rotations = report.rotations,
            errors = report.errors,
            reason = ?report.termination,
            "rotation loop finished"
        );
        report
    }

    #[cfg(test)]
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    // ---------------------------------------------------------------------------
    // Helper functions
    // ---------------------------------------------------------------------------

    fn check_cancel(&self) -> Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    async fn pause(&self, duration: Duration) -> Result<(), Interrupted> {
        if sleep_or_cancel(duration, &self.cancel).await {
            Ok(())
        } else {
            Err(Interrupted)
        }
    }

    async fn iteration(&mut self) -> Result<Step, Interrupted> {
        let index = self.store.current_index();

        if self.store.current().account_name.is_none() {
            match self.quota.resolve_account(&mut self.store, index, &self.cancel).await {
                Ok(_) => {}
                Err(FetchError::Cancelled) => return Err(Interrupted),
                Err(e) if e.is_rejected() => {
                    warn!(index, error = %e, "token rejected while resolving account, rotating");
                    return self.retire_current().await.map(|()| Step::Rotated);
                }
                Err(e) => return Ok(Step::Failed(format!("could not resolve account name: {e}"))),
            }
        }
        let account = self.store.current().label();

        let mut snapshot = self.quota.get_billing_info(&mut self.store, &self.cancel).await;
        self.check_cancel()?;

        if snapshot.is_persistent_proxy_failure() {
            warn!(account = %account, "billing check failing through every proxy, running proxy recovery");
            match self.recovery.recover().await {
                Ok(proxies) if proxies.is_empty() => warn!("proxy recovery produced no proxies"),
                Ok(proxies) => {
                    self.store.reload_proxies(proxies);
                    snapshot = self.quota.get_billing_info(&mut self.store, &self.cancel).await;
                }
                Err(e) => warn!(error = %format!("{e:#}"), "proxy recovery failed"),
            }
            self.check_cancel()?;
        }

        if !snapshot.quota_ok {
            match &snapshot.error {
                Some(e) => warn!(account = %account, error = %e, "quota check failed, rotating"),
                None => info!(
                    account = %account,
                    hours_remaining = format!("{:.1}", snapshot.hours_remaining),
                    "quota nearly exhausted, rotating"
                ),
            }
            self.retire_current().await?;
            self.pause(self.settings.rotation_delay).await?;
            return Ok(Step::Rotated);
        }

        let credential = self.store.current().clone();
        let outcome = match self.lifecycle.ensure_healthy(&credential).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => return Err(Interrupted),
            Err(e) if e.is_credential_rejected() => {
                warn!(account = %account, error = %e, "credential rejected by platform, rotating");
                self.retire_current().await?;
                self.pause(self.settings.rotation_delay).await?;
                return Ok(Step::Rotated);
            }
            Err(e) => return Ok(Step::Failed(e.to_string())),
        };

        match outcome.health {
            SandboxHealth::Healthy => info!(account = %account, sandbox = %outcome.name, "sandbox healthy"),
            SandboxHealth::SoftAccepted => warn!(
                account = %account,
                sandbox = %outcome.name,
                "sandbox accepted without a bootstrap success marker"
            ),
            SandboxHealth::Degraded => warn!(
                account = %account,
                sandbox = %outcome.name,
                "new sandbox kept although its bootstrap failed"
            ),
        }
        if let Err(e) = self.store.set_active_sandbox(Some(outcome.name.clone())) {
            return Ok(Step::Failed(format!("{e:#}")));
        }
        self.consecutive_errors = 0;

        info!(
            minutes = self.settings.keep_alive.as_secs() / 60,
            "keep-alive: sleeping before the next health check"
        );
        self.pause(self.settings.keep_alive).await?;

        if self.lifecycle.check_health(&credential, &outcome.name).await {
            info!(sandbox = %outcome.name, "keep-alive health check passed");
        } else {
            self.check_cancel()?;
            warn!(sandbox = %outcome.name, "keep-alive health check failed, will re-ensure");
            if let Err(e) = self.store.set_active_sandbox(None) {
                warn!(error = %format!("{e:#}"), "failed to clear active sandbox");
            }
        }
        Ok(Step::KeptAlive)
    }

    /// Count a failed iteration. Returns whether it led to an emergency rotation.
    async fn on_error(&mut self, message: &str) -> Result<bool, Interrupted> {
        self.consecutive_errors += 1;
        error!(
            account = %self.store.current().label(),
            index = self.store.current_index(),
            consecutive = self.consecutive_errors,
            max = self.settings.max_consecutive_errors,
            error = %message,
            "iteration failed"
        );

        if self.consecutive_errors >= self.settings.max_consecutive_errors {
            warn!("too many consecutive errors, emergency teardown and rotation");
            self.retire_current().await?;
            self.consecutive_errors = 0;
            self.pause(self.settings.emergency_delay).await?;
            Ok(true)
        } else {
            self.pause(self.settings.error_retry).await?;
            Ok(false)
        }
    }

    /// Delete the current credential's sandbox and move to the next credential.
    async fn retire_current(&mut self) -> Result<(), Interrupted> {
        let credential = self.store.current().clone();
        match self.lifecycle.teardown_tagged(&credential, false).await {
            Ok(names) if names.is_empty() => {}
            Ok(names) => info!(account = %credential.label(), sandboxes = ?names, "sandboxes deleted"),
            Err(e) if e.is_cancelled() => return Err(Interrupted),
            Err(e) => warn!(account = %credential.label(), error = %e, "teardown before rotation failed"),
        }
        if let Err(e) = self.store.rotate_next() {
            error!(error = %format!("{e:#}"), "failed to persist rotation");
        }
        Ok(())
    }
}

/// Entry point of `hubkeeper run`.
pub async fn run(config: Config, project_dir: &Path, no_proxy: bool, max_iterations: u32) -> Result<()> {
    let cancel = CancellationToken::new();
    let services = Services::load(config, project_dir, no_proxy, cancel.clone())?;
    shutdown::install(cancel.clone());

    let settings = LoopSettings::from_config(&services.config.rotation, max_iterations);
    println!(
        "{}",
        format_banner(&BannerInfo::new(
            &services.store,
            services.use_proxy,
            services.config.rotation.keep_alive_minutes,
            settings.max_iterations,
        ))
    );

    let lifecycle = services.lifecycle(services.gateway())?;
    let quota = services.quota();
    let recovery: Arc<dyn ProxyRecovery> = Arc::new(services.proxy_tool());

    let mut rotation = RotationLoop::new(services.store, quota, lifecycle, recovery, settings, cancel);
    let report = rotation.run().await;
    println!("{}", format_loop_finished(&report));
    Ok(())
}
