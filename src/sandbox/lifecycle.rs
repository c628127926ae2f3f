//! The sandbox state machine.
//!
//! `ensure_healthy` lists the account's sandboxes, picks the one carrying the
//! display tag and drives it to a healthy bootstrap:
//!
//! | observed state | action |
//! |---|---|
//! | none | create, wait, upload, trigger, health check |
//! | `Available` | SSH wait, upload, trigger, health check |
//! | `Shutdown`/`Stopped` | start, wait for `Available`, then as above |
//! | transient | poll state, probing SSH; delete when stuck |
//! | terminal | delete and look again |
//!
//! Polling failures never escape. They turn into another pass of the loop
//! (usually after deleting the sandbox) until the overall budget runs out.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::health::{follow_line, poll_health, BootstrapMarkers, HealthVerdict};
use super::upload::SecretUploader;
use super::{SandboxError, StateClass};
use crate::config::{PollingConfig, SandboxConfig};
use crate::credentials::Credential;
use crate::gateway::{CreateRequest, GatewayError, RemoteGateway, SandboxInfo};
use crate::retry::{sleep_or_cancel, Deadline, Poller, Tick};

/// Poll intervals and budgets used by the manager.
#[derive(Debug, Clone)]
pub struct LifecycleTimings {
    pub ensure_budget: Duration,
    pub state_poll: Duration,
    pub fast_poll: Duration,
    pub create_wait: Duration,
    pub start_wait: Duration,
    pub ssh_poll: Duration,
    pub ssh_wait: Duration,
    pub health_poll: Duration,
    pub health_max: Duration,
    pub stuck_probe_threshold: u32,
    pub settle: Duration,
    pub command_timeout: Duration,
    pub probe_timeout: Duration,
}

impl LifecycleTimings {
    pub fn from_config(polling: &PollingConfig, sandbox: &SandboxConfig) -> Self {
        let mins = |m: u64| Duration::from_secs(m * 60);
        Self {
            ensure_budget: mins(polling.ensure_budget_minutes),
            state_poll: Duration::from_secs(polling.state_poll_secs),
            fast_poll: Duration::from_millis(polling.fast_poll_millis),
            create_wait: mins(polling.create_wait_minutes),
            start_wait: mins(polling.start_wait_minutes),
            ssh_poll: Duration::from_secs(polling.ssh_poll_secs),
            ssh_wait: mins(polling.ssh_wait_minutes),
            health_poll: Duration::from_secs(polling.health_poll_secs),
            health_max: mins(polling.health_max_minutes),
            stuck_probe_threshold: polling.stuck_probe_threshold.max(1),
            settle: Duration::from_secs(polling.settle_secs),
            command_timeout: sandbox.command_timeout(),
            probe_timeout: sandbox.probe_timeout(),
        }
    }

    /// Millisecond timings for tests.
    #[cfg(test)]
    pub fn instant() -> Self {
        let ms = Duration::from_millis;
        Self {
            ensure_budget: ms(2000),
            state_poll: ms(1),
            fast_poll: ms(1),
            create_wait: ms(500),
            start_wait: ms(500),
            ssh_poll: ms(1),
            ssh_wait: ms(500),
            health_poll: ms(1),
            health_max: ms(200),
            stuck_probe_threshold: 3,
            settle: Duration::ZERO,
            command_timeout: ms(1000),
            probe_timeout: ms(1000),
        }
    }
}

/// How healthy the sandbox returned by `ensure_healthy` is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxHealth {
    /// The bootstrap success marker was seen.
    Healthy,
    /// No marker before the health budget, but the platform still reports it `Available`.
    SoftAccepted,
    /// Freshly created, kept even though bootstrap failed or never finished.
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureOutcome {
    pub name: String,
    pub health: SandboxHealth,
    /// Whether this call created the sandbox.
    pub created: bool,
}

/// Result of one pass over the tagged sandbox.
enum Pass {
    Done(EnsureOutcome),
    /// Look again. Carries why this pass gave up.
    Again(String),
}

/// How a state wait ended.
enum Wait {
    Available,
    /// The sandbox is gone or needs a start; look again without deleting.
    Gone(String),
    /// The sandbox is unusable and should be deleted.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitKind {
    /// An existing sandbox in a transient state: probe SSH, stop on `Shutdown`.
    Existing,
    /// Right after create or start: poll state only.
    Booting,
}

/// Drives the tagged sandbox of one credential to health.
pub struct LifecycleManager {
    gateway: Arc<dyn RemoteGateway>,
    uploader: SecretUploader,
    markers: BootstrapMarkers,
    request: CreateRequest,
    bootstrap_script: String,
    timings: LifecycleTimings,
    cancel: CancellationToken,
}

impl LifecycleManager {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        uploader: SecretUploader,
        config: &SandboxConfig,
        timings: LifecycleTimings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            uploader,
            markers: BootstrapMarkers::from(config),
            request: CreateRequest {
                display_tag: config.display_tag.clone(),
                machine_type: config.machine_type.clone(),
                idle_timeout: config.idle_timeout.clone(),
            },
            bootstrap_script: config.bootstrap_script.clone(),
            timings,
            cancel,
        }
    }

    // ---------------------------------------------------------------------------
    // Public API
    // ---------------------------------------------------------------------------

    /// Find or create the tagged sandbox and bring it to health.
    ///
    /// When the budget runs out, every tagged sandbox is deleted and one last
    /// creation is attempted; its failure is returned as `BudgetExhausted`.
    pub async fn ensure_healthy(&self, credential: &Credential) -> Result<EnsureOutcome, SandboxError> {
        let mut budget = Poller::new(self.timings.state_poll, self.timings.ensure_budget);
        let mut last_error = String::from("no pass completed");

        loop {
            self.check_cancel()?;
            let remaining = self.timings.ensure_budget.saturating_sub(budget.elapsed());
            if remaining.is_zero() {
                break;
            }

            match self.ensure_pass(credential, remaining).await {
                Ok(Pass::Done(outcome)) => return Ok(outcome),
                Ok(Pass::Again(reason)) => {
                    info!(account = %credential.label(), reason = %reason, "looking for the sandbox again");
                    last_error = reason;
                }
                Err(e) if e.is_cancelled() || e.is_credential_rejected() => return Err(e),
                Err(e) => {
                    warn!(account = %credential.label(), error = %e, "sandbox pass failed");
                    last_error = e.to_string();
                }
            }

            match budget.tick(&self.cancel).await {
                Tick::Continue => {}
                Tick::Exhausted => break,
                Tick::Cancelled => return Err(SandboxError::Cancelled),
            }
        }

        warn!(
            account = %credential.label(),
            budget_mins = self.timings.ensure_budget.as_secs() / 60,
            last_error = %last_error,
            "ensure budget exhausted, deleting tagged sandboxes and creating a fresh one"
        );
        match self.list_tagged(credential).await {
            Ok(tagged) => {
                for sandbox in tagged {
                    self.delete_quietly(credential, &sandbox.name).await?;
                }
            }
            Err(e) if e.is_cancelled() || e.is_credential_rejected() => return Err(e),
            Err(e) => warn!(error = %e, "could not list sandboxes before final create"),
        }

        match self.create_new(credential).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_cancelled() || e.is_credential_rejected() => Err(e),
            Err(e) => Err(SandboxError::budget_exhausted(
                self.timings.ensure_budget,
                format!("{last_error}; final create: {e}"),
            )),
        }
    }

    /// Create a tagged sandbox and run the first-boot flow on it.
    ///
    /// A sandbox whose bootstrap fails is kept and reported as `Degraded`.
    /// Any other failure deletes it before returning. The whole flow gets
    /// one ensure budget.
    pub async fn create_new(&self, credential: &Credential) -> Result<EnsureOutcome, SandboxError> {
        self.create_within(credential, &Deadline::new(self.timings.ensure_budget)).await
    }

    /// `create_new`, with every first-boot wait capped by `deadline`.
    async fn create_within(&self, credential: &Credential, deadline: &Deadline) -> Result<EnsureOutcome, SandboxError> {
        self.check_cancel()?;
        info!(
            account = %credential.label(),
            repo = %credential.repo_slug(),
            machine = %self.request.machine_type,
            "creating sandbox"
        );

        let name = match self.gateway.create_sandbox(credential, &self.request).await {
            Ok(output) => match extract_sandbox_name(&output) {
                Some(name) => name,
                None => {
                    debug!(output = %output.trim(), "create output has no sandbox name, listing instead");
                    self.newest_tagged(credential)
                        .await?
                        .ok_or_else(|| SandboxError::create_failed("no tagged sandbox after create"))?
                }
            },
            Err(e) if e.is_timeout() => {
                warn!(error = %e, "create timed out, checking whether the sandbox exists anyway");
                self.newest_tagged(credential)
                    .await?
                    .ok_or_else(|| SandboxError::create_failed(e.to_string()))?
            }
            Err(e) if e.is_cancelled() || e.is_auth_or_rate_limit() => return Err(e.into()),
            Err(e) => return Err(SandboxError::create_failed(e.to_string())),
        };
        info!(sandbox = %name, "sandbox created");

        match self.first_boot(credential, &name, deadline).await {
            Ok(health) => Ok(EnsureOutcome {
                name,
                health,
                created: true,
            }),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(sandbox = %name, error = %e, "first boot failed, deleting sandbox");
                if let Err(cleanup) = self.delete_quietly(credential, &name).await {
                    debug!(sandbox = %name, error = %cleanup, "cleanup after failed create skipped");
                }
                Err(e)
            }
        }
    }

    /// Re-run the health protocol only. Never creates or deletes anything.
    pub async fn check_health(&self, credential: &Credential, name: &str) -> bool {
        self.health(credential, name, self.timings.health_max).await.is_healthy()
    }

    /// Stream the bootstrap log into `sink` until a marker file appears.
    pub async fn follow_bootstrap_log(
        &self,
        credential: &Credential,
        name: &str,
        timeout: Duration,
        sink: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<HealthVerdict, SandboxError> {
        let mut verdict = HealthVerdict::TimedOut;
        let command = self.markers.follow_command();
        let end = {
            let mut on_line = follow_line(&mut verdict, sink);
            self.gateway
                .stream_remote(credential, name, &command, timeout, &mut on_line)
                .await
        };
        match end {
            Ok(_) => Ok(verdict),
            Err(e) if e.is_timeout() => Ok(HealthVerdict::TimedOut),
            Err(e) if e.is_not_found() => Ok(HealthVerdict::Gone),
            Err(e) => Err(e.into()),
        }
    }

    /// Stop or delete one sandbox. A sandbox that is already gone counts as success.
    pub async fn teardown(&self, credential: &Credential, name: &str, stop_only: bool) -> Result<(), SandboxError> {
        self.check_cancel()?;
        let result = if stop_only {
            self.gateway.stop_sandbox(credential, name).await
        } else {
            self.gateway.delete_sandbox(credential, name).await
        };
        match result {
            Ok(()) => {
                info!(sandbox = name, stop_only, "sandbox torn down");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(sandbox = name, "sandbox already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Tear down every tagged sandbox of the credential. Returns their names.
    pub async fn teardown_tagged(&self, credential: &Credential, stop_only: bool) -> Result<Vec<String>, SandboxError> {
        let tagged = self.list_tagged(credential).await?;
        let mut names = Vec::with_capacity(tagged.len());
        for sandbox in tagged {
            self.teardown(credential, &sandbox.name, stop_only).await?;
            names.push(sandbox.name);
        }
        Ok(names)
    }

    /// Live tagged sandboxes of the credential, newest first.
    pub async fn list_tagged(&self, credential: &Credential) -> Result<Vec<SandboxInfo>, SandboxError> {
        self.check_cancel()?;
        let all = self.gateway.list_sandboxes(credential).await?;
        Ok(filter_tagged(all, &self.request.display_tag))
    }

    // ---------------------------------------------------------------------------
    // Helper functions
    // ---------------------------------------------------------------------------

    fn check_cancel(&self) -> Result<(), SandboxError> {
        if self.cancel.is_cancelled() {
            Err(SandboxError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// One look at the tagged sandbox.
    async fn ensure_pass(&self, credential: &Credential, remaining: Duration) -> Result<Pass, SandboxError> {
        let deadline = Deadline::new(remaining);
        let Some(sandbox) = self.find_tagged(credential).await? else {
            info!(account = %credential.label(), "no tagged sandbox found");
            return self.create_within(credential, &deadline).await.map(Pass::Done);
        };
        let name = sandbox.name.as_str();
        debug!(sandbox = name, state = %sandbox.state, "found tagged sandbox");

        match StateClass::classify(&sandbox.state) {
            StateClass::Available => self.adopt(credential, name, &deadline).await,
            StateClass::NeedsStart => {
                info!(sandbox = name, state = %sandbox.state, "starting sandbox");
                match self.gateway.start_sandbox(credential, name).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => return Ok(Pass::Again(e.to_string())),
                    Err(e) => return Err(e.into()),
                }
                let budget = deadline.cap(self.timings.start_wait);
                match self.wait_for_state(credential, name, WaitKind::Booting, budget).await? {
                    Wait::Available => self.adopt(credential, name, &deadline).await,
                    Wait::Gone(reason) => Ok(Pass::Again(reason)),
                    Wait::Failed(reason) => self.discard(credential, name, reason).await,
                }
            }
            StateClass::Transient => {
                let budget = deadline.cap(self.timings.create_wait);
                match self.wait_for_state(credential, name, WaitKind::Existing, budget).await? {
                    Wait::Available => self.adopt(credential, name, &deadline).await,
                    Wait::Gone(reason) => Ok(Pass::Again(reason)),
                    Wait::Failed(reason) => self.discard(credential, name, reason).await,
                }
            }
            StateClass::TerminalBad => {
                let reason = format!("sandbox {name} is in terminal state {}", sandbox.state);
                self.discard(credential, name, reason).await
            }
        }
    }

    /// The tagged sandbox to manage. Extra tagged sandboxes are deleted.
    async fn find_tagged(&self, credential: &Credential) -> Result<Option<SandboxInfo>, SandboxError> {
        let mut tagged = self.list_tagged(credential).await?.into_iter();
        let keep = tagged.next();
        for extra in tagged {
            warn!(sandbox = %extra.name, "deleting extra tagged sandbox");
            self.delete_quietly(credential, &extra.name).await?;
        }
        Ok(keep)
    }

    async fn newest_tagged(&self, credential: &Credential) -> Result<Option<String>, SandboxError> {
        Ok(self.list_tagged(credential).await?.into_iter().next().map(|s| s.name))
    }

    /// Post-`Available` flow on a sandbox that already existed.
    async fn adopt(&self, credential: &Credential, name: &str, deadline: &Deadline) -> Result<Pass, SandboxError> {
        let ssh_budget = deadline.cap(self.timings.ssh_wait);
        if !self.wait_for_ssh(credential, name, self.timings.ssh_poll, ssh_budget).await? {
            return self
                .discard(credential, name, format!("sandbox {name} never became reachable over SSH"))
                .await;
        }

        self.uploader.upload(self.gateway.as_ref(), credential, name).await?;
        self.trigger_bootstrap(credential, name).await?;

        let verdict = self.health(credential, name, deadline.cap(self.timings.health_max)).await;
        match verdict {
            HealthVerdict::Healthy => {
                return Ok(Pass::Done(EnsureOutcome {
                    name: name.to_string(),
                    health: SandboxHealth::Healthy,
                    created: false,
                }))
            }
            HealthVerdict::Cancelled => return Err(SandboxError::Cancelled),
            HealthVerdict::Gone => return Ok(Pass::Again(format!("sandbox {name} disappeared"))),
            HealthVerdict::TimedOut | HealthVerdict::BootstrapFailed(_) => {}
        }

        if verdict == HealthVerdict::TimedOut {
            match self.gateway.sandbox_state(credential, name).await {
                Ok(state) if StateClass::classify(&state) == StateClass::Available => {
                    warn!(sandbox = name, "no bootstrap marker yet but sandbox is Available, accepting it");
                    return Ok(Pass::Done(EnsureOutcome {
                        name: name.to_string(),
                        health: SandboxHealth::SoftAccepted,
                        created: false,
                    }));
                }
                Ok(state) => debug!(sandbox = name, state = %state, "sandbox no longer Available"),
                Err(e) if e.is_cancelled() => return Err(SandboxError::Cancelled),
                Err(e) => debug!(sandbox = name, error = %e, "final state query failed"),
            }
        }

        self.discard(credential, name, format!("sandbox {name} unhealthy: {verdict:?}")).await
    }

    /// First boot of a sandbox this manager just created.
    async fn first_boot(&self, credential: &Credential, name: &str, deadline: &Deadline) -> Result<SandboxHealth, SandboxError> {
        match self
            .wait_for_state(credential, name, WaitKind::Booting, deadline.cap(self.timings.create_wait))
            .await?
        {
            Wait::Available => {}
            Wait::Gone(reason) | Wait::Failed(reason) => return Err(SandboxError::stuck(name, reason)),
        }

        if !self
            .wait_for_ssh(credential, name, self.timings.fast_poll, deadline.cap(self.timings.ssh_wait))
            .await?
        {
            return Err(SandboxError::stuck(name, "SSH never became reachable"));
        }

        self.uploader.upload(self.gateway.as_ref(), credential, name).await?;
        if !sleep_or_cancel(self.timings.settle, &self.cancel).await {
            return Err(SandboxError::Cancelled);
        }
        self.trigger_bootstrap(credential, name).await?;

        match self.health(credential, name, deadline.cap(self.timings.health_max)).await {
            HealthVerdict::Healthy => Ok(SandboxHealth::Healthy),
            HealthVerdict::Cancelled => Err(SandboxError::Cancelled),
            HealthVerdict::Gone => Err(SandboxError::stuck(name, "disappeared during first boot")),
            verdict => {
                warn!(
                    sandbox = name,
                    verdict = ?verdict,
                    "bootstrap did not succeed on new sandbox, keeping it for inspection"
                );
                Ok(SandboxHealth::Degraded)
            }
        }
    }

    /// Poll the sandbox state until it is `Available`.
    async fn wait_for_state(
        &self,
        credential: &Credential,
        name: &str,
        kind: WaitKind,
        budget: Duration,
    ) -> Result<Wait, SandboxError> {
        let interval = match kind {
            WaitKind::Existing => self.timings.state_poll,
            WaitKind::Booting => self.timings.fast_poll,
        };
        let mut poller = Poller::new(interval, budget);
        let mut probe_failures = 0u32;

        loop {
            match self.gateway.sandbox_state(credential, name).await {
                Ok(state) => match StateClass::classify(&state) {
                    StateClass::Available => {
                        debug!(sandbox = name, polls = poller.attempts() + 1, "sandbox is Available");
                        return Ok(Wait::Available);
                    }
                    StateClass::TerminalBad => {
                        return Ok(Wait::Failed(format!("sandbox {name} went to state {state}")));
                    }
                    StateClass::NeedsStart if kind == WaitKind::Existing => {
                        return Ok(Wait::Gone(format!("sandbox {name} stopped while waiting")));
                    }
                    StateClass::NeedsStart => debug!(sandbox = name, state = %state, "not started yet"),
                    StateClass::Transient if kind == WaitKind::Existing => {
                        if self.probe_ssh(credential, name).await? {
                            probe_failures = 0;
                        } else {
                            probe_failures += 1;
                            debug!(sandbox = name, probe_failures, "SSH probe failed while transient");
                            if probe_failures >= self.timings.stuck_probe_threshold {
                                warn!(sandbox = name, state = %state, probe_failures, "sandbox looks stuck");
                                return Ok(Wait::Failed(format!(
                                    "sandbox {name} stuck in {state} after {probe_failures} failed SSH probes"
                                )));
                            }
                        }
                    }
                    StateClass::Transient => debug!(sandbox = name, state = %state, "waiting"),
                },
                Err(e) if e.is_not_found() => return Ok(Wait::Gone(format!("sandbox {name} disappeared"))),
                Err(e) if e.is_cancelled() || e.is_auth_or_rate_limit() => return Err(e.into()),
                Err(e) => debug!(sandbox = name, error = %e, "state poll failed, will retry"),
            }

            match poller.tick(&self.cancel).await {
                Tick::Continue => {}
                Tick::Exhausted => {
                    return Ok(Wait::Failed(format!(
                        "sandbox {name} not Available after {}s",
                        poller.elapsed().as_secs()
                    )));
                }
                Tick::Cancelled => return Err(SandboxError::Cancelled),
            }
        }
    }

    /// Probe SSH until it answers. Returns false when the budget runs out.
    async fn wait_for_ssh(
        &self,
        credential: &Credential,
        name: &str,
        interval: Duration,
        budget: Duration,
    ) -> Result<bool, SandboxError> {
        let mut poller = Poller::new(interval, budget);
        loop {
            if self.probe_ssh(credential, name).await? {
                debug!(sandbox = name, probes = poller.attempts() + 1, "SSH is reachable");
                return Ok(true);
            }
            match poller.tick(&self.cancel).await {
                Tick::Continue => {}
                Tick::Exhausted => {
                    warn!(sandbox = name, waited_secs = poller.elapsed().as_secs(), "SSH never became reachable");
                    return Ok(false);
                }
                Tick::Cancelled => return Err(SandboxError::Cancelled),
            }
        }
    }

    /// One `echo ready` probe. Only cancellation and credential rejection are errors.
    async fn probe_ssh(&self, credential: &Credential, name: &str) -> Result<bool, SandboxError> {
        match self
            .gateway
            .run_remote(credential, name, "echo ready", self.timings.probe_timeout)
            .await
        {
            Ok(output) => Ok(output.contains("ready")),
            Err(e) if e.is_cancelled() || e.is_auth_or_rate_limit() => Err(e.into()),
            Err(e) => {
                debug!(sandbox = name, error = %e, "SSH probe failed");
                Ok(false)
            }
        }
    }

    /// Start the bootstrap script detached. Failures are logged only.
    async fn trigger_bootstrap(&self, credential: &Credential, name: &str) -> Result<(), SandboxError> {
        let script = format!("/workspaces/{}/{}", credential.repo, self.bootstrap_script.trim_start_matches('/'));
        let command = format!(
            "nohup bash {} > {} 2>&1 &",
            shell_words::quote(&script),
            shell_words::quote(&self.markers.log)
        );
        match self
            .gateway
            .run_remote(credential, name, &command, self.timings.command_timeout)
            .await
        {
            Ok(_) => {
                info!(sandbox = name, script = %script, "bootstrap triggered");
                Ok(())
            }
            Err(GatewayError::Cancelled) => Err(SandboxError::Cancelled),
            Err(e) => {
                warn!(sandbox = name, error = %e, "bootstrap trigger failed, it may already be running");
                Ok(())
            }
        }
    }

    async fn health(&self, credential: &Credential, name: &str, budget: Duration) -> HealthVerdict {
        poll_health(
            self.gateway.as_ref(),
            credential,
            name,
            &self.markers,
            self.timings.health_poll,
            budget,
            self.timings.command_timeout,
            &self.cancel,
        )
        .await
    }

    /// Delete the sandbox and ask for another pass.
    async fn discard(&self, credential: &Credential, name: &str, reason: String) -> Result<Pass, SandboxError> {
        warn!(sandbox = name, reason = %reason, "deleting sandbox");
        self.delete_quietly(credential, name).await?;
        Ok(Pass::Again(reason))
    }

    /// Delete, treating everything but cancellation and credential rejection as non-fatal.
    async fn delete_quietly(&self, credential: &Credential, name: &str) -> Result<(), SandboxError> {
        match self.teardown(credential, name, false).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() || e.is_credential_rejected() => Err(e),
            Err(e) => {
                warn!(sandbox = name, error = %e, "delete failed");
                Ok(())
            }
        }
    }
}

/// Live sandboxes carrying `display_tag`, newest first.
fn filter_tagged(all: Vec<SandboxInfo>, display_tag: &str) -> Vec<SandboxInfo> {
    let mut tagged: Vec<SandboxInfo> = all
        .into_iter()
        .filter(|s| s.display_name == display_tag && !s.state.trim().eq_ignore_ascii_case("deleted"))
        .collect();
    tagged.sort_by_key(|s| Reverse(s.created_at));
    tagged
}

/// The sandbox name from create output, when the last line is a bare identifier.
pub(crate) fn extract_sandbox_name(output: &str) -> Option<String> {
    let last = output.lines().map(str::trim).rfind(|l| !l.is_empty())?;
    last.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        .then(|| last.to_string())
}
