//! Bootstrap health protocol.
//!
//! The remote bootstrap script writes its output to a log file and, when it
//! finishes, exactly one marker file. Each poll runs one remote command that
//! prints the log lines added since the previous poll followed by a trailer
//! line `::<log line count>::<FLAG>`.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::credentials::Credential;
use crate::gateway::{LineControl, RemoteGateway};
use crate::retry::{Poller, Tick};

/// Target for lines copied from the remote bootstrap log.
pub(crate) const REMOTE_LOG_TARGET: &str = "hubkeeper::remote";

/// Which stage of the bootstrap script reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    ProxySync,
    Deploy,
}

/// Marker state observed by one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HealthFlag {
    Healthy,
    Failed(BootstrapStage),
    NotReady,
}

impl HealthFlag {
    fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "HEALTHY" => Some(Self::Healthy),
            "FAILED_PROXYSYNC" => Some(Self::Failed(BootstrapStage::ProxySync)),
            "FAILED_DEPLOY" => Some(Self::Failed(BootstrapStage::Deploy)),
            "NOT_READY" => Some(Self::NotReady),
            _ => None,
        }
    }
}

/// Outcome of a health poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// A failure marker was found.
    BootstrapFailed(BootstrapStage),
    /// No marker appeared within the budget.
    TimedOut,
    /// The sandbox no longer exists.
    Gone,
    Cancelled,
}

impl HealthVerdict {
    pub fn is_healthy(self) -> bool {
        self == Self::Healthy
    }
}

/// Remote paths written by the bootstrap script.
#[derive(Debug, Clone)]
pub struct BootstrapMarkers {
    pub log: String,
    pub done: String,
    pub failed_proxysync: String,
    pub failed_deploy: String,
}

impl From<&SandboxConfig> for BootstrapMarkers {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            log: config.bootstrap_log.clone(),
            done: config.done_marker.clone(),
            failed_proxysync: config.proxysync_failed_marker.clone(),
            failed_deploy: config.deploy_failed_marker.clone(),
        }
    }
}

impl BootstrapMarkers {
    /// Shell fragment setting `F` to the current flag. Failure markers win over success.
    fn flag_script(&self) -> String {
        format!(
            "if [ -f {ps} ]; then F=FAILED_PROXYSYNC; elif [ -f {dep} ]; then F=FAILED_DEPLOY; \
             elif [ -f {done} ]; then F=HEALTHY; else F=NOT_READY; fi",
            ps = shell_words::quote(&self.failed_proxysync),
            dep = shell_words::quote(&self.failed_deploy),
            done = shell_words::quote(&self.done),
        )
    }

    /// One poll: print log lines after `printed`, then the trailer.
    pub(crate) fn poll_command(&self, printed: usize) -> String {
        let log = shell_words::quote(&self.log);
        format!(
            "if [ -f {log} ]; then tail -n +{start} {log}; C=$(wc -l < {log}); else C=0; fi; {flags}; \
             printf '\\n::%s::%s\\n' \"$C\" \"$F\"",
            start = printed + 1,
            flags = self.flag_script(),
        )
    }

    /// Follow the log until a marker appears, then print the trailer.
    pub(crate) fn follow_command(&self) -> String {
        let log = shell_words::quote(&self.log);
        format!(
            "touch {log}; tail -n +1 -F {log} 2>/dev/null & T=$!; \
             while :; do {flags}; [ \"$F\" != NOT_READY ] && break; sleep 2; done; \
             sleep 1; kill $T 2>/dev/null; printf '\\n::0::%s\\n' \"$F\"",
            flags = self.flag_script(),
        )
    }
}

/// Parsed output of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PollOutput {
    pub lines: Vec<String>,
    pub line_count: Option<usize>,
    pub flag: HealthFlag,
}

/// Split a trailer `<prefix>::<count>::<FLAG>`.
fn parse_trailer(line: &str) -> Option<(&str, usize, HealthFlag)> {
    let (rest, flag) = line.rsplit_once("::")?;
    let (prefix, count) = rest.rsplit_once("::")?;
    Some((prefix, count.trim().parse().ok()?, HealthFlag::parse(flag)?))
}

pub(crate) fn parse_poll_output(output: &str) -> PollOutput {
    let mut lines: Vec<&str> = output.lines().collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let Some(last) = lines.pop() else {
        return PollOutput {
            lines: Vec::new(),
            line_count: None,
            flag: HealthFlag::NotReady,
        };
    };

    let (line_count, flag) = if let Some((prefix, count, flag)) = parse_trailer(last) {
        if !prefix.is_empty() {
            lines.push(prefix);
        }
        (Some(count), flag)
    } else if let Some(flag) = HealthFlag::parse(last) {
        (None, flag)
    } else {
        lines.push(last);
        (None, HealthFlag::NotReady)
    };

    // The trailer is printed after a newline, so a log ending in one leaves a blank line.
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    PollOutput {
        lines: lines.into_iter().map(String::from).collect(),
        line_count,
        flag,
    }
}

/// Poll bootstrap health until a marker appears, the budget runs out, or cancellation.
///
/// Remote command failures during polling are logged and polled through.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn poll_health(
    gateway: &dyn RemoteGateway,
    credential: &Credential,
    name: &str,
    markers: &BootstrapMarkers,
    interval: Duration,
    budget: Duration,
    command_timeout: Duration,
    cancel: &CancellationToken,
) -> HealthVerdict {
    let mut poller = Poller::new(interval, budget);
    let mut printed = 0usize;

    loop {
        if cancel.is_cancelled() {
            return HealthVerdict::Cancelled;
        }

        match gateway
            .run_remote(credential, name, &markers.poll_command(printed), command_timeout)
            .await
        {
            Ok(output) => {
                let poll = parse_poll_output(&output);
                for line in &poll.lines {
                    info!(target: REMOTE_LOG_TARGET, sandbox = name, "{line}");
                }
                printed = poll.line_count.unwrap_or(printed + poll.lines.len());

                match poll.flag {
                    HealthFlag::Healthy => {
                        info!(sandbox = name, polls = poller.attempts() + 1, "bootstrap reported healthy");
                        return HealthVerdict::Healthy;
                    }
                    HealthFlag::Failed(stage) => {
                        warn!(sandbox = name, stage = ?stage, "bootstrap reported failure");
                        return HealthVerdict::BootstrapFailed(stage);
                    }
                    HealthFlag::NotReady => debug!(sandbox = name, "bootstrap not finished yet"),
                }
            }
            Err(e) if e.is_cancelled() => return HealthVerdict::Cancelled,
            Err(e) if e.is_not_found() => {
                warn!(sandbox = name, "sandbox disappeared during health check");
                return HealthVerdict::Gone;
            }
            Err(e) => debug!(sandbox = name, error = %e, "health poll failed, will retry"),
        }

        match poller.tick(cancel).await {
            Tick::Continue => {}
            Tick::Exhausted => {
                warn!(
                    sandbox = name,
                    waited_secs = poller.elapsed().as_secs(),
                    "no bootstrap marker before health budget ran out"
                );
                return HealthVerdict::TimedOut;
            }
            Tick::Cancelled => return HealthVerdict::Cancelled,
        }
    }
}

/// Stream callback adapter: forwards log lines and stops at the trailer.
pub(crate) fn follow_line<'a>(
    verdict: &'a mut HealthVerdict,
    sink: &'a mut (dyn for<'l> FnMut(&'l str) + Send),
) -> impl FnMut(&str) -> LineControl + Send + 'a {
    move |line: &str| match parse_trailer(line) {
        Some((prefix, _, flag)) => {
            if !prefix.is_empty() {
                sink(prefix);
            }
            *verdict = match flag {
                HealthFlag::Healthy => HealthVerdict::Healthy,
                HealthFlag::Failed(stage) => HealthVerdict::BootstrapFailed(stage),
                HealthFlag::NotReady => HealthVerdict::TimedOut,
            };
            LineControl::Stop
        }
        None => {
            if !line.is_empty() {
                sink(line);
            }
            LineControl::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::FakePlatform;

    fn markers() -> BootstrapMarkers {
        BootstrapMarkers::from(&SandboxConfig::default())
    }

    fn credential() -> Credential {
        Credential {
            token: "ghp_testtesttesttesttesttest".into(),
            proxy: None,
            account_name: Some("octocat".into()),
            owner: "octo".into(),
            repo: "hub".into(),
        }
    }

    async fn poll(platform: &FakePlatform, budget: Duration) -> HealthVerdict {
        poll_health(
            platform,
            &credential(),
            "sb-1",
            &markers(),
            Duration::from_millis(1),
            budget,
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
    }

    #[test]
    fn test_parse_trailer_with_log_delta() {
        let out = parse_poll_output("step one\nstep two\n\n::12::NOT_READY\n");
        assert_eq!(out.lines, vec!["step one", "step two"]);
        assert_eq!(out.line_count, Some(12));
        assert_eq!(out.flag, HealthFlag::NotReady);
    }

    #[test]
    fn test_parse_trailer_glued_to_partial_line() {
        let out = parse_poll_output("partial::3::HEALTHY");
        assert_eq!(out.lines, vec!["partial"]);
        assert_eq!(out.flag, HealthFlag::Healthy);
    }

    #[test]
    fn test_parse_bare_flag() {
        let out = parse_poll_output("FAILED_DEPLOY\n");
        assert!(out.lines.is_empty());
        assert_eq!(out.flag, HealthFlag::Failed(BootstrapStage::Deploy));
    }

    #[test]
    fn test_parse_garbage_is_not_ready() {
        let out = parse_poll_output("bash: something\n");
        assert_eq!(out.flag, HealthFlag::NotReady);
        assert_eq!(out.lines, vec!["bash: something"]);
    }

    #[test]
    fn test_poll_command_checks_failure_markers_first() {
        let cmd = markers().poll_command(7);
        assert!(cmd.contains("tail -n +8 /tmp/auto_start.log"));
        let ps = cmd.find("/tmp/auto_start_failed_proxysync").unwrap();
        let dep = cmd.find("/tmp/auto_start_failed_deploy").unwrap();
        let done = cmd.find("/tmp/auto_start_done").unwrap();
        assert!(ps < done && dep < done);
    }

    #[tokio::test]
    async fn test_healthy_after_exactly_three_polls() {
        let platform = FakePlatform::new()
            .with_sandbox("sb-1", "automation-hub-runner", &["Available"])
            .health(&["NOT_READY", "NOT_READY", "HEALTHY", "FAILED_DEPLOY"]);

        let verdict = poll(&platform, Duration::from_secs(5)).await;

        assert_eq!(verdict, HealthVerdict::Healthy);
        assert_eq!(platform.count("health"), 3);
    }

    #[tokio::test]
    async fn test_failure_marker_stops_immediately() {
        let platform = FakePlatform::new()
            .with_sandbox("sb-1", "automation-hub-runner", &["Available"])
            .health(&["NOT_READY", "NOT_READY", "NOT_READY", "NOT_READY", "FAILED_DEPLOY", "HEALTHY"]);

        let verdict = poll(&platform, Duration::from_secs(5)).await;

        assert_eq!(verdict, HealthVerdict::BootstrapFailed(BootstrapStage::Deploy));
        assert_eq!(platform.count("health"), 5);
    }

    #[tokio::test]
    async fn test_no_marker_times_out() {
        let platform = FakePlatform::new()
            .with_sandbox("sb-1", "automation-hub-runner", &["Available"])
            .health(&["NOT_READY"]);

        let verdict = poll(&platform, Duration::from_millis(50)).await;

        assert_eq!(verdict, HealthVerdict::TimedOut);
        assert!(platform.count("health") >= 1);
    }

    #[tokio::test]
    async fn test_missing_sandbox_is_gone() {
        let platform = FakePlatform::new();
        assert_eq!(poll(&platform, Duration::from_secs(5)).await, HealthVerdict::Gone);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let platform = FakePlatform::new()
            .with_sandbox("sb-1", "automation-hub-runner", &["Available"])
            .health(&["NOT_READY"]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let verdict = poll_health(
            &platform,
            &credential(),
            "sb-1",
            &markers(),
            Duration::from_secs(10),
            Duration::from_secs(600),
            Duration::from_secs(1),
            &cancel,
        )
        .await;

        assert_eq!(verdict, HealthVerdict::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_follow_line_stops_at_trailer() {
        let mut verdict = HealthVerdict::TimedOut;
        let mut seen = Vec::new();
        let mut sink = |line: &str| seen.push(line.to_string());
        {
            let mut on_line = follow_line(&mut verdict, &mut sink);
            assert_eq!(on_line("installing"), LineControl::Continue);
            assert_eq!(on_line(""), LineControl::Continue);
            assert_eq!(on_line("::0::FAILED_PROXYSYNC"), LineControl::Stop);
        }
        assert_eq!(verdict, HealthVerdict::BootstrapFailed(BootstrapStage::ProxySync));
        assert_eq!(seen, vec!["installing"]);
    }
}
