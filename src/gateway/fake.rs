//! Scripted in-memory platform for testing.
//!
//! Plays back predetermined sandbox state sequences, SSH probe results and
//! health responses, and records every call for assertions. Lets lifecycle
//! and loop tests run without the remote-access CLI.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::{classify_failure, CreateRequest, GatewayError, LineControl, RemoteGateway, SandboxInfo, StreamEnd};
use crate::credentials::Credential;

/// A failure the fake can be told to produce.
///
/// Each one is the stderr the real CLI prints, run through [`classify_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FakeFailure {
    Auth,
    Forbidden,
    Network,
    Other,
}

impl FakeFailure {
    fn stderr(self) -> &'static str {
        match self {
            Self::Auth => "HTTP 401: Bad credentials (https://api.github.com/user/codespaces)",
            Self::Forbidden => "HTTP 403: Forbidden (https://api.github.com/user/codespaces)",
            Self::Network => {
                "error connecting to api.github.com\ncheck your internet connection or https://githubstatus.com: dial tcp: connection refused"
            }
            Self::Other => "HTTP 500: Internal Server Error (https://api.github.com/user/codespaces)",
        }
    }

    fn to_error(self) -> GatewayError {
        classify_failure(self.stderr())
    }
}

/// What the CLI prints for a sandbox the platform no longer knows.
fn missing(name: &str) -> GatewayError {
    classify_failure(&format!(
        "HTTP 404: Not Found (https://api.github.com/user/codespaces/{name})"
    ))
}

#[derive(Debug)]
struct FakeSandbox {
    info: SandboxInfo,
    /// Front is the current state. Popped on each `sandbox_state`; the last one sticks.
    states: VecDeque<String>,
}

impl FakeSandbox {
    fn current(&self) -> String {
        self.states.front().cloned().unwrap_or_else(|| "Unknown".to_string())
    }

    fn advance(&mut self) -> String {
        if self.states.len() > 1 {
            self.states.pop_front().unwrap_or_default()
        } else {
            self.current()
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    sandboxes: Vec<FakeSandbox>,
    next_id: usize,
    create_states: Vec<String>,
    create_output: Option<String>,
    create_failure: Option<FakeFailure>,
    start_states: Vec<String>,
    list_failures: VecDeque<FakeFailure>,
    probe_results: VecDeque<bool>,
    health_responses: VecDeque<String>,
    log_lines: Vec<String>,
    remote_files: BTreeSet<String>,
    calls: Vec<String>,
    counts: HashMap<&'static str, usize>,
}

/// In-memory stand-in for the sandbox platform.
#[derive(Debug, Default)]
pub(crate) struct FakePlatform {
    state: Mutex<FakeState>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn pop_sticky<T: Clone>(queue: &mut VecDeque<T>, default: T) -> T {
    match queue.len() {
        0 => default,
        1 => queue[0].clone(),
        _ => queue.pop_front().unwrap_or(default),
    }
}

impl FakePlatform {
    /// An empty account whose creates come up `Available` and pass every probe.
    pub fn new() -> Self {
        let platform = Self::default();
        {
            let mut s = platform.lock();
            s.create_states = owned(&["Available"]);
            s.start_states = owned(&["Starting", "Available"]);
        }
        platform
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Add an existing sandbox that reports `states` in order.
    pub fn with_sandbox(self, name: &str, display_name: &str, states: &[&str]) -> Self {
        {
            let mut s = self.lock();
            s.next_id += 1;
            let created_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
                + ChronoDuration::minutes(i64::try_from(s.next_id).unwrap());
            s.sandboxes.push(FakeSandbox {
                info: SandboxInfo {
                    name: name.to_string(),
                    display_name: display_name.to_string(),
                    state: String::new(),
                    created_at: Some(created_at),
                },
                states: owned(states).into(),
            });
        }
        self
    }

    /// States a newly created sandbox reports.
    pub fn on_create(self, states: &[&str]) -> Self {
        self.lock().create_states = owned(states);
        self
    }

    /// Make create print a message instead of the bare sandbox name.
    pub fn create_output(self, output: &str) -> Self {
        self.lock().create_output = Some(output.to_string());
        self
    }

    pub fn fail_create(self, failure: FakeFailure) -> Self {
        self.lock().create_failure = Some(failure);
        self
    }

    /// States a started sandbox reports.
    pub fn on_start(self, states: &[&str]) -> Self {
        self.lock().start_states = owned(states);
        self
    }

    /// SSH probe outcomes in order; the last one repeats.
    pub fn probes(self, results: &[bool]) -> Self {
        self.lock().probe_results = results.iter().copied().collect();
        self
    }

    /// Health command responses in order; the last one repeats.
    pub fn health(self, responses: &[&str]) -> Self {
        self.lock().health_responses = owned(responses).into();
        self
    }

    /// Queue failures for the next list calls.
    pub fn fail_lists(self, failures: &[FakeFailure]) -> Self {
        self.lock().list_failures = failures.iter().copied().collect();
        self
    }

    /// Lines streamed by `stream_remote`.
    pub fn log_lines(self, lines: &[&str]) -> Self {
        self.lock().log_lines = owned(lines);
        self
    }

    /// Replace health responses mid-test.
    pub fn set_health(&self, responses: &[&str]) {
        self.lock().health_responses = owned(responses).into();
    }

    /// Remove a sandbox out-of-band, as the platform's idle timeout would.
    pub fn vanish(&self, name: &str) {
        self.lock().sandboxes.retain(|sb| sb.info.name != name);
    }

    /// Number of calls to one operation.
    pub fn count(&self, op: &str) -> usize {
        self.lock().counts.get(op).copied().unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Names of live sandboxes carrying `display_tag`.
    pub fn tagged(&self, display_tag: &str) -> Vec<String> {
        self.lock()
            .sandboxes
            .iter()
            .filter(|sb| sb.info.display_name == display_tag && sb.current() != "Deleted")
            .map(|sb| sb.info.name.clone())
            .collect()
    }

    /// Remote paths that received uploads.
    pub fn remote_files(&self) -> BTreeSet<String> {
        self.lock().remote_files.clone()
    }

    fn record(&self, op: &'static str, detail: &str) {
        let mut s = self.lock();
        *s.counts.entry(op).or_insert(0) += 1;
        s.calls.push(format!("{op} {detail}").trim().to_string());
    }

    fn find<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut FakeSandbox) -> R,
    ) -> Result<R, GatewayError> {
        let mut s = self.lock();
        s.sandboxes
            .iter_mut()
            .find(|sb| sb.info.name == name)
            .map(f)
            .ok_or_else(|| missing(name))
    }
}

#[async_trait]
impl RemoteGateway for FakePlatform {
    async fn list_sandboxes(&self, _credential: &Credential) -> Result<Vec<SandboxInfo>, GatewayError> {
        self.record("list", "");
        let mut s = self.lock();
        if let Some(failure) = s.list_failures.pop_front() {
            return Err(failure.to_error());
        }
        Ok(s.sandboxes
            .iter()
            .map(|sb| SandboxInfo {
                state: sb.current(),
                ..sb.info.clone()
            })
            .collect())
    }

    async fn sandbox_state(&self, _credential: &Credential, name: &str) -> Result<String, GatewayError> {
        self.record("state", name);
        self.find(name, FakeSandbox::advance)
    }

    async fn create_sandbox(
        &self,
        _credential: &Credential,
        request: &CreateRequest,
    ) -> Result<String, GatewayError> {
        self.record("create", &request.display_tag);
        let mut s = self.lock();
        if let Some(failure) = s.create_failure {
            return Err(failure.to_error());
        }
        s.next_id += 1;
        let name = format!("octo-hub-{}", s.next_id);
        let created_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
            + ChronoDuration::minutes(i64::try_from(s.next_id).unwrap());
        let states = s.create_states.clone().into();
        s.sandboxes.push(FakeSandbox {
            info: SandboxInfo {
                name: name.clone(),
                display_name: request.display_tag.clone(),
                state: String::new(),
                created_at: Some(created_at),
            },
            states,
        });
        Ok(s.create_output.clone().unwrap_or(name))
    }

    async fn start_sandbox(&self, _credential: &Credential, name: &str) -> Result<(), GatewayError> {
        self.record("start", name);
        let states: VecDeque<String> = self.lock().start_states.clone().into();
        self.find(name, |sb| sb.states = states)
    }

    async fn stop_sandbox(&self, _credential: &Credential, name: &str) -> Result<(), GatewayError> {
        self.record("stop", name);
        self.find(name, |sb| sb.states = VecDeque::from(vec!["Shutdown".to_string()]))
    }

    async fn delete_sandbox(&self, _credential: &Credential, name: &str) -> Result<(), GatewayError> {
        self.record("delete", name);
        let mut s = self.lock();
        let before = s.sandboxes.len();
        s.sandboxes.retain(|sb| sb.info.name != name);
        if s.sandboxes.len() == before {
            return Err(missing(name));
        }
        Ok(())
    }

    async fn run_remote(
        &self,
        _credential: &Credential,
        name: &str,
        command: &str,
        _timeout: Duration,
    ) -> Result<String, GatewayError> {
        self.find(name, |_| ())?;
        if command.contains("echo ready") {
            self.record("probe", name);
            let ok = pop_sticky(&mut self.lock().probe_results, true);
            return if ok {
                Ok("ready\n".to_string())
            } else {
                Err(classify_failure("ssh: connect to host localhost port 2222: Connection refused"))
            };
        }
        if command.contains("nohup") {
            self.record("trigger", name);
            return Ok(String::new());
        }
        if command.starts_with("mkdir -p") {
            self.record("mkdir", name);
            return Ok(String::new());
        }
        self.record("health", name);
        let response = pop_sticky(&mut self.lock().health_responses, "HEALTHY".to_string());
        Ok(format!("{response}\n"))
    }

    async fn stream_remote(
        &self,
        _credential: &Credential,
        name: &str,
        _command: &str,
        _timeout: Duration,
        on_line: &mut (dyn for<'l> FnMut(&'l str) -> LineControl + Send),
    ) -> Result<StreamEnd, GatewayError> {
        self.record("stream", name);
        let lines = self.lock().log_lines.clone();
        for line in &lines {
            if on_line(line) == LineControl::Stop {
                return Ok(StreamEnd::Stopped);
            }
        }
        Ok(StreamEnd::Completed)
    }

    async fn copy_to(
        &self,
        _credential: &Credential,
        name: &str,
        _local: &Path,
        remote: &str,
    ) -> Result<(), GatewayError> {
        self.find(name, |_| ())?;
        self.record("copy", remote);
        self.lock().remote_files.insert(remote.to_string());
        Ok(())
    }
}
