use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "hubkeeper.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
}

/// Local files the orchestrator reads and writes.
///
/// Relative paths are resolved against the project directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Owner line, repo line, then the token line
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,

    /// Proxies that passed the last proxy-tool test run
    #[serde(default = "default_proxy_file")]
    pub proxy_file: PathBuf,

    /// Used when `proxy_file` is missing or empty
    #[serde(default = "default_fallback_proxy_file")]
    pub fallback_proxy_file: PathBuf,

    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Token to account-name cache
    #[serde(default = "default_account_cache_file")]
    pub account_cache_file: PathBuf,

    #[serde(default = "default_bots_config")]
    pub bots_config: PathBuf,

    /// Per-bot secret directories live under here, mirroring each bot's path
    #[serde(default = "default_secrets_root")]
    pub secrets_root: PathBuf,

    /// Allow-list of secret filenames to upload
    #[serde(default = "default_upload_list")]
    pub upload_list: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Working directory of the external proxy tool
    #[serde(default = "default_proxy_tool_dir")]
    pub proxy_tool_dir: PathBuf,

    /// Interpreter used to launch the proxy tool
    #[serde(default = "default_proxy_tool_command")]
    pub proxy_tool_command: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            token_file: default_token_file(),
            proxy_file: default_proxy_file(),
            fallback_proxy_file: default_fallback_proxy_file(),
            state_file: default_state_file(),
            account_cache_file: default_account_cache_file(),
            bots_config: default_bots_config(),
            secrets_root: default_secrets_root(),
            upload_list: default_upload_list(),
            log_dir: default_log_dir(),
            proxy_tool_dir: default_proxy_tool_dir(),
            proxy_tool_command: default_proxy_tool_command(),
        }
    }
}

impl PathsConfig {
    /// Resolve a configured path against the project directory, expanding `~/`.
    pub fn resolve(project_dir: &Path, path: &Path) -> PathBuf {
        if let Ok(rest) = path.strip_prefix("~") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            project_dir.join(path)
        }
    }

    /// Return a copy with every path resolved against `project_dir`.
    pub fn resolved(&self, project_dir: &Path) -> Self {
        let r = |p: &PathBuf| Self::resolve(project_dir, p);
        Self {
            token_file: r(&self.token_file),
            proxy_file: r(&self.proxy_file),
            fallback_proxy_file: r(&self.fallback_proxy_file),
            state_file: r(&self.state_file),
            account_cache_file: r(&self.account_cache_file),
            bots_config: r(&self.bots_config),
            secrets_root: r(&self.secrets_root),
            upload_list: r(&self.upload_list),
            log_dir: r(&self.log_dir),
            proxy_tool_dir: r(&self.proxy_tool_dir),
            proxy_tool_command: self.proxy_tool_command.clone(),
        }
    }
}

/// Remote sandbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Remote-access CLI binary
    /// - Default: "gh"
    #[serde(default = "default_cli")]
    pub cli: String,

    /// Display name identifying the one sandbox this tool owns
    #[serde(default = "default_display_tag")]
    pub display_tag: String,

    #[serde(default = "default_machine_type")]
    pub machine_type: String,

    /// Passed through to the platform (e.g. "240m")
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,

    /// Bootstrap script, relative to `/workspaces/<repo>`
    #[serde(default = "default_bootstrap_script")]
    pub bootstrap_script: String,

    #[serde(default = "default_bootstrap_log")]
    pub bootstrap_log: String,

    #[serde(default = "default_done_marker")]
    pub done_marker: String,

    #[serde(default = "default_proxysync_failed_marker")]
    pub proxysync_failed_marker: String,

    #[serde(default = "default_deploy_failed_marker")]
    pub deploy_failed_marker: String,

    /// Local proxy-tool files uploaded alongside bot secrets
    #[serde(default = "default_proxy_tool_files")]
    pub proxy_tool_files: Vec<PathBuf>,

    /// Remote directory (relative to the workspace) receiving `proxy_tool_files`
    #[serde(default = "default_proxy_tool_remote_dir")]
    pub proxy_tool_remote_dir: String,

    /// Per-call timeout for list/view/start/stop/delete, in seconds
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Timeout for the SSH readiness probe, in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Extra attempts for platform calls that fail with a network error
    #[serde(default = "default_network_retries")]
    pub network_retries: u32,

    #[serde(default = "default_network_retry_secs")]
    pub network_retry_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            cli: default_cli(),
            display_tag: default_display_tag(),
            machine_type: default_machine_type(),
            idle_timeout: default_idle_timeout(),
            bootstrap_script: default_bootstrap_script(),
            bootstrap_log: default_bootstrap_log(),
            done_marker: default_done_marker(),
            proxysync_failed_marker: default_proxysync_failed_marker(),
            deploy_failed_marker: default_deploy_failed_marker(),
            proxy_tool_files: default_proxy_tool_files(),
            proxy_tool_remote_dir: default_proxy_tool_remote_dir(),
            command_timeout_secs: default_command_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            network_retries: default_network_retries(),
            network_retry_secs: default_network_retry_secs(),
        }
    }
}

/// Poll intervals and wall-clock budgets for the lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Overall budget for one `ensure_healthy` call
    #[serde(default = "default_ensure_budget_minutes")]
    pub ensure_budget_minutes: u64,

    #[serde(default = "default_state_poll_secs")]
    pub state_poll_secs: u64,

    /// Faster state poll right after create/start
    #[serde(default = "default_fast_poll_millis")]
    pub fast_poll_millis: u64,

    #[serde(default = "default_create_wait_minutes")]
    pub create_wait_minutes: u64,

    #[serde(default = "default_start_wait_minutes")]
    pub start_wait_minutes: u64,

    #[serde(default = "default_ssh_poll_secs")]
    pub ssh_poll_secs: u64,

    #[serde(default = "default_ssh_wait_minutes")]
    pub ssh_wait_minutes: u64,

    #[serde(default = "default_health_poll_secs")]
    pub health_poll_secs: u64,

    #[serde(default = "default_health_max_minutes")]
    pub health_max_minutes: u64,

    /// Consecutive failed SSH probes on a transient sandbox before it is deleted
    #[serde(default = "default_stuck_probe_threshold")]
    pub stuck_probe_threshold: u32,

    /// Pause between upload and bootstrap trigger on a fresh sandbox
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            ensure_budget_minutes: default_ensure_budget_minutes(),
            state_poll_secs: default_state_poll_secs(),
            fast_poll_millis: default_fast_poll_millis(),
            create_wait_minutes: default_create_wait_minutes(),
            start_wait_minutes: default_start_wait_minutes(),
            ssh_poll_secs: default_ssh_poll_secs(),
            ssh_wait_minutes: default_ssh_wait_minutes(),
            health_poll_secs: default_health_poll_secs(),
            health_max_minutes: default_health_max_minutes(),
            stuck_probe_threshold: default_stuck_probe_threshold(),
            settle_secs: default_settle_secs(),
        }
    }
}

/// Billing quota parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Free core-hours per billing period
    #[serde(default = "default_included_core_hours")]
    pub included_core_hours: f64,

    /// Cores of `sandbox.machine_type`
    #[serde(default = "default_machine_cores")]
    pub machine_cores: f64,

    /// Rotate once fewer than this many runtime hours remain
    #[serde(default = "default_safety_buffer_hours")]
    pub safety_buffer_hours: f64,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            included_core_hours: default_included_core_hours(),
            machine_cores: default_machine_cores(),
            safety_buffer_hours: default_safety_buffer_hours(),
            api_base: default_api_base(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

/// Orchestrator loop timing and error policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default = "default_keep_alive_minutes")]
    pub keep_alive_minutes: u64,

    #[serde(default = "default_error_retry_minutes")]
    pub error_retry_minutes: u64,

    /// Consecutive failed iterations before emergency teardown and rotation
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Pause after rotating to a new credential
    #[serde(default = "default_rotation_delay_secs")]
    pub rotation_delay_secs: u64,

    /// Pause after an emergency rotation
    #[serde(default = "default_emergency_delay_secs")]
    pub emergency_delay_secs: u64,

    /// Route platform traffic through each credential's proxy
    #[serde(default = "default_true")]
    pub use_proxy: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            keep_alive_minutes: default_keep_alive_minutes(),
            error_retry_minutes: default_error_retry_minutes(),
            max_consecutive_errors: default_max_consecutive_errors(),
            rotation_delay_secs: default_rotation_delay_secs(),
            emergency_delay_secs: default_emergency_delay_secs(),
            use_proxy: true,
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_token_file() -> PathBuf {
    PathBuf::from("config/github_tokens.txt")
}

fn default_proxy_file() -> PathBuf {
    PathBuf::from("proxysync/success_proxy.txt")
}

fn default_fallback_proxy_file() -> PathBuf {
    PathBuf::from("proxysync/proxy.txt")
}

fn default_state_file() -> PathBuf {
    PathBuf::from(".hubkeeper-state.json")
}

fn default_account_cache_file() -> PathBuf {
    PathBuf::from(".hubkeeper-accounts.json")
}

fn default_bots_config() -> PathBuf {
    PathBuf::from("config/bots_config.json")
}

fn default_secrets_root() -> PathBuf {
    PathBuf::from("secrets")
}

fn default_upload_list() -> PathBuf {
    PathBuf::from("config/upload_files.txt")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_proxy_tool_dir() -> PathBuf {
    PathBuf::from("proxysync")
}

fn default_proxy_tool_command() -> String {
    "python".to_string()
}

fn default_cli() -> String {
    "gh".to_string()
}

fn default_display_tag() -> String {
    "automation-hub-runner".to_string()
}

fn default_machine_type() -> String {
    "standardLinux32gb".to_string()
}

fn default_idle_timeout() -> String {
    "240m".to_string()
}

fn default_bootstrap_script() -> String {
    "auto-start.sh".to_string()
}

fn default_bootstrap_log() -> String {
    "/tmp/auto_start.log".to_string()
}

fn default_done_marker() -> String {
    "/tmp/auto_start_done".to_string()
}

fn default_proxysync_failed_marker() -> String {
    "/tmp/auto_start_failed_proxysync".to_string()
}

fn default_deploy_failed_marker() -> String {
    "/tmp/auto_start_failed_deploy".to_string()
}

fn default_proxy_tool_files() -> Vec<PathBuf> {
    vec![
        PathBuf::from("config/apilist.txt"),
        PathBuf::from("proxysync/success_proxy.txt"),
    ]
}

fn default_proxy_tool_remote_dir() -> String {
    "proxysync/config".to_string()
}

fn default_command_timeout_secs() -> u64 {
    60
}

fn default_network_retries() -> u32 {
    2
}

fn default_network_retry_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    30
}

fn default_ensure_budget_minutes() -> u64 {
    20
}

fn default_state_poll_secs() -> u64 {
    3
}

fn default_fast_poll_millis() -> u64 {
    500
}

fn default_create_wait_minutes() -> u64 {
    10
}

fn default_start_wait_minutes() -> u64 {
    4
}

fn default_ssh_poll_secs() -> u64 {
    2
}

fn default_ssh_wait_minutes() -> u64 {
    10
}

fn default_health_poll_secs() -> u64 {
    10
}

fn default_health_max_minutes() -> u64 {
    4
}

fn default_stuck_probe_threshold() -> u32 {
    6
}

fn default_settle_secs() -> u64 {
    5
}

fn default_included_core_hours() -> f64 {
    120.0
}

fn default_machine_cores() -> f64 {
    4.0
}

fn default_safety_buffer_hours() -> f64 {
    2.0
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_http_timeout_secs() -> u64 {
    60
}

fn default_keep_alive_minutes() -> u64 {
    60
}

fn default_error_retry_minutes() -> u64 {
    5
}

fn default_max_consecutive_errors() -> u32 {
    3
}

fn default_rotation_delay_secs() -> u64 {
    5
}

fn default_emergency_delay_secs() -> u64 {
    30
}

impl SandboxConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Config {
    /// Load configuration from `hubkeeper.toml` in the project dir, using defaults if not found.
    pub fn load(project_dir: &Path) -> Result<Self> {
        Self::load_from(&project_dir.join(CONFIG_FILE), false)
    }

    /// Load configuration from an explicit file.
    ///
    /// With `required`, a missing file is an error instead of defaults.
    pub fn load_from(config_path: &Path, required: bool) -> Result<Self> {
        if !config_path.exists() {
            if required {
                anyhow::bail!("Config file not found: {}", config_path.display());
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;
        Ok(config)
    }

    /// Reject values that would divide by zero or spin a poll loop.
    pub fn validate(&self) -> Result<()> {
        let quota = &self.quota;
        if !quota.machine_cores.is_finite() || quota.machine_cores <= 0.0 {
            anyhow::bail!("quota.machine_cores must be positive, got {}", quota.machine_cores);
        }
        if !quota.included_core_hours.is_finite() || quota.included_core_hours < 0.0 {
            anyhow::bail!(
                "quota.included_core_hours must not be negative, got {}",
                quota.included_core_hours
            );
        }

        let polling = &self.polling;
        let intervals = [
            ("polling.state_poll_secs", polling.state_poll_secs),
            ("polling.fast_poll_millis", polling.fast_poll_millis),
            ("polling.ssh_poll_secs", polling.ssh_poll_secs),
            ("polling.health_poll_secs", polling.health_poll_secs),
        ];
        for (key, value) in intervals {
            if value == 0 {
                anyhow::bail!("{key} must be greater than zero");
            }
        }
        Ok(())
    }
}
