//! CLI command implementations.
//!
//! Each submodule implements one hubkeeper command. [`Services`] wires the
//! configuration into the components the commands share.

pub mod logs;
pub mod proxy_sync;
pub mod run;
pub mod status;
pub mod teardown;
pub mod validate;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::bots::BotRegistry;
use crate::config::{Config, PathsConfig};
use crate::credentials::CredentialStore;
use crate::gateway::{GhGateway, GhOptions, RemoteGateway};
use crate::proxy_tool::ProxySyncTool;
use crate::quota::{HttpPlatformApi, QuotaParams, QuotaService};
use crate::sandbox::{load_allow_list, LifecycleManager, LifecycleTimings, SecretUploader};

/// Configuration plus the loaded credential store.
pub(crate) struct Services {
    pub config: Config,
    pub project_dir: PathBuf,
    /// `config.paths` resolved against the project directory
    pub paths: PathsConfig,
    pub store: CredentialStore,
    pub use_proxy: bool,
    pub cancel: CancellationToken,
}

impl Services {
    /// Load credentials and state. Fails on a missing or malformed token file.
    pub fn load(config: Config, project_dir: &Path, no_proxy: bool, cancel: CancellationToken) -> Result<Self> {
        let paths = config.paths.resolved(project_dir);
        let store = CredentialStore::load(&paths).context("Failed to load credentials")?;
        let use_proxy = config.rotation.use_proxy && !no_proxy;
        Ok(Self {
            config,
            project_dir: project_dir.to_path_buf(),
            paths,
            store,
            use_proxy,
            cancel,
        })
    }

    pub fn gateway(&self) -> Arc<dyn RemoteGateway> {
        let create_timeout = std::time::Duration::from_secs(self.config.polling.create_wait_minutes * 60);
        let options = GhOptions::from_config(&self.config.sandbox, create_timeout, self.use_proxy);
        Arc::new(GhGateway::new(options, self.cancel.clone()))
    }

    pub fn quota(&self) -> QuotaService {
        let api = HttpPlatformApi::new(&self.config.quota, self.use_proxy);
        QuotaService::new(Arc::new(api), QuotaParams::from(&self.config.quota))
    }

    pub fn lifecycle(&self, gateway: Arc<dyn RemoteGateway>) -> Result<LifecycleManager> {
        let registry = BotRegistry::load(&self.paths.bots_config)?;
        let proxy_tool_files = self
            .config
            .sandbox
            .proxy_tool_files
            .iter()
            .map(|p| PathsConfig::resolve(&self.project_dir, p))
            .collect();
        let uploader = SecretUploader::new(
            registry,
            self.paths.secrets_root.clone(),
            load_allow_list(&self.paths.upload_list),
            proxy_tool_files,
            self.config.sandbox.proxy_tool_remote_dir.clone(),
            self.config.sandbox.command_timeout(),
        );
        Ok(LifecycleManager::new(
            gateway,
            uploader,
            &self.config.sandbox,
            LifecycleTimings::from_config(&self.config.polling, &self.config.sandbox),
            self.cancel.clone(),
        ))
    }

    pub fn proxy_tool(&self) -> ProxySyncTool {
        ProxySyncTool::from_paths(&self.paths, self.cancel.clone())
    }
}
