//! Bot registry (`bots_config.json`).
//!
//! Lists the bots deployed by the remote bootstrap script. The orchestrator
//! only needs each bot's relative path to know where its secrets go.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

/// The proxy tool is listed alongside the bots but handled separately.
const PROXY_TOOL_NAME: &str = "ProxySync-Tool";
const PROXY_TOOL_PATH: &str = "proxysync";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotEntry {
    pub name: String,
    /// Path relative to the sandbox workspace (and to the local secrets root)
    pub path: String,
    #[serde(default)]
    pub repo_url: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl BotEntry {
    /// Entries with their own upload path rather than per-bot secrets.
    pub fn is_special(&self) -> bool {
        self.name == PROXY_TOOL_NAME || self.path.trim_matches('/') == PROXY_TOOL_PATH
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotRegistry {
    #[serde(rename = "bots_and_tools", default)]
    pub entries: Vec<BotEntry>,
}

impl BotRegistry {
    /// Load the registry. A missing file yields an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "bot registry not found, no bot secrets will be uploaded");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read bot registry: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse bot registry: {}", path.display()))
    }

    /// Enabled entries that receive per-bot secret uploads.
    pub fn uploadable(&self) -> impl Iterator<Item = &BotEntry> {
        self.entries.iter().filter(|b| b.enabled && !b.is_special())
    }
}
