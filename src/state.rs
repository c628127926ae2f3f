use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Durable record of which credential is active and which sandbox belongs to it.
///
/// A non-null `active_sandbox` was believed healthy for the credential at
/// `current_index` when it was written. It may have gone stale since, so
/// readers must re-verify health before trusting it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default)]
    pub current_index: usize,
    #[serde(default)]
    pub active_sandbox: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Load state from file.
    ///
    /// A missing file yields the default state. A corrupt file is logged and
    /// also yields the default state so a bad write never blocks startup.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;

        match serde_json::from_str(&content) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "state file is corrupt, starting fresh");
                Ok(Self::default())
            }
        }
    }

    /// Save state atomically: write a sibling temp file, then rename over the target.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        self.updated_at = Some(Utc::now());
        let content = serde_json::to_string_pretty(self).context("Failed to serialize state")?;

        let file_name = path
            .file_name()
            .map_or_else(|| "state".into(), |n| n.to_string_lossy().into_owned());
        let tmp_path = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write state file: {}", tmp_path.display()))?;
        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e)
                .with_context(|| format!("Failed to replace state file: {}", path.display()));
        }

        Ok(())
    }
}
