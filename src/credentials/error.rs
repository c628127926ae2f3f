//! Errors raised while loading local credential configuration.
//!
//! These are the only errors allowed to stop the process at startup.

use std::path::{Path, PathBuf};

/// Missing or malformed local configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required file does not exist.
    #[error("Required file not found: {}", path.display())]
    MissingFile { path: PathBuf },

    /// A file exists but could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file was read but its content is not usable.
    #[error("Malformed {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    /// The token line contained no token with a recognised prefix.
    #[error("No valid tokens in {} (expected ghp_ or github_pat_ prefixes)", path.display())]
    NoTokens { path: PathBuf },
}

impl ConfigError {
    /// Creates a `MissingFile` error.
    pub fn missing_file(path: &Path) -> Self {
        Self::MissingFile {
            path: path.to_path_buf(),
        }
    }

    /// Creates an `Unreadable` error.
    pub fn unreadable(path: &Path, source: std::io::Error) -> Self {
        Self::Unreadable {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Creates a `Malformed` error.
    pub fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Creates a `NoTokens` error.
    pub fn no_tokens(path: &Path) -> Self {
        Self::NoTokens {
            path: path.to_path_buf(),
        }
    }

    /// Returns true if the file was missing entirely.
    pub fn is_missing_file(&self) -> bool {
        matches!(self, Self::MissingFile { .. })
    }

    /// Returns true if the file existed but had unusable content.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. } | Self::NoTokens { .. })
    }
}
