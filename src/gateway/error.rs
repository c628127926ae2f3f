//! Classified failures of remote-access CLI calls.
//!
//! The gateway turns raw exit codes and stderr into these variants so the
//! lifecycle manager and the rotation loop can match on the failure mode.

use std::time::Duration;

/// Errors returned by [`super::RemoteGateway`] operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The call exceeded its timeout and the subprocess was killed.
    #[error("{operation} timed out after {timeout_secs} seconds")]
    Timeout { operation: String, timeout_secs: u64 },

    /// Bad credentials, forbidden, or rate limited. Never retried by the gateway.
    #[error("Credential rejected or rate limited: {message}")]
    AuthOrRateLimit { message: String },

    /// The platform reported the sandbox or resource as missing.
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Connection-level failure, including proxy authentication (407).
    #[error("Network error: {message}")]
    Network { message: String },

    /// The process-wide cancellation token fired.
    #[error("Cancelled")]
    Cancelled,

    /// The CLI binary could not be started.
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Any other non-zero exit. Carries the raw stderr.
    #[error("Command failed: {stderr}")]
    Other { stderr: String },
}

impl GatewayError {
    /// Creates a `Timeout` error from a `Duration`.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_secs: duration.as_secs(),
        }
    }

    /// Creates an `Other` error.
    pub fn other(stderr: impl Into<String>) -> Self {
        Self::Other {
            stderr: stderr.into(),
        }
    }

    /// Creates a `Network` error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates an `AuthOrRateLimit` error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthOrRateLimit {
            message: message.into(),
        }
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the credential itself was rejected.
    pub fn is_auth_or_rate_limit(&self) -> bool {
        matches!(self, Self::AuthOrRateLimit { .. })
    }

    /// Returns true if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the operation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Transient failures worth retrying a bounded number of times.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network { .. })
    }
}

const NETWORK_MARKERS: [&str; 13] = [
    "407 proxy authentication required",
    "dial tcp",
    "connection refused",
    "i/o timeout",
    "error connecting",
    "forcibly closed",
    "resolve host",
    "tls handshake timeout",
    "unreachable network",
    "unexpected eof",
    "connection reset",
    "handshake failed",
    "wsarecv",
];

/// Classify a failed CLI invocation from its stderr.
///
/// API failures are printed by the CLI as `HTTP <status>: <message> (<url>)`.
pub fn classify_failure(stderr: &str) -> GatewayError {
    let lower = stderr.to_lowercase();
    let summary = first_line(stderr);

    // The CLI's own start-wait timeout mentions timeouts but is not a network fault.
    let start_timeout = lower.contains("timed out while waiting for the codespace to start");
    let not_found = has_status(&lower, 404, "not found")
        || (lower.contains("not found") && !lower.contains("command not found"));

    if lower.contains("bad credentials")
        || has_status(&lower, 401, "unauthorized")
        || has_status(&lower, 403, "forbidden")
        || lower.contains("api rate limit exceeded")
    {
        return GatewayError::auth(summary);
    }
    if !start_timeout && !not_found && NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
        return GatewayError::network(summary);
    }
    if not_found {
        return GatewayError::NotFound { message: summary };
    }
    GatewayError::other(stderr.trim())
}

/// `HTTP 404`, `status 404` or `404 Not Found`, on lowercased text.
fn has_status(lower: &str, code: u16, reason: &str) -> bool {
    lower.contains(&format!("http {code}"))
        || lower.contains(&format!("status {code}"))
        || lower.contains(&format!("{code} {reason}"))
}

/// A failed `stop` on a sandbox that is already stopped counts as success.
pub fn is_benign_stop(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("is not running") || lower.contains("already stopped")
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no stderr")
        .to_string()
}
