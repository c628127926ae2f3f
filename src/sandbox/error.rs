//! Domain-specific error types for sandbox lifecycle operations.
//!
//! Polling failures inside the lifecycle manager are retried or turned into
//! delete-and-retry; only these escape to the rotation loop.

use std::time::Duration;

use crate::gateway::GatewayError;

/// Errors that can occur while provisioning or verifying a sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The sandbox never converged (state, SSH) within its wait budget.
    #[error("Sandbox {name} is stuck: {reason}")]
    Stuck { name: String, reason: String },

    /// The overall ensure budget ran out and the final create attempt failed too.
    #[error("No healthy sandbox after {budget_mins} minutes: {last_error}")]
    BudgetExhausted { budget_mins: u64, last_error: String },

    /// The create call failed or produced no usable sandbox.
    #[error("Sandbox creation failed: {message}")]
    CreateFailed { message: String },

    /// The platform rejected the credential (bad token, forbidden, rate limited).
    #[error("Credential rejected: {message}")]
    CredentialRejected { message: String },

    /// A platform call failed in a way polling could not absorb.
    #[error("Platform call failed: {message}")]
    Platform { message: String },

    /// Shutdown was requested.
    #[error("Cancelled")]
    Cancelled,
}

impl SandboxError {
    /// Creates a `Stuck` error.
    pub fn stuck(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Stuck {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `BudgetExhausted` error.
    pub fn budget_exhausted(budget: Duration, last_error: impl Into<String>) -> Self {
        Self::BudgetExhausted {
            budget_mins: budget.as_secs() / 60,
            last_error: last_error.into(),
        }
    }

    /// Creates a `CreateFailed` error.
    pub fn create_failed(message: impl Into<String>) -> Self {
        Self::CreateFailed {
            message: message.into(),
        }
    }

    /// Returns true if the credential should be rotated immediately.
    pub fn is_credential_rejected(&self) -> bool {
        matches!(self, Self::CredentialRejected { .. })
    }

    /// Returns true if shutdown interrupted the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if this is a stuck-sandbox error.
    #[allow(dead_code)] // Public API for callers
    pub fn is_stuck(&self) -> bool {
        matches!(self, Self::Stuck { .. })
    }
}

impl From<GatewayError> for SandboxError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::AuthOrRateLimit { message } => Self::CredentialRejected { message },
            GatewayError::Cancelled => Self::Cancelled,
            other => Self::Platform {
                message: other.to_string(),
            },
        }
    }
}
