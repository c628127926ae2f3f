//! HTTP access to the platform's REST API.
//!
//! Used for the billing usage report and for resolving a token's login.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::QuotaConfig;
use crate::credentials::{mask_proxy, Credential};

/// One line of the billing usage report.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UsageItem {
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub quantity: f64,
}

#[derive(Debug, Deserialize)]
struct UsageReport {
    #[serde(rename = "usageItems", default)]
    usage_items: Vec<UsageItem>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

/// Why a platform API request failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The egress proxy wants re-authentication. Not a platform auth failure.
    #[error("Proxy authentication required (407)")]
    ProxyAuth,

    /// Connection-level failure (refused, reset, timed out).
    #[error("Network error: {0}")]
    Network(String),

    /// The platform answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The body did not match the expected shape.
    #[error("Invalid response: {0}")]
    Decode(String),

    /// No other proxy was available to retry through.
    #[error("No alternative proxy to retry through")]
    NoAlternativeProxy,

    /// Shutdown was requested between attempts.
    #[error("Cancelled")]
    Cancelled,
}

impl FetchError {
    /// Failures caused by the path to the platform rather than the platform itself.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::ProxyAuth | Self::Network(_))
    }

    /// The token itself was refused.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }
}

/// Platform REST calls needed by the quota service.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Billing usage line items for `username`.
    async fn fetch_usage(&self, credential: &Credential, username: &str) -> Result<Vec<UsageItem>, FetchError>;

    /// Login of the account owning the credential's token.
    async fn fetch_login(&self, credential: &Credential) -> Result<String, FetchError>;
}

/// `reqwest`-backed [`PlatformApi`].
pub struct HttpPlatformApi {
    api_base: String,
    timeout: Duration,
    use_proxy: bool,
}

impl HttpPlatformApi {
    pub fn new(config: &QuotaConfig, use_proxy: bool) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.http_timeout_secs),
            use_proxy,
        }
    }

    fn client(&self, credential: &Credential) -> Result<reqwest::Client, FetchError> {
        let builder = reqwest::Client::builder().timeout(self.timeout);
        let builder = match credential.proxy.as_deref().filter(|_| self.use_proxy) {
            Some(proxy) => {
                let proxy = reqwest::Proxy::all(proxy)
                    .map_err(|e| FetchError::Network(format!("invalid proxy {}: {e}", mask_proxy(proxy))))?;
                builder.proxy(proxy)
            }
            // Ignore any proxy inherited from the environment.
            None => builder.no_proxy(),
        };
        builder
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        credential: &Credential,
        path: &str,
        agent: &str,
    ) -> Result<T, FetchError> {
        let url = format!("{}{path}", self.api_base);
        debug!(url = %url, "platform API request");

        let response = self
            .client(credential)?
            .get(&url)
            .bearer_auth(&credential.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, agent)
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Err(FetchError::ProxyAuth);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: body.lines().next().unwrap_or_default().to_string(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PlatformApi for HttpPlatformApi {
    async fn fetch_usage(&self, credential: &Credential, username: &str) -> Result<Vec<UsageItem>, FetchError> {
        let report: UsageReport = self
            .get_json(
                credential,
                &format!("/users/{username}/settings/billing/usage"),
                &format!("hubkeeper-billing/{username}"),
            )
            .await?;
        Ok(report.usage_items)
    }

    async fn fetch_login(&self, credential: &Credential) -> Result<String, FetchError> {
        let user: UserResponse = self.get_json(credential, "/user", "hubkeeper").await?;
        Ok(user.login)
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
    let text = format!("{err:#}").to_lowercase();
    if text.contains("407") || text.contains("proxy authentication") {
        FetchError::ProxyAuth
    } else {
        FetchError::Network(err.to_string())
    }
}
