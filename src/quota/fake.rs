//! Scripted platform API for testing.
//!
//! Returns predetermined usage and login responses in order (the last one
//! repeats) and records which proxy each usage request went through.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{FetchError, PlatformApi, UsageItem};
use crate::credentials::Credential;

type UsageResponse = Result<Vec<UsageItem>, FetchError>;
type LoginResponse = Result<String, FetchError>;

#[derive(Debug)]
pub(crate) struct ScriptedApi {
    responses: Vec<UsageResponse>,
    usage_calls: AtomicUsize,
    logins: Vec<LoginResponse>,
    login_calls: AtomicUsize,
    login_proxies: Mutex<Vec<Option<String>>>,
    proxies_used: Mutex<Vec<Option<String>>>,
}

impl ScriptedApi {
    /// Responses in order; the last one repeats.
    pub fn new(responses: Vec<UsageResponse>) -> Self {
        Self {
            responses,
            usage_calls: AtomicUsize::new(0),
            logins: Vec::new(),
            login_calls: AtomicUsize::new(0),
            login_proxies: Mutex::new(Vec::new()),
            proxies_used: Mutex::new(Vec::new()),
        }
    }

    /// Always report these usage items.
    pub fn usage(items: Vec<UsageItem>) -> Self {
        Self::new(vec![Ok(items)])
    }

    /// Report heavy usage: well past the included allowance.
    pub fn exhausted() -> Self {
        Self::usage(vec![UsageItem {
            product: "codespaces".to_string(),
            sku: "Codespaces compute 4-core".to_string(),
            quantity: 1000.0,
        }])
    }

    pub fn with_login(self, login: &str) -> Self {
        self.with_logins(vec![Ok(login.to_string())])
    }

    /// Login responses in order; the last one repeats. Without any, the
    /// token is rejected.
    pub fn with_logins(mut self, logins: Vec<LoginResponse>) -> Self {
        self.logins = logins;
        self
    }

    pub fn usage_calls(&self) -> usize {
        self.usage_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn proxies_used(&self) -> Vec<Option<String>> {
        self.proxies_used.lock().unwrap().clone()
    }

    pub fn login_proxies(&self) -> Vec<Option<String>> {
        self.login_proxies.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformApi for ScriptedApi {
    async fn fetch_usage(&self, credential: &Credential, _username: &str) -> Result<Vec<UsageItem>, FetchError> {
        let count = self.usage_calls.fetch_add(1, Ordering::SeqCst);
        self.proxies_used.lock().unwrap().push(credential.proxy.clone());
        let index = count.min(self.responses.len().saturating_sub(1));
        self.responses
            .get(index)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_login(&self, credential: &Credential) -> Result<String, FetchError> {
        let count = self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login_proxies.lock().unwrap().push(credential.proxy.clone());
        let index = count.min(self.logins.len().saturating_sub(1));
        self.logins.get(index).cloned().unwrap_or_else(|| {
            Err(FetchError::Status {
                status: 401,
                body: "Bad credentials".to_string(),
            })
        })
    }
}
