//! ARM Authentication
//!
//! Tokens are acquired by shelling out to the Azure CLI
//! (`az account get-access-token`). Acquisition is behind the
//! [`TokenProvider`] trait so tests and callers holding a pre-issued token can
//! plug in their own source.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::RwLock;

/// Refresh tokens this long before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Used when the CLI output has no parseable expiry
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Access token as printed by `az account get-access-token --output json`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    /// Local time, e.g. `2024-01-01 12:00:00.000000`
    #[serde(default)]
    pub expires_on: Option<String>,
    /// Unix seconds (newer CLI versions)
    #[serde(default, rename = "expires_on")]
    pub expires_on_unix: Option<i64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl AccessToken {
    /// Bare bearer token, mostly for tests
    pub fn bearer(token: &str) -> Self {
        Self {
            access_token: token.to_string(),
            token_type: default_token_type(),
            tenant: None,
            subscription: None,
            expires_on: None,
            expires_on_unix: None,
        }
    }

    /// `Authorization` header value
    pub fn header_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        if let Some(secs) = self.expires_on_unix {
            return DateTime::from_timestamp(secs, 0);
        }
        let raw = self.expires_on.as_deref()?;
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").ok()?;
        Local
            .from_local_datetime(&naive)
            .single()
            .map(|local| local.with_timezone(&Utc))
    }

    /// Time left before the token should be refreshed
    fn time_to_live(&self) -> Duration {
        let ttl = match self.expires_at() {
            Some(expires_at) => (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
            None => DEFAULT_TOKEN_TTL,
        };
        ttl.saturating_sub(TOKEN_EXPIRY_BUFFER)
    }
}

/// Source of fresh access tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken>;
}

/// Fetches tokens from the Azure CLI
#[derive(Debug, Clone, Default)]
pub struct AzCliTokenProvider {
    tenant_id: Option<String>,
}

impl AzCliTokenProvider {
    pub fn new(tenant_id: Option<String>) -> Self {
        Self { tenant_id }
    }
}

#[async_trait]
impl TokenProvider for AzCliTokenProvider {
    async fn fetch_token(&self) -> Result<AccessToken> {
        let mut command = Command::new("az");
        command.args(["account", "get-access-token", "--output", "json"]);
        if let Some(tenant) = &self.tenant_id {
            command.args(["--tenant", tenant]);
        }

        let output = command
            .output()
            .await
            .context("Failed to run 'az'. Is the Azure CLI installed?")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "'az account get-access-token' failed. Run 'az login'. {}",
                stderr.trim()
            );
        }

        serde_json::from_slice(&output.stdout).context("Failed to parse az CLI token output")
    }
}

/// Always returns the same token
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self) -> Result<AccessToken> {
        Ok(self.token.clone())
    }
}

/// Credentials holder with token caching
#[derive(Clone)]
pub struct ArmCredentials {
    provider: Arc<dyn TokenProvider>,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    token: AccessToken,
    /// Expiry with the buffer already applied
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl ArmCredentials {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Credentials backed by the Azure CLI
    pub fn from_cli(tenant_id: Option<String>) -> Self {
        Self::new(Arc::new(AzCliTokenProvider::new(tenant_id)))
    }

    /// Get a valid access token, using the cache when possible
    pub async fn get_token(&self) -> Result<AccessToken> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let token = self
            .provider
            .fetch_token()
            .await
            .context("Failed to acquire auth token")?;
        let ttl = token.time_to_live();

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: token.clone(),
                expires_at: Instant::now() + ttl,
            });
        }

        tracing::debug!("New token cached, expires in ~{} minutes", ttl.as_secs() / 60);
        Ok(token)
    }

    /// Drop the cached token and fetch a fresh one
    pub async fn refresh_token(&self) -> Result<AccessToken> {
        {
            let mut cache = self.token_cache.write().await;
            *cache = None;
        }
        self.get_token().await
    }
}

/// Tenant from the environment (`AZURE_TENANT_ID`, then `ARM_TENANT_ID`)
pub fn default_tenant_id() -> Option<String> {
    ["AZURE_TENANT_ID", "ARM_TENANT_ID"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
