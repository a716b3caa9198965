//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub oauth: OAuthConfig,
    pub b2c: B2cConfig,
    pub api: ApiConfig,
    pub token: TokenConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub authority_host: String,
    pub tenants: Vec<String>,
    pub redirect_uri: String,
    #[serde(default)]
    pub username: String,
    pub scopes: ScopesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopesConfig {
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct B2cConfig {
    pub client_id: String,
    pub authority: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub graph_me_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub refresh_before_expiry_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub file_name: String,
    #[serde(default)]
    pub backend: CacheBackend,
    /// Explicit cache file path; defaults to the platform cache directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Where the serialized token cache is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    File,
    Keychain,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config: Config =
            toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")?;

        if let Ok(client_id) = env::var("AZURE_CLIENT_ID") {
            config.oauth.client_id = client_id;
        }

        if let Ok(tenant) = env::var("AZURE_TENANT_ID") {
            // An explicit tenant becomes the default; the rest stay selectable.
            config.oauth.tenants.retain(|t| t != &tenant);
            config.oauth.tenants.insert(0, tenant);
        }

        if let Ok(redirect_uri) = env::var("AZURE_REDIRECT_URI") {
            config.oauth.redirect_uri = redirect_uri;
        }

        if let Ok(path) = env::var("MSAL_CACHE_PATH") {
            config.cache.path = Some(PathBuf::from(path));
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate that required configuration is present.
    fn validate(&self) -> Result<()> {
        if self.oauth.client_id.is_empty() || self.oauth.client_id == "YOUR_AZURE_AD_CLIENT_ID" {
            anyhow::bail!(
                "Azure AD client_id not configured. Set AZURE_CLIENT_ID environment variable \
                 or update config.toml"
            );
        }

        if self.oauth.tenants.iter().all(|t| t.trim().is_empty()) {
            anyhow::bail!(
                "No tenant configured. Set AZURE_TENANT_ID environment variable \
                 or update config.toml"
            );
        }

        if self.oauth.scopes.scopes.is_empty() {
            anyhow::bail!("At least one scope must be configured in [oauth.scopes]");
        }

        url::Url::parse(&self.oauth.redirect_uri)
            .with_context(|| format!("Invalid redirect_uri: {}", self.oauth.redirect_uri))?;

        Ok(())
    }

    /// Whether the B2C sample authority has a usable client id.
    pub fn b2c_enabled(&self) -> bool {
        !self.b2c.client_id.is_empty() && self.b2c.client_id != "YOUR_B2C_CLIENT_ID"
    }

    /// Access tokens this close to expiry are treated as expired.
    pub fn expiry_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token.refresh_before_expiry_seconds as i64)
    }
}
