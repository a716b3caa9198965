//! msal-console - token acquisition against the Microsoft identity platform
//!
//! A console application that signs in with one of several strategies, keeps
//! tokens in a persistent cache and calls Microsoft Graph with them.

#![deny(clippy::all)]

mod auth;
mod cache;
mod config;
mod console;
mod error;
mod platform;
mod settings;
#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use auth::authority::{select_authority, AuthorityDescriptor};
use auth::coordinator::{AcquisitionCoordinator, CoordinatorConfig};
use auth::graph::GraphClient;
use auth::oauth::HttpTokenClient;
use auth::web_ui::{SystemBrowser, WebUi};
use cache::{CacheStore, FileCacheStore, SharedTokenCache};
use config::{CacheBackend, Config};
use console::Console;

fn main() {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        // .env file is optional - only log if it's not a "file not found" error
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            eprintln!("\nPlease set the following environment variables:");
            eprintln!("  AZURE_CLIENT_ID=<your-azure-ad-client-id>");
            eprintln!("  AZURE_TENANT_ID=<your-tenant-id>");
            std::process::exit(1);
        }
    };

    init_logging(&config.logging.level);
    info!("Starting {} v{}", config.app.name, env!("CARGO_PKG_VERSION"));

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging.
///
/// Logs go to stderr so they do not interleave with the menu on stdout.
fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

async fn run(config: Config) -> Result<()> {
    let store = open_store(&config)?;
    let cache = Arc::new(SharedTokenCache::open(store).context("Failed to open token cache")?);

    let pruned = cache
        .update(|c| c.prune_expired(Utc::now()))
        .await
        .context("Failed to persist pruned token cache")?;
    if pruned > 0 {
        info!("Removed {} expired access token(s) from the cache", pruned);
    }

    let web_ui: Arc<dyn WebUi> = Arc::new(SystemBrowser::default());
    let coordinator = build_coordinator(&config, Arc::clone(&cache), Arc::clone(&web_ui))?;
    let b2c = if config.b2c_enabled() {
        Some(build_b2c_coordinator(&config, Arc::clone(&cache), web_ui)?)
    } else {
        info!("B2C client id not configured, option 6 is disabled");
        None
    };
    let graph = GraphClient::new(&config.api.graph_me_url)?;

    let mut console = Console::new(config, coordinator, b2c, graph)?;
    console.run().await?;

    // A failed write during the session leaves changes to retry here
    if cache.has_unsaved_changes().await {
        if let Err(e) = cache.flush().await {
            warn!("Token cache changes could not be saved: {}", e);
        }
    }
    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<dyn CacheStore>> {
    match config.cache.backend {
        CacheBackend::File => {
            let store = FileCacheStore::new(settings::cache_file_path(config));
            info!("Token cache file: {}", store.path().display());
            Ok(Arc::new(store))
        }
        #[cfg(target_os = "macos")]
        CacheBackend::Keychain => {
            info!("Token cache stored in the macOS Keychain");
            Ok(Arc::new(cache::keychain::KeychainCacheStore::default()))
        }
        #[cfg(not(target_os = "macos"))]
        CacheBackend::Keychain => {
            anyhow::bail!("The keychain cache backend is only available on macOS")
        }
    }
}

fn build_coordinator(
    config: &Config,
    cache: Arc<SharedTokenCache>,
    web_ui: Arc<dyn WebUi>,
) -> Result<AcquisitionCoordinator> {
    let tenant = config
        .oauth
        .tenants
        .iter()
        .find(|t| !t.trim().is_empty())
        .map(String::as_str)
        .unwrap_or_default();
    let authority = select_authority(&config.oauth.authority_host, tenant)?;

    let coordinator_config = CoordinatorConfig::new(
        &config.oauth.client_id,
        &config.oauth.redirect_uri,
        authority,
    )?
    .with_expiry_skew(config.expiry_skew());
    if coordinator_config.domain.is_none() {
        info!("No domain context, integrated auth is unavailable");
    }

    let exchange = Arc::new(HttpTokenClient::new(&config.oauth.client_id)?);
    Ok(AcquisitionCoordinator::new(
        coordinator_config,
        cache,
        exchange,
        web_ui,
    ))
}

fn build_b2c_coordinator(
    config: &Config,
    cache: Arc<SharedTokenCache>,
    web_ui: Arc<dyn WebUi>,
) -> Result<AcquisitionCoordinator> {
    let authority = AuthorityDescriptor::parse(&config.b2c.authority)
        .with_context(|| format!("Invalid B2C authority: {}", config.b2c.authority))?;

    let coordinator_config =
        CoordinatorConfig::new(&config.b2c.client_id, &config.oauth.redirect_uri, authority)?
            .with_expiry_skew(config.expiry_skew());

    let exchange = Arc::new(HttpTokenClient::new(&config.b2c.client_id)?);
    Ok(AcquisitionCoordinator::new(
        coordinator_config,
        cache,
        exchange,
        web_ui,
    ))
}
