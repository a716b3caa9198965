//! Token cache with persistent storage.
//!
//! Provides the in-memory cache of accounts and tokens, its serialized
//! snapshot format, the file and Keychain stores it is persisted to, and the
//! account registry view.

#[cfg(target_os = "macos")]
pub mod keychain;
pub mod model;
pub mod registry;
pub mod secure;
pub mod shared;
pub mod store;
pub mod token_cache;

pub use model::{Account, CredentialKind, ScopeSet, TokenRecord};
pub use registry::AccountRegistry;
pub use secure::SecureString;
pub use shared::SharedTokenCache;
pub use store::{CacheStore, FileCacheStore};
pub use token_cache::TokenCache;
