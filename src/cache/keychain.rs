//! macOS Keychain integration for the serialized token cache.
//!
//! Stores the whole cache snapshot as one generic password item.

use security_framework::passwords::{get_generic_password, set_generic_password};

use super::store::CacheStore;
use crate::error::CacheError;

/// Keychain service identifier.
pub const SERVICE: &str = "de.malvik.msal-console";

/// Account name of the cache item.
const ACCOUNT_TOKEN_CACHE: &str = "msal_token_cache";

/// Cache store backed by a Keychain generic password item.
#[derive(Debug, Clone)]
pub struct KeychainCacheStore {
    service: String,
    account: String,
}

impl KeychainCacheStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: ACCOUNT_TOKEN_CACHE.to_string(),
        }
    }
}

impl Default for KeychainCacheStore {
    fn default() -> Self {
        Self::new(SERVICE)
    }
}

impl CacheStore for KeychainCacheStore {
    fn read(&self) -> Result<Option<Vec<u8>>, CacheError> {
        match get_generic_password(&self.service, &self.account) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if is_not_found_error(&e) => Ok(None),
            Err(e) => Err(CacheError::Keychain(e.to_string())),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<(), CacheError> {
        set_generic_password(&self.service, &self.account, bytes)
            .map_err(|e| CacheError::Keychain(e.to_string()))
    }
}

/// Helper to check if a security framework error is "item not found".
fn is_not_found_error(error: &security_framework::base::Error) -> bool {
    // errSecItemNotFound = -25300
    error.code() == -25300
}
