//! Read-only view of the accounts held by the token cache.

use std::sync::Arc;

use super::model::Account;
use super::shared::SharedTokenCache;

/// Lists signed-in accounts. All changes go through the token cache.
#[derive(Clone)]
pub struct AccountRegistry {
    cache: Arc<SharedTokenCache>,
}

impl AccountRegistry {
    pub fn new(cache: Arc<SharedTokenCache>) -> Self {
        Self { cache }
    }

    /// All known accounts, ordered by account key.
    pub async fn list_accounts(&self) -> Vec<Account> {
        self.cache.read(|c| c.accounts().cloned().collect()).await
    }

    /// First account whose username matches, ignoring case.
    pub async fn find(&self, username: &str) -> Option<Account> {
        self.cache
            .read(|c| {
                c.accounts()
                    .find(|a| a.username.eq_ignore_ascii_case(username))
                    .cloned()
            })
            .await
    }
}
