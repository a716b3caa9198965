//! In-memory token cache with deterministic serialization and change tracking.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::{Account, CredentialKind, ScopeSet, TokenRecord};
use crate::error::CacheError;

/// Version written into every snapshot.
const SCHEMA_VERSION: u32 = 1;

/// A credential together with the account that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CachedCredential {
    account: String,
    token: TokenRecord,
}

/// On-disk layout of the cache.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheSnapshot {
    #[serde(rename = "Version")]
    version: u32,
    #[serde(rename = "Account", default)]
    accounts: BTreeMap<String, Account>,
    #[serde(rename = "AccessToken", default)]
    access_tokens: BTreeMap<String, CachedCredential>,
    #[serde(rename = "RefreshToken", default)]
    refresh_tokens: BTreeMap<String, CachedCredential>,
    #[serde(rename = "IdToken", default)]
    id_tokens: BTreeMap<String, CachedCredential>,
}

/// Accounts and their tokens.
///
/// Every mutation sets a dirty flag; callers persist the cache only while
/// [`TokenCache::has_state_changed`] is true and call
/// [`TokenCache::mark_persisted`] after a successful write.
#[derive(Debug, Clone, Default)]
pub struct TokenCache {
    accounts: BTreeMap<String, Account>,
    credentials: BTreeMap<String, CachedCredential>,
    dirty: bool,
}

impl PartialEq for TokenCache {
    fn eq(&self, other: &Self) -> bool {
        self.accounts == other.accounts && self.credentials == other.credentials
    }
}

impl Eq for TokenCache {}

impl TokenCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deserialize a cache from persisted bytes.
    ///
    /// Empty or whitespace-only input yields an empty cache.
    pub fn load(bytes: &[u8]) -> Result<Self, CacheError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }

        let snapshot: CacheSnapshot =
            serde_json::from_slice(bytes).map_err(|e| CacheError::Corrupt(e.to_string()))?;

        if snapshot.version > SCHEMA_VERSION {
            return Err(CacheError::Corrupt(format!(
                "unsupported cache version {}",
                snapshot.version
            )));
        }

        // Keys are derived data; a mismatch would split one slot in two.
        for (key, account) in &snapshot.accounts {
            if *key != account.key() {
                return Err(CacheError::Corrupt(format!(
                    "account stored under {} instead of {}",
                    key,
                    account.key()
                )));
            }
        }

        let mut cache = Self {
            accounts: snapshot.accounts,
            credentials: BTreeMap::new(),
            dirty: false,
        };

        let sections = [
            (CredentialKind::AccessToken, snapshot.access_tokens),
            (CredentialKind::RefreshToken, snapshot.refresh_tokens),
            (CredentialKind::IdToken, snapshot.id_tokens),
        ];
        for (kind, section) in sections {
            for (key, credential) in section {
                if credential.token.kind != kind {
                    return Err(CacheError::Corrupt(format!(
                        "{:?} stored in the {:?} section",
                        credential.token.kind, kind
                    )));
                }
                if !cache.accounts.contains_key(&credential.account) {
                    return Err(CacheError::Corrupt(format!(
                        "credential {} references unknown account",
                        key
                    )));
                }
                let expected = credential.token.slot_key(&credential.account);
                if key != expected {
                    return Err(CacheError::Corrupt(format!(
                        "credential stored under {} instead of {}",
                        key, expected
                    )));
                }
                cache.credentials.insert(key, credential);
            }
        }

        debug!(
            accounts = cache.accounts.len(),
            credentials = cache.credentials.len(),
            "Token cache loaded"
        );
        Ok(cache)
    }

    /// Serialize the cache. Output is identical for identical logical state.
    pub fn serialize(&self) -> Result<Vec<u8>, CacheError> {
        let mut snapshot = CacheSnapshot {
            version: SCHEMA_VERSION,
            accounts: self.accounts.clone(),
            ..Default::default()
        };

        for (key, credential) in &self.credentials {
            let section = match credential.token.kind {
                CredentialKind::AccessToken => &mut snapshot.access_tokens,
                CredentialKind::RefreshToken => &mut snapshot.refresh_tokens,
                CredentialKind::IdToken => &mut snapshot.id_tokens,
            };
            section.insert(key.clone(), credential.clone());
        }

        Ok(serde_json::to_vec_pretty(&snapshot)?)
    }

    /// Insert or replace a record for `account`.
    ///
    /// A record replaces any existing record of the same kind, authority and
    /// (for access tokens) scope set. The account entry is created or updated.
    pub fn upsert(&mut self, account: &Account, record: TokenRecord) {
        let account_key = account.key();
        let slot = record.slot_key(&account_key);

        self.accounts.insert(account_key.clone(), account.clone());
        self.credentials.insert(
            slot,
            CachedCredential {
                account: account_key,
                token: record,
            },
        );
        self.dirty = true;
    }

    /// Freshest unexpired access token covering `scopes` at `authority`.
    pub fn lookup(
        &self,
        account: &Account,
        scopes: &ScopeSet,
        authority: &str,
    ) -> Option<&TokenRecord> {
        self.lookup_at(account, scopes, authority, Utc::now(), Duration::zero())
    }

    /// Like [`TokenCache::lookup`] with an explicit clock and expiry skew.
    pub fn lookup_at(
        &self,
        account: &Account,
        scopes: &ScopeSet,
        authority: &str,
        now: DateTime<Utc>,
        skew: Duration,
    ) -> Option<&TokenRecord> {
        let account_key = account.key();
        let authority = authority.to_lowercase();
        let wanted = scopes.without_reserved();

        self.credentials
            .values()
            .filter(|c| c.account == account_key)
            .map(|c| &c.token)
            .filter(|t| t.kind == CredentialKind::AccessToken)
            .filter(|t| t.authority == authority)
            .filter(|t| t.scopes.is_superset(&wanted))
            .filter(|t| !t.is_expired_at(now, skew))
            .max_by_key(|t| t.expires_on)
    }

    /// The refresh token for `account` at `authority`, if any.
    pub fn refresh_token(&self, account: &Account, authority: &str) -> Option<&TokenRecord> {
        self.slot(account, CredentialKind::RefreshToken, authority)
    }

    /// The ID token for `account` at `authority`, if any.
    pub fn id_token(&self, account: &Account, authority: &str) -> Option<&TokenRecord> {
        self.slot(account, CredentialKind::IdToken, authority)
    }

    fn slot(&self, account: &Account, kind: CredentialKind, authority: &str) -> Option<&TokenRecord> {
        let account_key = account.key();
        let authority = authority.to_lowercase();
        self.credentials
            .values()
            .find(|c| {
                c.account == account_key && c.token.kind == kind && c.token.authority == authority
            })
            .map(|c| &c.token)
    }

    /// Remove an account and all of its records.
    pub fn remove(&mut self, account: &Account) {
        let account_key = account.key();
        self.accounts.remove(&account_key);
        self.credentials.retain(|_, c| c.account != account_key);
        self.dirty = true;
    }

    /// Drop access tokens that expired before `now`. Returns how many were removed.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.credentials.len();
        self.credentials.retain(|_, c| {
            c.token.kind != CredentialKind::AccessToken
                || !c.token.is_expired_at(now, Duration::zero())
        });
        let removed = before - self.credentials.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Known accounts, ordered by account key.
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.credentials.is_empty()
    }

    /// True if the cache changed since it was loaded or last persisted.
    pub fn has_state_changed(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag after a successful write.
    pub fn mark_persisted(&mut self) {
        self.dirty = false;
    }
}
