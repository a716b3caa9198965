//! Token cache data model: accounts, credential records, and scope sets.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::secure::SecureString;

/// OIDC scopes that are always requested but never key an access token.
pub const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Truncate a timestamp to whole seconds, the precision of the persisted format.
pub fn whole_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(t.timestamp(), 0).single().unwrap_or(t)
}

/// Normalized set of OAuth scopes.
///
/// Scopes are trimmed and lower-cased; ordering is stable so the set can be
/// used as part of a cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Parse a space-separated scope string as returned in token responses.
    pub fn parse(scopes: &str) -> Self {
        scopes.split_whitespace().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(&scope.trim().to_lowercase())
    }

    /// True if every scope in `other` is also in `self`.
    pub fn is_superset(&self, other: &ScopeSet) -> bool {
        self.0.is_superset(&other.0)
    }

    /// The set without OIDC reserved scopes.
    pub fn without_reserved(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|s| !RESERVED_SCOPES.contains(&s.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// The set plus OIDC reserved scopes, for outgoing requests.
    pub fn with_reserved(&self) -> Self {
        let mut scopes = self.0.clone();
        scopes.extend(RESERVED_SCOPES.iter().map(|s| s.to_string()));
        Self(scopes)
    }
}

impl<S: AsRef<str>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        f.write_str(&joined.join(" "))
    }
}

impl Serialize for ScopeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ScopeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| Self::parse(&s))
    }
}

/// A signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// User principal name, e.g. `alice@contoso.com`.
    pub username: String,

    /// Issuer host the account signed in through.
    pub environment: String,

    /// Tenant the account belongs to.
    pub home_tenant_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Directory object id from the ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
}

impl Account {
    pub fn new(
        username: impl Into<String>,
        environment: impl Into<String>,
        home_tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            environment: environment.into(),
            home_tenant_id: home_tenant_id.into(),
            display_name: None,
            object_id: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Issuer host plus home tenant, e.g. `login.microsoftonline.com/<tid>`.
    pub fn home_authority_id(&self) -> String {
        format!("{}/{}", self.environment, self.home_tenant_id).to_lowercase()
    }

    /// Cache key; accounts are unique by (username, home authority).
    pub fn key(&self) -> String {
        format!("{}-{}", self.home_authority_id(), self.username.to_lowercase())
    }
}

/// Credential kinds held by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CredentialKind {
    AccessToken,
    RefreshToken,
    IdToken,
}

impl CredentialKind {
    fn as_key(self) -> &'static str {
        match self {
            Self::AccessToken => "accesstoken",
            Self::RefreshToken => "refreshtoken",
            Self::IdToken => "idtoken",
        }
    }
}

/// A single cached credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub kind: CredentialKind,

    pub secret: SecureString,

    /// Canonical URL of the issuing authority.
    pub authority: String,

    /// Granted scopes (access tokens only).
    #[serde(default, skip_serializing_if = "ScopeSet::is_empty")]
    pub scopes: ScopeSet,

    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_on: Option<DateTime<Utc>>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub cached_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn access_token(
        secret: impl Into<SecureString>,
        authority: impl Into<String>,
        scopes: ScopeSet,
        expires_on: DateTime<Utc>,
    ) -> Self {
        Self::build(
            CredentialKind::AccessToken,
            secret.into(),
            authority.into(),
            scopes.without_reserved(),
            Some(expires_on),
        )
    }

    pub fn refresh_token(secret: impl Into<SecureString>, authority: impl Into<String>) -> Self {
        Self::build(
            CredentialKind::RefreshToken,
            secret.into(),
            authority.into(),
            ScopeSet::default(),
            None,
        )
    }

    pub fn id_token(
        secret: impl Into<SecureString>,
        authority: impl Into<String>,
        expires_on: DateTime<Utc>,
    ) -> Self {
        Self::build(
            CredentialKind::IdToken,
            secret.into(),
            authority.into(),
            ScopeSet::default(),
            Some(expires_on),
        )
    }

    fn build(
        kind: CredentialKind,
        secret: SecureString,
        authority: String,
        scopes: ScopeSet,
        expires_on: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            kind,
            secret,
            authority: authority.to_lowercase(),
            scopes,
            expires_on: expires_on.map(whole_seconds),
            cached_at: whole_seconds(Utc::now()),
        }
    }

    /// Whether the record is expired at `now`, counting `skew` as already expired.
    ///
    /// Records without an expiry (refresh tokens) never expire here.
    pub fn is_expired_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        match self.expires_on {
            Some(expires_on) => expires_on <= now + skew,
            None => false,
        }
    }

    /// Key of the slot this record occupies for `account_key`.
    ///
    /// Access tokens are slotted by (kind, authority, scopes); refresh and ID
    /// tokens by (kind, authority), so rotation replaces them in place.
    pub fn slot_key(&self, account_key: &str) -> String {
        match self.kind {
            CredentialKind::AccessToken => format!(
                "{}-{}-{}-{}",
                account_key,
                self.kind.as_key(),
                self.authority,
                self.scopes
            ),
            _ => format!("{}-{}-{}", account_key, self.kind.as_key(), self.authority),
        }
    }
}
