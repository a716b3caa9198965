//! Authority selection for token requests.
//!
//! An authority is an issuer host plus a tenant, optionally with a B2C user
//! flow policy. Descriptors are immutable and chosen per request.

use std::fmt;

use url::Url;

use crate::error::AuthError;

/// Default issuer host for the Microsoft identity platform.
pub const DEFAULT_HOST: &str = "login.microsoftonline.com";

/// Tenant aliases that resolve to the signed-in user's home tenant.
const MULTI_TENANT_ALIASES: [&str; 3] = ["common", "organizations", "consumers"];

/// Path segment that marks a B2C (trust framework policy) authority.
const B2C_PREFIX: &str = "tfp";

/// The issuer a token request targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthorityDescriptor {
    host: String,
    tenant: String,
    policy: Option<String>,
}

/// Build the authority for `tenant` on `host`.
///
/// An empty tenant selects `common`.
pub fn select_authority(host: &str, tenant: &str) -> Result<AuthorityDescriptor, AuthError> {
    let tenant = tenant.trim();
    let tenant = if tenant.is_empty() { "common" } else { tenant };
    AuthorityDescriptor::build(host, tenant, None)
}

/// Tenants and policies become URL path segments, so only `[a-z0-9._-]`
/// is accepted and `.`/`..` are rejected.
fn is_path_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

impl AuthorityDescriptor {
    /// Build a B2C authority for a user flow `policy`.
    pub fn b2c(host: &str, tenant: &str, policy: &str) -> Result<Self, AuthError> {
        if policy.trim().is_empty() {
            return Err(AuthError::InvalidRequest("B2C policy is empty".into()));
        }
        Self::build(host, tenant, Some(policy))
    }

    /// Parse an authority URL such as `https://login.microsoftonline.com/common`
    /// or `https://contoso.b2clogin.com/tfp/contoso.onmicrosoft.com/b2c_1_susi/`.
    pub fn parse(authority: &str) -> Result<Self, AuthError> {
        let url = Url::parse(authority)
            .map_err(|e| AuthError::InvalidRequest(format!("invalid authority URL: {}", e)))?;

        if url.scheme() != "https" {
            return Err(AuthError::InvalidRequest(
                "authority must use https".into(),
            ));
        }

        let host = url
            .host_str()
            .ok_or_else(|| AuthError::InvalidRequest("authority has no host".into()))?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        match segments.as_slice() {
            [prefix, tenant, policy] if prefix.eq_ignore_ascii_case(B2C_PREFIX) => {
                Self::b2c(host, tenant, policy)
            }
            [tenant] => Self::build(host, tenant, None),
            _ => Err(AuthError::InvalidRequest(format!(
                "unrecognized authority path: {}",
                url.path()
            ))),
        }
    }

    fn build(host: &str, tenant: &str, policy: Option<&str>) -> Result<Self, AuthError> {
        let host = host.trim().trim_end_matches('/').to_lowercase();
        let tenant = tenant.trim().to_lowercase();

        if !is_path_segment(&tenant) {
            return Err(AuthError::InvalidRequest(format!("invalid tenant: {:?}", tenant)));
        }
        if let Some(policy) = policy {
            if !is_path_segment(&policy.trim().to_lowercase()) {
                return Err(AuthError::InvalidRequest(format!("invalid policy: {:?}", policy)));
            }
        }

        // Reject anything that is not a bare host name.
        let parsed = Url::parse(&format!("https://{}/", host))
            .map_err(|_| AuthError::InvalidRequest(format!("invalid authority host: {}", host)))?;
        if parsed.host_str() != Some(host.as_str()) {
            return Err(AuthError::InvalidRequest(format!(
                "invalid authority host: {}",
                host
            )));
        }

        Ok(Self {
            host,
            tenant,
            policy: policy.map(|p| p.trim().to_lowercase()),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn policy(&self) -> Option<&str> {
        self.policy.as_deref()
    }

    pub fn is_b2c(&self) -> bool {
        self.policy.is_some()
    }

    /// True for `common`, `organizations` and `consumers`.
    pub fn is_multi_tenant(&self) -> bool {
        !self.is_b2c() && MULTI_TENANT_ALIASES.contains(&self.tenant.as_str())
    }

    /// The same authority pinned to `tenant` if this one is a multi-tenant alias.
    ///
    /// Tokens are cached under the tenant that actually issued them.
    pub fn for_tenant(&self, tenant: &str) -> Self {
        let tenant = tenant.trim().to_lowercase();
        if self.is_multi_tenant() && is_path_segment(&tenant) {
            Self {
                host: self.host.clone(),
                tenant,
                policy: None,
            }
        } else {
            self.clone()
        }
    }

    /// Canonical URL with a trailing slash; used as the cache key.
    pub fn canonical(&self) -> String {
        match &self.policy {
            Some(policy) => format!(
                "https://{}/{}/{}/{}/",
                self.host, B2C_PREFIX, self.tenant, policy
            ),
            None => format!("https://{}/{}/", self.host, self.tenant),
        }
    }

    pub fn authorize_endpoint(&self) -> Url {
        self.endpoint("oauth2/v2.0/authorize")
    }

    pub fn token_endpoint(&self) -> Url {
        self.endpoint("oauth2/v2.0/token")
    }

    pub fn device_code_endpoint(&self) -> Url {
        self.endpoint("oauth2/v2.0/devicecode")
    }

    fn endpoint(&self, path: &str) -> Url {
        // Host and tenant are validated at construction.
        let base = Url::parse(&self.canonical()).expect("Invalid authority URL");
        base.join(path).expect("Invalid endpoint path")
    }
}

impl fmt::Display for AuthorityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
