//! ID token claim decoding.
//!
//! The ID token arrives directly from the token endpoint over TLS, so only the
//! payload is decoded here; the signature is not checked.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::cache::Account;
use crate::error::AuthError;

/// Claims used to identify the signed-in account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTokenClaims {
    pub oid: Option<String>,
    pub sub: Option<String>,
    pub tid: Option<String>,
    pub preferred_username: Option<String>,
    pub upn: Option<String>,
    pub email: Option<String>,
    /// B2C returns sign-in addresses here.
    #[serde(default)]
    pub emails: Vec<String>,
    pub name: Option<String>,
    pub exp: Option<i64>,
}

impl IdTokenClaims {
    /// Decode the payload segment of a JWT.
    pub fn decode(id_token: &str) -> Result<Self, AuthError> {
        let payload = id_token
            .split('.')
            .nth(1)
            .ok_or_else(|| malformed("expected three dot-separated segments"))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| malformed(&e.to_string()))?;

        serde_json::from_slice(&bytes).map_err(|e| malformed(&e.to_string()))
    }

    /// Best available sign-in name.
    pub fn username(&self) -> Option<&str> {
        self.preferred_username
            .as_deref()
            .or(self.upn.as_deref())
            .or(self.email.as_deref())
            .or(self.emails.first().map(String::as_str))
    }

    pub fn expires_on(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    /// Build the cache account for these claims.
    ///
    /// `fallback_tenant` is used when the token carries no `tid` claim.
    pub fn to_account(&self, environment: &str, fallback_tenant: &str) -> Result<Account, AuthError> {
        let username = self
            .username()
            .ok_or_else(|| malformed("no username claim"))?;
        let tenant = self.tid.as_deref().unwrap_or(fallback_tenant);

        let mut account = Account::new(username, environment, tenant);
        account.display_name = self.name.clone();
        account.object_id = self.oid.clone().or_else(|| self.sub.clone());
        Ok(account)
    }
}

fn malformed(reason: &str) -> AuthError {
    AuthError::Protocol {
        code: "invalid_id_token".into(),
        description: reason.to_string(),
    }
}

#[cfg(test)]
pub(crate) fn encode_test_id_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig", header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_claims() {
        let token = encode_test_id_token(json!({
            "oid": "object-1",
            "tid": "tenant-1",
            "preferred_username": "alice@contoso.com",
            "name": "Alice",
            "exp": 1_700_000_000
        }));

        let claims = IdTokenClaims::decode(&token).unwrap();
        assert_eq!(claims.username(), Some("alice@contoso.com"));
        assert_eq!(claims.expires_on().unwrap().timestamp(), 1_700_000_000);

        let account = claims.to_account("login.microsoftonline.com", "common").unwrap();
        assert_eq!(account.home_tenant_id, "tenant-1");
        assert_eq!(account.display_name.as_deref(), Some("Alice"));
        assert_eq!(account.object_id.as_deref(), Some("object-1"));
    }

    #[test]
    fn test_b2c_claims_fallbacks() {
        let token = encode_test_id_token(json!({
            "sub": "subject-1",
            "emails": ["bob@fabrikam.com"]
        }));
        let claims = IdTokenClaims::decode(&token).unwrap();
        let account = claims
            .to_account("fabrikamb2c.b2clogin.com", "fabrikamb2c.onmicrosoft.com")
            .unwrap();
        assert_eq!(account.username, "bob@fabrikam.com");
        assert_eq!(account.home_tenant_id, "fabrikamb2c.onmicrosoft.com");
        assert_eq!(account.object_id.as_deref(), Some("subject-1"));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(IdTokenClaims::decode("not-a-jwt").is_err());
        assert!(IdTokenClaims::decode("a.!!!.c").is_err());

        let token = encode_test_id_token(json!({ "oid": "x" }));
        let claims = IdTokenClaims::decode(&token).unwrap();
        assert!(claims.to_account("host", "tenant").is_err());
    }
}
