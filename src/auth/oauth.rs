//! OAuth2 token endpoint client with PKCE support.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

use super::authority::AuthorityDescriptor;
use crate::cache::{ScopeSet, SecureString};
use crate::error::AuthError;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const GRANT_TYPE_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// PKCE code verifier and challenge pair.
#[derive(Debug)]
pub struct PkceChallenge {
    /// The code verifier (stored locally, sent in token exchange).
    pub verifier: SecureString,
    /// The code challenge (SHA256 hash of verifier, sent in auth request).
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let verifier_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
        let verifier = URL_SAFE_NO_PAD.encode(&verifier_bytes);

        // challenge = BASE64URL(SHA256(verifier))
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            verifier: SecureString::new(verifier),
            challenge,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// Random CSRF state for an authorization request.
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let state_bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&state_bytes)
}

/// Parameters of a browser authorization request.
#[derive(Debug)]
pub struct AuthorizeParams<'a> {
    pub authority: &'a AuthorityDescriptor,
    pub client_id: &'a str,
    pub redirect_uri: &'a Url,
    pub scopes: &'a ScopeSet,
    pub state: &'a str,
    pub pkce: &'a PkceChallenge,
    pub login_hint: Option<&'a str>,
    pub prompt: Option<&'a str>,
}

/// Build the authorization URL for browser-based sign-in.
pub fn authorize_url(params: &AuthorizeParams<'_>) -> Url {
    let mut url = params.authority.authorize_endpoint();

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", params.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", params.redirect_uri.as_str())
            .append_pair("response_mode", "query")
            .append_pair("scope", &params.scopes.with_reserved().to_string())
            .append_pair("state", params.state)
            .append_pair("code_challenge", &params.pkce.challenge)
            .append_pair("code_challenge_method", "S256");
        if let Some(hint) = params.login_hint {
            query.append_pair("login_hint", hint);
        }
        if let Some(prompt) = params.prompt {
            query.append_pair("prompt", prompt);
        }
    }

    url
}

/// A grant presented to the token endpoint.
#[derive(Debug, Clone)]
pub enum Grant {
    AuthorizationCode {
        code: SecureString,
        redirect_uri: String,
        code_verifier: SecureString,
    },
    RefreshToken {
        refresh_token: SecureString,
    },
    DeviceCode {
        device_code: SecureString,
    },
    Password {
        username: String,
        password: SecureString,
    },
    Integrated {
        username: String,
    },
}

impl Grant {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::RefreshToken { .. } => "refresh_token",
            Self::DeviceCode { .. } => "device_code",
            Self::Password { .. } => "password",
            Self::Integrated { .. } => "integrated",
        }
    }
}

/// A token request: the grant, the requested scopes and a correlation id.
#[derive(Debug, Clone)]
pub struct GrantRequest {
    pub grant: Grant,
    pub scopes: ScopeSet,
    pub correlation_id: Uuid,
}

/// Token response from the identity platform.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: SecureString,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<SecureString>,
    pub id_token: Option<SecureString>,
    #[serde(default)]
    pub scope: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Device authorization response.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeInfo {
    pub user_code: String,
    pub device_code: SecureString,
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    /// Seconds until the device code expires.
    pub expires_in: u64,
    /// Seconds to wait between polls.
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
    #[serde(default)]
    pub message: String,
}

fn default_poll_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// The token-issuing endpoint.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Redeem a grant for tokens.
    async fn exchange(
        &self,
        authority: &AuthorityDescriptor,
        request: &GrantRequest,
    ) -> Result<TokenResponse, AuthError>;

    /// Start a device authorization.
    async fn request_device_code(
        &self,
        authority: &AuthorityDescriptor,
        scopes: &ScopeSet,
        correlation_id: Uuid,
    ) -> Result<DeviceCodeInfo, AuthError>;
}

/// Map an OAuth error code to the error taxonomy.
pub fn map_oauth_error(code: &str, description: &str) -> AuthError {
    match code {
        "invalid_grant" => AuthError::InvalidGrant(description.to_string()),
        "authorization_pending" => AuthError::AuthorizationPending,
        "slow_down" => AuthError::SlowDown,
        "expired_token" | "code_expired" => AuthError::DeviceCodeExpired,
        "authorization_declined" | "access_denied" => AuthError::UserCancelled,
        _ => AuthError::Protocol {
            code: code.to_string(),
            description: description.to_string(),
        },
    }
}

/// OAuth2 client for the identity platform token endpoints.
pub struct HttpTokenClient {
    client_id: String,
    http_client: reqwest::Client,
    /// Replaces scheme, host and port of every endpoint (tests only).
    endpoint_base: Option<Url>,
}

impl HttpTokenClient {
    /// Create a new token client for `client_id`.
    pub fn new(client_id: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client_id: client_id.into(),
            http_client,
            endpoint_base: None,
        })
    }

    #[cfg(test)]
    fn with_endpoint_base(mut self, base: Url) -> Self {
        self.endpoint_base = Some(base);
        self
    }

    fn resolve(&self, mut endpoint: Url) -> Url {
        if let Some(base) = &self.endpoint_base {
            let _ = endpoint.set_scheme(base.scheme());
            let _ = endpoint.set_host(base.host_str());
            let _ = endpoint.set_port(base.port());
        }
        endpoint
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        endpoint: Url,
        params: &[(&str, &str)],
        correlation_id: Uuid,
    ) -> Result<T, AuthError> {
        let response = self
            .http_client
            .post(self.resolve(endpoint))
            .header("client-request-id", correlation_id.to_string())
            .header("return-client-request-id", "true")
            .form(params)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| AuthError::Protocol {
                code: "invalid_response".into(),
                description: e.to_string(),
            });
        }

        let body = response.text().await.unwrap_or_default();
        if let Ok(err) = serde_json::from_str::<OAuthErrorResponse>(&body) {
            debug!(
                %correlation_id,
                "Token endpoint returned {}: {}", err.error, err.error_description
            );
            return Err(map_oauth_error(&err.error, &err.error_description));
        }

        // Log error details for debugging (doesn't expose to user)
        error!(%correlation_id, "Token endpoint failed: HTTP {} - {}", status, body);
        if status.is_server_error() {
            Err(AuthError::Network(format!("HTTP {}", status.as_u16())))
        } else {
            Err(AuthError::Protocol {
                code: format!("http_{}", status.as_u16()),
                description: status.canonical_reason().unwrap_or_default().to_string(),
            })
        }
    }
}

#[async_trait]
impl TokenExchange for HttpTokenClient {
    async fn exchange(
        &self,
        authority: &AuthorityDescriptor,
        request: &GrantRequest,
    ) -> Result<TokenResponse, AuthError> {
        let scope = request.scopes.with_reserved().to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("scope", scope.as_str()),
        ];

        match &request.grant {
            Grant::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                params.push(("grant_type", "authorization_code"));
                params.push(("code", code.as_str()));
                params.push(("redirect_uri", redirect_uri.as_str()));
                params.push(("code_verifier", code_verifier.as_str()));
            }
            Grant::RefreshToken { refresh_token } => {
                params.push(("grant_type", "refresh_token"));
                params.push(("refresh_token", refresh_token.as_str()));
            }
            Grant::DeviceCode { device_code } => {
                params.push(("grant_type", GRANT_TYPE_DEVICE_CODE));
                params.push(("device_code", device_code.as_str()));
            }
            Grant::Password { username, password } => {
                params.push(("grant_type", "password"));
                params.push(("username", username.as_str()));
                params.push(("password", password.as_str()));
            }
            Grant::Integrated { .. } => {
                return Err(AuthError::UnsupportedPlatform(
                    "the HTTP token client cannot negotiate Kerberos/WS-Trust credentials".into(),
                ));
            }
        }

        debug!(
            correlation_id = %request.correlation_id,
            "Redeeming {} grant at {}", request.grant.name(), authority
        );

        self.post_form(authority.token_endpoint(), &params, request.correlation_id)
            .await
    }

    async fn request_device_code(
        &self,
        authority: &AuthorityDescriptor,
        scopes: &ScopeSet,
        correlation_id: Uuid,
    ) -> Result<DeviceCodeInfo, AuthError> {
        let scope = scopes.with_reserved().to_string();
        let params = [
            ("client_id", self.client_id.as_str()),
            ("scope", scope.as_str()),
        ];

        self.post_form(authority.device_code_endpoint(), &params, correlation_id)
            .await
    }
}

/// Parse an OAuth redirect URL to extract code and state.
pub fn parse_callback_url(url_string: &str) -> Result<(String, String), AuthError> {
    let url = Url::parse(url_string).map_err(|_| AuthError::InvalidAuthCode)?;

    let params: HashMap<_, _> = url.query_pairs().collect();

    if let Some(error) = params.get("error") {
        let description = params
            .get("error_description")
            .map(|s| s.to_string())
            .unwrap_or_default();
        return Err(match error.as_ref() {
            "access_denied" => AuthError::UserCancelled,
            _ if description.is_empty() => AuthError::OAuthFailed(error.to_string()),
            _ => AuthError::OAuthFailed(description),
        });
    }

    let code = params
        .get("code")
        .ok_or(AuthError::InvalidAuthCode)?
        .to_string();

    let state = params
        .get("state")
        .ok_or(AuthError::StateValidationFailed)?
        .to_string();

    Ok((code, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::authority::{select_authority, DEFAULT_HOST};
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn authority() -> AuthorityDescriptor {
        select_authority(DEFAULT_HOST, "test-tenant").unwrap()
    }

    fn client_for(server: &MockServer) -> HttpTokenClient {
        HttpTokenClient::new("test-client")
            .unwrap()
            .with_endpoint_base(Url::parse(&server.uri()).unwrap())
    }

    fn refresh_request() -> GrantRequest {
        GrantRequest {
            grant: Grant::RefreshToken {
                refresh_token: "rt-1".into(),
            },
            scopes: ScopeSet::parse("user.read"),
            correlation_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_pkce_generation() {
        let pkce = PkceChallenge::new();

        // Verifier should be base64url encoded (43 chars for 32 bytes)
        assert_eq!(pkce.verifier.as_str().len(), 43);
        assert!(!pkce.challenge.is_empty());
        assert_ne!(pkce.verifier.as_str(), pkce.challenge);
    }

    #[test]
    fn test_authorize_url() {
        let pkce = PkceChallenge::new();
        let redirect = Url::parse("http://localhost:28491/callback").unwrap();
        let scopes = ScopeSet::parse("user.read");
        let url = authorize_url(&AuthorizeParams {
            authority: &authority(),
            client_id: "test-client",
            redirect_uri: &redirect,
            scopes: &scopes,
            state: "xyz",
            pkce: &pkce,
            login_hint: Some("alice@contoso.com"),
            prompt: None,
        });

        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(url.path(), "/test-tenant/oauth2/v2.0/authorize");
        assert_eq!(params["client_id"], "test-client");
        assert_eq!(params["code_challenge"], pkce.challenge);
        assert_eq!(params["scope"], "offline_access openid profile user.read");
        assert_eq!(params["login_hint"], "alice@contoso.com");
        assert!(!params.contains_key("prompt"));
    }

    #[test]
    fn test_parse_callback_success() {
        let url = "http://localhost:28491/callback?code=abc123&state=xyz789";
        let (code, state) = parse_callback_url(url).unwrap();
        assert_eq!(code, "abc123");
        assert_eq!(state, "xyz789");
    }

    #[test]
    fn test_parse_callback_error() {
        let url = "http://localhost:28491/callback?error=server_error&error_description=Broken%20stuff";
        assert!(matches!(parse_callback_url(url), Err(AuthError::OAuthFailed(d)) if d == "Broken stuff"));

        let url = "http://localhost:28491/callback?error=access_denied";
        assert!(matches!(parse_callback_url(url), Err(AuthError::UserCancelled)));
    }

    #[test]
    fn test_parse_callback_missing_code() {
        let url = "http://localhost:28491/callback?state=xyz789";
        assert!(matches!(parse_callback_url(url), Err(AuthError::InvalidAuthCode)));
    }

    #[test]
    fn test_map_oauth_error() {
        assert!(matches!(map_oauth_error("invalid_grant", "bad"), AuthError::InvalidGrant(_)));
        assert!(matches!(map_oauth_error("slow_down", ""), AuthError::SlowDown));
        assert!(matches!(map_oauth_error("expired_token", ""), AuthError::DeviceCodeExpired));
        assert!(matches!(
            map_oauth_error("invalid_scope", "nope"),
            AuthError::Protocol { code, .. } if code == "invalid_scope"
        ));
    }

    #[tokio::test]
    async fn test_exchange_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/test-tenant/oauth2/v2.0/token"))
            .and(header_exists("client-request-id"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-2",
                "token_type": "Bearer",
                "expires_in": 3599,
                "refresh_token": "rt-2",
                "scope": "user.read openid profile"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server)
            .exchange(&authority(), &refresh_request())
            .await
            .unwrap();

        assert_eq!(response.access_token.as_str(), "at-2");
        assert_eq!(response.refresh_token.unwrap().as_str(), "rt-2");
        assert_eq!(response.expires_in, 3599);
        assert!(response.id_token.is_none());
    }

    #[tokio::test]
    async fn test_exchange_invalid_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "AADSTS50126: Invalid username or password."
            })))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .exchange(&authority(), &refresh_request())
            .await;
        assert!(matches!(result, Err(AuthError::InvalidGrant(d)) if d.contains("AADSTS50126")));
    }

    #[tokio::test]
    async fn test_exchange_server_error_is_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .exchange(&authority(), &refresh_request())
            .await;
        assert!(matches!(result, Err(AuthError::Network(_))));
    }

    #[tokio::test]
    async fn test_exchange_integrated_is_unsupported() {
        let client = HttpTokenClient::new("test-client").unwrap();
        let request = GrantRequest {
            grant: Grant::Integrated {
                username: "alice@contoso.com".into(),
            },
            scopes: ScopeSet::parse("user.read"),
            correlation_id: Uuid::new_v4(),
        };
        let result = client.exchange(&authority(), &request).await;
        assert!(matches!(result, Err(AuthError::UnsupportedPlatform(_))));
    }

    #[tokio::test]
    async fn test_request_device_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/test-tenant/oauth2/v2.0/devicecode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "user_code": "ABCD-EFGH",
                "device_code": "dc-1",
                "verification_uri": "https://microsoft.com/devicelogin",
                "expires_in": 900,
                "interval": 5,
                "message": "To sign in, use a web browser..."
            })))
            .mount(&server)
            .await;

        let info = client_for(&server)
            .request_device_code(&authority(), &ScopeSet::parse("user.read"), Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(info.user_code, "ABCD-EFGH");
        assert_eq!(info.device_code.as_str(), "dc-1");
        assert_eq!(info.interval, 5);
    }
}
