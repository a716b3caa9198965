//! Token acquisition across the supported strategies.
//!
//! Every attempt gets a correlation id that is logged with each state change
//! and sent to the identity provider as `client-request-id`. Tokens are only
//! written to the cache after an exchange has fully succeeded.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::authority::AuthorityDescriptor;
use super::device_code;
use super::id_token::IdTokenClaims;
use super::oauth::{
    authorize_url, generate_state, parse_callback_url, AuthorizeParams, DeviceCodeInfo, Grant,
    GrantRequest, PkceChallenge, TokenExchange, TokenResponse,
};
use super::requests::{
    DeviceCodeRequest, IntegratedAuthRequest, InteractiveRequest, SilentRequest,
    UsernamePasswordRequest,
};
use super::web_ui::{AuthorizeRequest, WebUi};
use crate::cache::{Account, AccountRegistry, ScopeSet, SecureString, SharedTokenCache, TokenRecord};
use crate::error::AuthError;
use crate::platform;

/// Default window before expiry in which a cached access token is not used.
pub const DEFAULT_EXPIRY_SKEW_SECONDS: i64 = 300;

/// Client registration and environment for a coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub client_id: String,
    pub redirect_uri: Url,
    /// Authority used when a request does not name one.
    pub default_authority: AuthorityDescriptor,
    pub expiry_skew: Duration,
    /// DNS domain of the signed-in user, needed for integrated auth.
    pub domain: Option<String>,
}

impl CoordinatorConfig {
    pub fn new(
        client_id: &str,
        redirect_uri: &str,
        default_authority: AuthorityDescriptor,
    ) -> Result<Self, AuthError> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(AuthError::InvalidRequest("client id is required".into()));
        }
        let redirect_uri = Url::parse(redirect_uri)
            .map_err(|e| AuthError::InvalidRequest(format!("invalid redirect URI: {}", e)))?;

        Ok(Self {
            client_id: client_id.to_string(),
            redirect_uri,
            default_authority,
            expiry_skew: Duration::seconds(DEFAULT_EXPIRY_SKEW_SECONDS),
            domain: platform::domain_name(),
        })
    }

    pub fn with_expiry_skew(mut self, skew: Duration) -> Self {
        self.expiry_skew = skew;
        self
    }

    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }
}

/// Acquisition strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Silent,
    Interactive,
    DeviceCode,
    IntegratedAuth,
    UsernamePassword,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Silent => "silent",
            Self::Interactive => "interactive",
            Self::DeviceCode => "device code",
            Self::IntegratedAuth => "integrated auth",
            Self::UsernamePassword => "username/password",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a single acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Requested,
    Running(Strategy),
    Succeeded(Strategy),
    Failed(Strategy),
}

/// Where the returned access token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Cache,
    IdentityProvider,
}

/// A successfully acquired token.
#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    pub access_token: SecureString,
    pub id_token: Option<SecureString>,
    pub account: Account,
    pub scopes: ScopeSet,
    pub expires_on: DateTime<Utc>,
    /// Canonical authority the token was issued by.
    pub authority: String,
    pub source: TokenSource,
    pub correlation_id: Uuid,
}

struct Attempt {
    correlation_id: Uuid,
    state: AcquisitionState,
}

impl Attempt {
    fn start(strategy: Strategy) -> Self {
        let mut attempt = Self {
            correlation_id: Uuid::new_v4(),
            state: AcquisitionState::Requested,
        };
        debug!(correlation_id = %attempt.correlation_id, "Token acquisition requested");
        attempt.transition(AcquisitionState::Running(strategy));
        attempt
    }

    fn strategy(&self) -> Option<Strategy> {
        match self.state {
            AcquisitionState::Requested => None,
            AcquisitionState::Running(s)
            | AcquisitionState::Succeeded(s)
            | AcquisitionState::Failed(s) => Some(s),
        }
    }

    fn transition(&mut self, next: AcquisitionState) {
        debug!(
            correlation_id = %self.correlation_id,
            "Acquisition state {:?} -> {:?}", self.state, next
        );
        self.state = next;
    }

    fn finish<T>(mut self, result: Result<T, AuthError>) -> Result<T, AuthError> {
        let Some(strategy) = self.strategy() else {
            return result;
        };
        match &result {
            Ok(_) => {
                self.transition(AcquisitionState::Succeeded(strategy));
                info!(correlation_id = %self.correlation_id, "{} acquisition succeeded", strategy);
            }
            Err(e) => {
                self.transition(AcquisitionState::Failed(strategy));
                info!(correlation_id = %self.correlation_id, "{} acquisition failed: {}", strategy, e);
            }
        }
        result
    }
}

/// Acquires tokens and keeps the shared cache up to date.
pub struct AcquisitionCoordinator {
    config: CoordinatorConfig,
    cache: Arc<SharedTokenCache>,
    exchange: Arc<dyn TokenExchange>,
    web_ui: Arc<dyn WebUi>,
}

impl AcquisitionCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        cache: Arc<SharedTokenCache>,
        exchange: Arc<dyn TokenExchange>,
        web_ui: Arc<dyn WebUi>,
    ) -> Self {
        Self {
            config,
            cache,
            exchange,
            web_ui,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> AccountRegistry {
        AccountRegistry::new(Arc::clone(&self.cache))
    }

    /// Accounts with tokens in the cache.
    pub async fn accounts(&self) -> Vec<Account> {
        self.registry().list_accounts().await
    }

    /// Remove `account` and all of its tokens from the cache.
    pub async fn sign_out(&self, account: &Account) -> Result<(), AuthError> {
        self.cache.update(|cache| cache.remove(account)).await?;
        info!("Signed out {}", account.username);
        Ok(())
    }

    /// Return a cached token, or redeem the cached refresh token.
    ///
    /// Fails with `SilentAuthRequiresInteraction` when neither is usable.
    pub async fn acquire_silent(
        &self,
        request: &SilentRequest,
    ) -> Result<AuthenticationResult, AuthError> {
        let attempt = Attempt::start(Strategy::Silent);
        let result = self.silent(request, attempt.correlation_id).await;
        attempt.finish(result)
    }

    /// Sign in through the browser with authorization code and PKCE.
    pub async fn acquire_interactive(
        &self,
        request: &InteractiveRequest,
        cancel: &CancellationToken,
    ) -> Result<AuthenticationResult, AuthError> {
        let attempt = Attempt::start(Strategy::Interactive);
        let result = self
            .interactive(request, attempt.correlation_id, cancel)
            .await;
        attempt.finish(result)
    }

    /// Sign in on another device.
    ///
    /// `callback` receives the user code and verification URI once, before
    /// polling starts.
    pub async fn acquire_by_device_code<F>(
        &self,
        request: &DeviceCodeRequest,
        callback: F,
        cancel: &CancellationToken,
    ) -> Result<AuthenticationResult, AuthError>
    where
        F: FnOnce(&DeviceCodeInfo) + Send,
    {
        let attempt = Attempt::start(Strategy::DeviceCode);
        let result = self
            .device_code(request, callback, attempt.correlation_id, cancel)
            .await;
        attempt.finish(result)
    }

    /// Sign in with the credentials of the current domain session.
    pub async fn acquire_integrated(
        &self,
        request: &IntegratedAuthRequest,
    ) -> Result<AuthenticationResult, AuthError> {
        let attempt = Attempt::start(Strategy::IntegratedAuth);
        let result = self.integrated(request, attempt.correlation_id).await;
        attempt.finish(result)
    }

    /// Sign in by sending a username and password to the token endpoint.
    #[deprecated(
        note = "the password grant exposes user credentials to the app; use interactive or device code sign-in"
    )]
    pub async fn acquire_by_username_password(
        &self,
        request: &UsernamePasswordRequest,
    ) -> Result<AuthenticationResult, AuthError> {
        let attempt = Attempt::start(Strategy::UsernamePassword);
        warn!(
            correlation_id = %attempt.correlation_id,
            "Using the username/password grant; this flow is insecure and unsupported for MFA accounts"
        );
        let result = self.username_password(request, attempt.correlation_id).await;
        attempt.finish(result)
    }

    fn authority_for(&self, requested: Option<&AuthorityDescriptor>) -> AuthorityDescriptor {
        requested
            .cloned()
            .unwrap_or_else(|| self.config.default_authority.clone())
    }

    async fn silent(
        &self,
        request: &SilentRequest,
        correlation_id: Uuid,
    ) -> Result<AuthenticationResult, AuthError> {
        let authority = self
            .authority_for(request.authority.as_ref())
            .for_tenant(&request.account.home_tenant_id);
        let canonical = authority.canonical();
        let skew = self.config.expiry_skew;

        if !request.force_refresh {
            let cached = self
                .cache
                .read(|cache| {
                    let token = cache
                        .lookup_at(&request.account, &request.scopes, &canonical, Utc::now(), skew)?
                        .clone();
                    let id_token = cache
                        .id_token(&request.account, &canonical)
                        .map(|t| t.secret.clone());
                    Some((token, id_token))
                })
                .await;

            if let Some((token, id_token)) = cached {
                debug!(%correlation_id, "Using cached access token for {}", request.account.username);
                return Ok(AuthenticationResult {
                    access_token: token.secret,
                    id_token,
                    account: request.account.clone(),
                    scopes: token.scopes,
                    expires_on: token.expires_on.unwrap_or_else(Utc::now),
                    authority: canonical,
                    source: TokenSource::Cache,
                    correlation_id,
                });
            }
        }

        let refresh_token = self
            .cache
            .read(|cache| {
                cache
                    .refresh_token(&request.account, &canonical)
                    .map(|t| t.secret.clone())
            })
            .await
            .ok_or_else(|| {
                AuthError::SilentAuthRequiresInteraction(format!(
                    "no refresh token cached for {}",
                    request.account.username
                ))
            })?;

        let grant = GrantRequest {
            grant: Grant::RefreshToken { refresh_token },
            scopes: request.scopes.clone(),
            correlation_id,
        };
        let response = match self.exchange.exchange(&authority, &grant).await {
            Ok(response) => response,
            Err(AuthError::InvalidGrant(reason)) => {
                return Err(AuthError::SilentAuthRequiresInteraction(reason))
            }
            Err(e) => return Err(e),
        };

        self.complete(
            &authority,
            &request.scopes,
            response,
            Some(&request.account),
            correlation_id,
            None,
        )
        .await
    }

    async fn interactive(
        &self,
        request: &InteractiveRequest,
        correlation_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<AuthenticationResult, AuthError> {
        let authority = self.authority_for(request.authority.as_ref());
        let pkce = PkceChallenge::new();
        let state = generate_state();
        let url = authorize_url(&AuthorizeParams {
            authority: &authority,
            client_id: &self.config.client_id,
            redirect_uri: &self.config.redirect_uri,
            scopes: &request.scopes,
            state: &state,
            pkce: &pkce,
            login_hint: request.login_hint.as_deref(),
            prompt: request.prompt.map(|p| p.as_str()),
        });

        debug!(%correlation_id, "Starting browser sign-in at {}", authority);
        let redirect = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::UserCancelled),
            redirect = self.web_ui.authorize(
                AuthorizeRequest {
                    authorize_url: &url,
                    redirect_uri: &self.config.redirect_uri,
                    success_redirect: request.success_redirect.as_ref(),
                },
                cancel,
            ) => redirect?,
        };

        let (code, returned_state) = parse_callback_url(&redirect)?;
        if returned_state != state {
            warn!(%correlation_id, "State mismatch in authorization redirect");
            return Err(AuthError::StateValidationFailed);
        }

        let grant = GrantRequest {
            grant: Grant::AuthorizationCode {
                code: code.into(),
                redirect_uri: self.config.redirect_uri.to_string(),
                code_verifier: pkce.verifier.clone(),
            },
            scopes: request.scopes.clone(),
            correlation_id,
        };
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::UserCancelled),
            response = self.exchange.exchange(&authority, &grant) => response?,
        };

        self.complete(
            &authority,
            &request.scopes,
            response,
            None,
            correlation_id,
            Some(cancel),
        )
        .await
    }

    async fn device_code<F>(
        &self,
        request: &DeviceCodeRequest,
        callback: F,
        correlation_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<AuthenticationResult, AuthError>
    where
        F: FnOnce(&DeviceCodeInfo) + Send,
    {
        let authority = self.authority_for(request.authority.as_ref());

        let info = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::UserCancelled),
            info = self.exchange.request_device_code(&authority, &request.scopes, correlation_id) => info?,
        };
        if info.user_code.trim().is_empty() || info.verification_uri.trim().is_empty() {
            return Err(AuthError::Protocol {
                code: "invalid_device_code_response".into(),
                description: "missing user code or verification URI".into(),
            });
        }

        callback(&info);

        let response = device_code::poll_for_token(
            self.exchange.as_ref(),
            &authority,
            &info,
            &request.scopes,
            correlation_id,
            cancel,
        )
        .await?;

        self.complete(
            &authority,
            &request.scopes,
            response,
            None,
            correlation_id,
            Some(cancel),
        )
        .await
    }

    async fn integrated(
        &self,
        request: &IntegratedAuthRequest,
        correlation_id: Uuid,
    ) -> Result<AuthenticationResult, AuthError> {
        let Some(domain) = self.config.domain.as_deref() else {
            return Err(AuthError::UnsupportedPlatform(
                "integrated auth needs a domain-joined Windows session".into(),
            ));
        };
        let authority = self.authority_for(request.authority.as_ref());
        if authority.is_b2c() || authority.tenant() == "consumers" {
            return Err(AuthError::InvalidRequest(format!(
                "integrated auth is not available for {}",
                authority
            )));
        }

        debug!(%correlation_id, "Integrated auth for {} in domain {}", request.username, domain);
        let grant = GrantRequest {
            grant: Grant::Integrated {
                username: request.username.clone(),
            },
            scopes: request.scopes.clone(),
            correlation_id,
        };
        let response = self.exchange.exchange(&authority, &grant).await?;

        self.complete(&authority, &request.scopes, response, None, correlation_id, None)
            .await
    }

    async fn username_password(
        &self,
        request: &UsernamePasswordRequest,
        correlation_id: Uuid,
    ) -> Result<AuthenticationResult, AuthError> {
        let authority = self.authority_for(request.authority.as_ref());
        let grant = GrantRequest {
            grant: Grant::Password {
                username: request.username.clone(),
                password: request.password.clone(),
            },
            scopes: request.scopes.clone(),
            correlation_id,
        };
        let response = self.exchange.exchange(&authority, &grant).await?;

        self.complete(&authority, &request.scopes, response, None, correlation_id, None)
            .await
    }

    /// Cache the tokens from a successful exchange and build the result.
    ///
    /// The account comes from the ID token, or from `known_account` when the
    /// response carries none (refresh without `openid`).
    async fn complete(
        &self,
        authority: &AuthorityDescriptor,
        requested: &ScopeSet,
        response: TokenResponse,
        known_account: Option<&Account>,
        correlation_id: Uuid,
        cancel: Option<&CancellationToken>,
    ) -> Result<AuthenticationResult, AuthError> {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(AuthError::UserCancelled);
        }

        let expires_on = i64::try_from(response.expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| AuthError::Protocol {
                code: "invalid_expires_in".into(),
                description: format!("expires_in {} is out of range", response.expires_in),
            })?;

        let claims = response
            .id_token
            .as_ref()
            .map(|t| IdTokenClaims::decode(t.as_str()))
            .transpose()?;

        let account = match (&claims, known_account) {
            (Some(claims), known) => {
                let fallback_tenant = known
                    .map(|a| a.home_tenant_id.as_str())
                    .unwrap_or_else(|| authority.tenant());
                claims.to_account(authority.host(), fallback_tenant)?
            }
            (None, Some(known)) => known.clone(),
            (None, None) => {
                return Err(AuthError::Protocol {
                    code: "missing_id_token".into(),
                    description: "token response did not identify the account".into(),
                })
            }
        };

        let cache_authority = authority.for_tenant(&account.home_tenant_id).canonical();
        let scopes = if response.scope.trim().is_empty() {
            requested.clone()
        } else {
            ScopeSet::parse(&response.scope)
        };

        let access_token = TokenRecord::access_token(
            response.access_token.clone(),
            cache_authority.as_str(),
            scopes,
            expires_on,
        );
        let refresh_token = response
            .refresh_token
            .clone()
            .map(|rt| TokenRecord::refresh_token(rt, cache_authority.as_str()));
        let id_token = response.id_token.clone().map(|it| {
            let expiry = claims
                .as_ref()
                .and_then(IdTokenClaims::expires_on)
                .unwrap_or(expires_on);
            TokenRecord::id_token(it, cache_authority.as_str(), expiry)
        });

        let result = AuthenticationResult {
            access_token: access_token.secret.clone(),
            id_token: response.id_token,
            account: account.clone(),
            scopes: access_token.scopes.clone(),
            expires_on: access_token.expires_on.unwrap_or(expires_on),
            authority: cache_authority.clone(),
            source: TokenSource::IdentityProvider,
            correlation_id,
        };

        self.cache
            .update(|cache| {
                cache.upsert(&account, access_token);
                if let Some(rt) = refresh_token {
                    cache.upsert(&account, rt);
                }
                if let Some(it) = id_token {
                    cache.upsert(&account, it);
                }
            })
            .await?;

        debug!(%correlation_id, "Cached tokens for {} at {}", account.username, cache_authority);
        Ok(result)
    }
}
