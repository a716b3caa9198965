//! User interaction for browser-based sign-in.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

use super::callback_server::{self, CallbackResult};
use crate::error::AuthError;

/// Default time a user gets to finish signing in.
pub const DEFAULT_SIGN_IN_TIMEOUT: Duration = Duration::from_secs(300);

/// What the browser should be sent to and where it will come back.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizeRequest<'a> {
    pub authorize_url: &'a Url,
    pub redirect_uri: &'a Url,
    /// Page the browser is redirected to after a successful sign-in.
    pub success_redirect: Option<&'a Url>,
}

/// Drives a user through web sign-in and returns the redirect URL.
#[async_trait]
pub trait WebUi: Send + Sync {
    async fn authorize(
        &self,
        request: AuthorizeRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, AuthError>;
}

/// Opens the system browser and receives the redirect on a loopback port.
#[derive(Debug, Clone)]
pub struct SystemBrowser {
    timeout: Duration,
}

impl SystemBrowser {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemBrowser {
    fn default() -> Self {
        Self::new(DEFAULT_SIGN_IN_TIMEOUT)
    }
}

#[async_trait]
impl WebUi for SystemBrowser {
    async fn authorize(
        &self,
        request: AuthorizeRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, AuthError> {
        // Listen before the browser can redirect
        let listener =
            callback_server::bind(request.redirect_uri).map_err(AuthError::OAuthFailed)?;

        let server_cancel = cancel.child_token();
        let redirect_uri = request.redirect_uri.clone();
        let success_redirect = request.success_redirect.cloned();
        let timeout = self.timeout;
        let token = server_cancel.clone();
        let server = tokio::task::spawn_blocking(move || {
            callback_server::serve(
                listener,
                &redirect_uri,
                success_redirect.as_ref(),
                &token,
                timeout,
            )
        });

        if let Err(e) = open::that(request.authorize_url.as_str()) {
            error!("Failed to open browser: {}", e);
            server_cancel.cancel();
            return Err(AuthError::OAuthFailed("Failed to open browser".into()));
        }
        info!("Browser opened for sign-in, waiting for redirect");

        let result = server
            .await
            .map_err(|e| AuthError::OAuthFailed(format!("Callback server failed: {}", e)))?;

        match result {
            CallbackResult::Success(url) => Ok(url),
            CallbackResult::Cancelled => Err(AuthError::UserCancelled),
            CallbackResult::TimedOut => Err(AuthError::OAuthFailed(
                "Timed out waiting for the browser redirect".into(),
            )),
            CallbackResult::Error(e) => Err(AuthError::OAuthFailed(e)),
        }
    }
}
