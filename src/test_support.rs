//! In-memory fakes for the cache store, token endpoint and browser.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::auth::authority::AuthorityDescriptor;
use crate::auth::id_token::encode_test_id_token;
use crate::auth::oauth::{DeviceCodeInfo, GrantRequest, TokenExchange, TokenResponse};
use crate::auth::web_ui::{AuthorizeRequest, WebUi};
use crate::cache::{CacheStore, ScopeSet};
use crate::error::{AuthError, CacheError};

/// Cache store backed by a byte buffer.
#[derive(Default)]
pub struct MemoryCacheStore {
    bytes: Mutex<Option<Vec<u8>>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes)),
            ..Self::default()
        }
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.bytes.lock().unwrap().clone()
    }
}

impl CacheStore for MemoryCacheStore {
    fn read(&self) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.bytes.lock().unwrap().clone())
    }

    fn write(&self, bytes: &[u8]) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Write(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "store is read-only",
            )));
        }
        *self.bytes.lock().unwrap() = Some(bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Shared, ordered log of what the fakes were asked to do.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Token endpoint that replays queued responses.
///
/// Once the queue is empty, `exchange` never completes.
#[derive(Default)]
pub struct ScriptedExchange {
    responses: Mutex<VecDeque<Result<TokenResponse, AuthError>>>,
    device_code: Mutex<Option<Result<DeviceCodeInfo, AuthError>>>,
    events: EventLog,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, response: Result<TokenResponse, AuthError>) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_device_code(self, info: DeviceCodeInfo) -> Self {
        *self.device_code.lock().unwrap() = Some(Ok(info));
        self
    }

    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    /// Grant names redeemed so far, in order.
    pub fn grants(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.strip_prefix("grant:").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl TokenExchange for ScriptedExchange {
    async fn exchange(
        &self,
        _authority: &AuthorityDescriptor,
        request: &GrantRequest,
    ) -> Result<TokenResponse, AuthError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("grant:{}", request.grant.name()));
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            None => std::future::pending().await,
        }
    }

    async fn request_device_code(
        &self,
        _authority: &AuthorityDescriptor,
        _scopes: &ScopeSet,
        _correlation_id: Uuid,
    ) -> Result<DeviceCodeInfo, AuthError> {
        self.events.lock().unwrap().push("device_code_request".into());
        self.device_code
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(AuthError::Network("no device code scripted".into())))
    }
}

/// How [`FakeBrowser`] answers an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserBehavior {
    /// Redirect back with a code and the request's state.
    SignIn,
    /// Redirect back with a code and a different state.
    WrongState,
    /// Never redirect; wait for cancellation.
    Abandon,
}

pub struct FakeBrowser {
    behavior: BrowserBehavior,
    visits: AtomicUsize,
}

impl FakeBrowser {
    pub fn new(behavior: BrowserBehavior) -> Self {
        Self {
            behavior,
            visits: AtomicUsize::new(0),
        }
    }

    pub fn visits(&self) -> usize {
        self.visits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebUi for FakeBrowser {
    async fn authorize(
        &self,
        request: AuthorizeRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, AuthError> {
        self.visits.fetch_add(1, Ordering::SeqCst);
        let state = request
            .authorize_url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();

        let state = match self.behavior {
            BrowserBehavior::SignIn => state,
            BrowserBehavior::WrongState => format!("{}-tampered", state),
            BrowserBehavior::Abandon => {
                cancel.cancelled().await;
                return Err(AuthError::UserCancelled);
            }
        };

        let mut redirect: Url = request.redirect_uri.clone();
        redirect
            .query_pairs_mut()
            .append_pair("code", "auth-code")
            .append_pair("state", &state);
        Ok(redirect.into())
    }
}

/// A successful token response for `username` in `tenant`.
pub fn token_response(username: &str, tenant: &str, access_token: &str) -> TokenResponse {
    let id_token = encode_test_id_token(json!({
        "oid": format!("oid-{}", username),
        "tid": tenant,
        "preferred_username": username,
        "name": username.split('@').next().unwrap_or(username),
        "exp": chrono::Utc::now().timestamp() + 3600,
    }));

    TokenResponse {
        access_token: access_token.into(),
        token_type: "Bearer".into(),
        expires_in: 3600,
        refresh_token: Some(format!("rt-{}", access_token).into()),
        id_token: Some(id_token.into()),
        scope: "user.read openid profile offline_access".into(),
    }
}

pub fn device_code_info(expires_in: u64, interval: u64) -> DeviceCodeInfo {
    DeviceCodeInfo {
        user_code: "ABCD-EFGH".into(),
        device_code: "dc-1".into(),
        verification_uri: "https://microsoft.com/devicelogin".into(),
        expires_in,
        interval,
        message: "To sign in, open https://microsoft.com/devicelogin and enter ABCD-EFGH".into(),
    }
}
