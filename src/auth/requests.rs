//! Per-strategy acquisition requests, validated at construction.

use url::Url;

use super::authority::AuthorityDescriptor;
use crate::cache::{Account, ScopeSet, SecureString};
use crate::error::AuthError;

fn scope_set<S: AsRef<str>>(scopes: impl IntoIterator<Item = S>) -> Result<ScopeSet, AuthError> {
    let scopes: ScopeSet = scopes.into_iter().collect();
    if scopes.is_empty() {
        return Err(AuthError::InvalidRequest("at least one scope is required".into()));
    }
    Ok(scopes)
}

fn non_empty(value: &str, what: &str) -> Result<String, AuthError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AuthError::InvalidRequest(format!("{} is required", what)));
    }
    Ok(value.to_string())
}

/// Token from the cache, or via refresh token, without user interaction.
#[derive(Debug, Clone)]
pub struct SilentRequest {
    pub(crate) scopes: ScopeSet,
    pub(crate) account: Account,
    pub(crate) authority: Option<AuthorityDescriptor>,
    pub(crate) force_refresh: bool,
}

impl SilentRequest {
    pub fn new<S: AsRef<str>>(
        scopes: impl IntoIterator<Item = S>,
        account: Account,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            scopes: scope_set(scopes)?,
            account,
            authority: None,
            force_refresh: false,
        })
    }

    pub fn with_authority(mut self, authority: AuthorityDescriptor) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Skip the cached access token and always redeem the refresh token.
    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }
}

/// `prompt` values for the authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    SelectAccount,
    Login,
    Consent,
}

impl Prompt {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SelectAccount => "select_account",
            Self::Login => "login",
            Self::Consent => "consent",
        }
    }
}

/// Browser sign-in with authorization code and PKCE.
#[derive(Debug, Clone)]
pub struct InteractiveRequest {
    pub(crate) scopes: ScopeSet,
    pub(crate) authority: Option<AuthorityDescriptor>,
    pub(crate) login_hint: Option<String>,
    pub(crate) prompt: Option<Prompt>,
    pub(crate) success_redirect: Option<Url>,
}

impl InteractiveRequest {
    pub fn new<S: AsRef<str>>(scopes: impl IntoIterator<Item = S>) -> Result<Self, AuthError> {
        Ok(Self {
            scopes: scope_set(scopes)?,
            authority: None,
            login_hint: None,
            prompt: None,
            success_redirect: None,
        })
    }

    pub fn with_authority(mut self, authority: AuthorityDescriptor) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn with_login_hint(mut self, login_hint: impl Into<String>) -> Self {
        let hint = login_hint.into();
        self.login_hint = (!hint.trim().is_empty()).then_some(hint);
        self
    }

    pub fn with_prompt(mut self, prompt: Prompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Send the browser to `url` once sign-in completes.
    pub fn with_success_redirect(mut self, url: &str) -> Result<Self, AuthError> {
        let url = Url::parse(url)
            .map_err(|e| AuthError::InvalidRequest(format!("invalid success redirect: {}", e)))?;
        self.success_redirect = Some(url);
        Ok(self)
    }
}

/// Device authorization grant.
#[derive(Debug, Clone)]
pub struct DeviceCodeRequest {
    pub(crate) scopes: ScopeSet,
    pub(crate) authority: Option<AuthorityDescriptor>,
}

impl DeviceCodeRequest {
    pub fn new<S: AsRef<str>>(scopes: impl IntoIterator<Item = S>) -> Result<Self, AuthError> {
        Ok(Self {
            scopes: scope_set(scopes)?,
            authority: None,
        })
    }

    pub fn with_authority(mut self, authority: AuthorityDescriptor) -> Self {
        self.authority = Some(authority);
        self
    }
}

/// Integrated Windows authentication for a domain user.
#[derive(Debug, Clone)]
pub struct IntegratedAuthRequest {
    pub(crate) scopes: ScopeSet,
    pub(crate) username: String,
    pub(crate) authority: Option<AuthorityDescriptor>,
}

impl IntegratedAuthRequest {
    pub fn new<S: AsRef<str>>(
        scopes: impl IntoIterator<Item = S>,
        username: &str,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            scopes: scope_set(scopes)?,
            username: non_empty(username, "username")?,
            authority: None,
        })
    }

    pub fn with_authority(mut self, authority: AuthorityDescriptor) -> Self {
        self.authority = Some(authority);
        self
    }
}

/// Resource owner password credentials. Insecure; prefer any other strategy.
#[derive(Debug, Clone)]
pub struct UsernamePasswordRequest {
    pub(crate) scopes: ScopeSet,
    pub(crate) username: String,
    pub(crate) password: SecureString,
    pub(crate) authority: Option<AuthorityDescriptor>,
}

impl UsernamePasswordRequest {
    pub fn new<S: AsRef<str>>(
        scopes: impl IntoIterator<Item = S>,
        username: &str,
        password: SecureString,
    ) -> Result<Self, AuthError> {
        if password.is_empty() {
            return Err(AuthError::InvalidRequest("password is required".into()));
        }
        Ok(Self {
            scopes: scope_set(scopes)?,
            username: non_empty(username, "username")?,
            password,
            authority: None,
        })
    }

    pub fn with_authority(mut self, authority: AuthorityDescriptor) -> Self {
        self.authority = Some(authority);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_required() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            InteractiveRequest::new(empty),
            Err(AuthError::InvalidRequest(_))
        ));
        assert!(DeviceCodeRequest::new([" "]).is_err());
        assert!(DeviceCodeRequest::new(["user.read"]).is_ok());
    }

    #[test]
    fn test_credentials_required() {
        assert!(IntegratedAuthRequest::new(["user.read"], "  ").is_err());
        assert!(UsernamePasswordRequest::new(["user.read"], "alice", SecureString::new("")).is_err());
        let request =
            UsernamePasswordRequest::new(["user.read"], " alice ", SecureString::new("pw")).unwrap();
        assert_eq!(request.username, "alice");
    }

    #[test]
    fn test_interactive_options() {
        let request = InteractiveRequest::new(["user.read"])
            .unwrap()
            .with_login_hint("")
            .with_prompt(Prompt::SelectAccount);
        assert!(request.login_hint.is_none());
        assert_eq!(request.prompt.map(Prompt::as_str), Some("select_account"));

        assert!(InteractiveRequest::new(["user.read"])
            .unwrap()
            .with_success_redirect("not a url")
            .is_err());
    }
}
