//! Error types for the msal-console application.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Token cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Token acquisition errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No valid cached token; interactive sign-in required: {0}")]
    SilentAuthRequiresInteraction(String),

    #[error("Device code expired before sign-in was completed")]
    DeviceCodeExpired,

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("User cancelled authentication")]
    UserCancelled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Identity provider returned {code}: {description}")]
    Protocol { code: String, description: String },

    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Invalid authorization code")]
    InvalidAuthCode,

    #[error("State validation failed (possible CSRF attack)")]
    StateValidationFailed,

    #[error("Token cache error: {0}")]
    Cache(#[from] CacheError),

    /// Device code poll state: the user has not finished signing in yet.
    #[error("Authorization pending")]
    AuthorizationPending,

    /// Device code poll state: the server asked for a longer poll interval.
    #[error("Polling too fast")]
    SlowDown,
}

/// Token cache and persistent store errors.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Token cache data is corrupt: {0}")]
    Corrupt(String),

    #[error("Failed to read token cache: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to write token cache: {0}")]
    Write(#[source] std::io::Error),

    #[error("Failed to serialize token cache: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keychain(String),
}

/// Downstream API errors.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Graph API request failed: {0}")]
    GraphRequestFailed(String),

    #[error("Failed to parse Graph API response: {0}")]
    ParseFailed(String),

    #[error("Unauthorized (401): Token may be expired")]
    Unauthorized,

    #[error("Forbidden (403): Insufficient permissions")]
    Forbidden,

    #[error("Rate limited (429): Too many requests")]
    RateLimited,
}

impl AuthError {
    /// Returns true if the caller should fall back to an interactive strategy.
    pub fn requires_interaction(&self) -> bool {
        matches!(
            self,
            Self::SilentAuthRequiresInteraction(_) | Self::InvalidGrant(_)
        )
    }
}

impl AppError {
    /// Returns a user-friendly message for display in the console.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Auth(AuthError::SilentAuthRequiresInteraction(_)) => {
                "No usable cached token. Sign in interactively first."
            }
            Self::Auth(AuthError::DeviceCodeExpired) => {
                "The device code expired. Please start again."
            }
            Self::Auth(AuthError::InvalidGrant(_)) => "Invalid credentials or expired session.",
            Self::Auth(AuthError::UnsupportedPlatform(_)) => {
                "This sign-in method is not available on this machine."
            }
            Self::Auth(AuthError::UserCancelled) => "Sign-in was cancelled.",
            Self::Auth(AuthError::Network(_)) => "Network error. Check your connection.",
            Self::Auth(AuthError::StateValidationFailed) => {
                "Security error. Please try signing in again."
            }
            Self::Auth(AuthError::Cache(_)) | Self::Cache(_) => {
                "Signed in, but the token cache could not be saved."
            }
            Self::Api(ApiError::Unauthorized) => "Authentication expired. Sign in again.",
            Self::Api(ApiError::Forbidden) => "Insufficient permissions for this operation.",
            Self::Api(ApiError::RateLimited) => "Too many requests. Please wait a moment.",
            Self::Config(_) => "Configuration error. Please check settings.",
            _ => "An error occurred. Please try again.",
        }
    }

    /// Returns true if the caller should fall back to an interactive strategy.
    pub fn requires_interaction(&self) -> bool {
        match self {
            Self::Auth(e) => e.requires_interaction(),
            Self::Api(ApiError::Unauthorized) => true,
            _ => false,
        }
    }
}
