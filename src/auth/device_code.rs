//! Device code polling.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::authority::AuthorityDescriptor;
use super::oauth::{DeviceCodeInfo, Grant, GrantRequest, TokenExchange, TokenResponse};
use crate::cache::ScopeSet;
use crate::error::AuthError;

/// Added to the poll interval each time the server answers `slow_down`.
const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// Shortest wait between polls, whatever interval the server sends.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll the token endpoint until the user completes sign-in.
///
/// Waits the server interval before every poll, gives up once the device
/// code expires, and returns `UserCancelled` as soon as `cancel` fires.
pub async fn poll_for_token(
    exchange: &dyn TokenExchange,
    authority: &AuthorityDescriptor,
    info: &DeviceCodeInfo,
    scopes: &ScopeSet,
    correlation_id: Uuid,
    cancel: &CancellationToken,
) -> Result<TokenResponse, AuthError> {
    let deadline = Instant::now()
        .checked_add(Duration::from_secs(info.expires_in))
        .ok_or_else(|| AuthError::Protocol {
            code: "invalid_expires_in".into(),
            description: format!("device code expires_in {} is out of range", info.expires_in),
        })?;
    let mut interval = Duration::from_secs(info.interval).max(MIN_POLL_INTERVAL);
    let request = GrantRequest {
        grant: Grant::DeviceCode {
            device_code: info.device_code.clone(),
        },
        scopes: scopes.clone(),
        correlation_id,
    };
    let mut attempts = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::UserCancelled),
            _ = sleep(interval) => {}
        }

        if Instant::now() >= deadline {
            debug!(%correlation_id, "Device code expired after {} polls", attempts);
            return Err(AuthError::DeviceCodeExpired);
        }

        attempts += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::UserCancelled),
            result = exchange.exchange(authority, &request) => result,
        };

        match result {
            Ok(response) => {
                debug!(%correlation_id, "Device code redeemed after {} polls", attempts);
                return Ok(response);
            }
            Err(AuthError::AuthorizationPending) => {}
            Err(AuthError::SlowDown) => {
                interval = interval.saturating_add(SLOW_DOWN_INCREMENT);
                debug!(%correlation_id, "Server asked to slow down, polling every {:?}", interval);
            }
            Err(e) => return Err(e),
        }
    }
}
