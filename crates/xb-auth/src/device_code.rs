//! OAuth 2.0 Device Authorization Grant (RFC 8628).
//!
//! [`poll_until_authorized`] waits between polls with a cancellable timer, so a
//! cancelled [`CancellationToken`] ends the flow mid-wait.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::client::{MsTokens, XblClient};
use crate::errors::{AuthError, Result};
use crate::models::DeviceCodeResponse;

/// Added to the poll interval every time the server answers `slow_down`
pub const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// An issued device code, ready to be shown to the user
#[derive(Debug, Clone)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Server-provided instructions, if any
    pub message: Option<String>,
    pub interval: Duration,
    pub expires_at: DateTime<Utc>,
}

impl DeviceCode {
    pub(crate) fn from_response(response: DeviceCodeResponse, now: DateTime<Utc>) -> Self {
        let expires_at = i64::try_from(response.expires_in)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            device_code: response.device_code,
            user_code: response.user_code,
            verification_uri: response.verification_uri,
            message: response.message,
            interval: Duration::from_secs(response.interval),
            expires_at,
        }
    }

    /// Text to show the user
    pub fn instructions(&self) -> String {
        match &self.message {
            Some(message) if !message.is_empty() => message.clone(),
            _ => format!(
                "To sign in, open {} and enter the code {}",
                self.verification_uri, self.user_code
            ),
        }
    }
}

/// Outcome of a single poll of the token endpoint
#[derive(Debug, Clone)]
pub enum DevicePoll {
    Pending,
    SlowDown,
    Authorized(MsTokens),
    Expired,
    Denied,
}

/// Poll until the user authorizes, the code expires, or the server denies.
///
/// No request is sent before the first interval elapses.
#[instrument(skip_all, fields(user_code = %code.user_code))]
pub async fn poll_until_authorized(
    client: &XblClient,
    code: &DeviceCode,
    cancel: &CancellationToken,
) -> Result<MsTokens> {
    let mut interval = code.interval;

    loop {
        let remaining = (code.expires_at - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            _ = tokio::time::sleep(interval.min(remaining)) => {}
        }

        if Utc::now() >= code.expires_at {
            info!("Device code expired before authorization");
            return Err(AuthError::DeviceCodeExpired);
        }

        let poll = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            poll = client.poll_device_code(&code.device_code) => poll?,
        };

        match poll {
            DevicePoll::Pending => debug!("Authorization pending"),
            DevicePoll::SlowDown => {
                interval += SLOW_DOWN_STEP;
                debug!("Server asked to slow down, polling every {:?}", interval);
            }
            DevicePoll::Authorized(tokens) => {
                info!("Device code authorized");
                return Ok(tokens);
            }
            DevicePoll::Expired => return Err(AuthError::DeviceCodeExpired),
            DevicePoll::Denied => return Err(AuthError::AccessDenied),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(message: Option<&str>) -> DeviceCodeResponse {
        DeviceCodeResponse {
            device_code: "device".to_string(),
            user_code: "ABCD-EFGH".to_string(),
            verification_uri: "https://www.microsoft.com/link".to_string(),
            expires_in: 900,
            interval: 5,
            message: message.map(str::to_string),
        }
    }

    #[test]
    fn test_from_response_computes_deadline() {
        let now = Utc::now();
        let code = DeviceCode::from_response(response(None), now);

        assert_eq!(code.expires_at, now + chrono::Duration::seconds(900));
        assert_eq!(code.interval, Duration::from_secs(5));
    }

    #[test]
    fn test_instructions_prefer_server_message() {
        let code = DeviceCode::from_response(response(Some("Go to the link")), Utc::now());
        assert_eq!(code.instructions(), "Go to the link");

        let code = DeviceCode::from_response(response(None), Utc::now());
        assert!(code.instructions().contains("ABCD-EFGH"));
    }
}
