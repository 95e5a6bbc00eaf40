use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::config::{RP_USER_AUTH, XblAuthConfig};
use crate::device_code::{DeviceCode, DevicePoll};
use crate::errors::{AuthError, Result, xerr_description};
use crate::models::*;
use crate::token::TokenRecord;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const BODY_SNIPPET_LEN: usize = 200;

/// OAuth access/refresh pair from the token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsTokens {
    pub access: TokenRecord,
    /// Present when the server issued (or rotated) a refresh token
    pub refresh: Option<TokenRecord>,
}

impl MsTokens {
    fn from_response(response: MsTokenResponse, now: DateTime<Utc>) -> Result<Self> {
        let expires_at = expiry_after(now, response.expires_in, "token")?;
        Ok(Self {
            access: TokenRecord::new(response.access_token, expires_at),
            refresh: response
                .refresh_token
                .filter(|t| !t.is_empty())
                .map(TokenRecord::without_expiry),
        })
    }
}

/// Stateless client for every exchange in the chain
///
/// None of its methods read or write a [`crate::TokenStore`]; persistence is the
/// resolver's job.
#[derive(Debug, Clone)]
pub struct XblClient {
    config: XblAuthConfig,
    http: Client,
}

impl XblClient {
    pub fn new(config: XblAuthConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.http_timeouts.connect)
            .timeout(config.http_timeouts.request)
            .user_agent(config.user_agent.as_deref().unwrap_or("xblive-broker"))
            .build()?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &XblAuthConfig {
        &self.config
    }

    /// Start the device code flow
    #[instrument(skip(self))]
    pub async fn request_device_code(&self) -> Result<DeviceCode> {
        debug!("Requesting device code");
        let response = self
            .http
            .post(self.config.endpoints.device_code.clone())
            .header(ACCEPT, "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("scope", self.config.scope.as_str()),
                ("response_type", "device_code"),
            ])
            .send()
            .await?;

        let body: DeviceCodeResponse = read_json(response, "device code").await?;
        Ok(DeviceCode::from_response(body, Utc::now()))
    }

    /// Poll the token endpoint once for a device code
    #[instrument(skip_all)]
    pub async fn poll_device_code(&self, device_code: &str) -> Result<DevicePoll> {
        let response = self
            .http
            .post(self.config.endpoints.token.clone())
            .header(ACCEPT, "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("grant_type", DEVICE_CODE_GRANT),
                ("device_code", device_code),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let tokens: MsTokenResponse = parse_json(&body, "token")?;
            return Ok(DevicePoll::Authorized(MsTokens::from_response(
                tokens,
                Utc::now(),
            )?));
        }

        match serde_json::from_str::<OAuthErrorResponse>(&body) {
            Ok(error) => match error.error.as_str() {
                "authorization_pending" => Ok(DevicePoll::Pending),
                "slow_down" => Ok(DevicePoll::SlowDown),
                "authorization_declined" | "access_denied" => Ok(DevicePoll::Denied),
                "expired_token" | "code_expired" => Ok(DevicePoll::Expired),
                _ => Err(oauth_rejection(status, error)),
            },
            Err(_) => Err(classify_rejection(status, &body)),
        }
    }

    /// Redeem a refresh token for a new access token
    #[instrument(skip_all)]
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<MsTokens> {
        debug!("Refreshing access token");
        let response = self
            .http
            .post(self.config.endpoints.token.clone())
            .header(ACCEPT, "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("scope", self.config.scope.as_str()),
            ])
            .send()
            .await?;

        let body: MsTokenResponse = read_json(response, "token").await?;
        MsTokens::from_response(body, Utc::now())
    }

    /// Exchange an access token for an Xbox Live user token
    #[instrument(skip_all)]
    pub async fn user_token(&self, access_token: &str) -> Result<TokenRecord> {
        let request = UserTokenRequest {
            properties: UserTokenProperties {
                auth_method: "RPS".to_string(),
                site_name: "user.auth.xboxlive.com".to_string(),
                rps_ticket: format!("{}{}", self.config.rps_ticket_prefix, access_token),
            },
            relying_party: RP_USER_AUTH.to_string(),
            token_type: "JWT".to_string(),
        };

        debug!("Authenticating with Xbox Live");
        let response = self
            .http
            .post(self.config.endpoints.user_authenticate.clone())
            .header(ACCEPT, "application/json")
            .header("x-xbl-contract-version", "1")
            .json(&request)
            .send()
            .await?;

        let body: XboxTokenResponse = read_json(response, "user token").await?;
        xbox_token_record(body, "user token")
    }

    /// Exchange a user token for an XSTS token scoped to `relying_party`
    #[instrument(skip(self, user_token))]
    pub async fn xsts_token(&self, user_token: &str, relying_party: &str) -> Result<TokenRecord> {
        let request = XstsTokenRequest {
            properties: XstsTokenProperties {
                sandbox_id: "RETAIL".to_string(),
                user_tokens: vec![user_token.to_string()],
            },
            relying_party: relying_party.to_string(),
            token_type: "JWT".to_string(),
        };

        debug!("Authorizing with XSTS");
        let response = self
            .http
            .post(self.config.endpoints.xsts_authorize.clone())
            .header(ACCEPT, "application/json")
            .header("x-xbl-contract-version", "1")
            .json(&request)
            .send()
            .await?;

        let body: XboxTokenResponse = read_json(response, "XSTS token").await?;
        xbox_token_record(body, "XSTS token")
    }

    /// Log in to the game service with an XSTS token and its user hash
    #[instrument(skip_all)]
    pub async fn service_token(&self, xsts_token: &str, user_hash: &str) -> Result<TokenRecord> {
        let request = ServiceLoginRequest {
            identity_token: format!("XBL3.0 x={};{}", user_hash, xsts_token),
        };

        debug!("Logging in to game services");
        let response = self
            .http
            .post(self.config.endpoints.service_login.clone())
            .header(ACCEPT, "application/json")
            .json(&request)
            .send()
            .await?;

        let body: ServiceLoginResponse = read_json(response, "service token").await?;
        let expires_at = expiry_after(Utc::now(), body.expires_in, "service token")?;
        Ok(TokenRecord::new(body.access_token, expires_at))
    }
}

async fn read_json<T: DeserializeOwned>(response: Response, endpoint: &'static str) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(classify_rejection(status, &body));
    }

    parse_json(&body, endpoint)
}

fn parse_json<T: DeserializeOwned>(body: &str, endpoint: &'static str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| AuthError::malformed(endpoint, e.to_string()))
}

fn xbox_token_record(response: XboxTokenResponse, endpoint: &'static str) -> Result<TokenRecord> {
    let claims = response
        .display_claims
        .ok_or_else(|| AuthError::malformed(endpoint, "missing DisplayClaims"))?;
    if claims.xui.is_empty() {
        return Err(AuthError::malformed(endpoint, "empty DisplayClaims.xui"));
    }
    let user_hash = claims
        .user_hash()
        .ok_or_else(|| AuthError::malformed(endpoint, "no uhs in DisplayClaims.xui"))?
        .to_string();
    let not_after = response
        .not_after
        .ok_or_else(|| AuthError::malformed(endpoint, "missing NotAfter"))?;

    Ok(TokenRecord::new(response.token, not_after).with_user_hash(user_hash))
}

fn expiry_after(
    now: DateTime<Utc>,
    expires_in: u64,
    endpoint: &'static str,
) -> Result<DateTime<Utc>> {
    i64::try_from(expires_in)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| {
            AuthError::malformed(endpoint, format!("expires_in out of range: {expires_in}"))
        })
}

fn oauth_rejection(status: StatusCode, error: OAuthErrorResponse) -> AuthError {
    AuthError::UpstreamRejected {
        status: status.as_u16(),
        code: error.error,
        message: error.error_description.unwrap_or_default(),
    }
}

/// Turn a non-success response into [`AuthError::UpstreamRejected`]
pub(crate) fn classify_rejection(status: StatusCode, body: &str) -> AuthError {
    if let Ok(error) = serde_json::from_str::<OAuthErrorResponse>(body) {
        return oauth_rejection(status, error);
    }

    if let Ok(error) = serde_json::from_str::<XboxErrorResponse>(body) {
        let message = xerr_description(error.xerr)
            .map(str::to_string)
            .or(error.message)
            .unwrap_or_default();
        return AuthError::UpstreamRejected {
            status: status.as_u16(),
            code: error.xerr.to_string(),
            message,
        };
    }

    AuthError::UpstreamRejected {
        status: status.as_u16(),
        code: status.as_str().to_string(),
        message: body.chars().take(BODY_SNIPPET_LEN).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_oauth_error() {
        let body = json!({
            "error": "invalid_grant",
            "error_description": "The refresh token has expired"
        })
        .to_string();

        match classify_rejection(StatusCode::BAD_REQUEST, &body) {
            AuthError::UpstreamRejected {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, "invalid_grant");
                assert_eq!(message, "The refresh token has expired");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_classify_xbox_error() {
        let body = json!({
            "Identity": "0",
            "XErr": 2148916233u64,
            "Message": "",
            "Redirect": "https://start.ui.xboxlive.com/CreateAccount"
        })
        .to_string();

        match classify_rejection(StatusCode::UNAUTHORIZED, &body) {
            AuthError::UpstreamRejected { code, message, .. } => {
                assert_eq!(code, "2148916233");
                assert_eq!(message, "Account doesn't have an Xbox account");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_classify_unstructured_body() {
        let body = "x".repeat(500);

        match classify_rejection(StatusCode::SERVICE_UNAVAILABLE, &body) {
            AuthError::UpstreamRejected {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 503);
                assert_eq!(code, "503");
                assert_eq!(message.len(), BODY_SNIPPET_LEN);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_xbox_token_record_requires_claims() {
        let response: XboxTokenResponse = serde_json::from_value(json!({
            "NotAfter": "2030-01-01T00:00:00Z",
            "Token": "t",
            "DisplayClaims": { "xui": [] }
        }))
        .unwrap();

        assert!(matches!(
            xbox_token_record(response, "XSTS token"),
            Err(AuthError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_expiry_after_rejects_overflow() {
        assert!(expiry_after(Utc::now(), u64::MAX, "token").is_err());
        assert!(expiry_after(Utc::now(), 3600, "token").is_ok());
    }
}
