use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device authorization response
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_poll_interval() -> u64 {
    5
}

/// OAuth token response (from both device_code and refresh_token grants)
#[derive(Debug, Clone, Deserialize)]
pub struct MsTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth error body
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Xbox Live user.authenticate request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserTokenRequest {
    pub properties: UserTokenProperties,
    pub relying_party: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserTokenProperties {
    pub auth_method: String,
    pub site_name: String,
    pub rps_ticket: String,
}

/// XSTS authorize request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct XstsTokenRequest {
    pub properties: XstsTokenProperties,
    pub relying_party: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct XstsTokenProperties {
    pub sandbox_id: String,
    pub user_tokens: Vec<String>,
}

/// user.authenticate and xsts/authorize response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct XboxTokenResponse {
    #[serde(default)]
    pub issue_instant: Option<DateTime<Utc>>,
    #[serde(default)]
    pub not_after: Option<DateTime<Utc>>,
    pub token: String,
    #[serde(default)]
    pub display_claims: Option<DisplayClaims>,
}

/// `xui` is a list of single-key mappings, e.g. `[{"uhs": "..."}]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisplayClaims {
    #[serde(default)]
    pub xui: Vec<serde_json::Map<String, serde_json::Value>>,
}

impl DisplayClaims {
    /// First `uhs` value found in the claims
    pub fn user_hash(&self) -> Option<&str> {
        self.xui
            .iter()
            .find_map(|claim| claim.get("uhs").and_then(|v| v.as_str()))
            .filter(|uhs| !uhs.is_empty())
    }
}

/// Xbox Live error response
#[derive(Debug, Clone, Deserialize)]
pub struct XboxErrorResponse {
    #[serde(rename = "Identity", default)]
    pub identity: Option<String>,
    #[serde(rename = "XErr")]
    pub xerr: u64,
    #[serde(rename = "Message", default)]
    pub message: Option<String>,
    #[serde(rename = "Redirect", default)]
    pub redirect: Option<String>,
}

/// Minecraft login_with_xbox request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLoginRequest {
    pub identity_token: String,
}

/// Minecraft login_with_xbox response
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceLoginResponse {
    #[serde(default)]
    pub username: Option<String>,
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: u64,
}
