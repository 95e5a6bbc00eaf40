use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one node of the token dependency chain
///
/// ```text
/// RefreshToken -> AccessToken -> UserToken -> XstsToken(rp) -> ServiceToken
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenKey {
    RefreshToken,
    AccessToken,
    UserToken,
    /// XSTS token scoped to a relying party
    XstsToken(String),
    ServiceToken,
}

impl TokenKey {
    pub fn xsts(relying_party: impl Into<String>) -> Self {
        Self::XstsToken(relying_party.into())
    }

    /// The key this one is derived from, `None` for the refresh token
    pub fn parent(&self, service_relying_party: &str) -> Option<TokenKey> {
        match self {
            Self::RefreshToken => None,
            Self::AccessToken => Some(Self::RefreshToken),
            Self::UserToken => Some(Self::AccessToken),
            Self::XstsToken(_) => Some(Self::UserToken),
            Self::ServiceToken => Some(Self::xsts(service_relying_party)),
        }
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RefreshToken => f.write_str("refresh_token"),
            Self::AccessToken => f.write_str("access_token"),
            Self::UserToken => f.write_str("user_token"),
            Self::XstsToken(rp) => write!(f, "xsts_token[{rp}]"),
            Self::ServiceToken => f.write_str("service_token"),
        }
    }
}

/// Lifecycle state of a single key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Absent,
    Valid,
    Expired,
}

/// One stored token
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenRecord {
    pub value: String,
    /// `None` only for refresh tokens, whose validity is learned from the exchange.
    /// Any other record without an expiry counts as expired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_hash: Option<String>,
}

impl TokenRecord {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at),
            user_hash: None,
        }
    }

    pub fn without_expiry(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
            user_hash: None,
        }
    }

    pub fn with_user_hash(mut self, user_hash: impl Into<String>) -> Self {
        self.user_hash = Some(user_hash.into());
        self
    }

    /// Usable as `key` at `now`.
    ///
    /// Only a refresh token may lack an expiry; any other record without one is
    /// treated as expired so it gets derived again.
    pub fn is_valid_for(&self, key: &TokenKey, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now < expires_at,
            None => *key == TokenKey::RefreshToken,
        }
    }

    pub fn state_for(&self, key: &TokenKey, now: DateTime<Utc>) -> TokenState {
        if self.is_valid_for(key, now) {
            TokenState::Valid
        } else {
            TokenState::Expired
        }
    }

    /// `XBL3.0 x=<uhs>;<token>` authorization value, if a user hash is present
    pub fn xbl_authorization(&self) -> Option<String> {
        self.user_hash
            .as_deref()
            .map(|uhs| format!("XBL3.0 x={};{}", uhs, self.value))
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user_hash", &self.user_hash)
            .finish()
    }
}

/// Persisted token document, one block per kind
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<TokenRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<TokenRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_token: Option<TokenRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub xsts_tokens: BTreeMap<String, TokenRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token: Option<TokenRecord>,
}

impl CachedTokens {
    pub fn record(&self, key: &TokenKey) -> Option<&TokenRecord> {
        match key {
            TokenKey::RefreshToken => self.refresh_token.as_ref(),
            TokenKey::AccessToken => self.access_token.as_ref(),
            TokenKey::UserToken => self.user_token.as_ref(),
            TokenKey::XstsToken(rp) => self.xsts_tokens.get(rp),
            TokenKey::ServiceToken => self.service_token.as_ref(),
        }
    }

    /// Overwrite the record for `key`
    pub fn insert(&mut self, key: TokenKey, record: TokenRecord) {
        match key {
            TokenKey::RefreshToken => self.refresh_token = Some(record),
            TokenKey::AccessToken => self.access_token = Some(record),
            TokenKey::UserToken => self.user_token = Some(record),
            TokenKey::XstsToken(rp) => {
                self.xsts_tokens.insert(rp, record);
            }
            TokenKey::ServiceToken => self.service_token = Some(record),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
