use std::path::PathBuf;

use thiserror::Error;

/// Token broker error types
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Token store failure at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Upstream rejected request (HTTP {status}, {code}): {message}")]
    UpstreamRejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Malformed response from {endpoint}: {detail}")]
    MalformedResponse {
        endpoint: &'static str,
        detail: String,
    },

    #[error("Interactive sign-in required - run the device code flow")]
    NeedsInteractiveAuth {
        #[source]
        cause: Option<Box<AuthError>>,
    },

    #[error("Device code expired before the user completed sign-in")]
    DeviceCodeExpired,

    #[error("User denied the sign-in request")]
    AccessDenied,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl AuthError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        Self::Storage {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn malformed(endpoint: &'static str, detail: impl Into<String>) -> Self {
        Self::MalformedResponse {
            endpoint,
            detail: detail.into(),
        }
    }

    pub fn is_needs_interactive_auth(&self) -> bool {
        matches!(self, Self::NeedsInteractiveAuth { .. })
    }

    pub fn is_upstream_rejected(&self) -> bool {
        matches!(self, Self::UpstreamRejected { .. })
    }

    /// Upstream refused the presented credential (4xx other than 429).
    ///
    /// Server errors and rate limiting are transient and do not qualify.
    pub fn is_credential_rejection(&self) -> bool {
        matches!(
            self,
            Self::UpstreamRejected { status, .. } if (400..500).contains(status) && *status != 429
        )
    }
}

/// Human readable description for the XErr codes XSTS returns on 401
pub fn xerr_description(code: u64) -> Option<&'static str> {
    match code {
        2148916227 => Some("Account is banned from Xbox Live"),
        2148916233 => Some("Account doesn't have an Xbox account"),
        2148916235 => Some("Xbox Live not available in this country"),
        2148916236 | 2148916237 => Some("Adult verification required on Xbox page"),
        2148916238 => Some("Child account requires Family"),
        _ => None,
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
