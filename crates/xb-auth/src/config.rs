use std::time::Duration;

use url::Url;

use crate::errors::Result;

/// Default upstream endpoints
pub mod endpoints {
    pub const DEVICE_CODE: &str =
        "https://login.microsoftonline.com/consumers/oauth2/v2.0/devicecode";
    pub const TOKEN: &str = "https://login.microsoftonline.com/consumers/oauth2/v2.0/token";
    pub const USER_AUTHENTICATE: &str = "https://user.auth.xboxlive.com/user/authenticate";
    pub const XSTS_AUTHORIZE: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";
    pub const SERVICE_LOGIN: &str =
        "https://api.minecraftservices.com/authentication/login_with_xbox";
}

/// login.live.com device flow used by first-party Xbox clients
pub mod live {
    pub const CLIENT_ID: &str = "00000000402B5328";
    pub const DEVICE_CODE: &str = "https://login.live.com/oauth20_connect.srf";
    pub const TOKEN: &str = "https://login.live.com/oauth20_token.srf";
    pub const SCOPE: &str = "service::user.auth.xboxlive.com::MBI_SSL";
    pub const RPS_TICKET_PREFIX: &str = "t=";
}

/// Scope for apps registered in the consumer tenant
pub const STANDARD_SCOPE: &str = "XboxLive.signin offline_access";

/// RPS ticket prefix for consumer-tenant access tokens
pub const STANDARD_RPS_TICKET_PREFIX: &str = "d=";

/// Relying parties
pub const RP_GAMES_SERVICE: &str = "rp://api.minecraftservices.com/";
pub const RP_XBOXLIVE: &str = "http://xboxlive.com";
pub const RP_USER_AUTH: &str = "http://auth.xboxlive.com";

/// Endpoint set used by [`crate::XblClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub device_code: Url,
    pub token: Url,
    pub user_authenticate: Url,
    pub xsts_authorize: Url,
    pub service_login: Url,
}

impl Endpoints {
    /// Production endpoints for the consumer tenant
    pub fn consumers() -> Result<Self> {
        Ok(Self {
            device_code: Url::parse(endpoints::DEVICE_CODE)?,
            token: Url::parse(endpoints::TOKEN)?,
            user_authenticate: Url::parse(endpoints::USER_AUTHENTICATE)?,
            xsts_authorize: Url::parse(endpoints::XSTS_AUTHORIZE)?,
            service_login: Url::parse(endpoints::SERVICE_LOGIN)?,
        })
    }

    /// Production endpoints with login.live.com as the OAuth authority
    pub fn live() -> Result<Self> {
        Ok(Self {
            device_code: Url::parse(live::DEVICE_CODE)?,
            token: Url::parse(live::TOKEN)?,
            ..Self::consumers()?
        })
    }

    /// Every endpoint under a single base URL.
    ///
    /// Paths: `/devicecode`, `/token`, `/user/authenticate`, `/xsts/authorize`,
    /// `/authentication/login_with_xbox`.
    pub fn rooted_at(base: &str) -> Result<Self> {
        let base = Url::parse(&format!("{}/", base.trim_end_matches('/')))?;
        Ok(Self {
            device_code: base.join("devicecode")?,
            token: base.join("token")?,
            user_authenticate: base.join("user/authenticate")?,
            xsts_authorize: base.join("xsts/authorize")?,
            service_login: base.join("authentication/login_with_xbox")?,
        })
    }
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(30),
        }
    }
}

/// Configuration for XblClient
#[derive(Debug, Clone)]
pub struct XblAuthConfig {
    /// OAuth client ID
    pub client_id: String,

    /// OAuth scope requested by the device code and refresh grants
    pub scope: String,

    /// Prefix prepended to the access token in the user token RpsTicket
    pub rps_ticket_prefix: String,

    /// Relying party whose XSTS token is exchanged for the service token
    pub service_relying_party: String,

    pub endpoints: Endpoints,

    /// HTTP client timeouts
    pub http_timeouts: HttpTimeouts,

    /// Custom user agent (optional)
    pub user_agent: Option<String>,
}

impl XblAuthConfig {
    /// Config for an app registered in the consumer tenant
    pub fn new(client_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client_id: client_id.into(),
            scope: STANDARD_SCOPE.to_string(),
            rps_ticket_prefix: STANDARD_RPS_TICKET_PREFIX.to_string(),
            service_relying_party: RP_GAMES_SERVICE.to_string(),
            endpoints: Endpoints::consumers()?,
            http_timeouts: HttpTimeouts::default(),
            user_agent: Some("xblive-broker".to_string()),
        })
    }

    /// Config for the login.live.com flow with the first-party client ID
    pub fn live_connect() -> Result<Self> {
        Ok(Self {
            client_id: live::CLIENT_ID.to_string(),
            scope: live::SCOPE.to_string(),
            rps_ticket_prefix: live::RPS_TICKET_PREFIX.to_string(),
            endpoints: Endpoints::live()?,
            ..Self::new(live::CLIENT_ID)?
        })
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_service_relying_party(mut self, relying_party: impl Into<String>) -> Self {
        self.service_relying_party = relying_party.into();
        self
    }
}
