use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;

use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::XblClient;
use crate::device_code::{self, DeviceCode};
use crate::errors::{AuthError, Result};
use crate::store::TokenStore;
use crate::token::{TokenKey, TokenRecord, TokenState};

/// Resolves chain tokens on demand, deriving only what is missing or expired
///
/// ```text
/// RefreshToken -> AccessToken -> UserToken -> XstsToken(rp) -> ServiceToken
/// ```
///
/// Every derived link is persisted before it is returned. At most one exchange
/// per [`TokenKey`] is in flight: the key's guard is held across
/// check, exchange and persist. Guards are always taken child first, then
/// parent, so chains never wait on each other in a cycle.
///
/// The resolver never starts the device code flow by itself; a missing or
/// rejected refresh token surfaces as [`AuthError::NeedsInteractiveAuth`] and
/// the caller decides when to run [`TokenResolver::login_with_device_code`].
pub struct TokenResolver {
    store: Arc<dyn TokenStore>,
    client: XblClient,
    locks: Mutex<HashMap<TokenKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenResolver {
    pub fn new(store: Arc<dyn TokenStore>, client: XblClient) -> Self {
        Self {
            store,
            client,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn client(&self) -> &XblClient {
        &self.client
    }

    async fn lock(&self, key: &TokenKey) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// A valid token for `key`, deriving stale ancestors as needed
    #[instrument(skip_all, fields(key = %key))]
    pub async fn ensure(&self, key: &TokenKey) -> Result<TokenRecord> {
        match key {
            TokenKey::RefreshToken => self.refresh_token().await,
            TokenKey::AccessToken => self.access_token().await,
            TokenKey::UserToken => self.user_token().await,
            TokenKey::XstsToken(relying_party) => self.xsts_token(relying_party).await,
            TokenKey::ServiceToken => self.service_token().await,
        }
    }

    /// [`Self::ensure`], aborted as soon as `cancel` fires.
    ///
    /// A derivation interrupted mid-exchange persists nothing.
    pub async fn ensure_cancellable(
        &self,
        key: &TokenKey,
        cancel: &CancellationToken,
    ) -> Result<TokenRecord> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            record = self.ensure(key) => record,
        }
    }

    /// Stored refresh token. Never derived.
    pub async fn refresh_token(&self) -> Result<TokenRecord> {
        self.store
            .get(&TokenKey::RefreshToken)
            .await
            .ok_or(AuthError::NeedsInteractiveAuth { cause: None })
    }

    pub async fn access_token(&self) -> Result<TokenRecord> {
        let key = TokenKey::AccessToken;
        let _guard = self.lock(&key).await;

        if let Some(record) = self.store.get(&key).await {
            debug!(%key, "Using cached token");
            return Ok(record);
        }

        let refresh = self.refresh_token().await?;
        let tokens = match self.client.refresh_access_token(&refresh.value).await {
            Ok(tokens) => tokens,
            Err(e) if e.is_credential_rejection() => {
                warn!("Refresh token rejected: {}", e);
                return Err(AuthError::NeedsInteractiveAuth {
                    cause: Some(Box::new(e)),
                });
            }
            Err(e) => return Err(e),
        };

        ensure_usable(&key, &tokens.access)?;
        let mut records = vec![(key.clone(), tokens.access.clone())];
        if let Some(rotated) = tokens.refresh {
            records.push((TokenKey::RefreshToken, rotated));
        }
        self.store.set_all(records).await?;

        info!(%key, "Derived and stored token");
        Ok(tokens.access)
    }

    pub async fn user_token(&self) -> Result<TokenRecord> {
        let key = TokenKey::UserToken;
        let _guard = self.lock(&key).await;

        if let Some(record) = self.store.get(&key).await {
            debug!(%key, "Using cached token");
            return Ok(record);
        }

        let access = self.access_token().await?;
        let record = self.client.user_token(&access.value).await?;
        self.persist(key, record).await
    }

    /// XSTS token for `relying_party`, independent of every other relying party
    pub async fn xsts_token(&self, relying_party: &str) -> Result<TokenRecord> {
        let key = TokenKey::xsts(relying_party);
        let _guard = self.lock(&key).await;

        if let Some(record) = self.store.get(&key).await {
            debug!(%key, "Using cached token");
            return Ok(record);
        }

        let user = self.user_token().await?;
        let record = self.client.xsts_token(&user.value, relying_party).await?;
        self.persist(key, record).await
    }

    /// Game services access token, derived from the service relying party's XSTS token
    pub async fn service_token(&self) -> Result<TokenRecord> {
        let key = TokenKey::ServiceToken;
        let _guard = self.lock(&key).await;

        if let Some(record) = self.store.get(&key).await {
            debug!(%key, "Using cached token");
            return Ok(record);
        }

        let xsts = self
            .xsts_token(&self.client.config().service_relying_party)
            .await?;
        let user_hash = xsts
            .user_hash
            .as_deref()
            .ok_or_else(|| AuthError::malformed("XSTS token", "stored record has no user hash"))?;
        let record = self.client.service_token(&xsts.value, user_hash).await?;
        self.persist(key, record).await
    }

    /// `XBL3.0 x=<uhs>;<token>` authorization header value for `relying_party`
    pub async fn xbl_authorization(&self, relying_party: &str) -> Result<String> {
        self.xsts_token(relying_party)
            .await?
            .xbl_authorization()
            .ok_or_else(|| AuthError::malformed("XSTS token", "stored record has no user hash"))
    }

    async fn persist(&self, key: TokenKey, record: TokenRecord) -> Result<TokenRecord> {
        ensure_usable(&key, &record)?;
        self.store.set(key.clone(), record.clone()).await?;
        info!(%key, "Derived and stored token");
        Ok(record)
    }

    pub async fn state(&self, key: &TokenKey) -> TokenState {
        self.store.state(key).await
    }

    /// Interactive bootstrap.
    ///
    /// Requests a device code, hands it to `prompt` for display, polls until the
    /// user signs in, then stores the access and refresh tokens together.
    #[instrument(skip_all)]
    pub async fn login_with_device_code(
        &self,
        cancel: &CancellationToken,
        prompt: impl FnOnce(&DeviceCode) + Send,
    ) -> Result<TokenRecord> {
        let code = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            code = self.client.request_device_code() => code?,
        };
        prompt(&code);

        let tokens = device_code::poll_until_authorized(&self.client, &code, cancel).await?;
        let refresh = tokens.refresh.ok_or_else(|| {
            AuthError::malformed("token", "authorized response has no refresh_token")
        })?;
        ensure_usable(&TokenKey::AccessToken, &tokens.access)?;

        let _guard = self.lock(&TokenKey::AccessToken).await;
        self.store
            .set_all(vec![
                (TokenKey::AccessToken, tokens.access.clone()),
                (TokenKey::RefreshToken, refresh),
            ])
            .await?;

        info!("Stored base tokens from device code sign-in");
        Ok(tokens.access)
    }

    /// Forget every stored token
    pub async fn logout(&self) -> Result<()> {
        self.store.clear().await
    }
}

/// Refuse a freshly issued record that is already unusable, so it is never stored
fn ensure_usable(key: &TokenKey, record: &TokenRecord) -> Result<()> {
    if record.is_valid_for(key, Utc::now()) {
        return Ok(());
    }

    let endpoint = match key {
        TokenKey::RefreshToken | TokenKey::AccessToken => "token",
        TokenKey::UserToken => "user token",
        TokenKey::XstsToken(_) => "XSTS token",
        TokenKey::ServiceToken => "service token",
    };
    Err(AuthError::malformed(
        endpoint,
        format!("issued {key} is already expired (expires_at {:?})", record.expires_at),
    ))
}

impl std::fmt::Debug for TokenResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResolver")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
