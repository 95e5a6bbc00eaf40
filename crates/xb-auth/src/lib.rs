//! Chained Xbox Live token broker
//!
//! This crate keeps the credentials needed to call Xbox Live and Minecraft
//! Services, persists them, and re-derives only the stale part of the chain.
//!
//! # Token Chain
//!
//! ```text
//! RefreshToken -> AccessToken -> UserToken -> XstsToken(relying party) -> ServiceToken
//! ```
//!
//! 1. The device code flow produces the access/refresh pair (interactive, explicit)
//! 2. The refresh token silently renews the access token
//! 3. The access token becomes an Xbox Live user token
//! 4. The user token is authorized for a relying party (XSTS)
//! 5. The game services XSTS token logs in to Minecraft Services
//!
//! A warm cache costs no network calls. When a link is stale, only that link
//! and whatever above it is also stale gets re-derived, one exchange each.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use xb_auth::{FileTokenStore, TokenResolver, XblAuthConfig, XblClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = FileTokenStore::open(FileTokenStore::default_path()?).await?;
//!     let client = XblClient::new(XblAuthConfig::live_connect()?)?;
//!     let resolver = TokenResolver::new(Arc::new(store), client);
//!
//!     let token = match resolver.service_token().await {
//!         Err(e) if e.is_needs_interactive_auth() => {
//!             resolver
//!                 .login_with_device_code(&CancellationToken::new(), |code| {
//!                     println!("{}", code.instructions())
//!                 })
//!                 .await?;
//!             resolver.service_token().await?
//!         }
//!         other => other?,
//!     };
//!
//!     println!("Service token valid until {:?}", token.expires_at);
//!     Ok(())
//! }
//! ```
//!
//! # Token Storage
//!
//! Stores implement the [`TokenStore`] trait. [`FileTokenStore`] keeps every
//! record in one owner-only JSON file; [`MemoryTokenStore`] is the in-process
//! alternative for tests.
//!
//! ```
//! use chrono::{Duration, Utc};
//! use xb_auth::{MemoryTokenStore, TokenKey, TokenRecord, TokenStore};
//!
//! # async fn example() -> xb_auth::Result<()> {
//! let store = MemoryTokenStore::new();
//! store
//!     .set(
//!         TokenKey::xsts("rp://api.minecraftservices.com/"),
//!         TokenRecord::new("token", Utc::now() + Duration::hours(16)).with_user_hash("uhs"),
//!     )
//!     .await?;
//!
//! assert!(store.get(&TokenKey::xsts("http://xboxlive.com")).await.is_none());
//! # Ok(())
//! # }
//! # tokio_test::block_on(example()).unwrap();
//! ```
//!
//! # Important Notes
//!
//! - Token values are never logged; `TokenRecord`'s `Debug` output redacts them
//! - Retries are left to the caller; no exchange is retried internally
//! - Two processes sharing one cache file are not coordinated (last writer wins)

pub mod client;
pub mod config;
pub mod device_code;
pub mod errors;
pub mod file_store;
pub mod models;
pub mod resolver;
pub mod store;
pub mod token;

// Re-export main types
pub use client::{MsTokens, XblClient};
pub use config::{Endpoints, XblAuthConfig, RP_GAMES_SERVICE, RP_XBOXLIVE};
pub use device_code::{DeviceCode, DevicePoll};
pub use errors::{AuthError, Result};
pub use file_store::FileTokenStore;
pub use resolver::TokenResolver;
pub use store::{MemoryTokenStore, TokenStore};
pub use token::{CachedTokens, TokenKey, TokenRecord, TokenState};
