use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use xb_auth::{FileTokenStore, TokenResolver, XblAuthConfig, XblClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let path = FileTokenStore::default_path()?;
    let store = FileTokenStore::open(&path)
        .await
        .with_context(|| format!("Failed to open token cache {}", path.display()))?;
    let client = XblClient::new(XblAuthConfig::live_connect()?)?;
    let resolver = TokenResolver::new(Arc::new(store), client);

    let token = match resolver.service_token().await {
        Err(e) if e.is_needs_interactive_auth() => {
            info!("No usable refresh token, starting device code sign-in");

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });

            resolver
                .login_with_device_code(&cancel, |code| println!("{}", code.instructions()))
                .await
                .context("Device code sign-in failed")?;
            resolver.service_token().await?
        }
        other => other.context("Failed to resolve service token")?,
    };

    match token.expires_at {
        Some(expires_at) => println!("Service token ready, valid until {expires_at}"),
        None => println!("Service token ready"),
    }

    Ok(())
}
