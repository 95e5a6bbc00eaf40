#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xb_auth::{
    Endpoints, TokenKey, TokenRecord, TokenResolver, TokenStore, XblAuthConfig, XblClient,
};

pub const GAMING: &str = "gaming";
pub const GAMES_SERVICE: &str = "games-service";

pub fn client_for(base: &str) -> XblClient {
    let config = XblAuthConfig::new("test-client")
        .unwrap()
        .with_endpoints(Endpoints::rooted_at(base).unwrap())
        .with_service_relying_party(GAMES_SERVICE);
    XblClient::new(config).unwrap()
}

pub fn client(server: &MockServer) -> XblClient {
    client_for(&server.uri())
}

pub fn resolver(server: &MockServer, store: Arc<dyn TokenStore>) -> TokenResolver {
    TokenResolver::new(store, client(server))
}

pub fn in_an_hour() -> chrono::DateTime<Utc> {
    Utc::now() + Duration::hours(1)
}

pub fn an_hour_ago() -> chrono::DateTime<Utc> {
    Utc::now() - Duration::hours(1)
}

pub fn valid(value: &str) -> TokenRecord {
    TokenRecord::new(value, in_an_hour())
}

pub fn expired(value: &str) -> TokenRecord {
    TokenRecord::new(value, an_hour_ago())
}

pub async fn seed(store: &dyn TokenStore, records: Vec<(TokenKey, TokenRecord)>) {
    store.set_all(records).await.unwrap();
}

pub fn xbox_token_body(token: &str, uhs: &str) -> Value {
    json!({
        "IssueInstant": Utc::now().to_rfc3339(),
        "NotAfter": (Utc::now() + Duration::hours(16)).to_rfc3339(),
        "Token": token,
        "DisplayClaims": { "xui": [{ "uhs": uhs }] }
    })
}

pub fn oauth_token_body(access: &str, refresh: Option<&str>, expires_in: u64) -> Value {
    let mut body = json!({
        "token_type": "bearer",
        "expires_in": expires_in,
        "scope": "XboxLive.signin offline_access",
        "access_token": access,
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    body
}

pub fn oauth_error(error: &str) -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_json(json!({
        "error": error,
        "error_description": format!("{error} description"),
    }))
}

pub async fn mount_refresh(server: &MockServer, access: &str, refresh: Option<&str>, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(oauth_token_body(access, refresh, 3600)),
        )
        .expect(calls)
        .mount(server)
        .await;
}

pub async fn mount_slow_refresh(server: &MockServer, access: &str, delay: StdDuration, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(oauth_token_body(access, None, 3600))
                .set_delay(delay),
        )
        .expect(calls)
        .mount(server)
        .await;
}

pub async fn mount_user_token(server: &MockServer, token: &str, uhs: &str, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/user/authenticate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(xbox_token_body(token, uhs)))
        .expect(calls)
        .mount(server)
        .await;
}

pub async fn mount_xsts(server: &MockServer, relying_party: &str, token: &str, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/xsts/authorize"))
        .and(body_partial_json(json!({ "RelyingParty": relying_party })))
        .respond_with(ResponseTemplate::new(200).set_body_json(xbox_token_body(token, "uhs-1")))
        .expect(calls)
        .mount(server)
        .await;
}

pub async fn mount_service_login(server: &MockServer, token: &str, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/authentication/login_with_xbox"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "username": "00000000-0000-0000-0000-000000000000",
            "access_token": token,
            "token_type": "Bearer",
            "expires_in": 86400
        })))
        .expect(calls)
        .mount(server)
        .await;
}

pub async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|requests| requests.len())
        .unwrap_or_default()
}
