//! Key set retrieval over HTTP against a local JWKS endpoint.
//!
//! The server binds to 127.0.0.1:0 and serves whatever status and document
//! the test scripts, so failures and rotations can be driven mid-test.
#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{Json, Router, http::StatusCode, routing::get};
use homemendi_authn::{
    AuthConfig, AuthError, HttpJwksFetcher, JwkSetDocument, JwksFetchError, JwksFetcher,
    KeyProvider, TokenVerifier,
    testutil::{
        TEST_AUDIENCE, TEST_KID_PRIMARY, TEST_KID_SECONDARY, TestKey, mint_token,
        test_jwks_document, valid_claims,
    },
};
use parking_lot::Mutex;
use serde_json::json;

type Script = Arc<Mutex<(StatusCode, JwkSetDocument)>>;

async fn serve_jwks(document: JwkSetDocument) -> (SocketAddr, Script) {
    let script: Script = Arc::new(Mutex::new((StatusCode::OK, document)));
    let state = Arc::clone(&script);
    let app = Router::new().route(
        "/pool/.well-known/jwks.json",
        get(move || {
            let state = Arc::clone(&state);
            async move {
                let (status, document) = state.lock().clone();
                (status, Json(document))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    (addr, script)
}

fn local_config(addr: SocketAddr, ttl: Duration) -> AuthConfig {
    AuthConfig::builder()
        .issuer(format!("http://{addr}/pool"))
        .audience(TEST_AUDIENCE)
        .jwks_ttl(ttl)
        .max_stale(Duration::from_secs(3600))
        .miss_refresh_cooldown(Duration::from_millis(1))
        .allow_insecure_http(true)
        .build()
        .expect("config")
}

#[tokio::test]
async fn http_fetcher_reads_document() {
    let (addr, _) = serve_jwks(test_jwks_document()).await;
    let config = local_config(addr, Duration::from_secs(60));
    let fetcher = HttpJwksFetcher::new(&config).unwrap();
    assert_eq!(fetcher.url().as_str(), format!("http://{addr}/pool/.well-known/jwks.json"));

    let document = fetcher.fetch().await.unwrap();
    assert_eq!(document, test_jwks_document());
}

#[tokio::test]
async fn http_fetcher_reports_status() {
    let (addr, script) = serve_jwks(test_jwks_document()).await;
    script.lock().0 = StatusCode::INTERNAL_SERVER_ERROR;
    let fetcher = HttpJwksFetcher::new(&local_config(addr, Duration::from_secs(60))).unwrap();

    assert_eq!(fetcher.fetch().await.unwrap_err(), JwksFetchError::Status { status: 500 });
}

#[tokio::test]
async fn unreachable_endpoint_is_key_provider_unavailable() {
    // Bind then drop to obtain a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let provider = KeyProvider::from_config(&local_config(addr, Duration::from_secs(60))).unwrap();
    let err = provider.get_key(TEST_KID_PRIMARY).await.unwrap_err();
    assert!(matches!(err, AuthError::KeyProviderUnavailable { .. }), "got: {err:?}");
}

#[tokio::test]
async fn verifies_token_against_served_keys() {
    let (addr, _) = serve_jwks(test_jwks_document()).await;
    let config = local_config(addr, Duration::from_secs(60));
    let keys = Arc::new(KeyProvider::from_config(&config).unwrap());
    let verifier = TokenVerifier::new(&config, Arc::clone(&keys)).unwrap();

    let mut claims = valid_claims();
    claims["iss"] = json!(config.issuer());
    let token = mint_token(TestKey::Primary, TEST_KID_PRIMARY, &claims);

    let verified = verifier.verify(&token).await.unwrap();
    assert_eq!(verified.key_id(), TEST_KID_PRIMARY);

    // Second verification served from cache.
    verifier.verify(&token).await.unwrap();
    assert_eq!(keys.fetch_count(), 1);
}

#[tokio::test]
async fn rotation_is_picked_up_on_unknown_kid() {
    let (addr, script) = serve_jwks(test_jwks_document()).await;
    let config = local_config(addr, Duration::from_secs(60));
    let keys = Arc::new(KeyProvider::from_config(&config).unwrap());
    keys.get_key(TEST_KID_PRIMARY).await.unwrap();

    let mut rotated = test_jwks_document();
    rotated.keys.push(TestKey::Secondary.jwk(TEST_KID_SECONDARY));
    script.lock().1 = rotated;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let key = keys.get_key(TEST_KID_SECONDARY).await.unwrap();
    assert_eq!(key.key_id(), TEST_KID_SECONDARY);
    assert_eq!(keys.fetch_count(), 2);
}

#[tokio::test]
async fn expired_set_served_stale_while_endpoint_fails() {
    let (addr, script) = serve_jwks(test_jwks_document()).await;
    let keys =
        KeyProvider::from_config(&local_config(addr, Duration::from_millis(50))).unwrap();
    keys.get_key(TEST_KID_PRIMARY).await.unwrap();

    script.lock().0 = StatusCode::SERVICE_UNAVAILABLE;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let key = keys.get_key(TEST_KID_PRIMARY).await.unwrap();
    assert_eq!(key.key_id(), TEST_KID_PRIMARY);
    assert_eq!(keys.fetch_count(), 2);

    // Forced refresh reports the failure and keeps the cached set.
    let err = keys.refresh().await.unwrap_err();
    assert!(matches!(
        err,
        AuthError::KeyProviderUnavailable { source: JwksFetchError::Status { status: 503 } }
    ));
    assert!(keys.snapshot().unwrap().contains(TEST_KID_PRIMARY));
}
