//! Security-focused verification tests.
//!
//! These tests exercise the verification pipeline against common token attack
//! vectors: algorithm substitution, algorithm confusion, forged and tampered
//! signatures, key confusion across key ids, claim forgery behind a bad
//! signature, and malformed token structures.
#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use homemendi_authn::{
    AuthError, KeyProvider, TokenVerifier,
    jwks::JwkSetDocument,
    testutil::{
        StaticJwksFetcher, TEST_KID_PRIMARY, TEST_KID_SECONDARY, TestKey, craft_token, mint_token,
        test_config, test_jwks_document, valid_claims,
    },
    validation::validate_algorithm,
};
use proptest::prelude::*;
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn verifier_with(document: JwkSetDocument) -> (TokenVerifier, Arc<StaticJwksFetcher>) {
    let config = test_config();
    let fetcher = Arc::new(StaticJwksFetcher::new(document));
    let keys = Arc::new(KeyProvider::new(&config, fetcher.clone()).expect("key provider"));
    (TokenVerifier::new(&config, keys).expect("verifier"), fetcher)
}

fn verifier() -> TokenVerifier {
    verifier_with(test_jwks_document()).0
}

/// Replaces the signature of `token` with `signature`.
fn with_signature(token: &str, signature: &[u8]) -> String {
    let (signed, _) = token.rsplit_once('.').expect("three segments");
    format!("{signed}.{}", URL_SAFE_NO_PAD.encode(signature))
}

fn signature_of(token: &str) -> Vec<u8> {
    let (_, signature) = token.rsplit_once('.').expect("three segments");
    URL_SAFE_NO_PAD.decode(signature).expect("signature segment")
}

// ===========================================================================
// 1. Algorithm substitution: `alg: "none"` must be rejected
// ===========================================================================

#[test]
fn test_algorithm_none_rejected() {
    let result = validate_algorithm("none");
    assert!(
        matches!(&result, Err(AuthError::UnsupportedAlgorithm { alg }) if alg == "none"),
        "Security: 'none' must be rejected, got: {result:?}"
    );
}

#[tokio::test]
async fn test_algorithm_none_token_rejected_before_key_lookup() {
    let (verifier, fetcher) = verifier_with(test_jwks_document());
    let token = craft_token(&json!({"alg": "none", "kid": TEST_KID_PRIMARY}), &valid_claims(), b"x");

    let result = verifier.verify(&token).await;
    assert!(
        matches!(result, Err(AuthError::UnsupportedAlgorithm { .. })),
        "Security: alg:none token must be rejected, got: {result:?}"
    );
    assert_eq!(fetcher.calls(), 0, "Security: rejected algorithm must not trigger a key fetch");
}

// ===========================================================================
// 2. Algorithm confusion: HMAC keyed with the RSA public key
// ===========================================================================

#[tokio::test]
async fn test_algorithm_confusion_hs256_rejected() {
    // The classic attack signs with HMAC using the published RSA modulus as
    // the shared secret. The header alone must be enough to reject it.
    let jwk = TestKey::Primary.jwk(TEST_KID_PRIMARY);
    let secret = jwk.n.expect("modulus");
    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256);
    header.kid = Some(TEST_KID_PRIMARY.to_owned());
    let token = jsonwebtoken::encode(
        &header,
        &valid_claims(),
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("hmac token");

    let result = verifier().verify(&token).await;
    assert!(
        matches!(result, Err(AuthError::UnsupportedAlgorithm { ref alg }) if alg == "HS256"),
        "Security: HS256 must be rejected, got: {result:?}"
    );
}

#[tokio::test]
async fn test_other_asymmetric_algorithms_rejected() {
    for alg in ["RS384", "RS512", "PS256", "ES256", "EdDSA", "rs256"] {
        let token = craft_token(&json!({"alg": alg, "kid": TEST_KID_PRIMARY}), &valid_claims(), b"x");
        let result = verifier().verify(&token).await;
        assert!(
            matches!(result, Err(AuthError::UnsupportedAlgorithm { .. })),
            "Security: {alg} must be rejected, got: {result:?}"
        );
    }
}

// ===========================================================================
// 3. Signature tampering
// ===========================================================================

#[tokio::test]
async fn test_flipped_signature_bit_rejected() {
    let token = mint_token(TestKey::Primary, TEST_KID_PRIMARY, &valid_claims());
    let mut signature = signature_of(&token);
    signature[0] ^= 0x01;

    let result = verifier().verify(&with_signature(&token, &signature)).await;
    assert!(matches!(result, Err(AuthError::InvalidSignature)), "got: {result:?}");
}

#[tokio::test]
async fn test_tampered_payload_rejected() {
    // Re-encode the payload with a different email but keep the original
    // signature.
    let token = mint_token(TestKey::Primary, TEST_KID_PRIMARY, &valid_claims());
    let parts: Vec<&str> = token.split('.').collect();
    let mut claims = valid_claims();
    claims["email"] = json!("mallory@example.com");
    let forged =
        format!("{}.{}.{}", parts[0], URL_SAFE_NO_PAD.encode(claims.to_string()), parts[2]);

    let result = verifier().verify(&forged).await;
    assert!(matches!(result, Err(AuthError::InvalidSignature)), "got: {result:?}");
}

#[tokio::test]
async fn test_empty_and_zero_signatures_rejected() {
    let token = mint_token(TestKey::Primary, TEST_KID_PRIMARY, &valid_claims());

    let zeros = with_signature(&token, &[0u8; 256]);
    let result = verifier().verify(&zeros).await;
    assert!(matches!(result, Err(AuthError::InvalidSignature)), "got: {result:?}");

    let (signed, _) = token.rsplit_once('.').expect("three segments");
    let result = verifier().verify(&format!("{signed}.")).await;
    assert!(matches!(result, Err(AuthError::MalformedToken { .. })), "got: {result:?}");
}

// ===========================================================================
// 4. Key confusion: a valid signature under the wrong key id
// ===========================================================================

#[tokio::test]
async fn test_signature_by_other_published_key_rejected() {
    let mut document = test_jwks_document();
    document.keys.push(TestKey::Secondary.jwk(TEST_KID_SECONDARY));
    let (verifier, _) = verifier_with(document);

    // Signed by the secondary key but claims to be the primary.
    let token = mint_token(TestKey::Secondary, TEST_KID_PRIMARY, &valid_claims());
    let result = verifier.verify(&token).await;
    assert!(matches!(result, Err(AuthError::InvalidSignature)), "got: {result:?}");

    // Same key under its own id verifies.
    let token = mint_token(TestKey::Secondary, TEST_KID_SECONDARY, &valid_claims());
    assert!(verifier.verify(&token).await.is_ok());
}

#[tokio::test]
async fn test_unpublished_kid_is_unknown_key() {
    let token = mint_token(TestKey::Secondary, TEST_KID_SECONDARY, &valid_claims());
    let result = verifier().verify(&token).await;
    assert!(
        matches!(result, Err(AuthError::UnknownKey { ref kid }) if kid == TEST_KID_SECONDARY),
        "got: {result:?}"
    );
}

#[tokio::test]
async fn test_path_traversal_kid_rejected_without_fetch() {
    let (verifier, fetcher) = verifier_with(test_jwks_document());
    let token =
        craft_token(&json!({"alg": "RS256", "kid": "../../etc/passwd"}), &valid_claims(), b"x");

    let result = verifier.verify(&token).await;
    assert!(matches!(result, Err(AuthError::UnknownKey { .. })), "got: {result:?}");
    assert_eq!(fetcher.calls(), 0);
}

// ===========================================================================
// 5. Malformed structures
// ===========================================================================

#[tokio::test]
async fn test_malformed_structures_rejected() {
    let verifier = verifier();
    let cases = [
        "",
        "eyJhbGciOiJSUzI1NiJ9",
        "eyJhbGciOiJSUzI1NiJ9.e30",
        "a.b.c.d",
        "...",
        "!!!.@@@.###",
        "eyJhbGciOiJSUzI1NiJ9.e30.c2ln.",
    ];

    for raw in cases {
        let result = verifier.verify(raw).await;
        assert!(
            matches!(result, Err(AuthError::MalformedToken { .. })),
            "Security: {raw:?} must be malformed, got: {result:?}"
        );
    }
}

#[tokio::test]
async fn test_payload_that_is_not_an_object_rejected() {
    let token = craft_token(&json!({"alg": "RS256", "kid": TEST_KID_PRIMARY}), &json!([1, 2]), b"x");
    // Signature verification runs first and fails on the forged signature.
    let result = verifier().verify(&token).await;
    assert!(matches!(result, Err(AuthError::InvalidSignature)), "got: {result:?}");

    let token = mint_token(TestKey::Primary, TEST_KID_PRIMARY, &json!("just a string"));
    let result = verifier().verify(&token).await;
    assert!(matches!(result, Err(AuthError::MalformedToken { .. })), "got: {result:?}");
}

// ===========================================================================
// 6. Error messages do not leak key material
// ===========================================================================

#[tokio::test]
async fn test_errors_do_not_echo_token() {
    let token = mint_token(TestKey::Primary, TEST_KID_PRIMARY, &valid_claims());
    let mut signature = signature_of(&token);
    signature[10] ^= 0xff;
    let tampered = with_signature(&token, &signature);

    let err = verifier().verify(&tampered).await.unwrap_err();
    let rendered = err.to_string();
    assert!(!rendered.contains(&tampered));
    assert!(!rendered.contains("alice@example.com"));
}

// ===========================================================================
// 7. Signature check cannot be bypassed by claim values
// ===========================================================================

fn arbitrary_claims() -> impl Strategy<Value = serde_json::Value> {
    (
        prop::option::of("[a-z:/.]{0,30}"),
        prop::option::of("[a-z-]{0,12}"),
        prop::option::of(prop_oneof![Just("id".to_owned()), Just("access".to_owned())]),
        prop::option::of(-10_000_000_000i64..10_000_000_000i64),
        prop::option::of(any::<bool>()),
        prop::option::of("[a-z]{1,8}@[a-z]{1,8}\\.com"),
    )
        .prop_map(|(iss, aud, token_use, exp, email_verified, email)| {
            json!({
                "iss": iss,
                "aud": aud,
                "token_use": token_use,
                "exp": exp,
                "email_verified": email_verified,
                "email": email,
            })
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_foreign_signature_always_invalid(claims in arbitrary_claims()) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let token = mint_token(TestKey::Secondary, TEST_KID_PRIMARY, &claims);
        let result = runtime.block_on(verifier().verify(&token));
        prop_assert!(matches!(result, Err(AuthError::InvalidSignature)), "got: {:?}", result);
    }

    #[test]
    fn prop_any_single_bit_flip_invalid(byte in 0usize..256, bit in 0u8..8) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let token = mint_token(TestKey::Primary, TEST_KID_PRIMARY, &valid_claims());
        let mut signature = signature_of(&token);
        signature[byte] ^= 1 << bit;
        let result = runtime.block_on(verifier().verify(&with_signature(&token, &signature)));
        prop_assert!(matches!(result, Err(AuthError::InvalidSignature)), "got: {:?}", result);
    }
}

// ===========================================================================
// 8. Claim properties hold for every value, not just sample points
// ===========================================================================

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_any_token_use_other_than_id_rejected(
        token_use in "[A-Za-z_ -]{0,16}".prop_filter("must differ from id", |s| s != "id")
    ) {
        let mut claims = valid_claims();
        claims["token_use"] = json!(token_use);
        let token = mint_token(TestKey::Primary, TEST_KID_PRIMARY, &claims);

        let result = runtime().block_on(verifier().verify(&token));
        prop_assert!(
            matches!(
                result,
                Err(AuthError::WrongTokenUse { token_use: ref found }) if *found == token_use
            ),
            "got: {:?}",
            result
        );
    }

    #[test]
    fn prop_any_exp_at_or_before_now_rejected(seconds_ago in 0i64..10_000_000_000) {
        let now = chrono::Utc::now().timestamp();
        let mut claims = valid_claims();
        claims["exp"] = json!(now - seconds_ago);
        let token = mint_token(TestKey::Primary, TEST_KID_PRIMARY, &claims);

        let at = chrono::DateTime::from_timestamp(now, 0).unwrap();
        let result = runtime().block_on(verifier().verify_at(&token, at));
        prop_assert!(matches!(result, Err(AuthError::TokenExpired)), "got: {:?}", result);
    }

    #[test]
    fn prop_arbitrary_strings_never_panic(raw in any::<String>()) {
        let result = runtime().block_on(verifier().verify(&raw));
        prop_assert!(result.is_err());
    }

    #[test]
    fn prop_arbitrary_segments_never_panic(
        header in "[A-Za-z0-9_=-]{0,64}",
        payload in "[A-Za-z0-9_=-]{0,64}",
        signature in "[A-Za-z0-9_=-]{0,64}",
    ) {
        let raw = format!("{header}.{payload}.{signature}");
        let result = runtime().block_on(verifier().verify(&raw));
        prop_assert!(result.is_err());
    }

    #[test]
    fn prop_arbitrary_header_fields_never_panic(
        alg in prop::option::of("[A-Za-z0-9]{0,8}"),
        kid in prop::option::of("[A-Za-z0-9./_-]{0,16}"),
        typ in prop::option::of(any::<i64>()),
    ) {
        let header = json!({"alg": alg, "kid": kid, "typ": typ});
        let raw = craft_token(&header, &valid_claims(), &[0u8; 256]);
        let result = runtime().block_on(verifier().verify(&raw));
        prop_assert!(result.is_err());
    }
}
