//! Identity token verification.
//!
//! [`TokenVerifier::verify`] turns a compact token string into verified
//! [`TokenClaims`]. The pipeline runs in a fixed order and stops at the first
//! failure:
//!
//! 1. split into exactly three non-empty segments ([`TokenSegments::split`])
//! 2. base64url-decode every segment, padding to a multiple of 4 first
//!    ([`decode_segment`])
//! 3. parse the header; reject any `alg` but `RS256`; require a usable `kid`
//! 4. resolve the signing key through the [`KeyProvider`]
//! 5. verify the RSA signature over `header.payload`
//! 6. parse the payload
//! 7. check `iss`, `aud`, `token_use`, `exp`, `email_verified`, in that order
//!
//! No claim is read before step 5 succeeds.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use homemendi_authn::{AuthConfig, KeyProvider, TokenVerifier};
//!
//! # async fn example(raw_token: &str) -> Result<(), homemendi_authn::AuthError> {
//! let config = AuthConfig::builder()
//!     .issuer("https://cognito-idp.us-east-1.amazonaws.com/us-east-1_Example")
//!     .audience("client-id")
//!     .build()?;
//! let keys = Arc::new(KeyProvider::from_config(&config)?);
//! let verifier = TokenVerifier::new(&config, keys)?;
//!
//! let claims = verifier.verify(raw_token).await?;
//! println!("verified: {}", claims.email());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::AuthConfig,
    error::{AuthError, Result},
    jwks::SigningKey,
    key_provider::KeyProvider,
    validation::{validate_algorithm, validate_kid},
};

/// The three segments of a compact token, borrowed from the raw string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSegments<'a> {
    raw: &'a str,
    header: &'a str,
    payload: &'a str,
    signature: &'a str,
}

impl<'a> TokenSegments<'a> {
    /// Splits a compact token on `.`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] unless there are exactly three
    /// segments and none is empty.
    pub fn split(raw: &'a str) -> Result<Self> {
        let mut parts = raw.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::malformed_token("expected 3 segments"));
        };

        if header.is_empty() || payload.is_empty() || signature.is_empty() {
            return Err(AuthError::malformed_token("empty segment"));
        }

        Ok(Self { raw, header, payload, signature })
    }

    /// Returns the encoded header segment.
    #[must_use]
    pub fn header(&self) -> &'a str {
        self.header
    }

    /// Returns the encoded payload segment.
    #[must_use]
    pub fn payload(&self) -> &'a str {
        self.payload
    }

    /// Returns the encoded signature segment.
    #[must_use]
    pub fn signature(&self) -> &'a str {
        self.signature
    }

    /// Returns `header.payload`, the bytes covered by the signature.
    #[must_use]
    pub fn signing_input(&self) -> &'a str {
        &self.raw[..self.header.len() + 1 + self.payload.len()]
    }
}

/// Decodes one base64url token segment.
///
/// The token encoding omits padding; the segment is padded with `=` to a
/// multiple of 4 before decoding.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the segment is not valid base64url.
pub fn decode_segment(segment: &str) -> Result<Vec<u8>> {
    let mut padded = String::with_capacity(segment.len() + 3);
    padded.push_str(segment);
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    URL_SAFE
        .decode(padded.as_bytes())
        .map_err(|e| AuthError::malformed_token(format!("invalid base64url segment: {e}")))
}

/// Token header fields used for key selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Signature algorithm.
    pub alg: String,
    /// Key identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Token type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

/// The `aud` claim: a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// A single audience.
    One(String),
    /// Several audiences.
    Many(Vec<String>),
}

impl Audience {
    /// Returns `true` if `expected` is (one of) the audience(s).
    #[must_use]
    pub fn contains(&self, expected: &str) -> bool {
        match self {
            Self::One(aud) => aud == expected,
            Self::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::One(aud) => f.write_str(aud),
            Self::Many(auds) => f.write_str(&auds.join(",")),
        }
    }
}

/// Declared purpose of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenUse {
    /// Identity token: asserts who the user is.
    Id,
    /// Access token: grants API scopes.
    Access,
}

impl TokenUse {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "id" => Some(Self::Id),
            "access" => Some(Self::Access),
            _ => None,
        }
    }
}

/// Payload as received; every field optional so a missing claim maps to its
/// own validation error rather than a parse failure.
#[derive(Debug, Deserialize)]
struct RawClaims {
    iss: Option<String>,
    aud: Option<Audience>,
    sub: Option<String>,
    token_use: Option<String>,
    exp: Option<i64>,
    iat: Option<i64>,
    email_verified: Option<bool>,
    email: Option<String>,
}

/// Claims of a verified identity token.
///
/// Only [`TokenVerifier`] produces values of this type, after the signature
/// and every claim check passed. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    issuer: String,
    audience: Audience,
    subject: Option<String>,
    token_use: TokenUse,
    expires_at: DateTime<Utc>,
    issued_at: Option<DateTime<Utc>>,
    email_verified: bool,
    email: String,
    key_id: String,
}

impl TokenClaims {
    /// Returns the issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the audience.
    #[must_use]
    pub fn audience(&self) -> &Audience {
        &self.audience
    }

    /// Returns the subject, if present.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Returns the token use (always [`TokenUse::Id`] once verified).
    #[must_use]
    pub fn token_use(&self) -> TokenUse {
        self.token_use
    }

    /// Returns the expiry.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns the issue time, if present.
    #[must_use]
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// Returns whether the email was verified (always `true` once verified).
    #[must_use]
    pub fn email_verified(&self) -> bool {
        self.email_verified
    }

    /// Returns the verified email.
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Returns the `kid` of the key that signed the token (from the header).
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

/// Verifies identity tokens against one trusted issuer.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    issuer: String,
    audience: String,
    keys: Arc<KeyProvider>,
}

impl TokenVerifier {
    /// Creates a verifier for `config.issuer()` and `config.audience()`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the configuration is invalid.
    pub fn new(config: &AuthConfig, keys: Arc<KeyProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self { issuer: config.issuer().to_owned(), audience: config.audience().to_owned(), keys })
    }

    /// Returns the key provider backing this verifier.
    #[must_use]
    pub fn key_provider(&self) -> &Arc<KeyProvider> {
        &self.keys
    }

    /// Verifies a raw compact token at the current time.
    ///
    /// # Errors
    ///
    /// Returns the first failing check, see [`verify_at`](Self::verify_at).
    #[tracing::instrument(skip_all)]
    pub async fn verify(&self, raw_token: &str) -> Result<TokenClaims> {
        self.verify_at(raw_token, Utc::now()).await
    }

    /// Verifies a raw compact token as of `now`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`]: segment count, base64url, or JSON
    /// - [`AuthError::UnsupportedAlgorithm`]: `alg` is not `RS256`
    /// - [`AuthError::UnknownKey`]: missing `kid` or no such key
    /// - [`AuthError::KeyProviderUnavailable`]: no key set obtainable
    /// - [`AuthError::InvalidSignature`]: signature mismatch
    /// - [`AuthError::InvalidIssuer`], [`AuthError::InvalidAudience`],
    ///   [`AuthError::WrongTokenUse`], [`AuthError::TokenExpired`],
    ///   [`AuthError::EmailNotVerified`]: claim checks, in that order
    pub async fn verify_at(&self, raw_token: &str, now: DateTime<Utc>) -> Result<TokenClaims> {
        let segments = TokenSegments::split(raw_token)?;
        let header_bytes = decode_segment(segments.header())?;
        let payload_bytes = decode_segment(segments.payload())?;
        let signature_bytes = decode_segment(segments.signature())?;

        let header: TokenHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| AuthError::malformed_token(format!("invalid header: {e}")))?;
        validate_algorithm(&header.alg)?;
        let kid = validate_kid(header.kid.as_deref())?;

        let key = self.keys.get_key(kid).await?;
        verify_signature(&segments, &signature_bytes, &key)?;

        let raw: RawClaims = serde_json::from_slice(&payload_bytes)
            .map_err(|e| AuthError::malformed_token(format!("invalid payload: {e}")))?;
        let claims = self.validate_claims(raw, kid, now)?;

        tracing::debug!(kid, "token verified");
        Ok(claims)
    }

    fn validate_claims(&self, raw: RawClaims, kid: &str, now: DateTime<Utc>) -> Result<TokenClaims> {
        let issuer = raw.iss.unwrap_or_default();
        if issuer != self.issuer {
            return Err(AuthError::invalid_issuer(issuer));
        }

        let audience = match raw.aud {
            Some(aud) if aud.contains(&self.audience) => aud,
            Some(aud) => return Err(AuthError::invalid_audience(aud.to_string())),
            None => return Err(AuthError::invalid_audience("")),
        };

        let token_use_raw = raw.token_use.unwrap_or_default();
        let token_use = match TokenUse::parse(&token_use_raw) {
            Some(TokenUse::Id) => TokenUse::Id,
            _ => return Err(AuthError::wrong_token_use(token_use_raw)),
        };

        let expires_at = raw
            .exp
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
            .ok_or(AuthError::TokenExpired)?;
        if expires_at <= now {
            return Err(AuthError::TokenExpired);
        }

        if raw.email_verified != Some(true) {
            return Err(AuthError::EmailNotVerified);
        }

        let email = raw
            .email
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| AuthError::malformed_token("missing email claim"))?;

        Ok(TokenClaims {
            issuer,
            audience,
            subject: raw.sub,
            token_use,
            expires_at,
            issued_at: raw.iat.and_then(|iat| Utc.timestamp_opt(iat, 0).single()),
            email_verified: true,
            email,
            key_id: kid.to_owned(),
        })
    }
}

/// Verifies the RSA signature of `segments` with `key`.
///
/// # Errors
///
/// Returns [`AuthError::InvalidSignature`] if the signature length does not
/// match the modulus or the signature does not verify.
pub fn verify_signature(
    segments: &TokenSegments<'_>,
    signature: &[u8],
    key: &SigningKey,
) -> Result<()> {
    if signature.len() != key.modulus().len() {
        return Err(AuthError::InvalidSignature);
    }

    let verified = jsonwebtoken::crypto::verify(
        segments.signature(),
        segments.signing_input().as_bytes(),
        &key.decoding_key(),
        key.algorithm().to_jsonwebtoken(),
    );

    match verified {
        Ok(true) => Ok(()),
        Ok(false) => Err(AuthError::InvalidSignature),
        Err(e) => {
            tracing::debug!(error = %e, "signature verification error");
            Err(AuthError::InvalidSignature)
        },
    }
}
