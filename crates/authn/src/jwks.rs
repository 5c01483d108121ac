//! Published signing keys.
//!
//! This module covers the wire format of the identity provider's key set
//! document ([`JwkSetDocument`]), its conversion into verified-usable
//! [`SigningKey`]s collected in an immutable [`KeySet`], and the
//! [`JwksFetcher`] seam that retrieves the document ([`HttpJwksFetcher`] in
//! production).
//!
//! # Key filtering
//!
//! Only entries usable for RS256 signature verification enter a [`KeySet`]:
//!
//! - `kty` must be `RSA`
//! - `alg`, when present, must be `RS256`
//! - `use`, when present, must be `sig`
//! - `kid`, `n` and `e` must be present and decode as base64url
//! - the modulus must be at least [`MIN_RSA_MODULUS_BITS`] bits
//!
//! Entries failing a check are skipped and logged. When two entries share a
//! `kid`, the first one wins.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::{
    config::AuthConfig,
    error::{AuthError, Result},
};

/// Smallest accepted RSA modulus.
pub const MIN_RSA_MODULUS_BITS: usize = 2048;

/// Upper bound on the size of a key set document body.
pub const MAX_JWKS_BYTES: usize = 1024 * 1024;

/// One entry of a key set document.
///
/// Unknown members (`x5c`, `x5t`, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (`RSA`).
    pub kty: String,
    /// Intended algorithm (`RS256`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Intended use (`sig`).
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// Key identifier referenced by token headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// RSA modulus, unpadded base64url big-endian.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent, unpadded base64url big-endian.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

/// A key set document: `{ "keys": [ ... ] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSetDocument {
    /// Published keys.
    pub keys: Vec<Jwk>,
}

/// Signature algorithm bound to a [`SigningKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    Rs256,
}

impl SigningAlgorithm {
    /// Returns the `alg` header value for this algorithm.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
        }
    }

    pub(crate) fn to_jsonwebtoken(self) -> jsonwebtoken::Algorithm {
        match self {
            Self::Rs256 => jsonwebtoken::Algorithm::RS256,
        }
    }
}

/// An RSA public signing key published by the identity provider.
///
/// Immutable once built; owned by a [`KeySet`] and shared as `Arc<SigningKey>`.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey {
    key_id: String,
    algorithm: SigningAlgorithm,
    modulus: Vec<u8>,
    public_exponent: Vec<u8>,
}

impl SigningKey {
    /// Builds a key from a key set entry.
    ///
    /// Does not apply the `kty`/`alg`/`use` filters; see
    /// [`KeySet::from_document`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidPublicKey`] if the `kid` is missing, a
    /// component is missing or not base64url, the exponent is zero, or the
    /// modulus is shorter than [`MIN_RSA_MODULUS_BITS`].
    pub fn from_jwk(jwk: &Jwk) -> Result<Self> {
        let kid = jwk
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| AuthError::invalid_public_key("", "missing kid"))?;

        let modulus = decode_component(kid, "n", jwk.n.as_deref())?;
        let public_exponent = decode_component(kid, "e", jwk.e.as_deref())?;

        Self::from_components(kid, &modulus, &public_exponent)
    }

    /// Builds a key from big-endian unsigned modulus and exponent bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidPublicKey`] if the exponent is zero or the
    /// modulus is shorter than [`MIN_RSA_MODULUS_BITS`].
    pub fn from_components(
        key_id: impl Into<String>,
        modulus: &[u8],
        public_exponent: &[u8],
    ) -> Result<Self> {
        let key_id = key_id.into();
        let modulus = strip_leading_zeros(modulus);
        let public_exponent = strip_leading_zeros(public_exponent);

        if public_exponent.is_empty() {
            return Err(AuthError::invalid_public_key(key_id, "public exponent is zero"));
        }

        let bits = bit_length(modulus);
        if bits < MIN_RSA_MODULUS_BITS {
            return Err(AuthError::invalid_public_key(
                key_id,
                format!("modulus is {bits} bits (minimum {MIN_RSA_MODULUS_BITS})"),
            ));
        }

        Ok(Self {
            key_id,
            algorithm: SigningAlgorithm::Rs256,
            modulus: modulus.to_vec(),
            public_exponent: public_exponent.to_vec(),
        })
    }

    /// Returns the key identifier.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Returns the signature algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Returns the modulus as big-endian bytes without leading zeros.
    #[must_use]
    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    /// Returns the public exponent as big-endian bytes without leading zeros.
    #[must_use]
    pub fn public_exponent(&self) -> &[u8] {
        &self.public_exponent
    }

    /// Returns the modulus size in bits.
    #[must_use]
    pub fn modulus_bits(&self) -> usize {
        bit_length(&self.modulus)
    }

    pub(crate) fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_rsa_raw_components(&self.modulus, &self.public_exponent)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("modulus_bits", &self.modulus_bits())
            .finish_non_exhaustive()
    }
}

fn decode_component(kid: &str, name: &str, value: Option<&str>) -> Result<Vec<u8>> {
    let value = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::invalid_public_key(kid, format!("missing '{name}'")))?;
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| AuthError::invalid_public_key(kid, format!("'{name}' is not base64url: {e}")))
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn bit_length(bytes: &[u8]) -> usize {
    match bytes.first() {
        Some(first) => bytes.len() * 8 - first.leading_zeros() as usize,
        None => 0,
    }
}

/// An immutable set of signing keys, versioned by fetch time.
///
/// Replaced wholesale on refresh; never mutated in place.
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: HashMap<String, Arc<SigningKey>>,
    fetched_at: Instant,
}

impl KeySet {
    /// Builds a key set from a fetched document, stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`JwksFetchError::NoUsableKeys`] if no entry survives filtering.
    pub fn from_document(document: &JwkSetDocument) -> std::result::Result<Self, JwksFetchError> {
        let mut keys: HashMap<String, Arc<SigningKey>> = HashMap::new();

        for jwk in &document.keys {
            let kid = jwk.kid.as_deref().unwrap_or_default();

            if jwk.kty != "RSA" {
                tracing::debug!(kid, kty = %jwk.kty, "skipping non-RSA key");
                continue;
            }
            if let Some(alg) = jwk.alg.as_deref()
                && alg != SigningAlgorithm::Rs256.as_str()
            {
                tracing::debug!(kid, alg, "skipping key with unsupported algorithm");
                continue;
            }
            if let Some(key_use) = jwk.key_use.as_deref()
                && key_use != "sig"
            {
                tracing::debug!(kid, key_use, "skipping non-signing key");
                continue;
            }

            match SigningKey::from_jwk(jwk) {
                Ok(key) => {
                    if keys.contains_key(key.key_id()) {
                        tracing::warn!(kid, "duplicate key id in key set; keeping the first");
                        continue;
                    }
                    keys.insert(key.key_id().to_owned(), Arc::new(key));
                },
                Err(e) => {
                    tracing::warn!(kid, error = %e, "skipping unusable key");
                },
            }
        }

        if keys.is_empty() {
            return Err(JwksFetchError::NoUsableKeys);
        }

        Ok(Self { keys, fetched_at: Instant::now() })
    }

    /// Looks up a key by id.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.keys.get(kid).cloned()
    }

    /// Returns `true` if the set holds a key with this id.
    #[must_use]
    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the key ids in sorted order.
    #[must_use]
    pub fn key_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Returns when the set was fetched.
    #[must_use]
    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// Returns the time elapsed since the set was fetched.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Failure to obtain a usable key set.
///
/// `Clone` so one fetch outcome can be handed to every caller that waited on
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum JwksFetchError {
    /// Transport failure (DNS, connect, TLS, body read).
    #[error("request failed: {message}")]
    Http {
        /// Description of the transport failure.
        message: String,
    },

    /// The endpoint answered with a non-success status.
    #[error("unexpected status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The body is not a key set document.
    #[error("invalid key set document: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    /// The document held no usable RSA signing key.
    #[error("key set contains no usable keys")]
    NoUsableKeys,

    /// The fetch exceeded its timeout.
    #[error("request timed out")]
    Timeout,
}

impl JwksFetchError {
    /// Creates an [`JwksFetchError::Http`].
    #[must_use]
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http { message: message.into() }
    }

    /// Creates an [`JwksFetchError::Decode`].
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into() }
    }
}

impl From<reqwest::Error> for JwksFetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if let Some(status) = error.status() {
            Self::Status { status: status.as_u16() }
        } else {
            Self::http(error.to_string())
        }
    }
}

/// Retrieves the key set document.
///
/// Injected into [`KeyProvider`](crate::KeyProvider) so tests can substitute
/// scripted fetchers.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    /// Fetches the current key set document.
    async fn fetch(&self) -> std::result::Result<JwkSetDocument, JwksFetchError>;
}

/// Fetches the key set document over HTTP(S) from the configured URL.
#[derive(Debug, Clone)]
pub struct HttpJwksFetcher {
    client: reqwest::Client,
    url: url::Url,
}

impl HttpJwksFetcher {
    /// Creates a fetcher for `config.jwks_url()` with `config.fetch_timeout()`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the configuration is invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: &AuthConfig) -> Result<Self> {
        config.validate()?;

        let url = url::Url::parse(&config.jwks_url())
            .map_err(|e| AuthError::config(format!("invalid jwks_url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .connect_timeout(config.fetch_timeout())
            .build()
            .map_err(|e| AuthError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, url })
    }

    /// Returns the URL this fetcher reads from.
    #[must_use]
    pub fn url(&self) -> &url::Url {
        &self.url
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> std::result::Result<JwkSetDocument, JwksFetchError> {
        let response = self.client.get(self.url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(JwksFetchError::Status { status: status.as_u16() });
        }

        let body = response.bytes().await?;
        if body.len() > MAX_JWKS_BYTES {
            return Err(JwksFetchError::decode(format!(
                "document is {} bytes (maximum {MAX_JWKS_BYTES})",
                body.len()
            )));
        }

        serde_json::from_slice(&body).map_err(|e| JwksFetchError::decode(e.to_string()))
    }
}
