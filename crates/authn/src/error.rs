//! Authentication error types.
//!
//! Every variant is terminal for the current request and must resolve to a
//! Deny decision at the transport boundary. The `Display` output is meant for
//! internal logs only; callers receive a uniform authorization failure (see
//! [`crate::gate`]).

use homemendi_storage::StorageError;
use thiserror::Error;

use crate::jwks::JwksFetchError;

/// Authentication and authorization errors.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Token is not a three-segment compact token, a segment is not valid
    /// base64url, or the header/payload JSON cannot be parsed.
    #[error("Malformed token: {message}")]
    MalformedToken {
        /// What was wrong with the token.
        message: String,
    },

    /// The header `alg` is not an allow-listed asymmetric algorithm.
    #[error("Unsupported algorithm: {alg}")]
    UnsupportedAlgorithm {
        /// The rejected algorithm as it appeared in the header.
        alg: String,
    },

    /// The header has no usable `kid`, or no signing key with that id exists.
    #[error("Unknown signing key: {kid}")]
    UnknownKey {
        /// The key id from the token header (empty when absent).
        kid: String,
    },

    /// Signature does not verify against the resolved key.
    #[error("Invalid signature")]
    InvalidSignature,

    /// `iss` does not equal the trusted issuer.
    #[error("Invalid issuer: {issuer}")]
    InvalidIssuer {
        /// The issuer found in the token.
        issuer: String,
    },

    /// `aud` does not match the expected audience.
    #[error("Invalid audience: {audience}")]
    InvalidAudience {
        /// The audience found in the token.
        audience: String,
    },

    /// `token_use` is not `id`.
    #[error("Wrong token use: {token_use}")]
    WrongTokenUse {
        /// The token use found in the token.
        token_use: String,
    },

    /// `exp` is not strictly in the future.
    #[error("Token expired")]
    TokenExpired,

    /// `email_verified` is not `true`.
    #[error("Email not verified")]
    EmailNotVerified,

    /// No key set could be fetched and none was cached.
    #[error("Key provider unavailable: {source}")]
    KeyProviderUnavailable {
        /// The fetch failure that left the provider without keys.
        #[source]
        source: JwksFetchError,
    },

    /// A published key cannot be turned into a usable RSA public key.
    #[error("Invalid public key {kid}: {message}")]
    InvalidPublicKey {
        /// Key id of the rejected key.
        kid: String,
        /// Why the key was rejected.
        message: String,
    },

    /// The membership lookup failed; never treated as Allow.
    #[error("Authorization check failed: {source}")]
    AuthorizationCheckFailed {
        /// The underlying storage failure.
        #[source]
        source: StorageError,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    Config {
        /// What is wrong with the configuration.
        message: String,
    },
}

impl AuthError {
    /// Creates a [`AuthError::MalformedToken`].
    #[must_use]
    pub fn malformed_token(message: impl Into<String>) -> Self {
        Self::MalformedToken { message: message.into() }
    }

    /// Creates an [`AuthError::UnsupportedAlgorithm`].
    #[must_use]
    pub fn unsupported_algorithm(alg: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm { alg: alg.into() }
    }

    /// Creates an [`AuthError::UnknownKey`].
    #[must_use]
    pub fn unknown_key(kid: impl Into<String>) -> Self {
        Self::UnknownKey { kid: kid.into() }
    }

    /// Creates an [`AuthError::InvalidIssuer`].
    #[must_use]
    pub fn invalid_issuer(issuer: impl Into<String>) -> Self {
        Self::InvalidIssuer { issuer: issuer.into() }
    }

    /// Creates an [`AuthError::InvalidAudience`].
    #[must_use]
    pub fn invalid_audience(audience: impl Into<String>) -> Self {
        Self::InvalidAudience { audience: audience.into() }
    }

    /// Creates an [`AuthError::WrongTokenUse`].
    #[must_use]
    pub fn wrong_token_use(token_use: impl Into<String>) -> Self {
        Self::WrongTokenUse { token_use: token_use.into() }
    }

    /// Creates an [`AuthError::InvalidPublicKey`].
    #[must_use]
    pub fn invalid_public_key(kid: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPublicKey { kid: kid.into(), message: message.into() }
    }

    /// Creates an [`AuthError::Config`].
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Returns `true` when the failure is attributable to the presented
    /// credential rather than to infrastructure (key provider, storage,
    /// configuration).
    ///
    /// The transport layer may use this to choose between an authorization
    /// failure and a service error; the decision is Deny either way.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::KeyProviderUnavailable { .. }
                | Self::AuthorizationCheckFailed { .. }
                | Self::Config { .. }
        )
    }

    /// Short, stable label for logs and metrics (`snake_case`).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedToken { .. } => "malformed_token",
            Self::UnsupportedAlgorithm { .. } => "unsupported_algorithm",
            Self::UnknownKey { .. } => "unknown_key",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidIssuer { .. } => "invalid_issuer",
            Self::InvalidAudience { .. } => "invalid_audience",
            Self::WrongTokenUse { .. } => "wrong_token_use",
            Self::TokenExpired => "token_expired",
            Self::EmailNotVerified => "email_not_verified",
            Self::KeyProviderUnavailable { .. } => "key_provider_unavailable",
            Self::InvalidPublicKey { .. } => "invalid_public_key",
            Self::AuthorizationCheckFailed { .. } => "authorization_check_failed",
            Self::Config { .. } => "config",
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(source: StorageError) -> Self {
        Self::AuthorizationCheckFailed { source }
    }
}

impl From<JwksFetchError> for AuthError {
    fn from(source: JwksFetchError) -> Self {
        Self::KeyProviderUnavailable { source }
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;
