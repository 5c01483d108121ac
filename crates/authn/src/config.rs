//! Configuration for token verification and access authorization.
//!
//! [`AuthConfig`] names the one trusted issuer, the expected audience, where
//! the issuer publishes its signing keys, and the time bounds used by the key
//! provider and the authorizer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};

/// Default lifetime of a fetched key set (1 hour).
const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(60 * 60);

/// Default maximum age of a key set served while the issuer is unreachable (6 hours).
const DEFAULT_MAX_STALE: Duration = Duration::from_secs(6 * 60 * 60);

/// Default network timeout for a key set fetch (3 seconds).
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Default minimum interval between refreshes triggered by an unknown `kid` (30 seconds).
const DEFAULT_MISS_REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

/// Default pause after a failed key set fetch before an expired set is refetched (30 seconds).
const DEFAULT_REFRESH_FAILURE_BACKOFF: Duration = Duration::from_secs(30);

/// Default bound on a single membership lookup (2 seconds).
const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Path appended to the issuer to locate its published key set.
const WELL_KNOWN_JWKS_PATH: &str = "/.well-known/jwks.json";

/// Configuration for [`TokenVerifier`](crate::TokenVerifier),
/// [`KeyProvider`](crate::KeyProvider) and
/// [`AccessAuthorizer`](crate::AccessAuthorizer).
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use homemendi_authn::AuthConfig;
///
/// let config = AuthConfig::builder()
///     .issuer("https://idp.example/pool")
///     .audience("pool-id")
///     .jwks_ttl(Duration::from_secs(600))
///     .build()?;
///
/// assert_eq!(config.jwks_url(), "https://idp.example/pool/.well-known/jwks.json");
/// # Ok::<(), homemendi_authn::AuthError>(())
/// ```
///
/// Deserialized configurations bypass the builder; call
/// [`validate`](AuthConfig::validate) before use (the verifier and key
/// provider constructors do).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Trusted issuer; the `iss` claim must equal this exactly.
    pub(crate) issuer: String,

    /// Expected audience (the identity provider's client id).
    pub(crate) audience: String,

    /// Key set location. Derived from the issuer when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) jwks_url: Option<String>,

    /// Age after which a cached key set is refreshed.
    #[serde(with = "humantime_serde", default = "default_jwks_ttl")]
    pub(crate) jwks_ttl: Duration,

    /// Maximum age of a key set served while refreshes fail.
    #[serde(with = "humantime_serde", default = "default_max_stale")]
    pub(crate) max_stale: Duration,

    /// Network timeout for one key set fetch.
    #[serde(with = "humantime_serde", default = "default_fetch_timeout")]
    pub(crate) fetch_timeout: Duration,

    /// Minimum interval between refreshes caused by an unknown `kid`.
    #[serde(with = "humantime_serde", default = "default_miss_refresh_cooldown")]
    pub(crate) miss_refresh_cooldown: Duration,

    /// After a failed fetch, how long an expired set is served without
    /// refetching. Zero refetches on every request.
    #[serde(with = "humantime_serde", default = "default_refresh_failure_backoff")]
    pub(crate) refresh_failure_backoff: Duration,

    /// Bound on one membership lookup.
    #[serde(with = "humantime_serde", default = "default_lookup_timeout")]
    pub(crate) lookup_timeout: Duration,

    /// Permits a plain `http` key set URL. Local test servers only.
    #[serde(default)]
    pub(crate) allow_insecure_http: bool,
}

fn default_jwks_ttl() -> Duration {
    DEFAULT_JWKS_TTL
}

fn default_max_stale() -> Duration {
    DEFAULT_MAX_STALE
}

fn default_fetch_timeout() -> Duration {
    DEFAULT_FETCH_TIMEOUT
}

fn default_miss_refresh_cooldown() -> Duration {
    DEFAULT_MISS_REFRESH_COOLDOWN
}

fn default_refresh_failure_backoff() -> Duration {
    DEFAULT_REFRESH_FAILURE_BACKOFF
}

fn default_lookup_timeout() -> Duration {
    DEFAULT_LOOKUP_TIMEOUT
}

#[bon::bon]
impl AuthConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Arguments
    ///
    /// * `issuer` - Trusted issuer URL.
    /// * `audience` - Expected audience.
    ///
    /// # Optional Fields
    ///
    /// * `jwks_url` - Key set URL (default: `{issuer}/.well-known/jwks.json`).
    /// * `jwks_ttl` - Key set lifetime (default: 1 hour).
    /// * `max_stale` - Stale key set tolerance (default: 6 hours).
    /// * `fetch_timeout` - Key set fetch timeout (default: 3 seconds).
    /// * `miss_refresh_cooldown` - Unknown-`kid` refresh interval (default: 30 seconds).
    /// * `refresh_failure_backoff` - Pause after a failed fetch (default: 30 seconds).
    /// * `lookup_timeout` - Membership lookup bound (default: 2 seconds).
    /// * `allow_insecure_http` - Accept an `http` key set URL (default: false).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if validation fails; see
    /// [`validate`](AuthConfig::validate).
    #[builder]
    pub fn new(
        #[builder(into)] issuer: String,
        #[builder(into)] audience: String,
        #[builder(into)] jwks_url: Option<String>,
        #[builder(default = DEFAULT_JWKS_TTL)] jwks_ttl: Duration,
        #[builder(default = DEFAULT_MAX_STALE)] max_stale: Duration,
        #[builder(default = DEFAULT_FETCH_TIMEOUT)] fetch_timeout: Duration,
        #[builder(default = DEFAULT_MISS_REFRESH_COOLDOWN)] miss_refresh_cooldown: Duration,
        #[builder(default = DEFAULT_REFRESH_FAILURE_BACKOFF)] refresh_failure_backoff: Duration,
        #[builder(default = DEFAULT_LOOKUP_TIMEOUT)] lookup_timeout: Duration,
        #[builder(default)] allow_insecure_http: bool,
    ) -> Result<Self> {
        let config = Self {
            issuer,
            audience,
            jwks_url,
            jwks_ttl,
            max_stale,
            fetch_timeout,
            miss_refresh_cooldown,
            refresh_failure_backoff,
            lookup_timeout,
            allow_insecure_http,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if:
    /// - `issuer` or `audience` is empty
    /// - the key set URL does not parse, or is not `https` while
    ///   `allow_insecure_http` is off
    /// - `jwks_ttl`, `fetch_timeout` or `lookup_timeout` is zero
    /// - `max_stale` is shorter than `jwks_ttl`
    pub fn validate(&self) -> Result<()> {
        if self.issuer.trim().is_empty() {
            return Err(AuthError::config("issuer cannot be empty"));
        }
        if self.audience.trim().is_empty() {
            return Err(AuthError::config("audience cannot be empty"));
        }

        let url = Url::parse(&self.jwks_url())
            .map_err(|e| AuthError::config(format!("invalid jwks_url: {e}")))?;
        match url.scheme() {
            "https" => {},
            "http" if self.allow_insecure_http => {},
            scheme => {
                return Err(AuthError::config(format!(
                    "jwks_url must use https (got '{scheme}')"
                )));
            },
        }

        if self.jwks_ttl.is_zero() {
            return Err(AuthError::config("jwks_ttl must be non-zero"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(AuthError::config("fetch_timeout must be non-zero"));
        }
        if self.lookup_timeout.is_zero() {
            return Err(AuthError::config("lookup_timeout must be non-zero"));
        }
        if self.max_stale < self.jwks_ttl {
            return Err(AuthError::config("max_stale must be at least jwks_ttl"));
        }

        Ok(())
    }

    /// Returns the trusted issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the expected audience.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Returns the key set URL, derived from the issuer when not configured.
    #[must_use]
    pub fn jwks_url(&self) -> String {
        match &self.jwks_url {
            Some(url) => url.clone(),
            None => format!("{}{WELL_KNOWN_JWKS_PATH}", self.issuer.trim_end_matches('/')),
        }
    }

    /// Returns the key set lifetime.
    #[must_use]
    pub fn jwks_ttl(&self) -> Duration {
        self.jwks_ttl
    }

    /// Returns the stale key set tolerance.
    #[must_use]
    pub fn max_stale(&self) -> Duration {
        self.max_stale
    }

    /// Returns the key set fetch timeout.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Returns the minimum interval between unknown-`kid` refreshes.
    #[must_use]
    pub fn miss_refresh_cooldown(&self) -> Duration {
        self.miss_refresh_cooldown
    }

    /// Returns how long an expired set is served after a failed fetch before
    /// the next fetch is attempted.
    #[must_use]
    pub fn refresh_failure_backoff(&self) -> Duration {
        self.refresh_failure_backoff
    }

    /// Returns the membership lookup bound.
    #[must_use]
    pub fn lookup_timeout(&self) -> Duration {
        self.lookup_timeout
    }

    /// Returns whether a plain `http` key set URL is accepted.
    #[must_use]
    pub fn allow_insecure_http(&self) -> bool {
        self.allow_insecure_http
    }
}
