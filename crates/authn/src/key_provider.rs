//! Cached access to the identity provider's signing keys.
//!
//! [`KeyProvider`] holds the current [`KeySet`] behind an atomic pointer and
//! refreshes it from a [`JwksFetcher`] when it is missing or older than the
//! configured TTL.
//!
//! # Refresh behavior
//!
//! - **Single-flight**: concurrent callers needing a refresh share one fetch
//!   and all receive its outcome.
//! - **Atomic swap**: a fetched set replaces the previous one wholesale; a
//!   failed or cancelled fetch leaves the previous set untouched.
//! - **Bounded staleness**: if a refresh fails, a previous set no older than
//!   `max_stale` keeps being served and the degraded state is logged. For
//!   `refresh_failure_backoff` after a failure, that set is served without
//!   another fetch.
//! - **Rotation**: a fresh set that lacks the requested `kid` triggers at most
//!   one refresh per `miss_refresh_cooldown`.
//!
//! # Example
//!
//! ```no_run
//! use homemendi_authn::{AuthConfig, KeyProvider};
//!
//! # async fn example() -> Result<(), homemendi_authn::AuthError> {
//! let config = AuthConfig::builder()
//!     .issuer("https://cognito-idp.us-east-1.amazonaws.com/us-east-1_Example")
//!     .audience("client-id")
//!     .build()?;
//!
//! let provider = KeyProvider::from_config(&config)?;
//! let key = provider.get_key("abc123").await?;
//! println!("modulus bits: {}", key.modulus_bits());
//! # Ok(())
//! # }
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwapOption;
use fail::fail_point;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    config::AuthConfig,
    error::{AuthError, Result},
    jwks::{HttpJwksFetcher, JwksFetchError, JwksFetcher, KeySet, SigningKey},
};

type FetchOutcome = std::result::Result<Arc<KeySet>, JwksFetchError>;

/// Outcome of the most recent fetch, shared with callers that waited on it.
#[derive(Default)]
struct RefreshSlot {
    last: Option<FetchOutcome>,
}

/// Fetches, caches and serves signing keys by key id.
///
/// One instance is shared (`Arc<KeyProvider>`) by every request in the
/// process. Reads are lock-free; only refreshes serialize.
pub struct KeyProvider {
    fetcher: Arc<dyn JwksFetcher>,
    current: ArcSwapOption<KeySet>,
    refresh: tokio::sync::Mutex<RefreshSlot>,
    /// Bumped once per completed fetch, under the `refresh` lock.
    generation: AtomicU64,
    fetch_count: AtomicU64,
    last_miss_refresh: Mutex<Option<Instant>>,
    /// When the most recent fetch failed; cleared by a successful fetch.
    last_failure: Mutex<Option<Instant>>,
    ttl: Duration,
    max_stale: Duration,
    miss_refresh_cooldown: Duration,
    refresh_failure_backoff: Duration,
}

impl KeyProvider {
    /// Creates a provider that fetches from `config.jwks_url()` over HTTP(S).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the configuration is invalid.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let fetcher = HttpJwksFetcher::new(config)?;
        Self::new(config, Arc::new(fetcher))
    }

    /// Creates a provider with an injected fetcher.
    ///
    /// No fetch happens until the first [`get_key`](Self::get_key) or
    /// [`refresh`](Self::refresh).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the configuration is invalid.
    pub fn new(config: &AuthConfig, fetcher: Arc<dyn JwksFetcher>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            fetcher,
            current: ArcSwapOption::empty(),
            refresh: tokio::sync::Mutex::new(RefreshSlot::default()),
            generation: AtomicU64::new(0),
            fetch_count: AtomicU64::new(0),
            last_miss_refresh: Mutex::new(None),
            last_failure: Mutex::new(None),
            ttl: config.jwks_ttl(),
            max_stale: config.max_stale(),
            miss_refresh_cooldown: config.miss_refresh_cooldown(),
            refresh_failure_backoff: config.refresh_failure_backoff(),
        })
    }

    /// Returns the signing key for `kid`.
    ///
    /// Serves from the cached set while it is younger than the TTL, refreshing
    /// otherwise.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnknownKey`] if no usable set contains `kid`
    /// - [`AuthError::KeyProviderUnavailable`] if the refresh failed and no set
    ///   within `max_stale` exists
    #[tracing::instrument(skip(self))]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<SigningKey>> {
        let generation = self.generation.load(Ordering::Acquire);
        let cached = self.current.load_full();

        if let Some(set) = cached.as_ref()
            && set.age() < self.ttl
        {
            if let Some(key) = set.get(kid) {
                tracing::trace!("key set hit");
                return Ok(key);
            }
            return self.refresh_for_unknown_kid(kid, generation).await;
        }

        if let Some(stale) = cached.as_ref()
            && stale.age() <= self.max_stale
            && self.in_failure_backoff()
        {
            tracing::debug!(
                key_set_age_secs = stale.age().as_secs(),
                "recent refresh failed; serving stale key set without refetching"
            );
            return stale.get(kid).ok_or_else(|| AuthError::unknown_key(kid));
        }

        match self.refresh_shared(generation).await {
            Ok(set) => set.get(kid).ok_or_else(|| AuthError::unknown_key(kid)),
            Err(error) => {
                let Some(stale) = cached else {
                    tracing::error!(error = %error, "no key set available");
                    return Err(error.into());
                };

                let age = stale.age();
                if age > self.max_stale {
                    tracing::error!(
                        error = %error,
                        key_set_age_secs = age.as_secs(),
                        "key set refresh failed and cached set exceeds staleness bound"
                    );
                    return Err(error.into());
                }

                tracing::warn!(
                    error = %error,
                    key_set_age_secs = age.as_secs(),
                    "key set refresh failed; serving stale key set"
                );
                stale.get(kid).ok_or_else(|| AuthError::unknown_key(kid))
            },
        }
    }

    /// Forces a refresh, collapsing into one already in flight.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyProviderUnavailable`] if the fetch fails. The
    /// previous set, if any, stays in place.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<Arc<KeySet>> {
        let generation = self.generation.load(Ordering::Acquire);
        self.refresh_shared(generation).await.map_err(AuthError::from)
    }

    /// Returns the current key set, if one has been fetched.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<KeySet>> {
        self.current.load_full()
    }

    /// Returns how many fetches have been started.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    async fn refresh_for_unknown_kid(&self, kid: &str, generation: u64) -> Result<Arc<SigningKey>> {
        if !self.claim_miss_refresh() {
            tracing::debug!("unknown kid; refresh cooldown active");
            return Err(AuthError::unknown_key(kid));
        }

        tracing::debug!("unknown kid; refreshing key set");
        match self.refresh_shared(generation).await {
            Ok(set) => set.get(kid).ok_or_else(|| AuthError::unknown_key(kid)),
            Err(error) => {
                tracing::warn!(error = %error, "key set refresh for unknown kid failed");
                Err(AuthError::unknown_key(kid))
            },
        }
    }

    fn in_failure_backoff(&self) -> bool {
        self.last_failure.lock().is_some_and(|at| at.elapsed() < self.refresh_failure_backoff)
    }

    fn claim_miss_refresh(&self) -> bool {
        let mut last = self.last_miss_refresh.lock();
        if let Some(at) = *last
            && at.elapsed() < self.miss_refresh_cooldown
        {
            return false;
        }
        *last = Some(Instant::now());
        true
    }

    /// Runs one fetch, or returns the outcome of a fetch that completed after
    /// the caller observed `generation`.
    async fn refresh_shared(&self, generation: u64) -> FetchOutcome {
        let mut slot = self.refresh.lock().await;

        if self.generation.load(Ordering::Acquire) != generation
            && let Some(outcome) = slot.last.as_ref()
        {
            tracing::debug!("joined concurrent key set refresh");
            return outcome.clone();
        }

        let outcome = self.fetch_key_set().await;

        *self.last_failure.lock() = outcome.is_err().then(Instant::now);
        if let Ok(set) = &outcome {
            self.current.store(Some(Arc::clone(set)));
            tracing::info!(
                audit.action = "refresh_key_set",
                audit.resource = "signing_keys",
                audit.result = "success",
                keys = set.len(),
                "audit_event"
            );
        }

        slot.last = Some(outcome.clone());
        self.generation.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn fetch_key_set(&self) -> FetchOutcome {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);

        fail_point!("jwks-before-fetch", |_| {
            Err(JwksFetchError::http("injected failure before key set fetch"))
        });

        let document = self.fetcher.fetch().await?;
        let set = KeySet::from_document(&document)?;
        Ok(Arc::new(set))
    }
}

impl std::fmt::Debug for KeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyProvider")
            .field("ttl", &self.ttl)
            .field("max_stale", &self.max_stale)
            .field("keys", &self.current.load_full().map(|set| set.len()))
            .field("fetch_count", &self.fetch_count())
            .finish_non_exhaustive()
    }
}
