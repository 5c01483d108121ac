//! Membership-based access decisions.
//!
//! A principal may act on a resource iff a membership record exists under
//!
//! ```text
//! member/{principal_id}/{resource_id}
//! ```
//!
//! Partitioning by principal lets [`AccessAuthorizer::list_resources`] scan
//! one principal's memberships with a single ordered range read.
//!
//! Decisions fail closed: a storage error or timeout surfaces as
//! [`AuthError::AuthorizationCheckFailed`] and a malformed resource id is a
//! [`AccessDecision::Deny`]; neither ever becomes Allow.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use homemendi_storage::{StorageBackend, StorageError, StorageResult, prefix_end};
use serde::{Deserialize, Serialize};

use crate::{
    config::AuthConfig,
    error::{AuthError, Result},
    identity::{Identifier, PrincipalId},
};

const MEMBER_PREFIX: &str = "member/";

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessDecision {
    /// A membership record exists.
    Allow,
    /// No membership record, or the request could not be evaluated.
    Deny,
}

impl AccessDecision {
    /// Returns `true` for [`AccessDecision::Allow`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Stored value of a membership. Only its existence matters for decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    /// Member.
    pub principal_id: String,
    /// Resource the member may access.
    pub resource_id: String,
    /// When the membership was written.
    pub granted_at: DateTime<Utc>,
}

fn principal_prefix(principal: &PrincipalId) -> String {
    format!("{MEMBER_PREFIX}{principal}/")
}

fn membership_key(principal: &PrincipalId, resource: &Identifier) -> Vec<u8> {
    format!("{}{resource}", principal_prefix(principal)).into_bytes()
}

/// Decides whether a principal may access a resource.
///
/// Generic over the injected storage backend; one instance is shared across
/// requests.
pub struct AccessAuthorizer<B> {
    backend: Arc<B>,
    lookup_timeout: Duration,
}

impl<B> Clone for AccessAuthorizer<B> {
    fn clone(&self) -> Self {
        Self { backend: Arc::clone(&self.backend), lookup_timeout: self.lookup_timeout }
    }
}

impl<B: StorageBackend> AccessAuthorizer<B> {
    /// Creates an authorizer bounding each lookup by `lookup_timeout`.
    #[must_use]
    pub fn new(backend: Arc<B>, lookup_timeout: Duration) -> Self {
        Self { backend, lookup_timeout }
    }

    /// Creates an authorizer using `config.lookup_timeout()`.
    #[must_use]
    pub fn from_config(backend: Arc<B>, config: &AuthConfig) -> Self {
        Self::new(backend, config.lookup_timeout())
    }

    /// Returns the storage backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Checks whether `principal` may access `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AuthorizationCheckFailed`] if the lookup fails or
    /// exceeds the lookup timeout.
    #[tracing::instrument(skip_all, fields(principal = %principal, resource = %resource))]
    pub async fn authorize(
        &self,
        principal: &PrincipalId,
        resource: &Identifier,
    ) -> Result<AccessDecision> {
        let key = membership_key(principal, resource);

        let found = match tokio::time::timeout(self.lookup_timeout, self.backend.get(&key)).await
        {
            Ok(Ok(value)) => value.is_some(),
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "membership lookup failed");
                return Err(AuthError::from(error));
            },
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "membership lookup timed out"
                );
                return Err(AuthError::from(StorageError::timeout()));
            },
        };

        let decision = if found { AccessDecision::Allow } else { AccessDecision::Deny };
        tracing::debug!(?decision, "access decision");
        Ok(decision)
    }

    /// Checks access to a client-supplied resource id.
    ///
    /// An empty or malformed id is denied without a storage lookup.
    ///
    /// # Errors
    ///
    /// See [`authorize`](Self::authorize).
    pub async fn authorize_raw(
        &self,
        principal: &PrincipalId,
        resource: &str,
    ) -> Result<AccessDecision> {
        match Identifier::parse(resource) {
            Ok(resource) => self.authorize(principal, &resource).await,
            Err(error) => {
                tracing::debug!(error = %error, "malformed resource id");
                Ok(AccessDecision::Deny)
            },
        }
    }

    /// Records that `principal` may access `resource`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the write fails.
    #[tracing::instrument(skip_all, fields(principal = %principal, resource = %resource))]
    pub async fn grant(&self, principal: &PrincipalId, resource: &Identifier) -> StorageResult<()> {
        let record = MembershipRecord {
            principal_id: principal.to_string(),
            resource_id: resource.to_string(),
            granted_at: Utc::now(),
        };
        let value = serde_json::to_vec(&record).map_err(|e| {
            StorageError::serialization_with_source("failed to encode membership record", e)
        })?;

        self.backend.set(membership_key(principal, resource), value).await?;

        tracing::info!(
            audit.action = "grant_membership",
            audit.resource = %resource,
            audit.result = "success",
            "audit_event"
        );
        Ok(())
    }

    /// Removes the membership of `principal` in `resource`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the delete fails.
    #[tracing::instrument(skip_all, fields(principal = %principal, resource = %resource))]
    pub async fn revoke(&self, principal: &PrincipalId, resource: &Identifier) -> StorageResult<()> {
        self.backend.delete(&membership_key(principal, resource)).await?;

        tracing::info!(
            audit.action = "revoke_membership",
            audit.resource = %resource,
            audit.result = "success",
            "audit_event"
        );
        Ok(())
    }

    /// Lists every resource `principal` is a member of, in key order.
    ///
    /// Keys whose suffix is not a well-formed identifier are skipped.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the range read fails.
    #[tracing::instrument(skip_all, fields(principal = %principal))]
    pub async fn list_resources(&self, principal: &PrincipalId) -> StorageResult<Vec<Identifier>> {
        let prefix = principal_prefix(principal).into_bytes();
        let entries = match prefix_end(&prefix) {
            Some(end) => self.backend.get_range(prefix.clone()..end).await?,
            None => self.backend.get_range(prefix.clone()..).await?,
        };

        let resources = entries
            .iter()
            .filter_map(|entry| {
                let suffix = entry.key.strip_prefix(prefix.as_slice())?;
                let suffix = std::str::from_utf8(suffix).ok()?;
                Identifier::parse(suffix).ok()
            })
            .collect();
        Ok(resources)
    }
}

impl<B> std::fmt::Debug for AccessAuthorizer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessAuthorizer")
            .field("lookup_timeout", &self.lookup_timeout)
            .finish_non_exhaustive()
    }
}
