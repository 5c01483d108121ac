//! Per-request authentication and authorization pipeline.
//!
//! [`AuthGate`] walks one request through
//!
//! ```text
//! Received -> TokenParsed -> SignatureChecked -> ClaimsChecked
//!          -> IdentityDerived -> AccessChecked -> Allowed | Denied
//! ```
//!
//! Any failure jumps straight to `Denied`. Nothing is retried. The detailed
//! reason is logged; callers of [`AuthGate::check`] only learn Allowed or
//! Denied.

use std::{collections::HashMap, fmt};

use homemendi_storage::StorageBackend;

use crate::{
    authorizer::{AccessAuthorizer, AccessDecision},
    bearer::{bearer_from_headers, bearer_token},
    error::{AuthError, Result},
    identity::{Identifier, PrincipalId},
    jwt::{TokenClaims, TokenVerifier},
};

/// Pipeline stages of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Credential received.
    Received,
    /// Token split, decoded, header accepted and key id resolved.
    TokenParsed,
    /// Signature verified.
    SignatureChecked,
    /// All claims validated.
    ClaimsChecked,
    /// Principal identifier derived.
    IdentityDerived,
    /// Membership looked up.
    AccessChecked,
    /// Terminal: access granted.
    Allowed,
    /// Terminal: access refused.
    Denied,
}

impl Stage {
    /// Returns the stage whose transition `error` prevented.
    #[must_use]
    pub fn failed_at(error: &AuthError) -> Self {
        match error {
            AuthError::MalformedToken { .. }
            | AuthError::UnsupportedAlgorithm { .. }
            | AuthError::UnknownKey { .. } => Self::TokenParsed,
            AuthError::InvalidSignature
            | AuthError::KeyProviderUnavailable { .. }
            | AuthError::InvalidPublicKey { .. } => Self::SignatureChecked,
            AuthError::InvalidIssuer { .. }
            | AuthError::InvalidAudience { .. }
            | AuthError::WrongTokenUse { .. }
            | AuthError::TokenExpired
            | AuthError::EmailNotVerified => Self::ClaimsChecked,
            AuthError::AuthorizationCheckFailed { .. } => Self::AccessChecked,
            AuthError::Config { .. } => Self::Received,
        }
    }

    /// Returns a `snake_case` label for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::TokenParsed => "token_parsed",
            Self::SignatureChecked => "signature_checked",
            Self::ClaimsChecked => "claims_checked",
            Self::IdentityDerived => "identity_derived",
            Self::AccessChecked => "access_checked",
            Self::Allowed => "allowed",
            Self::Denied => "denied",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request whose token verified, with its derived principal.
#[derive(Debug, Clone)]
pub struct Authenticated {
    /// Verified claims.
    pub claims: TokenClaims,
    /// Principal derived from the verified email.
    pub principal_id: PrincipalId,
}

impl Authenticated {
    /// Returns the verified email.
    #[must_use]
    pub fn email(&self) -> &str {
        self.claims.email()
    }
}

/// Decision handed to the business-logic handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Proceed with the operation on behalf of this principal.
    Allowed {
        /// Verified email.
        email: String,
        /// Derived principal identifier.
        principal_id: PrincipalId,
    },
    /// Reject with a uniform authorization failure.
    Denied,
}

impl GateOutcome {
    /// Returns `true` for [`GateOutcome::Allowed`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Runs token verification, identity derivation and the access check.
pub struct AuthGate<B> {
    verifier: TokenVerifier,
    authorizer: AccessAuthorizer<B>,
}

impl<B: StorageBackend> AuthGate<B> {
    /// Creates a gate from its two collaborators.
    #[must_use]
    pub fn new(verifier: TokenVerifier, authorizer: AccessAuthorizer<B>) -> Self {
        Self { verifier, authorizer }
    }

    /// Returns the token verifier.
    #[must_use]
    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Returns the access authorizer.
    #[must_use]
    pub fn authorizer(&self) -> &AccessAuthorizer<B> {
        &self.authorizer
    }

    /// Verifies the credential in an `Authorization` header value and derives
    /// the principal.
    ///
    /// Use this for operations that create a resource (no membership exists
    /// yet); follow up with [`AccessAuthorizer::grant`].
    ///
    /// # Errors
    ///
    /// Returns the first failing verification step.
    #[tracing::instrument(skip_all)]
    pub async fn authenticate(&self, authorization: &str) -> Result<Authenticated> {
        let token = bearer_token(authorization)?;
        let claims = self.verifier.verify(token).await?;
        let principal_id = PrincipalId::from_claims(&claims);
        tracing::debug!(stage = %Stage::IdentityDerived, principal = %principal_id, "identity derived");
        Ok(Authenticated { claims, principal_id })
    }

    /// Runs the full pipeline and returns the detailed result.
    ///
    /// A [`AccessDecision::Deny`] is returned as `Ok`; only failures are
    /// `Err`. Prefer [`check`](Self::check) at the transport boundary.
    ///
    /// # Errors
    ///
    /// Returns the first failing step.
    pub async fn evaluate(
        &self,
        authorization: &str,
        resource: &str,
    ) -> Result<(Authenticated, AccessDecision)> {
        let authenticated = self.authenticate(authorization).await?;
        let decision =
            self.authorizer.authorize_raw(&authenticated.principal_id, resource).await?;
        Ok((authenticated, decision))
    }

    /// Decides whether the bearer of `authorization` may access `resource`.
    ///
    /// Never reveals why a request was denied; the reason is logged.
    #[tracing::instrument(skip_all)]
    pub async fn check(&self, authorization: Option<&str>, resource: &str) -> GateOutcome {
        let Some(authorization) = authorization else {
            log_denied(&AuthError::malformed_token("missing Authorization header"));
            return GateOutcome::Denied;
        };

        match self.evaluate(authorization, resource).await {
            Ok((authenticated, AccessDecision::Allow)) => {
                tracing::debug!(stage = %Stage::Allowed, "request allowed");
                GateOutcome::Allowed {
                    email: authenticated.claims.email().to_owned(),
                    principal_id: authenticated.principal_id,
                }
            },
            Ok((authenticated, AccessDecision::Deny)) => {
                tracing::info!(
                    stage = %Stage::Denied,
                    principal = %authenticated.principal_id,
                    reason = "no_membership",
                    "request denied"
                );
                GateOutcome::Denied
            },
            Err(error) => {
                log_denied(&error);
                GateOutcome::Denied
            },
        }
    }

    /// Like [`check`](Self::check), reading the credential from a header map.
    pub async fn check_headers(
        &self,
        headers: &HashMap<String, String>,
        resource: &Identifier,
    ) -> GateOutcome {
        match bearer_from_headers(headers) {
            Ok(token) => {
                let authorization = format!("Bearer {token}");
                self.check(Some(&authorization), resource.as_str()).await
            },
            Err(error) => {
                log_denied(&error);
                GateOutcome::Denied
            },
        }
    }
}

fn log_denied(error: &AuthError) {
    let stage = Stage::failed_at(error);
    if error.is_client_error() {
        tracing::warn!(stage = %stage, reason = error.kind(), error = %error, "request denied");
    } else {
        tracing::error!(stage = %stage, reason = error.kind(), error = %error, "request denied");
    }
}

impl<B> fmt::Debug for AuthGate<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("verifier", &self.verifier)
            .field("authorizer", &self.authorizer)
            .finish()
    }
}
