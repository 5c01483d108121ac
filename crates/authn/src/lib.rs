//! # Homemendi Authentication
//!
//! Identity verification and access authorization for Homemendi services.
//!
//! This crate provides:
//! - **Key provider**: cached, single-flight retrieval of the identity
//!   provider's published RS256 keys with bounded-stale fallback
//! - **Token verification**: signature first, then issuer, audience, token use,
//!   expiry and email verification, in that order
//! - **Identity derivation**: deterministic SHA-256 identifiers for users,
//!   projects and criteria
//! - **Access authorization**: membership lookups that fail closed
//!
//! ## Request flow
//!
//! ```text
//! Authorization: Bearer <jwt>
//!        │
//!        ▼
//!  TokenVerifier ──► KeyProvider ──► HttpJwksFetcher (JWKS endpoint)
//!        │
//!        ▼ TokenClaims
//!  PrincipalId::from_claims
//!        │
//!        ▼
//!  AccessAuthorizer ──► StorageBackend (member/{principal}/{resource})
//!        │
//!        ▼
//!  Allowed { email, principal_id } | Denied
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use homemendi_authn::{
//!     AccessAuthorizer, AuthConfig, AuthGate, GateOutcome, KeyProvider, TokenVerifier,
//! };
//! use homemendi_storage::MemoryBackend;
//!
//! # async fn example(authorization: Option<&str>, project: &str) -> homemendi_authn::Result<()> {
//! let config = AuthConfig::builder()
//!     .issuer("https://cognito-idp.us-east-1.amazonaws.com/us-east-1_example")
//!     .audience("app-client-id")
//!     .build()?;
//!
//! let keys = Arc::new(KeyProvider::from_config(&config)?);
//! let verifier = TokenVerifier::new(&config, keys)?;
//! let authorizer = AccessAuthorizer::from_config(Arc::new(MemoryBackend::new()), &config);
//! let gate = AuthGate::new(verifier, authorizer);
//!
//! match gate.check(authorization, project).await {
//!     GateOutcome::Allowed { email, .. } => println!("acting for {email}"),
//!     GateOutcome::Denied => println!("403"),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Membership-based access decisions.
pub mod authorizer;
/// Bearer credential extraction.
pub mod bearer;
/// Verifier configuration.
pub mod config;
/// Authentication error types.
pub mod error;
/// Per-request pipeline.
pub mod gate;
/// Deterministic identifiers.
pub mod identity;
/// Published signing keys.
pub mod jwks;
/// Token parsing and verification.
pub mod jwt;
/// Cached signing key retrieval.
pub mod key_provider;
/// Algorithm and key id validation.
pub mod validation;

/// Shared test fixtures.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use authorizer::{AccessAuthorizer, AccessDecision, MembershipRecord};
pub use config::AuthConfig;
pub use error::{AuthError, Result};
pub use gate::{AuthGate, Authenticated, GateOutcome, Stage};
pub use identity::{
    Identifier, InvalidIdentifier, Namespace, PrincipalId, criterion_id, derive_id, project_id,
};
pub use jwks::{HttpJwksFetcher, JwkSetDocument, JwksFetchError, JwksFetcher, KeySet, SigningKey};
pub use jwt::{TokenClaims, TokenVerifier};
pub use key_provider::KeyProvider;
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
