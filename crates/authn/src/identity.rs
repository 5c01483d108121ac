//! Content-addressed identifiers.
//!
//! Identifiers are SHA-256 digests (64 lowercase hex characters) over a
//! namespace tag, the canonical email and, for child resources, a business
//! key:
//!
//! ```text
//! principal:  sha256("USERID::" + email)
//! project:    sha256("PROJECTID::" + email + "::" + title)
//! criterion:  sha256("CRITERIAID::" + email + "::" + category)
//! ```
//!
//! The email is trimmed and ASCII-lowercased; business keys are hashed
//! verbatim. Derivation is pure, so the same logical entity always maps to the
//! same storage key and re-submitting it upserts instead of duplicating.
//!
//! Collisions are not checked at write time; the 256-bit digest space makes
//! them negligible for this identifier space.

use std::fmt;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::jwt::TokenClaims;

/// Length of an identifier in hex characters.
pub const IDENTIFIER_LEN: usize = 64;

const SEPARATOR: &str = "::";

/// Identifier namespace; its tag is part of the hashed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// A user, keyed by email alone.
    Principal,
    /// A project, keyed by email and title.
    Project,
    /// A decision criterion, keyed by email and category.
    Criterion,
}

impl Namespace {
    /// Returns the tag hashed in front of the discriminant.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Principal => "USERID",
            Self::Project => "PROJECTID",
            Self::Criterion => "CRITERIAID",
        }
    }
}

/// A client-supplied string that is not a well-formed identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid identifier: expected {IDENTIFIER_LEN} lowercase hex characters")]
pub struct InvalidIdentifier;

/// An opaque, deterministic resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Parses a client-supplied identifier (for example a query parameter).
    ///
    /// Surrounding whitespace is ignored; anything else must be exactly
    /// [`IDENTIFIER_LEN`] lowercase hex characters.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIdentifier`] for any other input.
    pub fn parse(value: &str) -> Result<Self, InvalidIdentifier> {
        let value = value.trim();
        let well_formed = value.len() == IDENTIFIER_LEN
            && value.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(InvalidIdentifier);
        }
        Ok(Self(value.to_owned()))
    }

    /// Returns the hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digest(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                hasher.update(SEPARATOR.as_bytes());
            }
            hasher.update(part.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonical form of an email for hashing: trimmed, ASCII-lowercased.
#[must_use]
pub fn canonical_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Derives an identifier in `namespace`.
///
/// For [`Namespace::Principal`] the discriminant is the email alone and
/// `business_key` is ignored; every other namespace hashes
/// `email::business_key`.
///
/// # Examples
///
/// ```
/// use homemendi_authn::identity::{Namespace, derive_id};
///
/// let a = derive_id(Namespace::Project, "alice@example.com", "Kitchen Remodel");
/// let b = derive_id(Namespace::Project, "alice@example.com", "Kitchen Remodel");
/// assert_eq!(a, b);
/// assert_eq!(a.as_str().len(), 64);
/// ```
#[must_use]
pub fn derive_id(namespace: Namespace, email: &str, business_key: &str) -> Identifier {
    let email = canonical_email(email);
    match namespace {
        Namespace::Principal => Identifier::digest(&[namespace.tag(), &email]),
        Namespace::Project | Namespace::Criterion => {
            Identifier::digest(&[namespace.tag(), &email, business_key])
        },
    }
}

/// The identifier of an authenticated user.
///
/// Constructible only from verified [`TokenClaims`], so a client-supplied or
/// cached value can never stand in for one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrincipalId(Identifier);

impl PrincipalId {
    /// Derives the principal identifier from the verified email.
    #[must_use]
    pub fn from_claims(claims: &TokenClaims) -> Self {
        Self::from_verified_email(claims.email())
    }

    /// Callers must have verified `email` in the current request.
    pub(crate) fn from_verified_email(email: &str) -> Self {
        Self(derive_id(Namespace::Principal, email, ""))
    }

    /// Returns the underlying identifier.
    #[must_use]
    pub fn as_identifier(&self) -> &Identifier {
        &self.0
    }

    /// Returns the hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Derives the identifier of the verified user's project titled `title`.
#[must_use]
pub fn project_id(claims: &TokenClaims, title: &str) -> Identifier {
    derive_id(Namespace::Project, claims.email(), title)
}

/// Derives the identifier of the verified user's criterion `category`.
#[must_use]
pub fn criterion_id(claims: &TokenClaims, category: &str) -> Identifier {
    derive_id(Namespace::Criterion, claims.email(), category)
}
