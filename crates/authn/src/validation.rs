//! Token header validation.
//!
//! This module holds the checks that run on the token header before any key
//! lookup or cryptographic work happens.
//!
//! # Security
//!
//! - Strict algorithm checks prevent algorithm substitution attacks
//! - Only the RSA-SHA256 family is accepted (`RS256`)
//! - Symmetric algorithms and `none` are always rejected
//! - Key ids are bounded and restricted to a conservative character set

use crate::error::AuthError;

/// Forbidden algorithms that are never accepted.
///
/// - `none`: no signature at all
/// - `HS256`, `HS384`, `HS512`: symmetric; an attacker could sign with the
///   public key as the shared secret
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Accepted algorithms.
///
/// The identity provider signs identity tokens with RSA-SHA256 only.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["RS256"];

/// Maximum accepted length of a `kid` header value.
pub const MAX_KID_LENGTH: usize = 256;

/// Validates the header `alg` against the allow-list.
///
/// The comparison is case-sensitive: `rs256` is not `RS256`.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if the algorithm is forbidden
/// or not in [`ACCEPTED_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use homemendi_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("RS256").is_ok());
/// assert!(validate_algorithm("HS256").is_err());
/// assert!(validate_algorithm("none").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) || !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(alg));
    }
    Ok(())
}

/// Validates the header `kid` and returns it.
///
/// A missing, empty, oversized, or oddly-charactered key id can never name a
/// published key, so it is rejected before the key provider is consulted.
///
/// # Errors
///
/// Returns [`AuthError::UnknownKey`] for any unusable key id.
pub fn validate_kid(kid: Option<&str>) -> Result<&str, AuthError> {
    let Some(kid) = kid else {
        return Err(AuthError::unknown_key(""));
    };

    if kid.is_empty() || kid.len() > MAX_KID_LENGTH {
        return Err(AuthError::unknown_key(truncate(kid)));
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '/' | '=');
    if !kid.chars().all(allowed) {
        return Err(AuthError::unknown_key(truncate(kid)));
    }

    Ok(kid)
}

fn truncate(kid: &str) -> String {
    kid.chars().take(32).collect()
}
