//! Bearer credential extraction.
//!
//! Tokens arrive as `Authorization: Bearer <token>` in the transport layer's
//! header map. The value must start with the case-sensitive `Bearer` prefix;
//! whitespace after it and around the token is trimmed.

use std::collections::HashMap;

use crate::error::{AuthError, Result};

/// Authorization scheme prefix.
pub const BEARER_PREFIX: &str = "Bearer";

/// Name of the header carrying the credential.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Extracts the token from an `Authorization` header value.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the value does not start with
/// `Bearer` followed by whitespace, or nothing but whitespace follows it.
///
/// # Examples
///
/// ```
/// use homemendi_authn::bearer::bearer_token;
///
/// assert_eq!(bearer_token("Bearer abc.def.ghi").unwrap(), "abc.def.ghi");
/// assert_eq!(bearer_token("Bearer   abc.def.ghi  ").unwrap(), "abc.def.ghi");
/// assert!(bearer_token("bearer abc.def.ghi").is_err());
/// assert!(bearer_token(" Bearer abc.def.ghi").is_err());
/// assert!(bearer_token("Bearer ").is_err());
/// ```
pub fn bearer_token(header_value: &str) -> Result<&str> {
    let rest = header_value
        .strip_prefix(BEARER_PREFIX)
        .ok_or_else(|| AuthError::malformed_token("missing Bearer prefix"))?;

    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return Err(AuthError::malformed_token("missing Bearer prefix"));
    }

    let token = rest.trim();
    if token.is_empty() {
        return Err(AuthError::malformed_token("empty bearer token"));
    }
    Ok(token)
}

/// Finds the `Authorization` header, matching the name case-insensitively.
#[must_use]
pub fn authorization_header(headers: &HashMap<String, String>) -> Option<&str> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(AUTHORIZATION_HEADER))
        .map(|(_, value)| value.as_str())
}

/// Extracts the bearer token from a header map.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the header is absent or its value
/// is not a bearer credential.
pub fn bearer_from_headers(headers: &HashMap<String, String>) -> Result<&str> {
    let value = authorization_header(headers)
        .ok_or_else(|| AuthError::malformed_token("missing Authorization header"))?;
    bearer_token(value)
}
