//! Request validation guards.
//!
//! Validation happens before any state mutation; invalid payloads never
//! reach the store or the campaign scheduler.

use uuid::Uuid;

use crate::error::WebError;

/// Artifact names: a letter followed by letters, digits, `_` or `-`.
pub fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn require_name(name: &str) -> Result<(), WebError> {
    if valid_name(name) {
        Ok(())
    } else {
        Err(WebError::BadRequest(
            "name must match [a-zA-Z][a-zA-Z0-9_-]*".to_string(),
        ))
    }
}

pub fn parse_uuid(value: &str) -> Result<Uuid, WebError> {
    Uuid::parse_str(value)
        .map_err(|_| WebError::BadRequest("expected a valid uuid".to_string()))
}

pub fn require_digest(value: &str) -> Result<(), WebError> {
    if mast_core::digest::is_digest(value) {
        Ok(())
    } else {
        Err(WebError::BadRequest(
            "expected a sha256 digest".to_string(),
        ))
    }
}
