//! Deterministic content digests for commits.
//!
//! A commit is addressed by the hash of its parent reference and its member
//! uuids in traversal order. Only delimited string concatenation feeds the
//! hash, never a structured-serialization format, so the value reproduces
//! across implementations and platforms.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Marker hashed in place of a parent digest for a repository's first commit.
const NO_PARENT: &str = "null";

/// The delimiter is safe because only uuids and digests feed the hash, never
/// user-controlled strings.
const SEPARATOR: char = '|';

/// Compute the content digest for a commit.
///
/// Members are hashed in the given order; order is fixed upstream by the
/// resolver's deterministic traversal, so two commits with the same parent
/// and member set always collide to the same digest.
pub fn commit_digest(parent: Option<&str>, members: &[Uuid]) -> String {
    let mut input = String::from(parent.unwrap_or(NO_PARENT));
    for member in members {
        input.push(SEPARATOR);
        input.push_str(&member.to_string());
    }

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns true when `value` is syntactically a commit digest.
pub fn is_digest(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}
