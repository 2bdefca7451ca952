//! Engine-level error type.

use thiserror::Error;

use crate::resolve::ResolveError;
use crate::store::StoreError;

/// Anything that can abort a reconciliation pass.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The blocking task running the pass died before producing a result.
    #[error("pass task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, Error>;
