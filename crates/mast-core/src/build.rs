//! Seam between the engine and the downstream image builder.
//!
//! The engine never waits on image builds: a build is dispatched after the
//! transaction producing its commit has committed, runs with its own timeout,
//! and its outcome has no effect on reconciliation state.

use crate::types::Changeset;

/// Everything the image builder needs to produce and publish one commit.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Image reference the build publishes to.
    pub artifact_name: String,
    /// Member changesets of the commit, in commit order.
    pub changesets: Vec<Changeset>,
}

/// Dispatches image builds outside the reconciliation transaction.
///
/// `dispatch` must not block the caller; implementations hand the work to a
/// background task and surface failures through logging only.
pub trait BuildDispatcher: Send + Sync {
    fn dispatch(&self, request: BuildRequest);
}
