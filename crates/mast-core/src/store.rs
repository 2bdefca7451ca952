//! Storage seams between the engine and its database backend.
//!
//! The core crate defines the traits; the storage crate implements them.
//! [`Store::with_tx`] is the transaction boundary of a reconciliation pass:
//! everything a pass does happens inside one call, and an error anywhere
//! rolls the whole transaction back.

use uuid::Uuid;

use crate::resolve::CommitCandidate;
use crate::types::{Changeset, PendingChange, Repository};

/// Storage backend error, as surfaced to the engine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Operations available inside one reconciliation transaction.
pub trait StoreTx {
    /// The oldest open pending change per repository.
    ///
    /// One change per repository per pass: resolving several changes against
    /// the same head snapshot would have later candidates clobber earlier
    /// head advances. Newer changes stay open for the pass their own trigger
    /// queued.
    fn open_changes(&mut self) -> Result<Vec<PendingChange>, StoreError>;

    /// Changesets reachable from the repository's current head commit.
    fn tree_changesets(&mut self, repository: &str) -> Result<Vec<Changeset>, StoreError>;

    fn changeset(&mut self, uuid: Uuid) -> Result<Option<Changeset>, StoreError>;

    /// The most recently created changeset under `name`.
    fn latest_changeset(&mut self, name: &str) -> Result<Option<Changeset>, StoreError>;

    fn repository(&mut self, name: &str) -> Result<Option<Repository>, StoreError>;

    /// Insert a commit; a digest collision is a no-op.
    fn insert_commit(&mut self, candidate: &CommitCandidate) -> Result<(), StoreError>;

    /// Advance a repository's head to `digest`.
    fn set_head(&mut self, repository: &str, digest: &str) -> Result<(), StoreError>;

    /// Stamp the resolved commit on a pending change and mark it merged.
    fn resolve_change(
        &mut self,
        repository: &str,
        changeset: Uuid,
        digest: &str,
    ) -> Result<(), StoreError>;
}

/// A database that can run one reconciliation pass as a single transaction.
///
/// Implementations begin a transaction, hand the closure a [`StoreTx`], and
/// commit when it returns `Ok`. On `Err` the transaction is rolled back
/// (best-effort; a rollback failure is logged and swallowed) so nothing the
/// closure did is observable afterwards. The closure runs on whatever thread
/// the implementation performs blocking I/O on.
pub trait Store: Send + Sync + 'static {
    fn with_tx<T, F>(&self, f: F) -> crate::Result<T>
    where
        T: Send,
        F: FnOnce(&mut dyn StoreTx) -> crate::Result<T> + Send;
}
