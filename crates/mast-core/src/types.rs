//! Domain records shared across the workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named, versioned declaration of an artifact and its direct dependencies.
///
/// Changesets are immutable: publishing a new version of an artifact means
/// appending another changeset under the same `name`. The newest changeset
/// under a name is the version resolution picks up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    pub uuid: Uuid,
    pub name: String,
    pub image: String,
    /// Names of the changesets this one depends on, in declaration order.
    pub stakeholders: Vec<String>,
    pub created: DateTime<Utc>,
}

/// A named dependency tree with a content-addressed history.
///
/// `name` matches a changeset name and acts as the tree's entrypoint.
/// `head` is advanced only by the campaign scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(rename = "artifactName")]
    pub artifact_name: String,
    pub head: Option<String>,
}

/// An immutable, content-addressed snapshot of a repository's resolved
/// dependency member set.
///
/// Commits form a singly-linked chain per repository: `parent` references
/// the previous head at the time the commit was created, and the first
/// commit of a repository has no parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub digest: String,
    pub parent: Option<String>,
    /// Member changeset uuids in traversal order.
    pub changesets: Vec<Uuid>,
    pub created: DateTime<Utc>,
}

/// Lifecycle state of a pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Open,
    Merged,
}

impl ChangeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeStatus::Open => "open",
            ChangeStatus::Merged => "merged",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(ChangeStatus::Open),
            "merged" => Some(ChangeStatus::Merged),
            _ => None,
        }
    }
}

/// A queued request to fold a changeset update into a repository's tree.
///
/// Opened by the change-intake API, consumed by a reconciliation pass, which
/// stamps the resolved commit digest and flips the status to `merged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub repository: String,
    pub changeset: Uuid,
    pub status: ChangeStatus,
    #[serde(rename = "commit")]
    pub resolved_commit: Option<String>,
    pub created: DateTime<Utc>,
}
