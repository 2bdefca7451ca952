//! Mark-and-sweep resolution of pending changes into commit candidates.
//!
//! Resolution works on a point-in-time snapshot of a repository's dependency
//! tree: the changesets reachable from the current head, the target changeset
//! being applied, and the latest changeset for every dependency the target
//! newly introduces. Laying the update over the snapshot and re-walking the
//! tree from its entrypoint is equivalent to rebuilding it from scratch:
//! nodes the walk never reaches fall out of the commit.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use uuid::Uuid;

use crate::digest::commit_digest;
use crate::store::StoreError;
use crate::types::Changeset;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The pending change references a changeset the store no longer has.
    #[error("changeset {0} does not exist")]
    MissingChangeset(Uuid),

    /// The pending change references a repository row that is gone.
    #[error("repository {0} does not exist")]
    MissingRepository(String),

    /// A stakeholder edge loops back onto the path currently being visited.
    #[error("stakeholder cycle through {0}")]
    Cycle(String),
}

/// A commit produced by resolution but not yet persisted.
#[derive(Debug, Clone)]
pub struct CommitCandidate {
    pub repository: String,
    /// The target changeset this candidate applies.
    pub changeset: Uuid,
    pub parent: Option<String>,
    pub digest: String,
    /// Member changesets in traversal order. The uuids feed the digest; the
    /// names and images feed the downstream image build.
    pub members: Vec<Changeset>,
}

impl CommitCandidate {
    pub fn member_uuids(&self) -> Vec<Uuid> {
        self.members.iter().map(|c| c.uuid).collect()
    }
}

/// Apply a pending change to a repository's dependency tree.
///
/// `current` holds the changesets reachable from the repository's existing
/// head, `target` is the changeset being applied, and `latest` maps each
/// stakeholder name of the target that is absent from the current tree to
/// the latest changeset under that name.
///
/// The traversal is a pre-order depth-first walk from the changeset named
/// after the repository, visiting stakeholders in declaration order and
/// skipping names it has already seen. Its visitation order is the member
/// order of the resulting commit. A dangling stakeholder reference ends that
/// branch silently; a stakeholder edge back onto the walk's own path is a
/// [`ResolveError::Cycle`].
pub fn resolve(
    repository: &str,
    head: Option<&str>,
    current: Vec<Changeset>,
    target: Changeset,
    latest: HashMap<String, Changeset>,
) -> Result<CommitCandidate, ResolveError> {
    let target_uuid = target.uuid;
    let stakeholder_names = target.stakeholders.clone();

    // Index the current tree by name, then lay the proposed update over it.
    let mut nodes: HashMap<String, Changeset> = current
        .into_iter()
        .map(|changeset| (changeset.name.clone(), changeset))
        .collect();
    nodes.insert(target.name.clone(), target);

    // Newly introduced dependencies join the tree at their latest version.
    for name in &stakeholder_names {
        if !nodes.contains_key(name) {
            if let Some(changeset) = latest.get(name) {
                nodes.insert(name.clone(), changeset.clone());
            }
        }
    }

    let mut visited = HashSet::new();
    let mut path = HashSet::new();
    let mut members = Vec::new();
    mark(repository, &nodes, &mut visited, &mut path, &mut members)?;

    let uuids: Vec<Uuid> = members.iter().map(|c| c.uuid).collect();
    let digest = commit_digest(head, &uuids);

    Ok(CommitCandidate {
        repository: repository.to_string(),
        changeset: target_uuid,
        parent: head.map(str::to_string),
        digest,
        members,
    })
}

fn mark(
    name: &str,
    nodes: &HashMap<String, Changeset>,
    visited: &mut HashSet<String>,
    path: &mut HashSet<String>,
    members: &mut Vec<Changeset>,
) -> Result<(), ResolveError> {
    let Some(node) = nodes.get(name) else {
        // Dangling reference: the branch just ends here.
        return Ok(());
    };
    if path.contains(name) {
        return Err(ResolveError::Cycle(name.to_string()));
    }
    if !visited.insert(name.to_string()) {
        return Ok(());
    }
    members.push(node.clone());
    path.insert(name.to_string());
    for stakeholder in &node.stakeholders {
        mark(stakeholder, nodes, visited, path, members)?;
    }
    path.remove(name);
    Ok(())
}

/// Rebuild a dependency tree from scratch, fetching the latest changeset for
/// every reachable name through `lookup`. Used to form a repository's initial
/// commit. Same traversal rules as [`resolve`].
pub fn snapshot_members<F>(entrypoint: &str, lookup: &mut F) -> crate::Result<Vec<Changeset>>
where
    F: FnMut(&str) -> Result<Option<Changeset>, StoreError>,
{
    let mut visited = HashSet::new();
    let mut path = HashSet::new();
    let mut members = Vec::new();
    walk(entrypoint, lookup, &mut visited, &mut path, &mut members)?;
    Ok(members)
}

fn walk<F>(
    name: &str,
    lookup: &mut F,
    visited: &mut HashSet<String>,
    path: &mut HashSet<String>,
    members: &mut Vec<Changeset>,
) -> crate::Result<()>
where
    F: FnMut(&str) -> Result<Option<Changeset>, StoreError>,
{
    if path.contains(name) {
        return Err(ResolveError::Cycle(name.to_string()).into());
    }
    if !visited.insert(name.to_string()) {
        return Ok(());
    }
    let Some(node) = lookup(name)? else {
        return Ok(());
    };
    members.push(node.clone());
    path.insert(name.to_string());
    for stakeholder in &node.stakeholders {
        walk(stakeholder, lookup, visited, path, members)?;
    }
    path.remove(name);
    Ok(())
}
