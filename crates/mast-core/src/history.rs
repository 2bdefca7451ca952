//! Commit-chain reconstruction for paginated history reads.
//!
//! The storage layer returns a page of commits in whatever order the query
//! produced them; this module restores the chain order so callers always see
//! history newest-first.

use std::collections::{HashMap, HashSet};

use crate::types::Commit;

/// Restore newest-first order for an unordered batch of commits.
///
/// The batch is expected to hold at most one chain fragment. The head is the
/// row whose digest no other row references as its parent; subsequent rows
/// are found by following parent links until the chain leaves the batch or
/// every row has been consumed. The last row of a non-final page therefore
/// carries the parent digest to use as the next page's cursor.
///
/// A batch with no head row yields an empty result.
pub fn order_commits(rows: Vec<Commit>) -> Vec<Commit> {
    if rows.is_empty() {
        return rows;
    }

    let referenced: HashSet<String> = rows.iter().filter_map(|row| row.parent.clone()).collect();
    let mut by_digest: HashMap<String, Commit> = rows
        .into_iter()
        .map(|row| (row.digest.clone(), row))
        .collect();

    let Some(head) = by_digest
        .keys()
        .find(|digest| !referenced.contains(*digest))
        .cloned()
    else {
        return Vec::new();
    };

    let mut ordered = Vec::with_capacity(by_digest.len());
    let mut cursor = by_digest.remove(&head);
    while let Some(row) = cursor {
        cursor = row.parent.as_ref().and_then(|parent| by_digest.remove(parent));
        ordered.push(row);
    }
    ordered
}
