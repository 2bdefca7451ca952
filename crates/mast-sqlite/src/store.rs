//! The mast storage API over SQLite.
//!
//! [`MastStore`] serves two callers. The HTTP layer uses the async methods,
//! which hop onto a blocking thread for each query. The campaign scheduler
//! drives the whole reconciliation pass through the [`Store`] trait, which
//! wraps everything in a single rusqlite transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

use mast_core::digest::commit_digest;
use mast_core::resolve::{self, CommitCandidate, ResolveError};
use mast_core::store::{Store, StoreError, StoreTx};
use mast_core::types::{ChangeStatus, Changeset, Commit, PendingChange, Repository};

use crate::connection::SqlitePool;
use crate::error::{SqliteError, SqliteResult};

/// Why a repository could not be created.
#[derive(Debug, thiserror::Error)]
pub enum CreateRepositoryError {
    #[error("repository already exists")]
    RepositoryExists,

    #[error("that artifact name is already used")]
    ArtifactNameTaken,

    #[error("changeset does not exist")]
    UnknownChangeset,

    #[error(transparent)]
    Resolve(ResolveError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<SqliteError> for CreateRepositoryError {
    fn from(err: SqliteError) -> Self {
        CreateRepositoryError::Storage(err.to_string())
    }
}

impl From<rusqlite::Error> for CreateRepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        CreateRepositoryError::Storage(err.to_string())
    }
}

impl From<mast_core::Error> for CreateRepositoryError {
    fn from(err: mast_core::Error) -> Self {
        match err {
            mast_core::Error::Resolve(e) => CreateRepositoryError::Resolve(e),
            other => CreateRepositoryError::Storage(other.to_string()),
        }
    }
}

/// SQLite-backed store for changesets, repositories, commits and pending
/// changes.
#[derive(Clone)]
pub struct MastStore {
    pool: SqlitePool,
}

impl MastStore {
    /// Open (or create) the database at `path` and apply migrations.
    pub fn open(path: &Path) -> SqliteResult<Self> {
        Ok(Self {
            pool: SqlitePool::open(path)?,
        })
    }

    /// In-memory store, used by tests.
    pub fn memory() -> SqliteResult<Self> {
        Ok(Self {
            pool: SqlitePool::memory()?,
        })
    }

    /// Run a read-only query on a blocking thread.
    async fn read<T, F>(&self, f: F) -> SqliteResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> SqliteResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || pool.with_connection(f))
            .await
            .map_err(|e| SqliteError::Connection(e.to_string()))?
    }

    /// Create a changeset and open a pending change for every repository
    /// whose current tree contains its name. Returns the new uuid and the
    /// affected repository names.
    pub async fn create_changeset(
        &self,
        name: &str,
        image: &str,
        stakeholders: &[String],
    ) -> SqliteResult<(Uuid, Vec<String>)> {
        let pool = self.pool.clone();
        let name = name.to_string();
        let image = image.to_string();
        let stakeholders = stakeholders.to_vec();

        tokio::task::spawn_blocking(move || {
            pool.with_connection_mut(|conn| {
                let tx = conn.transaction()?;
                let uuid = Uuid::new_v4();
                let created = Utc::now().to_rfc3339();

                tx.execute(
                    "INSERT INTO changesets (uuid, name, image, created) VALUES (?1, ?2, ?3, ?4)",
                    params![uuid.to_string(), name, image, created],
                )?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO changeset_stakeholders (changeset_uuid, position, name)
                         VALUES (?1, ?2, ?3)",
                    )?;
                    for (position, stakeholder) in stakeholders.iter().enumerate() {
                        stmt.execute(params![uuid.to_string(), position as i64, stakeholder])?;
                    }
                }

                let repositories = repositories_containing(&tx, &name)?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO pending_changes
                             (repository, changeset, status, resolved_commit, created)
                         VALUES (?1, ?2, 'open', NULL, ?3)",
                    )?;
                    for repository in &repositories {
                        stmt.execute(params![repository, uuid.to_string(), created])?;
                    }
                }

                tx.commit()?;
                debug!(%uuid, affected = repositories.len(), "created changeset");
                Ok((uuid, repositories))
            })
        })
        .await
        .map_err(|e| SqliteError::Connection(e.to_string()))?
    }

    /// Create a repository for a changeset name, snapshotting its dependency
    /// tree into an initial commit. Returns the repository and the commit's
    /// member changesets (the image builder's input).
    pub async fn create_repository(
        &self,
        changeset_name: &str,
        artifact_name: &str,
    ) -> Result<(Repository, Vec<Changeset>), CreateRepositoryError> {
        let pool = self.pool.clone();
        let changeset_name = changeset_name.to_string();
        let artifact_name = artifact_name.to_string();

        tokio::task::spawn_blocking(move || {
            pool.with_connection_mut(|conn| {
                let tx = conn.transaction()?;

                let name_taken: Option<String> = tx
                    .query_row(
                        "SELECT name FROM repositories WHERE name = ?1",
                        [&changeset_name],
                        |row| row.get(0),
                    )
                    .optional()?;
                if name_taken.is_some() {
                    return Err(CreateRepositoryError::RepositoryExists);
                }

                let artifact_taken: Option<String> = tx
                    .query_row(
                        "SELECT name FROM repositories WHERE artifact_name = ?1",
                        [&artifact_name],
                        |row| row.get(0),
                    )
                    .optional()?;
                if artifact_taken.is_some() {
                    return Err(CreateRepositoryError::ArtifactNameTaken);
                }

                if latest_changeset(&tx, &changeset_name)?.is_none() {
                    return Err(CreateRepositoryError::UnknownChangeset);
                }

                // Snapshot the tree at the latest version of every reachable
                // name; the traversal order is the commit's member order.
                let members = resolve::snapshot_members(&changeset_name, &mut |name: &str| {
                    latest_changeset(&tx, name).map_err(StoreError::from)
                })?;

                let uuids: Vec<Uuid> = members.iter().map(|c| c.uuid).collect();
                let digest = commit_digest(None, &uuids);
                let created = Utc::now().to_rfc3339();
                insert_commit(&tx, &digest, None, &uuids, &created)?;

                tx.execute(
                    "INSERT INTO repositories (name, artifact_name, head) VALUES (?1, ?2, ?3)",
                    params![changeset_name, artifact_name, digest],
                )?;

                tx.commit()?;
                debug!(repository = %changeset_name, head = %digest, "created repository");

                let repository = Repository {
                    name: changeset_name.clone(),
                    artifact_name: artifact_name.clone(),
                    head: Some(digest),
                };
                Ok((repository, members))
            })
        })
        .await
        .map_err(|e| CreateRepositoryError::Storage(e.to_string()))?
    }

    /// All changeset names, one entry per name.
    pub async fn changeset_names(&self) -> SqliteResult<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT name FROM changesets ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            Ok(rows.collect::<Result<_, _>>()?)
        })
        .await
    }

    /// Every version recorded under a name, newest first.
    pub async fn changesets_by_name(&self, name: &str) -> SqliteResult<Vec<Changeset>> {
        let name = name.to_string();
        self.read(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT uuid, name, image, created FROM changesets
                 WHERE name = ?1 ORDER BY created DESC, rowid DESC",
            )?;
            let raw: Vec<RawChangeset> = stmt
                .query_map([&name], raw_changeset)?
                .collect::<Result<_, _>>()?;
            raw.into_iter().map(|r| finish_changeset(conn, r)).collect()
        })
        .await
    }

    pub async fn changeset(&self, uuid: Uuid) -> SqliteResult<Option<Changeset>> {
        self.read(move |conn| changeset_by_uuid(conn, uuid)).await
    }

    pub async fn repository_names(&self) -> SqliteResult<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM repositories ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            Ok(rows.collect::<Result<_, _>>()?)
        })
        .await
    }

    pub async fn repository(&self, name: &str) -> SqliteResult<Option<Repository>> {
        let name = name.to_string();
        self.read(move |conn| repository_by_name(conn, &name)).await
    }

    pub async fn commit(&self, digest: &str) -> SqliteResult<Option<Commit>> {
        let digest = digest.to_string();
        self.read(move |conn| {
            let raw: Option<RawCommit> = conn
                .query_row(
                    "SELECT digest, parent, created FROM commits WHERE digest = ?1",
                    [&digest],
                    raw_commit,
                )
                .optional()?;
            raw.map(|r| finish_commit(conn, r)).transpose()
        })
        .await
    }

    /// The repository's head commit plus up to `limit - 1` ancestors, in no
    /// particular order; callers restore chain order themselves.
    pub async fn commits_from_head(
        &self,
        repository: &str,
        limit: usize,
    ) -> SqliteResult<Vec<Commit>> {
        let repository = repository.to_string();
        self.read(move |conn| {
            collect_chain(
                conn,
                "WITH RECURSIVE chain(digest) AS (
                     SELECT head FROM repositories WHERE name = ?1
                     UNION ALL
                     SELECT c.parent FROM commits c JOIN chain ON c.digest = chain.digest
                     LIMIT ?2
                 )
                 SELECT c.digest, c.parent, c.created
                 FROM commits c JOIN chain ON chain.digest = c.digest",
                params![repository, limit as i64],
            )
        })
        .await
    }

    /// A commit plus up to `limit - 1` ancestors, for cursor-based paging.
    pub async fn commits_from(&self, digest: &str, limit: usize) -> SqliteResult<Vec<Commit>> {
        let digest = digest.to_string();
        self.read(move |conn| {
            collect_chain(
                conn,
                "WITH RECURSIVE chain(digest) AS (
                     SELECT ?1
                     UNION ALL
                     SELECT c.parent FROM commits c JOIN chain ON c.digest = chain.digest
                     LIMIT ?2
                 )
                 SELECT c.digest, c.parent, c.created
                 FROM commits c JOIN chain ON chain.digest = c.digest",
                params![digest, limit as i64],
            )
        })
        .await
    }

    /// Pending changes opened for a changeset, for campaign status reads.
    pub async fn changes_for(&self, changeset: Uuid) -> SqliteResult<Vec<PendingChange>> {
        self.read(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT repository, changeset, status, resolved_commit, created
                 FROM pending_changes WHERE changeset = ?1 ORDER BY repository",
            )?;
            let rows = stmt.query_map([changeset.to_string()], raw_pending)?;
            rows.collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(finish_pending)
                .collect()
        })
        .await
    }
}

impl Store for MastStore {
    fn with_tx<T, F>(&self, f: F) -> mast_core::Result<T>
    where
        T: Send,
        F: FnOnce(&mut dyn StoreTx) -> mast_core::Result<T> + Send,
    {
        self.pool.with_connection_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            let result = f(&mut MastTx { tx: &tx });
            match result {
                Ok(value) => {
                    tx.commit()
                        .map_err(|e| StoreError::Backend(e.to_string()))?;
                    Ok(value)
                }
                Err(err) => {
                    // Best-effort rollback; the pass error is what the caller
                    // needs to see.
                    if let Err(rollback_err) = tx.rollback() {
                        warn!(error = %rollback_err, "failed to roll back pass transaction");
                    }
                    Err(err)
                }
            }
        })
    }
}

/// [`StoreTx`] over an open rusqlite transaction.
struct MastTx<'a> {
    tx: &'a Transaction<'a>,
}

impl StoreTx for MastTx<'_> {
    fn open_changes(&mut self) -> Result<Vec<PendingChange>, StoreError> {
        let run = || -> SqliteResult<Vec<PendingChange>> {
            let mut stmt = self.tx.prepare(
                "SELECT repository, changeset, status, resolved_commit, created
                 FROM pending_changes
                 WHERE rowid IN (
                     SELECT MIN(rowid) FROM pending_changes
                     WHERE status = 'open' GROUP BY repository
                 )
                 ORDER BY rowid",
            )?;
            let rows = stmt.query_map([], raw_pending)?;
            rows.collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(finish_pending)
                .collect()
        };
        run().map_err(Into::into)
    }

    fn tree_changesets(&mut self, repository: &str) -> Result<Vec<Changeset>, StoreError> {
        tree_changesets(self.tx, repository).map_err(Into::into)
    }

    fn changeset(&mut self, uuid: Uuid) -> Result<Option<Changeset>, StoreError> {
        changeset_by_uuid(self.tx, uuid).map_err(Into::into)
    }

    fn latest_changeset(&mut self, name: &str) -> Result<Option<Changeset>, StoreError> {
        latest_changeset(self.tx, name).map_err(Into::into)
    }

    fn repository(&mut self, name: &str) -> Result<Option<Repository>, StoreError> {
        repository_by_name(self.tx, name).map_err(Into::into)
    }

    fn insert_commit(&mut self, candidate: &CommitCandidate) -> Result<(), StoreError> {
        let created = Utc::now().to_rfc3339();
        insert_commit(
            self.tx,
            &candidate.digest,
            candidate.parent.as_deref(),
            &candidate.member_uuids(),
            &created,
        )
        .map_err(Into::into)
    }

    fn set_head(&mut self, repository: &str, digest: &str) -> Result<(), StoreError> {
        let run = || -> SqliteResult<()> {
            let updated = self.tx.execute(
                "UPDATE repositories SET head = ?2 WHERE name = ?1",
                params![repository, digest],
            )?;
            if updated == 0 {
                return Err(SqliteError::NotFound(format!(
                    "repository {repository} does not exist"
                )));
            }
            Ok(())
        };
        run().map_err(Into::into)
    }

    fn resolve_change(
        &mut self,
        repository: &str,
        changeset: Uuid,
        digest: &str,
    ) -> Result<(), StoreError> {
        let run = || -> SqliteResult<()> {
            let updated = self.tx.execute(
                "UPDATE pending_changes SET status = 'merged', resolved_commit = ?3
                 WHERE repository = ?1 AND changeset = ?2",
                params![repository, changeset.to_string(), digest],
            )?;
            if updated == 0 {
                return Err(SqliteError::NotFound(format!(
                    "pending change {repository}/{changeset} does not exist"
                )));
            }
            Ok(())
        };
        run().map_err(Into::into)
    }
}

// --- row mapping -----------------------------------------------------------

type RawChangeset = (String, String, String, String);
type RawCommit = (String, Option<String>, String);
type RawPending = (String, String, String, Option<String>, String);

fn raw_changeset(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawChangeset> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn raw_commit(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCommit> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn raw_pending(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPending> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn parse_uuid(text: &str) -> SqliteResult<Uuid> {
    Uuid::parse_str(text).map_err(|e| SqliteError::InvalidRow(format!("bad uuid {text}: {e}")))
}

fn parse_created(text: &str) -> SqliteResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SqliteError::InvalidRow(format!("bad timestamp {text}: {e}")))
}

fn finish_changeset(conn: &Connection, raw: RawChangeset) -> SqliteResult<Changeset> {
    let (uuid, name, image, created) = raw;
    Ok(Changeset {
        stakeholders: load_stakeholders(conn, &uuid)?,
        uuid: parse_uuid(&uuid)?,
        name,
        image,
        created: parse_created(&created)?,
    })
}

fn finish_commit(conn: &Connection, raw: RawCommit) -> SqliteResult<Commit> {
    let (digest, parent, created) = raw;
    Ok(Commit {
        changesets: commit_members(conn, &digest)?,
        digest,
        parent,
        created: parse_created(&created)?,
    })
}

fn finish_pending(raw: RawPending) -> SqliteResult<PendingChange> {
    let (repository, changeset, status, resolved_commit, created) = raw;
    Ok(PendingChange {
        repository,
        changeset: parse_uuid(&changeset)?,
        status: ChangeStatus::parse(&status)
            .ok_or_else(|| SqliteError::InvalidRow(format!("bad status {status}")))?,
        resolved_commit,
        created: parse_created(&created)?,
    })
}

fn load_stakeholders(conn: &Connection, uuid: &str) -> SqliteResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM changeset_stakeholders WHERE changeset_uuid = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map([uuid], |row| row.get(0))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn commit_members(conn: &Connection, digest: &str) -> SqliteResult<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT changeset_uuid FROM commit_changesets WHERE commit_digest = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map([digest], |row| row.get::<_, String>(0))?;
    rows.collect::<Result<Vec<_>, _>>()?
        .iter()
        .map(|text| parse_uuid(text))
        .collect()
}

fn changeset_by_uuid(conn: &Connection, uuid: Uuid) -> SqliteResult<Option<Changeset>> {
    let raw: Option<RawChangeset> = conn
        .query_row(
            "SELECT uuid, name, image, created FROM changesets WHERE uuid = ?1",
            [uuid.to_string()],
            raw_changeset,
        )
        .optional()?;
    raw.map(|r| finish_changeset(conn, r)).transpose()
}

fn latest_changeset(conn: &Connection, name: &str) -> SqliteResult<Option<Changeset>> {
    let raw: Option<RawChangeset> = conn
        .query_row(
            "SELECT uuid, name, image, created FROM changesets
             WHERE name = ?1 ORDER BY created DESC, rowid DESC LIMIT 1",
            [name],
            raw_changeset,
        )
        .optional()?;
    raw.map(|r| finish_changeset(conn, r)).transpose()
}

fn repository_by_name(conn: &Connection, name: &str) -> SqliteResult<Option<Repository>> {
    Ok(conn
        .query_row(
            "SELECT name, artifact_name, head FROM repositories WHERE name = ?1",
            [name],
            |row| {
                Ok(Repository {
                    name: row.get(0)?,
                    artifact_name: row.get(1)?,
                    head: row.get(2)?,
                })
            },
        )
        .optional()?)
}

/// Changesets reachable from the repository's current head commit, in commit
/// order.
fn tree_changesets(conn: &Connection, repository: &str) -> SqliteResult<Vec<Changeset>> {
    let mut stmt = conn.prepare(
        "SELECT c.uuid, c.name, c.image, c.created
         FROM repositories r
         JOIN commit_changesets cc ON cc.commit_digest = r.head
         JOIN changesets c ON c.uuid = cc.changeset_uuid
         WHERE r.name = ?1
         ORDER BY cc.position",
    )?;
    let raw: Vec<RawChangeset> = stmt
        .query_map([repository], raw_changeset)?
        .collect::<Result<_, _>>()?;
    raw.into_iter().map(|r| finish_changeset(conn, r)).collect()
}

/// Repositories whose current tree contains a changeset named `name`.
fn repositories_containing(conn: &Connection, name: &str) -> SqliteResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT r.name
         FROM repositories r
         JOIN commit_changesets cc ON cc.commit_digest = r.head
         JOIN changesets c ON c.uuid = cc.changeset_uuid
         WHERE c.name = ?1
         ORDER BY r.name",
    )?;
    let rows = stmt.query_map([name], |row| row.get(0))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Insert a commit and its member rows; a digest collision is a no-op, the
/// existing rows are identical by construction.
fn insert_commit(
    conn: &Connection,
    digest: &str,
    parent: Option<&str>,
    members: &[Uuid],
    created: &str,
) -> SqliteResult<()> {
    let inserted = conn.execute(
        "INSERT INTO commits (digest, parent, created) VALUES (?1, ?2, ?3)
         ON CONFLICT(digest) DO NOTHING",
        params![digest, parent, created],
    )?;
    if inserted == 0 {
        return Ok(());
    }
    let mut stmt = conn.prepare(
        "INSERT INTO commit_changesets (commit_digest, position, changeset_uuid)
         VALUES (?1, ?2, ?3)",
    )?;
    for (position, uuid) in members.iter().enumerate() {
        stmt.execute(params![digest, position as i64, uuid.to_string()])?;
    }
    Ok(())
}

fn collect_chain(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> SqliteResult<Vec<Commit>> {
    let mut stmt = conn.prepare(sql)?;
    let raw: Vec<RawCommit> = stmt.query_map(params, raw_commit)?.collect::<Result<_, _>>()?;
    raw.into_iter().map(|r| finish_commit(conn, r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mast_core::history::order_commits;

    async fn changeset_with(
        store: &MastStore,
        name: &str,
        stakeholders: &[&str],
    ) -> Uuid {
        let stakeholders: Vec<String> = stakeholders.iter().map(|s| s.to_string()).collect();
        let (uuid, _) = store
            .create_changeset(name, &format!("registry.example.com/{name}"), &stakeholders)
            .await
            .unwrap();
        uuid
    }

    #[tokio::test]
    async fn changeset_round_trip_preserves_stakeholder_order() {
        let store = MastStore::memory().unwrap();
        let uuid = changeset_with(&store, "app", &["zeta", "alpha", "mid"]).await;

        let got = store.changeset(uuid).await.unwrap().unwrap();
        assert_eq!(got.name, "app");
        assert_eq!(got.image, "registry.example.com/app");
        assert_eq!(got.stakeholders, ["zeta", "alpha", "mid"]);

        assert!(store
            .changeset(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn changesets_by_name_returns_newest_first() {
        let store = MastStore::memory().unwrap();
        let first = changeset_with(&store, "app", &[]).await;
        let second = changeset_with(&store, "app", &["dep"]).await;

        let versions = store.changesets_by_name("app").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].uuid, second);
        assert_eq!(versions[1].uuid, first);

        assert_eq!(store.changeset_names().await.unwrap(), ["app"]);
    }

    #[tokio::test]
    async fn repository_creation_snapshots_the_tree_preorder() {
        let store = MastStore::memory().unwrap();
        let apple = changeset_with(&store, "apple", &[]).await;
        let banana = changeset_with(&store, "banana", &[]).await;
        let bag = changeset_with(&store, "bag", &["apple", "banana"]).await;
        let coconut = changeset_with(&store, "coconut", &[]).await;
        let durian = changeset_with(&store, "durian", &[]).await;
        let basket = changeset_with(&store, "basket", &["durian"]).await;
        let root = changeset_with(&store, "root", &["bag", "coconut", "basket"]).await;

        let (repository, members) = store
            .create_repository("root", "registry.example.com/root-release")
            .await
            .unwrap();
        assert_eq!(repository.name, "root");
        let head = repository.head.clone().unwrap();

        let expected = vec![root, bag, apple, banana, coconut, basket, durian];
        let got: Vec<Uuid> = members.iter().map(|c| c.uuid).collect();
        assert_eq!(got, expected);

        let commit = store.commit(&head).await.unwrap().unwrap();
        assert_eq!(commit.changesets, expected);
        assert_eq!(commit.parent, None);
        assert_eq!(commit.digest, commit_digest(None, &expected));
    }

    #[tokio::test]
    async fn repository_creation_rejects_duplicates() {
        let store = MastStore::memory().unwrap();
        changeset_with(&store, "app", &[]).await;
        store
            .create_repository("app", "registry.example.com/app-release")
            .await
            .unwrap();

        let err = store
            .create_repository("app", "registry.example.com/other")
            .await
            .unwrap_err();
        assert!(matches!(err, CreateRepositoryError::RepositoryExists));

        changeset_with(&store, "other", &[]).await;
        let err = store
            .create_repository("other", "registry.example.com/app-release")
            .await
            .unwrap_err();
        assert!(matches!(err, CreateRepositoryError::ArtifactNameTaken));

        let err = store
            .create_repository("ghost", "registry.example.com/ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, CreateRepositoryError::UnknownChangeset));
    }

    #[tokio::test]
    async fn updating_a_changeset_opens_pending_changes() {
        let store = MastStore::memory().unwrap();
        changeset_with(&store, "dep", &[]).await;
        changeset_with(&store, "app", &["dep"]).await;
        store
            .create_repository("app", "registry.example.com/app-release")
            .await
            .unwrap();

        // A new version of dep affects the repository whose tree contains it.
        let (dep_v2, affected) = store
            .create_changeset("dep", "registry.example.com/dep", &[])
            .await
            .unwrap();
        assert_eq!(affected, ["app"]);

        let changes = store.changes_for(dep_v2).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].repository, "app");
        assert_eq!(changes[0].status, ChangeStatus::Open);
        assert_eq!(changes[0].resolved_commit, None);

        // A changeset no repository contains opens nothing.
        let (_, affected) = store
            .create_changeset("stray", "registry.example.com/stray", &[])
            .await
            .unwrap();
        assert!(affected.is_empty());
    }

    #[tokio::test]
    async fn open_changes_returns_oldest_per_repository() {
        let store = MastStore::memory().unwrap();
        changeset_with(&store, "app", &[]).await;
        store
            .create_repository("app", "registry.example.com/app-release")
            .await
            .unwrap();
        let (first, _) = store
            .create_changeset("app", "registry.example.com/app", &[])
            .await
            .unwrap();
        let (_, _) = store
            .create_changeset("app", "registry.example.com/app", &[])
            .await
            .unwrap();

        let open = store
            .with_tx(|tx| Ok(tx.open_changes()?))
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].changeset, first);
    }

    #[tokio::test]
    async fn commit_insertion_is_idempotent_on_digest() {
        let store = MastStore::memory().unwrap();
        let uuid = changeset_with(&store, "app", &[]).await;

        let candidate = CommitCandidate {
            repository: "app".to_string(),
            changeset: uuid,
            parent: None,
            digest: commit_digest(None, &[uuid]),
            members: vec![store.changeset(uuid).await.unwrap().unwrap()],
        };

        for _ in 0..2 {
            store
                .with_tx(|tx| Ok(tx.insert_commit(&candidate)?))
                .unwrap();
        }

        let commit = store.commit(&candidate.digest).await.unwrap().unwrap();
        assert_eq!(commit.changesets, vec![uuid]);
    }

    #[tokio::test]
    async fn failed_transaction_rolls_back() {
        let store = MastStore::memory().unwrap();
        changeset_with(&store, "app", &[]).await;
        store
            .create_repository("app", "registry.example.com/app-release")
            .await
            .unwrap();
        let before = store.repository("app").await.unwrap().unwrap().head;

        let result: mast_core::Result<()> = store.with_tx(|tx| {
            tx.set_head("app", "0000000000000000000000000000000000000000000000000000000000000000")?;
            Err(StoreError::Backend("forced".into()).into())
        });
        assert!(result.is_err());

        let after = store.repository("app").await.unwrap().unwrap().head;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn commit_pages_follow_parent_cursors() {
        let store = MastStore::memory().unwrap();
        let uuid = changeset_with(&store, "app", &[]).await;
        let (repository, _) = store
            .create_repository("app", "registry.example.com/app-release")
            .await
            .unwrap();

        // Extend the chain by five commits.
        let mut parent = repository.head.clone().unwrap();
        for _ in 0..5 {
            let digest = commit_digest(Some(&parent), &[uuid]);
            let candidate = CommitCandidate {
                repository: "app".to_string(),
                changeset: uuid,
                parent: Some(parent.clone()),
                digest: digest.clone(),
                members: vec![store.changeset(uuid).await.unwrap().unwrap()],
            };
            store
                .with_tx(|tx| {
                    tx.insert_commit(&candidate)?;
                    tx.set_head("app", &candidate.digest)?;
                    Ok(())
                })
                .unwrap();
            parent = digest;
        }

        let page = order_commits(store.commits_from_head("app", 3).await.unwrap());
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].digest, parent);

        let cursor = page.last().unwrap().parent.clone().unwrap();
        let rest = order_commits(store.commits_from(&cursor, 3).await.unwrap());
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].digest, cursor);
        assert_eq!(rest.last().unwrap().parent, None);
    }
}
