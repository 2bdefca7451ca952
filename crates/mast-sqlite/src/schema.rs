//! Schema management and migrations

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{SqliteError, SqliteResult};

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 1;

/// Apply all pending migrations
pub fn apply_migrations(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version = get_current_version(conn)?;
    debug!(current_version, target_version = SCHEMA_VERSION, "checking migrations");

    if current_version < SCHEMA_VERSION {
        info!(from = current_version, to = SCHEMA_VERSION, "applying schema migrations");
        apply_migration_v1(conn)?;
    }

    Ok(())
}

fn get_current_version(conn: &Connection) -> SqliteResult<i32> {
    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .unwrap_or(None);

    Ok(version.unwrap_or(0))
}

fn record_migration(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version) VALUES (?)",
        [version],
    )?;
    Ok(())
}

fn apply_migration_v1(conn: &Connection) -> SqliteResult<()> {
    debug!("applying migration v1: initial schema");

    conn.execute_batch(SCHEMA_V1)
        .map_err(|e| SqliteError::Schema(format!("failed to apply v1 schema: {e}")))?;

    record_migration(conn, 1)?;
    info!("migration v1 applied");
    Ok(())
}

/// Initial schema SQL.
///
/// Ordered lists (a changeset's stakeholders, a commit's members) live in
/// join tables with an explicit position column.
const SCHEMA_V1: &str = r#"
-- Versioned artifact declarations. Immutable; a new version of an artifact
-- is a new row under the same name.
CREATE TABLE IF NOT EXISTS changesets (
    uuid TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    image TEXT NOT NULL,
    created TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_changesets_name_created ON changesets(name, created);

CREATE TABLE IF NOT EXISTS changeset_stakeholders (
    changeset_uuid TEXT NOT NULL REFERENCES changesets(uuid),
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (changeset_uuid, position)
);

CREATE INDEX IF NOT EXISTS idx_stakeholders_name ON changeset_stakeholders(name);

-- Dependency trees. head points at the current commit and is advanced only
-- by the campaign scheduler.
CREATE TABLE IF NOT EXISTS repositories (
    name TEXT PRIMARY KEY NOT NULL,
    artifact_name TEXT NOT NULL UNIQUE,
    head TEXT
);

-- Content-addressed commit chain. parent is NULL for a repository's first
-- commit.
CREATE TABLE IF NOT EXISTS commits (
    digest TEXT PRIMARY KEY NOT NULL,
    parent TEXT,
    created TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_commits_parent ON commits(parent);

CREATE TABLE IF NOT EXISTS commit_changesets (
    commit_digest TEXT NOT NULL REFERENCES commits(digest),
    position INTEGER NOT NULL,
    changeset_uuid TEXT NOT NULL REFERENCES changesets(uuid),
    PRIMARY KEY (commit_digest, position)
);

-- Queued requests to fold a changeset update into a repository's tree.
CREATE TABLE IF NOT EXISTS pending_changes (
    repository TEXT NOT NULL REFERENCES repositories(name),
    changeset TEXT NOT NULL REFERENCES changesets(uuid),
    status TEXT NOT NULL CHECK (status IN ('open', 'merged')),
    resolved_commit TEXT,
    created TEXT NOT NULL,
    PRIMARY KEY (repository, changeset)
);

CREATE INDEX IF NOT EXISTS idx_pending_status ON pending_changes(status);
"#;
