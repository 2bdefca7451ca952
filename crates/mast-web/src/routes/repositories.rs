//! Repository creation and commit history reads.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use mast_core::build::BuildRequest;
use mast_core::history::order_commits;

use crate::error::WebError;
use crate::state::AppState;
use crate::validate;

/// Page size for commit history reads.
const PAGE_SIZE: usize = 100;

pub fn repository_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/repositories",
            get(list_repositories).post(create_repository),
        )
        .route("/repositories/{name}", get(get_repository))
        .route("/repositories/{name}/commits", get(get_commits))
        .route("/repositories/{name}/commits/{digest}", get(get_commit))
}

#[derive(Debug, Deserialize)]
struct CreateRepositoryRequest {
    changeset: String,
    #[serde(rename = "artifactName")]
    artifact_name: String,
}

/// Create a repository: snapshot the changeset's dependency tree into an
/// initial commit and point the new head at it. The image build for that
/// commit runs outside the request lifecycle.
async fn create_repository(
    State(state): State<AppState>,
    Json(req): Json<CreateRepositoryRequest>,
) -> Result<(StatusCode, Json<Value>), WebError> {
    validate::require_name(&req.changeset)?;

    info!(changeset = %req.changeset, artifact = %req.artifact_name, "creating repository");
    let (repository, members) = state
        .store
        .create_repository(&req.changeset, &req.artifact_name)
        .await?;

    if let Some(builder) = &state.builder {
        builder.dispatch(BuildRequest {
            artifact_name: repository.artifact_name.clone(),
            changesets: members,
        });
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "name": repository.name, "head": repository.head })),
    ))
}

async fn list_repositories(State(state): State<AppState>) -> Result<Json<Value>, WebError> {
    let names = state.store.repository_names().await?;
    Ok(Json(json!({ "repositories": names })))
}

async fn get_repository(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, WebError> {
    let repository = state
        .store
        .repository(&name)
        .await?
        .ok_or_else(|| WebError::NotFound(format!("repository {name} does not exist")))?;
    Ok(Json(json!(repository)))
}

#[derive(Debug, Deserialize)]
struct CommitsQuery {
    from: Option<String>,
}

/// One page of history, newest first. The first request goes by repository
/// name; follow-ups pass the previous page's last parent digest as `from`.
async fn get_commits(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<CommitsQuery>,
) -> Result<Json<Value>, WebError> {
    let rows = match &query.from {
        Some(from) => {
            validate::require_digest(from)?;
            state.store.commits_from(from, PAGE_SIZE).await?
        }
        None => state.store.commits_from_head(&name, PAGE_SIZE).await?,
    };

    if rows.is_empty() {
        return Err(WebError::NotFound(format!("no commits found for {name}")));
    }

    Ok(Json(json!({ "commits": order_commits(rows) })))
}

/// Commits are content-addressed, so any known digest resolves regardless of
/// which repository produced it.
async fn get_commit(
    State(state): State<AppState>,
    Path((_name, digest)): Path<(String, String)>,
) -> Result<Json<Value>, WebError> {
    validate::require_digest(&digest)?;
    let commit = state
        .store
        .commit(&digest)
        .await?
        .ok_or_else(|| WebError::NotFound(format!("commit {digest} not found")))?;
    Ok(Json(json!(commit)))
}
