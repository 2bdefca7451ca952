//! Changeset intake and lookup.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::WebError;
use crate::state::AppState;
use crate::validate;

pub fn changeset_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/changesets",
            get(list_changesets).post(create_changeset),
        )
        .route("/changesets/{uuid}", get(get_changeset))
}

#[derive(Debug, Deserialize)]
struct CreateChangesetRequest {
    name: String,
    image: String,
    stakeholders: Vec<String>,
}

/// Create a changeset and open a pending change for every repository whose
/// tree contains its name, then kick the campaign scheduler.
async fn create_changeset(
    State(state): State<AppState>,
    Json(req): Json<CreateChangesetRequest>,
) -> Result<(StatusCode, Json<Value>), WebError> {
    validate::require_name(&req.name)?;

    info!(name = %req.name, image = %req.image, "creating changeset");
    let (uuid, repositories) = state
        .store
        .create_changeset(&req.name, &req.image, &req.stakeholders)
        .await?;

    info!(%uuid, pull_requests = repositories.len(), "opened pending changes");
    state.campaign.trigger();

    Ok((
        StatusCode::CREATED,
        Json(json!({ "uuid": uuid, "pull-requests": repositories })),
    ))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    name: Option<String>,
}

/// Without a `name` filter, just the known names; with one, every version
/// recorded under it.
async fn list_changesets(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, WebError> {
    match query.name {
        Some(name) => {
            let changesets = state.store.changesets_by_name(&name).await?;
            Ok(Json(json!({ "changesets": changesets })))
        }
        None => {
            let names = state.store.changeset_names().await?;
            Ok(Json(json!({ "changesets": names })))
        }
    }
}

async fn get_changeset(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<Value>, WebError> {
    let uuid = validate::parse_uuid(&uuid)?;
    let changeset = state
        .store
        .changeset(uuid)
        .await?
        .ok_or_else(|| WebError::NotFound(format!("no changeset with uuid {uuid}")))?;
    Ok(Json(json!(changeset)))
}
