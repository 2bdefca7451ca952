//! Campaign status: which pending changes a changeset opened, and where they
//! landed.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::error::WebError;
use crate::state::AppState;
use crate::validate;

pub fn campaign_routes() -> Router<AppState> {
    Router::new().route("/campaigns/{uuid}", get(get_campaign))
}

async fn get_campaign(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<Value>, WebError> {
    let uuid = validate::parse_uuid(&uuid)?;
    let changes = state.store.changes_for(uuid).await?;
    Ok(Json(json!({ "pull-requests": changes })))
}
