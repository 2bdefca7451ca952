use std::net::SocketAddr;

use axum::Router;
use tracing::info;

use crate::routes::{campaign_routes, changeset_routes, health_routes, repository_routes};
use crate::state::AppState;
use crate::Result;

/// Assemble the full application router. Exposed separately so tests can
/// drive it without binding a socket.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(changeset_routes())
        .merge(repository_routes())
        .merge(campaign_routes())
        .with_state(state)
        .merge(health_routes())
}

pub async fn start_server(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = router(state);

    info!("starting http server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
