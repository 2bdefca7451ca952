// mastd - the mast server daemon
//
// Wires the pieces together: configuration, tracing, the SQLite store, the
// campaign scheduler, the image builder, and the HTTP server.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mast_build::HlbBuilder;
use mast_core::build::BuildDispatcher;
use mast_core::campaign::Campaign;
use mast_sqlite::MastStore;
use mast_web::AppState;

mod config;

use config::Config;

/// Exit codes for different failure scenarios
mod exit_codes {
    pub const CONFIG_ERROR: i32 = 1;
    pub const DATABASE_ERROR: i32 = 2;
    pub const SERVER_ERROR: i32 = 3;
}

#[tokio::main]
async fn main() {
    let config = match Config::load(config_path_from_args().as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("mastd: {err:#}");
            process::exit(exit_codes::CONFIG_ERROR);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log.filter.clone())),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting mastd");

    let store = match MastStore::open(&config.db.path) {
        Ok(store) => store,
        Err(err) => {
            error!(path = %config.db.path.display(), error = %err, "failed to open database");
            process::exit(exit_codes::DATABASE_ERROR);
        }
    };

    if let Err(err) = serve(config, store).await {
        error!(error = %err, "server failed");
        process::exit(exit_codes::SERVER_ERROR);
    }
}

async fn serve(config: Config, store: MastStore) -> Result<()> {
    let addr = config.listen_addr()?;

    let builder: Option<Arc<dyn BuildDispatcher>> = if config.build.enabled {
        let dispatcher: Arc<dyn BuildDispatcher> =
            HlbBuilder::new(config.build.command.clone(), config.build.timeout());
        Some(dispatcher)
    } else {
        info!("image builds disabled by configuration");
        None
    };

    let campaign = Campaign::new(Arc::new(store.clone()), builder.clone());

    // Pick up anything left open by a previous run.
    campaign.trigger();

    let state = AppState {
        store,
        campaign,
        builder,
    };

    mast_web::start_server(addr, state)
        .await
        .context("http server exited")
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
