//! HTTP surface for mast.
//!
//! Thin, replaceable glue: routing, payload validation and error mapping.
//! All state lives behind [`AppState`]; everything interesting happens in
//! `mast-core` and `mast-sqlite`.

pub mod routes;
pub mod server;

mod error;
mod state;
mod validate;

pub use error::{Result, WebError};
pub use server::{router, start_server};
pub use state::AppState;
