//! SQLite storage backend for mast.
//!
//! Implements the storage traits from `mast-core` on top of rusqlite, and
//! serves the HTTP layer's read/write paths directly.
//!
//! A single connection behind `Arc<Mutex<Connection>>` is enough here: WAL
//! mode keeps reads cheap, and writes are already serialized at the process
//! level by the campaign scheduler.

pub mod connection;
pub mod error;
pub mod schema;
pub mod store;

pub use connection::SqlitePool;
pub use error::{SqliteError, SqliteResult};
pub use store::{CreateRepositoryError, MastStore};
