//! Core engine for mast.
//!
//! Mast tracks a graph of versioned build artifacts ("changesets") and their
//! dependencies, and reconciles pending changes into new, content-addressed
//! build commits for every affected artifact tree ("repository").
//!
//! This crate holds everything that is independent of the storage backend and
//! the HTTP surface:
//!
//! - **Domain types** ([`types`]): changesets, repositories, commits, pending
//!   changes.
//! - **Digest generation** ([`digest`]): the deterministic content hash that
//!   addresses a commit.
//! - **Mark-and-sweep resolution** ([`resolve`]): folding a changeset update
//!   into a repository's dependency tree.
//! - **Campaign scheduling** ([`campaign`]): the process-wide, self-coalescing
//!   driver that applies all pending changes in one transaction.
//! - **History reconstruction** ([`history`]): restoring commit-chain order
//!   for paginated reads.
//!
//! Storage is injected through the traits in [`store`]; the `mast-sqlite`
//! crate provides the SQLite implementation.

pub mod build;
pub mod campaign;
pub mod digest;
pub mod error;
pub mod history;
pub mod resolve;
pub mod store;
pub mod types;

pub use error::{Error, Result};
