//! Shared handler state.

use std::sync::Arc;

use mast_core::build::BuildDispatcher;
use mast_core::campaign::Campaign;
use mast_sqlite::MastStore;

#[derive(Clone)]
pub struct AppState {
    pub store: MastStore,
    pub campaign: Arc<Campaign<MastStore>>,
    /// Absent when image builds are disabled.
    pub builder: Option<Arc<dyn BuildDispatcher>>,
}
