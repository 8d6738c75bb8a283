//! services/api/src/web/state.rs
//!
//! Defines the application state shared by every handler.

use crate::jobs::JobDispatcher;
use crate::sync::SnapshotSynchronizer;
use proscientia_core::ports::{ArtifactRepository, SnapshotRepository};
use proscientia_core::StatusBus;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub artifacts: Arc<dyn ArtifactRepository>,
    pub snapshots: Arc<dyn SnapshotRepository>,
    pub bus: Arc<StatusBus>,
    pub dispatcher: JobDispatcher,
    pub synchronizer: Arc<SnapshotSynchronizer>,
}
