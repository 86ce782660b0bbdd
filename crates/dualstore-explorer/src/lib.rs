//! Navigation and background loading over dualstore backends.
//!
//! - [`BackendSelector`]: storage mode to backend
//! - [`LoadOrchestrator`]: single-flight connect + list on a tokio task
//! - [`NavigationState`] / [`NavigationController`]: history and listener
//!   events
//! - `summary`: status-line helpers
//! - `testing`: in-memory backend (tests and the `testing` feature only)

pub mod config;
mod controller;
mod navigation;
mod orchestrator;
mod selector;
pub mod summary;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use controller::{ExplorerEvent, ExplorerListener, Navigate, NavigationController};
pub use navigation::{LoadIntent, NavigationState};
pub use orchestrator::{
    LoadAdmission, LoadCompletion, LoadOrchestrator, LoadOutcome, LoadRequest, LoadState,
};
pub use selector::BackendSelector;
