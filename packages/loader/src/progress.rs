//! Progress observation for batch loads.
//!
//! Decouples progress reporting from any rendering backend. The CLI
//! renders an `indicatif` bar; tests record the reports; everything else
//! uses [`NullProgress`].

use std::sync::Arc;

use bonus_map_loader_models::{BatchReport, LoadState, LoadSummary};

/// Receives loader lifecycle and per-batch events.
///
/// Implementations must be `Send + Sync` so one observer can be shared by
/// loaders running on different tasks.
pub trait LoadProgress: Send + Sync {
    /// The loader entered `state`.
    fn on_state(&self, state: LoadState);

    /// A batch was written.
    fn on_batch(&self, report: &BatchReport);

    /// The load finished, successfully or after cancellation.
    fn on_finish(&self, summary: &LoadSummary);
}

/// Ignores every event.
pub struct NullProgress;

impl LoadProgress for NullProgress {
    fn on_state(&self, _state: LoadState) {}
    fn on_batch(&self, _report: &BatchReport) {}
    fn on_finish(&self, _summary: &LoadSummary) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn LoadProgress> {
    Arc::new(NullProgress)
}
