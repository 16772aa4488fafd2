#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for the bonus map toolchain.
//!
//! Provides an `indicatif` spinner behind the loader's [`LoadProgress`]
//! trait, plus [`init_logger`] which sets up `indicatif-log-bridge` so that
//! `log::info!` and friends are suspended while progress bars redraw.

use std::sync::Arc;
use std::time::Duration;

use bonus_map_loader::{BatchReport, LoadProgress, LoadState, LoadSummary};
use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::MultiProgress;

/// An `indicatif` spinner that implements [`LoadProgress`].
///
/// Records stream in lazily, so the total is never known; the spinner
/// shows the loader state, batch index, current batch size, and the
/// running submitted count.
pub struct IndicatifLoadProgress {
    bar: ProgressBar,
    label: String,
}

impl IndicatifLoadProgress {
    /// Adds a spinner labelled `label` to `multi`.
    #[must_use]
    pub fn spinner(multi: &MultiProgress, label: &str) -> Arc<dyn LoadProgress> {
        Arc::new(Self::new(multi, label))
    }

    fn new(multi: &MultiProgress, label: &str) -> Self {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold} {msg} [{elapsed_precise}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix(label.to_string());

        Self {
            bar,
            label: label.to_string(),
        }
    }
}

impl LoadProgress for IndicatifLoadProgress {
    fn on_state(&self, state: LoadState) {
        if state.is_terminal() {
            // A successful load is finished again by on_finish with its summary.
            self.bar.abandon_with_message(format!("{} {state}", self.label));
        } else {
            self.bar.set_message(state.to_string());
        }
    }

    fn on_batch(&self, report: &BatchReport) {
        self.bar.set_position(report.total_submitted);
        self.bar.set_message(format!(
            "{} batch {} size {} -> {} | {} submitted",
            report.state,
            report.index,
            report.size,
            report.next_batch_size,
            report.total_submitted
        ));
    }

    fn on_finish(&self, summary: &LoadSummary) {
        let suffix = if summary.cancelled { " (cancelled)" } else { "" };
        self.bar.finish_with_message(format!(
            "{} records in {} batches, {} rows affected{suffix}",
            summary.total_submitted, summary.batch_count, summary.rows_affected
        ));
        log::info!(
            "{}: {} submitted, {} affected in {:.1?}",
            self.label,
            summary.total_submitted,
            summary.rows_affected,
            summary.elapsed
        );
    }
}

/// Initializes the global logger wrapped in `indicatif-log-bridge` so that
/// `log::info!` and friends are suspended while progress bars redraw.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    // Build the pretty-env-logger logger manually so we can wrap it.
    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // Ignore error if logger was already set (e.g., in tests)

    log::set_max_level(level);

    multi
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_render_without_a_terminal() {
        let multi = MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden());
        let progress = IndicatifLoadProgress::spinner(&multi, "associations");

        progress.on_state(LoadState::Calibrating);
        progress.on_batch(&BatchReport {
            index: 3,
            size: 8,
            elapsed: Duration::from_millis(80),
            rows_affected: 8,
            avg_secs_per_record: 0.01,
            next_batch_size: 16,
            total_submitted: 15,
            state: LoadState::Calibrating,
        });
        progress.on_finish(&LoadSummary {
            total_submitted: 15,
            rows_affected: 15,
            batch_count: 4,
            elapsed: Duration::from_millis(150),
            final_batch_size: 16,
            session_reopens: 0,
            cancelled: false,
        });
    }

    #[test]
    fn failed_loads_stop_the_spinner() {
        let multi = MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden());
        let progress = IndicatifLoadProgress::new(&multi, "centroids");

        progress.on_state(LoadState::Calibrating);
        assert!(!progress.bar.is_finished());

        progress.on_state(LoadState::Failed);
        assert!(progress.bar.is_finished());
    }
}
