//! Batch size control.
//!
//! The per-record write time is tracked as an exponentially smoothed
//! average and the next batch is sized so it should take about the target
//! duration. During the first `calibration_window` batches growth is
//! capped at `calibration_growth_factor` times the previous size so a
//! single fast early sample cannot produce a huge batch.
//!
//! The average is seeded with the first sample instead of starting at 0
//! and blending it in with `alpha`. A zero start would report a fraction
//! of the real latency after batch 1 and size batch 2 far too large once
//! calibration no longer caps it. Every later sample applies
//! `(1 - alpha) * old + alpha * sample`.

use std::time::Duration;

use bonus_map_loader_models::LoaderConfig;

/// Closed-loop batch sizing state.
#[derive(Debug, Clone)]
pub struct BatchSizer {
    target_secs: f64,
    alpha: f64,
    calibration_window: u32,
    growth_factor: f64,
    max_batch_size: usize,
    batch_size: usize,
    avg_secs_per_record: Option<f64>,
    completed: u32,
}

impl BatchSizer {
    /// Starts at a batch size of 1 with no timing history.
    #[must_use]
    pub fn new(config: &LoaderConfig) -> Self {
        Self {
            target_secs: config.target_duration().as_secs_f64(),
            alpha: config.smoothing_alpha,
            calibration_window: config.calibration_window,
            growth_factor: config.calibration_growth_factor,
            max_batch_size: config.max_batch_size,
            batch_size: 1,
            avg_secs_per_record: None,
            completed: 0,
        }
    }

    /// Size of the next batch.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Smoothed per-record duration in seconds, 0 before the first sample.
    #[must_use]
    pub fn avg_secs_per_record(&self) -> f64 {
        self.avg_secs_per_record.unwrap_or(0.0)
    }

    /// Whether growth is still capped.
    #[must_use]
    pub const fn is_calibrating(&self) -> bool {
        self.completed < self.calibration_window
    }

    /// Feeds the timing of a completed batch and returns the next size.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn observe(&mut self, size: usize, elapsed: Duration) -> usize {
        if size == 0 {
            return self.batch_size;
        }

        let sample = elapsed.as_secs_f64() / size as f64;
        let avg = match self.avg_secs_per_record {
            // The first sample seeds the average; a zero prior would bias
            // it low and oversize the next batch.
            None => sample,
            // (1 - alpha) * old + alpha * sample
            Some(old) => self.alpha.mul_add(sample - old, old),
        };
        self.avg_secs_per_record = Some(avg);

        let max = self.max_batch_size as f64;
        let mut next = if avg > 0.0 {
            (self.target_secs / avg).ceil().min(max)
        } else {
            max
        };
        if self.is_calibrating() {
            next = next.min((size as f64 * self.growth_factor).ceil());
        }

        self.completed = self.completed.saturating_add(1);
        self.batch_size = (next as usize).clamp(1, self.max_batch_size);
        self.batch_size
    }
}
