//! Loader tuning parameters.
//!
//! All smoothing and sizing parameters live here rather than as literals
//! in the control loop. The struct deserializes from the `[loader]`
//! section of the application TOML; omitted keys take the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rejected loader configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid loader configuration: {message}")]
pub struct ConfigError {
    /// Description of the offending field.
    pub message: String,
}

/// Tuning parameters for the adaptive batch loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Wall time each batch should approach.
    pub target_duration_secs: f64,
    /// Exponential smoothing factor in `(0, 1]`.
    pub smoothing_alpha: f64,
    /// Number of initial batches whose growth is capped.
    pub calibration_window: u32,
    /// Maximum per-step growth multiplier during calibration.
    pub calibration_growth_factor: f64,
    /// Hard ceiling on batch size.
    pub max_batch_size: usize,
    /// Session wall time after which the session is closed and reopened.
    pub max_session_age_secs: f64,
    /// Timeout applied to every bulk write.
    pub batch_timeout_secs: f64,
    /// Retries granted to a batch that fails with a transient error.
    pub max_transient_retries: u32,
    /// Backoff before the first retry, doubled on each further attempt.
    pub retry_backoff_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            target_duration_secs: 1.0,
            smoothing_alpha: 0.3,
            calibration_window: 5,
            calibration_growth_factor: 2.0,
            max_batch_size: 50_000,
            max_session_age_secs: 600.0,
            batch_timeout_secs: 120.0,
            max_transient_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl LoaderConfig {
    /// Target batch duration.
    #[must_use]
    pub fn target_duration(&self) -> Duration {
        Duration::from_secs_f64(self.target_duration_secs)
    }

    /// Session age ceiling.
    #[must_use]
    pub fn max_session_age(&self) -> Duration {
        Duration::from_secs_f64(self.max_session_age_secs)
    }

    /// Per-batch write timeout.
    #[must_use]
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.batch_timeout_secs)
    }

    /// Backoff before retry number `attempt` (1-based).
    #[must_use]
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    /// Checks that every parameter is usable by the control loop.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: String| Err(ConfigError { message });

        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return fail(format!(
                "smoothing_alpha must be in (0, 1], got {}",
                self.smoothing_alpha
            ));
        }
        if !(self.target_duration_secs.is_finite() && self.target_duration_secs > 0.0) {
            return fail(format!(
                "target_duration_secs must be positive, got {}",
                self.target_duration_secs
            ));
        }
        if !(self.max_session_age_secs.is_finite() && self.max_session_age_secs > 0.0) {
            return fail(format!(
                "max_session_age_secs must be positive, got {}",
                self.max_session_age_secs
            ));
        }
        if !(self.batch_timeout_secs.is_finite() && self.batch_timeout_secs > 0.0) {
            return fail(format!(
                "batch_timeout_secs must be positive, got {}",
                self.batch_timeout_secs
            ));
        }
        if self.calibration_window == 0 {
            return fail("calibration_window must be at least 1".to_string());
        }
        if !(self.calibration_growth_factor.is_finite() && self.calibration_growth_factor >= 1.0) {
            return fail(format!(
                "calibration_growth_factor must be >= 1, got {}",
                self.calibration_growth_factor
            ));
        }
        if self.max_batch_size == 0 {
            return fail("max_batch_size must be at least 1".to_string());
        }

        Ok(())
    }
}
