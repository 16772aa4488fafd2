//! Matcher parameters, deserialized from the `[matcher]` TOML section.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::MatchError;

/// Tuning parameters for [`crate::AssociationMatcher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Overlaps with an area at or below this, in working SRID units, are
    /// not associations.
    pub min_overlap_area: f64,
    /// SRID that overlap areas are measured in.
    pub working_srid: u32,
    /// Intersection polygons per centroid query.
    pub centroid_chunk_size: usize,
    /// Timeout applied to every store query.
    pub query_timeout_secs: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_overlap_area: 0.02,
            working_srid: 4326,
            centroid_chunk_size: 500,
            query_timeout_secs: 300.0,
        }
    }
}

impl MatcherConfig {
    /// Store query timeout.
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.query_timeout_secs)
    }

    /// Checks the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), MatchError> {
        if !(self.min_overlap_area.is_finite() && self.min_overlap_area >= 0.0) {
            return Err(MatchError::InvalidConfig {
                message: format!(
                    "min_overlap_area must be non-negative, got {}",
                    self.min_overlap_area
                ),
            });
        }
        if self.centroid_chunk_size == 0 {
            return Err(MatchError::InvalidConfig {
                message: "centroid_chunk_size must be at least 1".to_string(),
            });
        }
        if !(self.query_timeout_secs.is_finite() && self.query_timeout_secs > 0.0) {
            return Err(MatchError::InvalidConfig {
                message: format!(
                    "query_timeout_secs must be positive, got {}",
                    self.query_timeout_secs
                ),
            });
        }
        Ok(())
    }
}
