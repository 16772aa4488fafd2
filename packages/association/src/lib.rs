#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Target/bonus association matching.
//!
//! For a registered (target kind, bonus kind) pair the matcher asks the
//! geography store for candidate pairs with a single set-oriented query,
//! either a FIPS prefix join or an indexed spatial overlap, and computes
//! each association's population.

pub mod config;
pub mod strategy;

mod matcher;

pub use config::MatcherConfig;
pub use matcher::{AssociationMatcher, BonusMatches};
pub use strategy::{STRATEGY_TABLE, pairs_for_target, strategy_for};

use bonus_map_geography::GeoError;
use bonus_map_geography_models::GeographyKind;
use bonus_map_population::EstimationError;
use thiserror::Error;

/// Errors that abort a matching run.
#[derive(Debug, Error)]
pub enum MatchError {
    /// The kind pair has no registered strategy.
    #[error("No matching strategy registered for {target} x {bonus}")]
    Configuration {
        /// Requested target kind.
        target: GeographyKind,
        /// Requested bonus kind.
        bonus: GeographyKind,
    },

    /// Connection dropped or query timed out.
    #[error("Transient store error: {message}")]
    TransientStore {
        /// Description of what went wrong.
        message: String,
    },

    /// Store rejected a query.
    #[error("Store error: {message}")]
    Store {
        /// Description of what went wrong.
        message: String,
    },

    /// Matcher parameters are unusable.
    #[error("Invalid matcher configuration: {message}")]
    InvalidConfig {
        /// Description of the offending field.
        message: String,
    },
}

impl From<GeoError> for MatchError {
    fn from(value: GeoError) -> Self {
        if value.is_transient() {
            Self::TransientStore {
                message: value.to_string(),
            }
        } else {
            Self::Store {
                message: value.to_string(),
            }
        }
    }
}

impl From<EstimationError> for MatchError {
    fn from(value: EstimationError) -> Self {
        match value {
            EstimationError::Store(e) => e.into(),
            other => Self::Store {
                message: other.to_string(),
            },
        }
    }
}
