#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Population estimation for geographies that lack a direct figure.
//!
//! Three strategies are available, picked by the caller:
//!
//! * [`PopulationEstimator::fips_attribute_join`] sums block group
//!   centroids sharing a FIPS prefix with each target.
//! * [`PopulationEstimator::centroid_spatial_join`] sums centroids falling
//!   inside each polygon.
//! * [`areal_interpolation`] apportions known source values by the share
//!   of source area each target overlaps; [`interpolate_between_kinds`]
//!   runs it over two geography kinds read from a store.
//!
//! [`derive`] builds housing-unit weighted centroids for block groups the
//! Census Bureau does not publish, and [`cache`] keeps them around between
//! runs.

pub mod cache;
pub mod derive;

mod estimator;

pub use estimator::{
    PopulationEstimator, ValuedRegion, areal_interpolation, interpolate_between_kinds,
};

use bonus_map_geography::GeoError;
use bonus_map_geography_models::fips::FipsLevel;
use thiserror::Error;

/// Reasons a single population estimate could not be produced.
///
/// Per-target variants are reported as a missing value, never as zero.
#[derive(Debug, Error)]
pub enum EstimationError {
    /// Target has no FIPS code to join on.
    #[error("Geography {id} has no FIPS code")]
    MissingFips {
        /// Target id.
        id: String,
    },

    /// FIPS code is shorter than the requested join level.
    #[error("Geography {id} FIPS code {fips} is too short for a {level} join")]
    FipsTooShort {
        /// Target id.
        id: String,
        /// Target FIPS code.
        fips: String,
        /// Requested level.
        level: FipsLevel,
    },

    /// No centroid shares the target's FIPS prefix.
    #[error("No centroids under FIPS prefix {prefix} for geography {id}")]
    NoMatch {
        /// Target id.
        id: String,
        /// Prefix that was looked up.
        prefix: String,
    },

    /// Underlying centroid store failed.
    #[error(transparent)]
    Store(#[from] GeoError),
}
