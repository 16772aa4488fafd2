#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geography and population centroid stores.
//!
//! The matching engine never iterates geography pairs itself. It asks a
//! [`store::GeographyStore`] for FIPS-prefix joins and for intersecting
//! pairs above an area threshold, and a [`store::CentroidStore`] for
//! population sums inside polygons. The `PostGIS` implementations live in
//! `bonus_map_database`; [`memory`] holds R-tree backed implementations
//! used for tests and dry runs.

pub mod memory;
pub mod store;

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum GeoError {
    /// Connection dropped or query timed out; retrying may succeed.
    #[error("Transient store error: {message}")]
    Transient {
        /// Description of what went wrong.
        message: String,
    },

    /// Query rejected by the store.
    #[error("Query error: {message}")]
    Query {
        /// Description of what went wrong.
        message: String,
    },

    /// Coordinate reference system the store cannot work in.
    #[error("Unsupported SRID {srid}")]
    UnsupportedSrid {
        /// Requested EPSG code.
        srid: u32,
    },

    /// Data conversion error.
    #[error("Conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

impl GeoError {
    /// Returns `true` for errors worth retrying with a fresh session.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
