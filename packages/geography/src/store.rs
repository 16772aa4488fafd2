//! Store interfaces consumed by the matcher and the population estimator.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bonus_map_geography_models::fips::FipsLevel;
use bonus_map_geography_models::{Geography, GeographyKind};
use bonus_map_spatial::GeometryError;
use geo::MultiPolygon;

use crate::GeoError;

/// A (target, bonus) pair whose FIPS codes nest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FipsJoinRow {
    /// Target geography id.
    pub target_id: String,
    /// Bonus geography id.
    pub bonus_id: String,
    /// Bonus geography FIPS code.
    pub bonus_fips: String,
    /// Stored bonus population.
    pub bonus_population: Option<u64>,
}

/// A (target, bonus) pair whose geometries overlap above the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlapRow {
    /// Target geography id.
    pub target_id: String,
    /// Stored target population.
    pub target_population: Option<u64>,
    /// Bonus geography id.
    pub bonus_id: String,
    /// Stored bonus population.
    pub bonus_population: Option<u64>,
    /// Shared region, in `srid`.
    pub intersection: MultiPolygon<f64>,
    /// Area of the shared region in `srid` units.
    pub intersection_area: f64,
    /// Spatial reference id of `intersection`.
    pub srid: u32,
}

/// One overlap candidate: either a usable row or the geometry problem
/// that prevented computing its intersection.
pub type OverlapResult = Result<OverlapRow, GeometryError>;

/// Population found inside one polygon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CentroidSum {
    /// Summed centroid population.
    pub population: u64,
    /// Number of centroids inside the polygon.
    pub centroids: usize,
}

/// Access to target and bonus geographies.
#[async_trait]
pub trait GeographyStore: Send + Sync {
    /// All geographies of one kind.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError`] if the lookup fails.
    async fn geographies_by_kind(&self, kind: GeographyKind) -> Result<Vec<Geography>, GeoError>;

    /// Equi-join of targets and bonuses on the bonus FIPS prefix at
    /// `level`, executed as a single set-oriented query.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError`] if the query fails.
    async fn fips_prefix_join(
        &self,
        target: GeographyKind,
        bonus: GeographyKind,
        level: FipsLevel,
    ) -> Result<Vec<FipsJoinRow>, GeoError>;

    /// All (target, bonus) pairs whose geometries intersect with an area
    /// strictly greater than `min_area`, measured in `srid`.
    ///
    /// Pairs whose intersection cannot be computed are reported as
    /// [`GeometryError`] entries rather than failing the whole query.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError`] if the query fails.
    async fn overlapping_pairs(
        &self,
        target: GeographyKind,
        bonus: GeographyKind,
        min_area: f64,
        srid: u32,
    ) -> Result<Vec<OverlapResult>, GeoError>;
}

/// Access to population-weighted centroids.
#[async_trait]
pub trait CentroidStore: Send + Sync {
    /// Sums centroid population inside each polygon, grouped by polygon
    /// id. Polygons are in `srid`; centroids are reprojected into it.
    ///
    /// Every requested id is present in the result.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError`] if the query fails or `srid` is unsupported.
    async fn sum_within(
        &self,
        polygons: &[(String, MultiPolygon<f64>)],
        srid: u32,
    ) -> Result<BTreeMap<String, CentroidSum>, GeoError>;

    /// Sums centroid population grouped by GEOID prefix at `level`.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError`] if the query fails.
    async fn sum_by_prefix(&self, level: FipsLevel) -> Result<BTreeMap<String, u64>, GeoError>;
}
