use std::collections::BTreeMap;

use bonus_map_geography::GeoError;
use bonus_map_geography::store::{CentroidStore, CentroidSum, GeographyStore};
use bonus_map_geography_models::GeographyKind;
use bonus_map_geography_models::fips::{self, FipsLevel};
use bonus_map_geography_models::geometry::STORAGE_SRID;
use bonus_map_spatial::crs::Crs;
use bonus_map_spatial::{BoundaryIndex, overlay};
use geo::{Area, MultiPolygon};

use crate::EstimationError;

/// Estimates population from a [`CentroidStore`].
pub struct PopulationEstimator<'a> {
    store: &'a dyn CentroidStore,
}

impl<'a> PopulationEstimator<'a> {
    /// Creates an estimator reading from `store`.
    #[must_use]
    pub const fn new(store: &'a dyn CentroidStore) -> Self {
        Self { store }
    }

    /// Sums centroid population sharing each target's FIPS prefix at
    /// `level`.
    ///
    /// Results keep the input order. Targets without a FIPS code, with a
    /// code too short for `level`, or with no matching centroids get
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns [`EstimationError::Store`] if the aggregate query fails.
    pub async fn fips_attribute_join(
        &self,
        targets: &[(String, Option<String>)],
        level: FipsLevel,
    ) -> Result<Vec<(String, Option<u64>)>, EstimationError> {
        let sums = self.store.sum_by_prefix(level).await?;

        Ok(targets
            .iter()
            .map(|(id, code)| {
                let population = match lookup(&sums, id, code.as_deref(), level) {
                    Ok(population) => Some(population),
                    Err(e) => {
                        log::debug!("{e}");
                        None
                    }
                };
                (id.clone(), population)
            })
            .collect())
    }

    /// Sums centroid population inside each polygon.
    ///
    /// Every polygon id appears in the result; polygons containing no
    /// centroid map to a zero sum.
    ///
    /// # Errors
    ///
    /// Returns [`EstimationError::Store`] if the spatial query fails.
    pub async fn centroid_spatial_join(
        &self,
        polygons: &[(String, MultiPolygon<f64>)],
        srid: u32,
    ) -> Result<BTreeMap<String, CentroidSum>, EstimationError> {
        if polygons.is_empty() {
            return Ok(BTreeMap::new());
        }

        let mut sums = self.store.sum_within(polygons, srid).await?;
        for (id, _) in polygons {
            sums.entry(id.clone()).or_default();
        }
        Ok(sums)
    }
}

fn lookup(
    sums: &BTreeMap<String, u64>,
    id: &str,
    code: Option<&str>,
    level: FipsLevel,
) -> Result<u64, EstimationError> {
    let code = code.ok_or_else(|| EstimationError::MissingFips { id: id.to_string() })?;
    let prefix = fips::prefix(code, level).ok_or_else(|| EstimationError::FipsTooShort {
        id: id.to_string(),
        fips: code.to_string(),
        level,
    })?;
    sums.get(prefix)
        .copied()
        .ok_or_else(|| EstimationError::NoMatch {
            id: id.to_string(),
            prefix: prefix.to_string(),
        })
}

/// A source region with a known value to apportion.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuedRegion {
    /// Region id.
    pub id: String,
    /// Region boundary.
    pub geometry: MultiPolygon<f64>,
    /// Value carried by the whole region.
    pub value: f64,
}

/// Apportions source values onto targets by overlapping area.
///
/// Each overlapping source contributes
/// `intersection_area / source_area * source_value`; contributions from
/// several sources are summed. Targets overlapping no source get `None`.
/// Zero-area sources and pairs with invalid geometry contribute nothing.
#[must_use]
pub fn areal_interpolation(
    sources: &[ValuedRegion],
    targets: &[(String, MultiPolygon<f64>)],
) -> Vec<(String, Option<f64>)> {
    let index = BoundaryIndex::build(
        sources
            .iter()
            .filter(|s| s.geometry.unsigned_area() > 0.0)
            .map(|s| (s, s.geometry.clone())),
    );

    targets
        .iter()
        .map(|(target_id, target)| {
            let mut total = None;
            for entry in index.envelope_candidates(target) {
                let source = entry.data;
                let shared = match overlay(&source.id, &source.geometry, target_id, target) {
                    Ok(Some(shared)) => shared,
                    Ok(None) => continue,
                    Err(e) => {
                        log::warn!("Skipping areal contribution: {e}");
                        continue;
                    }
                };
                let share = shared.unsigned_area() / source.geometry.unsigned_area();
                *total.get_or_insert(0.0) += share * source.value;
            }
            (target_id.clone(), total)
        })
        .collect()
}

/// Apportions the populations of every `source` geography onto every
/// `target` geography, measuring shared area in `srid`.
///
/// Sources without a population are left out. Results keep the store's
/// target order; targets overlapping no usable source get `None`.
///
/// # Errors
///
/// Returns [`EstimationError::Store`] if either lookup fails or `srid`
/// cannot be projected to.
pub async fn interpolate_between_kinds(
    store: &dyn GeographyStore,
    target: GeographyKind,
    source: GeographyKind,
    srid: u32,
) -> Result<Vec<(String, Option<f64>)>, EstimationError> {
    let storage = Crs::from_srid(STORAGE_SRID).ok_or(GeoError::UnsupportedSrid {
        srid: STORAGE_SRID,
    })?;
    let working = Crs::from_srid(srid).ok_or(GeoError::UnsupportedSrid { srid })?;

    let mut unknown = 0usize;
    let sources: Vec<ValuedRegion> = store
        .geographies_by_kind(source)
        .await?
        .into_iter()
        .filter_map(|g| {
            let Some(population) = g.population else {
                unknown += 1;
                return None;
            };
            #[allow(clippy::cast_precision_loss)]
            let value = population as f64;
            Some(ValuedRegion {
                geometry: storage.transform_multipolygon(working, &g.geometry),
                id: g.id,
                value,
            })
        })
        .collect();
    if unknown > 0 {
        log::debug!("{unknown} {source} geographies have no population and were left out");
    }

    let targets: Vec<(String, MultiPolygon<f64>)> = store
        .geographies_by_kind(target)
        .await?
        .into_iter()
        .map(|g| (g.id, storage.transform_multipolygon(working, &g.geometry)))
        .collect();

    log::info!(
        "Interpolating {} {source} populations onto {} {target} geographies",
        sources.len(),
        targets.len()
    );
    Ok(areal_interpolation(&sources, &targets))
}
