//! In-memory stores backed by R-tree indexes.
//!
//! These mirror the `PostGIS` queries: overlap candidates come from an
//! envelope pre-filter before the exact intersection, FIPS matches are a
//! hash join on the prefix, and centroid sums use a point index. Suitable
//! for tests, dry runs, and datasets that fit in memory.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bonus_map_geography_models::fips::{self, FipsLevel};
use bonus_map_geography_models::geometry::STORAGE_SRID;
use bonus_map_geography_models::{Geography, GeographyKind, PopulationCentroid};
use bonus_map_spatial::crs::Crs;
use bonus_map_spatial::{BoundaryIndex, PointIndex, overlay};
use geo::{Area, MultiPolygon};

use crate::GeoError;
use crate::store::{
    CentroidStore, CentroidSum, FipsJoinRow, GeographyStore, OverlapResult, OverlapRow,
};

/// Geographies held in memory, grouped by kind.
#[derive(Debug, Default)]
pub struct MemoryGeographyStore {
    by_kind: BTreeMap<GeographyKind, Vec<Geography>>,
}

impl MemoryGeographyStore {
    /// Creates a store holding `geographies`.
    #[must_use]
    pub fn new(geographies: impl IntoIterator<Item = Geography>) -> Self {
        let mut store = Self::default();
        for geography in geographies {
            store.insert(geography);
        }
        store
    }

    /// Adds a geography.
    pub fn insert(&mut self, geography: Geography) {
        self.by_kind.entry(geography.kind).or_default().push(geography);
    }

    /// Total number of geographies held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    /// Returns `true` if the store holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self, kind: GeographyKind) -> &[Geography] {
        self.by_kind.get(&kind).map_or(&[], Vec::as_slice)
    }
}

#[async_trait]
impl GeographyStore for MemoryGeographyStore {
    async fn geographies_by_kind(&self, kind: GeographyKind) -> Result<Vec<Geography>, GeoError> {
        Ok(self.kind(kind).to_vec())
    }

    async fn fips_prefix_join(
        &self,
        target: GeographyKind,
        bonus: GeographyKind,
        level: FipsLevel,
    ) -> Result<Vec<FipsJoinRow>, GeoError> {
        let mut targets_by_fips: HashMap<&str, Vec<&Geography>> = HashMap::new();
        for geography in self.kind(target) {
            if let Some(code) = geography.fips.as_deref()
                && fips::level_of(code) == Some(level)
            {
                targets_by_fips.entry(code).or_default().push(geography);
            }
        }

        let mut rows = Vec::new();
        for geography in self.kind(bonus) {
            let Some(code) = geography.fips.as_deref() else {
                continue;
            };
            let Some(targets) = fips::prefix(code, level).and_then(|p| targets_by_fips.get(p))
            else {
                continue;
            };
            for target in targets {
                rows.push(FipsJoinRow {
                    target_id: target.id.clone(),
                    bonus_id: geography.id.clone(),
                    bonus_fips: code.to_string(),
                    bonus_population: geography.population,
                });
            }
        }

        rows.sort_by(|a, b| (&a.target_id, &a.bonus_id).cmp(&(&b.target_id, &b.bonus_id)));
        Ok(rows)
    }

    async fn overlapping_pairs(
        &self,
        target: GeographyKind,
        bonus: GeographyKind,
        min_area: f64,
        srid: u32,
    ) -> Result<Vec<OverlapResult>, GeoError> {
        let storage = Crs::from_srid(STORAGE_SRID).ok_or(GeoError::UnsupportedSrid {
            srid: STORAGE_SRID,
        })?;
        let working = Crs::from_srid(srid).ok_or(GeoError::UnsupportedSrid { srid })?;

        let targets = self.kind(target);
        let index = BoundaryIndex::build(
            targets
                .iter()
                .enumerate()
                .map(|(i, g)| (i, g.geometry.clone())),
        );

        let mut results = Vec::new();
        for bonus_geo in self.kind(bonus) {
            for entry in index.envelope_candidates(&bonus_geo.geometry) {
                let target_geo = &targets[entry.data];
                let shared = match overlay(
                    &target_geo.id,
                    &target_geo.geometry,
                    &bonus_geo.id,
                    &bonus_geo.geometry,
                ) {
                    Ok(Some(shared)) => shared,
                    Ok(None) => continue,
                    Err(e) => {
                        results.push(Err(e));
                        continue;
                    }
                };

                let shared = storage.transform_multipolygon(working, &shared);
                let area = shared.unsigned_area();
                if area <= min_area {
                    log::trace!(
                        "Dropping sliver {} x {} (area {area} <= {min_area})",
                        target_geo.id,
                        bonus_geo.id
                    );
                    continue;
                }

                results.push(Ok(OverlapRow {
                    target_id: target_geo.id.clone(),
                    target_population: target_geo.population,
                    bonus_id: bonus_geo.id.clone(),
                    bonus_population: bonus_geo.population,
                    intersection: shared,
                    intersection_area: area,
                    srid,
                }));
            }
        }

        Ok(results)
    }
}

/// Population centroids held in memory with a WGS 84 point index.
pub struct MemoryCentroidStore {
    centroids: Vec<PopulationCentroid>,
    index: PointIndex,
}

impl MemoryCentroidStore {
    /// Creates a store holding `centroids`.
    #[must_use]
    pub fn new(centroids: Vec<PopulationCentroid>) -> Self {
        let index = PointIndex::build(centroids.iter().map(|c| (c.lon, c.lat, c.population)));
        Self { centroids, index }
    }

    /// Number of centroids held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    /// Returns `true` if the store holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    fn reprojected(&self, to: Crs) -> PointIndex {
        PointIndex::build(self.centroids.iter().map(|c| {
            let (x, y) = Crs::Wgs84.transform(to, c.lon, c.lat);
            (x, y, c.population)
        }))
    }
}

#[async_trait]
impl CentroidStore for MemoryCentroidStore {
    async fn sum_within(
        &self,
        polygons: &[(String, MultiPolygon<f64>)],
        srid: u32,
    ) -> Result<BTreeMap<String, CentroidSum>, GeoError> {
        let crs = Crs::from_srid(srid).ok_or(GeoError::UnsupportedSrid { srid })?;
        let reprojected;
        let index = if crs == Crs::Wgs84 {
            &self.index
        } else {
            reprojected = self.reprojected(crs);
            &reprojected
        };

        let mut sums = BTreeMap::new();
        for (id, polygon) in polygons {
            let (population, centroids) = index.sum_within(polygon);
            let entry: &mut CentroidSum = sums.entry(id.clone()).or_default();
            entry.population = entry.population.saturating_add(population);
            entry.centroids += centroids;
        }
        Ok(sums)
    }

    async fn sum_by_prefix(&self, level: FipsLevel) -> Result<BTreeMap<String, u64>, GeoError> {
        let mut sums: BTreeMap<String, u64> = BTreeMap::new();
        for centroid in &self.centroids {
            let total = sums.entry(centroid.key.prefix(level)).or_default();
            *total = total.saturating_add(centroid.population);
        }
        Ok(sums)
    }
}

#[cfg(test)]
mod tests {
    use bonus_map_geography_models::{CentroidKey, SourceMetadata};
    use geo::polygon;

    use super::*;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
        ]])
    }

    fn geography(
        id: &str,
        kind: GeographyKind,
        fips: Option<&str>,
        geometry: MultiPolygon<f64>,
        population: Option<u64>,
    ) -> Geography {
        Geography {
            id: id.to_string(),
            name: id.to_string(),
            kind,
            fips: fips.map(str::to_string),
            geometry,
            population,
            source: SourceMetadata::default(),
        }
    }

    fn centroid(tract: &str, lon: f64, lat: f64, population: u64) -> PopulationCentroid {
        PopulationCentroid {
            key: CentroidKey {
                state: "17".to_string(),
                county: "031".to_string(),
                tract: tract.to_string(),
                block_group: "1".to_string(),
            },
            lat,
            lon,
            population,
        }
    }

    #[tokio::test]
    async fn fips_join_matches_on_prefix() {
        let store = MemoryGeographyStore::new(vec![
            geography("cook", GeographyKind::County, Some("17031"), rect(0.0, 0.0, 1.0, 1.0), None),
            geography("la", GeographyKind::County, Some("06037"), rect(5.0, 5.0, 6.0, 6.0), None),
            geography(
                "tract",
                GeographyKind::Justice40,
                Some("170319800"),
                rect(0.1, 0.1, 0.2, 0.2),
                Some(321),
            ),
            geography("nofips", GeographyKind::Justice40, None, rect(0.1, 0.1, 0.2, 0.2), Some(5)),
        ]);

        let rows = store
            .fips_prefix_join(GeographyKind::County, GeographyKind::Justice40, FipsLevel::County)
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![FipsJoinRow {
                target_id: "cook".to_string(),
                bonus_id: "tract".to_string(),
                bonus_fips: "170319800".to_string(),
                bonus_population: Some(321),
            }]
        );
    }

    #[tokio::test]
    async fn overlap_drops_slivers_and_disjoint_pairs() {
        let store = MemoryGeographyStore::new(vec![
            geography("coop", GeographyKind::RuralCooperative, None, rect(0.0, 0.0, 10.0, 10.0), Some(1000)),
            geography("big", GeographyKind::Distressed, None, rect(9.0, 0.0, 14.0, 1.0), Some(50)),
            geography("sliver", GeographyKind::Distressed, None, rect(9.99, 5.0, 11.0, 6.0), Some(50)),
            geography("far", GeographyKind::Distressed, None, rect(50.0, 50.0, 51.0, 51.0), Some(50)),
        ]);

        let rows = store
            .overlapping_pairs(
                GeographyKind::RuralCooperative,
                GeographyKind::Distressed,
                0.02,
                4326,
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.bonus_id, "big");
        assert!((row.intersection_area - 1.0).abs() < 1e-9);
        assert_eq!(row.srid, 4326);
    }

    #[tokio::test]
    async fn overlap_reports_invalid_geometry() {
        let bowtie = MultiPolygon(vec![geo::Polygon::new(
            geo::LineString::from(vec![(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]),
            vec![],
        )]);
        let store = MemoryGeographyStore::new(vec![
            geography("muni", GeographyKind::Municipality, None, rect(0.0, 0.0, 3.0, 3.0), Some(10)),
            geography("bad", GeographyKind::LowIncome, None, bowtie, Some(10)),
        ]);

        let rows = store
            .overlapping_pairs(GeographyKind::Municipality, GeographyKind::LowIncome, 0.0, 4326)
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_err());
    }

    #[tokio::test]
    async fn overlap_rejects_unknown_srid() {
        let store = MemoryGeographyStore::default();
        let err = store
            .overlapping_pairs(GeographyKind::State, GeographyKind::Distressed, 0.0, 32616)
            .await
            .unwrap_err();
        assert!(matches!(err, GeoError::UnsupportedSrid { srid: 32616 }));
    }

    #[tokio::test]
    async fn overlap_in_conus_albers_measures_square_meters() {
        let store = MemoryGeographyStore::new(vec![
            geography("county", GeographyKind::County, None, rect(-96.0, 30.0, -95.8, 30.2), None),
            geography("tract", GeographyKind::Energy, None, rect(-95.9, 30.0, -95.7, 30.1), Some(900)),
            geography("sliver", GeographyKind::Energy, None, rect(-95.8001, 30.15, -95.7, 30.16), Some(5)),
        ]);

        let rows = store
            .overlapping_pairs(GeographyKind::County, GeographyKind::Energy, 1_000_000.0, 5070)
            .await
            .unwrap();

        assert_eq!(rows.len(), 1, "the sliver is under a square kilometer");
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.bonus_id, "tract");
        assert_eq!(row.srid, 5070);
        let expected = 106_904_539.4;
        assert!(
            (row.intersection_area - expected).abs() / expected < 1e-5,
            "area {}",
            row.intersection_area
        );
    }

    #[tokio::test]
    async fn centroid_sums_group_by_polygon() {
        let store = MemoryCentroidStore::new(vec![
            centroid("000100", 0.5, 0.5, 100),
            centroid("000100", 0.6, 0.6, 50),
            centroid("000200", 3.5, 3.5, 7),
        ]);

        let sums = store
            .sum_within(
                &[
                    ("a".to_string(), rect(0.0, 0.0, 1.0, 1.0)),
                    ("b".to_string(), rect(3.0, 3.0, 4.0, 4.0)),
                    ("empty".to_string(), rect(8.0, 8.0, 9.0, 9.0)),
                ],
                4326,
            )
            .await
            .unwrap();

        assert_eq!(sums["a"], CentroidSum { population: 150, centroids: 2 });
        assert_eq!(sums["b"].population, 7);
        assert_eq!(sums["empty"], CentroidSum::default());
    }

    #[tokio::test]
    async fn centroid_sums_reproject_into_polygon_crs() {
        let store = MemoryCentroidStore::new(vec![centroid("000100", 0.5, 0.5, 100)]);
        let (x0, y0) = Crs::Wgs84.transform(Crs::WebMercator, 0.0, 0.0);
        let (x1, y1) = Crs::Wgs84.transform(Crs::WebMercator, 1.0, 1.0);

        let sums = store
            .sum_within(&[("m".to_string(), rect(x0, y0, x1, y1))], 3857)
            .await
            .unwrap();

        assert_eq!(sums["m"].population, 100);
    }

    #[tokio::test]
    async fn prefix_sums() {
        let store = MemoryCentroidStore::new(vec![
            centroid("000100", 0.5, 0.5, 100),
            centroid("000100", 0.6, 0.6, 50),
            centroid("000200", 3.5, 3.5, 7),
        ]);

        let by_tract = store.sum_by_prefix(FipsLevel::Tract).await.unwrap();
        assert_eq!(by_tract["17031000100"], 150);
        assert_eq!(by_tract["17031000200"], 7);

        let by_county = store.sum_by_prefix(FipsLevel::County).await.unwrap();
        assert_eq!(by_county.len(), 1);
        assert_eq!(by_county["17031"], 157);
    }
}
