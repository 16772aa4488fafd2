use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use bonus_map_association_models::{MatchStrategy, TargetBonusAssociation};
use bonus_map_geography::store::{CentroidStore, GeographyStore};
use bonus_map_geography_models::GeographyKind;
use bonus_map_geography_models::fips::{self, FipsLevel};
use bonus_map_population::PopulationEstimator;

use crate::config::MatcherConfig;
use crate::strategy::strategy_for;
use crate::MatchError;

/// Associations found for one (target kind, bonus kind) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BonusMatches {
    /// Target kind.
    pub target: GeographyKind,
    /// Bonus kind.
    pub bonus: GeographyKind,
    /// Strategy used.
    pub strategy: MatchStrategy,
    /// Matched pairs with their population.
    pub associations: Vec<TargetBonusAssociation>,
    /// Pairs dropped because their intersection could not be computed.
    pub skipped_geometry: usize,
    /// Pairs dropped because no population could be determined.
    pub skipped_estimation: usize,
}

impl BonusMatches {
    const fn new(target: GeographyKind, bonus: GeographyKind, strategy: MatchStrategy) -> Self {
        Self {
            target,
            bonus,
            strategy,
            associations: Vec::new(),
            skipped_geometry: 0,
            skipped_estimation: 0,
        }
    }

    /// Number of associations found.
    #[must_use]
    pub fn len(&self) -> usize {
        self.associations.len()
    }

    /// Returns `true` when no association was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.associations.is_empty()
    }

    /// Iterates over the associations.
    pub fn iter(&self) -> std::slice::Iter<'_, TargetBonusAssociation> {
        self.associations.iter()
    }

    fn push(&mut self, target_id: String, bonus_id: String, population: u64) {
        self.associations.push(TargetBonusAssociation {
            target_geography_type: self.target,
            target_geography_id: target_id,
            bonus_geography_type: self.bonus,
            bonus_geography_id: bonus_id,
            population,
            population_strategy: self.strategy.population_strategy(),
        });
    }
}

impl IntoIterator for BonusMatches {
    type Item = TargetBonusAssociation;
    type IntoIter = std::vec::IntoIter<TargetBonusAssociation>;

    fn into_iter(self) -> Self::IntoIter {
        self.associations.into_iter()
    }
}

impl<'a> IntoIterator for &'a BonusMatches {
    type Item = &'a TargetBonusAssociation;
    type IntoIter = std::slice::Iter<'a, TargetBonusAssociation>;

    fn into_iter(self) -> Self::IntoIter {
        self.associations.iter()
    }
}

/// Finds overlapping (target, bonus) geography pairs.
pub struct AssociationMatcher {
    geographies: Arc<dyn GeographyStore>,
    centroids: Arc<dyn CentroidStore>,
    config: MatcherConfig,
}

impl AssociationMatcher {
    /// Creates a matcher over the given stores.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::InvalidConfig`] if `config` is unusable.
    pub fn new(
        geographies: Arc<dyn GeographyStore>,
        centroids: Arc<dyn CentroidStore>,
        config: MatcherConfig,
    ) -> Result<Self, MatchError> {
        config.validate()?;
        Ok(Self {
            geographies,
            centroids,
            config,
        })
    }

    /// Matcher parameters.
    #[must_use]
    pub const fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Finds every association between geographies of kind `target` and
    /// kind `bonus`.
    ///
    /// # Errors
    ///
    /// * [`MatchError::Configuration`] if the pair has no registered
    ///   strategy.
    /// * [`MatchError::TransientStore`] if a query timed out or lost its
    ///   connection.
    /// * [`MatchError::Store`] if a query failed.
    pub async fn find_bonus_matches(
        &self,
        target: GeographyKind,
        bonus: GeographyKind,
    ) -> Result<BonusMatches, MatchError> {
        let strategy =
            strategy_for(target, bonus).ok_or(MatchError::Configuration { target, bonus })?;
        let start = Instant::now();

        log::debug!("Matching {target} x {bonus} via {strategy}");

        let matches = match strategy {
            MatchStrategy::FipsState | MatchStrategy::FipsCounty => {
                // Targets are joined at the level their own codes identify.
                let level = target
                    .fips_level()
                    .ok_or(MatchError::Configuration { target, bonus })?;
                self.fips_matches(target, bonus, strategy, level).await?
            }
            MatchStrategy::SpatialOverlap => self.spatial_matches(target, bonus).await?,
        };

        log::info!(
            "{target} x {bonus} ({strategy}): {} associations, {} skipped (geometry), {} skipped (population) in {:.2?}",
            matches.len(),
            matches.skipped_geometry,
            matches.skipped_estimation,
            start.elapsed()
        );

        Ok(matches)
    }

    async fn fips_matches(
        &self,
        target: GeographyKind,
        bonus: GeographyKind,
        strategy: MatchStrategy,
        level: FipsLevel,
    ) -> Result<BonusMatches, MatchError> {
        let rows = self
            .bounded(
                "FIPS prefix join",
                self.geographies.fips_prefix_join(target, bonus, level),
            )
            .await?;

        // Bonuses without a stored population are estimated at their own
        // FIPS level.
        let mut missing: BTreeMap<FipsLevel, Vec<(String, Option<String>)>> = BTreeMap::new();
        for row in rows.iter().filter(|r| r.bonus_population.is_none()) {
            if let Some(own_level) = fips::level_of(&row.bonus_fips) {
                missing
                    .entry(own_level)
                    .or_default()
                    .push((row.bonus_id.clone(), Some(row.bonus_fips.clone())));
            }
        }

        let estimator = PopulationEstimator::new(self.centroids.as_ref());
        let mut estimated = HashMap::new();
        for (own_level, bonuses) in missing {
            let results = self
                .bounded(
                    "FIPS attribute join",
                    estimator.fips_attribute_join(&bonuses, own_level),
                )
                .await?;
            estimated.extend(results.into_iter().filter_map(|(id, p)| Some((id, p?))));
        }

        let mut matches = BonusMatches::new(target, bonus, strategy);
        for row in rows {
            let Some(population) = row
                .bonus_population
                .or_else(|| estimated.get(&row.bonus_id).copied())
            else {
                log::warn!(
                    "Skipping {target} {} x {bonus} {}: population unavailable",
                    row.target_id,
                    row.bonus_id
                );
                matches.skipped_estimation += 1;
                continue;
            };
            matches.push(row.target_id, row.bonus_id, population);
        }

        Ok(matches)
    }

    async fn spatial_matches(
        &self,
        target: GeographyKind,
        bonus: GeographyKind,
    ) -> Result<BonusMatches, MatchError> {
        let srid = self.config.working_srid;
        let results = self
            .bounded(
                "overlap query",
                self.geographies.overlapping_pairs(
                    target,
                    bonus,
                    self.config.min_overlap_area,
                    srid,
                ),
            )
            .await?;

        let mut matches = BonusMatches::new(target, bonus, MatchStrategy::SpatialOverlap);
        let mut rows = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(row) => rows.push(row),
                Err(e) => {
                    log::warn!("Skipping {target} x {bonus} pair: {e}");
                    matches.skipped_geometry += 1;
                }
            }
        }

        let estimator = PopulationEstimator::new(self.centroids.as_ref());
        for chunk in rows.chunks(self.config.centroid_chunk_size) {
            let polygons: Vec<_> = chunk
                .iter()
                .enumerate()
                .map(|(i, row)| (i.to_string(), row.intersection.clone()))
                .collect();
            let sums = self
                .bounded(
                    "centroid join",
                    estimator.centroid_spatial_join(&polygons, srid),
                )
                .await?;

            for (i, row) in chunk.iter().enumerate() {
                let sum = sums.get(&i.to_string()).copied().unwrap_or_default();
                let estimated = if sum.centroids == 0 { 0 } else { sum.population };
                let population = [row.target_population, row.bonus_population]
                    .into_iter()
                    .flatten()
                    .fold(estimated, u64::min);

                log::trace!(
                    "{} x {}: area {:.6}, {} centroids, estimated {estimated}, clamped {population}",
                    row.target_id,
                    row.bonus_id,
                    row.intersection_area,
                    sum.centroids
                );
                matches.push(row.target_id.clone(), row.bonus_id.clone(), population);
            }
        }

        Ok(matches)
    }

    async fn bounded<T, E>(
        &self,
        what: &str,
        query: impl Future<Output = Result<T, E>>,
    ) -> Result<T, MatchError>
    where
        MatchError: From<E>,
    {
        let timeout = self.config.query_timeout();
        match tokio::time::timeout(timeout, query).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(MatchError::TransientStore {
                message: format!("{what} timed out after {timeout:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use bonus_map_association_models::PopulationStrategy;
    use bonus_map_geography::GeoError;
    use bonus_map_geography::memory::{MemoryCentroidStore, MemoryGeographyStore};
    use bonus_map_geography::store::{FipsJoinRow, OverlapResult};
    use bonus_map_geography_models::{CentroidKey, Geography, PopulationCentroid, SourceMetadata};
    use geo::{MultiPolygon, polygon};

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

    fn centroid(geoid11: &str, lon: f64, lat: f64, population: u64) -> PopulationCentroid {
        PopulationCentroid {
            key: CentroidKey {
                state: geoid11[..2].to_string(),
                county: geoid11[2..5].to_string(),
                tract: geoid11[5..].to_string(),
                block_group: "1".to_string(),
            },
            lat,
            lon,
            population,
        }
    }

    fn matcher(
        geographies: Vec<Geography>,
        centroids: Vec<PopulationCentroid>,
        config: MatcherConfig,
    ) -> AssociationMatcher {
        AssociationMatcher::new(
            Arc::new(MemoryGeographyStore::new(geographies)),
            Arc::new(MemoryCentroidStore::new(centroids)),
            config,
        )
        .unwrap()
    }

    fn default_matcher(geographies: Vec<Geography>, centroids: Vec<PopulationCentroid>) -> AssociationMatcher {
        matcher(geographies, centroids, MatcherConfig::default())
    }

    #[tokio::test]
    async fn unregistered_pairs_are_configuration_errors() {
        let matcher = default_matcher(vec![], vec![]);

        for &target in GeographyKind::ALL {
            for &bonus in GeographyKind::ALL {
                if strategy_for(target, bonus).is_some() {
                    continue;
                }
                let err = matcher.find_bonus_matches(target, bonus).await.unwrap_err();
                assert!(
                    matches!(err, MatchError::Configuration { target: t, bonus: b } if t == target && b == bonus),
                    "{target} x {bonus}: {err:?}"
                );
            }
        }
    }

    #[tokio::test]
    async fn county_justice40_matches_by_county_prefix() {
        let matcher = default_matcher(
            vec![
                geography("cook", GeographyKind::County, Some("17031"), rect(0.0, 0.0, 1.0, 1.0), Some(5_200_000)),
                geography("los-angeles", GeographyKind::County, Some("06037"), rect(5.0, 5.0, 6.0, 6.0), Some(9_800_000)),
                geography(
                    "j40",
                    GeographyKind::Justice40,
                    Some("170319800"),
                    rect(0.2, 0.2, 0.3, 0.3),
                    Some(4_200),
                ),
            ],
            vec![],
        );

        let matches = matcher
            .find_bonus_matches(GeographyKind::County, GeographyKind::Justice40)
            .await
            .unwrap();

        assert_eq!(matches.strategy, MatchStrategy::FipsCounty);
        assert_eq!(
            matches.associations,
            vec![TargetBonusAssociation {
                target_geography_type: GeographyKind::County,
                target_geography_id: "cook".to_string(),
                bonus_geography_type: GeographyKind::Justice40,
                bonus_geography_id: "j40".to_string(),
                population: 4_200,
                population_strategy: PopulationStrategy::FipsCounty,
            }]
        );
    }

    #[tokio::test]
    async fn null_fips_population_is_estimated_or_skipped() {
        let matcher = default_matcher(
            vec![
                geography("illinois", GeographyKind::State, Some("17"), rect(0.0, 0.0, 10.0, 10.0), None),
                geography("known", GeographyKind::LowIncome, Some("17031980000"), rect(1.0, 1.0, 2.0, 2.0), None),
                geography("unknown", GeographyKind::LowIncome, Some("17031990000"), rect(3.0, 3.0, 4.0, 4.0), None),
            ],
            vec![
                centroid("17031980000", 1.5, 1.5, 120),
                centroid("17031980000", 1.6, 1.6, 80),
            ],
        );

        let matches = matcher
            .find_bonus_matches(GeographyKind::State, GeographyKind::LowIncome)
            .await
            .unwrap();

        assert_eq!(matches.strategy, MatchStrategy::FipsState);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches.associations[0].bonus_geography_id, "known");
        assert_eq!(matches.associations[0].population, 200);
        assert_eq!(matches.skipped_estimation, 1, "null is never written as 0");
    }

    #[tokio::test]
    async fn slivers_at_or_below_threshold_emit_no_row() {
        let matcher = default_matcher(
            vec![
                geography("muni", GeographyKind::Municipality, None, rect(0.0, 0.0, 1.0, 1.0), Some(900)),
                geography("zcta", GeographyKind::Distressed, None, rect(0.99, 0.0, 2.0, 1.0), Some(300)),
            ],
            vec![centroid("17031000100", 0.995, 0.5, 50)],
        );

        let matches = matcher
            .find_bonus_matches(GeographyKind::Municipality, GeographyKind::Distressed)
            .await
            .unwrap();

        assert!(matches.is_empty(), "0.01 sliver must not produce a row");
    }

    #[tokio::test]
    async fn cooperative_overlap_population_is_clamped() {
        let config = MatcherConfig {
            min_overlap_area: 1.0,
            ..MatcherConfig::default()
        };
        let matcher = matcher(
            vec![
                geography("coop", GeographyKind::RuralCooperative, None, rect(0.0, 0.0, 10.0, 10.0), Some(10_000)),
                geography("zcta", GeographyKind::Distressed, None, rect(9.0, 0.0, 14.0, 5.0), Some(400)),
            ],
            vec![
                centroid("17031000100", 9.5, 1.0, 300),
                centroid("17031000100", 9.5, 4.0, 200),
                centroid("17031000200", 5.0, 5.0, 1_000),
                centroid("17031000300", 12.0, 2.0, 700),
            ],
            config,
        );

        let matches = matcher
            .find_bonus_matches(GeographyKind::RuralCooperative, GeographyKind::Distressed)
            .await
            .unwrap();

        assert_eq!(matches.len(), 1);
        let association = &matches.associations[0];
        assert_eq!(association.population_strategy, PopulationStrategy::CentroidSpatialJoin);
        // 500 people live in the overlap but the ZCTA only has 400.
        assert_eq!(association.population, 400);
    }

    #[tokio::test]
    async fn overlap_population_never_exceeds_either_side() {
        let geographies = vec![
            geography("a", GeographyKind::Municipality, None, rect(0.0, 0.0, 4.0, 4.0), Some(150)),
            geography("b", GeographyKind::Municipality, None, rect(4.0, 0.0, 8.0, 4.0), Some(10_000)),
            geography("x", GeographyKind::Energy, None, rect(2.0, 1.0, 6.0, 3.0), Some(90)),
            geography("y", GeographyKind::Energy, None, rect(3.0, 0.0, 5.0, 4.0), Some(5_000)),
        ];
        let populations: BTreeMap<_, _> = geographies
            .iter()
            .map(|g| (g.id.clone(), g.population.unwrap()))
            .collect();
        let centroids = (0..8)
            .flat_map(|x| (0..4).map(move |y| (x, y)))
            .map(|(x, y)| centroid("17031000100", f64::from(x) + 0.5, f64::from(y) + 0.5, 40))
            .collect();

        let matches = default_matcher(geographies, centroids)
            .find_bonus_matches(GeographyKind::Municipality, GeographyKind::Energy)
            .await
            .unwrap();

        assert_eq!(matches.len(), 4);
        for a in &matches {
            let cap = populations[&a.target_geography_id].min(populations[&a.bonus_geography_id]);
            assert!(a.population <= cap, "{a:?} exceeds {cap}");
        }
    }

    #[tokio::test]
    async fn overlap_without_centroids_is_zero_not_missing() {
        let matches = default_matcher(
            vec![
                geography("utility", GeographyKind::MunicipalUtility, None, rect(0.0, 0.0, 2.0, 2.0), Some(800)),
                geography("tract", GeographyKind::Justice40, Some("17031980000"), rect(1.0, 1.0, 3.0, 3.0), None),
            ],
            vec![],
        )
        .find_bonus_matches(GeographyKind::MunicipalUtility, GeographyKind::Justice40)
        .await
        .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches.associations[0].population, 0);
    }

    #[tokio::test]
    async fn centroid_queries_are_chunked() {
        let config = MatcherConfig {
            centroid_chunk_size: 1,
            ..MatcherConfig::default()
        };
        let matches = matcher(
            vec![
                geography("a", GeographyKind::Municipality, None, rect(0.0, 0.0, 1.0, 1.0), None),
                geography("b", GeographyKind::Municipality, None, rect(2.0, 0.0, 3.0, 1.0), None),
                geography("zcta", GeographyKind::Distressed, None, rect(0.0, 0.0, 3.0, 1.0), None),
            ],
            vec![
                centroid("17031000100", 0.5, 0.5, 11),
                centroid("17031000100", 2.5, 0.5, 22),
            ],
            config,
        )
        .find_bonus_matches(GeographyKind::Municipality, GeographyKind::Distressed)
        .await
        .unwrap();

        let mut populations: Vec<_> = matches
            .iter()
            .map(|a| (a.target_geography_id.as_str(), a.population))
            .collect();
        populations.sort_unstable();
        assert_eq!(populations, vec![("a", 11), ("b", 22)]);
    }

    #[tokio::test]
    async fn invalid_geometry_is_skipped() {
        let bowtie = MultiPolygon(vec![geo::Polygon::new(
            geo::LineString::from(vec![(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]),
            vec![],
        )]);
        let matches = default_matcher(
            vec![
                geography("muni", GeographyKind::Municipality, None, rect(0.0, 0.0, 3.0, 3.0), Some(10)),
                geography("bad", GeographyKind::Distressed, None, bowtie, Some(10)),
                geography("good", GeographyKind::Distressed, None, rect(1.0, 1.0, 2.0, 2.0), Some(10)),
            ],
            vec![],
        )
        .find_bonus_matches(GeographyKind::Municipality, GeographyKind::Distressed)
        .await
        .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches.skipped_geometry, 1);
    }

    struct StalledStore;

    #[async_trait]
    impl GeographyStore for StalledStore {
        async fn geographies_by_kind(&self, _kind: GeographyKind) -> Result<Vec<Geography>, GeoError> {
            Ok(vec![])
        }

        async fn fips_prefix_join(
            &self,
            _target: GeographyKind,
            _bonus: GeographyKind,
            _level: FipsLevel,
        ) -> Result<Vec<FipsJoinRow>, GeoError> {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            Ok(vec![])
        }

        async fn overlapping_pairs(
            &self,
            _target: GeographyKind,
            _bonus: GeographyKind,
            _min_area: f64,
            _srid: u32,
        ) -> Result<Vec<OverlapResult>, GeoError> {
            Err(GeoError::Transient {
                message: "server closed the connection unexpectedly".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_queries_time_out_as_transient() {
        let matcher = AssociationMatcher::new(
            Arc::new(StalledStore),
            Arc::new(MemoryCentroidStore::new(vec![])),
            MatcherConfig {
                query_timeout_secs: 5.0,
                ..MatcherConfig::default()
            },
        )
        .unwrap();

        let err = matcher
            .find_bonus_matches(GeographyKind::County, GeographyKind::Energy)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::TransientStore { .. }), "{err:?}");

        let err = matcher
            .find_bonus_matches(GeographyKind::County, GeographyKind::Distressed)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::TransientStore { .. }), "{err:?}");
    }
}
