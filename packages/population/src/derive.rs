//! Housing-unit weighted block group centroids.
//!
//! The Census Bureau publishes population-weighted centroids for block
//! groups in the states, DC and Puerto Rico, but not for the island areas.
//! For those, a centroid is derived from the block group's census blocks:
//! the representative points are averaged with housing units as weights,
//! and longitudes are additionally weighted by `cos(lat)` so blocks near
//! the poles do not pull the mean east or west.

use std::collections::BTreeMap;

use bonus_map_geography_models::{CensusBlock, CentroidKey, PopulationCentroid};

#[derive(Default)]
struct Accumulator {
    weight: f64,
    lat: f64,
    lon_weight: f64,
    lon: f64,
    population: u64,
    blocks: Vec<(f64, f64)>,
}

impl Accumulator {
    #[allow(clippy::cast_precision_loss)]
    fn add(&mut self, block: &CensusBlock) {
        self.population = self.population.saturating_add(block.population);
        self.blocks.push((block.lat, block.lon));
        if block.housing_units > 0 {
            self.push(block.housing_units as f64, block.lat, block.lon);
        }
    }

    fn push(&mut self, weight: f64, lat: f64, lon: f64) {
        let cos = lat.to_radians().cos();
        self.weight += weight;
        self.lat += weight * lat;
        self.lon_weight += weight * cos;
        self.lon += weight * lon * cos;
    }

    fn finish(mut self, key: CentroidKey) -> Option<PopulationCentroid> {
        if self.weight <= 0.0 {
            // No block has housing units; average the points evenly.
            for (lat, lon) in std::mem::take(&mut self.blocks) {
                self.push(1.0, lat, lon);
            }
        }
        if self.weight <= 0.0 || self.lon_weight == 0.0 {
            return None;
        }

        Some(PopulationCentroid {
            key,
            lat: self.lat / self.weight,
            lon: self.lon / self.lon_weight,
            population: self.population,
        })
    }
}

/// Derives one centroid per block group from its census blocks.
///
/// Blocks with zero housing units do not influence the location but
/// their population still counts toward the block group total. Output is
/// ordered by [`CentroidKey`].
#[must_use]
pub fn derive_centroids(blocks: impl IntoIterator<Item = CensusBlock>) -> Vec<PopulationCentroid> {
    let mut groups: BTreeMap<CentroidKey, Accumulator> = BTreeMap::new();
    for block in blocks {
        groups.entry(block.key.clone()).or_default().add(&block);
    }

    let total = groups.len();
    let centroids: Vec<_> = groups
        .into_iter()
        .filter_map(|(key, acc)| {
            let described = key.to_string();
            let centroid = acc.finish(key);
            if centroid.is_none() {
                log::warn!("Could not derive centroid for block group {described}");
            }
            centroid
        })
        .collect();

    log::info!(
        "Derived {} block group centroids from {total} groups",
        centroids.len()
    );
    centroids
}
