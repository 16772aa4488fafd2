#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Target and bonus geography types.
//!
//! "Target" geographies are administrative service areas (states,
//! counties, municipalities, utilities, cooperatives). "Bonus"
//! geographies are federally designated qualifying areas whose overlap
//! with a target determines eligibility. Both are stored in the same
//! `geographies` table, distinguished by [`GeographyKind`].

pub mod fips;
pub mod geometry;

use bonus_map_loader_models::{FieldValue, Record};
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::fips::FipsLevel;
use crate::geometry::STORAGE_SRID;

/// Every geography type the engine knows about.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GeographyKind {
    /// U.S. state or territory.
    State,
    /// County or county equivalent.
    County,
    /// Incorporated place.
    Municipality,
    /// Municipally owned electric utility service territory.
    MunicipalUtility,
    /// Rural electric cooperative service territory.
    RuralCooperative,
    /// Distressed community (ZIP code tabulation area).
    Distressed,
    /// Energy community.
    Energy,
    /// Justice40 disadvantaged census tract.
    Justice40,
    /// Low-income census tract.
    LowIncome,
}

impl GeographyKind {
    /// All kinds, targets first.
    pub const ALL: &'static [Self] = &[
        Self::State,
        Self::County,
        Self::Municipality,
        Self::MunicipalUtility,
        Self::RuralCooperative,
        Self::Distressed,
        Self::Energy,
        Self::Justice40,
        Self::LowIncome,
    ];

    /// Administrative target kinds.
    pub const TARGETS: &'static [Self] = &[
        Self::State,
        Self::County,
        Self::Municipality,
        Self::MunicipalUtility,
        Self::RuralCooperative,
    ];

    /// Federally designated bonus kinds.
    pub const BONUSES: &'static [Self] = &[
        Self::Distressed,
        Self::Energy,
        Self::Justice40,
        Self::LowIncome,
    ];

    /// Returns `true` for administrative target kinds.
    #[must_use]
    pub const fn is_target(self) -> bool {
        matches!(
            self,
            Self::State
                | Self::County
                | Self::Municipality
                | Self::MunicipalUtility
                | Self::RuralCooperative
        )
    }

    /// Returns `true` for federally designated bonus kinds.
    #[must_use]
    pub const fn is_bonus(self) -> bool {
        !self.is_target()
    }

    /// FIPS level at which records of this kind are identified, if the
    /// kind carries a reliable FIPS code at all.
    #[must_use]
    pub const fn fips_level(self) -> Option<FipsLevel> {
        match self {
            Self::State => Some(FipsLevel::State),
            Self::County => Some(FipsLevel::County),
            Self::Justice40 | Self::LowIncome => Some(FipsLevel::Tract),
            Self::Municipality
            | Self::MunicipalUtility
            | Self::RuralCooperative
            | Self::Distressed
            | Self::Energy => None,
        }
    }
}

/// Where a geography record came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    /// Upstream dataset name (e.g. `"tiger_counties"`).
    pub dataset: Option<String>,
    /// Dataset vintage or release label (e.g. `"2023"`).
    pub vintage: Option<String>,
}

/// A target or bonus geography.
///
/// Geometry is always stored in [`STORAGE_SRID`].
#[derive(Debug, Clone, PartialEq)]
pub struct Geography {
    /// Stable identifier, unique across all kinds.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Geography type.
    pub kind: GeographyKind,
    /// FIPS code when the source publishes one.
    pub fips: Option<String>,
    /// Boundary.
    pub geometry: MultiPolygon<f64>,
    /// Stored population, if known.
    pub population: Option<u64>,
    /// Provenance.
    pub source: SourceMetadata,
}

impl Record for Geography {
    const TABLE: &'static str = "geographies";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "geography_type",
        "fips",
        "population",
        "dataset",
        "vintage",
        "geom",
    ];
    const UNIQUE_KEY: &'static [&'static str] = &["id"];

    fn values(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Text(self.id.clone()),
            FieldValue::Text(self.name.clone()),
            FieldValue::Text(self.kind.to_string()),
            FieldValue::text_or_null(self.fips.as_deref()),
            FieldValue::count_or_null(self.population),
            FieldValue::text_or_null(self.source.dataset.as_deref()),
            FieldValue::text_or_null(self.source.vintage.as_deref()),
            FieldValue::MultiPolygon {
                geojson: geometry::to_geojson(&self.geometry),
                srid: STORAGE_SRID,
            },
        ]
    }

    fn describe(&self) -> String {
        format!("{} {} ({})", self.kind, self.id, self.name)
    }
}

/// Census hierarchy identity of a block group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CentroidKey {
    /// Two-digit state FIPS.
    pub state: String,
    /// Three-digit county FIPS.
    pub county: String,
    /// Six-digit tract code.
    pub tract: String,
    /// One-digit block group.
    pub block_group: String,
}

impl CentroidKey {
    /// Full 12-digit block group GEOID.
    #[must_use]
    pub fn geoid(&self) -> String {
        format!(
            "{}{}{}{}",
            self.state, self.county, self.tract, self.block_group
        )
    }

    /// GEOID prefix at `level` (e.g. the 5-digit county GEOID).
    #[must_use]
    pub fn prefix(&self, level: FipsLevel) -> String {
        match level {
            FipsLevel::State => self.state.clone(),
            FipsLevel::County => format!("{}{}", self.state, self.county),
            FipsLevel::Tract => format!("{}{}{}", self.state, self.county, self.tract),
            FipsLevel::BlockGroup => self.geoid(),
        }
    }
}

impl std::fmt::Display for CentroidKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.geoid())
    }
}

/// A population-weighted point standing in for a block group's residents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationCentroid {
    /// Census hierarchy identity.
    pub key: CentroidKey,
    /// Latitude in degrees (WGS 84).
    pub lat: f64,
    /// Longitude in degrees (WGS 84).
    pub lon: f64,
    /// Residents represented by this point.
    pub population: u64,
}

impl Record for PopulationCentroid {
    const TABLE: &'static str = "population_centroids";
    const COLUMNS: &'static [&'static str] = &[
        "state_fips",
        "county_fips",
        "tract_code",
        "block_group",
        "population",
        "location",
    ];
    const UNIQUE_KEY: &'static [&'static str] =
        &["state_fips", "county_fips", "tract_code", "block_group"];

    fn values(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Text(self.key.state.clone()),
            FieldValue::Text(self.key.county.clone()),
            FieldValue::Text(self.key.tract.clone()),
            FieldValue::Text(self.key.block_group.clone()),
            FieldValue::count(self.population),
            FieldValue::Point {
                lon: self.lon,
                lat: self.lat,
                srid: STORAGE_SRID,
            },
        ]
    }

    fn describe(&self) -> String {
        format!("centroid {}", self.key)
    }
}

/// A census block's representative point, used to derive block group
/// centroids where none are published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CensusBlock {
    /// Block group the block belongs to.
    pub key: CentroidKey,
    /// Four-character block number.
    pub block: String,
    /// Representative point latitude.
    pub lat: f64,
    /// Representative point longitude.
    pub lon: f64,
    /// Block population.
    pub population: u64,
    /// Block housing unit count.
    pub housing_units: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CentroidKey {
        CentroidKey {
            state: "60".to_string(),
            county: "010".to_string(),
            tract: "950100".to_string(),
            block_group: "1".to_string(),
        }
    }

    #[test]
    fn kinds_partition_into_targets_and_bonuses() {
        assert_eq!(
            GeographyKind::TARGETS.len() + GeographyKind::BONUSES.len(),
            GeographyKind::ALL.len()
        );
        for kind in GeographyKind::TARGETS {
            assert!(kind.is_target());
        }
        for kind in GeographyKind::BONUSES {
            assert!(kind.is_bonus());
        }
    }

    #[test]
    fn kind_string_forms() {
        assert_eq!(GeographyKind::RuralCooperative.to_string(), "rural_cooperative");
        assert_eq!(
            "low_income".parse::<GeographyKind>().ok(),
            Some(GeographyKind::LowIncome)
        );
        assert_eq!(
            "justice40".parse::<GeographyKind>().ok(),
            Some(GeographyKind::Justice40)
        );
        assert!("township".parse::<GeographyKind>().is_err());
    }

    #[test]
    fn centroid_key_prefixes() {
        let key = key();
        assert_eq!(key.geoid(), "600109501001");
        assert_eq!(key.prefix(FipsLevel::State), "60");
        assert_eq!(key.prefix(FipsLevel::County), "60010");
        assert_eq!(key.prefix(FipsLevel::Tract), "60010950100");
        assert_eq!(key.prefix(FipsLevel::BlockGroup), "600109501001");
    }

    #[test]
    fn centroid_record_values_align_with_columns() {
        let centroid = PopulationCentroid {
            key: key(),
            lat: -14.27,
            lon: -170.70,
            population: 812,
        };
        let values = centroid.values();
        assert_eq!(values.len(), PopulationCentroid::COLUMNS.len());
        assert_eq!(values[4], FieldValue::Int(812));
        assert!(matches!(values[5], FieldValue::Point { srid: 4326, .. }));
    }
}
