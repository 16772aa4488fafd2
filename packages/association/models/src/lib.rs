#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Association records linking a target geography to an overlapping bonus
//! geography, and the strategies that produce them.

use bonus_map_geography_models::GeographyKind;
use bonus_map_loader_models::{FieldValue, Record};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// How a (target, bonus) kind pair is matched.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchStrategy {
    /// Bonus FIPS starts with the 2-digit target state FIPS.
    FipsState,
    /// Bonus FIPS starts with the 5-digit target county FIPS.
    FipsCounty,
    /// Geometries intersect with more than the minimum area.
    SpatialOverlap,
}

impl MatchStrategy {
    /// How associations found by this strategy get their population.
    #[must_use]
    pub const fn population_strategy(self) -> PopulationStrategy {
        match self {
            Self::FipsState => PopulationStrategy::FipsState,
            Self::FipsCounty => PopulationStrategy::FipsCounty,
            Self::SpatialOverlap => PopulationStrategy::CentroidSpatialJoin,
        }
    }
}

/// How an association's population was determined.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PopulationStrategy {
    /// Bonus population taken whole; bonus nests in the target state.
    FipsState,
    /// Bonus population taken whole; bonus nests in the target county.
    FipsCounty,
    /// Centroids inside the overlap, clamped by both stored populations.
    CentroidSpatialJoin,
}

/// A bonus geography overlapping a target geography, with the population
/// living in the overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetBonusAssociation {
    /// Target kind.
    pub target_geography_type: GeographyKind,
    /// Target id.
    pub target_geography_id: String,
    /// Bonus kind.
    pub bonus_geography_type: GeographyKind,
    /// Bonus id.
    pub bonus_geography_id: String,
    /// Population in the overlap. Zero is a real value.
    pub population: u64,
    /// How `population` was determined.
    pub population_strategy: PopulationStrategy,
}

impl Record for TargetBonusAssociation {
    const TABLE: &'static str = "target_bonus_associations";
    const COLUMNS: &'static [&'static str] = &[
        "target_geography_type",
        "target_geography_id",
        "bonus_geography_type",
        "bonus_geography_id",
        "population",
        "population_strategy",
    ];
    const UNIQUE_KEY: &'static [&'static str] = &["target_geography_id", "bonus_geography_id"];

    fn values(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Text(self.target_geography_type.to_string()),
            FieldValue::Text(self.target_geography_id.clone()),
            FieldValue::Text(self.bonus_geography_type.to_string()),
            FieldValue::Text(self.bonus_geography_id.clone()),
            FieldValue::count(self.population),
            FieldValue::Text(self.population_strategy.to_string()),
        ]
    }

    fn describe(&self) -> String {
        format!(
            "{} {} x {} {}",
            self.target_geography_type,
            self.target_geography_id,
            self.bonus_geography_type,
            self.bonus_geography_id
        )
    }
}
