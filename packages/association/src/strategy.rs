//! Static (target kind, bonus kind) to strategy dispatch.

use bonus_map_association_models::MatchStrategy;
use bonus_map_geography_models::GeographyKind;

use GeographyKind::{
    County, Distressed, Energy, Justice40, LowIncome, MunicipalUtility, Municipality,
    RuralCooperative, State,
};
use MatchStrategy::{FipsCounty, FipsState, SpatialOverlap};

/// Every registered kind pair and how it is matched.
///
/// Distressed areas are ZIP code tabulation areas without FIPS nesting, so
/// they are always matched spatially. Municipalities, utilities and
/// cooperatives cross county lines and never nest by FIPS.
pub const STRATEGY_TABLE: &[(GeographyKind, GeographyKind, MatchStrategy)] = &[
    (State, Distressed, SpatialOverlap),
    (State, Energy, FipsState),
    (State, Justice40, FipsState),
    (State, LowIncome, FipsState),
    (County, Distressed, SpatialOverlap),
    (County, Energy, FipsCounty),
    (County, Justice40, FipsCounty),
    (County, LowIncome, FipsCounty),
    (Municipality, Distressed, SpatialOverlap),
    (Municipality, Energy, SpatialOverlap),
    (Municipality, Justice40, SpatialOverlap),
    (Municipality, LowIncome, SpatialOverlap),
    (MunicipalUtility, Distressed, SpatialOverlap),
    (MunicipalUtility, Energy, SpatialOverlap),
    (MunicipalUtility, Justice40, SpatialOverlap),
    (MunicipalUtility, LowIncome, SpatialOverlap),
    (RuralCooperative, Distressed, SpatialOverlap),
    (RuralCooperative, Energy, SpatialOverlap),
    (RuralCooperative, Justice40, SpatialOverlap),
    (RuralCooperative, LowIncome, SpatialOverlap),
];

/// Strategy registered for a kind pair, if any.
#[must_use]
pub fn strategy_for(target: GeographyKind, bonus: GeographyKind) -> Option<MatchStrategy> {
    STRATEGY_TABLE
        .iter()
        .find(|(t, b, _)| *t == target && *b == bonus)
        .map(|(_, _, strategy)| *strategy)
}

/// Registered pairs whose target is `target`, in table order.
pub fn pairs_for_target(
    target: GeographyKind,
) -> impl Iterator<Item = (GeographyKind, MatchStrategy)> {
    STRATEGY_TABLE
        .iter()
        .filter(move |(t, _, _)| *t == target)
        .map(|(_, b, s)| (*b, *s))
}
