//! FIPS code hierarchy utilities.
//!
//! Census GEOIDs are hierarchical: the first two digits are the state,
//! the next three the county, then a six-digit tract and a one-digit
//! block group. Joins between levels reduce to prefix comparisons.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A level of the GEOID hierarchy.
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
pub enum FipsLevel {
    /// 2-digit state.
    State,
    /// 5-digit state + county.
    County,
    /// 11-digit state + county + tract.
    Tract,
    /// 12-digit state + county + tract + block group.
    BlockGroup,
}

impl FipsLevel {
    /// Number of GEOID digits at this level.
    #[must_use]
    pub const fn len(self) -> usize {
        match self {
            Self::State => 2,
            Self::County => 5,
            Self::Tract => 11,
            Self::BlockGroup => 12,
        }
    }

    /// Level whose GEOIDs have exactly `len` digits.
    #[must_use]
    pub const fn from_len(len: usize) -> Option<Self> {
        match len {
            2 => Some(Self::State),
            5 => Some(Self::County),
            11 => Some(Self::Tract),
            12 => Some(Self::BlockGroup),
            _ => None,
        }
    }
}

/// Returns `true` if `code` is a non-empty string of ASCII digits.
#[must_use]
pub fn is_numeric(code: &str) -> bool {
    !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit())
}

/// Prefix of `code` at `level`, or `None` if the code is too short or
/// not numeric.
#[must_use]
pub fn prefix(code: &str, level: FipsLevel) -> Option<&str> {
    if is_numeric(code) && code.len() >= level.len() {
        Some(&code[..level.len()])
    } else {
        None
    }
}

/// Level of a complete GEOID, inferred from its length.
#[must_use]
pub fn level_of(code: &str) -> Option<FipsLevel> {
    if is_numeric(code) {
        FipsLevel::from_len(code.len())
    } else {
        None
    }
}
