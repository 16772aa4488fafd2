#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Record, configuration, and progress types for the adaptive batch loader.
//!
//! Anything that can be persisted by the loader implements [`Record`]:
//! it names its table, its column list, and the unique key that
//! insert-or-ignore writes conflict on. Sinks only ever see rows as a
//! list of [`FieldValue`]s aligned with [`Record::COLUMNS`].

pub mod config;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use config::{ConfigError, LoaderConfig};

/// A single column value of a persisted row.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// UTF-8 text.
    Text(String),
    /// Signed 64-bit integer.
    Int(i64),
    /// Double precision float.
    Real(f64),
    /// SQL `NULL`.
    Null,
    /// A multipolygon encoded as a `GeoJSON` geometry string.
    MultiPolygon {
        /// `GeoJSON` geometry text.
        geojson: String,
        /// Spatial reference id of the coordinates.
        srid: u32,
    },
    /// A point location.
    Point {
        /// Longitude (or easting).
        lon: f64,
        /// Latitude (or northing).
        lat: f64,
        /// Spatial reference id of the coordinates.
        srid: u32,
    },
}

impl FieldValue {
    /// Text value, or `NULL` when absent.
    #[must_use]
    pub fn text_or_null(value: Option<&str>) -> Self {
        value.map_or(Self::Null, |v| Self::Text(v.to_string()))
    }

    /// Integer value, or `NULL` when absent.
    ///
    /// Counts above `i64::MAX` saturate.
    #[must_use]
    pub fn count_or_null(value: Option<u64>) -> Self {
        value.map_or(Self::Null, Self::count)
    }

    /// Integer value from an unsigned count, saturating at `i64::MAX`.
    #[must_use]
    pub fn count(value: u64) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }

    /// Canonical string form used to compare unique keys in memory.
    #[must_use]
    pub fn key_repr(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Real(r) => r.to_string(),
            Self::Null => "\u{0}NULL".to_string(),
            Self::MultiPolygon { geojson, srid } => format!("{srid}:{geojson}"),
            Self::Point { lon, lat, srid } => format!("{srid}:{lon},{lat}"),
        }
    }

    /// Returns `true` for [`FieldValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// A row type that the adaptive batch loader can persist.
pub trait Record: Send + Sync {
    /// Destination table.
    const TABLE: &'static str;

    /// Column names, in the order [`Record::values`] returns them.
    const COLUMNS: &'static [&'static str];

    /// Columns forming the natural key that insert-or-ignore conflicts on.
    const UNIQUE_KEY: &'static [&'static str];

    /// Columns overwritten on conflict. Empty means conflicting rows are
    /// ignored.
    const UPDATE_FIELDS: &'static [&'static str] = &[];

    /// Column values aligned with [`Record::COLUMNS`].
    fn values(&self) -> Vec<FieldValue>;

    /// Short human-readable identification used in error context.
    fn describe(&self) -> String;
}

/// Lifecycle of a single load call.
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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadState {
    /// Early batches, growth capped per step.
    Calibrating,
    /// Batch size follows the smoothed per-record latency.
    Steady,
    /// Source exhausted (or cancelled); closing the session.
    Draining,
    /// Finished successfully.
    Done,
    /// Aborted on an unrecoverable error.
    Failed,
}

impl LoadState {
    /// Returns `true` once no further transitions can occur.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Per-batch progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Zero-based batch index.
    pub index: u64,
    /// Records submitted in this batch.
    pub size: usize,
    /// Wall time of the successful write.
    pub elapsed: Duration,
    /// Rows the sink reported as affected.
    pub rows_affected: u64,
    /// Smoothed per-record duration after this batch, in seconds.
    pub avg_secs_per_record: f64,
    /// Size chosen for the next batch.
    pub next_batch_size: usize,
    /// Records submitted so far, including this batch.
    pub total_submitted: u64,
    /// Loader state while this batch ran.
    pub state: LoadState,
}

/// Result of a completed load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    /// Records submitted for insertion (ignored conflicts included).
    pub total_submitted: u64,
    /// Rows the sink reported as affected.
    pub rows_affected: u64,
    /// Number of batches written.
    pub batch_count: u64,
    /// Total wall time of the load.
    pub elapsed: Duration,
    /// Batch size the loader would have used next.
    pub final_batch_size: usize,
    /// Sessions closed and reopened because of age or retries.
    pub session_reopens: u32,
    /// Whether the load stopped early on a cancellation request.
    pub cancelled: bool,
}
