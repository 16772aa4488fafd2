#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Database connection, stores, and migrations for the bonus map.
//!
//! Uses `switchy_database` for `PostGIS` access and `switchy_schema` for
//! embedded SQL migrations. Spatial work runs server side through raw
//! SQL via `query_raw_params()`. Derived centroids are cached locally in
//! `DuckDB`.

pub mod centroid_cache;
pub mod db;
pub mod paths;
pub mod pg_store;
pub mod sink;

use bonus_map_geography::GeoError;
use include_dir::{Dir, include_dir};
use switchy_database::Database;
use switchy_schema::discovery::embedded::EmbeddedMigrationSource;
use switchy_schema::runner::MigrationRunner;

pub use centroid_cache::DuckDbCentroidCache;
pub use pg_store::{PgCentroidStore, PgGeographyStore};
pub use sink::PgRecordSink;

/// Embedded SQL migrations from the `migrations/` directory.
static MIGRATIONS_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/../../migrations");

/// Maximum number of bind parameters in one Postgres statement.
pub const PG_MAX_PARAMS: usize = 65_535;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] switchy_schema::MigrationError),

    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not connect to the database.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of what went wrong.
        message: String,
    },

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

impl From<DbError> for GeoError {
    fn from(e: DbError) -> Self {
        let message = e.to_string();
        match e {
            DbError::Connection { .. } => Self::Transient { message },
            DbError::Conversion { .. } => Self::Conversion { message },
            DbError::Database(_) if is_transient_message(&message) => Self::Transient { message },
            _ => Self::Query { message },
        }
    }
}

/// Runs all pending database migrations.
///
/// # Errors
///
/// Returns [`DbError`] if any migration fails to apply.
pub async fn run_migrations(db: &dyn Database) -> Result<(), DbError> {
    let source = EmbeddedMigrationSource::new(&MIGRATIONS_DIR);
    let runner = MigrationRunner::new(Box::new(source));
    runner.run(db).await?;
    log::info!("Database migrations completed successfully");
    Ok(())
}

/// Returns `true` if a driver error message describes a dropped
/// connection or a cancelled statement.
#[must_use]
pub fn is_transient_message(message: &str) -> bool {
    const MARKERS: &[&str] = &[
        "connection closed",
        "connection reset",
        "connection refused",
        "broken pipe",
        "timed out",
        "timeout",
        "canceling statement",
        "terminating connection",
        "server closed the connection",
        "57014",
        "08006",
        "08003",
        "40p01",
        "deadlock",
    ];
    let lower = message.to_ascii_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}

/// Returns `true` if a driver error message describes a constraint
/// violation or malformed data.
#[must_use]
pub fn is_integrity_message(message: &str) -> bool {
    const MARKERS: &[&str] = &[
        "violates",
        "constraint",
        "invalid input syntax",
        "value too long",
        "out of range",
        "23502",
        "23503",
        "23505",
        "23514",
        "22001",
        "22003",
        "22p02",
    ];
    let lower = message.to_ascii_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}
