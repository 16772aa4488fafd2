//! Derived centroid cache stored in `DuckDB`.
//!
//! Island areas have no published block group centroids, so they are
//! derived from census blocks once and kept here; later runs load them
//! instead of re-reading the block files.

use std::path::Path;

use bonus_map_geography_models::{CentroidKey, PopulationCentroid};
use bonus_map_population::cache::{CacheError, CentroidCache};
use duckdb::Connection;

use crate::DbError;

impl From<DbError> for CacheError {
    fn from(e: DbError) -> Self {
        Self::Backend {
            message: e.to_string(),
        }
    }
}

/// [`CentroidCache`] backed by a `DuckDB` file.
pub struct DuckDbCentroidCache {
    conn: Connection,
}

impl DuckDbCentroidCache {
    /// Opens (or creates) the cache at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens the cache at the default path.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_default() -> Result<Self, DbError> {
        Self::open(&crate::paths::derived_centroids_db_path())
    }

    /// Opens a cache that lives only as long as the returned value.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS derived_centroids (
                state_fips TEXT NOT NULL,
                county_fips TEXT NOT NULL,
                tract_code TEXT NOT NULL,
                block_group TEXT NOT NULL,
                lat DOUBLE NOT NULL,
                lon DOUBLE NOT NULL,
                population UBIGINT NOT NULL,
                created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (state_fips, county_fips, tract_code, block_group),
                CHECK (lat BETWEEN -90 AND 90 AND lon BETWEEN -180 AND 180)
            );",
        )?;
        Ok(Self { conn })
    }

    fn read_all(&self) -> Result<Vec<PopulationCentroid>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT state_fips, county_fips, tract_code, block_group, lat, lon, population
             FROM derived_centroids
             ORDER BY state_fips, county_fips, tract_code, block_group",
        )?;
        stmt.raw_execute()?;

        let mut centroids = Vec::new();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            centroids.push(PopulationCentroid {
                key: CentroidKey {
                    state: row.get(0)?,
                    county: row.get(1)?,
                    tract: row.get(2)?,
                    block_group: row.get(3)?,
                },
                lat: row.get(4)?,
                lon: row.get(5)?,
                population: row.get(6)?,
            });
        }

        Ok(centroids)
    }

    /// Writes every centroid in one transaction so a failed store leaves
    /// the previous contents untouched.
    fn write_all(&self, centroids: &[PopulationCentroid]) -> Result<(), DbError> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;

        if let Err(e) = self.insert_all(centroids) {
            if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                log::warn!("Failed to roll back centroid cache write: {rollback}");
            }
            return Err(e);
        }

        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn insert_all(&self, centroids: &[PopulationCentroid]) -> Result<(), DbError> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO derived_centroids
                (state_fips, county_fips, tract_code, block_group, lat, lon, population)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (state_fips, county_fips, tract_code, block_group) DO UPDATE SET
                lat = EXCLUDED.lat,
                lon = EXCLUDED.lon,
                population = EXCLUDED.population",
        )?;

        for c in centroids {
            stmt.execute(duckdb::params![
                c.key.state,
                c.key.county,
                c.key.tract,
                c.key.block_group,
                c.lat,
                c.lon,
                c.population,
            ])?;
        }

        Ok(())
    }
}

impl CentroidCache for DuckDbCentroidCache {
    fn load(&self) -> Result<Vec<PopulationCentroid>, CacheError> {
        Ok(self.read_all()?)
    }

    fn store(&mut self, centroids: &[PopulationCentroid]) -> Result<(), CacheError> {
        self.write_all(centroids)?;
        log::debug!("Cached {} derived centroids", centroids.len());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        self.conn
            .execute_batch("DELETE FROM derived_centroids;")
            .map_err(DbError::from)?;
        Ok(())
    }
}
