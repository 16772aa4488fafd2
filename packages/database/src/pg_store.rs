//! `PostGIS` implementations of the geography and centroid stores.
//!
//! Every operation is a single set-oriented statement: spatial joins use
//! the `&&` bounding-box operator so the GIST indexes prune candidates
//! before `ST_Intersects`, and FIPS joins compare `LEFT(fips, n)` against
//! the expression indexes created by the migration.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use bonus_map_geography::GeoError;
use bonus_map_geography::store::{
    CentroidStore, CentroidSum, FipsJoinRow, GeographyStore, OverlapResult, OverlapRow,
};
use bonus_map_geography_models::fips::FipsLevel;
use bonus_map_geography_models::geometry::{STORAGE_SRID, parse_multipolygon, to_geojson};
use bonus_map_geography_models::{Geography, GeographyKind, SourceMetadata};
use bonus_map_spatial::GeometryError;
use geo::MultiPolygon;
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue, Row};

use crate::{DbError, PG_MAX_PARAMS};

fn conversion(column: &str, e: impl std::fmt::Display) -> DbError {
    DbError::Conversion {
        message: format!("Failed to read {column}: {e}"),
    }
}

fn text(row: &Row, column: &str) -> Result<String, DbError> {
    row.to_value(column).map_err(|e| conversion(column, e))
}

fn optional_text(row: &Row, column: &str) -> Result<Option<String>, DbError> {
    row.to_value(column).map_err(|e| conversion(column, e))
}

fn optional_int(row: &Row, column: &str) -> Result<Option<i64>, DbError> {
    row.to_value(column).map_err(|e| conversion(column, e))
}

fn optional_real(row: &Row, column: &str) -> Result<Option<f64>, DbError> {
    row.to_value(column).map_err(|e| conversion(column, e))
}

fn flag(row: &Row, column: &str) -> Result<bool, DbError> {
    row.to_value(column).map_err(|e| conversion(column, e))
}

/// A nullable count column. Negative counts are rejected rather than read
/// as unknown.
fn count(column: &str, raw: Option<i64>) -> Result<Option<u64>, DbError> {
    raw.map(|v| {
        u64::try_from(v).map_err(|_| DbError::Conversion {
            message: format!("Negative {column}: {v}"),
        })
    })
    .transpose()
}

fn population(row: &Row, column: &str) -> Result<Option<u64>, DbError> {
    count(column, optional_int(row, column)?)
}

/// Geographies stored in the `geographies` table.
#[derive(Clone)]
pub struct PgGeographyStore {
    db: Arc<dyn Database>,
}

impl PgGeographyStore {
    /// Wraps an open connection.
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    async fn fetch_geographies(&self, kind: GeographyKind) -> Result<Vec<Geography>, DbError> {
        let rows = self
            .db
            .query_raw_params(
                "SELECT id, name, fips, population, dataset, vintage,
                        ST_AsGeoJSON(geom) AS geojson
                 FROM geographies
                 WHERE geography_type = $1::text
                 ORDER BY id",
                &[DatabaseValue::String(kind.to_string())],
            )
            .await?;

        let mut geographies = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = text(row, "id")?;
            let geojson = text(row, "geojson")?;
            let Some(geometry) = parse_multipolygon(&geojson) else {
                log::warn!("Skipping {kind} {id}: stored geometry is not polygonal");
                continue;
            };
            geographies.push(Geography {
                name: text(row, "name")?,
                kind,
                fips: optional_text(row, "fips")?,
                geometry,
                population: population(row, "population")?,
                source: SourceMetadata {
                    dataset: optional_text(row, "dataset")?,
                    vintage: optional_text(row, "vintage")?,
                },
                id,
            });
        }

        Ok(geographies)
    }

    async fn fetch_fips_join(
        &self,
        target: GeographyKind,
        bonus: GeographyKind,
        level: FipsLevel,
    ) -> Result<Vec<FipsJoinRow>, DbError> {
        let sql = fips_join_sql(level);
        let rows = self
            .db
            .query_raw_params(
                &sql,
                &[
                    DatabaseValue::String(target.to_string()),
                    DatabaseValue::String(bonus.to_string()),
                ],
            )
            .await?;

        rows.iter()
            .map(|row| -> Result<FipsJoinRow, DbError> {
                Ok(FipsJoinRow {
                    target_id: text(row, "target_id")?,
                    bonus_id: text(row, "bonus_id")?,
                    bonus_fips: text(row, "bonus_fips")?,
                    bonus_population: population(row, "bonus_population")?,
                })
            })
            .collect()
    }

    async fn fetch_overlaps(
        &self,
        target: GeographyKind,
        bonus: GeographyKind,
        min_area: f64,
        srid: u32,
    ) -> Result<Vec<OverlapResult>, DbError> {
        let sql = overlap_sql(srid);
        let rows = self
            .db
            .query_raw_params(
                &sql,
                &[
                    DatabaseValue::String(target.to_string()),
                    DatabaseValue::String(bonus.to_string()),
                    DatabaseValue::Real64(min_area),
                ],
            )
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let target_id = text(row, "target_id")?;
            let bonus_id = text(row, "bonus_id")?;
            let target_valid: bool = flag(row, "target_valid")?;
            let bonus_valid: bool = flag(row, "bonus_valid")?;

            if !target_valid {
                results.push(Err(GeometryError::Invalid { id: target_id }));
                continue;
            }
            if !bonus_valid {
                results.push(Err(GeometryError::Invalid { id: bonus_id }));
                continue;
            }

            let geojson = optional_text(row, "geojson")?;
            let Some(intersection) = geojson.as_deref().and_then(parse_multipolygon) else {
                results.push(Err(GeometryError::NonPolygonal {
                    left: target_id,
                    right: bonus_id,
                }));
                continue;
            };

            results.push(Ok(OverlapRow {
                target_population: population(row, "target_population")?,
                bonus_population: population(row, "bonus_population")?,
                intersection_area: optional_real(row, "area")?.unwrap_or(0.0),
                intersection,
                srid,
                target_id,
                bonus_id,
            }));
        }

        Ok(results)
    }
}

/// Equi-join on the bonus FIPS prefix. `n` is inlined so the planner
/// can match the `LEFT(fips, n)` expression indexes.
fn fips_join_sql(level: FipsLevel) -> String {
    let n = level.len();
    format!(
        "SELECT t.id AS target_id, b.id AS bonus_id, b.fips AS bonus_fips,
                b.population AS bonus_population
         FROM geographies t
         JOIN geographies b
           ON b.geography_type = $2::text
          AND LEFT(b.fips, {n}) = t.fips
         WHERE t.geography_type = $1::text
           AND length(t.fips) = {n}
         ORDER BY t.id, b.id"
    )
}

/// Intersecting pairs with validity flags. Invalid pairs are returned
/// with a NULL intersection so the caller can report them.
fn overlap_sql(srid: u32) -> String {
    format!(
        "WITH t AS (
             SELECT id, population, geom, ST_IsValid(geom) AS valid
             FROM geographies WHERE geography_type = $1::text
         ), b AS (
             SELECT id, population, geom, ST_IsValid(geom) AS valid
             FROM geographies WHERE geography_type = $2::text
         ), candidates AS (
             SELECT t.id AS target_id, t.population AS target_population,
                    t.valid AS target_valid,
                    b.id AS bonus_id, b.population AS bonus_population,
                    b.valid AS bonus_valid,
                    CASE WHEN t.valid AND b.valid THEN
                        ST_CollectionExtract(
                            ST_Intersection(
                                ST_Transform(t.geom, {srid}),
                                ST_Transform(b.geom, {srid})
                            ),
                            3
                        )
                    END AS shared
             FROM t
             JOIN b ON t.geom && b.geom
             WHERE NOT (t.valid AND b.valid) OR ST_Intersects(t.geom, b.geom)
         )
         SELECT target_id, target_population, target_valid,
                bonus_id, bonus_population, bonus_valid,
                ST_AsGeoJSON(shared) AS geojson,
                ST_Area(shared) AS area
         FROM candidates
         WHERE shared IS NULL OR ST_Area(shared) > $3::float8
         ORDER BY target_id, bonus_id"
    )
}

#[async_trait]
impl GeographyStore for PgGeographyStore {
    async fn geographies_by_kind(&self, kind: GeographyKind) -> Result<Vec<Geography>, GeoError> {
        Ok(self.fetch_geographies(kind).await?)
    }

    async fn fips_prefix_join(
        &self,
        target: GeographyKind,
        bonus: GeographyKind,
        level: FipsLevel,
    ) -> Result<Vec<FipsJoinRow>, GeoError> {
        Ok(self.fetch_fips_join(target, bonus, level).await?)
    }

    async fn overlapping_pairs(
        &self,
        target: GeographyKind,
        bonus: GeographyKind,
        min_area: f64,
        srid: u32,
    ) -> Result<Vec<OverlapResult>, GeoError> {
        if srid == 0 {
            return Err(GeoError::UnsupportedSrid { srid });
        }
        Ok(self.fetch_overlaps(target, bonus, min_area, srid).await?)
    }
}

/// Population centroids stored in the `population_centroids` table.
#[derive(Clone)]
pub struct PgCentroidStore {
    db: Arc<dyn Database>,
}

impl PgCentroidStore {
    /// Wraps an open connection.
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    async fn fetch_sums(
        &self,
        polygons: &[(String, MultiPolygon<f64>)],
        srid: u32,
    ) -> Result<BTreeMap<String, CentroidSum>, DbError> {
        let mut sums: BTreeMap<String, CentroidSum> = polygons
            .iter()
            .map(|(id, _)| (id.clone(), CentroidSum::default()))
            .collect();

        // (id, geojson) per polygon.
        let params_per_row: usize = 2;
        let chunk_size = PG_MAX_PARAMS / params_per_row;

        for chunk in polygons.chunks(chunk_size) {
            let (sql, params) = centroid_sum_sql(chunk, srid);
            let rows = self.db.query_raw_params(&sql, &params).await?;
            for row in &rows {
                let id = text(row, "id")?;
                let sum = CentroidSum {
                    population: population(row, "population")?.unwrap_or(0),
                    centroids: count("centroids", optional_int(row, "centroids")?)?
                        .map_or(Ok(0), usize::try_from)
                        .map_err(|e| DbError::Conversion {
                            message: format!("Centroid count out of range: {e}"),
                        })?,
                };
                sums.insert(id, sum);
            }
        }

        Ok(sums)
    }

    async fn fetch_prefix_sums(&self, level: FipsLevel) -> Result<BTreeMap<String, u64>, DbError> {
        let n = level.len();
        let rows = self
            .db
            .query_raw_params(
                &format!(
                    "SELECT LEFT(state_fips || county_fips || tract_code || block_group, {n})
                                AS prefix,
                            SUM(population)::bigint AS population
                     FROM population_centroids
                     GROUP BY 1"
                ),
                &[],
            )
            .await?;

        rows.iter()
            .map(|row| -> Result<(String, u64), DbError> {
                Ok((
                    text(row, "prefix")?,
                    population(row, "population")?.unwrap_or(0),
                ))
            })
            .collect()
    }
}

/// Builds the grouped centroid sum for one chunk of polygons. Polygons
/// are sent as `GeoJSON` in `srid`; centroids are reprojected into it
/// after the 4326 bounding-box prefilter.
fn centroid_sum_sql(
    polygons: &[(String, MultiPolygon<f64>)],
    srid: u32,
) -> (String, Vec<DatabaseValue>) {
    let mut sql = String::from("WITH p AS (\n SELECT v.id, ST_SetSRID(ST_GeomFromGeoJSON(v.geojson), ");
    let _ = write!(sql, "{srid}) AS geom\n FROM (VALUES ");
    let mut params = Vec::with_capacity(polygons.len() * 2);
    let mut idx = 1u32;

    for (i, (id, polygon)) in polygons.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        let _ = write!(sql, "(${idx}::text, ${}::text)", idx + 1);
        params.push(DatabaseValue::String(id.clone()));
        params.push(DatabaseValue::String(to_geojson(polygon)));
        idx += 2;
    }

    let _ = write!(
        sql,
        ") AS v(id, geojson)\n)
         SELECT p.id AS id,
                COALESCE(SUM(c.population), 0)::bigint AS population,
                COUNT(c.population)::bigint AS centroids
         FROM p
         LEFT JOIN population_centroids c
           ON c.location && ST_Transform(p.geom, {STORAGE_SRID})
          AND ST_Within(ST_Transform(c.location, {srid}), p.geom)
         GROUP BY p.id"
    );

    (sql, params)
}

#[async_trait]
impl CentroidStore for PgCentroidStore {
    async fn sum_within(
        &self,
        polygons: &[(String, MultiPolygon<f64>)],
        srid: u32,
    ) -> Result<BTreeMap<String, CentroidSum>, GeoError> {
        if srid == 0 {
            return Err(GeoError::UnsupportedSrid { srid });
        }
        if polygons.is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(self.fetch_sums(polygons, srid).await?)
    }

    async fn sum_by_prefix(&self, level: FipsLevel) -> Result<BTreeMap<String, u64>, GeoError> {
        Ok(self.fetch_prefix_sums(level).await?)
    }
}
