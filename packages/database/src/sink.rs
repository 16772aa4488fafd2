//! Postgres [`RecordSink`] for the adaptive batch loader.
//!
//! Each batch becomes one multi-row `INSERT ... ON CONFLICT` statement,
//! or several inside a single transaction when the batch exceeds the
//! bind parameter limit, so a batch is always applied atomically.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use bonus_map_loader::{RecordSink, SinkError};
use bonus_map_loader_models::{FieldValue, Record};
use switchy_database::{Database, DatabaseValue};

use crate::{DbError, PG_MAX_PARAMS, db, is_integrity_message, is_transient_message};

/// Writes records of type `R` to their table over a scoped session.
///
/// A session is a dedicated connection opened by
/// [`RecordSink::open_session`] and dropped by
/// [`RecordSink::close_session`].
pub struct PgRecordSink<R: Record> {
    url: String,
    statement_timeout: Duration,
    session: Option<Box<dyn Database>>,
    _record: PhantomData<fn(R)>,
}

impl<R: Record> PgRecordSink<R> {
    /// Creates a sink that connects to `url` on demand.
    #[must_use]
    pub fn new(url: impl Into<String>, statement_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            statement_timeout,
            session: None,
            _record: PhantomData,
        }
    }

    /// Creates a sink for `DATABASE_URL`.
    #[must_use]
    pub fn from_env(statement_timeout: Duration) -> Self {
        Self::new(db::database_url(), statement_timeout)
    }
}

fn classify(e: &DbError) -> SinkError {
    let message = e.to_string();
    match e {
        DbError::Connection { .. } => SinkError::Transient { message },
        _ if is_integrity_message(&message) => SinkError::Integrity {
            offset: None,
            message,
        },
        _ if is_transient_message(&message) => SinkError::Transient { message },
        _ => SinkError::Other { message },
    }
}

/// Appends the SQL expression for `value` and pushes its bind
/// parameters. Geometry values expand to `PostGIS` constructors.
fn push_value(sql: &mut String, params: &mut Vec<DatabaseValue>, value: &FieldValue) {
    let n = params.len() + 1;
    match value {
        FieldValue::Text(s) => {
            let _ = write!(sql, "${n}::text");
            params.push(DatabaseValue::String(s.clone()));
        }
        FieldValue::Int(i) => {
            let _ = write!(sql, "${n}::bigint");
            params.push(DatabaseValue::Int64(*i));
        }
        FieldValue::Real(r) => {
            let _ = write!(sql, "${n}::float8");
            params.push(DatabaseValue::Real64(*r));
        }
        FieldValue::Null => sql.push_str("NULL"),
        FieldValue::MultiPolygon { geojson, srid } => {
            let _ = write!(
                sql,
                "ST_Multi(ST_SetSRID(ST_GeomFromGeoJSON(${n}::text), {srid}))"
            );
            params.push(DatabaseValue::String(geojson.clone()));
        }
        FieldValue::Point { lon, lat, srid } => {
            let _ = write!(
                sql,
                "ST_SetSRID(ST_MakePoint(${n}::float8, ${}::float8), {srid})",
                n + 1
            );
            params.push(DatabaseValue::Real64(*lon));
            params.push(DatabaseValue::Real64(*lat));
        }
    }
}

/// Number of bind parameters a row occupies.
fn param_count(values: &[FieldValue]) -> usize {
    values
        .iter()
        .map(|v| match v {
            FieldValue::Null => 0,
            FieldValue::Point { .. } => 2,
            _ => 1,
        })
        .sum()
}

/// Builds one `INSERT ... ON CONFLICT` statement for `rows`.
fn insert_sql(
    table: &str,
    columns: &[&str],
    unique_key: &[&str],
    update_fields: &[&str],
    rows: &[Vec<FieldValue>],
) -> (String, Vec<DatabaseValue>) {
    let mut sql = format!("INSERT INTO {table} ({}) VALUES ", columns.join(", "));
    let mut params = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (j, value) in row.iter().enumerate() {
            if j > 0 {
                sql.push_str(", ");
            }
            push_value(&mut sql, &mut params, value);
        }
        sql.push(')');
    }

    let _ = write!(sql, " ON CONFLICT ({}) ", unique_key.join(", "));
    if update_fields.is_empty() {
        sql.push_str("DO NOTHING");
    } else {
        let set = update_fields
            .iter()
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(sql, "DO UPDATE SET {set}");
    }

    (sql, params)
}

/// Keeps the last row per unique key. Postgres rejects a `DO UPDATE`
/// statement that touches the same row twice.
fn dedupe_last(key_positions: &[usize], rows: Vec<Vec<FieldValue>>) -> Vec<Vec<FieldValue>> {
    let mut by_key: BTreeMap<Vec<String>, (usize, Vec<FieldValue>)> = BTreeMap::new();
    for (i, row) in rows.into_iter().enumerate() {
        let key = key_positions.iter().map(|&p| row[p].key_repr()).collect();
        by_key.insert(key, (i, row));
    }
    let mut kept: Vec<_> = by_key.into_values().collect();
    kept.sort_by_key(|(i, _)| *i);
    kept.into_iter().map(|(_, row)| row).collect()
}

/// Splits `rows` into statements that each fit under the bind parameter
/// limit.
fn chunk_rows(rows: &[Vec<FieldValue>]) -> Vec<&[Vec<FieldValue>]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (i, row) in rows.iter().enumerate() {
        let count = param_count(row);
        if i > start && used + count > PG_MAX_PARAMS {
            chunks.push(&rows[start..i]);
            start = i;
            used = 0;
        }
        used += count;
    }
    if start < rows.len() {
        chunks.push(&rows[start..]);
    }
    chunks
}

fn positions<R: Record>(columns: &[&str]) -> Result<Vec<usize>, SinkError> {
    columns
        .iter()
        .map(|name| {
            R::COLUMNS
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| SinkError::Other {
                    message: format!("Unknown column {name} for table {}", R::TABLE),
                })
        })
        .collect()
}

async fn write_chunks(
    db: &dyn Database,
    statements: Vec<(String, Vec<DatabaseValue>)>,
) -> Result<u64, DbError> {
    if let [(sql, params)] = statements.as_slice() {
        return Ok(db.exec_raw_params(sql, params).await?);
    }

    let txn = db.begin_transaction().await?;
    let mut affected = 0;
    for (sql, params) in &statements {
        match txn.exec_raw_params(sql, params).await {
            Ok(n) => affected += n,
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    log::warn!("Rollback failed: {rollback}");
                }
                return Err(e.into());
            }
        }
    }
    txn.commit().await?;
    Ok(affected)
}

#[async_trait]
impl<R: Record> RecordSink<R> for PgRecordSink<R> {
    async fn open_session(&mut self) -> Result<(), SinkError> {
        self.session = None;
        let db = db::connect(&self.url, self.statement_timeout)
            .await
            .map_err(|e| classify(&e))?;
        log::debug!("Opened session for {}", R::TABLE);
        self.session = Some(db);
        Ok(())
    }

    async fn close_session(&mut self) -> Result<(), SinkError> {
        if self.session.take().is_some() {
            log::debug!("Closed session for {}", R::TABLE);
        }
        Ok(())
    }

    async fn insert_or_ignore(
        &mut self,
        unique_key: &[&str],
        update_fields: &[&str],
        records: &[R],
    ) -> Result<u64, SinkError> {
        let Some(db) = self.session.as_deref() else {
            return Err(SinkError::Transient {
                message: "no open session".to_string(),
            });
        };
        if records.is_empty() {
            return Ok(0);
        }

        let key_positions = positions::<R>(unique_key)?;
        positions::<R>(update_fields)?;

        let mut rows: Vec<Vec<FieldValue>> = records.iter().map(Record::values).collect();
        if !update_fields.is_empty() {
            rows = dedupe_last(&key_positions, rows);
        }

        let statements = chunk_rows(&rows)
            .into_iter()
            .map(|chunk| insert_sql(R::TABLE, R::COLUMNS, unique_key, update_fields, chunk))
            .collect();

        write_chunks(db, statements).await.map_err(|e| classify(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    #[test]
    fn builds_insert_or_ignore() {
        let rows = vec![
            vec![text("a"), FieldValue::Int(1), FieldValue::Null],
            vec![text("b"), FieldValue::Int(2), FieldValue::Real(0.5)],
        ];
        let (sql, params) = insert_sql("t", &["id", "n", "r"], &["id"], &[], &rows);

        assert_eq!(
            sql,
            "INSERT INTO t (id, n, r) VALUES ($1::text, $2::bigint, NULL), \
             ($3::text, $4::bigint, $5::float8) ON CONFLICT (id) DO NOTHING"
        );
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn builds_upsert_for_update_fields() {
        let rows = vec![vec![text("a"), FieldValue::Int(1)]];
        let (sql, _) = insert_sql("t", &["id", "n"], &["id"], &["n"], &rows);
        assert!(sql.ends_with("ON CONFLICT (id) DO UPDATE SET n = EXCLUDED.n"), "{sql}");
    }

    #[test]
    fn geometry_values_use_postgis_constructors() {
        let rows = vec![vec![
            FieldValue::Point {
                lon: -87.6,
                lat: 41.8,
                srid: 4326,
            },
            FieldValue::MultiPolygon {
                geojson: "{}".to_string(),
                srid: 4326,
            },
        ]];
        let (sql, params) = insert_sql("t", &["location", "geom"], &["location"], &[], &rows);

        assert!(sql.contains("ST_SetSRID(ST_MakePoint($1::float8, $2::float8), 4326)"), "{sql}");
        assert!(sql.contains("ST_Multi(ST_SetSRID(ST_GeomFromGeoJSON($3::text), 4326))"), "{sql}");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn chunks_respect_parameter_limit() {
        let row = vec![text("a"), FieldValue::Int(1), FieldValue::Null];
        // Two params per row: 32_767 rows fill one statement.
        let rows = vec![row; PG_MAX_PARAMS - 1];
        let chunks = chunk_rows(&rows);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), PG_MAX_PARAMS / 2);
        assert_eq!(chunks[1].len(), PG_MAX_PARAMS / 2);
        assert!(chunk_rows(&[]).is_empty());
    }

    #[test]
    fn dedupe_keeps_last_row_per_key() {
        let rows = vec![
            vec![text("a"), FieldValue::Int(1)],
            vec![text("b"), FieldValue::Int(2)],
            vec![text("a"), FieldValue::Int(3)],
        ];
        let kept = dedupe_last(&[0], rows);
        assert_eq!(
            kept,
            vec![
                vec![text("b"), FieldValue::Int(2)],
                vec![text("a"), FieldValue::Int(3)],
            ]
        );
    }

    #[test]
    fn classifies_driver_errors() {
        let integrity = classify(&DbError::Conversion {
            message: "duplicate key value violates unique constraint".to_string(),
        });
        assert!(matches!(integrity, SinkError::Integrity { .. }));

        let transient = classify(&DbError::Connection {
            message: "refused".to_string(),
        });
        assert!(transient.is_transient());

        let other = classify(&DbError::Conversion {
            message: "relation does not exist".to_string(),
        });
        assert!(matches!(other, SinkError::Other { .. }));
    }
}
