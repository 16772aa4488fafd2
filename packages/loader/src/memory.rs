//! In-memory [`RecordSink`] with simulated latency and fault injection.
//!
//! Backs `--dry-run` and the loader tests. Rows are keyed by the
//! canonical form of their unique key columns, so insert-or-ignore
//! semantics match the database sink.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::time::Duration;

use async_trait::async_trait;
use bonus_map_loader_models::{FieldValue, Record};

use crate::sink::{RecordSink, SinkError};

type IntegrityCheck<R> = Box<dyn Fn(&R) -> Option<String> + Send + Sync>;

/// Keyed in-memory table.
pub struct MemorySink<R: Record> {
    rows: BTreeMap<Vec<String>, Vec<FieldValue>>,
    per_record_latency: Duration,
    per_batch_latency: Duration,
    transient_failures: u32,
    reopen_failures: u32,
    integrity_check: Option<IntegrityCheck<R>>,
    session_open: bool,
    sessions_opened: u32,
    batch_sizes: Vec<usize>,
}

impl<R: Record> Default for MemorySink<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> MemorySink<R> {
    /// Creates an empty sink with no latency.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            per_record_latency: Duration::ZERO,
            per_batch_latency: Duration::ZERO,
            transient_failures: 0,
            reopen_failures: 0,
            integrity_check: None,
            session_open: false,
            sessions_opened: 0,
            batch_sizes: Vec::new(),
        }
    }

    /// Sleeps `latency` per record on every write.
    #[must_use]
    pub const fn with_record_latency(mut self, latency: Duration) -> Self {
        self.per_record_latency = latency;
        self
    }

    /// Sleeps `latency` once per write, on top of the per-record latency.
    #[must_use]
    pub const fn with_batch_latency(mut self, latency: Duration) -> Self {
        self.per_batch_latency = latency;
        self
    }

    /// Fails the next `count` writes with [`SinkError::Transient`].
    #[must_use]
    pub const fn with_transient_failures(mut self, count: u32) -> Self {
        self.transient_failures = count;
        self
    }

    /// Refuses the next `count` session reopens with
    /// [`SinkError::Transient`]. The first open always succeeds.
    #[must_use]
    pub const fn with_reopen_failures(mut self, count: u32) -> Self {
        self.reopen_failures = count;
        self
    }

    /// Rejects any batch containing a record for which `check` returns a
    /// message.
    #[must_use]
    pub fn with_integrity_check(
        mut self,
        check: impl Fn(&R) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.integrity_check = Some(Box::new(check));
        self
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if no rows are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stored rows in key order, values aligned with [`Record::COLUMNS`].
    pub fn rows(&self) -> impl Iterator<Item = &[FieldValue]> {
        self.rows.values().map(Vec::as_slice)
    }

    /// Sessions opened so far.
    #[must_use]
    pub const fn sessions_opened(&self) -> u32 {
        self.sessions_opened
    }

    /// Sizes of successful writes, in order.
    #[must_use]
    pub fn batch_sizes(&self) -> &[usize] {
        &self.batch_sizes
    }

    fn column_positions(columns: &[&str]) -> Result<Vec<usize>, SinkError> {
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
}

#[async_trait]
impl<R: Record> RecordSink<R> for MemorySink<R> {
    async fn open_session(&mut self) -> Result<(), SinkError> {
        if self.sessions_opened > 0 && self.reopen_failures > 0 {
            self.reopen_failures -= 1;
            return Err(SinkError::Transient {
                message: "connection refused".to_string(),
            });
        }
        self.session_open = true;
        self.sessions_opened += 1;
        Ok(())
    }

    async fn close_session(&mut self) -> Result<(), SinkError> {
        self.session_open = false;
        Ok(())
    }

    async fn insert_or_ignore(
        &mut self,
        unique_key: &[&str],
        update_fields: &[&str],
        records: &[R],
    ) -> Result<u64, SinkError> {
        if !self.session_open {
            return Err(SinkError::Transient {
                message: "no open session".to_string(),
            });
        }

        let latency = self.per_record_latency * u32::try_from(records.len()).unwrap_or(u32::MAX)
            + self.per_batch_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            self.session_open = false;
            return Err(SinkError::Transient {
                message: "connection reset by peer".to_string(),
            });
        }

        if let Some(check) = &self.integrity_check
            && let Some((offset, message)) = records
                .iter()
                .enumerate()
                .find_map(|(i, r)| check(r).map(|m| (i, m)))
        {
            return Err(SinkError::Integrity {
                offset: Some(offset),
                message,
            });
        }

        let key_positions = Self::column_positions(unique_key)?;
        let update_positions = Self::column_positions(update_fields)?;

        let mut affected = 0;
        for record in records {
            let values = record.values();
            let key = key_positions
                .iter()
                .map(|&i| values[i].key_repr())
                .collect::<Vec<_>>();

            match self.rows.entry(key) {
                Entry::Vacant(entry) => {
                    entry.insert(values);
                    affected += 1;
                }
                Entry::Occupied(mut entry) if !update_positions.is_empty() => {
                    let existing = entry.get_mut();
                    for &i in &update_positions {
                        existing[i] = values[i].clone();
                    }
                    affected += 1;
                }
                Entry::Occupied(_) => {}
            }
        }

        self.batch_sizes.push(records.len());
        Ok(affected)
    }
}
