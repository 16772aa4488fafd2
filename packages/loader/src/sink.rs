//! Destinations the loader writes batches to.

use async_trait::async_trait;
use bonus_map_loader_models::Record;
use thiserror::Error;

/// Failure of a single sink call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// A constraint rejected the batch. Retrying cannot help.
    #[error("Integrity violation: {message}")]
    Integrity {
        /// Position of the offending record in the batch, when the sink
        /// can tell.
        offset: Option<usize>,
        /// Description of the violation.
        message: String,
    },

    /// Connection dropped or the call timed out; retrying with a fresh
    /// session may succeed.
    #[error("Transient sink error: {message}")]
    Transient {
        /// Description of what went wrong.
        message: String,
    },

    /// Anything else.
    #[error("Sink error: {message}")]
    Other {
        /// Description of what went wrong.
        message: String,
    },
}

impl SinkError {
    /// Returns `true` for errors worth retrying with a fresh session.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// A table-like destination supporting atomic bulk insert-or-ignore.
///
/// Calls are scoped to an explicitly opened session. The loader holds a
/// sink by `&mut`, so at most one batch is in flight per sink.
#[async_trait]
pub trait RecordSink<R: Record>: Send {
    /// Opens a session. Called before the first batch and after every
    /// close.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the session cannot be established.
    async fn open_session(&mut self) -> Result<(), SinkError>;

    /// Closes the current session, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the session cannot be closed cleanly.
    async fn close_session(&mut self) -> Result<(), SinkError>;

    /// Writes `records` atomically. Rows conflicting on `unique_key` are
    /// left alone when `update_fields` is empty, otherwise those columns
    /// are overwritten.
    ///
    /// Returns the number of rows inserted or updated.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`]; on error nothing from the batch is kept.
    async fn insert_or_ignore(
        &mut self,
        unique_key: &[&str],
        update_fields: &[&str],
        records: &[R],
    ) -> Result<u64, SinkError>;
}
