#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Adaptive batch loader.
//!
//! Persists a long, possibly lazily produced stream of [`Record`]s through
//! a [`RecordSink`] using atomic insert-or-ignore batches. The batch size
//! is tuned after every write so each batch approaches a target duration,
//! which keeps throughput high on fast servers without producing
//! statement-timeout sized batches on slow ones.
//!
//! ```text
//! CALIBRATING -> STEADY -> DRAINING -> DONE
//!      \____________\__________\______> FAILED
//! ```

pub mod memory;
pub mod progress;
pub mod sink;
pub mod sizer;

mod loader;

pub use bonus_map_loader_models::{
    BatchReport, ConfigError, LoadState, LoadSummary, LoaderConfig, Record,
};
pub use loader::AdaptiveBatchLoader;
pub use memory::MemorySink;
pub use progress::{LoadProgress, NullProgress};
pub use sink::{RecordSink, SinkError};

use futures::Stream;
use thiserror::Error;

/// Errors that abort a load.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// A batch violated a constraint. Not retried.
    #[error("Data integrity violation in batch {batch_index} ({record}): {message}")]
    DataIntegrity {
        /// Zero-based index of the failing batch.
        batch_index: u64,
        /// Description of the offending record.
        record: String,
        /// Sink error message.
        message: String,
    },

    /// A batch kept failing with transient errors.
    #[error("Batch {batch_index} failed after {attempts} attempts: {message}")]
    TransientExhausted {
        /// Zero-based index of the failing batch.
        batch_index: u64,
        /// Attempts made, including the first.
        attempts: u32,
        /// Last error message.
        message: String,
    },

    /// Sink failed outside a retryable write.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Loader configuration is unusable.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

/// Loads `records` into `sink` with the given configuration and no
/// progress observer.
///
/// # Errors
///
/// See [`AdaptiveBatchLoader::load`].
pub async fn load<R, S, K>(
    records: S,
    sink: &mut K,
    config: LoaderConfig,
) -> Result<LoadSummary, LoaderError>
where
    R: Record,
    S: Stream<Item = R> + Unpin,
    K: RecordSink<R> + ?Sized,
{
    AdaptiveBatchLoader::new(config).load(records, sink).await
}
