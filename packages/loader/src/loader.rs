use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bonus_map_loader_models::{BatchReport, LoadState, LoadSummary, LoaderConfig, Record};
use futures::{Stream, StreamExt as _};
use tokio::time::Instant;

use crate::LoaderError;
use crate::progress::{LoadProgress, null_progress};
use crate::sink::{RecordSink, SinkError};
use crate::sizer::BatchSizer;

/// Mutable state of one load call.
struct Job {
    state: LoadState,
    sizer: BatchSizer,
    session_opened: Instant,
    session_reopens: u32,
    batch_count: u64,
    total_submitted: u64,
    rows_affected: u64,
    cancelled: bool,
}

/// Persists record streams in self-tuning batches.
pub struct AdaptiveBatchLoader {
    config: LoaderConfig,
    progress: Arc<dyn LoadProgress>,
    cancel: Arc<AtomicBool>,
}

impl AdaptiveBatchLoader {
    /// Creates a loader with no progress observer.
    #[must_use]
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            progress: null_progress(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reports lifecycle and per-batch events to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn LoadProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Stops between batches once `cancel` is set.
    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Loader parameters.
    #[must_use]
    pub const fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Writes every record from `records` to `sink`.
    ///
    /// Each batch is one atomic insert-or-ignore keyed on
    /// [`Record::UNIQUE_KEY`], so loading the same stream twice leaves the
    /// sink unchanged the second time.
    ///
    /// # Errors
    ///
    /// * [`LoaderError::InvalidConfig`] if the configuration is unusable.
    /// * [`LoaderError::DataIntegrity`] as soon as a batch violates a
    ///   constraint.
    /// * [`LoaderError::TransientExhausted`] when a batch still fails
    ///   after the configured retries.
    /// * [`LoaderError::Sink`] for any other sink failure.
    pub async fn load<R, S, K>(&self, mut records: S, sink: &mut K) -> Result<LoadSummary, LoaderError>
    where
        R: Record,
        S: Stream<Item = R> + Unpin,
        K: RecordSink<R> + ?Sized,
    {
        self.config.validate()?;

        let start = Instant::now();
        let mut job = Job {
            state: LoadState::Calibrating,
            sizer: BatchSizer::new(&self.config),
            session_opened: start,
            session_reopens: 0,
            batch_count: 0,
            total_submitted: 0,
            rows_affected: 0,
            cancelled: false,
        };
        log::debug!("{} load: starting in {}", R::TABLE, job.state);
        self.progress.on_state(job.state);

        let result = match sink.open_session().await {
            Ok(()) => {
                job.session_opened = Instant::now();
                self.run(&mut records, sink, &mut job).await
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            self.enter::<R>(&mut job, LoadState::Failed);
            log::error!("Load into {} failed: {e}", R::TABLE);
            if let Err(close) = sink.close_session().await {
                log::warn!("Error closing {} session after failure: {close}", R::TABLE);
            }
            return Err(e);
        }

        self.enter::<R>(&mut job, LoadState::Draining);
        if let Err(e) = sink.close_session().await {
            self.enter::<R>(&mut job, LoadState::Failed);
            log::error!("Closing {} session failed: {e}", R::TABLE);
            return Err(e.into());
        }
        self.enter::<R>(&mut job, LoadState::Done);

        let summary = LoadSummary {
            total_submitted: job.total_submitted,
            rows_affected: job.rows_affected,
            batch_count: job.batch_count,
            elapsed: start.elapsed(),
            final_batch_size: job.sizer.batch_size(),
            session_reopens: job.session_reopens,
            cancelled: job.cancelled,
        };

        log::info!(
            "Loaded {} into {} ({} rows affected) in {} batches over {:.2?}{}",
            summary.total_submitted,
            R::TABLE,
            summary.rows_affected,
            summary.batch_count,
            summary.elapsed,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        self.progress.on_finish(&summary);

        Ok(summary)
    }

    async fn run<R, S, K>(&self, records: &mut S, sink: &mut K, job: &mut Job) -> Result<(), LoaderError>
    where
        R: Record,
        S: Stream<Item = R> + Unpin,
        K: RecordSink<R> + ?Sized,
    {
        loop {
            if self.cancel.load(Ordering::Acquire) {
                log::warn!(
                    "Load into {} cancelled after {} batches",
                    R::TABLE,
                    job.batch_count
                );
                job.cancelled = true;
                return Ok(());
            }

            let batch: Vec<R> = records.by_ref().take(job.sizer.batch_size()).collect().await;
            if batch.is_empty() {
                return Ok(());
            }

            let (rows, elapsed) = self.write_batch(sink, job, &batch).await?;

            job.total_submitted += batch.len() as u64;
            job.rows_affected += rows;
            let next_batch_size = job.sizer.observe(batch.len(), elapsed);

            let report = BatchReport {
                index: job.batch_count,
                size: batch.len(),
                elapsed,
                rows_affected: rows,
                avg_secs_per_record: job.sizer.avg_secs_per_record(),
                next_batch_size,
                total_submitted: job.total_submitted,
                state: job.state,
            };
            log::debug!(
                "{} batch {}: {} records in {:.3?} ({} rows), next {}",
                R::TABLE,
                report.index,
                report.size,
                report.elapsed,
                report.rows_affected,
                report.next_batch_size
            );
            self.progress.on_batch(&report);
            job.batch_count += 1;

            if job.state == LoadState::Calibrating && !job.sizer.is_calibrating() {
                self.enter::<R>(job, LoadState::Steady);
            }

            if job.session_opened.elapsed() >= self.config.max_session_age() {
                log::debug!("{} session reached its age limit, reopening", R::TABLE);
                if let Err(e) = Self::reopen::<R, K>(sink, job).await {
                    if !e.is_transient() {
                        return Err(e.into());
                    }
                    log::warn!("Could not reopen {} session: {e}", R::TABLE);
                }
            }
        }
    }

    /// Writes one batch, retrying transient failures on a fresh session.
    async fn write_batch<R, K>(
        &self,
        sink: &mut K,
        job: &mut Job,
        batch: &[R],
    ) -> Result<(u64, Duration), LoaderError>
    where
        R: Record,
        K: RecordSink<R> + ?Sized,
    {
        let timeout = self.config.batch_timeout();
        let mut attempt = 0;
        let mut reopen_error: Option<SinkError> = None;

        loop {
            let started = Instant::now();
            let result = tokio::time::timeout(
                timeout,
                sink.insert_or_ignore(R::UNIQUE_KEY, R::UPDATE_FIELDS, batch),
            )
            .await
            .unwrap_or_else(|_| {
                Err(SinkError::Transient {
                    message: format!("batch timed out after {timeout:?}"),
                })
            });

            match result {
                Ok(rows) => return Ok((rows, started.elapsed())),
                Err(SinkError::Integrity { offset, message }) => {
                    let record = offset.and_then(|i| batch.get(i)).map_or_else(
                        || {
                            format!(
                                "{} records starting with {}",
                                batch.len(),
                                batch.first().map_or_else(String::new, R::describe)
                            )
                        },
                        R::describe,
                    );
                    return Err(LoaderError::DataIntegrity {
                        batch_index: job.batch_count,
                        record,
                        message,
                    });
                }
                Err(SinkError::Transient { message }) => {
                    attempt += 1;
                    if attempt > self.config.max_transient_retries {
                        let message = match reopen_error {
                            Some(e) => format!("{message}; last session reopen failed: {e}"),
                            None => message,
                        };
                        return Err(LoaderError::TransientExhausted {
                            batch_index: job.batch_count,
                            attempts: attempt,
                            message,
                        });
                    }

                    let backoff = self.config.retry_backoff(attempt);
                    log::warn!(
                        "{} batch {} failed ({message}), retry {attempt}/{} in {backoff:?}",
                        R::TABLE,
                        job.batch_count,
                        self.config.max_transient_retries
                    );
                    tokio::time::sleep(backoff).await;

                    reopen_error = match Self::reopen::<R, K>(sink, job).await {
                        Ok(()) => None,
                        Err(e) if e.is_transient() => {
                            log::warn!("Could not reopen {} session: {e}", R::TABLE);
                            Some(e)
                        }
                        Err(e) => return Err(e.into()),
                    };
                }
                Err(e @ SinkError::Other { .. }) => return Err(e.into()),
            }
        }
    }

    async fn reopen<R, K>(sink: &mut K, job: &mut Job) -> Result<(), SinkError>
    where
        R: Record,
        K: RecordSink<R> + ?Sized,
    {
        if let Err(e) = sink.close_session().await {
            log::warn!("Error closing {} session: {e}", R::TABLE);
        }
        job.session_reopens += 1;
        sink.open_session().await?;
        job.session_opened = Instant::now();
        Ok(())
    }

    fn enter<R: Record>(&self, job: &mut Job, state: LoadState) {
        log::debug!("{} load: {} -> {state}", R::TABLE, job.state);
        job.state = state;
        self.progress.on_state(state);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bonus_map_loader_models::FieldValue;
    use futures::stream;

    use super::*;
    use crate::memory::MemorySink;
    use crate::memory::tests::{Row, rows};

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<LoadState>>,
        batches: Mutex<Vec<BatchReport>>,
        cancel_after: Option<(u64, Arc<AtomicBool>)>,
    }

    impl Recorder {
        fn sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().iter().map(|b| b.size).collect()
        }

        fn states(&self) -> Vec<LoadState> {
            self.states.lock().unwrap().clone()
        }
    }

    impl LoadProgress for Recorder {
        fn on_state(&self, state: LoadState) {
            self.states.lock().unwrap().push(state);
        }

        fn on_batch(&self, report: &BatchReport) {
            self.batches.lock().unwrap().push(report.clone());
            if let Some((index, flag)) = &self.cancel_after
                && report.index == *index
            {
                flag.store(true, Ordering::Release);
            }
        }

        fn on_finish(&self, _summary: &LoadSummary) {}
    }

    fn loader(config: LoaderConfig, recorder: &Arc<Recorder>) -> AdaptiveBatchLoader {
        AdaptiveBatchLoader::new(config).with_progress(Arc::clone(recorder) as Arc<dyn LoadProgress>)
    }

    #[tokio::test(start_paused = true)]
    async fn converges_to_target_over_latency() {
        let recorder = Arc::new(Recorder::default());
        let mut sink = MemorySink::<Row>::new().with_record_latency(Duration::from_millis(10));

        let summary = loader(LoaderConfig::default(), &recorder)
            .load(stream::iter(rows(10_000)), &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.total_submitted, 10_000);
        assert_eq!(summary.rows_affected, 10_000);
        assert_eq!(sink.len(), 10_000);

        let sizes = recorder.sizes();
        assert_eq!(&sizes[..6], &[1, 2, 4, 8, 16, 32]);
        for pair in sizes[..6].windows(2) {
            assert!(pair[1] <= pair[0] * 2, "calibration growth {pair:?}");
        }
        let steady = &sizes[6..sizes.len() - 1];
        assert!(!steady.is_empty());
        for size in steady {
            assert!((95..=105).contains(size), "steady batch size {size}");
        }

        assert_eq!(
            recorder.states(),
            vec![
                LoadState::Calibrating,
                LoadState::Steady,
                LoadState::Draining,
                LoadState::Done
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn loading_twice_is_idempotent() {
        let mut sink = MemorySink::<Row>::new();

        let first = crate::load(stream::iter(rows(500)), &mut sink, LoaderConfig::default())
            .await
            .unwrap();
        let after_first = sink.len();
        let second = crate::load(stream::iter(rows(500)), &mut sink, LoaderConfig::default())
            .await
            .unwrap();

        assert_eq!(after_first, 500);
        assert_eq!(sink.len(), after_first);
        assert_eq!(first.rows_affected, 500);
        assert_eq!(second.rows_affected, 0);
        assert_eq!(second.total_submitted, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn integrity_violation_aborts_without_retry() {
        let recorder = Arc::new(Recorder::default());
        let mut sink = MemorySink::<Row>::new()
            .with_integrity_check(|r| (r.id == 37).then(|| "value violates check".to_string()));

        let err = loader(LoaderConfig::default(), &recorder)
            .load(stream::iter(rows(100)), &mut sink)
            .await
            .unwrap_err();

        match err {
            LoaderError::DataIntegrity {
                batch_index,
                record,
                message,
            } => {
                assert_eq!(batch_index, 5);
                assert_eq!(record, "row 37");
                assert_eq!(message, "value violates check");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(sink.batch_sizes().len(), 5);
        assert_eq!(sink.sessions_opened(), 1, "integrity errors are not retried");
        assert_eq!(recorder.states().last(), Some(&LoadState::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_on_fresh_session() {
        let mut sink = MemorySink::<Row>::new().with_transient_failures(2);

        let summary = crate::load(stream::iter(rows(50)), &mut sink, LoaderConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.total_submitted, 50);
        assert_eq!(summary.session_reopens, 2);
        assert_eq!(sink.sessions_opened(), 3);
        assert_eq!(sink.len(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_give_up_after_budget() {
        let mut sink = MemorySink::<Row>::new().with_transient_failures(100);
        let config = LoaderConfig {
            max_transient_retries: 3,
            ..LoaderConfig::default()
        };

        let err = crate::load(stream::iter(rows(10)), &mut sink, config)
            .await
            .unwrap_err();

        assert!(
            matches!(
                err,
                LoaderError::TransientExhausted {
                    batch_index: 0,
                    attempts: 4,
                    ..
                }
            ),
            "{err:?}"
        );
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_failed_reopens() {
        let mut sink = MemorySink::<Row>::new()
            .with_transient_failures(1)
            .with_reopen_failures(100);
        let config = LoaderConfig {
            max_transient_retries: 2,
            ..LoaderConfig::default()
        };

        let err = crate::load(stream::iter(rows(5)), &mut sink, config)
            .await
            .unwrap_err();

        match err {
            LoaderError::TransientExhausted { message, attempts, .. } => {
                assert_eq!(attempts, 3);
                assert!(message.contains("no open session"), "{message}");
                assert!(message.contains("connection refused"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_batches_time_out_as_transient() {
        let mut sink = MemorySink::<Row>::new().with_batch_latency(Duration::from_secs(600));
        let config = LoaderConfig {
            batch_timeout_secs: 5.0,
            max_transient_retries: 1,
            ..LoaderConfig::default()
        };

        let err = crate::load(stream::iter(rows(3)), &mut sink, config)
            .await
            .unwrap_err();

        match err {
            LoaderError::TransientExhausted { message, attempts, .. } => {
                assert_eq!(attempts, 2);
                assert!(message.contains("timed out"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn session_is_reopened_when_old() {
        let mut sink = MemorySink::<Row>::new().with_record_latency(Duration::from_millis(10));
        let config = LoaderConfig {
            max_session_age_secs: 0.5,
            ..LoaderConfig::default()
        };

        let summary = crate::load(stream::iter(rows(300)), &mut sink, config)
            .await
            .unwrap();

        assert!(summary.session_reopens > 0);
        assert_eq!(sink.sessions_opened(), summary.session_reopens + 1);
        assert_eq!(sink.len(), 300);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_between_batches() {
        let cancel = Arc::new(AtomicBool::new(false));
        let recorder = Arc::new(Recorder {
            cancel_after: Some((2, Arc::clone(&cancel))),
            ..Recorder::default()
        });
        let mut sink = MemorySink::<Row>::new();

        let summary = loader(LoaderConfig::default(), &recorder)
            .with_cancel(cancel)
            .load(stream::iter(rows(1_000)), &mut sink)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.batch_count, 3);
        assert_eq!(summary.total_submitted, 7);
        assert_eq!(sink.len(), 7);
        assert_eq!(recorder.states().last(), Some(&LoadState::Done));
    }

    #[tokio::test]
    async fn empty_stream_finishes_immediately() {
        let mut sink = MemorySink::<Row>::new();
        let summary = crate::load(stream::iter(Vec::<Row>::new()), &mut sink, LoaderConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.batch_count, 0);
        assert_eq!(summary.total_submitted, 0);
        assert_eq!(summary.final_batch_size, 1);
        assert_eq!(sink.sessions_opened(), 1);
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let mut sink = MemorySink::<Row>::new();
        let config = LoaderConfig {
            smoothing_alpha: 0.0,
            ..LoaderConfig::default()
        };

        let err = crate::load(stream::iter(rows(1)), &mut sink, config)
            .await
            .unwrap_err();

        assert!(matches!(err, LoaderError::InvalidConfig(_)));
        assert_eq!(sink.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn update_fields_flow_to_sink() {
        #[derive(Clone)]
        struct Upserted(Row);

        impl Record for Upserted {
            const TABLE: &'static str = "rows";
            const COLUMNS: &'static [&'static str] = Row::COLUMNS;
            const UNIQUE_KEY: &'static [&'static str] = Row::UNIQUE_KEY;
            const UPDATE_FIELDS: &'static [&'static str] = &["value"];

            fn values(&self) -> Vec<FieldValue> {
                self.0.values()
            }

            fn describe(&self) -> String {
                self.0.describe()
            }
        }

        let mut sink = MemorySink::<Upserted>::new();
        let original: Vec<_> = rows(3).into_iter().map(Upserted).collect();
        crate::load(stream::iter(original), &mut sink, LoaderConfig::default())
            .await
            .unwrap();

        let changed = vec![Upserted(Row {
            id: 2,
            value: "new".to_string(),
        })];
        let summary = crate::load(stream::iter(changed), &mut sink, LoaderConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.rows_affected, 1);
        let last: Vec<_> = sink.rows().last().unwrap().to_vec();
        assert_eq!(last[1], FieldValue::Text("new".to_string()));
    }
}
