//! Main processing engine.
//!
//! Runs each source log through fetch, decompression, decoding, masking and
//! dispatch, then commits the per-date outputs, or aborts every one of them
//! if anything fatal happened along the way. Many source objects are
//! processed concurrently, each on its own blocking task.

pub mod dispatcher;
pub mod writer;

#[cfg(test)]
pub mod tests;

use self::dispatcher::{Completion, LogDispatcher};

use crate::config::MaskerConfig;
use crate::decoder::RecordDecoder;
use crate::error::{MaskerError, Result};
use crate::masking::FieldMasker;
use crate::models::{BatchSummary, ProcessOutcome, ProcessingStats};
use crate::storage::{ObjectLocation, ObjectStore};

use flate2::read::MultiGzDecoder;
use futures::stream::{self, StreamExt};
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Instant;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Masks CloudFront access logs from one bucket into another
pub struct LogProcessor {
    store: Arc<dyn ObjectStore>,
    config: MaskerConfig,
    masker: FieldMasker,
    cancellation_token: CancellationToken,
}

impl LogProcessor {
    pub fn new(store: Arc<dyn ObjectStore>, config: MaskerConfig) -> Self {
        let masker = FieldMasker::new(config.masked_fields.iter().cloned());
        Self {
            store,
            config,
            masker,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Stop work once `token` is cancelled.
    ///
    /// Objects in flight abort their outputs at the next row; objects not
    /// yet started fail with [`MaskerError::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn config(&self) -> &MaskerConfig {
        &self.config
    }

    fn check_cancelled(&self, key: &str) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(MaskerError::Cancelled {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Mask one source object into its per-date outputs.
    ///
    /// Blocks on store I/O; async callers go through
    /// [`LogProcessor::process_objects`].
    pub fn process_object(&self, key: &str) -> Result<ProcessOutcome> {
        let start_time = Instant::now();
        let source = ObjectLocation::new(&self.config.source_bucket, key);
        debug!("Processing {}", source);

        let input = match self.store.get(&source) {
            Ok(input) => input,
            Err(e) if e.is_not_found() => {
                warn!("Source object {} no longer exists; skipping", source);
                return Ok(ProcessOutcome::Missing);
            }
            Err(e) => return Err(e.into()),
        };

        // no output exists until the field list has been read
        let decoder = RecordDecoder::new(BufReader::new(MultiGzDecoder::new(input)), key)?;
        let mut dispatcher = LogDispatcher::new(
            Arc::clone(&self.store),
            &self.config.destination_bucket,
            &self.config.destination_key_prefix,
            key,
            Arc::clone(decoder.schema()),
        )
        .with_date_column(&self.config.date_column)
        .with_options(self.config.sink_options());

        let mut stats = ProcessingStats::default();
        let result = self.mask_rows(key, decoder, &mut dispatcher, &mut stats);
        let completion = match result {
            Ok(()) => Completion::Commit,
            Err(_) => Completion::Abort,
        };
        let summary = dispatcher.finish(completion);

        if let Err(e) = result {
            error!(
                "Aborted {} outputs of {} after {} rows: {}",
                summary.aborted.len(),
                source,
                stats.rows_read,
                e
            );
            return Err(e);
        }

        stats.outputs_committed = summary.committed.len();
        stats.outputs_failed = summary.failed.len();
        if !summary.failed.is_empty() {
            return Err(MaskerError::PartialCommit {
                key: key.to_string(),
                failed: summary.failed,
            });
        }

        info!(
            "Masked {} into {} outputs: {} rows written, {} skipped ({}ms)",
            source,
            stats.outputs_committed,
            stats.rows_written,
            stats.rows_skipped,
            start_time.elapsed().as_millis()
        );
        Ok(ProcessOutcome::Processed(stats))
    }

    fn mask_rows<R: BufRead>(
        &self,
        key: &str,
        decoder: RecordDecoder<R>,
        dispatcher: &mut LogDispatcher,
        stats: &mut ProcessingStats,
    ) -> Result<()> {
        for record in decoder {
            self.check_cancelled(key)?;
            let row = match record {
                Ok(row) => row,
                Err(e) if e.is_row_level() => {
                    warn!("Skipping record of {}: {}", key, e);
                    stats.rows_read += 1;
                    stats.rows_skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            stats.rows_read += 1;

            let masked = self.masker.mask(row)?;
            if dispatcher.write_row(&masked)? {
                stats.rows_written += 1;
            } else {
                stats.rows_skipped += 1;
            }
        }
        Ok(())
    }

    /// Delete the source object a masked output was produced from.
    ///
    /// Returns the deleted source key, or `None` if `masked_key` does not
    /// follow the output key layout.
    pub fn remove_source(&self, masked_key: &str) -> Result<Option<String>> {
        let Some(source_key) =
            dispatcher::source_key(&self.config.destination_key_prefix, masked_key)
        else {
            warn!(
                "{} is not a masked access log key (prefix '{}'); not removing anything",
                masked_key, self.config.destination_key_prefix
            );
            return Ok(None);
        };

        let source = ObjectLocation::new(&self.config.source_bucket, &source_key);
        self.store.delete(&source)?;
        info!("Removed {} (masked as {})", source, masked_key);
        Ok(Some(source_key))
    }

    /// Mask many source objects, at most `max_concurrent_objects` at once.
    ///
    /// Failures are logged and counted; one failed object does not stop
    /// the others. Returns once every started object has committed or
    /// aborted, even after cancellation.
    pub async fn process_objects(self: &Arc<Self>, keys: Vec<String>) -> BatchSummary {
        let results = self
            .run_blocking(keys, |processor, key| processor.process_object(key))
            .await;

        let mut summary = BatchSummary::default();
        for (key, result) in results {
            match result {
                Ok(ProcessOutcome::Processed(stats)) => {
                    summary.objects_processed += 1;
                    summary.rows_written += stats.rows_written;
                    summary.rows_skipped += stats.rows_skipped;
                }
                Ok(ProcessOutcome::Missing) => summary.objects_missing += 1,
                Err(e) => {
                    error!("Failed to mask {}: {}", key, e);
                    summary.objects_failed += 1;
                }
            }
        }
        summary
    }

    /// Remove the sources of many masked outputs.
    ///
    /// Keys outside the output layout are counted as missing.
    pub async fn remove_sources(self: &Arc<Self>, masked_keys: Vec<String>) -> BatchSummary {
        let results = self
            .run_blocking(masked_keys, |processor, key| processor.remove_source(key))
            .await;

        let mut summary = BatchSummary::default();
        for (key, result) in results {
            match result {
                Ok(Some(_)) => summary.objects_processed += 1,
                Ok(None) => summary.objects_missing += 1,
                Err(e) => {
                    error!("Failed to remove the source of {}: {}", key, e);
                    summary.objects_failed += 1;
                }
            }
        }
        summary
    }

    async fn run_blocking<T, F>(
        self: &Arc<Self>,
        keys: Vec<String>,
        job: F,
    ) -> Vec<(String, Result<T>)>
    where
        T: Send + 'static,
        F: Fn(&LogProcessor, &str) -> Result<T> + Send + Sync + Copy + 'static,
    {
        let concurrency = self.config.max_concurrent_objects.max(1);
        debug!(
            "Processing {} objects with up to {} at a time",
            keys.len(),
            concurrency
        );

        stream::iter(keys)
            .map(|key| {
                let processor = Arc::clone(self);
                async move {
                    if let Err(e) = processor.check_cancelled(&key) {
                        return (key, Err(e));
                    }
                    let task_key = key.clone();
                    let result = task::spawn_blocking(move || job(&*processor, task_key.as_str()))
                        .await
                        .unwrap_or_else(|e| {
                            Err(MaskerError::TaskFailed {
                                key: key.clone(),
                                reason: e.to_string(),
                            })
                        });
                    (key, result)
                }
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .await
    }
}

impl std::fmt::Debug for LogProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogProcessor")
            .field("config", &self.config)
            .field("masker", &self.masker)
            .finish()
    }
}
