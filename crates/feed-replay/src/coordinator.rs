//! Lockstep driver for the transactions and labels streams.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use feed_records::{Dataset, PairedDataset};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::batch::Batch;
use crate::config::ReplaySettings;
use crate::replayer::PacedReplayer;
use crate::sink::Sink;
use crate::ReplayError;

/// Receives `(processed, total)` after every delivered step.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, processed: usize, total: usize);
}

/// Transaction rows delivered so far in the current session.
#[derive(Debug, Default)]
pub struct Progress {
    processed: AtomicUsize,
    total: AtomicUsize,
}

impl Progress {
    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    fn reset(&self, total: usize) {
        self.processed.store(0, Ordering::Release);
        self.total.store(total, Ordering::Release);
    }

    fn advance(&self, rows: usize) -> usize {
        self.processed.fetch_add(rows, Ordering::AcqRel) + rows
    }
}

/// Outcome of one replay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub session_id: Uuid,
    /// Seconds added to every timestamp field in this session.
    pub time_offset: i64,
    /// Steps whose transactions and labels were both delivered.
    pub steps: usize,
    /// Transaction rows delivered.
    pub records: usize,
    pub cancelled: bool,
}

/// Current wall clock as whole epoch seconds.
#[must_use]
pub fn now_epoch_seconds() -> i64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    i64::try_from(secs).unwrap_or(i64::MAX)
}

fn delay_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Replays paired datasets into a sink, one transactions batch then its
/// labels batch per step, paced by the transactions stream.
pub struct ReplayCoordinator<S: Sink + ?Sized> {
    settings: ReplaySettings,
    sink: Arc<S>,
    progress: Arc<Progress>,
    observer: Option<Arc<dyn ProgressObserver>>,
    cancel: CancellationToken,
}

impl<S> ReplayCoordinator<S>
where
    S: Sink + ?Sized,
{
    pub fn new(settings: ReplaySettings, sink: Arc<S>) -> Result<Self, ReplayError> {
        settings.validate()?;
        Ok(Self {
            settings,
            sink,
            progress: Arc::new(Progress::default()),
            observer: None,
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Stop the replay at the next step boundary once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn settings(&self) -> &ReplaySettings {
        &self.settings
    }

    /// Pair two loaded datasets and replay them anchored at the current time.
    pub async fn coordinate_datasets(
        &self,
        transactions: Dataset,
        labels: Dataset,
    ) -> Result<ReplayReport, ReplayError> {
        let datasets = PairedDataset::new(transactions, labels)?;
        self.coordinate(&datasets).await
    }

    /// Replay anchored at the wall clock, captured once for the whole session.
    pub async fn coordinate(&self, datasets: &PairedDataset) -> Result<ReplayReport, ReplayError> {
        self.coordinate_at(datasets, now_epoch_seconds()).await
    }

    /// Replay with an explicit timestamp offset.
    pub async fn coordinate_at(
        &self,
        datasets: &PairedDataset,
        time_offset: i64,
    ) -> Result<ReplayReport, ReplayError> {
        let settings = &self.settings;
        let mut transactions = PacedReplayer::new(
            datasets.transactions(),
            settings.batch_size,
            settings.delay,
            time_offset,
        )?
        .with_timestamp_field(settings.timestamp_field.as_str());
        let mut labels = PacedReplayer::new(
            datasets.labels(),
            settings.batch_size,
            Duration::ZERO,
            time_offset,
        )?
        .with_timestamp_field(settings.timestamp_field.as_str());

        let total = datasets.len();
        self.progress.reset(total);
        let mut report = ReplayReport {
            session_id: Uuid::new_v4(),
            time_offset,
            steps: 0,
            records: 0,
            cancelled: false,
        };
        info!(
            session_id = %report.session_id,
            time_offset,
            rows = total,
            batches = transactions.batch_count(),
            batch_size = settings.batch_size,
            delay_ms = delay_millis(settings.delay),
            "starting paired replay"
        );

        loop {
            let step = report.steps;
            let next_transactions = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    report.cancelled = true;
                    warn!(
                        session_id = %report.session_id,
                        step,
                        records = report.records,
                        "replay cancelled at step boundary"
                    );
                    return Ok(report);
                }
                batch = transactions.next_batch() => batch,
            };
            let next_labels = labels.next_batch().await;

            let (transactions_batch, labels_batch) = match (next_transactions, next_labels) {
                (None, None) => break,
                (Some(transactions_batch), Some(labels_batch)) => {
                    (transactions_batch, labels_batch)
                }
                (left, right) => {
                    error!(
                        session_id = %report.session_id,
                        step,
                        transactions_exhausted = left.is_none(),
                        labels_exhausted = right.is_none(),
                        "paired streams diverged"
                    );
                    return Err(ReplayError::ExhaustionMismatch { step });
                }
            };

            self.deliver(&report.session_id, &transactions_batch, &labels_batch)
                .await?;

            report.steps += 1;
            report.records += transactions_batch.len();
            let processed = self.progress.advance(transactions_batch.len());
            if let Some(observer) = &self.observer {
                observer.on_progress(processed, total);
            }
        }

        info!(
            session_id = %report.session_id,
            steps = report.steps,
            records = report.records,
            "paired replay complete"
        );
        Ok(report)
    }

    async fn deliver(
        &self,
        session_id: &Uuid,
        transactions: &Batch,
        labels: &Batch,
    ) -> Result<(), ReplayError> {
        let step = transactions.step();
        let destinations = &self.settings.destinations;

        if let Err(source) = self
            .sink
            .upload(&destinations.transactions, transactions)
            .await
        {
            error!(
                %session_id,
                step,
                destination = %destinations.transactions,
                error = %source,
                "transactions delivery failed"
            );
            return Err(ReplayError::Delivery {
                step,
                destination: destinations.transactions.clone(),
                source,
            });
        }

        if let Err(source) = self.sink.upload(&destinations.labels, labels).await {
            error!(
                %session_id,
                step,
                delivered = %destinations.transactions,
                destination = %destinations.labels,
                error = %source,
                "labels delivery failed after transactions were delivered"
            );
            return Err(ReplayError::PartialDelivery {
                step,
                delivered: destinations.transactions.clone(),
                failed: destinations.labels.clone(),
                source,
            });
        }

        debug!(
            %session_id,
            step,
            start = transactions.range().start,
            end = transactions.range().end,
            rows = transactions.len(),
            "delivered paired batch"
        );
        Ok(())
    }
}
