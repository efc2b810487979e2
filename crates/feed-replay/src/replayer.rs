//! Single-dataset paced batch producer.

use std::time::Duration;

use feed_records::{Dataset, DEFAULT_TIMESTAMP_FIELD};
use tracing::trace;

use crate::batch::Batch;
use crate::ReplayError;

/// Lazily splits a dataset into fixed-size batches, shifting the timestamp
/// field of every emitted record and waiting `delay` between batches.
///
/// The source dataset is only borrowed; shifted values live in the emitted
/// batch copies. There is no trailing wait after the final batch.
#[derive(Debug)]
pub struct PacedReplayer<'a> {
    dataset: &'a Dataset,
    batch_size: usize,
    delay: Duration,
    time_offset: i64,
    timestamp_field: String,
    cursor: usize,
    step: usize,
}

impl<'a> PacedReplayer<'a> {
    pub fn new(
        dataset: &'a Dataset,
        batch_size: usize,
        delay: Duration,
        time_offset: i64,
    ) -> Result<Self, ReplayError> {
        if batch_size == 0 {
            return Err(ReplayError::Precondition(
                "batch_size must be at least 1".into(),
            ));
        }
        Ok(Self {
            dataset,
            batch_size,
            delay,
            time_offset,
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.into(),
            cursor: 0,
            step: 0,
        })
    }

    #[must_use]
    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = field.into();
        self
    }

    /// Total number of batches this replayer produces.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.dataset.len()
    }

    /// Produce the next batch, waiting out the pacing delay first unless this
    /// is the first batch. Returns `None` once every row has been emitted.
    ///
    /// Dropping the future during the wait leaves the cursor untouched.
    pub async fn next_batch(&mut self) -> Option<Batch> {
        if self.is_exhausted() {
            return None;
        }
        if self.step > 0 && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Some(self.take_batch())
    }

    fn take_batch(&mut self) -> Batch {
        let start = self.cursor;
        let end = (start + self.batch_size).min(self.dataset.len());
        let mut records = self.dataset.slice(start..end).to_vec();
        if self.time_offset != 0 {
            for record in &mut records {
                record.shift_timestamp(&self.timestamp_field, self.time_offset);
            }
        }
        let batch = Batch::new(self.step, start..end, records);
        trace!(
            dataset = self.dataset.name(),
            step = self.step,
            start,
            end,
            "emitting batch"
        );
        self.cursor = end;
        self.step += 1;
        batch
    }
}
