//! Delivery contract for replayed batches and an in-memory recording sink.

use std::ops::Range;

use async_trait::async_trait;
use feed_records::Record;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::batch::Batch;

/// Errors surfaced by a sink. None of them are retried by the coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The request never completed (connection, TLS, timeout).
    #[error("transport failure: {0}")]
    Transport(String),
    /// The endpoint answered with a non-success status.
    #[error("endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("serialization failure: {0}")]
    Serialization(String),
    #[error("I/O error: {0}")]
    Io(String),
    /// The sink refused the batch for a reason of its own.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Destination accepting one batch per call.
///
/// The returned future resolves once delivery has completed or failed.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn upload(&self, destination: &str, batch: &Batch) -> Result<(), SinkError>;
}

/// Delivery captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct SinkCall {
    pub destination: String,
    pub step: usize,
    pub range: Range<usize>,
    pub records: Vec<Record>,
    /// Runtime clock reading when the call arrived.
    pub received_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScriptedFailure {
    destination: String,
    step: usize,
    error: SinkError,
}

/// In-memory sink for tests and dry runs; can be scripted to fail.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    failures: Mutex<Vec<ScriptedFailure>>,
}

impl RecordingSink {
    /// Fail the upload of `step` to `destination` with `error`, once.
    pub async fn fail_on(&self, destination: impl Into<String>, step: usize, error: SinkError) {
        self.failures.lock().await.push(ScriptedFailure {
            destination: destination.into(),
            step,
            error,
        });
    }

    /// Successful deliveries in arrival order.
    pub async fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().await.clone()
    }

    /// Successful deliveries to one destination.
    pub async fn calls_to(&self, destination: &str) -> Vec<SinkCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.destination == destination)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn upload(&self, destination: &str, batch: &Batch) -> Result<(), SinkError> {
        let mut failures = self.failures.lock().await;
        if let Some(index) = failures
            .iter()
            .position(|failure| failure.destination == destination && failure.step == batch.step())
        {
            return Err(failures.remove(index).error);
        }
        drop(failures);

        self.calls.lock().await.push(SinkCall {
            destination: destination.to_string(),
            step: batch.step(),
            range: batch.range(),
            records: batch.records().to_vec(),
            received_at: Instant::now(),
        });
        Ok(())
    }
}
