//! JSON Lines sink for dry runs and local inspection.

use std::io::{self, Write};
use std::sync::Mutex;

use async_trait::async_trait;
use feed_replay::{Batch, Sink, SinkError};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// One line written per delivered batch.
#[derive(Debug, Serialize)]
struct UploadLine<'a> {
    destination: &'a str,
    step: usize,
    start: usize,
    end: usize,
    rows: usize,
    checksum: String,
    records: Vec<Value>,
}

/// Writes every upload as a single JSON line to the wrapped writer.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl JsonLinesSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<W: Write + Send> Sink for JsonLinesSink<W> {
    async fn upload(&self, destination: &str, batch: &Batch) -> Result<(), SinkError> {
        let range = batch.range();
        let line = UploadLine {
            destination,
            step: batch.step(),
            start: range.start,
            end: range.end,
            rows: batch.len(),
            checksum: batch.checksum()?,
            records: batch.to_rows()?,
        };
        let mut encoded =
            serde_json::to_vec(&line).map_err(|err| SinkError::Serialization(err.to_string()))?;
        encoded.push(b'\n');

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| SinkError::Io("writer mutex poisoned".into()))?;
        writer
            .write_all(&encoded)
            .map_err(|err| SinkError::Io(err.to_string()))?;
        writer
            .flush()
            .map_err(|err| SinkError::Io(err.to_string()))?;
        debug!(destination, step = batch.step(), "wrote batch line");
        Ok(())
    }
}
