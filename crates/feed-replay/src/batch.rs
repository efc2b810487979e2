use std::ops::Range;

use blake3::Hasher;
use feed_records::Record;
use serde_json::Value;

use crate::sink::SinkError;

/// Contiguous slice of a dataset, replayed as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    step: usize,
    range: Range<usize>,
    records: Vec<Record>,
}

impl Batch {
    pub fn new(step: usize, range: Range<usize>, records: Vec<Record>) -> Self {
        debug_assert_eq!(range.len(), records.len());
        Self {
            step,
            range,
            records,
        }
    }

    #[must_use]
    pub const fn step(&self) -> usize {
        self.step
    }

    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Row-oriented list of field mappings, the wire shape every sink sends.
    pub fn to_rows(&self) -> Result<Vec<Value>, SinkError> {
        self.records
            .iter()
            .map(|record| {
                serde_json::to_value(record)
                    .map_err(|err| SinkError::Serialization(err.to_string()))
            })
            .collect()
    }

    /// blake3 digest of the rows encoded as JSON lines.
    pub fn checksum(&self) -> Result<String, SinkError> {
        let mut hasher = Hasher::new();
        for record in &self.records {
            let encoded = serde_json::to_vec(record)
                .map_err(|err| SinkError::Serialization(err.to_string()))?;
            hasher.update(&encoded);
            hasher.update(b"\n");
        }
        Ok(hasher.finalize().to_hex().to_string())
    }
}

/// Index ranges covering `[0, len)` in order, each at most `batch_size` long.
pub fn partition(len: usize, batch_size: usize) -> impl Iterator<Item = Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..len)
        .step_by(batch_size)
        .map(move |start| start..(start + batch_size).min(len))
}
