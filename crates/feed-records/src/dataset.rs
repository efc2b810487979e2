//! Static datasets and the validated transactions/labels pairing.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::ops::Range;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::{FieldValue, Record, RecordError};

/// Finite, ordered, read-only sequence of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    name: String,
    records: Vec<Record>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }

    /// Load a dataset file, choosing the format from its extension.
    ///
    /// `.jsonl` and `.ndjson` are read one object per line; anything else is
    /// expected to hold a single JSON array of objects.
    pub fn load(path: &Path) -> Result<Self, RecordError> {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = File::open(path)
            .map_err(|err| RecordError::Io(format!("{}: {err}", path.display())))?;
        let dataset = match path.extension().and_then(|ext| ext.to_str()) {
            Some("jsonl" | "ndjson") => Self::from_json_lines(name, BufReader::new(file))?,
            _ => Self::from_json_array(name, BufReader::new(file))?,
        };
        debug!(
            path = %path.display(),
            rows = dataset.len(),
            "loaded dataset"
        );
        Ok(dataset)
    }

    pub fn from_json_lines<R: BufRead>(
        name: impl Into<String>,
        reader: R,
    ) -> Result<Self, RecordError> {
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let row = records.len();
            let value: Value = serde_json::from_str(&line).map_err(|err| RecordError::Parse {
                row,
                detail: err.to_string(),
            })?;
            records.push(record_from_value(row, &value)?);
        }
        Ok(Self::new(name, records))
    }

    pub fn from_json_array<R: Read>(
        name: impl Into<String>,
        reader: R,
    ) -> Result<Self, RecordError> {
        let value: Value = serde_json::from_reader(reader).map_err(|err| RecordError::Parse {
            row: 0,
            detail: err.to_string(),
        })?;
        let Value::Array(rows) = value else {
            return Err(RecordError::Parse {
                row: 0,
                detail: "expected a top-level array".into(),
            });
        };
        let records = rows
            .iter()
            .enumerate()
            .map(|(row, value)| record_from_value(row, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(name, records))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
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
    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    /// Rows in `range`, clamped to the dataset bounds.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> &[Record] {
        let end = range.end.min(self.records.len());
        let start = range.start.min(end);
        &self.records[start..end]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// First `n` rows, for small trial runs.
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        Self::new(
            self.name.clone(),
            self.records.iter().take(n).cloned().collect(),
        )
    }

    /// Fill every null or missing cell with the zero value of its column's type.
    ///
    /// Columns are the union of all field names in first-seen order. A
    /// column's type is the kind of its first non-null value, widened to
    /// `Float` when it mixes integers and floats; integer cells of a widened
    /// column become floats. Columns that are null in every row stay `Null`.
    pub fn normalize(&mut self) {
        let mut columns: Vec<(String, FieldValue)> = Vec::new();
        for record in &self.records {
            for (name, value) in record.iter() {
                match columns.iter_mut().find(|(column, _)| column.as_str() == name) {
                    None => columns.push((name.to_string(), value.zero_like())),
                    Some((_, zero)) => widen(zero, value),
                }
            }
        }

        let mut filled = 0usize;
        for record in &mut self.records {
            for (name, zero) in &columns {
                if !record.contains(name) {
                    record.insert(name.clone(), zero.clone());
                    filled += 1;
                    continue;
                }
                if let Some(value) = record.get_mut(name) {
                    let replacement = match (&*value, zero) {
                        (FieldValue::Null, _) => {
                            filled += 1;
                            zero.clone()
                        }
                        (FieldValue::Int(int), FieldValue::Float(_)) => {
                            FieldValue::Float(*int as f64)
                        }
                        _ => continue,
                    };
                    *value = replacement;
                }
            }
        }
        debug!(
            dataset = %self.name,
            columns = columns.len(),
            filled,
            "normalized null fields"
        );
    }
}

fn widen(zero: &mut FieldValue, value: &FieldValue) {
    let widened = match (&*zero, value) {
        (FieldValue::Null, _) => value.zero_like(),
        (FieldValue::Int(_), FieldValue::Float(_)) => FieldValue::Float(0.0),
        _ => return,
    };
    *zero = widened;
}

fn record_from_value(row: usize, value: &Value) -> Result<Record, RecordError> {
    match value {
        Value::Object(object) => Record::from_json_object(row, object),
        _ => Err(RecordError::NotAnObject { row }),
    }
}

/// Transactions and labels joined by position, validated to equal length.
#[derive(Debug, Clone)]
pub struct PairedDataset {
    transactions: Dataset,
    labels: Dataset,
}

impl PairedDataset {
    pub fn new(transactions: Dataset, labels: Dataset) -> Result<Self, RecordError> {
        if transactions.len() != labels.len() {
            return Err(RecordError::LengthMismatch {
                transactions: transactions.len(),
                labels: labels.len(),
            });
        }
        Ok(Self {
            transactions,
            labels,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    #[must_use]
    pub const fn transactions(&self) -> &Dataset {
        &self.transactions
    }

    #[must_use]
    pub const fn labels(&self) -> &Dataset {
        &self.labels
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&Record, &Record)> {
        self.transactions.iter().zip(self.labels.iter())
    }

    /// First `n` pairs of both sides.
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        Self {
            transactions: self.transactions.head(n),
            labels: self.labels.head(n),
        }
    }
}
