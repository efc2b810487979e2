use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("row {row}: invalid JSON: {detail}")]
    Parse { row: usize, detail: String },
    #[error("row {row}: expected a JSON object")]
    NotAnObject { row: usize },
    #[error("row {row}: field `{field}` holds a nested value")]
    UnsupportedValue { row: usize, field: String },
    #[error("datasets must have equal length (transactions={transactions}, labels={labels})")]
    LengthMismatch { transactions: usize, labels: usize },
}

impl From<std::io::Error> for RecordError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
