use feed_records::RecordError;
use thiserror::Error;

use crate::sink::SinkError;

#[derive(Debug, Error)]
pub enum ReplayError {
    /// Invalid settings or mismatched inputs; nothing was delivered.
    #[error("precondition failed: {0}")]
    Precondition(String),
    /// The transactions upload of `step` failed; the step delivered nothing.
    #[error("step {step}: delivery to `{destination}` failed: {source}")]
    Delivery {
        step: usize,
        destination: String,
        #[source]
        source: SinkError,
    },
    /// Transactions of `step` were delivered but the labels upload failed.
    #[error("step {step}: delivered to `{delivered}` but delivery to `{failed}` failed, pairing broken: {source}")]
    PartialDelivery {
        step: usize,
        delivered: String,
        failed: String,
        #[source]
        source: SinkError,
    },
    /// One stream ran out of batches before the other.
    #[error("step {step}: paired streams exhausted unevenly")]
    ExhaustionMismatch { step: usize },
}

impl ReplayError {
    /// Step at which an in-flight replay aborted, if it started at all.
    #[must_use]
    pub const fn step(&self) -> Option<usize> {
        match self {
            Self::Precondition(_) => None,
            Self::Delivery { step, .. }
            | Self::PartialDelivery { step, .. }
            | Self::ExhaustionMismatch { step } => Some(*step),
        }
    }
}

impl From<RecordError> for ReplayError {
    fn from(err: RecordError) -> Self {
        Self::Precondition(err.to_string())
    }
}
