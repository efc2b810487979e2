//! Paced, paired replay of static datasets into a streaming sink.

pub mod batch;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod replayer;
pub mod sink;

pub use batch::{partition, Batch};
pub use config::{Destinations, ReplaySettings};
pub use coordinator::{now_epoch_seconds, Progress, ProgressObserver, ReplayCoordinator, ReplayReport};
pub use error::ReplayError;
pub use replayer::PacedReplayer;
pub use sink::{RecordingSink, Sink, SinkCall, SinkError};

pub use tokio_util::sync::CancellationToken;
