//! Durable mutation queue and its processor

mod processor;

pub use processor::{DrainOutcome, DrainReport, ProcessorOptions, SyncProcessor};

use crate::models::RecordStatus;

/// Misuse of the queue API
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("sync record {0} not found")]
    NotFound(i64),
    #[error("sync record {id} is {status}, only failed records can be retried")]
    NotFailed { id: i64, status: RecordStatus },
}
