//! Draft listings authored offline

mod manager;

pub use manager::DraftManager;

use crate::models::{DraftStatus, LocalId};

/// Rejected draft operation
#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("draft {0} not found")]
    NotFound(LocalId),
    #[error("cannot {action} draft {local_id} while it is {status}")]
    InvalidState {
        local_id: LocalId,
        status: DraftStatus,
        action: &'static str,
    },
    #[error("invalid listing: {0}")]
    Invalid(String),
}

/// Drafts re-queued by reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub requeued: Vec<LocalId>,
}
