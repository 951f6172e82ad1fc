//! Cached snapshots of remote state

mod snapshot;

pub use snapshot::SnapshotCache;
