//! Offline crate - local persistence and sync for the AgroMarket client
//!
//! This crate lets a farmer keep working while disconnected:
//! - Local store of indexed collections (SQLite or in-memory) plus blob storage
//! - Durable queue of mutations replayed against the remote API
//! - Draft listings authored offline, published when connectivity returns
//! - Network monitor with edge-triggered subscriptions
//! - Cached snapshots of remote state for offline reads
//!
//! The stack is synchronous; background work runs on plain threads so the
//! crate works under any host executor.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod drafts;
pub mod engine;
pub mod models;
pub mod network;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testing;

pub use api::{
    CredentialProvider, HttpRemoteApi, NoCredentials, RemoteApi, RemoteError,
    SessionFileCredentials, StaticToken,
};
pub use cache::SnapshotCache;
pub use config::OfflineConfig;
pub use drafts::{DraftError, DraftManager, ReconcileReport};
pub use engine::{StartupReport, SyncBadge, SyncEngine, SyncStatus};
pub use models::{
    Attachment, Cart, CartItem, CartMutation, CheckoutRequest, DraftProduct, DraftStatus, LocalId,
    Mutation, MutationKind, NewAttachment, Notification, Product, ProductFields, ProductQuery,
    ProductUpdate, RecordStatus, SyncRecord, User,
};
pub use network::{NetworkMonitor, ProbeConfig, Subscription};
pub use storage::{
    BlobKey, BlobStore, Collection, EntityStore, FileBlobStore, InMemoryBlobStore, InMemoryStore,
    LocalStore, SqliteStore, WriteConflict,
};
pub use sync::{DrainOutcome, DrainReport, ProcessorOptions, QueueError, SyncProcessor};
