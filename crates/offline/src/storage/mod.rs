//! Storage traits and implementations
//!
//! This module defines the local store abstraction: named, indexed
//! collections of serialized records, plus a blob store for attachment
//! bytes. The trait-based design allows swapping between in-memory and
//! SQLite storage.

mod blob;
mod blob_file;
mod entity;
mod memory;
mod sqlite;
mod traits;

pub use blob::{BlobKey, BlobStore, InMemoryBlobStore};
pub use blob_file::FileBlobStore;
pub use entity::{Entity, EntityStore};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    Collection, IndexValue, LocalStore, RecordKey, StoredRecord, WriteConflict, WriteOp,
    check_index,
};
