//! Blob storage for draft attachments

use anyhow::{Result, anyhow};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Key for storing/retrieving an attachment's bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey {
    /// Draft local_id the attachment belongs to
    pub owner: String,
    /// Position of the attachment within the draft
    pub position: u32,
}

impl BlobKey {
    pub fn new(owner: impl Into<String>, position: u32) -> Self {
        Self {
            owner: owner.into(),
            position,
        }
    }
}

/// Trait for blob storage operations
///
/// Implementations handle compression/decompression internally.
pub trait BlobStore: Send + Sync {
    /// Store blob content, replacing any previous content
    fn put(&self, key: &BlobKey, data: &[u8]) -> Result<()>;

    /// Retrieve blob content
    ///
    /// Returns None if the blob doesn't exist.
    fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>>;

    /// Check if a blob exists
    fn exists(&self, key: &BlobKey) -> Result<bool>;

    /// Delete a blob (no-op if missing)
    fn delete(&self, key: &BlobKey) -> Result<()>;

    /// Delete every blob belonging to an owner
    fn delete_all_for_owner(&self, owner: &str) -> Result<()>;

    /// Clear all blobs
    fn clear(&self) -> Result<()>;
}

/// Blob store held entirely in memory
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<BlobKey, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.read().map_or(0, |blobs| blobs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("In-memory blob store lock poisoned")
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, key: &BlobKey, data: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .map_err(|_| poisoned())?
            .insert(key.clone(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    fn exists(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.blobs.read().map_err(|_| poisoned())?.contains_key(key))
    }

    fn delete(&self, key: &BlobKey) -> Result<()> {
        self.blobs.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    fn delete_all_for_owner(&self, owner: &str) -> Result<()> {
        self.blobs
            .write()
            .map_err(|_| poisoned())?
            .retain(|key, _| key.owner != owner);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.blobs.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}
