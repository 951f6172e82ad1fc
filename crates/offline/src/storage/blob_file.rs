//! File-based blob storage with zstd compression

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::blob::{BlobKey, BlobStore};

/// File-based blob storage with zstd compression
///
/// Directory structure:
/// ```text
/// blobs/
///   3f/
///     3f2c9a10-....0.zst     # first image of draft 3f2c9a10-...
///     3f2c9a10-....1.zst
///   b7/
///     b7e4d2c8-....0.zst
/// ```
pub struct FileBlobStore {
    root: PathBuf,
    compression_level: i32,
}

impl FileBlobStore {
    /// Create a new file blob store at the given path
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).context("Failed to create blob storage directory")?;
        Ok(Self {
            root,
            // Images are already compressed; keep the level cheap
            compression_level: 1,
        })
    }

    /// Shard directory: first 2 chars of the owner
    fn shard(owner: &str) -> &str {
        owner.get(..2).unwrap_or("xx")
    }

    fn blob_path(&self, key: &BlobKey) -> PathBuf {
        self.root
            .join(Self::shard(&key.owner))
            .join(format!("{}.{}.zst", key.owner, key.position))
    }

    /// List all blob files for an owner
    pub fn list_blobs_for_owner(&self, owner: &str) -> Result<Vec<PathBuf>> {
        let shard_dir = self.root.join(Self::shard(owner));
        if !shard_dir.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("{}.", owner);
        let mut paths = Vec::new();
        for entry in fs::read_dir(&shard_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            // Owner ids never contain dots, so the prefix pins the owner exactly
            if name.starts_with(&prefix) && name.ends_with(".zst") {
                paths.push(entry.path());
            }
        }
        Ok(paths)
    }
}

impl BlobStore for FileBlobStore {
    fn put(&self, key: &BlobKey, data: &[u8]) -> Result<()> {
        let path = self.blob_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let compressed =
            zstd::encode_all(data, self.compression_level).context("Failed to compress blob")?;

        // Write to temp, then rename, so readers never see a partial blob
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &compressed)
            .with_context(|| format!("Failed to write blob {}", temp_path.display()))?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let compressed = fs::read(&path)?;
        let mut decoder = zstd::Decoder::new(compressed.as_slice())?;
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .context("Failed to decompress blob")?;
        Ok(Some(decompressed))
    }

    fn exists(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.blob_path(key).exists())
    }

    fn delete(&self, key: &BlobKey) -> Result<()> {
        let path = self.blob_path(key);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn delete_all_for_owner(&self, owner: &str) -> Result<()> {
        for path in self.list_blobs_for_owner(owner)? {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }
}
