//! Offline-authored product drafts

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::ProductFields;
use crate::clock;
use crate::storage::{Collection, Entity, IndexValue, RecordKey};

/// Client-generated identifier of a draft (UUID v4)
///
/// Assigned once when the draft is created and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    /// Saved locally, not yet submitted
    Draft,
    /// Queued for upload
    PendingUpload,
    /// Replay in flight
    Uploading,
    /// Rejected or out of retries; kept for inspection and manual retry
    Failed,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Draft => "draft",
            DraftStatus::PendingUpload => "pending_upload",
            DraftStatus::Uploading => "uploading",
            DraftStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of an image attached to a draft
///
/// The bytes live in the blob store under (local_id, position).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub position: u32,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
}

/// An image supplied when saving a draft
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl NewAttachment {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// A JPEG image with a generated file name
    pub fn jpeg(position: usize, data: Vec<u8>) -> Self {
        Self::new(format!("product-image-{}.jpg", position), "image/jpeg", data)
    }
}

/// A product listing authored on this device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftProduct {
    pub local_id: LocalId,
    pub fields: ProductFields,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub status: DraftStatus,
    /// Client milliseconds
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub error: Option<String>,
}

impl DraftProduct {
    /// Create a draft stamped with the current time
    pub fn new(
        local_id: LocalId,
        fields: ProductFields,
        attachments: Vec<Attachment>,
        status: DraftStatus,
    ) -> Self {
        let now = clock::now_millis();
        Self {
            local_id,
            fields,
            attachments,
            status,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Move to a new status, recording the reason for failures
    pub fn transition(&mut self, status: DraftStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.updated_at = clock::now_millis();
    }
}

impl Entity for DraftProduct {
    const COLLECTION: Collection = Collection::DraftProducts;

    fn key(&self) -> RecordKey {
        RecordKey::Name(self.local_id.as_str().to_string())
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![
            ("local_id", IndexValue::from(self.local_id.as_str())),
            ("status", IndexValue::from(self.status.as_str())),
            ("created_at", IndexValue::Int(self.created_at)),
        ]
    }
}
