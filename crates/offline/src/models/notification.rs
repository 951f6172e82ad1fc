//! Notification model

use serde::{Deserialize, Serialize};

use crate::storage::{Collection, Entity, IndexValue, RecordKey};

/// An in-app notification for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub related_order_id: Option<i64>,
    #[serde(default)]
    pub related_product_id: Option<i64>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// RFC 3339 timestamp; sorts chronologically as text
    pub created_at: String,
}

impl Entity for Notification {
    const COLLECTION: Collection = Collection::Notifications;

    fn key(&self) -> RecordKey {
        RecordKey::Id(self.id)
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![
            ("user_id", IndexValue::Int(self.user_id)),
            ("is_read", IndexValue::Bool(self.is_read)),
            ("type", IndexValue::from(self.kind.as_str())),
            ("created_at", IndexValue::from(self.created_at.as_str())),
        ]
    }
}
