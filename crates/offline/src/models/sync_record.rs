//! Durable queue records for mutations awaiting replay

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{CartMutation, CheckoutRequest, LocalId, ProductFields, ProductUpdate};
use crate::clock;
use crate::storage::{Collection, Entity, IndexValue, RecordKey};

/// Kind of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    CreateProduct,
    UpdateProduct,
    DeleteProduct,
    Cart,
    Checkout,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::CreateProduct => "create_product",
            MutationKind::UpdateProduct => "update_product",
            MutationKind::DeleteProduct => "delete_product",
            MutationKind::Cart => "cart",
            MutationKind::Checkout => "checkout",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change made offline that must be replayed against the remote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Mutation {
    /// Publish a draft; attachments are uploaded after the listing exists
    CreateProduct {
        local_id: LocalId,
        product: ProductFields,
    },
    UpdateProduct {
        product_id: i64,
        changes: ProductUpdate,
    },
    DeleteProduct {
        product_id: i64,
    },
    Cart(CartMutation),
    Checkout(CheckoutRequest),
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::CreateProduct { .. } => MutationKind::CreateProduct,
            Mutation::UpdateProduct { .. } => MutationKind::UpdateProduct,
            Mutation::DeleteProduct { .. } => MutationKind::DeleteProduct,
            Mutation::Cart(_) => MutationKind::Cart,
            Mutation::Checkout(_) => MutationKind::Checkout,
        }
    }

    /// Draft this mutation publishes, if any
    pub fn local_id(&self) -> Option<&LocalId> {
        match self {
            Mutation::CreateProduct { local_id, .. } => Some(local_id),
            _ => None,
        }
    }
}

/// Replay state of a queue record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    /// Leased by an in-progress drain
    Syncing,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Syncing => "syncing",
            RecordStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued mutation with its replay bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Store-assigned auto-increment id
    pub id: i64,
    pub mutation: Mutation,
    /// Enqueue time in client milliseconds
    pub timestamp: i64,
    pub retries: u32,
    pub status: RecordStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl SyncRecord {
    /// A fresh pending record stamped with the current time
    pub fn new(id: i64, mutation: Mutation) -> Self {
        Self {
            id,
            mutation,
            timestamp: clock::now_millis(),
            retries: 0,
            status: RecordStatus::Pending,
            error: None,
        }
    }

    /// Drain order: oldest first, ties broken by id
    pub fn drain_order(&self) -> (i64, i64) {
        (self.timestamp, self.id)
    }
}

impl Entity for SyncRecord {
    const COLLECTION: Collection = Collection::SyncQueue;

    fn key(&self) -> RecordKey {
        RecordKey::Id(self.id)
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        let mut values = vec![
            ("type", IndexValue::from(self.mutation.kind().as_str())),
            ("status", IndexValue::from(self.status.as_str())),
            ("timestamp", IndexValue::Int(self.timestamp)),
        ];
        if let Some(local_id) = self.mutation.local_id() {
            values.push(("local_id", IndexValue::from(local_id.as_str())));
        }
        values
    }
}
