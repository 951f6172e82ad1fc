//! Local store trait definitions

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Named collections in the local schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    /// Cached remote product listings
    Products,
    /// Product listings authored on this device and not yet accepted remotely
    DraftProducts,
    /// Cached active cart
    Cart,
    /// Cached cart line items
    CartItems,
    /// Cached notifications
    Notifications,
    /// Durable queue of mutations awaiting replay
    SyncQueue,
    /// Cached profile of the signed-in user (single record)
    CachedUser,
}

impl Collection {
    /// Every collection in the schema
    pub const ALL: [Collection; 7] = [
        Collection::Products,
        Collection::DraftProducts,
        Collection::Cart,
        Collection::CartItems,
        Collection::Notifications,
        Collection::SyncQueue,
        Collection::CachedUser,
    ];

    /// Stable name used in persisted data
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Products => "products",
            Collection::DraftProducts => "draftProducts",
            Collection::Cart => "cart",
            Collection::CartItems => "cartItems",
            Collection::Notifications => "notifications",
            Collection::SyncQueue => "syncQueue",
            Collection::CachedUser => "cachedUser",
        }
    }

    /// Secondary indexes declared for this collection
    pub fn indexes(&self) -> &'static [&'static str] {
        match self {
            Collection::Products => &["seller_id", "category", "status", "region"],
            Collection::DraftProducts => &["local_id", "status", "created_at"],
            Collection::Cart => &["buyer_id", "farmer_id", "status"],
            Collection::CartItems => &["cart_id", "product_id"],
            Collection::Notifications => &["user_id", "is_read", "type", "created_at"],
            Collection::SyncQueue => &["type", "status", "timestamp", "local_id"],
            Collection::CachedUser => &[],
        }
    }

    /// Whether `index` is declared for this collection
    pub fn has_index(&self, index: &str) -> bool {
        self.indexes().contains(&index)
    }

    /// Look up a collection by its persisted name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Primary key of a record within a collection
///
/// Numeric keys order before string keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordKey {
    Id(i64),
    Name(String),
}

impl From<i64> for RecordKey {
    fn from(id: i64) -> Self {
        RecordKey::Id(id)
    }
}

impl From<&str> for RecordKey {
    fn from(name: &str) -> Self {
        RecordKey::Name(name.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(name: String) -> Self {
        RecordKey::Name(name)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Id(id) => write!(f, "{}", id),
            RecordKey::Name(name) => f.write_str(name),
        }
    }
}

/// Value stored in a secondary index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexValue {
    Int(i64),
    Text(String),
    Bool(bool),
}

impl IndexValue {
    /// Type tag persisted alongside the value
    pub fn kind(&self) -> &'static str {
        match self {
            IndexValue::Int(_) => "int",
            IndexValue::Text(_) => "text",
            IndexValue::Bool(_) => "bool",
        }
    }
}

impl From<i64> for IndexValue {
    fn from(v: i64) -> Self {
        IndexValue::Int(v)
    }
}

impl From<bool> for IndexValue {
    fn from(v: bool) -> Self {
        IndexValue::Bool(v)
    }
}

impl From<&str> for IndexValue {
    fn from(v: &str) -> Self {
        IndexValue::Text(v.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(v: String) -> Self {
        IndexValue::Text(v)
    }
}

/// A serialized record together with its key and index entries
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: RecordKey,
    pub indexes: Vec<(String, IndexValue)>,
    /// JSON-encoded entity
    pub data: Vec<u8>,
}

impl StoredRecord {
    /// Get the value recorded for an index, if any
    pub fn index_value(&self, index: &str) -> Option<&IndexValue> {
        self.indexes
            .iter()
            .find(|(name, _)| name == index)
            .map(|(_, value)| value)
    }
}

/// One operation in an atomic write batch
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert or replace a record by key
    Put {
        collection: Collection,
        record: StoredRecord,
    },
    /// Remove a record (no-op if missing)
    Delete {
        collection: Collection,
        key: RecordKey,
    },
    /// Remove every record in a collection
    Clear { collection: Collection },
    /// Fail the batch with [`WriteConflict`] unless the record's data is
    /// exactly `data` (`None`: the record must be absent)
    ///
    /// Checked against the state before any operation of the batch applies.
    Expect {
        collection: Collection,
        key: RecordKey,
        data: Option<Vec<u8>>,
    },
}

impl WriteOp {
    /// Reject index names the collection does not declare
    pub fn validate(&self) -> Result<()> {
        if let WriteOp::Put { collection, record } = self {
            for (index, _) in &record.indexes {
                check_index(*collection, index)?;
            }
        }
        Ok(())
    }
}

/// A batch's expectation did not hold; nothing in it was applied
#[derive(Debug, Error)]
#[error("{collection} record {key} changed since it was read")]
pub struct WriteConflict {
    pub collection: Collection,
    pub key: RecordKey,
}

impl WriteConflict {
    /// Whether `error` is a write conflict
    pub fn is_conflict(error: &anyhow::Error) -> bool {
        error.downcast_ref::<WriteConflict>().is_some()
    }
}

/// Fail if `index` is not part of the collection's schema
pub fn check_index(collection: Collection, index: &str) -> Result<()> {
    if !collection.has_index(index) {
        bail!("Collection {} has no index named {}", collection, index);
    }
    Ok(())
}

/// Trait for local object storage
///
/// Abstracts over storage backends (in-memory, SQLite). Every call is
/// atomic: a concurrent reader never observes part of a call's effect, and
/// a crash between two calls leaves each call wholly applied or absent.
/// Lookups return `None`/empty on a miss rather than an error.
pub trait LocalStore: Send + Sync {
    /// Apply a batch of operations atomically, in order
    ///
    /// Returns a [`WriteConflict`] error if an `Expect` operation does not
    /// hold.
    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()>;

    /// Get a record by key
    fn get(&self, collection: Collection, key: &RecordKey) -> Result<Option<StoredRecord>>;

    /// Find records whose index entry equals `value`, ordered by key
    ///
    /// Errors if the index is not declared for the collection.
    fn query(
        &self,
        collection: Collection,
        index: &str,
        value: &IndexValue,
    ) -> Result<Vec<StoredRecord>>;

    /// List every record in a collection, ordered by key
    fn all(&self, collection: Collection) -> Result<Vec<StoredRecord>>;

    /// Reserve the next auto-increment key for a collection (starts at 1)
    fn allocate_id(&self, collection: Collection) -> Result<i64>;

    /// Insert or replace a record by key
    fn put(&self, collection: Collection, record: StoredRecord) -> Result<()> {
        self.write_batch(vec![WriteOp::Put { collection, record }])
    }

    /// Insert or replace several records in one atomic write
    fn bulk_put(&self, collection: Collection, records: Vec<StoredRecord>) -> Result<()> {
        let ops = records
            .into_iter()
            .map(|record| WriteOp::Put { collection, record })
            .collect();
        self.write_batch(ops)
    }

    /// Delete a record by key
    fn delete(&self, collection: Collection, key: &RecordKey) -> Result<()> {
        self.write_batch(vec![WriteOp::Delete {
            collection,
            key: key.clone(),
        }])
    }

    /// Delete every record in a collection
    fn clear(&self, collection: Collection) -> Result<()> {
        self.write_batch(vec![WriteOp::Clear { collection }])
    }

    /// Count records in a collection
    fn count(&self, collection: Collection) -> Result<usize> {
        Ok(self.all(collection)?.len())
    }
}
