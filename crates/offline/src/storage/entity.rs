//! Typed access to local collections

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::traits::{Collection, IndexValue, LocalStore, RecordKey, StoredRecord, WriteOp};

/// A model persisted in one local collection
pub trait Entity: Serialize + DeserializeOwned {
    /// Collection holding this entity
    const COLLECTION: Collection;

    /// Primary key within the collection
    fn key(&self) -> RecordKey;

    /// Values for the collection's secondary indexes
    ///
    /// Optional attributes that are unset are simply omitted.
    fn index_values(&self) -> Vec<(&'static str, IndexValue)>;

    /// Serialize into a stored record
    fn to_record(&self) -> Result<StoredRecord> {
        let data = serde_json::to_vec(self)
            .with_context(|| format!("Failed to encode {} record", Self::COLLECTION))?;
        Ok(StoredRecord {
            key: self.key(),
            indexes: self
                .index_values()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            data,
        })
    }

    /// Deserialize from a stored record
    fn from_record(record: &StoredRecord) -> Result<Self> {
        serde_json::from_slice(&record.data).with_context(|| {
            format!("Failed to decode {} record {}", Self::COLLECTION, record.key)
        })
    }
}

impl WriteOp {
    /// Put an entity into its collection
    pub fn put<T: Entity>(entity: &T) -> Result<Self> {
        Ok(WriteOp::Put {
            collection: T::COLLECTION,
            record: entity.to_record()?,
        })
    }

    /// Delete an entity from its collection by key
    pub fn delete<T: Entity>(key: impl Into<RecordKey>) -> Self {
        WriteOp::Delete {
            collection: T::COLLECTION,
            key: key.into(),
        }
    }

    /// Require the stored entity to still be `current` when the batch applies
    ///
    /// `None` requires that no entity is stored under `key`.
    pub fn expect<T: Entity>(key: impl Into<RecordKey>, current: Option<&T>) -> Result<Self> {
        Ok(WriteOp::Expect {
            collection: T::COLLECTION,
            key: key.into(),
            data: current.map(|entity| entity.to_record()).transpose()?.map(|r| r.data),
        })
    }

    /// Clear an entity's collection
    pub fn clear<T: Entity>() -> Self {
        WriteOp::Clear {
            collection: T::COLLECTION,
        }
    }
}

/// Typed helpers over any [`LocalStore`]
pub trait EntityStore {
    fn put_entity<T: Entity>(&self, entity: &T) -> Result<()>;
    fn bulk_put_entities<T: Entity>(&self, entities: &[T]) -> Result<()>;
    fn get_entity<T: Entity>(&self, key: impl Into<RecordKey>) -> Result<Option<T>>;
    fn query_entities<T: Entity>(&self, index: &str, value: impl Into<IndexValue>)
    -> Result<Vec<T>>;
    fn all_entities<T: Entity>(&self) -> Result<Vec<T>>;
    fn delete_entity<T: Entity>(&self, key: impl Into<RecordKey>) -> Result<()>;
    fn clear_entities<T: Entity>(&self) -> Result<()>;
}

impl<S: LocalStore + ?Sized> EntityStore for S {
    fn put_entity<T: Entity>(&self, entity: &T) -> Result<()> {
        self.put(T::COLLECTION, entity.to_record()?)
    }

    fn bulk_put_entities<T: Entity>(&self, entities: &[T]) -> Result<()> {
        let records = entities
            .iter()
            .map(Entity::to_record)
            .collect::<Result<Vec<_>>>()?;
        self.bulk_put(T::COLLECTION, records)
    }

    fn get_entity<T: Entity>(&self, key: impl Into<RecordKey>) -> Result<Option<T>> {
        self.get(T::COLLECTION, &key.into())?
            .map(|record| T::from_record(&record))
            .transpose()
    }

    fn query_entities<T: Entity>(
        &self,
        index: &str,
        value: impl Into<IndexValue>,
    ) -> Result<Vec<T>> {
        self.query(T::COLLECTION, index, &value.into())?
            .iter()
            .map(T::from_record)
            .collect()
    }

    fn all_entities<T: Entity>(&self) -> Result<Vec<T>> {
        self.all(T::COLLECTION)?
            .iter()
            .map(T::from_record)
            .collect()
    }

    fn delete_entity<T: Entity>(&self, key: impl Into<RecordKey>) -> Result<()> {
        self.delete(T::COLLECTION, &key.into())
    }

    fn clear_entities<T: Entity>(&self) -> Result<()> {
        self.clear(T::COLLECTION)
    }
}
