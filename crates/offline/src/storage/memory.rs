//! In-memory storage implementation
//!
//! Used for tests and ephemeral sessions. Nothing survives the process.

use anyhow::{Result, anyhow};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::traits::{
    Collection, IndexValue, LocalStore, RecordKey, StoredRecord, WriteConflict, WriteOp,
    check_index,
};

/// Index entries: (collection, index name) -> value -> keys
type IndexMap = HashMap<(Collection, String), BTreeMap<IndexValue, BTreeSet<RecordKey>>>;

#[derive(Default)]
struct MemoryState {
    collections: HashMap<Collection, BTreeMap<RecordKey, StoredRecord>>,
    indexes: IndexMap,
    sequences: HashMap<Collection, i64>,
}

impl MemoryState {
    fn remove(&mut self, collection: Collection, key: &RecordKey) {
        let Some(old) = self
            .collections
            .get_mut(&collection)
            .and_then(|records| records.remove(key))
        else {
            return;
        };
        for (index, value) in &old.indexes {
            if let Some(by_value) = self.indexes.get_mut(&(collection, index.clone())) {
                if let Some(keys) = by_value.get_mut(value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        by_value.remove(value);
                    }
                }
            }
        }
    }

    fn insert(&mut self, collection: Collection, record: StoredRecord) {
        self.remove(collection, &record.key);
        for (index, value) in &record.indexes {
            self.indexes
                .entry((collection, index.clone()))
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(record.key.clone());
        }
        self.collections
            .entry(collection)
            .or_default()
            .insert(record.key.clone(), record);
    }

    fn clear(&mut self, collection: Collection) {
        self.collections.remove(&collection);
        self.indexes.retain(|(c, _), _| *c != collection);
    }

    fn data(&self, collection: Collection, key: &RecordKey) -> Option<&[u8]> {
        self.collections
            .get(&collection)
            .and_then(|records| records.get(key))
            .map(|record| record.data.as_slice())
    }
}

/// In-memory implementation of LocalStore
///
/// All collections sit behind a single RwLock, so a batch is applied under
/// one write guard and readers never see part of it.
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| anyhow!("In-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| anyhow!("In-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore for InMemoryStore {
    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        // Validate everything before touching state so a bad op applies nothing
        for op in &ops {
            op.validate()?;
        }

        let mut state = self.write()?;
        for op in &ops {
            if let WriteOp::Expect {
                collection,
                key,
                data,
            } = op
            {
                if state.data(*collection, key) != data.as_deref() {
                    return Err(WriteConflict {
                        collection: *collection,
                        key: key.clone(),
                    }
                    .into());
                }
            }
        }
        for op in ops {
            match op {
                WriteOp::Put { collection, record } => state.insert(collection, record),
                WriteOp::Delete { collection, key } => state.remove(collection, &key),
                WriteOp::Clear { collection } => state.clear(collection),
                WriteOp::Expect { .. } => {}
            }
        }
        Ok(())
    }

    fn get(&self, collection: Collection, key: &RecordKey) -> Result<Option<StoredRecord>> {
        let state = self.read()?;
        Ok(state
            .collections
            .get(&collection)
            .and_then(|records| records.get(key))
            .cloned())
    }

    fn query(
        &self,
        collection: Collection,
        index: &str,
        value: &IndexValue,
    ) -> Result<Vec<StoredRecord>> {
        check_index(collection, index)?;
        let state = self.read()?;

        let Some(keys) = state
            .indexes
            .get(&(collection, index.to_string()))
            .and_then(|by_value| by_value.get(value))
        else {
            return Ok(Vec::new());
        };
        let Some(records) = state.collections.get(&collection) else {
            return Ok(Vec::new());
        };

        Ok(keys
            .iter()
            .filter_map(|key| records.get(key).cloned())
            .collect())
    }

    fn all(&self, collection: Collection) -> Result<Vec<StoredRecord>> {
        let state = self.read()?;
        Ok(state
            .collections
            .get(&collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    fn allocate_id(&self, collection: Collection) -> Result<i64> {
        let mut state = self.write()?;
        let next = state.sequences.entry(collection).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    fn count(&self, collection: Collection) -> Result<usize> {
        let state = self.read()?;
        Ok(state.collections.get(&collection).map_or(0, BTreeMap::len))
    }
}
