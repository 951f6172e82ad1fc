//! SQLite-based local store
//!
//! Every collection shares one `records` table keyed by (collection, key).
//! Secondary index entries live in `record_indexes` so any declared index
//! can be queried without per-collection tables.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow, bail};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, OptionalExtension, ToSql, Transaction, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{
    Collection, IndexValue, LocalStore, RecordKey, StoredRecord, WriteConflict, WriteOp,
    check_index,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Serialized records; key is an integer or text, so it has no declared type
            CREATE TABLE records (
                collection TEXT NOT NULL,
                record_key NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (collection, record_key)
            );

            -- Secondary index entries, one row per (record, index)
            CREATE TABLE record_indexes (
                collection TEXT NOT NULL,
                record_key NOT NULL,
                index_name TEXT NOT NULL,
                index_value,
                value_kind TEXT NOT NULL,
                PRIMARY KEY (collection, record_key, index_name)
            );

            CREATE INDEX idx_record_indexes_lookup
                ON record_indexes(collection, index_name, index_value);

            -- Auto-increment counters per collection
            CREATE TABLE sequences (
                collection TEXT PRIMARY KEY,
                next_id INTEGER NOT NULL
            );
            "#,
        ),
    ])
}

impl ToSql for RecordKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            RecordKey::Id(id) => ToSqlOutput::from(*id),
            RecordKey::Name(name) => ToSqlOutput::from(name.as_str()),
        })
    }
}

impl FromSql for RecordKey {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(id) => Ok(RecordKey::Id(id)),
            ValueRef::Text(text) => std::str::from_utf8(text)
                .map(|name| RecordKey::Name(name.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl ToSql for IndexValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            IndexValue::Int(v) => ToSqlOutput::from(*v),
            IndexValue::Text(v) => ToSqlOutput::from(v.as_str()),
            IndexValue::Bool(v) => ToSqlOutput::from(i64::from(*v)),
        })
    }
}

fn decode_index_value(value: Value, kind: &str) -> Result<IndexValue> {
    match (kind, value) {
        ("int", Value::Integer(v)) => Ok(IndexValue::Int(v)),
        ("bool", Value::Integer(v)) => Ok(IndexValue::Bool(v != 0)),
        ("text", Value::Text(v)) => Ok(IndexValue::Text(v)),
        (kind, value) => bail!("Unexpected {} index value: {:?}", kind, value),
    }
}

/// SQLite-based local store
///
/// Each call runs in its own transaction, so a crash leaves every call
/// either fully applied or absent.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given database path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL lets readers proceed during a write; NORMAL sync is safe with WAL
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        Self::with_connection(conn)
    }

    /// Open a private in-memory database (tests and ephemeral sessions)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }

    fn put_record(tx: &Transaction<'_>, collection: Collection, record: &StoredRecord) -> Result<()> {
        tx.execute(
            "INSERT INTO records (collection, record_key, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection, record_key) DO UPDATE SET data = excluded.data",
            params![collection.name(), record.key, record.data],
        )?;

        // Replace index entries wholesale
        tx.execute(
            "DELETE FROM record_indexes WHERE collection = ?1 AND record_key = ?2",
            params![collection.name(), record.key],
        )?;
        let mut stmt = tx.prepare_cached(
            "INSERT INTO record_indexes (collection, record_key, index_name, index_value, value_kind)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (index, value) in &record.indexes {
            stmt.execute(params![
                collection.name(),
                record.key,
                index,
                value,
                value.kind()
            ])?;
        }
        Ok(())
    }

    fn check_expected(
        tx: &Transaction<'_>,
        collection: Collection,
        key: &RecordKey,
        expected: Option<&[u8]>,
    ) -> Result<()> {
        let current: Option<Vec<u8>> = tx
            .query_row(
                "SELECT data FROM records WHERE collection = ?1 AND record_key = ?2",
                params![collection.name(), key],
                |row| row.get(0),
            )
            .optional()?;
        if current.as_deref() != expected {
            return Err(WriteConflict {
                collection,
                key: key.clone(),
            }
            .into());
        }
        Ok(())
    }

    fn delete_record(tx: &Transaction<'_>, collection: Collection, key: &RecordKey) -> Result<()> {
        tx.execute(
            "DELETE FROM records WHERE collection = ?1 AND record_key = ?2",
            params![collection.name(), key],
        )?;
        tx.execute(
            "DELETE FROM record_indexes WHERE collection = ?1 AND record_key = ?2",
            params![collection.name(), key],
        )?;
        Ok(())
    }

    fn clear_collection(tx: &Transaction<'_>, collection: Collection) -> Result<()> {
        tx.execute(
            "DELETE FROM records WHERE collection = ?1",
            [collection.name()],
        )?;
        tx.execute(
            "DELETE FROM record_indexes WHERE collection = ?1",
            [collection.name()],
        )?;
        Ok(())
    }

    fn load_indexes(
        conn: &Connection,
        collection: Collection,
        key: &RecordKey,
    ) -> Result<Vec<(String, IndexValue)>> {
        let mut stmt = conn.prepare_cached(
            "SELECT index_name, index_value, value_kind FROM record_indexes
             WHERE collection = ?1 AND record_key = ?2
             ORDER BY index_name",
        )?;
        let rows = stmt.query_map(params![collection.name(), key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Value>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut indexes = Vec::new();
        for row in rows {
            let (name, value, kind) = row?;
            indexes.push((name, decode_index_value(value, &kind)?));
        }
        Ok(indexes)
    }

    fn hydrate(
        conn: &Connection,
        collection: Collection,
        rows: Vec<(RecordKey, Vec<u8>)>,
    ) -> Result<Vec<StoredRecord>> {
        rows.into_iter()
            .map(|(key, data)| {
                let indexes = Self::load_indexes(conn, collection, &key)?;
                Ok(StoredRecord { key, indexes, data })
            })
            .collect()
    }
}

impl LocalStore for SqliteStore {
    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        for op in &ops {
            op.validate()?;
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for op in &ops {
            if let WriteOp::Expect {
                collection,
                key,
                data,
            } = op
            {
                Self::check_expected(&tx, *collection, key, data.as_deref())?;
            }
        }
        for op in &ops {
            match op {
                WriteOp::Put { collection, record } => Self::put_record(&tx, *collection, record)?,
                WriteOp::Delete { collection, key } => Self::delete_record(&tx, *collection, key)?,
                WriteOp::Clear { collection } => Self::clear_collection(&tx, *collection)?,
                WriteOp::Expect { .. } => {}
            }
        }
        tx.commit().context("Failed to commit write batch")?;
        Ok(())
    }

    fn get(&self, collection: Collection, key: &RecordKey) -> Result<Option<StoredRecord>> {
        let conn = self.lock()?;
        let data: Option<Vec<u8>> = conn
            .query_row(
                "SELECT data FROM records WHERE collection = ?1 AND record_key = ?2",
                params![collection.name(), key],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(data) => {
                let indexes = Self::load_indexes(&conn, collection, key)?;
                Ok(Some(StoredRecord {
                    key: key.clone(),
                    indexes,
                    data,
                }))
            }
            None => Ok(None),
        }
    }

    fn query(
        &self,
        collection: Collection,
        index: &str,
        value: &IndexValue,
    ) -> Result<Vec<StoredRecord>> {
        check_index(collection, index)?;
        let conn = self.lock()?;

        let rows = {
            let mut stmt = conn.prepare_cached(
                "SELECT r.record_key, r.data FROM record_indexes i
                 JOIN records r ON r.collection = i.collection AND r.record_key = i.record_key
                 WHERE i.collection = ?1 AND i.index_name = ?2
                   AND i.index_value = ?3 AND i.value_kind = ?4
                 ORDER BY r.record_key",
            )?;
            let rows = stmt
                .query_map(
                    params![collection.name(), index, value, value.kind()],
                    |row| Ok((row.get::<_, RecordKey>(0)?, row.get::<_, Vec<u8>>(1)?)),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        Self::hydrate(&conn, collection, rows)
    }

    fn all(&self, collection: Collection) -> Result<Vec<StoredRecord>> {
        let conn = self.lock()?;

        let rows = {
            let mut stmt = conn.prepare_cached(
                "SELECT record_key, data FROM records WHERE collection = ?1 ORDER BY record_key",
            )?;
            let rows = stmt
                .query_map([collection.name()], |row| {
                    Ok((row.get::<_, RecordKey>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        Self::hydrate(&conn, collection, rows)
    }

    fn allocate_id(&self, collection: Collection) -> Result<i64> {
        let conn = self.lock()?;
        let id = conn.query_row(
            "INSERT INTO sequences (collection, next_id) VALUES (?1, 1)
             ON CONFLICT(collection) DO UPDATE SET next_id = next_id + 1
             RETURNING next_id",
            [collection.name()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn count(&self, collection: Collection) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            [collection.name()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
