//! modelcache storage - record store trait, cache stores and the model cache
//!
//! Defines the record store abstraction the cache reads through to, an
//! in-memory mock of it for tests, and the [`cache`] layer.

pub mod cache;

pub use cache::{
    BoundCommand, CacheKey, CacheStats, CacheStore, CachedEntry, CachedRecord, CommandAllowlist,
    CommandGuard, InMemoryCacheStore, KeyCodec, KeyGenerator, KeyNamespace, LmdbCacheError,
    LmdbCacheStore, ModelCache, NativeCommands, Reply, Snapshot,
};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use modelcache_core::{CacheResult, EntitySchema, FilterSet, Record, StorageError};
use serde_json::Value;

// ============================================================================
// RECORD STORE TRAIT
// ============================================================================

/// The persistent source of truth behind the cache.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All records matching `filters`, in store order. No filters matches everything.
    async fn query(&self, schema: &EntitySchema, filters: &FilterSet) -> CacheResult<Vec<Record>>;

    /// The single record matching `filters`.
    ///
    /// Fails with [`StorageError::NotFound`] when nothing matches and
    /// [`StorageError::MultipleMatches`] when more than one record does.
    async fn get_one(&self, schema: &EntitySchema, filters: &FilterSet) -> CacheResult<Record>;

    /// Insert a record and return it as stored.
    async fn create(
        &self,
        schema: &EntitySchema,
        fields: BTreeMap<String, Value>,
    ) -> CacheResult<Record>;

    /// Field names currently defined for the entity, in declaration order.
    fn list_fields(&self, schema: &EntitySchema) -> Vec<String> {
        schema.field_names()
    }
}

// ============================================================================
// MOCK RECORD STORE
// ============================================================================

/// In-memory record store for testing.
///
/// Records keep insertion order per entity. Integer primary keys left unset
/// on `create` are assigned sequentially from 1. Every `query` and `get_one`
/// call counts as one read.
#[derive(Debug, Clone, Default)]
pub struct MockRecordStore {
    records: Arc<RwLock<HashMap<String, Vec<Record>>>>,
    reads: Arc<AtomicU64>,
}

impl MockRecordStore {
    /// Create a new mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record without validation or pk assignment.
    pub fn insert(&self, record: Record) -> CacheResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        records
            .entry(record.entity().to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    /// Clear all stored data.
    pub fn clear(&self) -> CacheResult<()> {
        self.records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        Ok(())
    }

    /// Get count of stored records for an entity.
    pub fn len(&self, entity: &str) -> usize {
        self.records
            .read()
            .map(|records| records.get(entity).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, entity: &str) -> bool {
        self.len(entity) == 0
    }

    /// Number of `query`/`get_one` calls served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn matching(&self, schema: &EntitySchema, filters: &FilterSet) -> CacheResult<Vec<Record>> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let resolved = filters.resolve_pk(schema.pk_field())?;
        for (field, _) in resolved.iter() {
            if !schema.has_field(field) {
                return Err(StorageError::UnknownField {
                    entity: schema.name().to_string(),
                    field: field.to_string(),
                }
                .into());
            }
        }

        let records = self
            .records
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(records
            .get(schema.name())
            .map(|rows| {
                rows.iter()
                    .filter(|row| resolved.matches(row.fields()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl RecordStore for MockRecordStore {
    async fn query(&self, schema: &EntitySchema, filters: &FilterSet) -> CacheResult<Vec<Record>> {
        self.matching(schema, filters)
    }

    async fn get_one(&self, schema: &EntitySchema, filters: &FilterSet) -> CacheResult<Record> {
        let mut matches = self.matching(schema, filters)?;
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(StorageError::NotFound {
                entity: schema.name().to_string(),
                filters: filters.to_string(),
            }
            .into()),
            count => Err(StorageError::MultipleMatches {
                entity: schema.name().to_string(),
                filters: filters.to_string(),
                count,
            }
            .into()),
        }
    }

    async fn create(
        &self,
        schema: &EntitySchema,
        mut fields: BTreeMap<String, Value>,
    ) -> CacheResult<Record> {
        for (name, value) in &fields {
            let def = schema.field(name).ok_or_else(|| StorageError::UnknownField {
                entity: schema.name().to_string(),
                field: name.clone(),
            })?;
            if !def.kind.accepts(value) {
                return Err(StorageError::InsertFailed {
                    entity: schema.name().to_string(),
                    reason: format!("{} does not accept {}", name, value),
                }
                .into());
            }
        }

        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let rows = records.entry(schema.name().to_string()).or_default();
        let pk_field = schema.pk_field();

        match fields.get(pk_field) {
            Some(pk) if !pk.is_null() => {
                if rows.iter().any(|row| row.get(pk_field) == Some(pk)) {
                    return Err(StorageError::InsertFailed {
                        entity: schema.name().to_string(),
                        reason: format!("{} {} already exists", pk_field, pk),
                    }
                    .into());
                }
            }
            _ => {
                let next = rows
                    .iter()
                    .filter_map(|row| row.get(pk_field).and_then(Value::as_i64))
                    .max()
                    .unwrap_or(0)
                    + 1;
                fields.insert(pk_field.to_string(), Value::from(next));
            }
        }

        let record = Record::new(schema.name(), fields);
        rows.push(record.clone());
        Ok(record)
    }
}


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
