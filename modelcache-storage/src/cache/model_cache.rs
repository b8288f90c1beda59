//! Read-through/write-through cache for entity records.
//!
//! Each lookup goes cache first, falls back to the [`RecordStore`] on a
//! miss, and repopulates the cache before returning. Records are cached as
//! snapshots; list queries are cached as ordered snapshot lists; confirmed
//! absences can be cached as negative markers on request.
//!
//! The cache never observes writes to the record store on its own.
//! Callers invalidate with [`ModelCache::clear_models`] or refresh with
//! [`ModelCache::set_model`] / [`ModelCache::set_model_list`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use modelcache_core::{
    CacheConfig, CacheResult, CacheStoreError, EntitySchema, FilterSet, KeyError, Record, Scalar,
    StorageError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::command_guard::{CommandAllowlist, CommandGuard};
use super::key_codec::{CacheKey, KeyCodec};
use super::snapshot::{CachedEntry, CachedRecord, Snapshot};
use super::traits::{CacheStats, CacheStore, NativeCommands};
use crate::RecordStore;

/// Read-through model cache.
///
/// # Type Parameters
///
/// - `C`: The cache store holding snapshots and markers
/// - `S`: The record store consulted on cache miss
///
/// # Example
///
/// ```ignore
/// let cache = ModelCache::with_defaults(Arc::new(InMemoryCacheStore::new()), store)?;
///
/// let album = cache.get_model(&album_schema, &FilterSet::pk(1)).await?;
/// let missing = cache
///     .get_model_or_none(&album_schema, &FilterSet::new().with("artist", "Tay-Tay"))
///     .await?;
/// assert!(missing.is_none());
/// ```
pub struct ModelCache<C, S>
where
    C: CacheStore,
    S: RecordStore,
{
    /// The cache store.
    cache: Arc<C>,
    /// The source of truth.
    store: Arc<S>,
    codec: KeyCodec,
    /// Shared with every guard handed out by `commands()`.
    allowlist: CommandAllowlist,
    config: CacheConfig,
}

impl<C, S> Clone for ModelCache<C, S>
where
    C: CacheStore,
    S: RecordStore,
{
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
            codec: self.codec.clone(),
            allowlist: self.allowlist.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C, S> ModelCache<C, S>
where
    C: CacheStore,
    S: RecordStore,
{
    /// Create a model cache. Fails if `config` does not validate.
    pub fn new(cache: Arc<C>, store: Arc<S>, config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            cache,
            store,
            codec: KeyCodec::new(config.key_version),
            allowlist: CommandAllowlist::from_config(&config),
            config,
        })
    }

    /// Create a model cache with default configuration.
    pub fn with_defaults(cache: Arc<C>, store: Arc<S>) -> CacheResult<Self> {
        Self::new(cache, store, CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// Get a reference to the cache store.
    pub fn backend(&self) -> &C {
        &self.cache
    }

    /// Get a reference to the record store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The shared command allowlist.
    pub fn allowlist(&self) -> &CommandAllowlist {
        &self.allowlist
    }

    // ========================================================================
    // SINGLE RECORDS
    // ========================================================================

    /// Get exactly one record matching `filters`.
    ///
    /// Absence is never cached here: a miss that the record store cannot
    /// satisfy fails with [`StorageError::NotFound`]. A negative marker left
    /// by [`get_model_or_none`](Self::get_model_or_none) also fails with
    /// `NotFound`, without consulting the record store.
    pub async fn get_model(
        &self,
        schema: &EntitySchema,
        filters: &FilterSet,
    ) -> CacheResult<CachedRecord> {
        self.lookup(schema, filters, false).await?.ok_or_else(|| {
            StorageError::NotFound {
                entity: schema.name().to_string(),
                filters: filters.to_string(),
            }
            .into()
        })
    }

    /// Get exactly one record matching `filters`, caching absence.
    ///
    /// When the record store has no match, a negative marker is written under
    /// the lookup key and `None` is returned. Later calls return `None` from
    /// the marker until it expires or is overwritten.
    pub async fn get_model_or_none(
        &self,
        schema: &EntitySchema,
        filters: &FilterSet,
    ) -> CacheResult<Option<CachedRecord>> {
        self.lookup(schema, filters, true).await
    }

    async fn lookup(
        &self,
        schema: &EntitySchema,
        filters: &FilterSet,
        cache_absent: bool,
    ) -> CacheResult<Option<CachedRecord>> {
        let key = self.codec.key_for_lookup(schema, filters)?;

        match self.read_entry(&key).await? {
            Some(CachedEntry::Record(snapshot)) => {
                debug!(key = %key, entity = schema.name(), "model cache hit");
                return Ok(Some(self.reconstruct(schema, snapshot, true)));
            }
            Some(CachedEntry::Absent { .. }) => {
                debug!(key = %key, entity = schema.name(), "negative cache hit");
                return Ok(None);
            }
            Some(other) => {
                warn!(
                    key = %key,
                    kind = other.kind(),
                    "unexpected entry under model key, treating as miss"
                );
            }
            None => {
                debug!(key = %key, entity = schema.name(), "model cache miss");
            }
        }

        match self.store.get_one(schema, filters).await {
            Ok(record) => {
                let snapshot = Snapshot::of(&record);
                self.write_entry(
                    &key,
                    &CachedEntry::Record(snapshot.clone()),
                    self.config.entry_ttl,
                )
                .await?;
                debug!(key = %key, entity = schema.name(), "model cache populated");
                Ok(Some(self.reconstruct(schema, snapshot, false)))
            }
            Err(err) if cache_absent && err.is_not_found() => {
                self.write_entry(&key, &CachedEntry::absent(), self.config.negative_ttl)
                    .await?;
                debug!(key = %key, entity = schema.name(), "cached negative result");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Cache an already-fetched record under its primary-key address.
    ///
    /// List entries that may include the record are left untouched.
    pub async fn set_model(&self, schema: &EntitySchema, record: &Record) -> CacheResult<CacheKey> {
        let pk = record.pk(schema).ok_or_else(|| {
            KeyError::invalid(format!(
                "{} record has no value for primary key {}",
                schema.name(),
                schema.pk_field()
            ))
        })?;
        let key = self.codec.key_of_model(schema, &Scalar::from_json(pk)?)?;

        self.write_entry(
            &key,
            &CachedEntry::Record(Snapshot::of(record)),
            self.config.entry_ttl,
        )
        .await?;
        debug!(key = %key, entity = schema.name(), "model cached");
        Ok(key)
    }

    /// Create a record in the record store and cache it.
    ///
    /// The unfiltered list and the list and single-match entries for each
    /// `{field: value}` pair of the new record are dropped, so neither a
    /// cached list nor a negative marker left by an earlier single-field
    /// lookup hides it.
    pub async fn create_model(
        &self,
        schema: &EntitySchema,
        fields: BTreeMap<String, Value>,
    ) -> CacheResult<CachedRecord> {
        let record = self.store.create(schema, fields).await?;
        self.set_model(schema, &record).await?;

        let mut stale = vec![self
            .codec
            .key_of_model_list(schema, &FilterSet::new())?
            .into_string()];
        for (field, value) in record.fields() {
            let Ok(value) = Scalar::from_json(value) else {
                continue;
            };
            let filters = FilterSet::new().with(field.as_str(), value);
            stale.push(self.codec.key_of_model_list(schema, &filters)?.into_string());
            stale.push(self.codec.key_of_model_match(schema, &filters)?.into_string());
        }
        self.cache.delete_many(&stale).await?;

        Ok(self.reconstruct(schema, Snapshot::of(&record), false))
    }

    // ========================================================================
    // LISTS
    // ========================================================================

    /// Get every record matching `filters`, in record store order.
    ///
    /// Empty results are cached like any other list.
    pub async fn get_model_list(
        &self,
        schema: &EntitySchema,
        filters: &FilterSet,
    ) -> CacheResult<Vec<CachedRecord>> {
        let key = self.codec.key_of_model_list(schema, filters)?;

        match self.read_entry(&key).await? {
            Some(CachedEntry::List { items }) => {
                debug!(key = %key, entity = schema.name(), count = items.len(), "list cache hit");
                return Ok(self.reconstruct_all(schema, items, true));
            }
            Some(other) => {
                warn!(
                    key = %key,
                    kind = other.kind(),
                    "unexpected entry under list key, treating as miss"
                );
            }
            None => {
                debug!(key = %key, entity = schema.name(), "list cache miss");
            }
        }

        let items = self.populate_list(schema, filters, &key).await?;
        Ok(self.reconstruct_all(schema, items, false))
    }

    /// Re-query the record store and overwrite the cached list for `filters`.
    ///
    /// Returns the number of records cached.
    pub async fn set_model_list(
        &self,
        schema: &EntitySchema,
        filters: &FilterSet,
    ) -> CacheResult<usize> {
        let key = self.codec.key_of_model_list(schema, filters)?;
        Ok(self.populate_list(schema, filters, &key).await?.len())
    }

    async fn populate_list(
        &self,
        schema: &EntitySchema,
        filters: &FilterSet,
        key: &CacheKey,
    ) -> CacheResult<Vec<Snapshot>> {
        let records = self.store.query(schema, filters).await?;
        let items: Vec<Snapshot> = records.iter().map(Snapshot::of).collect();

        self.write_entry(
            key,
            &CachedEntry::List {
                items: items.clone(),
            },
            self.config.list_ttl,
        )
        .await?;
        debug!(key = %key, entity = schema.name(), count = items.len(), "list cache populated");
        Ok(items)
    }

    // ========================================================================
    // BULK
    // ========================================================================

    /// Get records by primary key, in the order of `ids`.
    ///
    /// Cached entries are fetched in one batch; misses fall back to the
    /// record store one id at a time. Ids with no record are omitted and no
    /// negative marker is written for them.
    pub async fn get_models(
        &self,
        schema: &EntitySchema,
        ids: &[Scalar],
    ) -> CacheResult<Vec<CachedRecord>> {
        let keys = ids
            .iter()
            .map(|id| self.codec.key_of_model(schema, id))
            .collect::<CacheResult<Vec<_>>>()?;
        let raw_keys: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();
        let cached = self.cache.get_many(&raw_keys).await?;

        let mut records = Vec::with_capacity(ids.len());
        let mut misses = 0usize;
        for ((id, key), value) in ids.iter().zip(&keys).zip(cached) {
            let entry = value.map(|bytes| CachedEntry::decode(&bytes)).transpose()?;
            match entry {
                Some(CachedEntry::Record(snapshot)) => {
                    records.push(self.reconstruct(schema, snapshot, true));
                    continue;
                }
                Some(CachedEntry::Absent { .. }) => continue,
                Some(other) => {
                    warn!(
                        key = %key,
                        kind = other.kind(),
                        "unexpected entry under model key, treating as miss"
                    );
                }
                None => {}
            }

            misses += 1;
            let filters = FilterSet::new().with(schema.pk_field(), id.clone());
            match self.store.get_one(schema, &filters).await {
                Ok(record) => {
                    let snapshot = Snapshot::of(&record);
                    self.write_entry(
                        key,
                        &CachedEntry::Record(snapshot.clone()),
                        self.config.entry_ttl,
                    )
                    .await?;
                    records.push(self.reconstruct(schema, snapshot, false));
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }

        debug!(
            entity = schema.name(),
            requested = ids.len(),
            resolved = records.len(),
            misses,
            "bulk model lookup"
        );
        Ok(records)
    }

    // ========================================================================
    // INVALIDATION
    // ========================================================================

    /// Drop cached entries addressed by `field = value` for each value.
    ///
    /// Removes the list and single-match entries for `{field: value}`, and
    /// the single-record entry when `field` is the primary key. Returns the
    /// number of entries that existed.
    pub async fn clear_models(
        &self,
        schema: &EntitySchema,
        field: &str,
        values: &[Scalar],
    ) -> CacheResult<u64> {
        let mut keys = Vec::with_capacity(values.len() * 3);
        for value in values {
            if schema.is_pk(field) {
                keys.push(self.codec.key_of_model(schema, value)?.into_string());
            }
            let filters = FilterSet::new().with(field, value.clone());
            keys.push(self.codec.key_of_model_list(schema, &filters)?.into_string());
            keys.push(self.codec.key_of_model_match(schema, &filters)?.into_string());
        }

        let deleted = self.cache.delete_many(&keys).await?;
        debug!(entity = schema.name(), field, deleted, "cleared model cache entries");
        Ok(deleted)
    }

    // ========================================================================
    // RAW PASSTHROUGH
    // ========================================================================

    /// Atomically add `amount` to the counter at `key`. Missing keys start at 0.
    pub async fn incr(&self, key: &str, amount: i64) -> CacheResult<i64> {
        self.cache.incr(key, amount).await
    }

    /// Read a JSON-encoded value.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.cache.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                CacheStoreError::Serialization {
                    reason: e.to_string(),
                }
                .into()
            }),
            None => Ok(None),
        }
    }

    /// Write a JSON-encoded value.
    pub async fn set<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheStoreError::Serialization {
            reason: e.to_string(),
        })?;
        self.cache.set(key, bytes, ttl).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.cache.delete(key).await
    }

    /// Drop every entry in the cache store.
    pub async fn clear(&self) -> CacheResult<u64> {
        self.cache.clear().await
    }

    pub async fn stats(&self) -> CacheResult<CacheStats> {
        self.cache.stats().await
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    async fn read_entry(&self, key: &CacheKey) -> CacheResult<Option<CachedEntry>> {
        match self.cache.get(key.as_str()).await? {
            Some(bytes) => CachedEntry::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn write_entry(
        &self,
        key: &CacheKey,
        entry: &CachedEntry,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        self.cache.set(key.as_str(), entry.encode()?, ttl).await
    }

    fn reconstruct(&self, schema: &EntitySchema, snapshot: Snapshot, hit: bool) -> CachedRecord {
        CachedRecord::from_snapshot(
            schema.name(),
            schema.pk_field(),
            &self.store.list_fields(schema),
            snapshot,
            hit,
        )
    }

    fn reconstruct_all(
        &self,
        schema: &EntitySchema,
        items: Vec<Snapshot>,
        hit: bool,
    ) -> Vec<CachedRecord> {
        let known = self.store.list_fields(schema);
        items
            .into_iter()
            .map(|snapshot| {
                CachedRecord::from_snapshot(schema.name(), schema.pk_field(), &known, snapshot, hit)
            })
            .collect()
    }
}

impl<C, S> ModelCache<C, S>
where
    C: CacheStore + NativeCommands,
    S: RecordStore,
{
    /// Guarded access to the cache store's native commands.
    pub fn commands(&self) -> CommandGuard<C> {
        CommandGuard::new(self.allowlist.clone(), Arc::clone(&self.cache))
    }
}
