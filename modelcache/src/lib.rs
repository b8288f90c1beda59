//! modelcache - read-through/write-through caching for entity records
//!
//! Sits between application code and two backing resources: a persistent
//! [`RecordStore`] and a key-value [`CacheStore`]. Lookups are served from
//! the cache when possible and fall back to the record store on miss,
//! repopulating the cache on the way out.
//!
//! ```ignore
//! use std::sync::Arc;
//! use modelcache::{FilterSet, InMemoryCacheStore, ModelCache};
//!
//! let cache = ModelCache::with_defaults(Arc::new(InMemoryCacheStore::new()), Arc::new(store))?;
//!
//! let album = cache.get_model(&album_schema, &FilterSet::pk(1)).await?;
//! let albums = cache
//!     .get_model_list(&album_schema, &FilterSet::new().with("artist", "Taylor Swift"))
//!     .await?;
//! cache.clear_models(&album_schema, "artist", &["Taylor Swift".into()]).await?;
//! ```

pub use modelcache_core::{
    CacheConfig, CacheError, CacheResult, CacheStoreError, CommandError, ConfigError,
    EntitySchema, FieldDef, FieldKind, FilterSet, KeyError, MissingFieldReason, Record, Scalar,
    StorageError, DEFAULT_SUPPORTED_COMMANDS, PK_ALIAS,
};
pub use modelcache_storage::cache::KEY_FN_PREFIX;
pub use modelcache_storage::{
    key_group, BoundCommand, CacheKey, CacheStats, CacheStore, CachedEntry, CachedRecord,
    CommandAllowlist, CommandGuard, InMemoryCacheStore, KeyCodec, KeyGenerator, KeyNamespace,
    LmdbCacheError, LmdbCacheStore, MockRecordStore, ModelCache, NativeCommands, RecordStore,
    Reply, Snapshot,
};
