//! Cache layer: key derivation, cache stores and the read-through model cache.
//!
//! # Design Philosophy
//!
//! The cache is a snapshot, not a live proxy. A record read from the cache
//! exposes exactly the fields it had when it was written, and the cache never
//! observes record store writes on its own: invalidation is explicit through
//! [`ModelCache::clear_models`].
//!
//! # Layout
//!
//! - [`KeyCodec`] and [`KeyNamespace`] derive stable, namespaced keys
//! - [`CacheStore`] is the byte-level store the model cache writes to, with
//!   [`InMemoryCacheStore`] and [`LmdbCacheStore`] as implementations
//! - [`CommandGuard`] exposes an allowlisted subset of a store's
//!   [`NativeCommands`]
//! - [`ModelCache`] ties them to a [`RecordStore`](crate::RecordStore)
//!
//! # Example
//!
//! ```ignore
//! let cache = ModelCache::with_defaults(Arc::new(InMemoryCacheStore::new()), store)?;
//!
//! let albums = cache
//!     .get_model_list(&album, &FilterSet::new().with("artist", "Taylor Swift"))
//!     .await?;
//!
//! // Native commands go through the allowlist
//! let ids = cache.commands().call("smembers", &["album_ids".into()]).await?;
//! ```

pub mod command_guard;
pub mod key_codec;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod model_cache;
pub mod namespace;
pub mod snapshot;
pub mod traits;

pub use command_guard::{BoundCommand, CommandAllowlist, CommandGuard};
pub use key_codec::{CacheKey, KeyCodec};
pub use lmdb_backend::{LmdbCacheError, LmdbCacheStore};
pub use memory_backend::InMemoryCacheStore;
pub use model_cache::ModelCache;
pub use namespace::{KeyGenerator, KeyNamespace, KEY_FN_PREFIX};
pub use snapshot::{CachedEntry, CachedRecord, Snapshot};
pub use traits::{CacheStats, CacheStore, NativeCommands, Reply};
