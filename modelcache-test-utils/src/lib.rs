//! modelcache test utilities
//!
//! Centralized test infrastructure for the modelcache workspace:
//! - Proptest generators for filters and scalar values
//! - Test fixtures (an album entity with seed data)
//! - Custom assertions for modelcache error conditions
//! - Tracing setup for tests

// Re-export mock storage from its source crate
pub use modelcache_storage::MockRecordStore;

// Re-export core types for convenience
pub use modelcache_core::{
    CacheConfig, CacheError, CacheResult, CommandError, EntitySchema, FieldKind, FilterSet,
    KeyError, MissingFieldReason, Record, Scalar, StorageError,
};

use std::sync::Arc;

use modelcache_storage::{InMemoryCacheStore, ModelCache};
use tracing_subscriber::EnvFilter;

/// Install a test subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("modelcache_storage=debug,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for filter sets and scalar values.

    use super::*;
    use proptest::prelude::*;

    /// Generate a field name accepted by key derivation.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }

    /// Generate a scalar whose canonical form is valid UTF-8.
    pub fn arb_scalar() -> impl Strategy<Value = Scalar> {
        prop_oneof![
            "[a-zA-Z0-9 _-]{0,20}".prop_map(Scalar::Text),
            "[a-zA-Z0-9]{0,20}".prop_map(|s| Scalar::Bytes(s.into_bytes())),
            any::<i64>().prop_map(Scalar::Int),
            any::<bool>().prop_map(Scalar::Bool),
        ]
    }

    /// Generate pairs for a filter set, with distinct field names.
    pub fn arb_filter_pairs(max: usize) -> impl Strategy<Value = Vec<(String, Scalar)>> {
        prop::collection::btree_map(arb_field_name(), arb_scalar(), 0..=max)
            .prop_map(|map| map.into_iter().collect())
    }

    /// Generate a filter set of up to `max` fields.
    pub fn arb_filter_set(max: usize) -> impl Strategy<Value = FilterSet> {
        arb_filter_pairs(max).prop_map(|pairs| pairs.into_iter().collect())
    }

    /// Generate an entity name accepted by key derivation.
    pub fn arb_entity_name() -> impl Strategy<Value = String> {
        "[a-z][a-z_]{0,15}"
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built entities and stores for common test scenarios.

    use super::*;
    use serde_json::json;

    /// Artist with several albums in the seed data.
    pub const SEED_ARTIST: &str = "Taylor Swift";

    /// Number of seeded albums by [`SEED_ARTIST`].
    pub const SEED_ARTIST_ALBUMS: usize = 4;

    /// Primary keys of albums by [`SEED_ARTIST`].
    pub const SEED_ARTIST_IDS: [i64; SEED_ARTIST_ALBUMS] = [1, 2, 3, 4];

    /// The album entity: integer `id` pk, `artist`, `title`, `year`.
    pub fn album_schema() -> EntitySchema {
        EntitySchema::new("album", "id", FieldKind::Integer)
            .with_field("artist", FieldKind::Text)
            .with_field("title", FieldKind::Text)
            .with_field("year", FieldKind::Integer)
    }

    /// An album record with the given primary key.
    pub fn album(id: i64, artist: &str, title: &str, year: i64) -> Record {
        let fields = [
            ("id".to_string(), json!(id)),
            ("artist".to_string(), json!(artist)),
            ("title".to_string(), json!(title)),
            ("year".to_string(), json!(year)),
        ]
        .into_iter()
        .collect();
        Record::new("album", fields)
    }

    /// Seed albums, in insertion order.
    pub fn seed_albums() -> Vec<Record> {
        vec![
            album(1, SEED_ARTIST, "Taylor Swift", 2006),
            album(2, SEED_ARTIST, "Fearless", 2008),
            album(3, SEED_ARTIST, "Speak Now", 2010),
            album(4, SEED_ARTIST, "Red", 2012),
            album(5, "Adele", "21", 2011),
        ]
    }

    /// A record store holding the seed albums.
    pub fn seeded_album_store() -> MockRecordStore {
        let store = MockRecordStore::new();
        for record in seed_albums() {
            // A fresh store's lock cannot be poisoned.
            store.insert(record).expect("insert into fresh store");
        }
        store
    }

    /// A model cache over an in-memory cache store and the seeded record store.
    pub fn memory_model_cache() -> ModelCache<InMemoryCacheStore, MockRecordStore> {
        memory_model_cache_with(CacheConfig::default())
    }

    /// Like [`memory_model_cache`] with an explicit config.
    pub fn memory_model_cache_with(
        config: CacheConfig,
    ) -> ModelCache<InMemoryCacheStore, MockRecordStore> {
        ModelCache::new(
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(seeded_album_store()),
            config,
        )
        .expect("fixture config should be valid")
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for modelcache error conditions.

    use super::*;

    /// Assert that a CacheResult is a NotFound storage error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Storage(StorageError::NotFound { .. })) => {}
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    /// Assert that a CacheResult is an invalid-key error.
    #[track_caller]
    pub fn assert_invalid_key<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Key(KeyError::InvalidKey { .. })) => {}
            other => panic!("Expected InvalidKey error, got: {:?}", other),
        }
    }

    /// Assert that a CacheResult is a missing-field error with the given reason.
    #[track_caller]
    pub fn assert_missing_field<T: std::fmt::Debug>(
        result: &CacheResult<T>,
        expected: MissingFieldReason,
    ) {
        match result {
            Err(CacheError::MissingField { reason, .. }) => {
                assert_eq!(*reason, expected, "Wrong reason in MissingField error");
            }
            other => panic!("Expected MissingField error, got: {:?}", other),
        }
    }

    /// Assert that a CacheResult is a NotSupported command error.
    #[track_caller]
    pub fn assert_not_supported<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Command(CommandError::NotSupported { .. })) => {}
            other => panic!("Expected NotSupported error, got: {:?}", other),
        }
    }

    /// Assert that a CacheResult is a NotImplemented command error.
    #[track_caller]
    pub fn assert_not_implemented<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Command(CommandError::NotImplemented { .. })) => {}
            other => panic!("Expected NotImplemented error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;

    #[test]
    fn test_seeded_store_contents() {
        let store = seeded_album_store();
        assert_eq!(store.len("album"), seed_albums().len());
        let by_artist = seed_albums()
            .iter()
            .filter(|r| r.get("artist") == Some(&serde_json::json!(SEED_ARTIST)))
            .count();
        assert_eq!(by_artist, SEED_ARTIST_ALBUMS);
    }
}
