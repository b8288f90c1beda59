//! modelcache core - data types
//!
//! Pure data structures shared by every other crate: scalar filter values,
//! entity schemas, persistent records, the error taxonomy and configuration.
//! This crate contains no I/O.

pub mod config;
pub mod entities;
pub mod error;
pub mod filter;

pub use config::{CacheConfig, DEFAULT_SUPPORTED_COMMANDS};
pub use entities::{EntitySchema, FieldDef, FieldKind, Record};
pub use error::{
    CacheError, CacheResult, CacheStoreError, CommandError, ConfigError, KeyError,
    MissingFieldReason, StorageError,
};
pub use filter::{FilterSet, Scalar, PK_ALIAS};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
