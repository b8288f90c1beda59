//! Error types for modelcache operations

use thiserror::Error;

/// Persistent record store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{entity} matching {filters} does not exist")]
    NotFound { entity: String, filters: String },

    #[error("{entity} matching {filters} returned {count} records, expected exactly one")]
    MultipleMatches {
        entity: String,
        filters: String,
        count: usize,
    },

    #[error("Insert failed for {entity}: {reason}")]
    InsertFailed { entity: String, reason: String },

    #[error("Unknown field {field} on {entity}")]
    UnknownField { entity: String, field: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Key derivation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid cache key input: {reason}")]
    InvalidKey { reason: String },
}

impl KeyError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }
}

/// Native command dispatch errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The command is deliberately not exposed.
    #[error("Command not supported: {command}")]
    NotSupported { command: String },

    /// The command is allowlisted but the backend has no implementation.
    #[error("Command {command} is allowlisted but not implemented by the backend")]
    NotImplemented { command: String },

    #[error("Wrong number of arguments for {command}: expected at least {expected}, got {got}")]
    WrongArity {
        command: String,
        expected: usize,
        got: usize,
    },

    #[error("{command} against key {key} holding the wrong kind of value")]
    WrongType { command: String, key: String },

    #[error("Invalid argument for {command}: {reason}")]
    InvalidArgument { command: String, reason: String },
}

/// Cache store (backend) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheStoreError {
    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Value at {key} is not an integer")]
    NotAnInteger { key: String },

    #[error("Value at {key} is not a plain value")]
    WrongType { key: String },

    #[error("TTL of {ttl_secs}s does not fit the expiry clock")]
    TtlOutOfRange { ttl_secs: u64 },

    #[error("Cache store lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Why a field could not be read from a cached record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MissingFieldReason {
    /// The entity type has no such field.
    UnknownToEntity,
    /// The field exists on the entity type but was not in the cached snapshot.
    NotCaptured,
}

/// Master error type for all modelcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Cache store error: {0}")]
    Store(#[from] CacheStoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{entity} has no attribute {field} ({reason:?})")]
    MissingField {
        entity: String,
        field: String,
        reason: MissingFieldReason,
    },
}

impl CacheError {
    /// True when this is the persistent store's "no match" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Storage(StorageError::NotFound { .. }))
    }

    /// True for missing-attribute access on a reconstructed record.
    pub fn is_missing_field(&self) -> bool {
        matches!(self, CacheError::MissingField { .. })
    }
}

/// Result type alias for modelcache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
