//! Cache store traits.
//!
//! [`CacheStore`] is the structured-value surface the model cache uses for
//! its own entries. [`NativeCommands`] is the raw command surface of the
//! backend, only reachable through the command guard.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use modelcache_core::{CacheResult, CacheStoreError, CommandError, Scalar};

/// Key-value cache store used by the model cache.
///
/// Values are opaque byte payloads. Implementations must make `incr`
/// atomic; the model cache adds no locking of its own.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value, or `None` when absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Get several values in one call. The result lines up with `keys`.
    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Store a value with an optional expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete a value. Returns true if it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Delete several values, returning how many existed.
    async fn delete_many(&self, keys: &[String]) -> CacheResult<u64> {
        let mut deleted = 0u64;
        for key in keys {
            if self.delete(key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Atomically add `amount` to the integer stored at `key`.
    ///
    /// A missing key counts as zero. Returns the new value.
    async fn incr(&self, key: &str, amount: i64) -> CacheResult<i64>;

    /// Drop every entry, returning how many were removed.
    async fn clear(&self) -> CacheResult<u64>;

    /// Get cache statistics.
    async fn stats(&self) -> CacheResult<CacheStats>;
}

/// Raw command surface of a cache backend.
#[async_trait]
pub trait NativeCommands: Send + Sync {
    /// Whether the backend has an implementation for `command`.
    fn implements(&self, command: &str) -> bool;

    /// Run a command. Callers go through the command guard.
    async fn execute(&self, command: &str, args: &[Scalar]) -> CacheResult<Reply>;
}

/// Reply of a native command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Ok,
    Int(i64),
    Data(Vec<u8>),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Reply::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Collect an array of data replies into a set, as `smembers` returns.
    pub fn into_set(self) -> BTreeSet<Vec<u8>> {
        match self {
            Reply::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Reply::Data(d) => Some(d),
                    _ => None,
                })
                .collect(),
            _ => BTreeSet::new(),
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate payload size in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because they expired.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// COMMAND ARGUMENTS AND EXPIRY
// ============================================================================

/// Fail with `WrongArity` unless at least `expected` arguments were given.
pub(crate) fn require_args(command: &str, args: &[Scalar], expected: usize) -> CacheResult<()> {
    if args.len() < expected {
        return Err(CommandError::WrongArity {
            command: command.to_string(),
            expected,
            got: args.len(),
        }
        .into());
    }
    Ok(())
}

/// The key named by argument `index`.
pub(crate) fn key_arg(args: &[Scalar], index: usize) -> CacheResult<String> {
    Ok(args[index].canonical()?.into_owned())
}

/// Argument `index` as an integer.
pub(crate) fn int_arg(command: &str, args: &[Scalar], index: usize) -> CacheResult<i64> {
    args[index].as_i64().ok_or_else(|| {
        CommandError::InvalidArgument {
            command: command.to_string(),
            reason: format!("{} is not an integer", args[index]),
        }
        .into()
    })
}

/// The instant `ttl` after `now`.
pub(crate) fn expiry_after(ttl: Duration, now: DateTime<Utc>) -> CacheResult<DateTime<Utc>> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| {
            CacheStoreError::TtlOutOfRange {
                ttl_secs: ttl.as_secs(),
            }
            .into()
        })
}

/// The instant `seconds` after `now`, for the `expire` command.
pub(crate) fn expiry_in_seconds(
    command: &str,
    seconds: i64,
    now: DateTime<Utc>,
) -> CacheResult<DateTime<Utc>> {
    TimeDelta::try_seconds(seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| {
            CommandError::InvalidArgument {
                command: command.to_string(),
                reason: format!("expiry of {} seconds is out of range", seconds),
            }
            .into()
        })
}
