//! Configuration types
//!
//! Configuration can be built in code or loaded from environment variables
//! with defaults for anything unset.

use std::time::Duration;

use chrono::{TimeDelta, Utc};

use crate::error::{CacheResult, ConfigError};

/// Native commands exposed through the command guard unless configured otherwise.
pub const DEFAULT_SUPPORTED_COMMANDS: &[&str] = &[
    "exists",
    "expire",
    "ttl",
    "incrby",
    "decrby",
    "sadd",
    "srem",
    "smembers",
    "sismember",
    "scard",
    "hset",
    "hget",
    "hdel",
    "hgetall",
    "hlen",
    "lpush",
    "rpush",
    "lrange",
    "llen",
];

/// Configuration for the model cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Expiry for single-record entries. `None` keeps them until invalidated.
    pub entry_ttl: Option<Duration>,
    /// Expiry for cached list results.
    pub list_ttl: Option<Duration>,
    /// Expiry for negative ("confirmed absent") markers.
    pub negative_ttl: Option<Duration>,
    /// Version suffix embedded in every derived key.
    pub key_version: u32,
    /// Initial allowlist of native commands.
    pub supported_commands: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl: Some(Duration::from_secs(3600)), // 1 hour
            list_ttl: Some(Duration::from_secs(3600)),
            negative_ttl: Some(Duration::from_secs(300)), // 5 minutes
            key_version: 1,
            supported_commands: DEFAULT_SUPPORTED_COMMANDS
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// Environment variables:
    /// - `MODELCACHE_ENTRY_TTL_SECS`: single-record expiry, `0` disables (default: 3600)
    /// - `MODELCACHE_LIST_TTL_SECS`: list expiry, `0` disables (default: 3600)
    /// - `MODELCACHE_NEGATIVE_TTL_SECS`: negative marker expiry, `0` disables (default: 300)
    /// - `MODELCACHE_KEY_VERSION`: key version suffix (default: 1)
    /// - `MODELCACHE_SUPPORTED_COMMANDS`: comma-separated command allowlist
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let ttl = |name: &str, default: Option<Duration>| {
            match lookup(name).and_then(|v| v.trim().parse::<u64>().ok()) {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => default,
            }
        };

        let key_version = lookup("MODELCACHE_KEY_VERSION")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(defaults.key_version);

        let supported_commands = lookup("MODELCACHE_SUPPORTED_COMMANDS")
            .map(|v| {
                v.split(',')
                    .map(|c| c.trim().to_lowercase())
                    .filter(|c| !c.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|commands| !commands.is_empty())
            .unwrap_or_else(|| defaults.supported_commands.clone());

        Self {
            entry_ttl: ttl("MODELCACHE_ENTRY_TTL_SECS", defaults.entry_ttl),
            list_ttl: ttl("MODELCACHE_LIST_TTL_SECS", defaults.list_ttl),
            negative_ttl: ttl("MODELCACHE_NEGATIVE_TTL_SECS", defaults.negative_ttl),
            key_version,
            supported_commands,
        }
    }

    /// Set the single-record TTL.
    pub fn with_entry_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Set the list TTL.
    pub fn with_list_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.list_ttl = ttl;
        self
    }

    /// Set the negative marker TTL.
    pub fn with_negative_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.negative_ttl = ttl;
        self
    }

    /// Set the key version.
    pub fn with_key_version(mut self, version: u32) -> Self {
        self.key_version = version;
        self
    }

    /// Replace the command allowlist.
    pub fn with_supported_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_commands = commands.into_iter().map(Into::into).collect();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CacheResult<()> {
        if self.key_version == 0 {
            return Err(ConfigError::InvalidValue {
                field: "key_version".to_string(),
                value: "0".to_string(),
                reason: "key version must be at least 1".to_string(),
            }
            .into());
        }

        for (field, ttl) in [
            ("entry_ttl", self.entry_ttl),
            ("list_ttl", self.list_ttl),
            ("negative_ttl", self.negative_ttl),
        ] {
            let Some(ttl) = ttl else {
                continue;
            };
            if ttl.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0s".to_string(),
                    reason: "use None to disable expiry".to_string(),
                }
                .into());
            }
            let representable = TimeDelta::from_std(ttl)
                .ok()
                .and_then(|delta| Utc::now().checked_add_signed(delta))
                .is_some();
            if !representable {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: format!("{}s", ttl.as_secs()),
                    reason: "expiry would overflow the clock".to_string(),
                }
                .into());
            }
        }

        for command in &self.supported_commands {
            if command.is_empty() || command.chars().any(|c| c.is_whitespace() || c.is_uppercase())
            {
                return Err(ConfigError::InvalidValue {
                    field: "supported_commands".to_string(),
                    value: command.clone(),
                    reason: "command names must be non-empty lowercase words".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}
