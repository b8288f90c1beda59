//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped,
//! persistent cache store that survives process restarts.
//!
//! # Value Format
//!
//! Every value is stored as `[expires_at: 8 bytes LE millis][payload]`, where
//! an `expires_at` of zero means the value never expires. Expired values are
//! reported as absent and removed the next time they are read.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get`
//! - Write transactions for `set`, `delete`, `incr` and `clear`
//! - Statistics are tracked with atomic counters
//!
//! `incr` reads and writes inside a single write transaction, so concurrent
//! increments never lose an update.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use modelcache_core::{CacheError, CacheResult, CacheStoreError, CommandError, Scalar};

use super::traits::{
    expiry_after, expiry_in_seconds, int_arg, key_arg, require_args, CacheStats, CacheStore,
    NativeCommands, Reply,
};

/// Size of the expiry prefix on every stored value.
const ENVELOPE_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stored value is shorter than its envelope.
    #[error("Corrupt value at {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Store(CacheStoreError::Backend {
            reason: e.to_string(),
        })
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Expiry in epoch millis for a value written now, 0 when `ttl` is `None`.
fn expiry_millis(ttl: Option<Duration>) -> CacheResult<i64> {
    match ttl {
        Some(ttl) => Ok(expiry_after(ttl, Utc::now())?.timestamp_millis()),
        None => Ok(0),
    }
}

/// Wrap a payload in the expiry envelope.
fn seal(payload: &[u8], expires_at: i64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ENVELOPE_LEN + payload.len());
    bytes.extend_from_slice(&expires_at.to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Split a stored value into its expiry (0 = none) and payload.
fn open(key: &str, bytes: &[u8]) -> Result<(i64, Vec<u8>), LmdbCacheError> {
    if bytes.len() < ENVELOPE_LEN {
        return Err(LmdbCacheError::Corrupt(key.to_string()));
    }
    let expiry_bytes: [u8; ENVELOPE_LEN] = bytes[..ENVELOPE_LEN]
        .try_into()
        .map_err(|_| LmdbCacheError::Corrupt(key.to_string()))?;
    Ok((
        i64::from_le_bytes(expiry_bytes),
        bytes[ENVELOPE_LEN..].to_vec(),
    ))
}

fn is_expired(expires_at: i64, now_millis: i64) -> bool {
    expires_at != 0 && expires_at <= now_millis
}

/// LMDB-backed cache store.
///
/// # Example
///
/// ```ignore
/// use modelcache_storage::cache::{CacheStore, LmdbCacheStore};
///
/// let store = LmdbCacheStore::new("/tmp/modelcache", 100)?;
/// store.set("greeting", b"hello".to_vec(), None).await?;
/// assert_eq!(store.get("greeting").await?, Some(b"hello".to_vec()));
/// ```
pub struct LmdbCacheStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LmdbCacheStore {
    /// Create a new LMDB cache store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    /// Read the live payload and expiry at `key` inside a write transaction,
    /// removing it if it has expired.
    fn read_live(
        &self,
        wtxn: &mut RwTxn<'_>,
        key: &str,
    ) -> Result<Option<(i64, Vec<u8>)>, LmdbCacheError> {
        let stored = self
            .db
            .get(wtxn, key.as_bytes())
            .map_err(txn_err)?
            .map(|bytes| open(key, bytes))
            .transpose()?;

        match stored {
            Some((expires_at, _)) if is_expired(expires_at, Utc::now().timestamp_millis()) => {
                self.db.delete(wtxn, key.as_bytes()).map_err(txn_err)?;
                self.evictions.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Drop an expired value found by a read transaction.
    fn evict(&self, key: &str) -> Result<(), LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        // Re-checked under the write transaction in case it was rewritten.
        self.read_live(&mut wtxn, key)?;
        wtxn.commit().map_err(txn_err)
    }

    fn incr_by(&self, key: &str, amount: i64) -> CacheResult<i64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let (expires_at, current) = match self.read_live(&mut wtxn, key)? {
            None => (0, 0),
            Some((expires_at, payload)) => {
                let current = std::str::from_utf8(&payload)
                    .ok()
                    .and_then(|s| s.trim().parse::<i64>().ok())
                    .ok_or_else(|| CacheStoreError::NotAnInteger {
                        key: key.to_string(),
                    })?;
                (expires_at, current)
            }
        };
        let next = current
            .checked_add(amount)
            .ok_or_else(|| CacheStoreError::NotAnInteger {
                key: key.to_string(),
            })?;

        // Keep the existing expiry, as Redis does.
        let mut bytes = Vec::with_capacity(ENVELOPE_LEN + 20);
        bytes.extend_from_slice(&expires_at.to_le_bytes());
        bytes.extend_from_slice(next.to_string().as_bytes());
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        Ok(next)
    }

    fn live_entry(&self, key: &str) -> CacheResult<Option<(i64, Vec<u8>)>> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let entry = self.read_live(&mut wtxn, key)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(entry)
    }

    /// Set the expiry of a live value, or drop it when `expires_at` is `None`.
    fn set_expiry(&self, key: &str, expires_at: Option<i64>) -> CacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let Some((_, payload)) = self.read_live(&mut wtxn, key)? else {
            wtxn.commit().map_err(txn_err)?;
            return Ok(false);
        };

        match expires_at {
            Some(expires_at) => self
                .db
                .put(&mut wtxn, key.as_bytes(), &seal(&payload, expires_at))
                .map_err(txn_err)?,
            None => {
                self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    fn handler(command: &str) -> Option<LmdbCommandHandler> {
        LMDB_COMMANDS
            .iter()
            .find(|(name, _)| *name == command)
            .map(|(_, handler)| *handler)
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let stored = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            self.db
                .get(&rtxn, key.as_bytes())
                .map_err(txn_err)?
                .map(|bytes| open(key, bytes))
                .transpose()?
        };

        match stored {
            Some((expires_at, _)) if is_expired(expires_at, Utc::now().timestamp_millis()) => {
                self.evict(key)?;
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Some((_, payload)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(payload))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        let bytes = seal(&value, expiry_millis(ttl)?);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let existed = self.read_live(&mut wtxn, key)?.is_some();
        if existed {
            self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(existed)
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in keys {
            if self.read_live(&mut wtxn, key)?.is_some() {
                self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    async fn incr(&self, key: &str, amount: i64) -> CacheResult<i64> {
        self.incr_by(key, amount)
    }

    async fn clear(&self) -> CacheResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let removed = self.db.len(&wtxn).map_err(txn_err)?;
        self.db.clear(&mut wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(removed)
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let now = Utc::now().timestamp_millis();

        let mut entry_count = 0u64;
        let mut memory_bytes = 0u64;
        for result in self.db.iter(&rtxn).map_err(txn_err)? {
            let (key, value) = result.map_err(txn_err)?;
            let key = String::from_utf8_lossy(key);
            let (expires_at, payload) = open(&key, value)?;
            if !is_expired(expires_at, now) {
                entry_count += 1;
                memory_bytes += (key.len() + payload.len()) as u64;
            }
        }

        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            memory_bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}

#[async_trait]
impl NativeCommands for LmdbCacheStore {
    fn implements(&self, command: &str) -> bool {
        Self::handler(command).is_some()
    }

    async fn execute(&self, command: &str, args: &[Scalar]) -> CacheResult<Reply> {
        let handler = Self::handler(command).ok_or_else(|| CommandError::NotImplemented {
            command: command.to_string(),
        })?;
        handler(self, args)
    }
}

type LmdbCommandHandler = fn(&LmdbCacheStore, &[Scalar]) -> CacheResult<Reply>;

const LMDB_COMMANDS: &[(&str, LmdbCommandHandler)] = &[
    ("exists", lmdb_exists),
    ("expire", lmdb_expire),
    ("ttl", lmdb_ttl),
    ("incrby", lmdb_incrby),
    ("decrby", lmdb_decrby),
];

fn lmdb_exists(store: &LmdbCacheStore, args: &[Scalar]) -> CacheResult<Reply> {
    require_args("exists", args, 1)?;
    let mut count = 0;
    for arg in args {
        if store.live_entry(&arg.canonical()?)?.is_some() {
            count += 1;
        }
    }
    Ok(Reply::Int(count))
}

fn lmdb_expire(store: &LmdbCacheStore, args: &[Scalar]) -> CacheResult<Reply> {
    require_args("expire", args, 2)?;
    let seconds = int_arg("expire", args, 1)?;
    let expires_at = if seconds > 0 {
        Some(expiry_in_seconds("expire", seconds, Utc::now())?.timestamp_millis())
    } else {
        None
    };
    let updated = store.set_expiry(&key_arg(args, 0)?, expires_at)?;
    Ok(Reply::Int(i64::from(updated)))
}

fn lmdb_ttl(store: &LmdbCacheStore, args: &[Scalar]) -> CacheResult<Reply> {
    require_args("ttl", args, 1)?;
    let ttl = match store.live_entry(&key_arg(args, 0)?)? {
        None => -2,
        Some((0, _)) => -1,
        Some((expires_at, _)) => {
            let millis = expires_at - Utc::now().timestamp_millis();
            (millis + 999) / 1000
        }
    };
    Ok(Reply::Int(ttl))
}

fn lmdb_incrby(store: &LmdbCacheStore, args: &[Scalar]) -> CacheResult<Reply> {
    require_args("incrby", args, 2)?;
    let amount = int_arg("incrby", args, 1)?;
    Ok(Reply::Int(store.incr_by(&key_arg(args, 0)?, amount)?))
}

fn lmdb_decrby(store: &LmdbCacheStore, args: &[Scalar]) -> CacheResult<Reply> {
    require_args("decrby", args, 2)?;
    let amount = int_arg("decrby", args, 1)?;
    let negated = amount.checked_neg().ok_or_else(|| CommandError::InvalidArgument {
        command: "decrby".to_string(),
        reason: "decrement is out of range".to_string(),
    })?;
    Ok(Reply::Int(store.incr_by(&key_arg(args, 0)?, negated)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbCacheStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbCacheStore::new(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (store, _temp_dir) = create_test_store();
        store
            .set("album:1", b"payload".to_vec(), None)
            .await
            .expect("set should succeed");

        let value = store.get("album:1").await.expect("get should succeed");
        assert_eq!(value, Some(b"payload".to_vec()));
        assert_eq!(store.get("album:2").await.expect("get should succeed"), None);

        let stats = store.stats().await.expect("stats should succeed");
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _temp_dir) = create_test_store();
        store.set("k", b"v".to_vec(), None).await.expect("set should succeed");
        assert!(store.delete("k").await.expect("delete should succeed"));
        assert!(!store.delete("k").await.expect("delete should succeed"));

        store.set("a", b"1".to_vec(), None).await.unwrap();
        store.set("b", b"2".to_vec(), None).await.unwrap();
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(store.delete_many(&keys).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_expired_value_is_absent() {
        let (store, _temp_dir) = create_test_store();
        store
            .set("short", b"v".to_vec(), Some(Duration::from_millis(1)))
            .await
            .expect("set should succeed");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.get("short").await.expect("get should succeed"), None);
        let stats = store.stats().await.expect("stats should succeed");
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn test_incr() {
        let (store, _temp_dir) = create_test_store();
        assert_eq!(store.incr("counter", 1).await.unwrap(), 1);
        assert_eq!(store.incr("counter", 41).await.unwrap(), 42);

        store.set("text", b"abc".to_vec(), None).await.unwrap();
        let err = store.incr("text", 1).await.unwrap_err();
        assert!(matches!(err, CacheError::Store(CacheStoreError::NotAnInteger { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_incr_loses_no_updates() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = Arc::new(LmdbCacheStore::new(temp_dir.path(), 10).unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    store.incr("hits", 1).await.expect("incr should succeed");
                }
            }));
        }
        for handle in handles {
            handle.await.expect("task should complete");
        }
        assert_eq!(store.get("hits").await.unwrap(), Some(b"200".to_vec()));
    }

    #[tokio::test]
    async fn test_clear() {
        let (store, _temp_dir) = create_test_store();
        store.set("a", b"1".to_vec(), None).await.unwrap();
        store.set("b", b"2".to_vec(), None).await.unwrap();
        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_native_commands() {
        let (store, _temp_dir) = create_test_store();
        assert!(store.implements("ttl"));
        assert!(!store.implements("smembers"));

        let ttl = store.execute("ttl", &[Scalar::from("k")]).await.unwrap();
        assert_eq!(ttl, Reply::Int(-2));

        store.set("k", b"5".to_vec(), None).await.unwrap();
        assert_eq!(
            store.execute("exists", &[Scalar::from("k"), Scalar::from("nope")]).await.unwrap(),
            Reply::Int(1)
        );
        assert_eq!(store.execute("ttl", &[Scalar::from("k")]).await.unwrap(), Reply::Int(-1));

        let expire = store
            .execute("expire", &[Scalar::from("k"), Scalar::Int(60)])
            .await
            .unwrap();
        assert_eq!(expire, Reply::Int(1));
        let ttl = store.execute("ttl", &[Scalar::from("k")]).await.unwrap();
        assert!(matches!(ttl, Reply::Int(n) if n > 50 && n <= 60));

        let reply = store
            .execute("decrby", &[Scalar::from("k"), Scalar::Int(2)])
            .await
            .unwrap();
        assert_eq!(reply, Reply::Int(3));
    }

    #[tokio::test]
    async fn test_expire_out_of_range_is_rejected() {
        let (store, _temp_dir) = create_test_store();
        store.set("k", b"v".to_vec(), None).await.unwrap();

        for seconds in [i64::MAX, i64::MAX / 1000 + 1] {
            let err = store
                .execute("expire", &[Scalar::from("k"), Scalar::Int(seconds)])
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                CacheError::Command(CommandError::InvalidArgument { .. })
            ));
        }

        assert_eq!(store.execute("ttl", &[Scalar::from("k")]).await.unwrap(), Reply::Int(-1));
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_set_with_unrepresentable_ttl_is_rejected() {
        let (store, _temp_dir) = create_test_store();
        let err = store
            .set("k", b"v".to_vec(), Some(Duration::from_secs(10_000_000_000_000)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Store(CacheStoreError::TtlOutOfRange { .. })
        ));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let store = LmdbCacheStore::new(temp_dir.path(), 10).unwrap();
            store.set("persisted", b"yes".to_vec(), None).await.unwrap();
        }
        let store = LmdbCacheStore::new(temp_dir.path(), 10).unwrap();
        assert_eq!(store.get("persisted").await.unwrap(), Some(b"yes".to_vec()));
    }
}
