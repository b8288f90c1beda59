//! In-process cache store.
//!
//! Holds plain values, sets, hashes and lists in one keyspace behind a
//! `tokio::sync::RwLock`. Expiry is lazy: an expired slot is dropped the next
//! time any operation touches it, and counted as an eviction.
//!
//! Native commands are dispatched through a static name → handler table, so
//! `implements` is an exact answer and unknown names never fall through to a
//! generic handler.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use modelcache_core::{CacheResult, CacheStoreError, CommandError, Scalar};
use regex::Regex;
use tokio::sync::RwLock;

use super::traits::{
    expiry_after, expiry_in_seconds, int_arg, key_arg, require_args, CacheStats, CacheStore,
    NativeCommands, Reply,
};

/// A value held in the keyspace.
#[derive(Debug, Clone, PartialEq)]
enum Stored {
    Bytes(Vec<u8>),
    Set(BTreeSet<Vec<u8>>),
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
}

impl Stored {
    fn size(&self) -> usize {
        match self {
            Stored::Bytes(b) => b.len(),
            Stored::Set(s) => s.iter().map(Vec::len).sum(),
            Stored::Hash(h) => h.iter().map(|(k, v)| k.len() + v.len()).sum(),
            Stored::List(l) => l.iter().map(Vec::len).sum(),
        }
    }

    /// Collections that became empty are removed, as in Redis.
    fn is_empty_collection(&self) -> bool {
        match self {
            Stored::Bytes(_) => false,
            Stored::Set(s) => s.is_empty(),
            Stored::Hash(h) => h.is_empty(),
            Stored::List(l) => l.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: Stored,
    expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Keyspace state guarded by the store's lock.
#[derive(Debug, Default)]
struct Keyspace {
    slots: HashMap<String, Slot>,
    evictions: u64,
}

impl Keyspace {
    /// Drop `key` if it has expired.
    fn expire_if_due(&mut self, key: &str, now: DateTime<Utc>) {
        if self.slots.get(key).is_some_and(|slot| slot.is_expired(now)) {
            self.slots.remove(key);
            self.evictions += 1;
        }
    }

    fn live(&mut self, key: &str, now: DateTime<Utc>) -> Option<&mut Slot> {
        self.expire_if_due(key, now);
        self.slots.get_mut(key)
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) {
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        self.evictions += (before - self.slots.len()) as u64;
    }

    fn remove_if_empty(&mut self, key: &str) {
        if self
            .slots
            .get(key)
            .is_some_and(|slot| slot.value.is_empty_collection())
        {
            self.slots.remove(key);
        }
    }

    /// Add `amount` to the integer at `key`, keeping any expiry.
    fn incr_by(&mut self, key: &str, amount: i64, now: DateTime<Utc>) -> CacheResult<i64> {
        let current = match self.live(key, now) {
            None => 0,
            Some(Slot {
                value: Stored::Bytes(bytes),
                ..
            }) => parse_int(key, bytes)?,
            Some(_) => {
                return Err(CacheStoreError::WrongType {
                    key: key.to_string(),
                }
                .into())
            }
        };

        let next = current
            .checked_add(amount)
            .ok_or_else(|| CacheStoreError::NotAnInteger {
                key: key.to_string(),
            })?;
        let encoded = next.to_string().into_bytes();

        match self.slots.get_mut(key) {
            Some(slot) => slot.value = Stored::Bytes(encoded),
            None => {
                self.slots.insert(
                    key.to_string(),
                    Slot {
                        value: Stored::Bytes(encoded),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(next)
    }
}

fn parse_int(key: &str, bytes: &[u8]) -> CacheResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            CacheStoreError::NotAnInteger {
                key: key.to_string(),
            }
            .into()
        })
}

fn expiry_from(ttl: Option<Duration>, now: DateTime<Utc>) -> CacheResult<Option<DateTime<Utc>>> {
    ttl.map(|ttl| expiry_after(ttl, now)).transpose()
}

/// In-memory cache store with native set, hash and list commands.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    keyspace: RwLock<Keyspace>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every native command this store implements.
    pub fn command_names() -> impl Iterator<Item = &'static str> {
        COMMANDS.iter().map(|(name, _)| *name)
    }

    fn handler(command: &str) -> Option<CommandHandler> {
        COMMANDS
            .iter()
            .find(|(name, _)| *name == command)
            .map(|(_, handler)| *handler)
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut keyspace = self.keyspace.write().await;
        match keyspace.live(key, Utc::now()) {
            Some(Slot {
                value: Stored::Bytes(bytes),
                ..
            }) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(bytes.clone()))
            }
            Some(_) => Err(CacheStoreError::WrongType {
                key: key.to_string(),
            }
            .into()),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        let now = Utc::now();
        let expires_at = expiry_from(ttl, now)?;
        let mut keyspace = self.keyspace.write().await;
        keyspace.slots.insert(
            key.to_string(),
            Slot {
                value: Stored::Bytes(value),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut keyspace = self.keyspace.write().await;
        let existed = keyspace.live(key, Utc::now()).is_some();
        keyspace.slots.remove(key);
        Ok(existed)
    }

    async fn incr(&self, key: &str, amount: i64) -> CacheResult<i64> {
        let mut keyspace = self.keyspace.write().await;
        keyspace.incr_by(key, amount, Utc::now())
    }

    async fn clear(&self) -> CacheResult<u64> {
        let mut keyspace = self.keyspace.write().await;
        keyspace.purge_expired(Utc::now());
        let removed = keyspace.slots.len() as u64;
        keyspace.slots.clear();
        Ok(removed)
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        let mut keyspace = self.keyspace.write().await;
        keyspace.purge_expired(Utc::now());
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: keyspace.slots.len() as u64,
            memory_bytes: keyspace
                .slots
                .iter()
                .map(|(k, slot)| (k.len() + slot.value.size()) as u64)
                .sum(),
            evictions: keyspace.evictions,
        })
    }
}

#[async_trait]
impl NativeCommands for InMemoryCacheStore {
    fn implements(&self, command: &str) -> bool {
        Self::handler(command).is_some()
    }

    async fn execute(&self, command: &str, args: &[Scalar]) -> CacheResult<Reply> {
        let handler = Self::handler(command).ok_or_else(|| CommandError::NotImplemented {
            command: command.to_string(),
        })?;
        let mut keyspace = self.keyspace.write().await;
        handler(&mut keyspace, args, Utc::now())
    }
}

// ============================================================================
// COMMAND TABLE
// ============================================================================

type CommandHandler = fn(&mut Keyspace, &[Scalar], DateTime<Utc>) -> CacheResult<Reply>;

const COMMANDS: &[(&str, CommandHandler)] = &[
    ("exists", cmd_exists),
    ("expire", cmd_expire),
    ("ttl", cmd_ttl),
    ("incrby", cmd_incrby),
    ("decrby", cmd_decrby),
    ("sadd", cmd_sadd),
    ("srem", cmd_srem),
    ("smembers", cmd_smembers),
    ("sismember", cmd_sismember),
    ("scard", cmd_scard),
    ("hset", cmd_hset),
    ("hget", cmd_hget),
    ("hdel", cmd_hdel),
    ("hgetall", cmd_hgetall),
    ("hlen", cmd_hlen),
    ("lpush", cmd_lpush),
    ("rpush", cmd_rpush),
    ("lrange", cmd_lrange),
    ("llen", cmd_llen),
    ("keys", cmd_keys),
    ("flushall", cmd_flushall),
];

fn wrong_type(command: &str, key: &str) -> modelcache_core::CacheError {
    CommandError::WrongType {
        command: command.to_string(),
        key: key.to_string(),
    }
    .into()
}

fn data_array<'a>(items: impl Iterator<Item = &'a Vec<u8>>) -> Reply {
    Reply::Array(items.map(|item| Reply::Data(item.clone())).collect())
}

fn cmd_exists(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("exists", args, 1)?;
    let mut count = 0;
    for index in 0..args.len() {
        let key = key_arg(args, index)?;
        if ks.live(&key, now).is_some() {
            count += 1;
        }
    }
    Ok(Reply::Int(count))
}

fn cmd_expire(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("expire", args, 2)?;
    let key = key_arg(args, 0)?;
    let seconds = int_arg("expire", args, 1)?;
    let expires_at = if seconds > 0 {
        Some(expiry_in_seconds("expire", seconds, now)?)
    } else {
        None
    };
    let Some(slot) = ks.live(&key, now) else {
        return Ok(Reply::Int(0));
    };
    match expires_at {
        Some(at) => slot.expires_at = Some(at),
        None => {
            ks.slots.remove(&key);
        }
    }
    Ok(Reply::Int(1))
}

fn cmd_ttl(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("ttl", args, 1)?;
    let key = key_arg(args, 0)?;
    let reply = match ks.live(&key, now) {
        None => -2,
        Some(Slot {
            expires_at: None, ..
        }) => -1,
        Some(Slot {
            expires_at: Some(at),
            ..
        }) => {
            let millis = at.signed_duration_since(now).num_milliseconds();
            (millis + 999) / 1000
        }
    };
    Ok(Reply::Int(reply))
}

fn cmd_incrby(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("incrby", args, 2)?;
    let key = key_arg(args, 0)?;
    let amount = int_arg("incrby", args, 1)?;
    Ok(Reply::Int(ks.incr_by(&key, amount, now)?))
}

fn cmd_decrby(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("decrby", args, 2)?;
    let key = key_arg(args, 0)?;
    let amount = int_arg("decrby", args, 1)?;
    let negated = amount.checked_neg().ok_or_else(|| CommandError::InvalidArgument {
        command: "decrby".to_string(),
        reason: "decrement is out of range".to_string(),
    })?;
    Ok(Reply::Int(ks.incr_by(&key, negated, now)?))
}

fn cmd_sadd(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("sadd", args, 2)?;
    let key = key_arg(args, 0)?;
    ks.expire_if_due(&key, now);
    let slot = ks.slots.entry(key.clone()).or_insert_with(|| Slot {
        value: Stored::Set(BTreeSet::new()),
        expires_at: None,
    });
    let Stored::Set(set) = &mut slot.value else {
        return Err(wrong_type("sadd", &key));
    };
    let added = args[1..].iter().filter(|m| set.insert(m.to_bytes())).count();
    Ok(Reply::Int(added as i64))
}

fn cmd_srem(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("srem", args, 2)?;
    let key = key_arg(args, 0)?;
    let removed = match ks.live(&key, now) {
        None => 0,
        Some(Slot {
            value: Stored::Set(set),
            ..
        }) => args[1..].iter().filter(|m| set.remove(&m.to_bytes())).count(),
        Some(_) => return Err(wrong_type("srem", &key)),
    };
    ks.remove_if_empty(&key);
    Ok(Reply::Int(removed as i64))
}

fn cmd_smembers(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("smembers", args, 1)?;
    let key = key_arg(args, 0)?;
    match ks.live(&key, now) {
        None => Ok(Reply::Array(Vec::new())),
        Some(Slot {
            value: Stored::Set(set),
            ..
        }) => Ok(data_array(set.iter())),
        Some(_) => Err(wrong_type("smembers", &key)),
    }
}

fn cmd_sismember(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("sismember", args, 2)?;
    let key = key_arg(args, 0)?;
    match ks.live(&key, now) {
        None => Ok(Reply::Int(0)),
        Some(Slot {
            value: Stored::Set(set),
            ..
        }) => Ok(Reply::Int(i64::from(set.contains(&args[1].to_bytes())))),
        Some(_) => Err(wrong_type("sismember", &key)),
    }
}

fn cmd_scard(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("scard", args, 1)?;
    let key = key_arg(args, 0)?;
    match ks.live(&key, now) {
        None => Ok(Reply::Int(0)),
        Some(Slot {
            value: Stored::Set(set),
            ..
        }) => Ok(Reply::Int(set.len() as i64)),
        Some(_) => Err(wrong_type("scard", &key)),
    }
}

fn cmd_hset(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("hset", args, 3)?;
    if (args.len() - 1) % 2 != 0 {
        return Err(CommandError::InvalidArgument {
            command: "hset".to_string(),
            reason: "field and value arguments must come in pairs".to_string(),
        }
        .into());
    }
    let key = key_arg(args, 0)?;
    ks.expire_if_due(&key, now);
    let slot = ks.slots.entry(key.clone()).or_insert_with(|| Slot {
        value: Stored::Hash(BTreeMap::new()),
        expires_at: None,
    });
    let Stored::Hash(hash) = &mut slot.value else {
        return Err(wrong_type("hset", &key));
    };
    let mut created = 0;
    for pair in args[1..].chunks(2) {
        if hash.insert(pair[0].to_bytes(), pair[1].to_bytes()).is_none() {
            created += 1;
        }
    }
    Ok(Reply::Int(created))
}

fn cmd_hget(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("hget", args, 2)?;
    let key = key_arg(args, 0)?;
    match ks.live(&key, now) {
        None => Ok(Reply::Nil),
        Some(Slot {
            value: Stored::Hash(hash),
            ..
        }) => Ok(hash
            .get(&args[1].to_bytes())
            .map(|v| Reply::Data(v.clone()))
            .unwrap_or(Reply::Nil)),
        Some(_) => Err(wrong_type("hget", &key)),
    }
}

fn cmd_hdel(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("hdel", args, 2)?;
    let key = key_arg(args, 0)?;
    let removed = match ks.live(&key, now) {
        None => 0,
        Some(Slot {
            value: Stored::Hash(hash),
            ..
        }) => args[1..]
            .iter()
            .filter(|f| hash.remove(&f.to_bytes()).is_some())
            .count(),
        Some(_) => return Err(wrong_type("hdel", &key)),
    };
    ks.remove_if_empty(&key);
    Ok(Reply::Int(removed as i64))
}

fn cmd_hgetall(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("hgetall", args, 1)?;
    let key = key_arg(args, 0)?;
    match ks.live(&key, now) {
        None => Ok(Reply::Array(Vec::new())),
        Some(Slot {
            value: Stored::Hash(hash),
            ..
        }) => Ok(Reply::Array(
            hash.iter()
                .flat_map(|(f, v)| [Reply::Data(f.clone()), Reply::Data(v.clone())])
                .collect(),
        )),
        Some(_) => Err(wrong_type("hgetall", &key)),
    }
}

fn cmd_hlen(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("hlen", args, 1)?;
    let key = key_arg(args, 0)?;
    match ks.live(&key, now) {
        None => Ok(Reply::Int(0)),
        Some(Slot {
            value: Stored::Hash(hash),
            ..
        }) => Ok(Reply::Int(hash.len() as i64)),
        Some(_) => Err(wrong_type("hlen", &key)),
    }
}

fn push(
    command: &str,
    ks: &mut Keyspace,
    args: &[Scalar],
    now: DateTime<Utc>,
    front: bool,
) -> CacheResult<Reply> {
    require_args(command, args, 2)?;
    let key = key_arg(args, 0)?;
    ks.expire_if_due(&key, now);
    let slot = ks.slots.entry(key.clone()).or_insert_with(|| Slot {
        value: Stored::List(VecDeque::new()),
        expires_at: None,
    });
    let Stored::List(list) = &mut slot.value else {
        return Err(wrong_type(command, &key));
    };
    for item in &args[1..] {
        if front {
            list.push_front(item.to_bytes());
        } else {
            list.push_back(item.to_bytes());
        }
    }
    Ok(Reply::Int(list.len() as i64))
}

fn cmd_lpush(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    push("lpush", ks, args, now, true)
}

fn cmd_rpush(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    push("rpush", ks, args, now, false)
}

fn cmd_lrange(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("lrange", args, 3)?;
    let key = key_arg(args, 0)?;
    let start = int_arg("lrange", args, 1)?;
    let stop = int_arg("lrange", args, 2)?;
    let list = match ks.live(&key, now) {
        None => return Ok(Reply::Array(Vec::new())),
        Some(Slot {
            value: Stored::List(list),
            ..
        }) => list,
        Some(_) => return Err(wrong_type("lrange", &key)),
    };

    // Negative indices count from the tail; out-of-range bounds are clamped.
    let len = list.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return Ok(Reply::Array(Vec::new()));
    }
    Ok(data_array(
        list.iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize),
    ))
}

fn cmd_llen(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("llen", args, 1)?;
    let key = key_arg(args, 0)?;
    match ks.live(&key, now) {
        None => Ok(Reply::Int(0)),
        Some(Slot {
            value: Stored::List(list),
            ..
        }) => Ok(Reply::Int(list.len() as i64)),
        Some(_) => Err(wrong_type("llen", &key)),
    }
}

fn cmd_keys(ks: &mut Keyspace, args: &[Scalar], now: DateTime<Utc>) -> CacheResult<Reply> {
    require_args("keys", args, 1)?;
    let pattern = glob_regex("keys", &key_arg(args, 0)?)?;
    ks.purge_expired(now);
    let mut keys: Vec<&String> = ks
        .slots
        .keys()
        .filter(|key| pattern.is_match(key))
        .collect();
    keys.sort();
    Ok(Reply::Array(
        keys.into_iter()
            .map(|k| Reply::Data(k.as_bytes().to_vec()))
            .collect(),
    ))
}

fn cmd_flushall(ks: &mut Keyspace, _args: &[Scalar], _now: DateTime<Utc>) -> CacheResult<Reply> {
    ks.slots.clear();
    Ok(Reply::Ok)
}

/// Compile a `*`/`?` glob into an anchored regex.
fn glob_regex(command: &str, pattern: &str) -> CacheResult<Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push_str("(?s)^");
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            other => translated.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    translated.push('$');

    Regex::new(&translated).map_err(|e| {
        CommandError::InvalidArgument {
            command: command.to_string(),
            reason: format!("pattern {:?} cannot be compiled: {}", pattern, e),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelcache_core::{CacheError, DEFAULT_SUPPORTED_COMMANDS};

    fn args(items: &[&str]) -> Vec<Scalar> {
        items.iter().map(|s| Scalar::from(*s)).collect()
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryCacheStore::new();
        store.set("a", b"1".to_vec(), None).await.expect("set should succeed");
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_expired_values_are_evicted() {
        let store = InMemoryCacheStore::new();
        store
            .set("short", b"x".to_vec(), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("short").await.unwrap(), None);
        assert_eq!(store.stats().await.unwrap().evictions, 1);
    }

    #[tokio::test]
    async fn test_incr_starts_from_zero() {
        let store = InMemoryCacheStore::new();
        assert_eq!(store.incr("counter", 1).await.unwrap(), 1);
        assert_eq!(store.incr("counter", 5).await.unwrap(), 6);
        assert_eq!(store.incr("counter", -10).await.unwrap(), -4);
        assert_eq!(store.get("counter").await.unwrap(), Some(b"-4".to_vec()));

        store.set("text", b"abc".to_vec(), None).await.unwrap();
        let err = store.incr("text", 1).await.unwrap_err();
        assert!(matches!(err, CacheError::Store(CacheStoreError::NotAnInteger { .. })));
    }

    #[tokio::test]
    async fn test_every_default_command_is_implemented() {
        let store = InMemoryCacheStore::new();
        for command in DEFAULT_SUPPORTED_COMMANDS {
            assert!(store.implements(command), "{} should be implemented", command);
        }
        assert!(store.implements("keys"));
        assert!(!store.implements("hstrlen"));
    }

    #[tokio::test]
    async fn test_set_commands() {
        let store = InMemoryCacheStore::new();
        let empty = store.execute("smembers", &args(&["tags"])).await.unwrap();
        assert!(empty.into_set().is_empty());

        let added = store.execute("sadd", &args(&["tags", "a", "b", "a"])).await.unwrap();
        assert_eq!(added, Reply::Int(2));
        assert_eq!(store.execute("scard", &args(&["tags"])).await.unwrap(), Reply::Int(2));
        assert_eq!(
            store.execute("sismember", &args(&["tags", "b"])).await.unwrap(),
            Reply::Int(1)
        );
        store.execute("srem", &args(&["tags", "a", "b"])).await.unwrap();
        assert_eq!(store.execute("exists", &args(&["tags"])).await.unwrap(), Reply::Int(0));
    }

    #[tokio::test]
    async fn test_hash_commands() {
        let store = InMemoryCacheStore::new();
        let created = store
            .execute("hset", &args(&["h", "f1", "v1", "f2", "v2"]))
            .await
            .unwrap();
        assert_eq!(created, Reply::Int(2));
        assert_eq!(
            store.execute("hget", &args(&["h", "f1"])).await.unwrap(),
            Reply::Data(b"v1".to_vec())
        );
        assert!(store.execute("hget", &args(&["h", "nope"])).await.unwrap().is_nil());
        assert_eq!(store.execute("hlen", &args(&["h"])).await.unwrap(), Reply::Int(2));
        let all = store.execute("hgetall", &args(&["h"])).await.unwrap();
        assert_eq!(all, Reply::Array(vec![
            Reply::Data(b"f1".to_vec()),
            Reply::Data(b"v1".to_vec()),
            Reply::Data(b"f2".to_vec()),
            Reply::Data(b"v2".to_vec()),
        ]));

        let odd = store.execute("hset", &args(&["h", "f3"])).await;
        assert!(odd.is_err());
    }

    #[tokio::test]
    async fn test_list_commands() {
        let store = InMemoryCacheStore::new();
        store.execute("rpush", &args(&["l", "b", "c"])).await.unwrap();
        store.execute("lpush", &args(&["l", "a"])).await.unwrap();
        assert_eq!(store.execute("llen", &args(&["l"])).await.unwrap(), Reply::Int(3));

        let all = store.execute("lrange", &args(&["l", "0", "-1"])).await.unwrap();
        assert_eq!(all, Reply::Array(vec![
            Reply::Data(b"a".to_vec()),
            Reply::Data(b"b".to_vec()),
            Reply::Data(b"c".to_vec()),
        ]));
        let tail = store.execute("lrange", &args(&["l", "-2", "10"])).await.unwrap();
        assert_eq!(tail, Reply::Array(vec![
            Reply::Data(b"b".to_vec()),
            Reply::Data(b"c".to_vec()),
        ]));
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let store = InMemoryCacheStore::new();
        store.execute("sadd", &args(&["s", "x"])).await.unwrap();
        let err = store.execute("hget", &args(&["s", "x"])).await.unwrap_err();
        assert!(matches!(err, CacheError::Command(CommandError::WrongType { .. })));

        let err = store.get("s").await.unwrap_err();
        assert!(matches!(err, CacheError::Store(CacheStoreError::WrongType { .. })));
    }

    #[tokio::test]
    async fn test_expire_and_ttl() {
        let store = InMemoryCacheStore::new();
        assert_eq!(store.execute("ttl", &args(&["k"])).await.unwrap(), Reply::Int(-2));
        store.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(store.execute("ttl", &args(&["k"])).await.unwrap(), Reply::Int(-1));

        let reply = store
            .execute("expire", &[Scalar::from("k"), Scalar::Int(100)])
            .await
            .unwrap();
        assert_eq!(reply, Reply::Int(1));
        let ttl = store.execute("ttl", &args(&["k"])).await.unwrap();
        assert!(matches!(ttl, Reply::Int(n) if n > 90 && n <= 100));
    }

    #[tokio::test]
    async fn test_incrby_decrby_and_wrong_arity() {
        let store = InMemoryCacheStore::new();
        let reply = store
            .execute("incrby", &[Scalar::from("n"), Scalar::Int(5)])
            .await
            .unwrap();
        assert_eq!(reply, Reply::Int(5));
        let reply = store.execute("decrby", &args(&["n", "2"])).await.unwrap();
        assert_eq!(reply, Reply::Int(3));

        let err = store.execute("incrby", &args(&["n"])).await.unwrap_err();
        assert!(matches!(err, CacheError::Command(CommandError::WrongArity { .. })));
    }

    #[tokio::test]
    async fn test_keys_and_flushall() {
        let store = InMemoryCacheStore::new();
        store.set("album:1", b"1".to_vec(), None).await.unwrap();
        store.set("album:2", b"2".to_vec(), None).await.unwrap();
        store.set("artist:1", b"3".to_vec(), None).await.unwrap();

        let keys = store.execute("keys", &args(&["album:*"])).await.unwrap();
        assert_eq!(keys.into_set().len(), 2);

        assert_eq!(store.execute("flushall", &[]).await.unwrap(), Reply::Ok);
        assert_eq!(store.stats().await.unwrap().entry_count, 0);
    }

    #[test]
    fn test_glob_regex() {
        let matches = |pattern: &str, key: &str| glob_regex("keys", pattern).unwrap().is_match(key);
        assert!(matches("*", "anything"));
        assert!(matches("a?c", "abc"));
        assert!(!matches("a?c", "ac"));
        assert!(matches("a*:1", "album:1"));
        assert!(!matches("a*:1", "album:10"));
        // Regex metacharacters in the pattern are literal.
        assert!(matches("v1.(x)", "v1.(x)"));
        assert!(!matches("v1.(x)", "v1a(x)"));
    }

    #[tokio::test]
    async fn test_keys_with_many_wildcards() {
        let store = InMemoryCacheStore::new();
        let long_key = "a".repeat(60);
        store.set(&long_key, b"1".to_vec(), None).await.unwrap();
        store.set("ab", b"2".to_vec(), None).await.unwrap();

        let pattern = format!("{}b", "*".repeat(40));
        let keys = store
            .execute("keys", &[Scalar::from(pattern.as_str())])
            .await
            .unwrap()
            .into_set();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(b"ab".as_slice()));
    }

    #[tokio::test]
    async fn test_expire_out_of_range_is_rejected() {
        let store = InMemoryCacheStore::new();
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

        // The store stays usable and the key keeps no expiry.
        assert_eq!(store.execute("ttl", &args(&["k"])).await.unwrap(), Reply::Int(-1));
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_set_with_unrepresentable_ttl_is_rejected() {
        let store = InMemoryCacheStore::new();
        let err = store
            .set("k", b"v".to_vec(), Some(Duration::from_secs(10_000_000_000_000)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Store(CacheStoreError::TtlOutOfRange { .. })
        ));
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", b"v".to_vec(), None).await.unwrap();
    }
}
