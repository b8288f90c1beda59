//! Stored cache entries and records reconstructed from them.
//!
//! A cached record is a snapshot, not a live proxy: it exposes exactly the
//! fields that were captured at write time and that the entity still
//! declares. Reads carry whether they were served from cache and how old the
//! snapshot is.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use modelcache_core::{
    CacheError, CacheResult, CacheStoreError, MissingFieldReason, Record, PK_ALIAS,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field values of a record at the time it was cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub fields: BTreeMap<String, Value>,
    pub cached_at: DateTime<Utc>,
}

impl Snapshot {
    /// Snapshot the given fields now.
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self {
            fields,
            cached_at: Utc::now(),
        }
    }

    pub fn of(record: &Record) -> Self {
        Self::new(record.fields().clone())
    }
}

/// Value stored under a model cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedEntry {
    /// A single record.
    Record(Snapshot),
    /// An ordered query result; may be empty.
    List { items: Vec<Snapshot> },
    /// The lookup was made and nothing matched.
    Absent { cached_at: DateTime<Utc> },
}

impl CachedEntry {
    pub fn absent() -> Self {
        CachedEntry::Absent {
            cached_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            CacheStoreError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn decode(bytes: &[u8]) -> CacheResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            CacheStoreError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Short name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            CachedEntry::Record(_) => "record",
            CachedEntry::List { .. } => "list",
            CachedEntry::Absent { .. } => "absent",
        }
    }
}

/// A record served by the model cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    entity: String,
    pk_field: String,
    fields: BTreeMap<String, Value>,
    known_fields: BTreeSet<String>,
    cached_at: DateTime<Utc>,
    was_cache_hit: bool,
}

impl CachedRecord {
    /// Rebuild a record from a snapshot, keeping only fields the entity declares.
    pub fn from_snapshot(
        entity: &str,
        pk_field: &str,
        known_fields: &[String],
        snapshot: Snapshot,
        was_cache_hit: bool,
    ) -> Self {
        let known_fields: BTreeSet<String> = known_fields.iter().cloned().collect();
        let fields = snapshot
            .fields
            .into_iter()
            .filter(|(name, _)| known_fields.contains(name))
            .collect();

        Self {
            entity: entity.to_string(),
            pk_field: pk_field.to_string(),
            fields,
            known_fields,
            cached_at: snapshot.cached_at,
            was_cache_hit,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Read a field. The `pk` alias maps to the primary-key field.
    ///
    /// Fields the entity does not declare fail with
    /// [`MissingFieldReason::UnknownToEntity`]; declared fields missing from
    /// the snapshot fail with [`MissingFieldReason::NotCaptured`].
    pub fn get(&self, field: &str) -> CacheResult<&Value> {
        let name = if field == PK_ALIAS {
            self.pk_field.as_str()
        } else {
            field
        };

        if let Some(value) = self.fields.get(name) {
            return Ok(value);
        }

        let reason = if self.known_fields.contains(name) {
            MissingFieldReason::NotCaptured
        } else {
            MissingFieldReason::UnknownToEntity
        };
        Err(CacheError::MissingField {
            entity: self.entity.clone(),
            field: field.to_string(),
            reason,
        })
    }

    pub fn get_str(&self, field: &str) -> CacheResult<Option<&str>> {
        Ok(self.get(field)?.as_str())
    }

    pub fn get_i64(&self, field: &str) -> CacheResult<Option<i64>> {
        Ok(self.get(field)?.as_i64())
    }

    pub fn pk(&self) -> CacheResult<&Value> {
        self.get(PK_ALIAS)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.get(field).is_ok()
    }

    /// Whether this read was served from the cache.
    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    /// Whether this read had to go to the record store.
    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// When the underlying snapshot was taken.
    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// Age of the snapshot.
    pub fn staleness(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Convert back into a plain record carrying the captured fields.
    pub fn into_record(self) -> Record {
        Record::new(self.entity, self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn known() -> Vec<String> {
        vec!["id".to_string(), "artist".to_string(), "title".to_string()]
    }

    fn snapshot() -> Snapshot {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), json!(1));
        fields.insert("artist".to_string(), json!("Taylor Swift"));
        fields.insert("another_field".to_string(), json!("1"));
        Snapshot::new(fields)
    }

    #[test]
    fn test_reconstruct_keeps_declared_fields_only() {
        let record = CachedRecord::from_snapshot("album", "id", &known(), snapshot(), true);

        assert_eq!(record.get("artist").unwrap(), &json!("Taylor Swift"));
        assert_eq!(record.pk().unwrap(), &json!(1));
        assert!(record.was_cache_hit());

        let err = record.get("another_field").unwrap_err();
        assert!(matches!(
            err,
            CacheError::MissingField {
                reason: MissingFieldReason::UnknownToEntity,
                ..
            }
        ));
    }

    #[test]
    fn test_declared_but_uncaptured_field() {
        let record = CachedRecord::from_snapshot("album", "id", &known(), snapshot(), false);
        let err = record.get("title").unwrap_err();
        assert!(matches!(
            err,
            CacheError::MissingField {
                reason: MissingFieldReason::NotCaptured,
                ..
            }
        ));
        assert!(!record.has_field("title"));
        assert!(record.was_cache_miss());
    }

    #[test]
    fn test_entry_encoding_is_tagged() {
        let absent = CachedEntry::absent().encode().unwrap();
        let value: Value = serde_json::from_slice(&absent).unwrap();
        assert_eq!(value["kind"], json!("absent"));

        let list = CachedEntry::List { items: vec![] };
        let decoded = CachedEntry::decode(&list.encode().unwrap()).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = CachedEntry::decode(b"not json").unwrap_err();
        assert!(matches!(err, CacheError::Store(CacheStoreError::Serialization { .. })));
    }

    #[test]
    fn test_staleness_is_non_negative() {
        let record = CachedRecord::from_snapshot("album", "id", &known(), snapshot(), true);
        assert!(record.staleness() < Duration::from_secs(60));
    }
}
