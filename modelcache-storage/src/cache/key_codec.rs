//! Cache key derivation for entity lookups.
//!
//! Keys are pure functions of the entity name and filter content, so they
//! stay stable across restarts. Every key is namespaced through
//! [`KeyNamespace`] and carries a `_v<version>` suffix.
//!
//! # Key Formats
//!
//! - single record: `<ns>.model.<entity>:pk:<pk>_v<n>`
//! - predicate expecting one match: `<ns>.model_match.<entity>:one:<digest>_v<n>`
//! - list: `<ns>.model_list.<entity>:list:<digest|all>_v<n>`
//!
//! The entity name may not contain `:`, so the pk text after `:pk:` cannot
//! alias another entity's key. Digests are SHA-256 over the sorted,
//! canonicalized filter pairs.

use std::fmt;

use modelcache_core::{CacheResult, EntitySchema, FilterSet, KeyError, Scalar};
use sha2::{Digest, Sha256};

use super::namespace::KeyNamespace;

/// An opaque, namespaced cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives cache keys for single records, predicates and lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    namespace: KeyNamespace,
    version: u32,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::new(1)
    }
}

impl KeyCodec {
    /// Create a codec embedding `version` in every key.
    pub fn new(version: u32) -> Self {
        Self {
            namespace: KeyNamespace::new(module_path!()),
            version,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Key of the record whose primary key is `pk`.
    pub fn key_of_model(&self, schema: &EntitySchema, pk: &Scalar) -> CacheResult<CacheKey> {
        let entity = entity_name(schema)?;
        let pk = pk.canonical()?;
        let raw = format!("{}:pk:{}_v{}", entity, pk, self.version);
        Ok(CacheKey(self.namespace.qualify("key_of_model", &raw)))
    }

    /// Key of a single-match predicate lookup.
    pub fn key_of_model_match(
        &self,
        schema: &EntitySchema,
        filters: &FilterSet,
    ) -> CacheResult<CacheKey> {
        let entity = entity_name(schema)?;
        let digest = filter_digest(schema, filters)?;
        let raw = format!("{}:one:{}_v{}", entity, digest, self.version);
        Ok(CacheKey(self.namespace.qualify("key_of_model_match", &raw)))
    }

    /// Key of the list of records matching `filters`. No filters keys the full set.
    pub fn key_of_model_list(
        &self,
        schema: &EntitySchema,
        filters: &FilterSet,
    ) -> CacheResult<CacheKey> {
        let entity = entity_name(schema)?;
        let digest = if filters.is_empty() {
            "all".to_string()
        } else {
            filter_digest(schema, filters)?
        };
        let raw = format!("{}:list:{}_v{}", entity, digest, self.version);
        Ok(CacheKey(self.namespace.qualify("key_of_model_list", &raw)))
    }

    /// Key for a `get_model` lookup.
    ///
    /// Filters naming only the primary key use the single-record key, so
    /// `pk=1`, `id=1` and `id=b"1"` share an entry. Any other predicate uses
    /// the match key.
    pub fn key_for_lookup(
        &self,
        schema: &EntitySchema,
        filters: &FilterSet,
    ) -> CacheResult<CacheKey> {
        let resolved = filters.resolve_pk(schema.pk_field())?;
        match pk_only(schema, &resolved) {
            Some(pk) => self.key_of_model(schema, pk),
            None => self.key_of_model_match(schema, &resolved),
        }
    }
}

/// The pk value when the filters consist of the primary key alone.
pub(crate) fn pk_only<'a>(schema: &EntitySchema, resolved: &'a FilterSet) -> Option<&'a Scalar> {
    if resolved.len() == 1 {
        resolved.get(schema.pk_field())
    } else {
        None
    }
}

fn entity_name(schema: &EntitySchema) -> CacheResult<&str> {
    let name = schema.name();
    if name.is_empty() {
        return Err(KeyError::invalid("entity name is empty").into());
    }
    if name.contains(':') || name.chars().any(char::is_whitespace) {
        return Err(KeyError::invalid(format!(
            "entity name {:?} may not contain ':' or whitespace",
            name
        ))
        .into());
    }
    Ok(name)
}

fn filter_digest(schema: &EntitySchema, filters: &FilterSet) -> CacheResult<String> {
    let resolved = filters.resolve_pk(schema.pk_field())?;
    let mut pairs = Vec::with_capacity(resolved.len());
    for (field, value) in resolved.iter() {
        if field.is_empty() {
            return Err(KeyError::invalid("filter field name is empty").into());
        }
        pairs.push((field, value.canonical()?));
    }

    let canonical = serde_json::to_vec(&pairs)
        .map_err(|e| KeyError::invalid(format!("filters could not be encoded: {}", e)))?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}
