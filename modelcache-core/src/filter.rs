//! Scalar values and equality filter sets
//!
//! A [`FilterSet`] doubles as a query predicate against the record store and
//! as the input to cache key derivation, so both sides agree on one canonical
//! text form per value.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CacheResult, KeyError};

/// Name that always refers to an entity's primary-key field.
pub const PK_ALIAS: &str = "pk";

/// A scalar filter or key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Scalar {
    Text(String),
    Bytes(Vec<u8>),
    Int(i64),
    Bool(bool),
}

impl Scalar {
    /// Canonical text form used for key derivation and matching.
    ///
    /// Byte sequences are decoded as UTF-8 so that `b"7"` and `"7"` address
    /// the same record.
    pub fn canonical(&self) -> CacheResult<Cow<'_, str>> {
        match self {
            Scalar::Text(s) => Ok(Cow::Borrowed(s.as_str())),
            Scalar::Bytes(b) => std::str::from_utf8(b)
                .map(Cow::Borrowed)
                .map_err(|e| KeyError::invalid(format!("byte value is not UTF-8: {}", e)).into()),
            Scalar::Int(i) => Ok(Cow::Owned(i.to_string())),
            Scalar::Bool(b) => Ok(Cow::Owned(b.to_string())),
        }
    }

    /// Raw bytes of the canonical form, without UTF-8 validation for bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Scalar::Text(s) => s.as_bytes().to_vec(),
            Scalar::Bytes(b) => b.clone(),
            Scalar::Int(i) => i.to_string().into_bytes(),
            Scalar::Bool(b) => b.to_string().into_bytes(),
        }
    }

    /// Interpret the value as an integer, parsing text and bytes.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            Scalar::Bool(_) => None,
            other => other.canonical().ok()?.trim().parse().ok(),
        }
    }

    /// Convert a stored field value into a scalar. Non-scalar JSON is rejected.
    pub fn from_json(value: &Value) -> CacheResult<Self> {
        match value {
            Value::String(s) => Ok(Scalar::Text(s.clone())),
            Value::Bool(b) => Ok(Scalar::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Scalar::Int(i)),
                None => Ok(Scalar::Text(n.to_string())),
            },
            other => Err(KeyError::invalid(format!("non-scalar value {}", other)).into()),
        }
    }

    /// True when a stored field value equals this scalar in canonical form.
    pub fn matches(&self, value: &Value) -> bool {
        let Ok(expected) = self.canonical() else {
            return false;
        };
        match value {
            Value::String(s) => s == expected.as_ref(),
            Value::Number(n) => n.to_string() == expected.as_ref(),
            Value::Bool(b) => b.to_string() == expected.as_ref(),
            _ => false,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(s) => write!(f, "{:?}", s),
            Scalar::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<Vec<u8>> for Scalar {
    fn from(value: Vec<u8>) -> Self {
        Scalar::Bytes(value)
    }
}

impl From<&[u8]> for Scalar {
    fn from(value: &[u8]) -> Self {
        Scalar::Bytes(value.to_vec())
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(i64::from(value))
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// Field-equality predicate. Iteration is always sorted by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    filters: BTreeMap<String, Scalar>,
}

impl FilterSet {
    /// Create an empty filter set (matches every record).
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on the primary key through the `pk` alias.
    pub fn pk(value: impl Into<Scalar>) -> Self {
        Self::new().with(PK_ALIAS, value)
    }

    /// Add an equality filter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.insert(field, value);
        self
    }

    /// Insert an equality filter, replacing any previous value for the field.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Scalar>) {
        self.filters.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Scalar> {
        self.filters.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.filters.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Iterate filters sorted by field name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.filters.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Rewrite the `pk` alias to the concrete primary-key field name.
    ///
    /// Fails when the alias and the concrete name carry different values.
    pub fn resolve_pk(&self, pk_field: &str) -> CacheResult<FilterSet> {
        let mut resolved = self.filters.clone();
        if let Some(value) = resolved.remove(PK_ALIAS) {
            if let Some(existing) = resolved.get(pk_field) {
                if existing.canonical()? != value.canonical()? {
                    return Err(KeyError::invalid(format!(
                        "conflicting primary key filters {} and {}",
                        existing, value
                    ))
                    .into());
                }
            }
            resolved.insert(pk_field.to_string(), value);
        }
        Ok(FilterSet { filters: resolved })
    }

    /// True when every filter matches the given field map.
    pub fn matches(&self, fields: &BTreeMap<String, Value>) -> bool {
        self.filters.iter().all(|(field, expected)| {
            fields
                .get(field)
                .map(|actual| expected.matches(actual))
                .unwrap_or(false)
        })
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, value) in &self.filters {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", field, value)?;
            first = false;
        }
        Ok(())
    }
}

impl<K, V> FromIterator<(K, V)> for FilterSet
where
    K: Into<String>,
    V: Into<Scalar>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = FilterSet::new();
        for (field, value) in iter {
            set.insert(field, value);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bytes_and_text_share_canonical_form() {
        let text = Scalar::from("42");
        let bytes = Scalar::from(b"42".as_slice());
        let int = Scalar::from(42i64);
        assert_eq!(text.canonical().unwrap(), bytes.canonical().unwrap());
        assert_eq!(text.canonical().unwrap(), int.canonical().unwrap());
    }

    #[test]
    fn test_invalid_utf8_bytes_are_rejected() {
        let bad = Scalar::Bytes(vec![0xff, 0xfe]);
        let err = bad.canonical().unwrap_err();
        assert!(matches!(err, crate::CacheError::Key(KeyError::InvalidKey { .. })));
        assert!(!bad.matches(&json!("x")));
    }

    #[test]
    fn test_scalar_matches_json_values() {
        assert!(Scalar::from("7").matches(&json!(7)));
        assert!(Scalar::from(7i64).matches(&json!(7)));
        assert!(Scalar::from(true).matches(&json!(true)));
        assert!(Scalar::from("Red").matches(&json!("Red")));
        assert!(!Scalar::from("Red").matches(&json!("red")));
        assert!(!Scalar::from("1").matches(&json!(null)));
        assert!(!Scalar::from("1").matches(&json!([1])));
    }

    #[test]
    fn test_from_json_rejects_non_scalars() {
        assert_eq!(Scalar::from_json(&json!(3)).unwrap(), Scalar::Int(3));
        assert!(Scalar::from_json(&json!({"a": 1})).is_err());
        assert!(Scalar::from_json(&json!(null)).is_err());
    }

    #[test]
    fn test_filter_set_iterates_sorted() {
        let filters = FilterSet::new().with("title", "Red").with("artist", "Taylor Swift");
        let fields: Vec<&str> = filters.iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec!["artist", "title"]);
        assert_eq!(format!("{}", filters), "artist=\"Taylor Swift\", title=\"Red\"");
    }

    #[test]
    fn test_resolve_pk_alias() {
        let resolved = FilterSet::pk(3).resolve_pk("id").unwrap();
        assert_eq!(resolved.get("id"), Some(&Scalar::Int(3)));
        assert!(!resolved.contains(PK_ALIAS));

        let agreeing = FilterSet::pk(3).with("id", "3").resolve_pk("id").unwrap();
        assert_eq!(agreeing.len(), 1);

        let conflicting = FilterSet::pk(3).with("id", 4i64).resolve_pk("id");
        assert!(conflicting.is_err());
    }

    #[test]
    fn test_filter_set_matches_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), json!(1));
        fields.insert("artist".to_string(), json!("Taylor Swift"));

        assert!(FilterSet::new().matches(&fields));
        assert!(FilterSet::new().with("artist", "Taylor Swift").matches(&fields));
        assert!(FilterSet::new().with("id", b"1".as_slice()).matches(&fields));
        assert!(!FilterSet::new().with("title", "Red").matches(&fields));
    }
}
