//! Entity schemas and persistent records

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::PK_ALIAS;

/// Storage kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    /// Arbitrary structured value
    Json,
}

impl FieldKind {
    /// Whether a value may be stored in a field of this kind. Null is always accepted.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldKind::Text, Value::String(_)) => true,
            (FieldKind::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldKind::Float, Value::Number(_)) => true,
            (FieldKind::Boolean, Value::Bool(_)) => true,
            (FieldKind::Json, _) => true,
            _ => false,
        }
    }
}

/// A single typed field of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

/// A named record shape with one designated primary-key field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    name: String,
    pk_field: String,
    fields: Vec<FieldDef>,
}

impl EntitySchema {
    /// Create a schema whose primary key is `pk_field` of the given kind.
    pub fn new(name: impl Into<String>, pk_field: impl Into<String>, pk_kind: FieldKind) -> Self {
        let pk_field = pk_field.into();
        Self {
            name: name.into(),
            fields: vec![FieldDef {
                name: pk_field.clone(),
                kind: pk_kind,
            }],
            pk_field,
        }
    }

    /// Add a field. Redefining an existing field replaces its kind.
    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.kind = kind,
            None => self.fields.push(FieldDef { name, kind }),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pk_field(&self) -> &str {
        &self.pk_field
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        let name = self.resolve_field(name);
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Map the `pk` alias onto the primary-key field name.
    pub fn resolve_field<'a>(&'a self, name: &'a str) -> &'a str {
        if name == PK_ALIAS {
            &self.pk_field
        } else {
            name
        }
    }

    /// True when `name` refers to the primary key, directly or through the alias.
    pub fn is_pk(&self, name: &str) -> bool {
        self.resolve_field(name) == self.pk_field
    }
}

/// A record as returned by the persistent store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    entity: String,
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(entity: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Self {
            entity: entity.into(),
            fields,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Primary-key value under the given schema.
    pub fn pk(&self, schema: &EntitySchema) -> Option<&Value> {
        self.fields.get(schema.pk_field())
    }

    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }
}
