//! Field resolution – maps placeholder names to record field ids and
//! extracts their display values.
//!
//! Templates are authored against human-readable field names, which drift:
//! fields get renamed, casing and spacing differ, bindings go stale. The
//! resolver therefore tries three tiers – exact name, normalized name, then a
//! scan of the record itself – to maximize successful binding without
//! requiring the template and the data source to stay in lockstep.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::value::{extract, EntityValue, FieldValue};

/// An external record: opaque id plus decoded field cells. Read-only input.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub id: String,
    /// Field id → decoded cell. Ordered so fallback scans are deterministic.
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(id: impl Into<String>, fields: BTreeMap<String, FieldValue>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Decode a record from its JSON form: `{"recordId": ..., "fields":
    /// {...}}`, or a bare field-id → value object.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(json)?;
        Ok(Self::from_value(&raw))
    }

    pub fn from_value(raw: &Value) -> Self {
        let id = raw
            .get("recordId")
            .or_else(|| raw.get("record_id"))
            .or_else(|| raw.get("id"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let field_obj = raw.get("fields").unwrap_or(raw);
        let mut fields = BTreeMap::new();
        if let Some(map) = field_obj.as_object() {
            for (key, value) in map {
                fields.insert(key.clone(), FieldValue::decode(value));
            }
        }
        Self { id, fields }
    }
}

/// Outcome of a resolution attempt. `found` is true whenever the name bound
/// to *some* field, even if that field has no value in this record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub value: String,
    pub found: bool,
}

impl Resolution {
    pub fn miss() -> Self {
        Self {
            value: String::new(),
            found: false,
        }
    }

    /// True when resolution failed outright or produced only whitespace.
    pub fn is_blank(&self) -> bool {
        !self.found || self.value.trim().is_empty()
    }
}

/// Authoring-time binding from display names to field ids, with a
/// case/whitespace-insensitive secondary index. Indices are built once per
/// construction; supplying a new map means building a new resolver.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    exact: HashMap<String, String>,
    normalized: HashMap<String, String>,
}

impl FieldMap {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut exact = HashMap::new();
        let mut normalized = HashMap::new();
        for (name, id) in entries {
            let name = name.into();
            let id = id.into();
            normalized.insert(normalize_name(&name), id.clone());
            exact.insert(name, id);
        }
        Self { exact, normalized }
    }

    /// Parse a `{"Display Name": "fieldId", ...}` JSON object.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: HashMap<String, String> = serde_json::from_str(json)?;
        Ok(Self::new(raw))
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// Three-tier lookup: exact index, normalized index, then a fallback scan
    /// of the record's own entries (key or embedded entity name).
    pub fn resolve(&self, field_name: &str, record: &Record) -> Resolution {
        let name = field_name.trim();
        if name.is_empty() {
            return Resolution::miss();
        }

        if let Some(id) = self.exact.get(name) {
            return Resolution {
                value: record.fields.get(id).map(extract).unwrap_or_default(),
                found: true,
            };
        }

        if let Some(id) = self.normalized.get(&normalize_name(name)) {
            return Resolution {
                value: record.fields.get(id).map(extract).unwrap_or_default(),
                found: true,
            };
        }

        // Unmapped/manual case: the template may reference a field id
        // directly, or a name a single-object cell carries itself.
        for (key, cell) in &record.fields {
            let name_matches = key == name
                || matches!(
                    cell,
                    FieldValue::Entity(EntityValue::Named { name: n }) if n == name
                );
            if name_matches {
                return Resolution {
                    value: extract(cell),
                    found: true,
                };
            }
        }

        Resolution::miss()
    }
}

/// Trim, lowercase, and collapse internal whitespace runs to single spaces.
fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
