//! Field mapper: projects source record attributes onto mirror item fields.
//!
//! The projection is driven by a static [`FieldMapping`] table that is
//! validated once at startup. Attributes missing from the table are dropped,
//! mapped attributes that are empty in the source are omitted, and the slug
//! field is never copied from the source: it is derived from the name.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::config::ConfigError;

/// Default source-field-to-mirror-field table for listing records.
const DEFAULT_FIELD_MAP: &[(&str, &str)] = &[
    ("Name", "name"),
    ("City", "city"),
    ("Price", "price"),
    ("Description", "description"),
    ("Building area", "building-area"),
    ("Plot area", "plot-area"),
    ("Category", "category"),
    ("Photo URL", "photo"),
    ("Slug", "slug"),
];

/// Source field holding the display name.
pub const DEFAULT_NAME_FIELD: &str = "Name";

/// Mirror field holding the slug.
pub const DEFAULT_SLUG_FIELD: &str = "slug";

/// Source field holding the stored mirror item id.
pub const DEFAULT_MIRROR_REF_FIELD: &str = "Webflow Item ID";

/// One row of the mapping table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    pub source_field: String,
    pub mirror_field: String,
}

/// Static mapping between the source vocabulary and the mirror vocabulary.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    entries: Vec<FieldMap>,
    name_field: String,
    slug_field: String,
    mirror_ref_field: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            entries: DEFAULT_FIELD_MAP
                .iter()
                .map(|(src, dst)| FieldMap {
                    source_field: (*src).to_string(),
                    mirror_field: (*dst).to_string(),
                })
                .collect(),
            name_field: DEFAULT_NAME_FIELD.to_string(),
            slug_field: DEFAULT_SLUG_FIELD.to_string(),
            mirror_ref_field: DEFAULT_MIRROR_REF_FIELD.to_string(),
        }
    }
}

impl FieldMapping {
    /// Build a mapping from explicit `(source, mirror)` pairs.
    pub fn new<I, S, T>(
        entries: I,
        name_field: impl Into<String>,
        slug_field: impl Into<String>,
        mirror_ref_field: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(src, dst)| FieldMap {
                    source_field: src.into(),
                    mirror_field: dst.into(),
                })
                .collect(),
            name_field: name_field.into(),
            slug_field: slug_field.into(),
            mirror_ref_field: mirror_ref_field.into(),
        }
    }

    /// Check the table for mistakes that would corrupt every cycle.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entries.is_empty() {
            return Err(ConfigError::InvalidMapping("mapping table is empty".into()));
        }

        let mut targets = HashSet::new();
        for entry in &self.entries {
            if entry.source_field.trim().is_empty() || entry.mirror_field.trim().is_empty() {
                return Err(ConfigError::InvalidMapping(format!(
                    "blank field name in entry {entry:?}"
                )));
            }
            if !targets.insert(entry.mirror_field.as_str()) {
                return Err(ConfigError::InvalidMapping(format!(
                    "mirror field '{}' is mapped more than once",
                    entry.mirror_field
                )));
            }
            if entry.source_field == self.mirror_ref_field {
                return Err(ConfigError::InvalidMapping(format!(
                    "mirror reference field '{}' must not be mapped",
                    self.mirror_ref_field
                )));
            }
        }

        if self.name_mirror_field().is_none() {
            return Err(ConfigError::InvalidMapping(format!(
                "name field '{}' is not mapped",
                self.name_field
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn entries(&self) -> &[FieldMap] {
        &self.entries
    }

    #[must_use]
    pub fn name_field(&self) -> &str {
        &self.name_field
    }

    #[must_use]
    pub fn slug_field(&self) -> &str {
        &self.slug_field
    }

    #[must_use]
    pub fn mirror_ref_field(&self) -> &str {
        &self.mirror_ref_field
    }

    fn name_mirror_field(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.source_field == self.name_field)
            .map(|e| e.mirror_field.as_str())
    }

    /// Project a source record onto mirror fields, excluding the slug.
    #[must_use]
    pub fn map_fields(&self, record: &SourceRecord) -> MappedFields {
        let mut mapped = MappedFields::default();
        for entry in &self.entries {
            if entry.mirror_field == self.slug_field {
                continue;
            }
            let value = if entry.source_field == self.name_field {
                Some(Value::String(record.name.clone()))
            } else {
                record.attributes.get(&entry.source_field).cloned()
            };
            if let Some(value) = value.filter(|v| !is_empty_value(v)) {
                mapped.insert(entry.mirror_field.clone(), value);
            }
        }
        mapped
    }

    /// Fields sent when creating a mirror item: the mapped set plus the slug.
    #[must_use]
    pub fn create_fields(&self, record: &SourceRecord, slug: &str) -> MappedFields {
        let mut fields = self.map_fields(record);
        fields.insert(self.slug_field.clone(), Value::String(slug.to_string()));
        fields
    }
}

/// A normalized source record.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub id: String,
    pub name: String,
    /// Raw source attributes keyed by source field name.
    pub attributes: BTreeMap<String, Value>,
    pub mirror_ref: Option<String>,
}

impl SourceRecord {
    /// Look up a raw attribute by source field name.
    #[must_use]
    pub fn attribute(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }
}

/// Mirror-vocabulary field set produced by [`FieldMapping::map_fields`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MappedFields(BTreeMap<String, Value>);

impl MappedFields {
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    #[must_use]
    pub fn contains_key(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether any field differs from the given mirror field values.
    ///
    /// Only fields present in `self` are compared; mirror-only fields are
    /// ignored.
    #[must_use]
    pub fn differs_from(&self, mirror: &BTreeMap<String, Value>) -> bool {
        self.0.iter().any(|(field, value)| match mirror.get(field) {
            Some(current) => !values_equal(value, current),
            None => true,
        })
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl FromIterator<(String, Value)> for MappedFields {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Absent-equivalent values are never written to the mirror.
#[must_use]
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Compare a mapped source value with the value currently stored on the mirror.
///
/// Numbers compare numerically and an image field (an object with a `url`)
/// equals the plain URL string it was created from.
#[must_use]
pub fn values_equal(source: &Value, mirror: &Value) -> bool {
    match (source, mirror) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (Value::String(url), Value::Object(image)) => image
            .get("url")
            .and_then(Value::as_str)
            .is_some_and(|stored| stored == url),
        _ => source == mirror,
    }
}
