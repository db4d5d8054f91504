//! Per-scan result records exchanged between pipeline stages.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::TagPoolError;
use crate::tags::TagSet;
use crate::types::FieldKey;

/// Ordered attribute map of one result field.
pub type FieldMap = IndexMap<FieldKey, Value>;

/// The four fields of a [`ResultDict`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultField {
    /// `tags`
    Tags,
    /// `images`
    Images,
    /// `vals`
    Vals,
    /// `metadata`
    Metadata,
}

impl ResultField {
    /// Every field, in serialization order.
    pub const ALL: [ResultField; 4] = [
        ResultField::Tags,
        ResultField::Images,
        ResultField::Vals,
        ResultField::Metadata,
    ];

    /// Field name as serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            ResultField::Tags => "tags",
            ResultField::Images => "images",
            ResultField::Vals => "vals",
            ResultField::Metadata => "metadata",
        }
    }
}

impl fmt::Display for ResultField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result record with exactly the `tags`, `images`, `vals` and `metadata`
/// fields. Missing fields deserialize as empty maps; unknown top-level keys
/// are rejected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResultDict {
    /// Tags describing the observation.
    pub tags: FieldMap,
    /// Image paths.
    pub images: FieldMap,
    /// Scalar statistics.
    pub vals: FieldMap,
    /// Acquisition metadata and source lists.
    pub metadata: FieldMap,
}

impl ResultDict {
    /// Record with the given string tags and empty payload.
    pub fn with_tags<'a, I>(tags: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self {
            tags: tags
                .into_iter()
                .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
                .collect(),
            ..Self::default()
        }
    }

    /// Decode a JSON object, rejecting unknown top-level keys.
    pub fn from_value(value: Value) -> Result<Self, TagPoolError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Map stored under `field`.
    pub fn field(&self, field: ResultField) -> &FieldMap {
        match field {
            ResultField::Tags => &self.tags,
            ResultField::Images => &self.images,
            ResultField::Vals => &self.vals,
            ResultField::Metadata => &self.metadata,
        }
    }

    /// Mutable map stored under `field`.
    pub fn field_mut(&mut self, field: ResultField) -> &mut FieldMap {
        match field {
            ResultField::Tags => &mut self.tags,
            ResultField::Images => &mut self.images,
            ResultField::Vals => &mut self.vals,
            ResultField::Metadata => &mut self.metadata,
        }
    }

    /// String value of tag `name`, unwrapping single-element lists.
    pub fn tag_str(&self, name: &str) -> Option<&str> {
        match self.tags.get(name)? {
            Value::String(value) => Some(value),
            Value::Array(items) if items.len() == 1 => items[0].as_str(),
            _ => None,
        }
    }

    /// The string-valued tags as a [`TagSet`]; other tags are skipped.
    pub fn string_tags(&self) -> TagSet {
        self.tags
            .iter()
            .filter_map(|(name, value)| value.as_str().map(|value| (name.as_str(), value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_fields_default_to_empty() {
        let result = ResultDict::from_value(json!({"tags": {"sub": "01"}})).unwrap();
        assert_eq!(result.tag_str("sub"), Some("01"));
        assert!(result.vals.is_empty());
        assert!(result.images.is_empty());
    }

    #[test]
    fn unknown_top_level_keys_are_rejected() {
        let err = ResultDict::from_value(json!({"tags": {}, "value": {}})).unwrap_err();
        assert!(matches!(err, TagPoolError::Json(_)));
    }

    #[test]
    fn string_tags_skip_lists() {
        let result = ResultDict::from_value(json!({
            "tags": {"sub": "01", "run": ["1", "2"], "ses": ["a"]}
        }))
        .unwrap();
        let tags = result.string_tags();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.get("sub"), Some("01"));
        assert_eq!(result.tag_str("ses"), Some("a"));
        assert_eq!(result.tag_str("run"), None);
    }
}
