//! Canonical tag sets and value normalization.
//!
//! A [`TagSet`] is an immutable mapping of tag names to string values stored as
//! a sorted vector of pairs, so equality and hashing are structural and do not
//! depend on insertion order. Tag sets are used as map keys by every index in
//! this crate.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::tags::{SUBJECT_PREFIX, SUBJECT_TAG, TAG_ARG_DELIMITER};
use crate::errors::TagPoolError;
use crate::types::{TagName, TagValue};

/// Immutable, canonically ordered mapping of tag names to values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Vec<(TagName, TagValue)>", into = "Vec<(TagName, TagValue)>")]
pub struct TagSet {
    entries: Vec<(TagName, TagValue)>,
}

impl TagSet {
    /// Create an empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tag set from pairs. A repeated name keeps its last value.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<TagName>,
        V: Into<TagValue>,
    {
        let mut entries: Vec<(TagName, TagValue)> = Vec::new();
        for (name, value) in pairs {
            let name = name.into();
            let value = value.into();
            match entries.binary_search_by(|(existing, _)| existing.as_str().cmp(&name)) {
                Ok(pos) => entries[pos].1 = value,
                Err(pos) => entries.insert(pos, (name, value)),
            }
        }
        Self { entries }
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set has no tags.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value of `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .map(|pos| self.entries[pos].1.as_str())
    }

    /// Whether a tag named `name` is present.
    pub fn contains_key(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Iterate `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Iterate tag names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Copy of this set with `name` set to `value`.
    pub fn with(&self, name: impl Into<TagName>, value: impl Into<TagValue>) -> Self {
        let mut entries = self.entries.clone();
        let name = name.into();
        let value = value.into();
        match entries.binary_search_by(|(existing, _)| existing.as_str().cmp(&name)) {
            Ok(pos) => entries[pos].1 = value,
            Err(pos) => entries.insert(pos, (name, value)),
        }
        Self { entries }
    }

    /// Copy of this set without `name`.
    pub fn without(&self, name: &str) -> Self {
        self.restrict(|candidate| candidate != name)
    }

    /// Copy of this set keeping only the names accepted by `keep`.
    pub fn restrict<F>(&self, keep: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(name, _)| keep(name))
                .cloned()
                .collect(),
        }
    }

    /// Two sets are compatible when they agree on every name both define.
    /// Sets without shared names are compatible.
    pub fn is_compatible(&self, other: &TagSet) -> bool {
        let (left, right) = (&self.entries, &other.entries);
        let (mut i, mut j) = (0, 0);
        while i < left.len() && j < right.len() {
            match left[i].0.cmp(&right[j].0) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    if left[i].1 != right[j].1 {
                        return false;
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        true
    }

    /// Entries shared by both sets with equal values.
    pub fn intersection(&self, other: &TagSet) -> TagSet {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(name, value)| other.get(name) == Some(value.as_str()))
                .cloned()
                .collect(),
        }
    }

    /// True when every entry of `self` appears in `other`.
    pub fn is_subset_of(&self, other: &TagSet) -> bool {
        self.iter().all(|(name, value)| other.get(name) == Some(value))
    }

    /// Enumerate every subset, starting with the empty set.
    ///
    /// Subsets are generated from a bitmask over the entries; callers bound
    /// the set size (see [`crate::constants::rating::MAX_SUBSET_TAGS`]).
    pub fn subsets(&self) -> Subsets<'_> {
        let total = u32::try_from(self.entries.len())
            .ok()
            .and_then(|len| 1u64.checked_shl(len))
            .unwrap_or(u64::MAX);
        Subsets {
            entries: &self.entries,
            mask: 0,
            total,
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .binary_search_by(|(existing, _)| existing.as_str().cmp(name))
            .ok()
    }
}

impl From<Vec<(TagName, TagValue)>> for TagSet {
    fn from(pairs: Vec<(TagName, TagValue)>) -> Self {
        Self::from_pairs(pairs)
    }
}

impl From<TagSet> for Vec<(TagName, TagValue)> {
    fn from(tags: TagSet) -> Self {
        tags.entries
    }
}

impl<K, V> FromIterator<(K, V)> for TagSet
where
    K: Into<TagName>,
    V: Into<TagValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{name} \"{value}\"")?;
            first = false;
        }
        Ok(())
    }
}

/// Iterator over all subsets of a [`TagSet`].
pub struct Subsets<'a> {
    entries: &'a [(TagName, TagValue)],
    mask: u64,
    total: u64,
}

impl Iterator for Subsets<'_> {
    type Item = TagSet;

    fn next(&mut self) -> Option<Self::Item> {
        if self.mask >= self.total {
            return None;
        }
        let mask = self.mask;
        self.mask += 1;
        let entries = self
            .entries
            .iter()
            .enumerate()
            .filter(|(bit, _)| mask & (1u64 << bit) != 0)
            .map(|(_, entry)| entry.clone())
            .collect();
        Some(TagSet { entries })
    }
}

/// Strip the `sub-` prefix from a subject label.
pub fn normalize_subject(value: &str) -> String {
    value
        .strip_prefix(SUBJECT_PREFIX)
        .unwrap_or(value)
        .to_string()
}

/// Normalize a raw tag value to its canonical string.
///
/// Single-element lists are unwrapped and subject labels lose their `sub-`
/// prefix. Anything that is not a string afterwards is rejected.
pub fn normalize_tag_value(tag: &str, value: &Value) -> Result<TagValue, TagPoolError> {
    let unwrapped = match value {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    };
    let Value::String(text) = unwrapped else {
        return Err(TagPoolError::InvalidTagValue {
            tag: tag.to_string(),
            value: value.to_string(),
        });
    };
    if tag == SUBJECT_TAG {
        Ok(normalize_subject(text))
    } else {
        Ok(text.clone())
    }
}

/// Parse a `name=value` argument into its parts.
pub fn parse_tag_arg(raw: &str) -> Result<(TagName, TagValue), String> {
    let Some((name, value)) = raw.split_once(TAG_ARG_DELIMITER) else {
        return Err(format!("expected NAME=VALUE, got '{raw}'"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing tag name in '{raw}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
