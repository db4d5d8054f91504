//! File-association index.
//!
//! Records (usually file paths) are registered with a [`TagSet`] and indexed
//! under every `(name, value)` pair. Queries intersect per-pair id sets, and
//! [`TagIndex::associations`] narrows a candidate set entity by entity to find
//! the files that belong to a given scan (anatomical images, field maps,
//! event files).

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::constants::filter::{ACTION_EXCLUDE, ACTION_INCLUDE, FILTER_TYPE_TAG};
use crate::constants::tags::{INTENDED_FOR_DELIMITER, INTENDED_FOR_NULL};
use crate::errors::TagPoolError;
use crate::hash::{hex_digest, stable_hash_strs};
use crate::tags::TagSet;
use crate::types::{RecordId, TagName, TagValue};

/// Ordered set of record ids returned by index queries.
pub type IdSet = BTreeSet<RecordId>;

/// Re-targets a record to other entity values when it matches `from`.
///
/// Parsed from `entity.value` strings; a `from` value of `null` matches
/// records that do not carry the entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntendedFor {
    from_entity: TagName,
    from_value: Option<TagValue>,
    targets: Vec<(TagName, TagValue)>,
}

impl IntendedFor {
    /// Parse `entity.value` rules; a value of `null` matches records without the entity.
    pub fn parse<S: AsRef<str>>(from: &str, targets: &[S]) -> Result<Self, TagPoolError> {
        let (from_entity, from_value) = split_entity_value(from)?;
        let from_value = (from_value != INTENDED_FOR_NULL).then_some(from_value);
        let targets = targets
            .iter()
            .map(|target| split_entity_value(target.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            from_entity,
            from_value,
            targets,
        })
    }

    fn applies_to(&self, tags: &TagSet) -> bool {
        tags.get(&self.from_entity) == self.from_value.as_deref()
    }
}

fn split_entity_value(raw: &str) -> Result<(TagName, TagValue), TagPoolError> {
    raw.split_once(INTENDED_FOR_DELIMITER)
        .map(|(entity, value)| (entity.to_string(), value.to_string()))
        .ok_or_else(|| {
            TagPoolError::Configuration(format!(
                "intended-for rule '{raw}' must have the form entity.value"
            ))
        })
}

/// Tag filter applied by [`TagIndex::apply_filters`].
#[derive(Clone, Debug, Deserialize)]
pub struct FilterSpec {
    #[serde(rename = "type")]
    pub kind: String,
    /// Tag name the filter reads.
    pub entity: TagName,
    #[serde(default)]
    pub values: Vec<TagValue>,
    /// `include` or `exclude`.
    pub action: String,
}

/// Which rule picked the kept record among duplicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicateCriterion {
    /// A single record had the greatest sample count.
    LongestScan,
    /// Several records shared the greatest count; the last id won.
    LastAlphabetically,
}

/// Outcome of [`TagIndex::resolve_duplicates`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DuplicateResolution {
    /// Ids that stay, one per duplicate group plus every unique id.
    pub kept: IdSet,
    /// Ids dropped as duplicates.
    pub excluded: IdSet,
}

/// Pick one record among candidates with identical tags.
///
/// The greatest sample count wins; ties go to the lexicographically last id.
pub fn pick_duplicate(candidates: &[(RecordId, u64)]) -> Option<(&RecordId, DuplicateCriterion)> {
    let max_count = candidates.iter().map(|(_, count)| *count).max()?;
    let mut longest: Vec<&RecordId> = candidates
        .iter()
        .filter(|(_, count)| *count == max_count)
        .map(|(id, _)| id)
        .collect();
    longest.sort();
    let criterion = if longest.len() > 1 {
        DuplicateCriterion::LastAlphabetically
    } else {
        DuplicateCriterion::LongestScan
    };
    longest.pop().map(|id| (id, criterion))
}

/// Inverted index from tag pairs to record ids.
#[derive(Clone, Debug)]
pub struct TagIndex {
    ids_by_tag: BTreeMap<TagName, BTreeMap<TagValue, IdSet>>,
    tags_by_id: IndexMap<RecordId, TagSet>,
    entity_priority: Vec<TagName>,
}

impl Default for TagIndex {
    fn default() -> Self {
        Self::with_config(&IndexConfig::default())
    }
}

impl TagIndex {
    /// Empty index with the default entity priority.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty index using `config.entity_priority` for association scans.
    pub fn with_config(config: &IndexConfig) -> Self {
        Self {
            ids_by_tag: BTreeMap::new(),
            tags_by_id: IndexMap::new(),
            entity_priority: config.entity_priority.clone(),
        }
    }

    /// Register `id` under every pair of `tags`.
    ///
    /// A record is bound to one tag set for its lifetime; re-adding an id is
    /// ignored and returns `false`.
    pub fn add(&mut self, id: impl Into<RecordId>, tags: TagSet) -> bool {
        self.add_with_intended_for(id, tags, &[])
    }

    /// Register `id`, re-targeting its indexed pairs through `rules`.
    ///
    /// The stored tag set is unchanged; only the inverted index differs.
    pub fn add_with_intended_for(
        &mut self,
        id: impl Into<RecordId>,
        tags: TagSet,
        rules: &[IntendedFor],
    ) -> bool {
        let id = id.into();
        if let Some(existing) = self.tags_by_id.get(&id) {
            if existing != &tags {
                warn!(record = %id, existing = %existing, ignored = %tags, "record already indexed with other tags");
            }
            return false;
        }

        let mut indexable = tags.clone();
        let mut extra: Vec<(TagName, TagValue)> = Vec::new();
        for rule in rules {
            if !rule.applies_to(&indexable) {
                continue;
            }
            debug!(record = %id, entity = %rule.from_entity, "re-targeting record via intended-for rule");
            indexable = indexable.without(&rule.from_entity);
            extra.extend(rule.targets.iter().cloned());
        }

        let pairs = indexable
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .chain(extra);
        for (name, value) in pairs {
            self.ids_by_tag
                .entry(name)
                .or_default()
                .entry(value)
                .or_default()
                .insert(id.clone());
        }
        self.tags_by_id.insert(id, tags);
        true
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.tags_by_id.len()
    }

    /// Whether no record is indexed.
    pub fn is_empty(&self) -> bool {
        self.tags_by_id.is_empty()
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &RecordId> + '_ {
        self.tags_by_id.keys()
    }

    /// Tag set bound to `id`.
    pub fn tags(&self, id: &str) -> Option<&TagSet> {
        self.tags_by_id.get(id)
    }

    /// Value of tag `name` on record `id`.
    pub fn tagval(&self, id: &str, name: &str) -> Option<&str> {
        self.tags(id).and_then(|tags| tags.get(name))
    }

    /// Records matching every `(name, value)` filter.
    ///
    /// No filters selects every record. An unknown name or value yields an
    /// empty set.
    pub fn get<'a, I>(&self, filters: I) -> IdSet
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut matches: Option<IdSet> = None;
        for (name, value) in filters {
            let Some(ids) = self.lookup(name, value) else {
                return IdSet::new();
            };
            matches = Some(match matches {
                None => ids.clone(),
                Some(current) => current.intersection(ids).cloned().collect(),
            });
        }
        matches.unwrap_or_else(|| self.tags_by_id.keys().cloned().collect())
    }

    /// Records that carry no value for `name`.
    pub fn get_absent(&self, name: &str) -> IdSet {
        let Some(values) = self.ids_by_tag.get(name) else {
            return self.tags_by_id.keys().cloned().collect();
        };
        self.tags_by_id
            .keys()
            .filter(|id| !values.values().any(|ids| ids.contains(*id)))
            .cloned()
            .collect()
    }

    /// Restrict `ids` to records matching every filter.
    pub fn filter<'a, I>(&self, ids: &IdSet, filters: I) -> IdSet
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut result = ids.clone();
        for (name, value) in filters {
            let Some(matching) = self.lookup(name, value) else {
                return IdSet::new();
            };
            result.retain(|id| matching.contains(id));
        }
        result
    }

    /// Apply include/exclude tag filters to `ids` in order.
    pub fn apply_filters(&self, ids: &IdSet, specs: &[FilterSpec]) -> Result<IdSet, TagPoolError> {
        let mut result = ids.clone();
        for spec in specs {
            if spec.kind != FILTER_TYPE_TAG {
                return Err(TagPoolError::InvalidFilter(format!(
                    "unsupported filter type \"{}\"",
                    spec.kind
                )));
            }
            if !self.entity_priority.contains(&spec.entity) {
                return Err(TagPoolError::InvalidFilter(format!(
                    "unknown entity \"{}\"",
                    spec.entity
                )));
            }
            let mut selected = IdSet::new();
            for value in &spec.values {
                selected.extend(self.filter(ids, [(spec.entity.as_str(), value.as_str())]));
            }
            match spec.action.as_str() {
                ACTION_INCLUDE => result.retain(|id| selected.contains(id)),
                ACTION_EXCLUDE => result.retain(|id| !selected.contains(id)),
                other => {
                    return Err(TagPoolError::InvalidFilter(format!(
                        "unsupported filter action \"{other}\""
                    )));
                }
            }
        }
        Ok(result)
    }

    /// Values recorded for `name`, or `None` when the name is unknown.
    ///
    /// With `ids`, only values shared with at least one of those records are
    /// returned.
    pub fn tagvalset(&self, name: &str, ids: Option<&IdSet>) -> Option<BTreeSet<TagValue>> {
        let values = self.ids_by_tag.get(name)?;
        Some(
            values
                .iter()
                .filter(|(_, value_ids)| ids.is_none_or(|ids| !ids.is_disjoint(value_ids)))
                .map(|(value, _)| value.clone())
                .collect(),
        )
    }

    /// Distinct value tuples of `names` across records.
    ///
    /// With `prune`, names whose value set has at most `min_set_size` entries
    /// are dropped first. Returns the kept names and the tuples.
    pub fn multitagvalset(
        &self,
        names: &[&str],
        ids: Option<&IdSet>,
        prune: bool,
        min_set_size: usize,
    ) -> (Vec<TagName>, BTreeSet<Vec<Option<TagValue>>>) {
        let kept: Vec<TagName> = names
            .iter()
            .filter(|name| {
                !prune
                    || self
                        .tagvalset(name, ids)
                        .is_some_and(|values| values.len() > min_set_size)
            })
            .map(|name| name.to_string())
            .collect();

        let tag_sets: Vec<&TagSet> = match ids {
            Some(ids) => ids.iter().filter_map(|id| self.tags_by_id.get(id)).collect(),
            None => self.tags_by_id.values().collect(),
        };
        let tuples = tag_sets
            .into_iter()
            .map(|tags| {
                kept.iter()
                    .map(|name| tags.get(name).map(str::to_string))
                    .collect()
            })
            .collect();
        (kept, tuples)
    }

    /// Files associated with `id` among the records matching `filters`.
    ///
    /// Entities are visited in priority order. Each step keeps only the
    /// candidates sharing `id`'s value for that entity, unless that would
    /// leave nothing; the scan stops once exactly one candidate remains.
    pub fn associations<'a, I>(&self, id: &str, filters: I) -> Option<Vec<RecordId>>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut matching = self.get(filters);
        for entity in &self.entity_priority {
            let Some(values) = self.ids_by_tag.get(entity) else {
                continue;
            };
            let mut narrowed = IdSet::new();
            for ids in values.values().filter(|ids| ids.contains(id)) {
                narrowed.extend(ids.iter().filter(|c| matching.contains(*c)).cloned());
            }
            if Self::narrow(&mut matching, narrowed) {
                break;
            }
        }
        debug!(record = id, matches = matching.len(), "resolved associations");
        (!matching.is_empty()).then(|| matching.into_iter().collect())
    }

    /// Like [`associations`](Self::associations), but narrows by the values in
    /// `optional` instead of a reference record.
    pub fn associations_with<'a, I>(&self, optional: &TagSet, mandatory: I) -> Option<Vec<RecordId>>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut matching = self.get(mandatory);
        for entity in &self.entity_priority {
            let Some(value) = optional.get(entity) else {
                continue;
            };
            let Some(ids) = self.lookup(entity, value) else {
                continue;
            };
            let narrowed: IdSet = ids.intersection(&matching).cloned().collect();
            if Self::narrow(&mut matching, narrowed) {
                break;
            }
        }
        (!matching.is_empty()).then(|| matching.into_iter().collect())
    }

    /// Keep only one record per identical tag set.
    ///
    /// `sample_count` reports the scan length of a record (for example the
    /// number of volumes); see [`pick_duplicate`] for the policy.
    pub fn resolve_duplicates<F>(&self, ids: &IdSet, sample_count: F) -> DuplicateResolution
    where
        F: Fn(&str) -> u64,
    {
        let mut resolution = DuplicateResolution::default();
        let mut by_tags: IndexMap<&TagSet, Vec<(RecordId, u64)>> = IndexMap::new();
        for id in ids {
            match self.tags_by_id.get(id) {
                Some(tags) => by_tags
                    .entry(tags)
                    .or_default()
                    .push((id.clone(), sample_count(id))),
                None => {
                    resolution.kept.insert(id.clone());
                }
            }
        }

        for (tags, candidates) in by_tags {
            let Some((selected, criterion)) = pick_duplicate(&candidates) else {
                continue;
            };
            let selected = selected.clone();
            let excluded: Vec<&RecordId> = candidates
                .iter()
                .map(|(id, _)| id)
                .filter(|id| **id != selected)
                .collect();
            if !excluded.is_empty() {
                warn!(
                    tags = %tags,
                    kept = %selected,
                    excluded = ?excluded,
                    criterion = ?criterion,
                    "found records with identical tags"
                );
            }
            resolution.excluded.extend(excluded.into_iter().cloned());
            resolution.kept.insert(selected);
        }
        resolution
    }

    /// Stable hex digest of the indexed record ids.
    pub fn fingerprint(&self) -> String {
        let mut ids: Vec<&str> = self.tags_by_id.keys().map(String::as_str).collect();
        ids.sort_unstable();
        hex_digest(stable_hash_strs(ids))
    }

    fn lookup(&self, name: &str, value: &str) -> Option<&IdSet> {
        let Some(values) = self.ids_by_tag.get(name) else {
            debug!(tag = name, "unknown tag name");
            return None;
        };
        let ids = values.get(value);
        if ids.is_none() {
            debug!(tag = name, value, "unknown tag value");
        }
        ids
    }

    /// Replace `matching` with `narrowed` when non-empty; true once a single
    /// candidate is left.
    fn narrow(matching: &mut IdSet, narrowed: IdSet) -> bool {
        let remaining = narrowed.len();
        if remaining > 0 {
            *matching = narrowed;
        }
        remaining == 1
    }
}
