//! Quality-control ratings and include/exclude decisions.
//!
//! A [`RatingIndex`] is built once from rating entries, each a partial tag set
//! with a [`Rating`]. A query collects the ratings of every subset of its
//! (known) tags and decides on the most severe one, so a single `bad` entry
//! that matches excludes the observation regardless of how many `good`
//! entries also match.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use globset::GlobBuilder;
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::QcConfig;
use crate::constants::rating::{GLOB_META_CHARS, MAX_SUBSET_TAGS, RATING_FIELD};
use crate::constants::tags::{SUBJECT_TAG, TYPE_TAG};
use crate::errors::TagPoolError;
use crate::result::FieldMap;
use crate::tags::{TagSet, normalize_subject, normalize_tag_value};
use crate::types::{TagName, TagValue};

/// Severity of a quality rating, least severe first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rating {
    /// No rating recorded.
    None,
    /// Usable.
    Good,
    /// Included with a warning.
    Uncertain,
    /// Always excluded.
    Bad,
}

impl Rating {
    /// Lowercase rating name.
    pub fn as_str(self) -> &'static str {
        match self {
            Rating::None => "none",
            Rating::Good => "good",
            Rating::Uncertain => "uncertain",
            Rating::Bad => "bad",
        }
    }
}

impl FromStr for Rating {
    type Err = TagPoolError;

    /// Case-insensitive rating name.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "none" => Ok(Rating::None),
            "good" => Ok(Rating::Good),
            "uncertain" => Ok(Rating::Uncertain),
            "bad" => Ok(Rating::Bad),
            _ => Err(TagPoolError::UnknownRating(raw.to_string())),
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an observation enters the analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Decision {
    /// Keep the observation.
    Include,
    /// Drop the observation.
    Exclude,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decision::Include => "include",
            Decision::Exclude => "exclude",
        })
    }
}

/// A rated tag subset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RatingEntry {
    /// Normalized tags the rating applies to.
    pub tags: TagSet,
    /// Recorded rating.
    pub rating: Rating,
}

impl RatingEntry {
    /// Entry for already normalized tags.
    pub fn new(tags: TagSet, rating: Rating) -> Self {
        Self { tags, rating }
    }

    /// Parse one entry of a rating file.
    ///
    /// Every key except `rating` is a tag; values are normalized (single
    /// lists unwrapped, `sub-` stripped) and must end up as strings. A missing
    /// or null rating is [`Rating::None`].
    pub fn from_json(value: &Value) -> Result<Self, TagPoolError> {
        let Value::Object(fields) = value else {
            return Err(TagPoolError::Configuration(format!(
                "rating entry must be an object, got {value}"
            )));
        };
        let rating = match fields.get(RATING_FIELD) {
            None | Some(Value::Null) => Rating::None,
            Some(Value::String(name)) => name.parse()?,
            Some(other) => return Err(TagPoolError::UnknownRating(other.to_string())),
        };
        let tags = fields
            .iter()
            .filter(|(name, _)| name.as_str() != RATING_FIELD)
            .map(|(name, raw)| Ok((name.clone(), normalize_tag_value(name, raw)?)))
            .collect::<Result<Vec<(TagName, TagValue)>, TagPoolError>>()?;
        Ok(Self {
            tags: TagSet::from_pairs(tags),
            rating,
        })
    }
}

/// Decision index over rated tag subsets.
#[derive(Debug, Default)]
pub struct RatingIndex {
    index: HashMap<TagSet, BTreeSet<Rating>>,
    known_keys: BTreeSet<TagName>,
    types: BTreeSet<TagValue>,
    strict: bool,
    warned: Mutex<HashSet<TagSet>>,
}

impl RatingIndex {
    /// Empty, non-strict index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already normalized entries.
    pub fn from_entries<I>(entries: I) -> Result<Self, TagPoolError>
    where
        I: IntoIterator<Item = RatingEntry>,
    {
        let mut index = Self::new();
        for entry in entries {
            index.add_entry(entry)?;
        }
        Ok(index)
    }

    /// Build from raw JSON entries.
    pub fn from_json_values(values: &[Value]) -> Result<Self, TagPoolError> {
        let entries = values
            .iter()
            .map(RatingEntry::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_entries(entries)
    }

    /// Load rating files; patterns with glob characters are expanded.
    pub fn from_files<P: AsRef<Path>>(patterns: &[P]) -> Result<Self, TagPoolError> {
        let mut index = Self::new();
        for pattern in patterns {
            for path in expand_pattern(pattern.as_ref())? {
                index.add_file(&path)?;
            }
        }
        Ok(index)
    }

    /// Load `config.exclude_files` and apply `config.strict`.
    pub fn from_config(config: &QcConfig) -> Result<Self, TagPoolError> {
        Ok(Self::from_files(&config.exclude_files)?.with_strict(config.strict))
    }

    /// In strict mode observations without any rating are excluded.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Whether unrated observations are excluded.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Read a JSON array of rating entries.
    pub fn add_file(&mut self, path: &Path) -> Result<(), TagPoolError> {
        let text = fs::read_to_string(path)?;
        let Value::Array(values) = serde_json::from_str::<Value>(&text)? else {
            return Err(TagPoolError::Configuration(format!(
                "rating file {} must contain a JSON array",
                path.display()
            )));
        };
        for value in &values {
            self.add_entry(RatingEntry::from_json(value)?)?;
        }
        info!(path = %path.display(), entries = values.len(), "loaded rating file");
        Ok(())
    }

    /// Index one entry under its tag set.
    pub fn add_entry(&mut self, entry: RatingEntry) -> Result<(), TagPoolError> {
        self.known_keys
            .extend(entry.tags.names().map(str::to_string));
        if self.known_keys.len() > MAX_SUBSET_TAGS {
            return Err(TagPoolError::Configuration(format!(
                "rating entries use {} distinct tags, at most {MAX_SUBSET_TAGS} are supported",
                self.known_keys.len()
            )));
        }
        if let Some(rating_type) = entry.tags.get(TYPE_TAG) {
            self.types.insert(rating_type.to_string());
        }
        self.index.entry(entry.tags).or_default().insert(entry.rating);
        Ok(())
    }

    /// Number of distinct rated tag subsets.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no entry was added.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Tag names seen in any entry.
    pub fn known_keys(&self) -> &BTreeSet<TagName> {
        &self.known_keys
    }

    /// Values of the `type` tag seen in any entry.
    pub fn types(&self) -> &BTreeSet<TagValue> {
        &self.types
    }

    /// Most severe rating recorded for any subset of `tags`.
    ///
    /// Only tags that appear in some entry take part. A query without a
    /// `type` tag also probes every subset extended with each known type.
    pub fn rating_for(&self, tags: &TagSet) -> Rating {
        self.max_rating(&self.relevant(tags))
    }

    /// Include or exclude the observation described by `tags`.
    pub fn decide(&self, tags: &TagSet) -> Decision {
        let relevant = self.relevant(tags);
        let rating = self.max_rating(&relevant);
        match rating {
            Rating::Bad => Decision::Exclude,
            Rating::Good => Decision::Include,
            Rating::None if self.strict => Decision::Exclude,
            Rating::None | Rating::Uncertain => {
                self.warn_once(relevant, rating);
                Decision::Include
            }
        }
    }

    /// Decide for the tag map of a result record.
    ///
    /// Tags whose values are not strings (or single-string lists) are left
    /// out of the query.
    pub fn decide_fields(&self, tags: &FieldMap) -> Decision {
        let mut pairs = Vec::new();
        for (name, raw) in tags {
            match normalize_tag_value(name, raw) {
                Ok(value) => pairs.push((name.clone(), value)),
                Err(err) => debug!(tag = %name, error = %err, "skipping tag in rating query"),
            }
        }
        self.decide(&TagSet::from_pairs(pairs))
    }

    fn relevant(&self, tags: &TagSet) -> TagSet {
        let restricted = tags.restrict(|name| self.known_keys.contains(name));
        match restricted.get(SUBJECT_TAG) {
            Some(subject) => {
                let subject = normalize_subject(subject);
                restricted.with(SUBJECT_TAG, subject)
            }
            None => restricted,
        }
    }

    fn max_rating(&self, relevant: &TagSet) -> Rating {
        let probe_types = !relevant.contains_key(TYPE_TAG);
        let mut rating = Rating::None;
        for subset in relevant.subsets() {
            rating = rating.max(self.subset_rating(&subset));
            if probe_types {
                for rating_type in &self.types {
                    let typed = subset.with(TYPE_TAG, rating_type.as_str());
                    rating = rating.max(self.subset_rating(&typed));
                }
            }
            if rating == Rating::Bad {
                break;
            }
        }
        rating
    }

    fn subset_rating(&self, subset: &TagSet) -> Rating {
        self.index
            .get(subset)
            .and_then(|ratings| ratings.last().copied())
            .unwrap_or(Rating::None)
    }

    fn warn_once(&self, relevant: TagSet, rating: Rating) {
        let mut warned = self.warned.lock().unwrap_or_else(PoisonError::into_inner);
        if warned.contains(&relevant) {
            return;
        }
        warn!(
            tags = %relevant,
            rating = %rating,
            "including observation for analysis even though quality rating is not good"
        );
        warned.insert(relevant);
    }
}

/// Expand a rating file pattern to the sorted list of matching files.
///
/// Paths without glob characters are returned as they are. Otherwise the
/// leading components without glob characters form the search root; `*`
/// stays within one directory and `**` crosses directories.
pub fn expand_pattern(pattern: &Path) -> Result<Vec<PathBuf>, TagPoolError> {
    let has_magic = |text: &str| text.contains(GLOB_META_CHARS);
    let raw = pattern.to_string_lossy();
    if !has_magic(&raw) {
        return Ok(vec![pattern.to_path_buf()]);
    }

    let mut root = PathBuf::new();
    let mut rest: Vec<String> = Vec::new();
    for component in pattern.components() {
        let text = component.as_os_str().to_string_lossy();
        if rest.is_empty() && !has_magic(&text) {
            root.push(component);
        } else if !matches!(component, Component::CurDir) {
            rest.push(text.into_owned());
        }
    }
    if root.as_os_str().is_empty() {
        root = PathBuf::from(".");
    }
    let relative = rest.join("/");

    let matcher = GlobBuilder::new(&relative)
        .literal_separator(true)
        .build()
        .map_err(|err| TagPoolError::Glob {
            pattern: raw.to_string(),
            reason: err.to_string(),
        })?
        .compile_matcher();

    let mut matches = Vec::new();
    for item in WalkDir::new(&root).follow_links(true) {
        let item = item.map_err(|err| TagPoolError::Glob {
            pattern: raw.to_string(),
            reason: err.to_string(),
        })?;
        if !item.file_type().is_file() {
            continue;
        }
        let Ok(candidate) = item.path().strip_prefix(&root) else {
            continue;
        };
        if matcher.is_match(candidate) {
            matches.push(item.path().to_path_buf());
        }
    }
    matches.sort();
    if matches.is_empty() {
        warn!(pattern = %raw, "rating file pattern matched no files");
    }
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs.iter().copied().collect()
    }

    fn index(entries: Value) -> RatingIndex {
        let Value::Array(values) = entries else {
            panic!("expected array");
        };
        RatingIndex::from_json_values(&values).unwrap()
    }

    #[test]
    fn parses_rating_names_case_insensitively() {
        assert_eq!("BAD".parse::<Rating>().unwrap(), Rating::Bad);
        assert_eq!("Uncertain".parse::<Rating>().unwrap(), Rating::Uncertain);
        assert_eq!("none".parse::<Rating>().unwrap(), Rating::None);
        assert!(matches!(
            "terrible".parse::<Rating>(),
            Err(TagPoolError::UnknownRating(_))
        ));
        assert!(Rating::None < Rating::Good && Rating::Uncertain < Rating::Bad);
    }

    #[test]
    fn bad_subset_excludes() {
        let index = index(json!([{"datatype": "bold", "rating": "bad"}]));
        assert_eq!(
            index.decide(&tags(&[("datatype", "bold"), ("sub", "1")])),
            Decision::Exclude
        );
        assert_eq!(index.decide(&tags(&[("datatype", "anat")])), Decision::Include);
    }

    #[test]
    fn most_severe_rating_wins() {
        let index = index(json!([
            {"sub": "01", "rating": "good"},
            {"sub": "01", "task": "rest", "rating": "good"},
            {"task": "rest", "run": "2", "rating": "bad"}
        ]));
        let query = tags(&[("sub", "01"), ("task", "rest"), ("run", "2")]);
        assert_eq!(index.rating_for(&query), Rating::Bad);
        assert_eq!(index.decide(&query), Decision::Exclude);
        let other_run = tags(&[("sub", "01"), ("task", "rest"), ("run", "1")]);
        assert_eq!(index.decide(&other_run), Decision::Include);
    }

    #[test]
    fn uncertain_and_unrated_are_included_unless_strict() {
        let lenient = index(json!([{"sub": "01", "rating": "uncertain"}]));
        assert_eq!(lenient.decide(&tags(&[("sub", "01")])), Decision::Include);
        assert_eq!(lenient.decide(&tags(&[("sub", "02")])), Decision::Include);

        let strict = index(json!([{"sub": "01", "rating": "uncertain"}])).with_strict(true);
        assert_eq!(strict.decide(&tags(&[("sub", "01")])), Decision::Include);
        assert_eq!(strict.decide(&tags(&[("sub", "02")])), Decision::Exclude);
    }

    #[test]
    fn subject_prefix_is_normalized_on_both_sides() {
        let index = index(json!([{"sub": "sub-01", "rating": "bad"}]));
        assert_eq!(index.decide(&tags(&[("sub", "01")])), Decision::Exclude);
        assert_eq!(index.decide(&tags(&[("sub", "sub-01")])), Decision::Exclude);
    }

    #[test]
    fn untyped_query_probes_known_types() {
        let index = index(json!([
            {"sub": "01", "type": "bold", "rating": "bad"},
            {"sub": "02", "type": "tsnr", "rating": "good"}
        ]));
        assert_eq!(index.decide(&tags(&[("sub", "01")])), Decision::Exclude);
        assert_eq!(
            index.decide(&tags(&[("sub", "01"), ("type", "tsnr")])),
            Decision::Include
        );
    }

    #[test]
    fn single_type_is_probed_too() {
        let index = index(json!([{"sub": "01", "type": "bold", "rating": "bad"}]));
        assert_eq!(index.decide(&tags(&[("sub", "01")])), Decision::Exclude);
    }

    #[test]
    fn rejects_malformed_entries() {
        let err = RatingIndex::from_json_values(&[json!({"sub": 1, "rating": "bad"})]).unwrap_err();
        assert!(err.is_configuration());
        let err = RatingIndex::from_json_values(&[json!({"sub": "01", "rating": "poor"})]).unwrap_err();
        assert!(matches!(err, TagPoolError::UnknownRating(_)));
        let err = RatingIndex::from_json_values(&[json!("sub-01")]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn too_many_known_tags_is_rejected() {
        let mut fields = serde_json::Map::new();
        for i in 0..=MAX_SUBSET_TAGS {
            fields.insert(format!("tag{i}"), json!("x"));
        }
        let err = RatingIndex::from_json_values(&[Value::Object(fields)]).unwrap_err();
        assert!(matches!(err, TagPoolError::Configuration(_)));
    }

    #[test]
    fn decide_fields_skips_non_string_tags() {
        let index = index(json!([{"sub": "01", "rating": "bad"}]));
        let mut fields = FieldMap::new();
        fields.insert("sub".to_string(), json!(["01"]));
        fields.insert("run".to_string(), json!(["1", "2"]));
        assert_eq!(index.decide_fields(&fields), Decision::Exclude);
    }

    #[test]
    fn loads_files_through_glob_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("qc").join("sub-01");
        fs::create_dir_all(&nested).unwrap();
        fs::write(
            nested.join("exclude.json"),
            json!([{"sub": "01", "rating": "bad"}]).to_string(),
        )
        .unwrap();
        fs::write(
            dir.path().join("qc").join("exclude.json"),
            json!([{"sub": "02", "rating": "good"}]).to_string(),
        )
        .unwrap();

        let shallow = expand_pattern(&dir.path().join("qc").join("*.json")).unwrap();
        assert_eq!(shallow.len(), 1);

        let pattern = dir.path().join("qc").join("**").join("*.json");
        let index = RatingIndex::from_files(&[pattern]).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.decide(&tags(&[("sub", "01")])), Decision::Exclude);
    }

    #[test]
    fn rating_file_must_hold_an_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exclude.json");
        fs::write(&path, r#"{"sub": "01"}"#).unwrap();
        let err = RatingIndex::from_files(&[path]).unwrap_err();
        assert!(err.is_configuration());
    }
}
