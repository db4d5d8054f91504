use std::path::PathBuf;

use serde::Deserialize;

use crate::constants::aggregate::{AGGREGATE_ORDER, DEFAULT_RELATIVE_TOLERANCE};
use crate::constants::tags::ENTITY_PRIORITY;
use crate::types::TagName;

/// Controls how the file-association index ranks entities.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Entities visited by `associations`, in scan order. Tag filters are
    /// only accepted for entities listed here.
    pub entity_priority: Vec<TagName>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            entity_priority: ENTITY_PRIORITY.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Quality-control decision settings.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct QcConfig {
    /// Exclude observations that carry no rating at all.
    pub strict: bool,
    /// Rating files or glob patterns loaded into the rating index.
    pub exclude_files: Vec<PathBuf>,
}

/// Result aggregation settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    /// Across-keys pooled in turn by `aggregate_sequential`.
    pub across_order: Vec<TagName>,
    /// Relative tolerance used when merging near-equal summary values.
    pub relative_tolerance: f64,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            across_order: AGGREGATE_ORDER.iter().map(|key| key.to_string()).collect(),
            relative_tolerance: DEFAULT_RELATIVE_TOLERANCE,
        }
    }
}

/// Top-level engine configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// File-association index settings.
    pub index: IndexConfig,
    /// QC decision settings.
    pub qc: QcConfig,
    /// Aggregation settings.
    pub aggregate: AggregateConfig,
}
