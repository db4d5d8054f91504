#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Result pooling across tags.
pub mod aggregate;
/// Runners shared by the demo binaries.
pub mod apps;
/// Engine configuration types.
pub mod config;
/// Centralized constants used across the index, ratings, and aggregation.
pub mod constants;
/// Result filters (cutoffs, covariates, QC exclusion).
pub mod filter;
mod hash;
/// File-association index.
pub mod index;
/// Cluster size metrics.
pub mod metrics;
/// QC ratings and decisions.
pub mod rating;
/// Result record types.
pub mod result;
/// Continuous and categorical summaries.
pub mod summary;
/// Tag sets and tag value normalization.
pub mod tags;
/// Shared type aliases.
pub mod types;

mod errors;

pub use aggregate::{
    Aggregation, Element, Groups, SequentialAggregation, aggregate, aggregate_results,
    aggregate_sequential, group_across, group_expand, merge_data, summarize_metadata,
};
pub use config::{AggregateConfig, EngineConfig, IndexConfig, QcConfig};
pub use errors::TagPoolError;
pub use filter::{CovariateTable, FilterOptions, ResultFilter, filter_results};
pub use index::{DuplicateCriterion, DuplicateResolution, FilterSpec, IdSet, IntendedFor, TagIndex};
pub use metrics::{ClusterShare, ClusterSizes};
pub use rating::{Decision, Rating, RatingEntry, RatingIndex};
pub use result::{FieldMap, ResultDict, ResultField};
pub use summary::{Categorical, Continuous};
pub use tags::TagSet;
pub use types::{AcrossValue, FieldKey, RecordId, TagName, TagValue, VariableName};
