/// Constants describing tag names and their priority.
pub mod tags {
    /// Tag carrying the subject label.
    pub const SUBJECT_TAG: &str = "sub";
    /// Tag that scopes QC rating entries to an output type.
    pub const TYPE_TAG: &str = "type";
    /// Tag that carries a task label; structural outputs lack it.
    pub const TASK_TAG: &str = "task";
    /// BIDS-style prefix stripped from subject labels.
    pub const SUBJECT_PREFIX: &str = "sub-";
    /// Separator between a tag name and its value in `name=value` arguments.
    pub const TAG_ARG_DELIMITER: char = '=';
    /// Separator between entity and value in intended-for rules (`dir.AP`).
    pub const INTENDED_FOR_DELIMITER: char = '.';
    /// Value used in intended-for rules to mean "entity is absent".
    pub const INTENDED_FOR_NULL: &str = "null";
    /// Default association scan order, most identifying entity first.
    pub const ENTITY_PRIORITY: [&str; 8] =
        ["sub", "ses", "task", "run", "acq", "dir", "echo", "desc"];
}

/// Constants used by the QC rating index.
pub mod rating {
    /// Entry field holding the rating name.
    pub const RATING_FIELD: &str = "rating";
    /// Upper bound on distinct known tag names; subset enumeration is `2^n`.
    pub const MAX_SUBSET_TAGS: usize = 24;
    /// Characters that mark a rating-file path as a glob pattern.
    pub const GLOB_META_CHARS: [char; 3] = ['*', '?', '['];
}

/// Constants used by result aggregation and summaries.
pub mod aggregate {
    /// Metadata attributes whose values are concatenated instead of summarized.
    pub const SOURCE_KEYS: [&str; 4] = ["sources", "Sources", "raw_sources", "RawSources"];
    /// Default order in which across-keys are pooled.
    pub const AGGREGATE_ORDER: [&str; 4] = ["dir", "run", "ses", "task"];
    /// Relative tolerance for near-equality (matches `math.isclose`).
    pub const DEFAULT_RELATIVE_TOLERANCE: f64 = 1e-9;
    /// Key holding a value inside a categorical tally entry.
    pub const TALLY_VALUE_KEY: &str = "value";
    /// Key holding a count inside a categorical tally entry.
    pub const TALLY_COUNT_KEY: &str = "count";
    /// Mean key of a summarized continuous measurement.
    pub const CONTINUOUS_MEAN_KEY: &str = "mean";
    /// Standard deviation key.
    pub const CONTINUOUS_STD_KEY: &str = "std";
    /// Observation count key.
    pub const CONTINUOUS_N_OBSERVATIONS_KEY: &str = "n_observations";
    /// Missing count key.
    pub const CONTINUOUS_N_MISSING_KEY: &str = "n_missing";
}

/// Constants used by result filters.
pub mod filter {
    /// Filter spec type selecting by tag values.
    pub const FILTER_TYPE_TAG: &str = "tag";
    /// Keep matching records.
    pub const ACTION_INCLUDE: &str = "include";
    /// Drop matching records.
    pub const ACTION_EXCLUDE: &str = "exclude";
    /// Framewise-displacement percentage field; cutoffs below 1 are fractions.
    pub const FD_PERC_FIELD: &str = "fd_perc";
}

/// Constants used by the demo runners.
pub mod apps {
    /// Output key for aggregated records.
    pub const OUTPUT_AGGREGATED_KEY: &str = "aggregated";
    /// Output key for records passed through unchanged.
    pub const OUTPUT_BYPASS_KEY: &str = "bypass";
}
