use std::io;

use thiserror::Error;

use crate::types::TagName;

/// Error type for index construction, rating configuration, and result processing.
#[derive(Debug, Error)]
pub enum TagPoolError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unknown rating '{0}'")]
    UnknownRating(String),
    #[error("tag '{tag}' has unsupported value {value}")]
    InvalidTagValue { tag: TagName, value: String },
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("invalid result record: {0}")]
    InvalidRecord(String),
    #[error("invalid glob pattern '{pattern}': {reason}")]
    Glob { pattern: String, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TagPoolError {
    /// True for errors raised while building an index from configuration
    /// (rating files, rating entries, tag values). These abort a run.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::UnknownRating(_)
                | Self::InvalidTagValue { .. }
                | Self::Glob { .. }
        )
    }
}
