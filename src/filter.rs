//! Filters applied to result records before they are pooled.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::constants::aggregate::DEFAULT_RELATIVE_TOLERANCE;
use crate::constants::filter::{ACTION_EXCLUDE, ACTION_INCLUDE, FD_PERC_FIELD};
use crate::constants::tags::{SUBJECT_TAG, TASK_TAG};
use crate::errors::TagPoolError;
use crate::rating::{Decision, RatingIndex};
use crate::result::ResultDict;
use crate::summary::{Continuous, is_close};
use crate::tags::normalize_subject;
use crate::types::{FieldKey, VariableName};

/// One result filter, tagged by its `type` field.
///
/// Unrecognized filter types deserialize as [`ResultFilter::Other`] and are
/// skipped.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResultFilter {
    /// Drop task records whose `field` value exceeds `cutoff`.
    Cutoff {
        /// Must be `exclude`.
        action: String,
        /// Attribute of `vals` to compare.
        field: FieldKey,
        /// Largest value kept.
        cutoff: f64,
    },
    /// Keep or drop subjects by the level of a categorical covariate.
    Group {
        /// `include` or `exclude` the listed levels.
        action: String,
        /// Covariate holding the levels.
        #[serde(default)]
        variable: Option<VariableName>,
        /// Levels selected by the filter.
        #[serde(default)]
        levels: Vec<String>,
    },
    /// Drop subjects whose covariate value is missing.
    Missing {
        /// Must be `exclude`.
        action: String,
        /// Covariate that must be present.
        variable: VariableName,
    },
    /// Any other filter type.
    #[serde(other)]
    Other,
}

/// Per-subject covariate values, keyed by variable then subject.
///
/// Subject labels are compared without their `sub-` prefix.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct CovariateTable {
    columns: IndexMap<VariableName, IndexMap<String, Option<String>>>,
}

impl CovariateTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `subject`; `None` marks a missing value.
    pub fn insert(&mut self, variable: &str, subject: &str, value: Option<&str>) {
        self.columns
            .entry(variable.to_string())
            .or_default()
            .insert(normalize_subject(subject), value.map(str::to_string));
    }

    /// Whether any subject has a value for `variable`.
    pub fn has_variable(&self, variable: &str) -> bool {
        self.columns.contains_key(variable)
    }

    fn subjects_where<F>(&self, variable: &str, accept: F) -> HashSet<String>
    where
        F: Fn(Option<&str>) -> bool,
    {
        self.columns
            .get(variable)
            .map(|column| {
                column
                    .iter()
                    .filter(|(_, value)| accept(value.as_deref()))
                    .map(|(subject, _)| normalize_subject(subject))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Everything `filter_results` applies, in order: required images, filter
/// specs, then QC exclusion.
#[derive(Debug, Default)]
pub struct FilterOptions<'a> {
    /// Filters applied in order.
    pub specs: Vec<ResultFilter>,
    /// Keep only results with at least one of these images.
    pub require_one_of_images: Vec<FieldKey>,
    /// Covariates for `group` and `missing` filters.
    pub covariates: Option<&'a CovariateTable>,
    /// QC ratings; excluded observations are dropped.
    pub exclude: Option<&'a RatingIndex>,
    /// Only used to label log lines.
    pub model_name: Option<String>,
}

enum Predicate {
    Cutoff {
        field: FieldKey,
        cutoff: f64,
    },
    Subjects {
        variable: VariableName,
        selected: HashSet<String>,
        keep_selected: bool,
    },
}

impl Predicate {
    fn build(
        spec: &ResultFilter,
        covariates: Option<&CovariateTable>,
    ) -> Result<Option<Self>, TagPoolError> {
        match spec {
            ResultFilter::Cutoff {
                action,
                field,
                cutoff,
            } => {
                require_exclude("cutoff", action)?;
                let mut cutoff = *cutoff;
                if field == FD_PERC_FIELD
                    && cutoff < 1.0
                    && !is_close(cutoff, 1.0, DEFAULT_RELATIVE_TOLERANCE)
                {
                    warn!(cutoff, rescaled = cutoff * 100.0, "rescaling fd_perc cutoff to percent");
                    cutoff *= 100.0;
                }
                Ok(Some(Predicate::Cutoff {
                    field: field.clone(),
                    cutoff,
                }))
            }
            ResultFilter::Group {
                action,
                variable,
                levels,
            } => {
                let (Some(variable), Some(covariates)) = (variable, covariates) else {
                    return Ok(None);
                };
                if !covariates.has_variable(variable) || levels.is_empty() {
                    return Ok(None);
                }
                let keep_selected = match action.as_str() {
                    ACTION_INCLUDE => true,
                    ACTION_EXCLUDE => false,
                    other => {
                        return Err(TagPoolError::InvalidFilter(format!(
                            "unsupported group filter action \"{other}\""
                        )));
                    }
                };
                let selected = covariates.subjects_where(variable, |value| {
                    value.is_some_and(|value| levels.iter().any(|level| level == value))
                });
                Ok(Some(Predicate::Subjects {
                    variable: variable.clone(),
                    selected,
                    keep_selected,
                }))
            }
            ResultFilter::Missing { action, variable } => {
                require_exclude("missing", action)?;
                let Some(covariates) = covariates.filter(|table| table.has_variable(variable))
                else {
                    return Ok(None);
                };
                Ok(Some(Predicate::Subjects {
                    variable: variable.clone(),
                    selected: covariates.subjects_where(variable, |value| value.is_some()),
                    keep_selected: true,
                }))
            }
            ResultFilter::Other => Ok(None),
        }
    }

    fn keep(&self, result: &ResultDict, model: &str) -> Result<bool, TagPoolError> {
        match self {
            Predicate::Cutoff { field, cutoff } => {
                let tags = result.string_tags();
                if !result.tags.contains_key(TASK_TAG) {
                    debug!(tags = %tags, "skipping cutoff filter for structural record");
                    return Ok(true);
                }
                let value = match result.vals.get(field) {
                    None => {
                        if result.vals.is_empty() {
                            warn!(tags = %tags, model, field = %field, "excluding record with missing values");
                        }
                        f64::INFINITY
                    }
                    Some(Value::Number(number)) => number.as_f64().unwrap_or(f64::NAN),
                    Some(other) => Continuous::load(other)
                        .map(|measurement| measurement.mean)
                        .ok_or_else(|| {
                            TagPoolError::InvalidFilter(format!("cannot filter by \"{other}\""))
                        })?,
                };
                let keep = value <= *cutoff;
                if !keep {
                    info!(tags = %tags, model, field = %field, cutoff, "excluding record above cutoff");
                }
                Ok(keep)
            }
            Predicate::Subjects {
                variable,
                selected,
                keep_selected,
            } => {
                let subject = result.tag_str(SUBJECT_TAG).map(normalize_subject);
                let member = subject
                    .as_ref()
                    .is_some_and(|subject| selected.contains(subject));
                let keep = member == *keep_selected;
                if !keep {
                    info!(subject = ?subject, model, variable = %variable, "excluding subject");
                }
                Ok(keep)
            }
        }
    }
}

fn require_exclude(kind: &str, action: &str) -> Result<(), TagPoolError> {
    if action == ACTION_EXCLUDE {
        Ok(())
    } else {
        Err(TagPoolError::InvalidFilter(format!(
            "{kind} filter only supports \"{ACTION_EXCLUDE}\", got \"{action}\""
        )))
    }
}

/// Apply `options` to `results`, keeping the input order.
pub fn filter_results(
    results: Vec<ResultDict>,
    options: &FilterOptions<'_>,
) -> Result<Vec<ResultDict>, TagPoolError> {
    let model = options.model_name.as_deref().unwrap_or_default();
    let mut results = results;

    if !options.require_one_of_images.is_empty() {
        results.retain(|result| {
            options
                .require_one_of_images
                .iter()
                .any(|key| result.images.contains_key(key))
        });
    }

    for spec in &options.specs {
        let Some(predicate) = Predicate::build(spec, options.covariates)? else {
            debug!(filter = ?spec, "skipping inapplicable filter");
            continue;
        };
        let mut kept = Vec::with_capacity(results.len());
        for result in results {
            if predicate.keep(&result, model)? {
                kept.push(result);
            }
        }
        results = kept;
    }

    if let Some(ratings) = options.exclude {
        results.retain(|result| ratings.decide_fields(&result.tags) == Decision::Include);
    }
    Ok(results)
}
