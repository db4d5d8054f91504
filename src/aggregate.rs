//! Pooling of result records across one tag.
//!
//! Aggregation runs in two phases. [`group_across`] removes the across-key
//! from every record and groups records whose remaining string tags are
//! identical. [`group_expand`] then merges groups whose keys agree on every
//! shared tag until no compatible pair is left; the merged key keeps only the
//! agreeing entries. Each cluster is finally folded into one record with
//! [`merge_data`].
//!
//! Keys without a shared tag are compatible, so `{task: rest}` and
//! `{task: nback, run: 1}` do not merge while `{task: rest}` and `{run: 1}`
//! do. The greedy pairwise merge depends on group order when compatibility
//! is not transitive.

use std::collections::{BTreeMap, VecDeque};
use std::mem;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::AggregateConfig;
use crate::constants::aggregate::SOURCE_KEYS;
use crate::errors::TagPoolError;
use crate::metrics::{ClusterSizes, cluster_sizes};
use crate::result::{FieldMap, ResultDict, ResultField};
use crate::summary::summarize;
use crate::tags::TagSet;
use crate::types::{AcrossValue, FieldKey, TagName};

/// One record inside a group, with its payload flattened to
/// `(field, attribute)` positions.
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    /// Position of the record in the aggregated input.
    pub index: usize,
    /// Value of the across-key this record contributed.
    pub across_value: AcrossValue,
    /// Payload keyed by `(field, attribute)`.
    pub data: BTreeMap<(ResultField, FieldKey), Value>,
}

/// Elements keyed by their remaining tags, in first-seen order.
pub type Groups = IndexMap<TagSet, Vec<Element>>;

/// Output of one aggregation step.
#[derive(Clone, Debug, Default)]
pub struct Aggregation {
    /// Records pooled from clusters with more than one element.
    pub aggregated: Vec<ResultDict>,
    /// Singleton clusters and records without the across-key, unchanged.
    pub bypass: Vec<ResultDict>,
    /// Cluster statistics, `None` when no record had the across-key.
    pub sizes: Option<ClusterSizes>,
}

/// Group records by their tags without `across_key`.
///
/// Every record must carry `across_key` as a string or single-element list.
/// Tags with non-string values do not take part in grouping. All tags except
/// `across_key` travel in the element payload.
pub fn group_across(results: &[ResultDict], across_key: &str) -> Result<Groups, TagPoolError> {
    let mut groups = Groups::new();
    for (index, result) in results.iter().enumerate() {
        let across_value = result
            .tag_str(across_key)
            .ok_or_else(|| {
                TagPoolError::InvalidRecord(format!(
                    "record {index}: expected \"{across_key}\" to be a string, got {}",
                    result.tags.get(across_key).unwrap_or(&Value::Null)
                ))
            })?
            .to_string();

        let key: TagSet = result
            .tags
            .iter()
            .filter(|(name, _)| name.as_str() != across_key)
            .filter_map(|(name, value)| value.as_str().map(|value| (name.as_str(), value)))
            .collect();

        let mut data = BTreeMap::new();
        for field in ResultField::ALL {
            for (attribute, value) in result.field(field) {
                if field == ResultField::Tags && attribute == across_key {
                    continue;
                }
                data.insert((field, attribute.clone()), value.clone());
            }
        }

        groups.entry(key).or_default().push(Element {
            index,
            across_value,
            data,
        });
    }
    Ok(groups)
}

/// Merge compatible groups until no two keys are compatible.
///
/// Each pass pops keys in order and merges the target with the first
/// compatible key still pending; the merged key is queued again. Passes
/// repeat until one makes no merge, so expanding the output is a no-op.
pub fn group_expand(groups: Groups) -> Groups {
    let mut expanded = groups;
    loop {
        let (next, merged) = expand_pass(expanded);
        expanded = next;
        if !merged {
            return expanded;
        }
    }
}

fn expand_pass(mut groups: Groups) -> (Groups, bool) {
    let mut pending: VecDeque<TagSet> = groups.keys().cloned().collect();
    let mut merged_any = false;
    while let Some(target) = pending.pop_front() {
        let Some(position) = pending.iter().position(|candidate| candidate.is_compatible(&target))
        else {
            continue;
        };
        let Some(candidate) = pending.remove(position) else {
            continue;
        };
        let key = target.intersection(&candidate);
        debug!(target = %target, candidate = %candidate, merged = %key, "merging groups");

        let mut elements = groups.shift_remove(&target).unwrap_or_default();
        elements.extend(groups.shift_remove(&candidate).unwrap_or_default());
        groups.entry(key.clone()).or_default().extend(elements);
        if !pending.contains(&key) {
            pending.push_back(key);
        }
        merged_any = true;
    }
    (groups, merged_any)
}

/// Fold the elements of one cluster into a single record.
///
/// Positions are visited in provenance order. Images, source lists and
/// tags are concatenated with one level of flattening; a tag absent from an
/// element contributes null. Every other attribute is summarized, with absent
/// values counted as missing.
pub fn merge_data(elements: &[Element], tolerance: f64) -> ResultDict {
    let mut sorted: Vec<&Element> = elements.iter().collect();
    sorted.sort_by_key(|element| element.index);

    let positions: IndexSet<&(ResultField, FieldKey)> =
        sorted.iter().flat_map(|element| element.data.keys()).collect();

    let mut merged = ResultDict::default();
    for position in positions {
        let values: Vec<Option<&Value>> =
            sorted.iter().map(|element| element.data.get(position)).collect();
        let (field, attribute) = position;
        let value = if *field == ResultField::Tags {
            concatenate_tags(&values)
        } else if concatenates(*field, attribute) {
            concatenate(&values)
        } else {
            let values: Vec<Value> = values
                .into_iter()
                .map(|value| value.cloned().unwrap_or(Value::Null))
                .collect();
            summarize(&values, tolerance)
        };
        merged.field_mut(*field).insert(attribute.clone(), value);
    }
    merged
}

fn concatenates(field: ResultField, attribute: &str) -> bool {
    match field {
        ResultField::Tags | ResultField::Images => true,
        ResultField::Metadata => SOURCE_KEYS.contains(&attribute),
        ResultField::Vals => false,
    }
}

fn concatenate(values: &[Option<&Value>]) -> Value {
    let mut items = Vec::new();
    for value in values.iter().flatten() {
        match value {
            Value::Null => {}
            Value::Array(nested) => items.extend(nested.iter().cloned()),
            other => items.push((*other).clone()),
        }
    }
    Value::Array(items)
}

fn concatenate_tags(values: &[Option<&Value>]) -> Value {
    let mut items = Vec::new();
    for value in values {
        match value {
            None => items.push(Value::Null),
            Some(Value::Array(nested)) => items.extend(nested.iter().cloned()),
            Some(other) => items.push((*other).clone()),
        }
    }
    Value::Array(items)
}

/// Pool `results` across `across_key` with default settings.
///
/// Returns `(aggregated, bypass)`.
pub fn aggregate(
    results: &[ResultDict],
    across_key: &str,
) -> Result<(Vec<ResultDict>, Vec<ResultDict>), TagPoolError> {
    let aggregation = aggregate_results(results, across_key, &AggregateConfig::default())?;
    Ok((aggregation.aggregated, aggregation.bypass))
}

/// Pool `results` across `across_key`.
///
/// A cluster with more than one element becomes a new record whose
/// `tags[across_key]` lists the contributing values in input order, followed
/// by the cluster key. Singleton clusters and records lacking the across-key
/// are passed through unchanged in `bypass`.
pub fn aggregate_results(
    results: &[ResultDict],
    across_key: &str,
    config: &AggregateConfig,
) -> Result<Aggregation, TagPoolError> {
    let (with_key, without_key): (Vec<ResultDict>, Vec<ResultDict>) = results
        .iter()
        .cloned()
        .partition(|result| result.tags.contains_key(across_key));

    let groups = group_expand(group_across(&with_key, across_key)?);
    let sizes = cluster_sizes(&groups);

    let mut aggregation = Aggregation {
        sizes,
        ..Aggregation::default()
    };
    for (key, mut elements) in groups {
        elements.sort_by_key(|element| element.index);
        if let [single] = elements.as_slice() {
            aggregation.bypass.push(with_key[single.index].clone());
            continue;
        }

        let mut merged = merge_data(&elements, config.relative_tolerance);
        let mut tags = FieldMap::new();
        tags.insert(
            across_key.to_string(),
            Value::Array(
                elements
                    .iter()
                    .map(|element| Value::String(element.across_value.clone()))
                    .collect(),
            ),
        );
        for (name, value) in key.iter() {
            tags.insert(name.to_string(), Value::String(value.to_string()));
        }
        for (name, value) in merged.tags.drain(..) {
            tags.entry(name).or_insert(value);
        }
        merged.tags = tags;
        aggregation.aggregated.push(merged);
    }
    aggregation.bypass.extend(without_key);

    info!(
        across = across_key,
        aggregated = aggregation.aggregated.len(),
        bypass = aggregation.bypass.len(),
        "aggregated results"
    );
    Ok(aggregation)
}

/// Result of [`aggregate_sequential`].
#[derive(Clone, Debug, Default)]
pub struct SequentialAggregation {
    /// Records pooled in the last step.
    pub aggregated: Vec<ResultDict>,
    /// Everything else that left the last step.
    pub bypass: Vec<ResultDict>,
    /// Cluster sizes of each step that saw records with its across-key.
    pub steps: Vec<(TagName, ClusterSizes)>,
}

impl SequentialAggregation {
    /// Aggregated and bypassed records together.
    pub fn into_results(self) -> Vec<ResultDict> {
        self.aggregated.into_iter().chain(self.bypass).collect()
    }
}

/// Aggregate across each key of `config.across_order` in turn.
///
/// The aggregated and bypassed records of one step are the input of the
/// next; every output is passed through [`summarize_metadata`].
pub fn aggregate_sequential(
    results: Vec<ResultDict>,
    config: &AggregateConfig,
) -> Result<SequentialAggregation, TagPoolError> {
    let summarized = |records: Vec<ResultDict>| -> Vec<ResultDict> {
        records
            .iter()
            .map(|result| summarize_metadata(result, config.relative_tolerance))
            .collect()
    };
    let mut output = SequentialAggregation {
        bypass: results,
        ..SequentialAggregation::default()
    };
    for across_key in &config.across_order {
        let input: Vec<ResultDict> = mem::take(&mut output.aggregated)
            .into_iter()
            .chain(mem::take(&mut output.bypass))
            .collect();
        let step = aggregate_results(&input, across_key, config)?;
        if let Some(sizes) = step.sizes {
            output.steps.push((across_key.clone(), sizes));
        }
        output.aggregated = summarized(step.aggregated);
        output.bypass = summarized(step.bypass);
    }
    Ok(output)
}

/// Summarize every list-valued attribute of `vals` and `metadata`.
///
/// Source lists are left as they are; `tags` and `images` are untouched.
pub fn summarize_metadata(result: &ResultDict, tolerance: f64) -> ResultDict {
    let mut result = result.clone();
    for field in [ResultField::Vals, ResultField::Metadata] {
        for (attribute, value) in result.field_mut(field).iter_mut() {
            if field == ResultField::Metadata && SOURCE_KEYS.contains(&attribute.as_str()) {
                continue;
            }
            if let Value::Array(items) = value {
                *value = summarize(items, tolerance);
            }
        }
    }
    result
}
