use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::{Value, json};

use tagpool::aggregate::{Element, Groups, group_across, group_expand, merge_data};
use tagpool::{
    Decision, FieldMap, Rating, RatingEntry, RatingIndex, ResultDict, ResultField, TagIndex,
    TagSet,
};

const NAMES: [&str; 5] = ["sub", "ses", "task", "run", "type"];
const VALUES: [&str; 3] = ["1", "2", "3"];

fn tag_set() -> impl Strategy<Value = TagSet> {
    prop::collection::btree_map(
        prop::sample::select(NAMES.to_vec()),
        prop::sample::select(VALUES.to_vec()),
        0..=4,
    )
    .prop_map(|pairs| TagSet::from_pairs(pairs))
}

fn rating() -> impl Strategy<Value = Rating> {
    prop::sample::select(vec![Rating::None, Rating::Good, Rating::Uncertain, Rating::Bad])
}

fn entries() -> impl Strategy<Value = Vec<RatingEntry>> {
    prop::collection::vec(
        (tag_set(), rating()).prop_map(|(tags, rating)| RatingEntry::new(tags, rating)),
        0..8,
    )
}

fn normalized(groups: &Groups) -> Vec<(TagSet, Vec<usize>)> {
    let mut out: Vec<(TagSet, Vec<usize>)> = groups
        .iter()
        .map(|(key, elements)| {
            let mut indices: Vec<usize> = elements.iter().map(|e| e.index).collect();
            indices.sort_unstable();
            (key.clone(), indices)
        })
        .collect();
    out.sort();
    out
}

fn groups_from(keys: &[TagSet]) -> Groups {
    let mut groups = Groups::new();
    for (index, key) in keys.iter().enumerate() {
        groups.entry(key.clone()).or_default().push(Element {
            index,
            across_value: index.to_string(),
            data: BTreeMap::new(),
        });
    }
    groups
}

proptest! {
    #[test]
    fn get_without_filters_returns_every_record(records in prop::collection::vec(tag_set(), 0..12)) {
        let mut index = TagIndex::new();
        for (i, tags) in records.iter().enumerate() {
            index.add(format!("r{i}"), tags.clone());
        }
        let all: Vec<String> = index.get([]).into_iter().collect();
        prop_assert_eq!(all.len(), records.len());
    }

    #[test]
    fn record_is_found_by_its_tags_and_their_subsets(records in prop::collection::vec(tag_set(), 1..12)) {
        let mut index = TagIndex::new();
        for (i, tags) in records.iter().enumerate() {
            index.add(format!("r{i}"), tags.clone());
        }
        for (i, tags) in records.iter().enumerate() {
            let id = format!("r{i}");
            let full = index.get(tags.iter());
            prop_assert!(full.contains(&id));
            for subset in tags.subsets() {
                let wider = index.get(subset.iter());
                prop_assert!(full.is_subset(&wider));
            }
        }
    }

    #[test]
    fn bad_entry_on_a_matching_subset_always_excludes(
        base in entries(),
        query in tag_set(),
        mask in any::<u8>(),
    ) {
        let before = RatingIndex::from_entries(base.clone()).unwrap().decide(&query);
        let bad_tags: TagSet = query
            .iter()
            .enumerate()
            .filter(|(bit, _)| mask & (1 << bit) != 0)
            .map(|(_, pair)| pair)
            .collect();
        let mut with_bad = base;
        with_bad.push(RatingEntry::new(bad_tags, Rating::Bad));
        let after = RatingIndex::from_entries(with_bad).unwrap().decide(&query);
        prop_assert_eq!(after, Decision::Exclude);
        if before == Decision::Exclude {
            prop_assert_eq!(after, Decision::Exclude);
        }
    }

    #[test]
    fn decision_ignores_key_order_and_repeated_keys(base in entries(), query in tag_set()) {
        let index = RatingIndex::from_entries(base).unwrap();
        let mut reversed: Vec<(String, String)> = query
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        reversed.reverse();
        if let Some(first) = reversed.first().cloned() {
            reversed.push(first);
        }
        let shuffled = TagSet::from_pairs(reversed);
        prop_assert_eq!(index.decide(&query), index.decide(&shuffled));

        let mut fields = FieldMap::new();
        for (name, value) in query.iter().collect::<Vec<_>>().into_iter().rev() {
            fields.insert(name.to_string(), Value::String(value.to_string()));
        }
        prop_assert_eq!(index.decide(&query), index.decide_fields(&fields));
    }

    #[test]
    fn group_expand_is_idempotent(keys in prop::collection::vec(tag_set(), 0..10)) {
        let once = group_expand(groups_from(&keys));
        let twice = group_expand(once.clone());
        prop_assert_eq!(normalized(&once), normalized(&twice));

        let total: usize = once.values().map(Vec::len).sum();
        prop_assert_eq!(total, keys.len());
        let cluster_keys: Vec<&TagSet> = once.keys().collect();
        for (i, a) in cluster_keys.iter().enumerate() {
            for b in &cluster_keys[i + 1..] {
                prop_assert!(!a.is_compatible(b));
            }
        }
    }

    #[test]
    fn identical_remaining_tags_share_a_group(
        records in prop::collection::vec((prop::sample::select(VALUES.to_vec()), tag_set()), 1..10),
    ) {
        let results: Vec<ResultDict> = records
            .iter()
            .map(|(subject, tags)| {
                let mut pairs: Vec<(&str, &str)> =
                    tags.iter().filter(|(name, _)| *name != "sub").collect();
                pairs.push(("sub", *subject));
                ResultDict::with_tags(pairs)
            })
            .collect();
        let groups = group_across(&results, "sub").unwrap();
        for (key, elements) in &groups {
            for element in elements {
                let expected = results[element.index].string_tags().without("sub");
                prop_assert_eq!(&expected, key);
            }
        }
        let grouped: usize = groups.values().map(Vec::len).sum();
        prop_assert_eq!(grouped, results.len());
    }

    #[test]
    fn merging_a_single_element_keeps_its_values(
        numbers in prop::collection::btree_map("[a-z]{1,6}", -1.0e6f64..1.0e6, 0..4),
        labels in prop::collection::btree_map("[a-z]{1,6}", "[a-z]{1,8}", 0..4),
    ) {
        let mut data = BTreeMap::new();
        for (key, value) in &numbers {
            data.insert((ResultField::Vals, key.clone()), json!(value));
        }
        for (key, value) in &labels {
            data.insert((ResultField::Metadata, key.clone()), json!(value));
        }
        let element = Element { index: 0, across_value: "01".to_string(), data };
        let merged = merge_data(std::slice::from_ref(&element), 1e-9);
        for (key, value) in &numbers {
            prop_assert_eq!(&merged.vals[key.as_str()], &json!(value));
        }
        for (key, value) in &labels {
            prop_assert_eq!(&merged.metadata[key.as_str()], &json!(value));
        }
    }
}
