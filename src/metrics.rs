use crate::aggregate::Groups;

/// Size metrics for the clusters produced by one aggregation step.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterSizes {
    /// Records across all clusters.
    pub elements: usize,
    /// Number of clusters.
    pub clusters: usize,
    /// Clusters with one record.
    pub singletons: usize,
    /// Smallest cluster size.
    pub min: usize,
    /// Largest cluster size.
    pub max: usize,
    /// Mean cluster size.
    pub mean: f64,
    /// Share of records in the largest cluster.
    pub max_share: f64,
    /// Per-cluster sizes, largest first.
    pub per_cluster: Vec<ClusterShare>,
}

/// Per-cluster share of the pooled elements.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterShare {
    /// Rendered cluster key (`sub "01", task "rest"`); empty for the
    /// catch-all cluster.
    pub key: String,
    /// Records in the cluster.
    pub size: usize,
    /// Fraction of all records.
    pub share: f64,
}

/// Compute size metrics from expanded groups.
pub fn cluster_sizes(groups: &Groups) -> Option<ClusterSizes> {
    let sizes: Vec<usize> = groups.values().map(Vec::len).collect();
    let min = *sizes.iter().min()?;
    let max = *sizes.iter().max()?;
    let elements: usize = sizes.iter().sum();
    let clusters = sizes.len();
    let share = |size: usize| {
        if elements == 0 {
            0.0
        } else {
            size as f64 / elements as f64
        }
    };
    let mut per_cluster: Vec<ClusterShare> = groups
        .iter()
        .map(|(key, members)| ClusterShare {
            key: key.to_string(),
            size: members.len(),
            share: share(members.len()),
        })
        .collect();
    per_cluster.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.key.cmp(&b.key)));
    Some(ClusterSizes {
        elements,
        clusters,
        singletons: sizes.iter().filter(|size| **size == 1).count(),
        min,
        max,
        mean: elements as f64 / clusters as f64,
        max_share: share(max),
        per_cluster,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Element;
    use crate::tags::TagSet;

    fn elements(indices: &[usize]) -> Vec<Element> {
        indices
            .iter()
            .map(|index| Element {
                index: *index,
                across_value: index.to_string(),
                data: Default::default(),
            })
            .collect()
    }

    #[test]
    fn cluster_sizes_report_balance() {
        let mut groups = Groups::new();
        groups.insert(TagSet::from_pairs([("task", "rest")]), elements(&[0, 1]));
        groups.insert(TagSet::from_pairs([("task", "nback")]), elements(&[2, 3]));
        let sizes = cluster_sizes(&groups).expect("sizes");
        assert_eq!(sizes.elements, 4);
        assert_eq!(sizes.clusters, 2);
        assert_eq!(sizes.singletons, 0);
        assert!((sizes.max_share - 0.5).abs() < 1e-6);
        assert!(sizes.per_cluster.iter().all(|c| (c.share - 0.5).abs() < 1e-6));
    }

    #[test]
    fn cluster_sizes_order_largest_first() {
        let mut groups = Groups::new();
        groups.insert(TagSet::from_pairs([("task", "rest")]), elements(&[0]));
        groups.insert(TagSet::new(), elements(&[1, 2, 3]));
        let sizes = cluster_sizes(&groups).expect("sizes");
        assert_eq!(sizes.singletons, 1);
        assert_eq!(sizes.max, 3);
        assert_eq!(sizes.per_cluster[0].key, "");
        assert_eq!(sizes.per_cluster[0].size, 3);
        assert!(cluster_sizes(&Groups::new()).is_none());
    }
}
