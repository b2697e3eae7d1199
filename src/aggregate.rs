//! Collects validated clusters from every batch of one run.
//!
//! No merging or deduplication: two batches reporting the same cluster yield
//! two records. Output follows batch order, then order within the response,
//! regardless of the order batches completed in.

use crate::types::{ClusterDraft, EventId, NewClusterSummary};

#[derive(Debug, Clone)]
pub struct ClusterAggregator {
    event_id: EventId,
    owner_id: String,
    batches: Vec<(usize, Vec<ClusterDraft>)>,
}

impl ClusterAggregator {
    pub fn new(event_id: EventId, owner_id: impl Into<String>) -> Self {
        Self {
            event_id,
            owner_id: owner_id.into(),
            batches: Vec::new(),
        }
    }

    /// Add one batch's validated clusters.
    pub fn push_batch(&mut self, batch_index: usize, clusters: Vec<ClusterDraft>) {
        if !clusters.is_empty() {
            self.batches.push((batch_index, clusters));
        }
    }

    pub fn len(&self) -> usize {
        self.batches.iter().map(|(_, c)| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stamp every cluster with the run's event and owner.
    pub fn finish(mut self) -> Vec<NewClusterSummary> {
        // Stable sort keeps response order within a batch.
        self.batches.sort_by_key(|(idx, _)| *idx);
        let event_id = self.event_id;
        let owner_id = self.owner_id;
        self.batches
            .into_iter()
            .flat_map(|(_, clusters)| clusters)
            .map(|cluster| NewClusterSummary {
                event_id,
                owner_id: owner_id.clone(),
                cluster,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn draft(label: &str) -> ClusterDraft {
        ClusterDraft {
            cluster_label: label.into(),
            root_cause: "cause".into(),
            sample: vec![],
            severity: Severity::Info,
            count: 1,
        }
    }

    #[test]
    fn stamps_run_metadata_and_keeps_batch_order() {
        let event_id = EventId::new();
        let mut agg = ClusterAggregator::new(event_id, "system-user");
        agg.push_batch(2, vec![draft("c")]);
        agg.push_batch(0, vec![draft("a1"), draft("a2")]);
        agg.push_batch(1, vec![]);
        assert_eq!(agg.len(), 3);

        let out = agg.finish();
        let labels: Vec<&str> = out.iter().map(|c| c.cluster.cluster_label.as_str()).collect();
        assert_eq!(labels, vec!["a1", "a2", "c"]);
        assert!(out.iter().all(|c| c.event_id == event_id && c.owner_id == "system-user"));
    }

    #[test]
    fn identical_clusters_from_different_batches_are_kept() {
        let mut agg = ClusterAggregator::new(EventId::new(), "o");
        agg.push_batch(0, vec![draft("dup")]);
        agg.push_batch(1, vec![draft("dup")]);
        assert_eq!(agg.finish().len(), 2);
    }

    #[test]
    fn empty_aggregate() {
        let agg = ClusterAggregator::new(EventId::new(), "o");
        assert!(agg.is_empty());
        assert!(agg.finish().is_empty());
    }
}
