//! Metrics collection for simulation analysis.

use bramble::{ClusterId, ClusterSize, NodeId, Timestamp};
use hashbrown::HashMap;

/// A snapshot of cluster state at a point in time.
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    /// When this snapshot was taken.
    pub time: Timestamp,
    /// Cluster id reported by each node.
    pub cluster_ids: HashMap<NodeId, ClusterId>,
    /// Cluster size reported by each node.
    pub cluster_sizes: HashMap<NodeId, ClusterSize>,
    /// Whether each node holds all of its master bits.
    pub owners: HashMap<NodeId, bool>,
}

impl ClusterSnapshot {
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            cluster_ids: HashMap::new(),
            cluster_sizes: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    pub fn record_node(
        &mut self,
        node_id: NodeId,
        cluster_id: ClusterId,
        cluster_size: ClusterSize,
        owner: bool,
    ) {
        self.cluster_ids.insert(node_id, cluster_id);
        self.cluster_sizes.insert(node_id, cluster_size);
        self.owners.insert(node_id, owner);
    }

    /// All nodes report the same cluster id.
    pub fn all_one_cluster(&self) -> bool {
        let mut ids = self.cluster_ids.values();
        match ids.next() {
            Some(first) => ids.all(|id| id == first),
            None => true,
        }
    }

    /// Number of distinct cluster ids.
    pub fn cluster_count(&self) -> usize {
        let mut ids: Vec<ClusterId> = self.cluster_ids.values().copied().collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Nodes that hold all of their master bits.
    pub fn owners(&self) -> Vec<NodeId> {
        let mut owners: Vec<NodeId> = self
            .owners
            .iter()
            .filter(|(_, &owner)| owner)
            .map(|(&id, _)| id)
            .collect();
        owners.sort_unstable();
        owners
    }

    pub fn max_cluster_size(&self) -> ClusterSize {
        self.cluster_sizes.values().copied().max().unwrap_or(0)
    }

    pub fn min_cluster_size(&self) -> ClusterSize {
        self.cluster_sizes.values().copied().min().unwrap_or(0)
    }

    /// Fully converged: one cluster id and every node counts all members.
    pub fn converged(&self, node_count: usize) -> bool {
        self.all_one_cluster()
            && self
                .cluster_sizes
                .values()
                .all(|&size| size as usize == node_count)
    }
}

/// Counters collected over a simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Mesh packets handed to the radio.
    pub messages_sent: u64,
    /// Mesh packets lost to inactive links or the loss rate.
    pub messages_dropped: u64,
    /// Mesh packets delivered.
    pub messages_delivered: u64,
    /// Advertisement reports delivered.
    pub adv_delivered: u64,
    /// Cluster snapshots taken at intervals.
    pub snapshots: Vec<ClusterSnapshot>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, snapshot: ClusterSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn latest_snapshot(&self) -> Option<&ClusterSnapshot> {
        self.snapshots.last()
    }

    /// First time at which all nodes shared one cluster id.
    pub fn convergence_time(&self) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|s| s.all_one_cluster())
            .map(|s| s.time)
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Final simulation time.
    pub end_time: Timestamp,
    /// Collected metrics.
    pub metrics: SimMetrics,
    /// Whether the event queue drained before the time limit.
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// All nodes ended in one cluster of the right size.
    pub fn converged(&self, node_count: usize) -> bool {
        self.metrics
            .latest_snapshot()
            .is_some_and(|s| s.converged(node_count))
    }

    pub fn final_cluster_count(&self) -> usize {
        self.metrics
            .latest_snapshot()
            .map(|s| s.cluster_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_one_cluster() {
        let mut snapshot = ClusterSnapshot::new(Timestamp::ZERO);
        snapshot.record_node(1, 0xAA, 3, true);
        snapshot.record_node(2, 0xAA, 3, false);
        snapshot.record_node(3, 0xAA, 3, false);

        assert!(snapshot.all_one_cluster());
        assert_eq!(snapshot.cluster_count(), 1);
        assert!(snapshot.converged(3));
        assert_eq!(snapshot.owners(), vec![1]);
    }

    #[test]
    fn test_snapshot_split_clusters() {
        let mut snapshot = ClusterSnapshot::new(Timestamp::ZERO);
        snapshot.record_node(1, 0xAA, 2, true);
        snapshot.record_node(2, 0xAA, 2, false);
        snapshot.record_node(3, 0xBB, 1, true);

        assert!(!snapshot.all_one_cluster());
        assert_eq!(snapshot.cluster_count(), 2);
        assert!(!snapshot.converged(3));
    }

    #[test]
    fn test_convergence_time() {
        let mut metrics = SimMetrics::new();

        let mut s1 = ClusterSnapshot::new(Timestamp::from_secs(1));
        s1.record_node(1, 0xAA, 1, true);
        s1.record_node(2, 0xBB, 1, true);
        metrics.add_snapshot(s1);

        let mut s2 = ClusterSnapshot::new(Timestamp::from_secs(2));
        s2.record_node(1, 0xAA, 2, true);
        s2.record_node(2, 0xAA, 2, false);
        metrics.add_snapshot(s2);

        assert_eq!(metrics.convergence_time(), Some(Timestamp::from_secs(2)));
    }
}
