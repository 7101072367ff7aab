//! Radio topology and link properties.

use bramble::{Duration, NodeId};
use hashbrown::HashMap;

/// Properties of a radio link between two nodes.
#[derive(Debug, Clone)]
pub struct Link {
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Packet loss rate (0.0 to 1.0).
    pub loss_rate: f64,
    /// Propagation plus stack delay.
    pub delay: Duration,
    /// Whether the link is currently usable.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            rssi: -70,
            loss_rate: 0.0,
            delay: Duration::from_millis(2),
            active: true,
        }
    }
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Which nodes are in radio range of each other.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Links between pairs of nodes, stored with canonical ordering.
    links: HashMap<(NodeId, NodeId), Link>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every node hears every other node.
    pub fn fully_connected(nodes: &[NodeId]) -> Self {
        let mut topo = Self::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                topo.add_link(a, b, Link::default());
            }
        }
        topo
    }

    /// A line: each node hears only its direct neighbors.
    pub fn chain(nodes: &[NodeId]) -> Self {
        let mut topo = Self::new();
        for window in nodes.windows(2) {
            topo.add_link(window[0], window[1], Link::default());
        }
        topo
    }

    fn canonical_pair(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Add a bidirectional link.
    pub fn add_link(&mut self, a: NodeId, b: NodeId, link: Link) {
        self.links.insert(Self::canonical_pair(a, b), link);
    }

    pub fn get_link(&self, a: NodeId, b: NodeId) -> Option<&Link> {
        self.links.get(&Self::canonical_pair(a, b))
    }

    pub fn get_link_mut(&mut self, a: NodeId, b: NodeId) -> Option<&mut Link> {
        self.links.get_mut(&Self::canonical_pair(a, b))
    }

    /// Whether two nodes can currently hear each other.
    pub fn is_connected(&self, a: NodeId, b: NodeId) -> bool {
        self.get_link(a, b).is_some_and(|link| link.active)
    }

    /// All nodes reachable from `node` over active links, in stable order.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        let mut result: Vec<NodeId> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| {
                if a == node {
                    Some(b)
                } else if b == node {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        result.sort_unstable();
        result
    }

    /// Deactivate every link that crosses group boundaries.
    pub fn partition(&mut self, groups: &[Vec<NodeId>]) {
        let group_of = |node: NodeId| groups.iter().position(|g| g.contains(&node));
        for (&(a, b), link) in self.links.iter_mut() {
            if group_of(a) != group_of(b) {
                link.active = false;
            }
        }
    }

    /// Reactivate every link.
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fully_connected() {
        let topo = Topology::fully_connected(&[1, 2, 3]);
        assert!(topo.is_connected(1, 2));
        assert!(topo.is_connected(2, 3));
        assert!(topo.is_connected(3, 1));
        assert_eq!(topo.neighbors(1), vec![2, 3]);
    }

    #[test]
    fn test_chain() {
        let topo = Topology::chain(&[1, 2, 3]);
        assert!(topo.is_connected(1, 2));
        assert!(topo.is_connected(2, 3));
        assert!(!topo.is_connected(1, 3));
    }

    #[test]
    fn test_partition_and_heal() {
        let mut topo = Topology::fully_connected(&[1, 2, 3, 4]);
        topo.partition(&[vec![1, 2], vec![3, 4]]);

        assert!(topo.is_connected(1, 2));
        assert!(topo.is_connected(3, 4));
        assert!(!topo.is_connected(2, 3));

        topo.heal();
        assert!(topo.is_connected(2, 3));
    }
}
