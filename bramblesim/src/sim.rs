//! Discrete event simulator for bramble networks.
//!
//! Models the radio layer the core consumes: periodic advertisement
//! fan-out to scanning neighbors, GAP connections with per-link delay and
//! loss, and out-of-band access connections. All scheduling goes through a
//! deterministic `(time, seq)` priority queue, so a run is reproducible
//! from its seed.

use std::collections::BinaryHeap;

use bramble::node::LinkUpKind;
use bramble::{
    DisconnectReason, Duration, LinkHandle, NodeAddr, NodeConfig, NodeId, Timestamp,
};
use hashbrown::HashMap;

use crate::event::{ScenarioAction, ScheduledEvent, SequenceNumber, SimEvent};
use crate::metrics::{ClusterSnapshot, SimMetrics, SimulationResult};
use crate::node::{SimCommand, SimNode};
use crate::topology::Topology;

/// Periodic tick fed to every node.
const TICK: Duration = Duration::from_millis(100);

/// One established GAP connection between two nodes.
#[derive(Debug, Clone, Copy)]
struct SimConnection {
    a: NodeId,
    a_handle: LinkHandle,
    b: NodeId,
    b_handle: LinkHandle,
}

impl SimConnection {
    fn peer_of(&self, node: NodeId, handle: LinkHandle) -> Option<(NodeId, LinkHandle)> {
        if self.a == node && self.a_handle == handle {
            Some((self.b, self.b_handle))
        } else if self.b == node && self.b_handle == handle {
            Some((self.a, self.a_handle))
        } else {
            None
        }
    }
}

/// Derive the radio address of a simulated node.
pub fn addr_of(node: NodeId) -> NodeAddr {
    [node as u8, (node >> 8) as u8, 0xB2, 0xA5, 0x00, 0xC4]
}

fn node_of(addr: &NodeAddr) -> NodeId {
    u16::from_le_bytes([addr[0], addr[1]])
}

/// Discrete event simulator for a bramble network.
pub struct Simulator {
    nodes: HashMap<NodeId, SimNode>,
    /// Node ids in creation order, for deterministic iteration.
    order: Vec<NodeId>,
    configs: HashMap<NodeId, NodeConfig>,
    topology: Topology,
    current_time: Timestamp,
    event_queue: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
    /// Connections keyed by id.
    connections: HashMap<u32, SimConnection>,
    next_conn_id: u32,
    /// (node, handle) -> connection id.
    link_index: HashMap<(NodeId, LinkHandle), u32>,
    metrics: SimMetrics,
    snapshot_interval: Option<Duration>,
    next_snapshot: Option<Timestamp>,
    /// RNG state for packet loss.
    rng_state: u64,
    base_seed: u64,
    restarts: u64,
}

impl Simulator {
    /// Create a new simulator with the given RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            configs: HashMap::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            next_seq: 0,
            connections: HashMap::new(),
            next_conn_id: 1,
            link_index: HashMap::new(),
            metrics: SimMetrics::new(),
            snapshot_interval: None,
            next_snapshot: None,
            rng_state: seed | 1,
            base_seed: seed,
            restarts: 0,
        }
    }

    /// Set the radio topology.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Record a cluster snapshot every `interval`.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    /// Add a node with the default configuration.
    pub fn add_node(&mut self, node_id: NodeId) -> NodeId {
        self.add_node_with_config(node_id, NodeConfig::default())
    }

    /// Add a node with a specific configuration.
    pub fn add_node_with_config(&mut self, node_id: NodeId, config: NodeConfig) -> NodeId {
        let seed = self
            .base_seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(node_id as u64);
        let node = SimNode::new(node_id, config.clone(), seed, self.current_time);
        let adv_interval = node
            .advertising()
            .map(|a| a.interval)
            .unwrap_or(TICK);

        self.nodes.insert(node_id, node);
        if !self.order.contains(&node_id) {
            self.order.push(node_id);
        }
        self.configs.insert(node_id, config);

        self.drain_node(node_id);
        self.schedule(self.current_time + TICK, SimEvent::TimerFire { node: node_id });
        self.schedule(
            self.current_time + adv_interval,
            SimEvent::AdvBroadcast { node: node_id },
        );

        node_id
    }

    /// Restart a node, losing all protocol state but keeping its identity.
    pub fn restart_node(&mut self, node_id: NodeId) {
        if self.nodes.remove(&node_id).is_none() {
            return;
        }

        // Connections involving the node die; peers see a link loss.
        let dead: Vec<u32> = self
            .connections
            .iter()
            .filter(|(_, c)| c.a == node_id || c.b == node_id)
            .map(|(&id, _)| id)
            .collect();
        for conn_id in dead {
            if let Some(conn) = self.connections.remove(&conn_id) {
                let (peer, peer_handle) = if conn.a == node_id {
                    (conn.b, conn.b_handle)
                } else {
                    (conn.a, conn.a_handle)
                };
                self.link_index.remove(&(conn.a, conn.a_handle));
                self.link_index.remove(&(conn.b, conn.b_handle));
                self.schedule_delayed(
                    node_id,
                    peer,
                    SimEvent::LinkDown {
                        node: peer,
                        handle: peer_handle,
                        reason: DisconnectReason::LinkLoss,
                    },
                );
            }
        }

        self.restarts += 1;
        let config = self
            .configs
            .get(&node_id)
            .cloned()
            .unwrap_or_default();
        let seed = self
            .base_seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(node_id as u64)
            .wrapping_add(self.restarts << 32);
        let node = SimNode::new(node_id, config, seed, self.current_time);
        let adv_interval = node.advertising().map(|a| a.interval).unwrap_or(TICK);
        self.nodes.insert(node_id, node);

        self.drain_node(node_id);
        self.schedule(self.current_time + TICK, SimEvent::TimerFire { node: node_id });
        self.schedule(
            self.current_time + adv_interval,
            SimEvent::AdvBroadcast { node: node_id },
        );
    }

    /// Kill an established connection between two nodes; both sides
    /// observe a link loss.
    pub fn drop_connection(&mut self, a: NodeId, b: NodeId) {
        let found = self
            .connections
            .iter()
            .find(|(_, c)| (c.a == a && c.b == b) || (c.a == b && c.b == a))
            .map(|(&id, _)| id);
        if let Some(conn_id) = found {
            if let Some(conn) = self.connections.remove(&conn_id) {
                self.link_index.remove(&(conn.a, conn.a_handle));
                self.link_index.remove(&(conn.b, conn.b_handle));
                for (node, handle) in [(conn.a, conn.a_handle), (conn.b, conn.b_handle)] {
                    self.schedule_delayed(
                        node,
                        node,
                        SimEvent::LinkDown {
                            node,
                            handle,
                            reason: DisconnectReason::LinkLoss,
                        },
                    );
                }
            }
        }
    }

    pub fn node(&self, id: &NodeId) -> Option<&SimNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut SimNode> {
        self.nodes.get_mut(id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.order
            .iter()
            .filter(|id| self.nodes.contains_key(*id))
            .copied()
            .collect()
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Schedule an event.
    pub fn schedule(&mut self, time: Timestamp, event: SimEvent) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    /// Schedule a scenario action.
    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, SimEvent::ScenarioAction(action));
    }

    fn schedule_delayed(&mut self, from: NodeId, to: NodeId, event: SimEvent) {
        let delay = self
            .topology
            .get_link(from, to)
            .map(|l| l.delay)
            .unwrap_or(Duration::from_millis(2));
        self.schedule(self.current_time + delay, event);
    }

    /// Run the simulation until the given time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while let Some(event) = self.event_queue.peek() {
            if event.time > end_time {
                break;
            }
            let event = match self.event_queue.pop() {
                Some(e) => e,
                None => break,
            };
            if event.time > self.current_time {
                self.current_time = event.time;
            }
            self.process_event(event.event);
            self.maybe_take_snapshot();
        }

        if end_time > self.current_time {
            self.current_time = end_time;
        }
        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    /// Run the simulation for the given duration.
    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    fn process_event(&mut self, event: SimEvent) {
        match event {
            SimEvent::TimerFire { node } => {
                let now = self.current_time;
                if let Some(sim_node) = self.nodes.get_mut(&node) {
                    sim_node.inner_mut().handle_timer(now, TICK);
                    self.drain_node(node);
                    self.schedule(now + TICK, SimEvent::TimerFire { node });
                }
            }
            SimEvent::AdvBroadcast { node } => {
                self.broadcast_beacon(node);
            }
            SimEvent::AdvDeliver {
                to,
                from,
                data,
                rssi,
            } => {
                let now = self.current_time;
                if let Some(sim_node) = self.nodes.get_mut(&to) {
                    sim_node
                        .inner_mut()
                        .handle_adv_report(addr_of(from), &data, rssi, true, now);
                    self.metrics.adv_delivered += 1;
                    self.drain_node(to);
                }
            }
            SimEvent::MeshDeliver { to, handle, data } => {
                let now = self.current_time;
                // The connection may have died while the packet was in
                // flight.
                if !self.link_index.contains_key(&(to, handle)) {
                    self.metrics.messages_dropped += 1;
                    return;
                }
                if let Some(sim_node) = self.nodes.get_mut(&to) {
                    sim_node.inner_mut().handle_mesh_message(handle, &data, now);
                    self.metrics.messages_delivered += 1;
                    self.drain_node(to);
                }
            }
            SimEvent::LinkUp { node, handle, kind } => {
                let now = self.current_time;
                if let Some(sim_node) = self.nodes.get_mut(&node) {
                    sim_node.inner_mut().handle_link_up(handle, kind, now);
                    self.drain_node(node);
                }
            }
            SimEvent::LinkDown {
                node,
                handle,
                reason,
            } => {
                let now = self.current_time;
                if let Some(sim_node) = self.nodes.get_mut(&node) {
                    sim_node.inner_mut().handle_link_down(handle, reason, now);
                    self.drain_node(node);
                }
            }
            SimEvent::ScenarioAction(action) => self.execute_action(action),
        }
    }

    /// Deliver a node's beacon to every scanning neighbor in range.
    fn broadcast_beacon(&mut self, node: NodeId) {
        let Some(sim_node) = self.nodes.get(&node) else {
            return;
        };
        let adv = sim_node.advertising();
        let next = adv.as_ref().map(|a| a.interval).unwrap_or(TICK);

        if let Some(adv) = adv {
            let neighbors = self.topology.neighbors(node);
            for neighbor in neighbors {
                let Some(link) = self.topology.get_link(node, neighbor) else {
                    continue;
                };
                let (loss, delay, rssi) = (link.loss_rate, link.delay, link.rssi);
                let scanning = self
                    .nodes
                    .get(&neighbor)
                    .is_some_and(|n| n.scanning());
                if !scanning {
                    continue;
                }
                if loss > 0.0 && self.random_f64() < loss {
                    continue;
                }
                self.schedule(
                    self.current_time + delay,
                    SimEvent::AdvDeliver {
                        to: neighbor,
                        from: node,
                        data: adv.payload.clone(),
                        rssi,
                    },
                );
            }
        }

        self.schedule(self.current_time + next, SimEvent::AdvBroadcast { node });
    }

    /// Route the commands a node issued to its radio.
    fn drain_node(&mut self, node: NodeId) {
        let commands = match self.nodes.get_mut(&node) {
            Some(n) => n.take_commands(),
            None => return,
        };

        for command in commands {
            match command {
                SimCommand::Connect { partner, addr, .. } => {
                    self.establish(node, node_of(&addr), Some(partner), None);
                }
                SimCommand::ConnectAccess { addr, handle, key } => {
                    self.establish(node, node_of(&addr), None, Some((handle, key)));
                }
                SimCommand::Send { link, data } => {
                    self.metrics.messages_sent += 1;
                    let Some(&conn_id) = self.link_index.get(&(node, link)) else {
                        self.metrics.messages_dropped += 1;
                        continue;
                    };
                    let Some(conn) = self.connections.get(&conn_id).copied() else {
                        self.metrics.messages_dropped += 1;
                        continue;
                    };
                    let Some((peer, peer_handle)) = conn.peer_of(node, link) else {
                        continue;
                    };
                    // Established connections are reliable: the link layer
                    // retransmits below us, so the loss rate only applies
                    // to advertisements. An inactive link still drops.
                    let Some((active, delay)) = self
                        .topology
                        .get_link(node, peer)
                        .map(|l| (l.active, l.delay))
                    else {
                        self.metrics.messages_dropped += 1;
                        continue;
                    };
                    if !active {
                        self.metrics.messages_dropped += 1;
                        continue;
                    }
                    self.schedule(
                        self.current_time + delay,
                        SimEvent::MeshDeliver {
                            to: peer,
                            handle: peer_handle,
                            data,
                        },
                    );
                }
                SimCommand::Disconnect { link, reason } => {
                    let Some(conn_id) = self.link_index.remove(&(node, link)) else {
                        continue;
                    };
                    let Some(conn) = self.connections.remove(&conn_id) else {
                        continue;
                    };
                    let Some((peer, peer_handle)) = conn.peer_of(node, link) else {
                        continue;
                    };
                    self.link_index.remove(&(peer, peer_handle));
                    self.schedule_delayed(
                        node,
                        peer,
                        SimEvent::LinkDown {
                            node: peer,
                            handle: peer_handle,
                            reason,
                        },
                    );
                }
            }
        }
    }

    /// Create a connection between an initiator and a target, either a
    /// mesh connection or an out-of-band access connection.
    fn establish(
        &mut self,
        initiator: NodeId,
        target: NodeId,
        _mesh_partner: Option<NodeId>,
        access: Option<(LinkHandle, bramble::KeyId)>,
    ) {
        if !self.topology.is_connected(initiator, target) {
            return;
        }
        if !self.nodes.contains_key(&target) {
            return;
        }
        // A silent advertiser cannot be connected to.
        let target_advertising = self
            .nodes
            .get(&target)
            .is_some_and(|n| n.advertising().is_some());
        if !target_advertising && access.is_none() {
            return;
        }

        let a_handle = match access {
            Some((handle, _)) => handle,
            None => match self.nodes.get_mut(&initiator) {
                Some(n) => n.alloc_handle(),
                None => return,
            },
        };
        let b_handle = match self.nodes.get_mut(&target) {
            Some(n) => n.alloc_handle(),
            None => return,
        };

        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;
        self.connections.insert(
            conn_id,
            SimConnection {
                a: initiator,
                a_handle,
                b: target,
                b_handle,
            },
        );
        self.link_index.insert((initiator, a_handle), conn_id);
        self.link_index.insert((target, b_handle), conn_id);

        let (a_kind, b_kind) = match access {
            Some((_, key)) => (
                LinkUpKind::AccessOutbound,
                LinkUpKind::AccessInbound { key },
            ),
            None => (LinkUpKind::MeshOutbound, LinkUpKind::MeshInbound),
        };

        self.schedule_delayed(
            initiator,
            target,
            SimEvent::LinkUp {
                node: initiator,
                handle: a_handle,
                kind: a_kind,
            },
        );
        self.schedule_delayed(
            initiator,
            target,
            SimEvent::LinkUp {
                node: target,
                handle: b_handle,
                kind: b_kind,
            },
        );
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::Partition { groups } => self.topology.partition(&groups),
            ScenarioAction::HealPartition => self.topology.heal(),
            ScenarioAction::DisableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { from, to, rate } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
            ScenarioAction::TakeSnapshot => self.take_snapshot(),
        }
    }

    fn maybe_take_snapshot(&mut self) {
        if let Some(next) = self.next_snapshot {
            if self.current_time >= next {
                self.take_snapshot();
                if let Some(interval) = self.snapshot_interval {
                    self.next_snapshot = Some(next + interval);
                }
            }
        }
    }

    /// Record every node's cluster view.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = ClusterSnapshot::new(self.current_time);
        for &node_id in &self.order {
            if let Some(node) = self.nodes.get(&node_id) {
                snapshot.record_node(
                    node_id,
                    node.cluster_id(),
                    node.cluster_size(),
                    node.has_all_master_bits(),
                );
            }
        }
        self.metrics.add_snapshot(snapshot);
    }

    /// Uniform f64 in [0, 1) from the sim's own generator.
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.rng_state >> 11) as f64 / (1u64 << 53) as f64
    }
}
