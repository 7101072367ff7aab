//! Event types and priority queue for discrete event simulation.

use std::cmp::Ordering;

use bramble::node::LinkUpKind;
use bramble::{DisconnectReason, LinkHandle, NodeId, Timestamp};

/// Unique sequence number for deterministic ordering of same-time events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Partition the network into isolated groups.
    Partition { groups: Vec<Vec<NodeId>> },
    /// Heal all partitions (restore every link).
    HealPartition,
    /// Disable a specific radio link.
    DisableLink { from: NodeId, to: NodeId },
    /// Enable a specific radio link.
    EnableLink { from: NodeId, to: NodeId },
    /// Set the loss rate on a link.
    SetLossRate { from: NodeId, to: NodeId, rate: f64 },
    /// Take a cluster snapshot for metrics.
    TakeSnapshot,
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// Fire the periodic timer of a node.
    TimerFire { node: NodeId },
    /// A node's advertiser transmits its current beacon.
    AdvBroadcast { node: NodeId },
    /// Deliver an advertisement report to a scanning node.
    AdvDeliver {
        to: NodeId,
        from: NodeId,
        data: Vec<u8>,
        rssi: i16,
    },
    /// Deliver a mesh packet on an established connection.
    MeshDeliver {
        to: NodeId,
        handle: LinkHandle,
        data: Vec<u8>,
    },
    /// A GAP connection finished establishing on one side.
    LinkUp {
        node: NodeId,
        handle: LinkHandle,
        kind: LinkUpKind,
    },
    /// A connection dropped on one side.
    LinkDown {
        node: NodeId,
        handle: LinkHandle,
        reason: DisconnectReason,
    },
    /// Execute a scenario action.
    ScenarioAction(ScenarioAction),
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: Timestamp,
    pub seq: SequenceNumber,
    pub event: SimEvent,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: SimEvent) -> Self {
        Self { time, seq, event }
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (BinaryHeap is max-heap).
        match other.time.as_millis().cmp(&self.time.as_millis()) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ordering() {
        let e1 = ScheduledEvent::new(
            Timestamp::from_secs(10),
            SequenceNumber::new(1),
            SimEvent::TimerFire { node: 1 },
        );
        let e2 = ScheduledEvent::new(
            Timestamp::from_secs(5),
            SequenceNumber::new(2),
            SimEvent::TimerFire { node: 1 },
        );

        // e2 has the earlier time, so it is "greater" in min-heap terms.
        assert!(e2 > e1);
    }

    #[test]
    fn test_same_time_sequence_ordering() {
        let e1 = ScheduledEvent::new(
            Timestamp::from_secs(10),
            SequenceNumber::new(1),
            SimEvent::TimerFire { node: 1 },
        );
        let e2 = ScheduledEvent::new(
            Timestamp::from_secs(10),
            SequenceNumber::new(2),
            SimEvent::TimerFire { node: 2 },
        );

        // Same time: the lower sequence number is processed first.
        assert!(e1 > e2);
    }
}
