//! Debug events for protocol tracing.
//!
//! A simulator or test harness installs a [`DebugEmitter`] on the node and
//! receives fine-grained protocol trace events. Production builds simply
//! leave the emitter unset.

use crate::time::Timestamp;
use crate::types::{
    ClusterId, ClusterSize, DecisionResult, DisconnectReason, DiscoveryState, EmergencyCode,
    LinkHandle, NodeId,
};

/// Trait for receiving debug events from a node.
pub trait DebugEmitter: Send {
    /// Called when a debug event is emitted.
    fn emit(&mut self, event: DebugEvent);
}

/// Debug events emitted by the node for protocol tracing.
#[derive(Debug, Clone)]
pub enum DebugEvent {
    /// A JOIN_ME record was stored in the candidate buffer.
    JoinMeStored {
        sender: NodeId,
        cluster_id: ClusterId,
        cluster_size: ClusterSize,
        rssi: i16,
    },
    /// The beacon payload was rebuilt.
    JoinMeUpdated {
        cluster_id: ClusterId,
        cluster_size: ClusterSize,
        free_in: u8,
        free_out: u8,
        ack_field: ClusterId,
    },
    /// A decision cycle finished.
    Decision {
        timestamp: Timestamp,
        result: DecisionResult,
        partner: NodeId,
    },
    /// The discovery state machine switched.
    DiscoveryChanged { state: DiscoveryState },
    /// A merge handshake started on a link.
    HandshakeStarted { handle: LinkHandle, partner: NodeId },
    /// A merge handshake committed.
    HandshakeDone {
        partner: NodeId,
        as_winner: bool,
        cluster_id: ClusterId,
        cluster_size: ClusterSize,
    },
    /// An inbound cluster update was applied.
    ClusterUpdateApplied {
        from: NodeId,
        size_change: ClusterSize,
        hops_to_sink: i16,
        handover: bool,
        counter: u8,
    },
    /// An inbound cluster update was dropped because its counter did not
    /// match the expected value.
    ClusterUpdateMismatch {
        from: NodeId,
        got: u8,
        expected: u8,
    },
    /// The master bit was queued for handover on a link.
    MasterBitHandover { to: NodeId },
    /// A link was torn down.
    LinkTeardown {
        partner: NodeId,
        reason: DisconnectReason,
        was_handshaked: bool,
    },
    /// The emergency-disconnect timer fired and a probe was opened.
    EmergencyProbe { target_cluster: ClusterId },
    /// An emergency-disconnect request was answered.
    EmergencyAnswered { code: EmergencyCode },
    /// An undecodable mesh message was dropped.
    MessageDecodeFailed { data_len: usize },
}
