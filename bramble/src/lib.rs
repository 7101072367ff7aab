//! bramble - self-organizing cluster mesh formation for BLE-class radios
//!
//! Nodes in radio range autonomously discover each other, negotiate which
//! pairs should connect, form tree-shaped clusters that merge into a single
//! mesh, and maintain cluster-wide membership under churn.
//!
//! # Key Properties
//!
//! - Isolated broadcasters converge to one cluster via a scored
//!   master/slave decision and a three-packet merge handshake
//! - Size and sink-distance updates propagate as per-link coalescing
//!   deltas guarded by a sequence counter
//! - A single master-bit token per cluster arbitrates merges and is handed
//!   toward the heaviest subtree, preventing merge cycles
//! - Link loss splits the cluster along the master-bit rule; the losing
//!   side dissolves and rejoins with a fresh identity
//! - An emergency-disconnect protocol breaks the livelock when a better
//!   cluster is visible but no link slot is free
//!
//! The core is single-threaded and event-driven: feed it timer ticks,
//! advertisement reports, link lifecycle callbacks and mesh messages, and
//! drain its event queue. Platform access goes through the [`Radio`] and
//! [`Random`] traits, so the same state machine runs on hardware and in a
//! deterministic simulator.
//!
//! # Module Structure
//!
//! - [`types`] - Core types (ids, packets, events, counters)
//! - [`time`] - Explicit millisecond timestamps
//! - [`wire`] - Bit-exact JOIN_ME and mesh packet codecs
//! - [`config`] - Runtime tunables
//! - [`keys`] - Identity and key-id multiplexer
//! - [`traits`] - Radio and RNG abstraction
//! - [`links`] - Mesh link arena and pending-update slots
//! - [`candidates`] - Bounded JOIN_ME observation buffer
//! - [`scoring`] - As-master / as-slave cluster scoring
//! - [`node`] - The root state machine and event entry points
//! - [`discovery`] - Beacon and HIGH/LOW/OFF duty cycling
//! - [`decision`] - Periodic connect/wait decision
//! - [`handshake`] - Three-packet merge arbitration
//! - [`cluster`] - Update propagation, master bit, split healing
//! - [`emergency`] - Cross-cluster slot freeing
//! - [`modules`] - Module table and NODE control messages

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod candidates;
pub mod cluster;
pub mod config;
pub mod debug;
pub mod decision;
pub mod discovery;
pub mod emergency;
pub mod handshake;
pub mod keys;
pub mod links;
pub mod modules;
pub mod node;
pub mod scoring;
pub mod time;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export the main surface at the crate root
pub use config::{NodeConfig, PreferredMode};
pub use debug::{DebugEmitter, DebugEvent};
pub use keys::{KeyId, KeyStore};
pub use links::{LinkDirection, LinkState, MeshLink};
pub use modules::{CapabilityEntry, MeshModule, ModuleId, ModuleOutbox, NodeAction};
pub use node::{LinkUpKind, Node};
pub use time::{Duration, Timestamp};
pub use traits::{AdvJob, AdvJobKind, Radio, RadioError, Random, ScanConfig, ScanMode};
pub use types::{
    ClusterId, ClusterSize, DecisionResult, DeviceType, DisconnectReason, DiscoveryState, Error,
    Event, JoinMePayload, LinkHandle, NetworkId, NodeAddr, NodeId, NodeStats, RebootReason,
};

// Re-export constants
pub use types::{
    CANDIDATE_SLOTS, MAX_MESH_LINKS, NODE_ID_BROADCAST, NODE_ID_HOPS_BASE, NODE_ID_INVALID,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::test_impls::{MockRadio, MockRandom};

    #[test]
    fn test_node_creation() {
        let node = Node::new(
            MockRadio::new(),
            MockRandom::new(),
            NodeConfig::default(),
            KeyStore::unset(),
            42,
        );

        // A fresh node is an isolated cluster of one
        assert_eq!(node.node_id(), 42);
        assert_eq!(node.cluster_size(), 1);
        assert_eq!(node.link_count(), 0);
    }

    #[test]
    fn test_unenrolled_node_stays_quiet() {
        let mut config = NodeConfig::default();
        config.network_id = 0;
        let mut node = Node::new(
            MockRadio::new(),
            MockRandom::new(),
            config,
            KeyStore::unset(),
            42,
        );

        node.start(Timestamp::ZERO);
        assert!(node.radio_mut().take_commands().is_empty());
        assert_eq!(node.discovery_state(), DiscoveryState::Off);
    }

    #[test]
    fn test_join_me_round_trip_through_node() {
        let mut node = Node::new(
            MockRadio::new(),
            MockRandom::new(),
            NodeConfig::default(),
            KeyStore::unset(),
            42,
        );
        node.start(Timestamp::ZERO);

        let payload = node.build_join_me_payload();
        let encoded = wire::encode_join_me(node.config().network_id, &payload);
        let (network_id, decoded) = wire::decode_join_me(&encoded).unwrap();

        assert_eq!(network_id, node.config().network_id);
        assert_eq!(decoded, payload);
        assert_eq!(decoded.sender, 42);
        assert_eq!(decoded.cluster_size, 1);
    }
}
