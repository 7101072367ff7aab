//! Runtime configuration for a mesh node.

use alloc::vec::Vec;

use crate::time::Duration;
use crate::types::{DeviceType, NetworkId, NodeId, MAX_PREFERRED_PARTNERS};

/// How candidates outside the preferred-partner list are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredMode {
    /// Divide the score by 10 (floored at 1) for non-preferred partners.
    Penalty,
    /// Refuse non-preferred partners entirely.
    Ignored,
}

/// Tunables of the mesh formation core.
///
/// The defaults describe a mains-powered node on a BLE-class radio. Leaf
/// devices and sinks only differ in `device_type` and the link limits.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Network this node is enrolled in; 0 disables meshing entirely.
    pub network_id: NetworkId,
    pub device_type: DeviceType,

    /// Inbound mesh link slots. Platforms with 1 use the ack-field protocol.
    pub max_in_links: u8,
    /// Outbound mesh link slots.
    pub max_out_links: u8,

    /// Advertising interval in HIGH discovery.
    pub adv_interval_high: Duration,
    /// Advertising interval in LOW discovery.
    pub adv_interval_low: Duration,
    /// Time spent in HIGH before falling back to LOW. ZERO keeps HIGH forever.
    pub high_to_low_timeout: Duration,

    /// Cadence of the decision engine.
    pub decision_interval: Duration,
    /// Handshake must complete within this window after link-up.
    pub handshake_timeout: Duration,
    /// Candidate entries older than this score 0.
    pub join_me_max_age: Duration,
    /// Candidates below this RSSI are never connected to.
    pub stable_rssi_threshold: i16,

    /// Connection interval requested for ordinary partners.
    pub conn_interval: Duration,
    /// Slower connection interval used when connecting to a leaf.
    pub leaf_conn_interval: Duration,

    /// How long a strictly better cluster must be observed before the
    /// emergency-disconnect protocol probes it.
    pub emergency_trigger: Duration,
    /// Delay after a disconnect before broadcasting SET_DISCOVERY(HIGH).
    pub reconnect_broadcast_delay: Duration,

    /// Reboot delay granted to peers so they observe the disconnect first.
    pub reboot_grace: Duration,

    pub preferred_partners: Vec<NodeId>,
    pub preferred_mode: PreferredMode,

    /// Battery runtime estimate advertised in JOIN_ME.
    pub battery_runtime: u8,
    /// Transmit power advertised in JOIN_ME, in dBm.
    pub tx_power: i8,
    /// GATT write handle advertised for mesh data.
    pub mesh_write_handle: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network_id: 1,
            device_type: DeviceType::Static,
            max_in_links: 2,
            max_out_links: 2,
            adv_interval_high: Duration::from_millis(100),
            adv_interval_low: Duration::from_millis(1000),
            high_to_low_timeout: Duration::from_secs(60),
            decision_interval: Duration::from_millis(800),
            handshake_timeout: Duration::from_secs(3),
            join_me_max_age: Duration::from_secs(10),
            stable_rssi_threshold: -85,
            conn_interval: Duration::from_millis(10),
            leaf_conn_interval: Duration::from_millis(90),
            emergency_trigger: Duration::from_secs(10),
            reconnect_broadcast_delay: Duration::from_secs(30),
            reboot_grace: Duration::from_millis(500),
            preferred_partners: Vec::new(),
            preferred_mode: PreferredMode::Penalty,
            battery_runtime: 0,
            tx_power: -4,
            mesh_write_handle: 0x0012,
        }
    }
}

impl NodeConfig {
    /// Whether the node is enrolled in a network.
    pub fn enrolled(&self) -> bool {
        self.network_id != 0
    }

    /// Whether `partner` passes the preferred-partner filter.
    ///
    /// An empty list treats every partner as preferred.
    pub fn is_preferred(&self, partner: NodeId) -> bool {
        self.preferred_partners.is_empty() || self.preferred_partners.contains(&partner)
    }

    /// Replace the preferred-partner configuration. Lists longer than
    /// [`MAX_PREFERRED_PARTNERS`] are rejected.
    pub fn set_preferred(&mut self, mode: PreferredMode, partners: &[NodeId]) -> bool {
        if partners.len() > MAX_PREFERRED_PARTNERS {
            return false;
        }
        self.preferred_mode = mode;
        self.preferred_partners.clear();
        self.preferred_partners.extend_from_slice(partners);
        true
    }
}
