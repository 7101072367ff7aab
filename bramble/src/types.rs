//! Core types and constants for the bramble protocol.

use core::fmt;

use crate::time::Duration;
use crate::wire::DecodeError;

/// 16-bit node identifier, unique within a network.
///
/// `0` is reserved invalid; the range starting at [`NODE_ID_HOPS_BASE`] is
/// reserved for hop-limited broadcast addresses; [`NODE_ID_BROADCAST`] floods
/// the whole mesh.
pub type NodeId = u16;

/// 16-bit network identifier. JOIN_ME records from other networks are dropped.
pub type NetworkId = u16;

/// 32-bit cluster identifier, unique per (node, incarnation).
///
/// Derived as `node_id | ((connection_loss_counter + boot_nonce) << 16)` so
/// that stale peers cannot accidentally merge with a rejoined subtree.
pub type ClusterId = u32;

/// Signed cluster size. The local node counts itself; size 1 means isolated.
pub type ClusterSize = i16;

/// 6-byte radio address of a peer.
pub type NodeAddr = [u8; 6];

/// Opaque per-link handle assigned by the radio layer.
pub type LinkHandle = u16;

/// Reserved invalid node id.
pub const NODE_ID_INVALID: NodeId = 0;
/// Mesh-wide broadcast address.
pub const NODE_ID_BROADCAST: NodeId = 0xFFFF;
/// Start of the hop-limited broadcast range: `NODE_ID_HOPS_BASE + n` floods
/// at most `n` hops outward.
pub const NODE_ID_HOPS_BASE: NodeId = 30000;
/// Exclusive end of the hop-limited broadcast range.
pub const NODE_ID_HOPS_END: NodeId = 31000;

/// Slots in the JOIN_ME candidate buffer.
pub const CANDIDATE_SLOTS: usize = 10;
/// Capacity of the mesh link arena. Runtime limits come from `NodeConfig`.
pub const MAX_MESH_LINKS: usize = 8;
/// Connection attempts to one candidate before it is temporarily blacklisted.
pub const ATTEMPTS_BEFORE_BLACKLIST: u8 = 5;
/// Saturation cap for the per-candidate attempt counter.
pub const MAX_CONNECT_ATTEMPTS: u8 = 20;
/// Backoff unit for blacklisted candidates: `last_attempt + attempts * 1s`.
pub const BLACKLIST_BACKOFF_UNIT: Duration = Duration::from_secs(1);
/// Registered modules at most.
pub const MAX_MODULES: usize = 8;
/// Preferred partner list capacity.
pub const MAX_PREFERRED_PARTNERS: usize = 8;
/// Fill byte for generated load chunks.
pub const GENERATE_LOAD_MAGIC: u8 = 0x91;

// JOIN_ME advertisement framing.
pub(crate) const ADV_COMPANY_ID: u16 = 0x024D;
pub(crate) const ADV_MESH_IDENTIFIER: u8 = 0xF0;
pub(crate) const ADV_TYPE_FLAGS: u8 = 0x01;
pub(crate) const ADV_TYPE_MANUFACTURER: u8 = 0xFF;
pub(crate) const ADV_FLAGS_VALUE: u8 = 0x06;
/// Service message type tag for the JOIN_ME v0 record.
pub(crate) const SERVICE_MSG_JOIN_ME_V0: u8 = 0x01;

/// Message type tags carried in the mesh packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// First handshake packet, exchanged by both sides after link-up.
    ClusterHello = 20,
    /// Second handshake packet, sent by the merge loser.
    ClusterAck1 = 21,
    /// Third handshake packet, sent by the merge winner.
    ClusterAck2 = 22,
    /// Size-delta / hops / master-bit propagation over an established link.
    ClusterInfoUpdate = 23,
    /// Module action request.
    ModuleTriggerAction = 51,
    /// Module action response.
    ModuleActionResponse = 52,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Result<Self, DecodeError> {
        match v {
            20 => Ok(MessageType::ClusterHello),
            21 => Ok(MessageType::ClusterAck1),
            22 => Ok(MessageType::ClusterAck2),
            23 => Ok(MessageType::ClusterInfoUpdate),
            51 => Ok(MessageType::ModuleTriggerAction),
            52 => Ok(MessageType::ModuleActionResponse),
            _ => Err(DecodeError::UnknownMessageType(v)),
        }
    }
}

/// Role of a device in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DeviceType {
    Invalid = 0,
    /// Mains-powered, fully meshing node.
    #[default]
    Static = 1,
    /// Mobile node that meshes normally.
    Roaming = 2,
    /// Data egress point; reports `hops_to_sink = 0`.
    Sink = 3,
    /// Tracked-only device; neither advertises JOIN_ME nor scans.
    Asset = 4,
    /// Edge device limited to a single inbound link and no outbound links.
    Leaf = 5,
}

impl DeviceType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => DeviceType::Static,
            2 => DeviceType::Roaming,
            3 => DeviceType::Sink,
            4 => DeviceType::Asset,
            5 => DeviceType::Leaf,
            _ => DeviceType::Invalid,
        }
    }
}

/// Application-level reason attached to a link teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    Unknown = 0,
    /// Handshake did not complete within the timeout.
    HandshakeTimeout = 1,
    /// Handshake loser dissolving its old cluster before joining the winner.
    IAmSmaller = 2,
    /// Peer on the lost link held the master bit; this side must dissolve.
    PartnerHasMasterBit = 3,
    /// Tearing down to free the single inbound slot for a bigger cluster.
    ShouldWaitAsSlave = 4,
    /// Both sides committed to the same cluster already.
    SameCluster = 5,
    /// Victim of the emergency-disconnect protocol.
    EmergencyDisconnect = 6,
    /// Out-of-band emergency validation connection closed.
    EmergencyReset = 7,
    /// Node is about to reboot.
    Reboot = 8,
    /// Requested by the operator.
    UserRequest = 9,
    /// Radio-layer loss (supervision timeout, out of range).
    LinkLoss = 10,
}

/// Outcome of one decision-engine cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionResult {
    /// Issued a connect-as-master to the given partner.
    ConnectAsMaster,
    /// Advertising our intent to join the given cluster as slave.
    ConnectAsSlave,
    /// No scoring candidate found.
    NoNodesFound,
}

/// Discovery duty-cycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// Advertising and scanning suppressed entirely.
    Off,
    /// Long advertising interval, passive scanning.
    Low,
    /// Short advertising interval, active scanning.
    High,
}

/// Reason recorded for a scheduled reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootReason {
    RemoteReset,
    PreferredConnections,
    FatalRadioError,
}

/// Response codes for the emergency-disconnect action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EmergencyCode {
    /// A victim link was disconnected; a slot is now free.
    Success = 0,
    /// There already was a free outbound slot.
    NotAllConnectionsUsedUp = 1,
    /// No outbound link qualified for removal.
    CantDisconnectAnybody = 2,
}

impl EmergencyCode {
    pub fn from_u8(v: u8) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(EmergencyCode::Success),
            1 => Ok(EmergencyCode::NotAllConnectionsUsedUp),
            2 => Ok(EmergencyCode::CantDisconnectAnybody),
            _ => Err(DecodeError::InvalidField),
        }
    }
}

/// Decoded JOIN_ME v0 advertisement payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinMePayload {
    pub sender: NodeId,
    pub cluster_id: ClusterId,
    pub cluster_size: ClusterSize,
    pub free_in: u8,
    pub free_out: u8,
    pub battery_runtime: u8,
    pub tx_power: i8,
    pub device_type: DeviceType,
    pub hops_to_sink: i16,
    pub mesh_write_handle: u16,
    /// Cluster we want to be slave of, or 0. Nonzero only on platforms
    /// limited to a single inbound mesh link.
    pub ack_field: ClusterId,
}

/// Payload of a CLUSTER_INFO_UPDATE packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClusterInfoUpdate {
    pub size_change: ClusterSize,
    pub hops_to_sink: i16,
    pub master_bit_handover: bool,
    pub counter: u8,
}

/// Header common to all mesh packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub message_type: MessageType,
    pub sender: NodeId,
    pub receiver: NodeId,
}

/// Events emitted by the node for the embedding application.
///
/// Drain with [`crate::Node::poll_event`] after each handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Cluster membership changed (merge, update or split).
    ClusterChanged {
        cluster_id: ClusterId,
        cluster_size: ClusterSize,
    },
    /// A mesh link finished its handshake.
    MeshConnected { partner: NodeId, as_winner: bool },
    /// A mesh link was torn down.
    MeshDisconnected {
        partner: NodeId,
        reason: DisconnectReason,
    },
    /// Outcome of a decision cycle.
    Decision {
        result: DecisionResult,
        partner: NodeId,
    },
    /// Discovery duty cycle switched state.
    DiscoveryChanged { state: DiscoveryState },
    /// A deferred reboot is due; the platform must reset the device.
    RebootRequired { reason: RebootReason },
}

/// Error type for node operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("message exceeds transport MTU")]
    MessageTooLarge,
    #[error("no free mesh link slot")]
    NoFreeSlot,
    #[error("unknown link handle")]
    UnknownLink,
    #[error("module table full")]
    TooManyModules,
    #[error("malformed message: {0}")]
    Malformed(#[from] DecodeError),
    #[error("radio layer rejected the request")]
    Radio,
}

/// Monotonic diagnostic counters.
///
/// The logging side channel for protocol anomalies: counters never affect
/// control flow and are cheap enough to keep on constrained targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeStats {
    pub join_me_received: u32,
    pub connect_attempts: u32,
    pub handshakes_done: u32,
    pub cluster_updates_received: u32,
    /// Inbound cluster updates dropped due to a counter gap or duplicate.
    pub cluster_update_mismatch: u32,
    pub malformed_messages: u32,
    /// Events ignored because applying them would break a core invariant.
    pub invariant_violations: u32,
    pub temp_blacklisted: u32,
    pub emergency_triggers: u32,
    pub emergency_disconnects: u32,
}

impl fmt::Display for NodeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "join_me:{} connects:{} handshakes:{} updates:{} mismatches:{} malformed:{}",
            self.join_me_received,
            self.connect_attempts,
            self.handshakes_done,
            self.cluster_updates_received,
            self.cluster_update_mismatch,
            self.malformed_messages
        )
    }
}
