//! Mesh link state and the link arena.
//!
//! Per-link state lives in a flat arena indexed by compact slots; the node
//! holds the arena and dispatches every callback itself, so links never
//! point back at the node.

use crate::time::Timestamp;
use crate::types::{
    ClusterId, ClusterSize, LinkHandle, NodeAddr, NodeId, MAX_MESH_LINKS, NODE_ID_INVALID,
};
use crate::wire::ClusterHello;

/// Lifecycle of a mesh link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkState {
    /// GAP connection requested, not yet established.
    Connecting,
    /// Established, merge handshake in progress.
    Handshaking,
    /// Merge committed; the link carries cluster updates and module traffic.
    HandshakeDone,
    /// Teardown requested.
    Disconnecting,
}

/// Who initiated the GAP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    /// We connected as master.
    Outbound,
    /// The peer connected to us.
    Inbound,
}

/// Progress of the three-packet merge handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Waiting for the peer's HELLO.
    AwaitHello,
    /// We won; waiting for the loser's ACK1.
    AwaitAck1,
    /// We lost; waiting for the winner's ACK2.
    AwaitAck2,
}

/// Single-slot coalescing buffer for outbound cluster-info updates.
///
/// Logical events merge instead of queueing: size changes add up, the
/// handover flag is a sticky OR, and hops are recomputed at flush time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingClusterUpdate {
    pub size_change: ClusterSize,
    pub master_bit_handover: bool,
    /// Set when the slot holds anything worth flushing, including a pure
    /// hops refresh with no size delta.
    pub dirty: bool,
}

impl PendingClusterUpdate {
    /// Merge a size delta into the slot.
    pub fn add(&mut self, size_change: ClusterSize) {
        self.size_change += size_change;
        self.dirty = true;
    }

    /// Mark the handover token for the next flush.
    pub fn set_handover(&mut self) {
        self.master_bit_handover = true;
        self.dirty = true;
    }

    /// Reset after a flush.
    pub fn clear(&mut self) {
        *self = PendingClusterUpdate::default();
    }
}

/// A duplex mesh association with a peer.
#[derive(Debug, Clone)]
pub struct MeshLink {
    /// Radio-layer handle, used for send and disconnect.
    pub handle: LinkHandle,
    /// Peer's node id; `NODE_ID_INVALID` until learned from the handshake.
    pub partner_id: NodeId,
    pub partner_addr: NodeAddr,
    pub direction: LinkDirection,
    pub state: LinkState,
    pub phase: HandshakePhase,
    /// Peer's HELLO, kept until the winner/loser decision.
    pub peer_hello: Option<ClusterHello>,

    /// The peer side's cluster id at handshake time.
    pub connected_cluster_id: ClusterId,
    /// Nodes behind this link.
    pub connected_cluster_size: ClusterSize,
    /// Hops toward the nearest sink via this link, or -1 if none.
    pub hops_to_sink: i16,
    /// Master-bit token; see the governor in `cluster`.
    pub master_bit: bool,

    /// Counter expected on the next inbound cluster update.
    pub next_expected_counter: u8,
    /// Counter stamped on the next outbound cluster update.
    pub next_outbound_counter: u8,
    pub pending_update: PendingClusterUpdate,

    pub created_at: Timestamp,
    pub handshaked_at: Option<Timestamp>,
}

impl MeshLink {
    pub fn new(
        handle: LinkHandle,
        direction: LinkDirection,
        partner_id: NodeId,
        partner_addr: NodeAddr,
        now: Timestamp,
    ) -> Self {
        Self {
            handle,
            partner_id,
            partner_addr,
            direction,
            state: LinkState::Handshaking,
            phase: HandshakePhase::AwaitHello,
            peer_hello: None,
            connected_cluster_id: 0,
            connected_cluster_size: 0,
            hops_to_sink: -1,
            master_bit: false,
            next_expected_counter: 0,
            next_outbound_counter: 0,
            pending_update: PendingClusterUpdate::default(),
            created_at: now,
            handshaked_at: None,
        }
    }

    /// Whether the merge handshake has completed on this link.
    pub fn handshake_done(&self) -> bool {
        self.state == LinkState::HandshakeDone
    }
}

/// Fixed-capacity arena of mesh links.
pub struct LinkArena {
    slots: [Option<MeshLink>; MAX_MESH_LINKS],
}

impl Default for LinkArena {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkArena {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Number of live links.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a link; fails when the arena is full.
    pub fn insert(&mut self, link: MeshLink) -> Option<&mut MeshLink> {
        let slot = self.slots.iter_mut().find(|s| s.is_none())?;
        *slot = Some(link);
        slot.as_mut()
    }

    pub fn by_handle(&self, handle: LinkHandle) -> Option<&MeshLink> {
        self.iter().find(|l| l.handle == handle)
    }

    pub fn by_handle_mut(&mut self, handle: LinkHandle) -> Option<&mut MeshLink> {
        self.iter_mut().find(|l| l.handle == handle)
    }

    /// Remove and return the link with the given handle.
    pub fn remove(&mut self, handle: LinkHandle) -> Option<MeshLink> {
        self.slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|l| l.handle == handle))
            .and_then(|s| s.take())
    }

    /// Remove and return every link, e.g. for a forced full disconnect.
    pub fn drain(&mut self) -> impl Iterator<Item = MeshLink> + '_ {
        self.slots.iter_mut().filter_map(|s| s.take())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeshLink> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MeshLink> {
        self.slots.iter_mut().filter_map(|s| s.as_mut())
    }

    /// Links that completed the merge handshake.
    pub fn handshaked(&self) -> impl Iterator<Item = &MeshLink> {
        self.iter().filter(|l| l.handshake_done())
    }

    pub fn handshaked_mut(&mut self) -> impl Iterator<Item = &mut MeshLink> {
        self.iter_mut().filter(|l| l.handshake_done())
    }

    /// Live links in the given direction, regardless of state. A link in
    /// `Connecting` or `Handshaking` still occupies its slot.
    pub fn count_direction(&self, direction: LinkDirection) -> usize {
        self.iter().filter(|l| l.direction == direction).count()
    }

    /// The link to a known partner, if any.
    pub fn to_partner(&self, partner: NodeId) -> Option<&MeshLink> {
        if partner == NODE_ID_INVALID {
            return None;
        }
        self.iter().find(|l| l.partner_id == partner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(handle: LinkHandle, direction: LinkDirection) -> MeshLink {
        MeshLink::new(handle, direction, 0, [0; 6], Timestamp::ZERO)
    }

    #[test]
    fn test_arena_insert_remove() {
        let mut arena = LinkArena::new();
        assert!(arena.is_empty());

        arena.insert(link(1, LinkDirection::Outbound)).unwrap();
        arena.insert(link(2, LinkDirection::Inbound)).unwrap();
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.count_direction(LinkDirection::Outbound), 1);

        let removed = arena.remove(1).unwrap();
        assert_eq!(removed.handle, 1);
        assert_eq!(arena.len(), 1);
        assert!(arena.by_handle(1).is_none());
        assert!(arena.by_handle(2).is_some());
    }

    #[test]
    fn test_arena_capacity() {
        let mut arena = LinkArena::new();
        for i in 0..MAX_MESH_LINKS {
            assert!(arena.insert(link(i as LinkHandle, LinkDirection::Inbound)).is_some());
        }
        assert!(arena.insert(link(99, LinkDirection::Inbound)).is_none());
    }

    #[test]
    fn test_pending_update_coalesces() {
        let mut pending = PendingClusterUpdate::default();
        assert!(!pending.dirty);

        pending.add(3);
        pending.add(-1);
        assert_eq!(pending.size_change, 2);
        assert!(pending.dirty);

        pending.set_handover();
        pending.add(-2);
        // Handover stays set regardless of later merges
        assert!(pending.master_bit_handover);
        assert_eq!(pending.size_change, 0);

        pending.clear();
        assert_eq!(pending, PendingClusterUpdate::default());
    }

    #[test]
    fn test_partner_lookup_ignores_invalid() {
        let mut arena = LinkArena::new();
        arena.insert(link(1, LinkDirection::Inbound)).unwrap();
        // partner_id defaults to NODE_ID_INVALID and must never match
        assert!(arena.to_partner(NODE_ID_INVALID).is_none());
    }
}
