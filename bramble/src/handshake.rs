//! Three-packet cluster-merge handshake.
//!
//! After link-up both sides exchange HELLO. The winner is picked
//! deterministically: the larger pre-merge cluster, ties broken by the
//! bigger cluster id. The loser answers with ACK1 (its identity and sink
//! distance), the winner commits and replies with ACK2 (the unified
//! cluster id and absolute size), and the loser adopts that wholesale.
//!
//! A loser that still holds other mesh links dissolves them first: it
//! cannot bring a subtree into the merge, only itself.

use alloc::vec::Vec;

use crate::debug::DebugEvent;
use crate::links::{HandshakePhase, LinkDirection, LinkState};
use crate::time::Timestamp;
use crate::traits::{Radio, Random};
use crate::types::{DisconnectReason, Event, LinkHandle, NodeId, NODE_ID_INVALID};
use crate::wire::{ClusterAck1, ClusterAck2, ClusterHello, MeshPacket, MeshPayload};
use crate::Node;

impl<R, Rn> Node<R, Rn>
where
    R: Radio,
    Rn: Random,
{
    /// Send our HELLO on a link.
    pub(crate) fn send_hello(&mut self, handle: LinkHandle) {
        let hello = ClusterHello {
            cluster_id: self.cluster_id,
            cluster_size: self.cluster_size,
            hops_to_sink: self.hops_to_sink(),
        };
        let packet = MeshPacket::new(
            self.node_id,
            NODE_ID_INVALID,
            MeshPayload::Hello(hello),
            false,
        );
        log::debug!(
            target: "handshake",
            "OUT => HELLO on {} cluster {:#x} size {}",
            handle,
            hello.cluster_id,
            hello.cluster_size
        );
        self.send_packet(handle, &packet);
    }

    /// Peer HELLO received: record it, answer on inbound links, and pick
    /// winner and loser.
    pub(crate) fn handle_hello(
        &mut self,
        handle: LinkHandle,
        sender: NodeId,
        hello: ClusterHello,
        now: Timestamp,
    ) {
        let Some(link) = self.links.by_handle_mut(handle) else {
            return;
        };
        if link.state != LinkState::Handshaking || link.phase != HandshakePhase::AwaitHello {
            log::debug!(target: "handshake", "unexpected HELLO on link {}", handle);
            return;
        }

        // Both ends already committed to one cluster; this link is a
        // duplicate that would form a cycle.
        if hello.cluster_id == self.cluster_id {
            log::debug!(target: "handshake", "HELLO from own cluster, dropping link {}", handle);
            self.disconnect_mesh_link(handle, DisconnectReason::SameCluster, now);
            return;
        }

        link.partner_id = sender;
        link.peer_hello = Some(hello);
        let inbound = link.direction == LinkDirection::Inbound;

        if inbound {
            self.send_hello(handle);
        }

        let we_win = (self.cluster_size, self.cluster_id) > (hello.cluster_size, hello.cluster_id);

        if we_win {
            if let Some(link) = self.links.by_handle_mut(handle) {
                link.phase = HandshakePhase::AwaitAck1;
            }
            return;
        }

        // We lost. A loser joins alone: dissolve any other membership
        // before committing to the winner.
        self.dissolve_before_join(handle, now);

        let ack1 = ClusterAck1 {
            hops_to_sink: self.hops_to_sink(),
        };
        if let Some(link) = self.links.by_handle_mut(handle) {
            link.phase = HandshakePhase::AwaitAck2;
        }
        let packet = MeshPacket::new(self.node_id, sender, MeshPayload::Ack1(ack1), false);
        log::debug!(target: "handshake", "OUT => ACK1 on {} (we lost)", handle);
        self.send_packet(handle, &packet);
    }

    /// Drop every mesh link except `keep`, reverting to an isolated node
    /// with a fresh cluster id.
    fn dissolve_before_join(&mut self, keep: LinkHandle, _now: Timestamp) {
        let others: Vec<LinkHandle> = self
            .links
            .iter()
            .filter(|l| l.handle != keep)
            .map(|l| l.handle)
            .collect();
        if others.is_empty() {
            return;
        }

        log::debug!(
            target: "handshake",
            "dissolving {} links before joining a bigger cluster",
            others.len()
        );
        for handle in others {
            if let Some(link) = self.links.remove(handle) {
                self.radio
                    .disconnect(handle, DisconnectReason::IAmSmaller);
                self.connection_loss_counter = self.connection_loss_counter.wrapping_add(1);
                self.emit_debug(DebugEvent::LinkTeardown {
                    partner: link.partner_id,
                    reason: DisconnectReason::IAmSmaller,
                    was_handshaked: link.handshake_done(),
                });
                self.push_event(Event::MeshDisconnected {
                    partner: link.partner_id,
                    reason: DisconnectReason::IAmSmaller,
                });
            }
        }

        self.cluster_size = 1;
        self.cluster_id = self.generate_cluster_id();
        self.update_join_me();
    }

    /// Loser's ACK1 received: commit the merge as winner and publish the
    /// final cluster state in ACK2.
    pub(crate) fn handle_ack1(
        &mut self,
        handle: LinkHandle,
        sender: NodeId,
        ack1: ClusterAck1,
        now: Timestamp,
    ) {
        let Some(link) = self.links.by_handle_mut(handle) else {
            return;
        };
        if link.state != LinkState::Handshaking || link.phase != HandshakePhase::AwaitAck1 {
            log::debug!(target: "handshake", "unexpected ACK1 on link {}", handle);
            return;
        }

        link.partner_id = sender;
        link.hops_to_sink = if ack1.hops_to_sink < 0 {
            -1
        } else {
            ack1.hops_to_sink + 1
        };
        link.connected_cluster_id = self.cluster_id;
        link.connected_cluster_size = 1;
        // The winner side keeps the token for the new link, so cluster
        // ownership stays on this side of the merge.
        link.master_bit = true;
        link.state = LinkState::HandshakeDone;
        link.handshaked_at = Some(now);

        self.cluster_size += 1;
        log::debug!(
            target: "handshake",
            "handshake done as winner with {}, cluster size {}",
            sender,
            self.cluster_size
        );

        let ack2 = ClusterAck2 {
            cluster_id: self.cluster_id,
            cluster_size: self.cluster_size,
            hops_to_sink: self.hops_to_sink_excluding(Some(handle)),
        };
        let packet = MeshPacket::new(self.node_id, sender, MeshPayload::Ack2(ack2), false);
        self.send_packet(handle, &packet);

        // The loser's arrival, then a hops refresh; both coalesce into the
        // per-link pending slot.
        self.send_cluster_info_update(Some(handle), 1);
        self.send_cluster_info_update(Some(handle), 0);

        self.handshake_done_common(sender, true, now);
    }

    /// Winner's ACK2 received: adopt the unified cluster wholesale.
    pub(crate) fn handle_ack2(&mut self, handle: LinkHandle, ack2: ClusterAck2, now: Timestamp) {
        let Some(link) = self.links.by_handle_mut(handle) else {
            return;
        };
        if link.state != LinkState::Handshaking || link.phase != HandshakePhase::AwaitAck2 {
            log::debug!(target: "handshake", "unexpected ACK2 on link {}", handle);
            return;
        }

        // The unified cluster contains at least the winner and us.
        if ack2.cluster_size < 2 {
            self.stats.invariant_violations += 1;
            log::error!(target: "handshake", "ACK2 with impossible size {}", ack2.cluster_size);
            self.disconnect_mesh_link(handle, DisconnectReason::Unknown, now);
            return;
        }

        link.connected_cluster_id = ack2.cluster_id;
        link.connected_cluster_size = ack2.cluster_size - 1;
        link.hops_to_sink = if ack2.hops_to_sink < 0 {
            -1
        } else {
            ack2.hops_to_sink + 1
        };
        // Updates queued before the merge are superseded by the absolute
        // state adopted here.
        link.pending_update.clear();
        link.state = LinkState::HandshakeDone;
        link.handshaked_at = Some(now);
        let partner = link.partner_id;

        self.cluster_id = ack2.cluster_id;
        self.cluster_size = ack2.cluster_size;
        log::debug!(
            target: "handshake",
            "handshake done as loser, adopted cluster {:#x} size {}",
            self.cluster_id,
            self.cluster_size
        );

        // The winner broadcasts the size delta; we only refresh hops.
        self.send_cluster_info_update(Some(handle), 0);

        self.handshake_done_common(partner, false, now);
    }

    /// Shared tail of both commit paths.
    fn handshake_done_common(&mut self, partner: NodeId, as_winner: bool, now: Timestamp) {
        self.stats.handshakes_done += 1;
        self.candidates.remove_sender(partner);

        self.emit_debug(DebugEvent::HandshakeDone {
            partner,
            as_winner,
            cluster_id: self.cluster_id,
            cluster_size: self.cluster_size,
        });
        self.push_event(Event::MeshConnected { partner, as_winner });
        self.push_event(Event::ClusterChanged {
            cluster_id: self.cluster_id,
            cluster_size: self.cluster_size,
        });

        self.keep_high_discovery_active(now);
        self.update_join_me();
        self.hand_over_master_bit_if_necessary();
        self.notify_cluster_change();
    }
}
