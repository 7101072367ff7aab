//! Cluster-info propagation, master-bit governance and split healing.
//!
//! Each link carries a single-slot pending update; logical events coalesce
//! there and are flushed when the link can accept traffic. Inbound updates
//! are guarded by a per-link counter: a gap or duplicate leaves cluster
//! state untouched.
//!
//! The master bit is the cluster-wide merge token. Exactly one node holds
//! the bit on all of its links; when the subtree behind one link outgrows
//! the rest of the cluster, the token is handed over along that link.

use alloc::vec::Vec;

use crate::debug::DebugEvent;
use crate::links::{LinkState, MeshLink};
use crate::time::Timestamp;
use crate::traits::{Radio, Random};
use crate::types::{
    ClusterInfoUpdate, ClusterSize, DisconnectReason, Event, LinkHandle, NodeId, NODE_ID_INVALID,
};
use crate::wire::{MeshPacket, MeshPayload};
use crate::Node;

impl<R, Rn> Node<R, Rn>
where
    R: Radio,
    Rn: Random,
{
    /// Queue a cluster-info update on every handshaked link except
    /// `ignore`. Hops are recomputed per link at flush time; a zero delta
    /// still queues a hops refresh.
    pub(crate) fn send_cluster_info_update(
        &mut self,
        ignore: Option<LinkHandle>,
        size_change: ClusterSize,
    ) {
        for link in self.links.handshaked_mut() {
            if Some(link.handle) == ignore {
                continue;
            }
            if size_change != 0 {
                link.pending_update.add(size_change);
            } else {
                link.pending_update.dirty = true;
            }
        }

        self.hand_over_master_bit_if_necessary();
    }

    /// Flush dirty pending updates to their links, stamping the per-link
    /// counter.
    pub(crate) fn flush_cluster_updates(&mut self) {
        // Collect first: hops exclude the destination link and need the
        // arena immutably.
        let mut outgoing: Vec<(LinkHandle, NodeId, ClusterInfoUpdate)> = Vec::new();
        let dirty: Vec<LinkHandle> = self
            .links
            .handshaked()
            .filter(|l| l.pending_update.dirty)
            .map(|l| l.handle)
            .collect();

        for handle in dirty {
            let hops = self.hops_to_sink_excluding(Some(handle));
            let Some(link) = self.links.by_handle_mut(handle) else {
                continue;
            };
            let update = ClusterInfoUpdate {
                size_change: link.pending_update.size_change,
                hops_to_sink: hops,
                master_bit_handover: link.pending_update.master_bit_handover,
                counter: link.next_outbound_counter,
            };
            link.next_outbound_counter = link.next_outbound_counter.wrapping_add(1);
            link.pending_update.clear();
            outgoing.push((handle, link.partner_id, update));
        }

        for (handle, partner, update) in outgoing {
            log::trace!(
                target: "cluster",
                "OUT => {} CLUSTER_INFO_UPDATE change {} hops {} handover {} counter {}",
                partner,
                update.size_change,
                update.hops_to_sink,
                update.master_bit_handover,
                update.counter
            );
            let packet = MeshPacket::new(
                self.node_id,
                partner,
                MeshPayload::InfoUpdate(update),
                false,
            );
            self.send_packet(handle, &packet);
        }
    }

    /// Apply an inbound cluster-info update and forward it to the rest of
    /// the mesh.
    pub(crate) fn handle_cluster_info_update(
        &mut self,
        handle: LinkHandle,
        sender: NodeId,
        update: ClusterInfoUpdate,
        now: Timestamp,
    ) {
        let Some(link) = self.links.by_handle_mut(handle) else {
            return;
        };
        if link.state != LinkState::HandshakeDone {
            log::debug!(target: "cluster", "update on link {} before handshake done", handle);
            return;
        }

        // Counter discipline: a mismatch is a duplicate or a gap from a
        // reestablished connection. Drop without touching state.
        if update.counter != link.next_expected_counter {
            let expected = link.next_expected_counter;
            self.stats.cluster_update_mismatch += 1;
            log::error!(
                target: "cluster",
                "cluster update counter mismatch from {}: got {} expected {}",
                sender,
                update.counter,
                expected
            );
            self.emit_debug(DebugEvent::ClusterUpdateMismatch {
                from: sender,
                got: update.counter,
                expected,
            });
            return;
        }
        link.next_expected_counter = link.next_expected_counter.wrapping_add(1);
        self.stats.cluster_updates_received += 1;

        if update.size_change != 0 {
            let new_size = self.cluster_size + update.size_change;
            if new_size < 1 {
                self.stats.invariant_violations += 1;
                log::error!(
                    target: "cluster",
                    "update from {} would push cluster size to {}, ignoring",
                    sender,
                    new_size
                );
                return;
            }
            self.cluster_size = new_size;
            if let Some(link) = self.links.by_handle_mut(handle) {
                link.connected_cluster_size += update.size_change;
            }
        }

        if let Some(link) = self.links.by_handle_mut(handle) {
            link.hops_to_sink = if update.hops_to_sink >= 0 {
                update.hops_to_sink + 1
            } else {
                -1
            };
            if update.master_bit_handover {
                log::debug!(target: "cluster", "received master bit from {}", sender);
                link.master_bit = true;
            }
        }

        self.emit_debug(DebugEvent::ClusterUpdateApplied {
            from: sender,
            size_change: update.size_change,
            hops_to_sink: update.hops_to_sink,
            handover: update.master_bit_handover,
            counter: update.counter,
        });

        self.hand_over_master_bit_if_necessary();
        self.send_cluster_info_update(Some(handle), update.size_change);

        if update.size_change != 0 {
            self.push_event(Event::ClusterChanged {
                cluster_id: self.cluster_id,
                cluster_size: self.cluster_size,
            });
            self.notify_cluster_change();
        }

        self.keep_high_discovery_active(now);
        self.update_join_me();
    }

    /// Whether the subtree behind one link outweighs the rest, and if so,
    /// queue the token handover there.
    ///
    /// Only the current owner may hand over; at most one link can satisfy
    /// the strict-majority condition.
    pub(crate) fn hand_over_master_bit_if_necessary(&mut self) {
        if !self.has_all_master_bits() {
            return;
        }
        let total = self.cluster_size;
        let mut handed_to = None;

        for link in self.links.handshaked_mut() {
            if link.connected_cluster_size > total - link.connected_cluster_size {
                link.pending_update.set_handover();
                link.master_bit = false;
                handed_to = Some(link.partner_id);
                break;
            }
        }

        if let Some(partner) = handed_to {
            log::debug!(target: "cluster", "handing master bit over to {}", partner);
            self.emit_debug(DebugEvent::MasterBitHandover { to: partner });
        }
    }

    /// Split healing after a mesh link went away, per the master-bit rule.
    ///
    /// Called with the removed link's state snapshot, both for losses
    /// reported by the radio and for locally decided disconnects.
    pub(crate) fn handle_link_teardown(
        &mut self,
        link: MeshLink,
        reason: DisconnectReason,
        now: Timestamp,
    ) {
        log::debug!(
            target: "cluster",
            "link to {} down ({:?}), state was {:?}",
            link.partner_id,
            reason,
            link.state
        );
        self.connection_loss_counter = self.connection_loss_counter.wrapping_add(1);

        self.emit_debug(DebugEvent::LinkTeardown {
            partner: link.partner_id,
            reason,
            was_handshaked: link.handshake_done(),
        });
        if link.partner_id != NODE_ID_INVALID {
            self.push_event(Event::MeshDisconnected {
                partner: link.partner_id,
                reason,
            });
        }

        if link.handshake_done() {
            if !link.master_bit {
                // The peer owned this link's token: we are on the wrong
                // side of the split and must dissolve. With IAmSmaller
                // the other links are already gone.
                if reason != DisconnectReason::IAmSmaller {
                    self.force_disconnect_all_mesh(DisconnectReason::PartnerHasMasterBit, now);
                }
                self.cluster_size = 1;
                self.cluster_id = self.generate_cluster_id();
                self.send_cluster_info_update(None, 0);
            } else {
                // We keep the cluster identity; the peer's subtree left.
                let departed = link.connected_cluster_size;
                let new_size = self.cluster_size - departed;
                if new_size < 1 {
                    self.stats.invariant_violations += 1;
                    log::error!(
                        target: "cluster",
                        "split would leave cluster size {}, clamping to 1",
                        new_size
                    );
                    self.cluster_size = 1;
                } else {
                    self.cluster_size = new_size;
                }
                self.send_cluster_info_update(None, -departed);
            }

            self.push_event(Event::ClusterChanged {
                cluster_id: self.cluster_id,
                cluster_size: self.cluster_size,
            });
            self.notify_cluster_change();
        }

        self.keep_high_discovery_active(now);

        // A lone node must never keep a cluster id peers might still map
        // to the old membership.
        if self.cluster_size == 1 && self.links.is_empty() {
            self.cluster_id = self.generate_cluster_id();
        }

        self.update_join_me();
        self.hand_over_master_bit_if_necessary();
        self.no_nodes_found_counter = 0;
        self.disconnected_at = Some(now);
        self.start_fast_advertising();
    }
}
