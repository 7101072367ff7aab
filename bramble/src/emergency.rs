//! Emergency-disconnect protocol.
//!
//! A node that keeps seeing a strictly better cluster it cannot join (all
//! outbound slots there in use) would loiter suboptimal forever. After the
//! condition has held for the trigger duration, the node opens a
//! short-lived out-of-band access connection to the best candidate and
//! asks it to free an outbound slot. The responder picks a probabilistic
//! victim among its outbound links, weighted toward small subtrees.

use alloc::vec::Vec;

use crate::debug::DebugEvent;
use crate::keys::KeyId;
use crate::modules::{NodeAction, RxPath};
use crate::node::AccessLink;
use crate::time::{Duration, Timestamp};
use crate::traits::{Radio, Random};
use crate::links::LinkDirection;
use crate::types::{DisconnectReason, EmergencyCode, LinkHandle, NodeId};
use crate::Node;

impl<R, Rn> Node<R, Rn>
where
    R: Radio,
    Rn: Random,
{
    /// Requester side, driven by the timer tick.
    pub(crate) fn emergency_tick(&mut self, now: Timestamp, dt: Duration) {
        if !self.bigger_known_cluster_exists(now) {
            self.reset_emergency();
            return;
        }

        let before = self.emergency_timer;
        self.emergency_timer = self.emergency_timer.saturating_add(dt);
        let trigger = self.config.emergency_trigger;

        // The trigger threshold was crossed in this tick: open the probe.
        if before < trigger && self.emergency_timer >= trigger {
            self.open_emergency_probe(now);
            return;
        }

        if self.emergency_timer < trigger {
            return;
        }

        match self.emergency_conn {
            Some(handle) => {
                let open = self
                    .access_links
                    .iter()
                    .find(|a| a.handle == handle)
                    .map(|a| a.open)
                    .unwrap_or(false);

                if open {
                    if !self.emergency_sent {
                        self.emergency_sent = true;
                        log::debug!(target: "emergency", "requesting an outbound slot");
                        self.send_module_action_on(
                            RxPath::Access(handle),
                            NodeAction::EmergencyDisconnect,
                            0,
                            &[],
                            false,
                        );
                    }
                } else if self
                    .emergency_probe_at
                    .is_some_and(|at| now.saturating_sub(at) >= self.config.handshake_timeout)
                {
                    // The probe never came up; retry after a full interval.
                    log::debug!(target: "emergency", "probe connection timed out");
                    self.reset_emergency();
                }
            }
            None => {
                // Rare: several nodes reported their emergency to the same
                // partner and our probe was displaced.
                log::warn!(target: "emergency", "probe connection vanished");
                self.reset_emergency();
            }
        }
    }

    fn open_emergency_probe(&mut self, now: Timestamp) {
        let Some(index) = self.best_slave_index(now) else {
            self.reset_emergency();
            return;
        };
        let Some(candidate) = self.candidates.get(index).copied() else {
            self.reset_emergency();
            return;
        };

        match self.radio.connect_access(&candidate.addr, KeyId::Network) {
            Ok(handle) => {
                self.access_links.push(AccessLink {
                    handle,
                    outbound: true,
                    open: false,
                    key: KeyId::Network,
                });
                self.emergency_conn = Some(handle);
                self.emergency_probe_at = Some(now);
                self.stats.emergency_triggers += 1;
                log::debug!(
                    target: "emergency",
                    "probing cluster {:#x} via access connection",
                    candidate.payload.cluster_id
                );
                self.emit_debug(DebugEvent::EmergencyProbe {
                    target_cluster: candidate.payload.cluster_id,
                });
            }
            Err(e) => {
                log::warn!(target: "emergency", "could not open probe: {:?}", e);
                self.reset_emergency();
            }
        }
    }

    /// Drop all emergency state and the probe connection, restarting the
    /// observation window.
    pub(crate) fn reset_emergency(&mut self) {
        self.emergency_timer = Duration::ZERO;
        self.emergency_probe_at = None;
        self.emergency_sent = false;
        if let Some(handle) = self.emergency_conn.take() {
            if let Some(pos) = self.access_links.iter().position(|a| a.handle == handle) {
                self.access_links.remove(pos);
            }
            self.radio
                .disconnect(handle, DisconnectReason::EmergencyReset);
        }
    }

    /// An access connection dropped at the radio layer.
    pub(crate) fn on_access_link_down(&mut self, handle: LinkHandle) {
        if self.emergency_conn == Some(handle) {
            self.emergency_conn = None;
            self.emergency_timer = Duration::ZERO;
            self.emergency_probe_at = None;
            self.emergency_sent = false;
        }
    }

    /// Responder side: a peer asks us to free an outbound slot.
    pub(crate) fn handle_emergency_action(
        &mut self,
        path: RxPath,
        sender: NodeId,
        request_handle: u8,
        now: Timestamp,
    ) {
        let code = if self.free_mesh_out_connections() == 0 {
            self.disconnect_weighted_victim(now)
        } else {
            EmergencyCode::NotAllConnectionsUsedUp
        };

        log::debug!(target: "emergency", "answering emergency request with {:?}", code);
        self.emit_debug(DebugEvent::EmergencyAnswered { code });
        self.send_module_response_on(
            path,
            sender,
            NodeAction::EmergencyDisconnect,
            request_handle,
            &[code as u8],
        );
    }

    /// Pick and disconnect a victim among outbound handshaked links.
    ///
    /// Each link's removal weight is proportional to how few nodes sit
    /// behind it, so cutting it loose costs the cluster the least:
    /// `((size-1) - connected) / ((handshaked-1) * (size-1))` of the full
    /// 16-bit range, decided by a single uniform draw.
    fn disconnect_weighted_victim(&mut self, now: Timestamp) -> EmergencyCode {
        let outbound: Vec<(LinkHandle, i16, NodeId)> = self
            .links
            .handshaked()
            .filter(|l| l.direction == LinkDirection::Outbound)
            .map(|l| (l.handle, l.connected_cluster_size, l.partner_id))
            .collect();

        let handshaked = outbound.len() as i32;
        let cluster_size = self.cluster_size as i32;
        let draw = self.random.gen_u16() as u32;

        let mut sum = 0u32;
        let mut victim = None;
        for (handle, connected, partner) in &outbound {
            let weight = if handshaked <= 1 || cluster_size <= 1 {
                // Degenerate distribution: the only link is the victim.
                u16::MAX as u32 + 1
            } else {
                let excess = (cluster_size - 1 - *connected as i32).max(0) as u32;
                excess * u16::MAX as u32 / ((handshaked - 1) as u32 * (cluster_size - 1) as u32)
            };
            sum += weight;
            if sum > draw {
                victim = Some((*handle, *partner));
                break;
            }
        }

        match victim {
            Some((handle, partner)) => {
                log::warn!(target: "emergency", "emergency disconnect from {}", partner);
                self.disconnect_mesh_link(handle, DisconnectReason::EmergencyDisconnect, now);
                self.stats.emergency_disconnects += 1;
                EmergencyCode::Success
            }
            None => {
                log::warn!(target: "emergency", "no link qualified for removal");
                EmergencyCode::CantDisconnectAnybody
            }
        }
    }

    /// Requester side: the peer answered.
    pub(crate) fn handle_emergency_response(&mut self, code: EmergencyCode) {
        match code {
            EmergencyCode::Success | EmergencyCode::NotAllConnectionsUsedUp => {
                // A slot is available now; the decision loop takes over.
            }
            EmergencyCode::CantDisconnectAnybody => {
                log::warn!(target: "emergency", "partner could not disconnect anybody");
            }
        }
        self.reset_emergency();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::test_support::*;
    use crate::traits::test_impls::RadioCommand;
    use crate::wire::{MeshPacket, MeshPayload};

    fn tick(node: &mut TestNode, now: Timestamp) {
        node.handle_timer(now, Duration::from_millis(100));
    }

    #[test]
    fn test_emergency_probe_after_trigger_duration() {
        let mut node = test_node(1);
        let trigger = node.config().emergency_trigger;

        // A strictly bigger cluster stays visible; keep the candidate
        // fresh while the timer accumulates.
        let mut now = Timestamp::from_millis(0);
        let mut probed = false;
        for _ in 0..((trigger.as_millis() / 100) + 5) {
            now = now + Duration::from_millis(100);
            let data = sample_join_me(2, 0x0BB0_0002, 5);
            node.handle_adv_report([2; 6], &data, -60, true, now);
            tick(&mut node, now);
            if node.emergency_conn.is_some() {
                probed = true;
                break;
            }
        }

        assert!(probed, "probe connection must open after the trigger");
        assert_eq!(node.stats().emergency_triggers, 1);
        let commands = node.radio_mut().take_commands();
        assert!(commands
            .iter()
            .any(|c| matches!(c, RadioCommand::ConnectAccess { key: KeyId::Network, .. })));
    }

    #[test]
    fn test_emergency_resets_when_cluster_disappears() {
        let mut node = test_node(1);
        node.emergency_timer = Duration::from_secs(5);

        // Empty candidate buffer: no bigger cluster in sight.
        tick(&mut node, Timestamp::from_millis(100));
        assert_eq!(node.emergency_timer, Duration::ZERO);
    }

    #[test]
    fn test_responder_frees_slot_when_full() {
        let mut config = crate::config::NodeConfig::default();
        config.max_out_links = 1;
        let mut node = test_node_with_config(1, config);
        install_link(&mut node, 7, 2, crate::links::LinkDirection::Outbound, 1, true);
        assert_eq!(node.free_mesh_out_connections(), 0);
        node.radio_mut().take_commands();

        node.handle_emergency_action(RxPath::Access(0x9000), 42, 3, Timestamp::from_secs(1));

        assert_eq!(node.link_count(), 0);
        assert_eq!(node.stats().emergency_disconnects, 1);

        let commands = node.radio_mut().take_commands();
        assert!(commands.iter().any(|c| matches!(
            c,
            RadioCommand::Disconnect {
                link: 7,
                reason: DisconnectReason::EmergencyDisconnect,
            }
        )));
        // SUCCESS reply over the access connection.
        let reply = commands
            .iter()
            .find_map(|c| match c {
                RadioCommand::Send { link: 0x9000, data } => Some(data.clone()),
                _ => None,
            })
            .unwrap();
        let packet = MeshPacket::decode(&reply).unwrap();
        match packet.payload {
            MeshPayload::Module(m) => {
                assert_eq!(m.action_type, NodeAction::EmergencyDisconnect as u8);
                assert_eq!(m.payload, alloc::vec![EmergencyCode::Success as u8]);
                assert_eq!(m.request_handle, 3);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_responder_reports_free_slot() {
        let mut node = test_node(1);
        node.radio_mut().take_commands();

        node.handle_emergency_action(RxPath::Access(0x9000), 42, 0, Timestamp::from_secs(1));

        let commands = node.radio_mut().take_commands();
        let reply = commands
            .iter()
            .find_map(|c| match c {
                RadioCommand::Send { link: 0x9000, data } => Some(data.clone()),
                _ => None,
            })
            .unwrap();
        let packet = MeshPacket::decode(&reply).unwrap();
        match packet.payload {
            MeshPayload::Module(m) => {
                assert_eq!(
                    m.payload,
                    alloc::vec![EmergencyCode::NotAllConnectionsUsedUp as u8]
                );
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_weighted_draw_prefers_small_subtrees() {
        // Over many seeds, the link with the small subtree behind it must
        // be evicted far more often than the big one.
        let mut small_evicted = 0;
        for seed in 0..100u64 {
            let mut config = crate::config::NodeConfig::default();
            config.max_out_links = 2;
            let mut node = test_node_with_config(1, config);
            node.random = crate::traits::test_impls::MockRandom::with_seed(seed);
            // Link 7 carries 1 node, link 8 carries 8 nodes.
            install_link(&mut node, 7, 2, crate::links::LinkDirection::Outbound, 1, true);
            install_link(&mut node, 8, 3, crate::links::LinkDirection::Outbound, 8, true);

            node.handle_emergency_action(RxPath::Access(0x9000), 42, 0, Timestamp::from_secs(1));
            if node.link_to(2).is_none() {
                small_evicted += 1;
            }
        }
        assert!(
            small_evicted > 70,
            "small subtree evicted only {} times",
            small_evicted
        );
    }

    #[test]
    fn test_response_resets_requester() {
        let mut node = test_node(1);
        node.emergency_timer = Duration::from_secs(20);
        node.emergency_sent = true;
        node.emergency_conn = Some(0x9000);
        node.access_links.push(AccessLink {
            handle: 0x9000,
            outbound: true,
            open: true,
            key: KeyId::Network,
        });

        node.handle_emergency_response(EmergencyCode::Success);

        assert_eq!(node.emergency_timer, Duration::ZERO);
        assert!(node.emergency_conn.is_none());
        assert!(!node.emergency_sent);
        let commands = node.radio_mut().take_commands();
        assert!(commands.iter().any(|c| matches!(
            c,
            RadioCommand::Disconnect {
                link: 0x9000,
                reason: DisconnectReason::EmergencyReset,
            }
        )));
    }
}
