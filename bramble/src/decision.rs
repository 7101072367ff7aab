//! Decision engine: pick the best candidate cluster and act on it.
//!
//! Runs on a coarse timer with a small random jitter so two nodes that
//! rediscover each other do not keep deciding in lockstep. Master beats
//! slave: if any candidate can be connected to as master and an outbound
//! slot is free, the connect is issued; otherwise the best bigger cluster
//! is advertised in the ack field and we wait to be picked up.

use crate::debug::DebugEvent;
use crate::node::PendingConnect;
use crate::scoring::{score_as_master, score_as_slave};
use crate::time::{Duration, Timestamp};
use crate::traits::{Radio, RadioError, Random};
use crate::types::{
    DecisionResult, DeviceType, DisconnectReason, Event, NodeId, RebootReason, NODE_ID_INVALID,
};
use crate::Node;

/// Ceiling for the consecutive empty-cycle counter.
const NO_NODES_FOUND_CAP: u8 = 100;

impl<R, Rn> Node<R, Rn>
where
    R: Radio,
    Rn: Random,
{
    /// One decision cycle.
    pub(crate) fn run_decision(&mut self, now: Timestamp) {
        // Jitter the next cycle by 0-1 tick to decorrelate neighbors.
        let jitter = if self.random.gen_u32() % 2 == 0 {
            Duration::from_millis(100)
        } else {
            Duration::ZERO
        };
        self.last_decision_at = now + jitter;

        let (result, partner) = self.determine_best_cluster(now);

        match result {
            DecisionResult::NoNodesFound => {
                if self.no_nodes_found_counter < NO_NODES_FOUND_CAP {
                    self.no_nodes_found_counter += 1;
                }
            }
            _ => self.no_nodes_found_counter = 0,
        }

        self.emit_debug(DebugEvent::Decision {
            timestamp: now,
            result,
            partner,
        });
        self.push_event(Event::Decision { result, partner });
    }

    fn determine_best_cluster(&mut self, now: Timestamp) -> (DecisionResult, NodeId) {
        // Master branch: we initiate, provided an outbound slot is free.
        if self.free_mesh_out_connections() > 0 {
            let ctx = crate::node::build_score_ctx(
                &self.config,
                now,
                self.cluster_id,
                self.cluster_size,
                self.connected_partner_ids(),
            );
            let best = self.candidates.best_index(|e| score_as_master(e, &ctx));

            if let Some(index) = best {
                self.current_ack_id = 0;
                let Some(candidate) = self.candidates.get(index).copied() else {
                    return (DecisionResult::NoNodesFound, NODE_ID_INVALID);
                };

                let interval = if candidate.payload.device_type == DeviceType::Leaf {
                    self.config.leaf_conn_interval
                } else {
                    self.config.conn_interval
                };

                log::debug!(
                    target: "decision",
                    "connecting as master to {} (cluster {:#x} size {})",
                    candidate.payload.sender,
                    candidate.payload.cluster_id,
                    candidate.payload.cluster_size
                );

                match self.radio.connect_as_master(
                    candidate.payload.sender,
                    &candidate.addr,
                    candidate.payload.mesh_write_handle,
                    interval,
                ) {
                    Ok(()) => {
                        self.stats.connect_attempts += 1;
                        if let Some(entry) = self.candidates.get_mut(index) {
                            entry.note_attempt(now);
                        }
                        self.pending_outbound = Some(PendingConnect {
                            partner: candidate.payload.sender,
                            addr: candidate.addr,
                            since: now,
                        });
                    }
                    Err(RadioError::Fatal) => {
                        log::error!(target: "decision", "fatal radio error on connect");
                        self.schedule_reboot(
                            now + self.config.reboot_grace,
                            RebootReason::FatalRadioError,
                        );
                    }
                    Err(e) => {
                        log::warn!(target: "decision", "connect rejected: {:?}", e);
                    }
                }

                return (DecisionResult::ConnectAsMaster, candidate.payload.sender);
            }
        }

        // Slave branch: find the best bigger cluster and advertise our
        // intent to join it.
        self.current_ack_id = 0;
        let ctx = crate::node::build_score_ctx(
            &self.config,
            now,
            self.cluster_id,
            self.cluster_size,
            self.connected_partner_ids(),
        );
        let best = self.candidates.best_index(|e| score_as_slave(e, &ctx));

        if let Some(index) = best {
            let Some(candidate) = self.candidates.get(index).copied() else {
                return (DecisionResult::NoNodesFound, NODE_ID_INVALID);
            };
            self.current_ack_id = candidate.payload.cluster_id;

            log::debug!(
                target: "decision",
                "bigger cluster {:#x} nearby, waiting as slave",
                candidate.payload.cluster_id
            );

            // Single-inbound-slot variant: a node whose only inbound slot
            // is taken must drop its links to become joinable. Equal-size
            // stand-offs are broken probabilistically so two nodes do not
            // tear down simultaneously.
            if self.config.max_in_links == 1 {
                let fresh_link = self
                    .links
                    .iter()
                    .any(|l| l.created_at + self.config.handshake_timeout > now);

                if !fresh_link && self.free_mesh_in_connections() == 0 {
                    let tear_down = self.cluster_size != candidate.payload.cluster_size
                        || self.random.gen_u32() < u32::MAX / 4;
                    if tear_down {
                        log::debug!(target: "decision", "freeing the single inbound slot");
                        self.force_disconnect_all_mesh(DisconnectReason::ShouldWaitAsSlave, now);
                        self.cluster_size = 1;
                        self.cluster_id = self.generate_cluster_id();
                    }
                }
            }

            self.update_join_me();
            return (DecisionResult::ConnectAsSlave, candidate.payload.sender);
        }

        log::trace!(target: "decision", "no cluster found");
        (DecisionResult::NoNodesFound, NODE_ID_INVALID)
    }

    /// Index of the best cluster we could join as slave, if any.
    pub(crate) fn best_slave_index(&self, now: Timestamp) -> Option<usize> {
        let ctx = crate::node::build_score_ctx(
            &self.config,
            now,
            self.cluster_id,
            self.cluster_size,
            self.connected_partner_ids(),
        );
        self.candidates.best_index(|e| score_as_slave(e, &ctx))
    }

    /// A strictly better cluster is in radio range.
    pub(crate) fn bigger_known_cluster_exists(&self, now: Timestamp) -> bool {
        self.best_slave_index(now).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::LinkDirection;
    use crate::node::test_support::*;
    use crate::traits::test_impls::RadioCommand;

    fn tick(node: &mut TestNode, now: Timestamp) {
        node.handle_timer(now, Duration::from_millis(100));
    }

    #[test]
    fn test_master_connect_issued() {
        let mut node = test_node(1);
        let data = sample_join_me(2, 0x0BB0_0002, 1);
        node.handle_adv_report([2; 6], &data, -60, true, Timestamp::from_millis(100));
        node.radio_mut().take_commands();

        tick(&mut node, Timestamp::from_millis(900));

        let commands = node.radio_mut().take_commands();
        assert!(commands
            .iter()
            .any(|c| matches!(c, RadioCommand::Connect { partner: 2, .. })));
        assert_eq!(node.stats().connect_attempts, 1);
        assert!(node.pending_outbound.is_some());
        assert_eq!(node.candidates.iter().next().unwrap().attempts, 1);
        assert_eq!(node.free_mesh_out_connections(), 1);
    }

    #[test]
    fn test_no_candidates_counts_empty_cycles() {
        let mut node = test_node(1);
        tick(&mut node, Timestamp::from_millis(900));
        tick(&mut node, Timestamp::from_millis(1900));
        assert_eq!(node.no_nodes_found_counter, 2);
    }

    #[test]
    fn test_bigger_cluster_waits_as_slave() {
        let mut config = crate::config::NodeConfig::default();
        config.max_in_links = 1;
        let mut node = test_node_with_config(1, config);

        let data = sample_join_me(2, 0x0BB0_0002, 5);
        node.handle_adv_report([2; 6], &data, -60, true, Timestamp::from_millis(100));
        node.radio_mut().take_commands();

        tick(&mut node, Timestamp::from_millis(900));

        // No connect; the ack field advertises the target cluster.
        let commands = node.radio_mut().take_commands();
        assert!(!commands.iter().any(|c| matches!(c, RadioCommand::Connect { .. })));
        assert_eq!(node.current_ack_id, 0x0BB0_0002);
        assert_eq!(node.build_join_me_payload().ack_field, 0x0BB0_0002);
    }

    #[test]
    fn test_single_slot_teardown_for_bigger_cluster() {
        let mut config = crate::config::NodeConfig::default();
        config.max_in_links = 1;
        let mut node = test_node_with_config(1, config);
        install_link(&mut node, 7, 3, LinkDirection::Inbound, 1, true);
        let old_id = node.cluster_id();
        assert_eq!(node.free_mesh_in_connections(), 0);

        // Bigger cluster with a different size: teardown is deterministic.
        let data = sample_join_me(2, 0x0BB0_0002, 5);
        node.handle_adv_report([2; 6], &data, -60, true, Timestamp::from_secs(10));

        tick(&mut node, Timestamp::from_secs(11));

        assert_eq!(node.link_count(), 0);
        assert_eq!(node.cluster_size(), 1);
        assert_ne!(node.cluster_id(), old_id);
        let commands = node.radio_mut().take_commands();
        assert!(commands.iter().any(|c| matches!(
            c,
            RadioCommand::Disconnect {
                reason: DisconnectReason::ShouldWaitAsSlave,
                ..
            }
        )));
    }

    #[test]
    fn test_fresh_link_blocks_single_slot_teardown() {
        let mut config = crate::config::NodeConfig::default();
        config.max_in_links = 1;
        let mut node = test_node_with_config(1, config);
        let now = Timestamp::from_secs(10);

        install_link(&mut node, 7, 3, LinkDirection::Inbound, 1, true);
        node.links.by_handle_mut(7).unwrap().created_at = now;

        let data = sample_join_me(2, 0x0BB0_0002, 5);
        node.handle_adv_report([2; 6], &data, -60, true, now);
        tick(&mut node, now + Duration::from_millis(900));

        assert_eq!(node.link_count(), 1, "handshake-fresh link must survive");
    }

    #[test]
    fn test_leaf_never_connects_as_master() {
        let mut config = crate::config::NodeConfig::default();
        config.device_type = DeviceType::Leaf;
        let mut node = test_node_with_config(1, config);

        let data = sample_join_me(2, 0x0BB0_0002, 1);
        node.handle_adv_report([2; 6], &data, -60, true, Timestamp::from_millis(100));
        node.radio_mut().take_commands();

        tick(&mut node, Timestamp::from_millis(900));
        let commands = node.radio_mut().take_commands();
        assert!(!commands.iter().any(|c| matches!(c, RadioCommand::Connect { .. })));
    }
}
