//! Discovery beacon and duty-cycle state machine.
//!
//! The beacon broadcasts a JOIN_ME record summarizing this node's cluster;
//! the state machine schedules advertising and scanning intensity: HIGH
//! after boot and on every topology disturbance, LOW once the mesh has
//! settled, OFF only on explicit remote command.

use crate::debug::DebugEvent;
use crate::time::{Duration, Timestamp};
use crate::traits::{AdvJob, AdvJobKind, Radio, Random, ScanConfig, ScanMode};
use crate::types::{DeviceType, DiscoveryState, Event, JoinMePayload, NODE_ID_BROADCAST};
use crate::Node;

/// Scan window parameters per duty state.
const SCAN_INTERVAL_HIGH: Duration = Duration::from_millis(20);
const SCAN_WINDOW_HIGH: Duration = Duration::from_millis(10);
const SCAN_INTERVAL_LOW: Duration = Duration::from_millis(1000);
const SCAN_WINDOW_LOW: Duration = Duration::from_millis(10);

/// Advertising interval of the fast re-join burst.
const FAST_ADV_INTERVAL: Duration = Duration::from_millis(20);
/// Slots granted to the fast re-join burst before it expires.
const FAST_ADV_SLOTS: u8 = 10;

impl<R, Rn> Node<R, Rn>
where
    R: Radio,
    Rn: Random,
{
    /// Assemble the current JOIN_ME payload.
    pub(crate) fn build_join_me_payload(&self) -> JoinMePayload {
        let mut free_in = self.free_mesh_in_connections();
        let mut free_out = self.free_mesh_out_connections();

        // A leaf offers at most its single inbound slot and never dials out.
        if self.config.device_type == DeviceType::Leaf {
            free_in = free_in.min(1);
            free_out = 0;
        }

        // The ack field only means something when a single inbound slot
        // forces the intended master to pick us explicitly.
        let ack_field = if self.config.max_in_links == 1 {
            self.current_ack_id
        } else {
            0
        };

        JoinMePayload {
            sender: self.node_id,
            cluster_id: self.cluster_id,
            cluster_size: self.cluster_size,
            free_in,
            free_out,
            battery_runtime: self.config.battery_runtime,
            tx_power: self.config.tx_power,
            device_type: self.config.device_type,
            hops_to_sink: self.hops_to_sink(),
            mesh_write_handle: self.config.mesh_write_handle,
            ack_field,
        }
    }

    /// Rebuild the beacon after any change to {cluster id, cluster size,
    /// free slots, ack target, hops}.
    pub(crate) fn update_join_me(&mut self) {
        if !self.config.enrolled() || self.config.device_type == DeviceType::Asset {
            return;
        }
        let Some(handle) = self.adv_job else {
            return;
        };

        let payload = self.build_join_me_payload();

        // Suspend advertising entirely for a fully-connected leaf.
        let slots = if self.discovery == DiscoveryState::Off {
            0
        } else if self.config.device_type == DeviceType::Leaf && payload.free_in == 0 {
            0
        } else {
            5
        };

        let job = AdvJob {
            kind: AdvJobKind::Scheduled,
            interval: self.adv_interval,
            slots,
            payload: crate::wire::encode_join_me(self.config.network_id, &payload),
        };
        self.radio.adv_job_refresh(handle, &job);

        log::trace!(
            target: "discovery",
            "JOIN_ME updated: cluster {:#x} size {} freeIn {} freeOut {} ack {:#x}",
            payload.cluster_id,
            payload.cluster_size,
            payload.free_in,
            payload.free_out,
            payload.ack_field
        );
        self.emit_debug(DebugEvent::JoinMeUpdated {
            cluster_id: payload.cluster_id,
            cluster_size: payload.cluster_size,
            free_in: payload.free_in,
            free_out: payload.free_out,
            ack_field: payload.ack_field,
        });
    }

    /// Temporarily broadcast the JOIN_ME record very frequently, to speed
    /// up reconnection after a topology change.
    pub(crate) fn start_fast_advertising(&mut self) {
        if self.adv_job.is_none() {
            return;
        }
        let payload = self.build_join_me_payload();
        let job = AdvJob {
            kind: AdvJobKind::Immediate,
            interval: FAST_ADV_INTERVAL,
            slots: FAST_ADV_SLOTS,
            payload: crate::wire::encode_join_me(self.config.network_id, &payload),
        };
        // The job removes itself once its slots are used up.
        let _ = self.radio.adv_job_add(job);
    }

    /// Switch the discovery duty cycle.
    ///
    /// Re-entering the current state only refreshes its timeout.
    pub(crate) fn change_discovery_state(&mut self, new: DiscoveryState, now: Timestamp) {
        if self.discovery == new
            || self.state_machine_disabled
            || self.config.device_type == DeviceType::Asset
        {
            if self.discovery == new && self.config.high_to_low_timeout != Duration::ZERO {
                self.discovery_deadline = Some(now + self.config.high_to_low_timeout);
            }
            return;
        }

        self.discovery = new;
        log::debug!(target: "discovery", "-- DISCOVERY {:?} --", new);

        match new {
            DiscoveryState::High => {
                self.no_nodes_found_counter = 0;
                if self.config.high_to_low_timeout != Duration::ZERO {
                    self.discovery_deadline = Some(now + self.config.high_to_low_timeout);
                    self.next_discovery = Some(DiscoveryState::Low);
                } else {
                    self.discovery_deadline = None;
                    self.next_discovery = None;
                }
                self.adv_interval = self.config.adv_interval_high;
                self.radio.scan_start(ScanConfig {
                    mode: ScanMode::Active,
                    interval: SCAN_INTERVAL_HIGH,
                    window: SCAN_WINDOW_HIGH,
                });
            }
            DiscoveryState::Low => {
                self.discovery_deadline = None;
                self.next_discovery = None;
                self.adv_interval = self.config.adv_interval_low;
                self.radio.scan_start(ScanConfig {
                    mode: ScanMode::Passive,
                    interval: SCAN_INTERVAL_LOW,
                    window: SCAN_WINDOW_LOW,
                });
            }
            DiscoveryState::Off => {
                self.discovery_deadline = None;
                self.next_discovery = None;
                self.radio.scan_stop();
            }
        }

        self.update_join_me();
        self.emit_debug(DebugEvent::DiscoveryChanged { state: new });
        self.push_event(Event::DiscoveryChanged { state: new });
    }

    /// Extend HIGH discovery, or enter it. Any event that plausibly means
    /// "there is more work to do" lands here.
    pub(crate) fn keep_high_discovery_active(&mut self, now: Timestamp) {
        match self.discovery {
            // An explicit OFF is never overridden locally.
            DiscoveryState::Off => {}
            DiscoveryState::High => {
                if self.config.high_to_low_timeout != Duration::ZERO {
                    self.discovery_deadline = Some(now + self.config.high_to_low_timeout);
                }
            }
            DiscoveryState::Low => self.change_discovery_state(DiscoveryState::High, now),
        }
    }

    /// After a disconnect, push the neighborhood back into HIGH discovery
    /// once the grace delay has elapsed.
    pub(crate) fn check_reconnect_broadcast(&mut self, now: Timestamp) {
        let Some(disconnected_at) = self.disconnected_at else {
            return;
        };
        if self.config.high_to_low_timeout == Duration::ZERO {
            self.disconnected_at = None;
            return;
        }
        if now >= disconnected_at + self.config.reconnect_broadcast_delay {
            self.disconnected_at = None;
            log::debug!(target: "discovery", "broadcasting HIGH discovery after disconnect");
            self.send_node_action(
                NODE_ID_BROADCAST,
                crate::modules::NodeAction::SetDiscovery,
                0,
                &[1],
                now,
            );
        }
    }

    /// Disable or enable the discovery state machine (test hook and
    /// operator command).
    pub fn disable_state_machine(&mut self, disabled: bool) {
        self.state_machine_disabled = disabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::test_support::*;
    use crate::traits::test_impls::RadioCommand;

    #[test]
    fn test_high_to_low_transition() {
        let mut node = test_node(1);
        assert_eq!(node.discovery_state(), DiscoveryState::High);

        let timeout = node.config().high_to_low_timeout;
        node.handle_timer(Timestamp::ZERO + timeout + Duration::from_millis(100), Duration::from_millis(100));
        assert_eq!(node.discovery_state(), DiscoveryState::Low);
    }

    #[test]
    fn test_keep_high_extends_deadline() {
        let mut node = test_node(1);
        let timeout = node.config().high_to_low_timeout;

        // Halfway through, an event extends the window.
        let half = Timestamp::ZERO + Duration::from_millis(timeout.as_millis() / 2);
        node.keep_high_discovery_active(half);

        node.handle_timer(Timestamp::ZERO + timeout, Duration::from_millis(100));
        assert_eq!(node.discovery_state(), DiscoveryState::High);

        node.handle_timer(half + timeout + Duration::from_millis(100), Duration::from_millis(100));
        assert_eq!(node.discovery_state(), DiscoveryState::Low);
    }

    #[test]
    fn test_low_reenters_high_on_disturbance() {
        let mut node = test_node(1);
        let timeout = node.config().high_to_low_timeout;
        node.handle_timer(Timestamp::ZERO + timeout + Duration::from_millis(100), Duration::from_millis(100));
        assert_eq!(node.discovery_state(), DiscoveryState::Low);

        node.keep_high_discovery_active(Timestamp::ZERO + timeout + Duration::from_secs(1));
        assert_eq!(node.discovery_state(), DiscoveryState::High);
    }

    #[test]
    fn test_off_sticks_until_commanded() {
        let mut node = test_node(1);
        node.change_discovery_state(DiscoveryState::Off, Timestamp::from_secs(1));
        assert_eq!(node.discovery_state(), DiscoveryState::Off);

        node.keep_high_discovery_active(Timestamp::from_secs(2));
        assert_eq!(node.discovery_state(), DiscoveryState::Off);

        let commands = node.radio_mut().take_commands();
        assert!(commands.iter().any(|c| matches!(c, RadioCommand::ScanStop)));
    }

    #[test]
    fn test_leaf_suspends_advertising_when_full() {
        let mut config = crate::config::NodeConfig::default();
        config.device_type = DeviceType::Leaf;
        config.max_in_links = 1;
        let mut node = test_node_with_config(1, config);

        install_link(&mut node, 1, 2, crate::links::LinkDirection::Inbound, 1, false);
        node.update_join_me();

        let commands = node.radio_mut().take_commands();
        let last_refresh = commands
            .iter()
            .rev()
            .find_map(|c| match c {
                RadioCommand::AdvJobRefresh { job, .. } => Some(job.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_refresh.slots, 0);
    }

    #[test]
    fn test_join_me_payload_reflects_state() {
        let mut node = test_node(9);
        install_link(&mut node, 1, 2, crate::links::LinkDirection::Inbound, 3, true);

        let payload = node.build_join_me_payload();
        assert_eq!(payload.sender, 9);
        assert_eq!(payload.cluster_size, 4);
        assert_eq!(payload.free_in, 1);
        assert_eq!(payload.free_out, 2);
        // Two inbound slots configured, so the ack protocol is unused.
        assert_eq!(payload.ack_field, 0);
    }
}
