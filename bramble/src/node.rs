//! Node implementation - the root protocol state machine.
//!
//! The `Node` struct owns all protocol state and is driven entirely by
//! explicit event-handler entry points: a periodic timer tick, GAP
//! advertisement reports, link lifecycle callbacks and inbound mesh
//! messages. Handlers run to completion and never block; outbound work is
//! issued as asynchronous jobs through the [`Radio`] trait.
//!
//! # Usage
//!
//! ```ignore
//! let mut node = Node::new(radio, random, config, keys, node_id);
//! node.start(now);
//!
//! // From the platform event loop:
//! node.handle_timer(now, tick);
//! node.handle_adv_report(addr, data, rssi, connectable, now);
//! node.handle_mesh_message(link, data, now);
//!
//! while let Some(event) = node.poll_event() {
//!     // react to cluster changes, reboot requests, ...
//! }
//! ```

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::candidates::CandidateBuffer;
use crate::config::NodeConfig;
use crate::debug::{DebugEmitter, DebugEvent};
use crate::keys::{KeyId, KeyStore};
use crate::links::{LinkArena, LinkDirection, LinkState, MeshLink};
use crate::modules::{LoadGenerator, ModuleTable, RxPath};
use crate::scoring::ScoreContext;
use crate::time::{Duration, Timestamp};
use crate::traits::{AdvJob, AdvJobHandle, Radio, Random};
use crate::types::{
    ClusterId, ClusterSize, DeviceType, DiscoveryState, DisconnectReason, Event, LinkHandle,
    MessageType, NodeAddr, NodeId, NodeStats, RebootReason, NODE_ID_INVALID,
};
use crate::wire::{MeshPacket, MeshPayload};

/// What kind of link came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkUpKind {
    /// Mesh connection we initiated.
    MeshOutbound,
    /// Mesh connection a peer initiated.
    MeshInbound,
    /// Out-of-band access connection we initiated.
    AccessOutbound,
    /// Out-of-band access connection a peer initiated.
    AccessInbound { key: KeyId },
}

/// A live out-of-band access connection.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AccessLink {
    pub handle: LinkHandle,
    pub outbound: bool,
    pub open: bool,
    pub key: KeyId,
}

/// An outbound GAP connect in flight, before link-up.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingConnect {
    pub partner: NodeId,
    pub addr: NodeAddr,
    pub since: Timestamp,
}

/// The mesh formation core of one node.
///
/// Generic over the radio backend and the random number generator, so the
/// same state machine runs on hardware and in the simulator.
pub struct Node<R, Rn> {
    pub(crate) radio: R,
    pub(crate) random: Rn,
    pub(crate) config: NodeConfig,
    pub(crate) keys: KeyStore,

    // Identity and cluster membership
    pub(crate) node_id: NodeId,
    pub(crate) cluster_id: ClusterId,
    pub(crate) cluster_size: ClusterSize,
    pub(crate) connection_loss_counter: u16,
    pub(crate) boot_nonce: u16,
    /// Cluster we advertise the intent to join as slave, or 0.
    pub(crate) current_ack_id: ClusterId,

    // Topology
    pub(crate) links: LinkArena,
    pub(crate) candidates: CandidateBuffer,
    pub(crate) pending_outbound: Option<PendingConnect>,
    pub(crate) access_links: Vec<AccessLink>,

    // Discovery duty cycle
    pub(crate) discovery: DiscoveryState,
    pub(crate) discovery_deadline: Option<Timestamp>,
    pub(crate) next_discovery: Option<DiscoveryState>,
    pub(crate) adv_job: Option<AdvJobHandle>,
    pub(crate) adv_interval: Duration,
    pub(crate) state_machine_disabled: bool,

    // Decision engine
    pub(crate) last_decision_at: Timestamp,
    pub(crate) no_nodes_found_counter: u8,

    // Heal / reconnect
    pub(crate) disconnected_at: Option<Timestamp>,

    // Emergency disconnect
    pub(crate) emergency_timer: Duration,
    pub(crate) emergency_conn: Option<LinkHandle>,
    pub(crate) emergency_probe_at: Option<Timestamp>,
    pub(crate) emergency_sent: bool,

    // Modules and deferred work
    pub(crate) modules: ModuleTable,
    pub(crate) load_gen: Option<LoadGenerator>,
    pub(crate) reboot_at: Option<(Timestamp, RebootReason)>,

    // Application surface
    pub(crate) events: VecDeque<Event>,
    pub(crate) stats: NodeStats,
    pub(crate) debug: Option<Box<dyn DebugEmitter>>,
}

/// Build a scoring context from borrowed node fields.
///
/// Kept as a free function so callers can borrow `config` alone and still
/// mutate sibling fields while the context is alive.
pub(crate) fn build_score_ctx<'a>(
    config: &'a NodeConfig,
    now: Timestamp,
    cluster_id: ClusterId,
    cluster_size: ClusterSize,
    connected_partners: Vec<NodeId>,
) -> ScoreContext<'a> {
    ScoreContext {
        now,
        cluster_id,
        cluster_size,
        device_type: config.device_type,
        connected_partners,
        config,
    }
}

impl<R, Rn> Node<R, Rn>
where
    R: Radio,
    Rn: Random,
{
    /// Create a node. Call [`Node::start`] before feeding events.
    pub fn new(radio: R, mut random: Rn, config: NodeConfig, keys: KeyStore, node_id: NodeId) -> Self {
        let boot_nonce = random.gen_u16();
        let mut node = Self {
            radio,
            random,
            config,
            keys,
            node_id,
            cluster_id: 0,
            cluster_size: 1,
            connection_loss_counter: 0,
            boot_nonce,
            current_ack_id: 0,
            links: LinkArena::new(),
            candidates: CandidateBuffer::new(),
            pending_outbound: None,
            access_links: Vec::new(),
            discovery: DiscoveryState::Off,
            discovery_deadline: None,
            next_discovery: None,
            adv_job: None,
            adv_interval: Duration::ZERO,
            state_machine_disabled: false,
            last_decision_at: Timestamp::ZERO,
            no_nodes_found_counter: 0,
            disconnected_at: None,
            emergency_timer: Duration::ZERO,
            emergency_conn: None,
            emergency_probe_at: None,
            emergency_sent: false,
            modules: ModuleTable::new(),
            load_gen: None,
            reboot_at: None,
            events: VecDeque::new(),
            stats: NodeStats::default(),
            debug: None,
        };
        node.cluster_id = node.generate_cluster_id();
        node
    }

    /// Bring the node up: register the beacon job and enter HIGH discovery.
    ///
    /// Does nothing for unenrolled nodes and asset devices.
    pub fn start(&mut self, now: Timestamp) {
        if !self.config.enrolled() || self.config.device_type == DeviceType::Asset {
            return;
        }

        log::info!(
            target: "node",
            "node {} starting, cluster {:#x}, network {}",
            self.node_id,
            self.cluster_id,
            self.config.network_id
        );

        self.adv_interval = self.config.adv_interval_high;
        let job = AdvJob {
            kind: crate::traits::AdvJobKind::Scheduled,
            interval: self.adv_interval,
            slots: 5,
            payload: Vec::new(),
        };
        self.adv_job = self.radio.adv_job_add(job);
        self.last_decision_at = now;

        self.update_join_me();
        self.change_discovery_state(DiscoveryState::High, now);
    }

    // --- Identity and cluster accessors ---

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    pub fn cluster_size(&self) -> ClusterSize {
        self.cluster_size
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Resolve key material for the radio layer, e.g. when it encrypts an
    /// access connection.
    pub fn get_key(&self, id: KeyId) -> Option<[u8; crate::keys::KEY_LEN]> {
        self.keys.get(id)
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Free inbound mesh link slots.
    pub fn free_mesh_in_connections(&self) -> u8 {
        self.config
            .max_in_links
            .saturating_sub(self.links.count_direction(LinkDirection::Inbound) as u8)
    }

    /// Free outbound mesh link slots. A connect in flight occupies a slot.
    pub fn free_mesh_out_connections(&self) -> u8 {
        let used =
            self.links.count_direction(LinkDirection::Outbound) + self.pending_outbound.is_some() as usize;
        self.config.max_out_links.saturating_sub(used as u8)
    }

    /// Hops toward the nearest sink, 0 on sink devices, -1 if none known.
    pub fn hops_to_sink(&self) -> i16 {
        self.hops_to_sink_excluding(None)
    }

    /// Sink distance as seen without one link; used when refreshing that
    /// link's peer so its own report is not echoed back.
    pub(crate) fn hops_to_sink_excluding(&self, exclude: Option<LinkHandle>) -> i16 {
        if self.config.device_type == DeviceType::Sink {
            return 0;
        }
        self.links
            .handshaked()
            .filter(|l| Some(l.handle) != exclude)
            .filter(|l| l.hops_to_sink >= 0)
            .map(|l| l.hops_to_sink)
            .min()
            .unwrap_or(-1)
    }

    /// The link to a partner, if one exists (any state).
    pub fn link_to(&self, partner: NodeId) -> Option<&MeshLink> {
        self.links.to_partner(partner)
    }

    /// Number of live mesh links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Whether this node currently owns every master bit it sees.
    pub fn has_all_master_bits(&self) -> bool {
        self.links.handshaked().all(|l| l.master_bit)
    }

    /// Drain the next application event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Install a debug emitter for protocol tracing.
    pub fn set_debug_emitter(&mut self, emitter: Box<dyn DebugEmitter>) {
        self.debug = Some(emitter);
    }

    pub(crate) fn emit_debug(&mut self, event: DebugEvent) {
        if let Some(emitter) = self.debug.as_mut() {
            emitter.emit(event);
        }
    }

    pub(crate) fn push_event(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Partners we hold a link to, for the scoring context.
    pub(crate) fn connected_partner_ids(&self) -> Vec<NodeId> {
        self.links
            .iter()
            .map(|l| l.partner_id)
            .filter(|&id| id != NODE_ID_INVALID)
            .collect()
    }

    /// Derive a fresh cluster id for the current incarnation.
    pub(crate) fn generate_cluster_id(&self) -> ClusterId {
        let incarnation = self.connection_loss_counter.wrapping_add(self.boot_nonce);
        let id = self.node_id as u32 | ((incarnation as u32) << 16);
        log::debug!(target: "node", "generated cluster id {:#x}", id);
        id
    }

    /// Schedule a deferred reboot; the earliest request wins.
    pub(crate) fn schedule_reboot(&mut self, at: Timestamp, reason: RebootReason) {
        match self.reboot_at {
            Some((existing, _)) if existing <= at => {}
            _ => self.reboot_at = Some((at, reason)),
        }
    }

    // --- Event entry points ---

    /// Periodic tick. `dt` is the time passed since the previous tick.
    pub fn handle_timer(&mut self, now: Timestamp, dt: Duration) {
        // Discovery duty-cycle timeout
        if let (Some(deadline), Some(next)) = (self.discovery_deadline, self.next_discovery) {
            if now >= deadline {
                self.change_discovery_state(next, now);
            }
        }

        self.emergency_tick(now, dt);

        if now >= self.last_decision_at + self.config.decision_interval {
            self.run_decision(now);
        }

        self.check_reconnect_broadcast(now);
        self.check_handshake_timeouts(now);
        self.check_reboot(now);
        self.load_generator_tick(now, dt);
        self.modules_timer_tick(now, dt);

        self.flush_cluster_updates();
    }

    /// A GAP advertisement report from the scanner.
    ///
    /// `connectable` is part of the report shape the radio layer delivers;
    /// the core does not act on it.
    pub fn handle_adv_report(
        &mut self,
        addr: NodeAddr,
        data: &[u8],
        rssi: i16,
        _connectable: bool,
        now: Timestamp,
    ) {
        if self.config.device_type == DeviceType::Asset {
            return;
        }

        // Foreign AD structures are radio noise, not protocol errors.
        let (network_id, payload) = match crate::wire::decode_join_me(data) {
            Ok(decoded) => decoded,
            Err(_) => return,
        };
        if network_id != self.config.network_id || payload.sender == self.node_id {
            return;
        }

        self.stats.join_me_received += 1;
        log::trace!(
            target: "discovery",
            "JOIN_ME from {}: cluster {:#x} size {} freeIn {} freeOut {} ack {:#x}",
            payload.sender,
            payload.cluster_id,
            payload.cluster_size,
            payload.free_in,
            payload.free_out,
            payload.ack_field
        );

        let ctx = build_score_ctx(
            &self.config,
            now,
            self.cluster_id,
            self.cluster_size,
            self.connected_partner_ids(),
        );
        let outcome = self.candidates.store(addr, payload, rssi, now, &ctx);

        if outcome == crate::candidates::StoreOutcome::UsedEmptySlot {
            self.keep_high_discovery_active(now);
        }

        self.emit_debug(DebugEvent::JoinMeStored {
            sender: payload.sender,
            cluster_id: payload.cluster_id,
            cluster_size: payload.cluster_size,
            rssi,
        });
    }

    /// A link finished establishing at the GAP level.
    pub fn handle_link_up(&mut self, handle: LinkHandle, kind: LinkUpKind, now: Timestamp) {
        match kind {
            LinkUpKind::MeshOutbound => {
                let pending = self.pending_outbound.take();
                let (partner, addr) = pending
                    .map(|p| (p.partner, p.addr))
                    .unwrap_or((NODE_ID_INVALID, [0; 6]));

                let link = MeshLink::new(handle, LinkDirection::Outbound, partner, addr, now);
                if self.links.insert(link).is_none() {
                    self.radio.disconnect(handle, DisconnectReason::Unknown);
                    return;
                }
                self.emit_debug(DebugEvent::HandshakeStarted { handle, partner });
                self.send_hello(handle);
                self.keep_high_discovery_active(now);
            }
            LinkUpKind::MeshInbound => {
                if self.free_mesh_in_connections() == 0 {
                    self.radio.disconnect(handle, DisconnectReason::Unknown);
                    return;
                }
                let link = MeshLink::new(handle, LinkDirection::Inbound, NODE_ID_INVALID, [0; 6], now);
                if self.links.insert(link).is_none() {
                    self.radio.disconnect(handle, DisconnectReason::Unknown);
                    return;
                }
                self.emit_debug(DebugEvent::HandshakeStarted {
                    handle,
                    partner: NODE_ID_INVALID,
                });
                self.keep_high_discovery_active(now);
            }
            LinkUpKind::AccessOutbound => {
                if let Some(access) = self.access_links.iter_mut().find(|a| a.handle == handle) {
                    access.open = true;
                }
            }
            LinkUpKind::AccessInbound { key } => {
                self.access_links.push(AccessLink {
                    handle,
                    outbound: false,
                    open: true,
                    key,
                });
            }
        }
        self.flush_cluster_updates();
    }

    /// A link went down at the radio layer.
    pub fn handle_link_down(&mut self, handle: LinkHandle, reason: DisconnectReason, now: Timestamp) {
        if let Some(link) = self.links.remove(handle) {
            self.handle_link_teardown(link, reason, now);
            self.flush_cluster_updates();
            return;
        }

        if let Some(pos) = self.access_links.iter().position(|a| a.handle == handle) {
            self.access_links.remove(pos);
            self.on_access_link_down(handle);
        }
    }

    /// A mesh message arrived on an established link.
    pub fn handle_mesh_message(&mut self, handle: LinkHandle, data: &[u8], now: Timestamp) {
        let packet = match MeshPacket::decode(data) {
            Ok(p) => p,
            Err(e) => {
                self.stats.malformed_messages += 1;
                log::warn!(target: "node", "dropping malformed message on link {}: {}", handle, e);
                self.emit_debug(DebugEvent::MessageDecodeFailed {
                    data_len: data.len(),
                });
                return;
            }
        };

        if let Some(access) = self.access_links.iter().find(|a| a.handle == handle).copied() {
            self.handle_access_message(access, packet, now);
            self.flush_cluster_updates();
            return;
        }

        if self.links.by_handle(handle).is_none() {
            log::debug!(target: "node", "message on unknown link {}", handle);
            return;
        }

        match packet.payload {
            MeshPayload::Hello(hello) => self.handle_hello(handle, packet.header.sender, hello, now),
            MeshPayload::Ack1(ack1) => self.handle_ack1(handle, packet.header.sender, ack1, now),
            MeshPayload::Ack2(ack2) => self.handle_ack2(handle, ack2, now),
            MeshPayload::InfoUpdate(update) => {
                self.handle_cluster_info_update(handle, packet.header.sender, update, now)
            }
            MeshPayload::Module(module) => {
                let header = packet.header;
                self.handle_module_message(RxPath::Mesh(handle), header, module, now);
            }
        }

        self.flush_cluster_updates();
    }

    /// Messages arriving over access connections: only module actions
    /// authenticated with the network key are admitted, and only in the
    /// direction matching who opened the connection.
    fn handle_access_message(&mut self, access: AccessLink, packet: MeshPacket, now: Timestamp) {
        if !access.open || access.key != KeyId::Network {
            log::warn!(target: "node", "unauthorized access message dropped");
            return;
        }
        let allowed = match packet.header.message_type {
            MessageType::ModuleTriggerAction => !access.outbound,
            MessageType::ModuleActionResponse => access.outbound,
            _ => false,
        };
        if !allowed {
            log::debug!(target: "node", "unexpected message on access link dropped");
            return;
        }
        if let MeshPayload::Module(module) = packet.payload {
            self.handle_module_message(RxPath::Access(access.handle), packet.header, module, now);
        }
    }

    // --- Outbound plumbing ---

    /// Encode and queue a packet on a link.
    pub(crate) fn send_packet(&mut self, link: LinkHandle, packet: &MeshPacket) {
        if self.radio.send(link, &packet.encode()).is_err() {
            log::warn!(target: "node", "radio refused packet on link {}", link);
        }
    }

    /// Tear down one mesh link by local decision.
    ///
    /// The local cluster bookkeeping runs immediately; the peer learns the
    /// reason through its own link-down event.
    pub(crate) fn disconnect_mesh_link(
        &mut self,
        handle: LinkHandle,
        reason: DisconnectReason,
        now: Timestamp,
    ) {
        if let Some(link) = self.links.remove(handle) {
            self.radio.disconnect(handle, reason);
            self.handle_link_teardown(link, reason, now);
        }
    }

    /// Drop every mesh link without per-link heal processing. Used when the
    /// whole cluster membership is being dissolved as one unit.
    pub(crate) fn force_disconnect_all_mesh(&mut self, reason: DisconnectReason, _now: Timestamp) {
        let removed: Vec<MeshLink> = self.links.drain().collect();
        for link in removed {
            self.radio.disconnect(link.handle, reason);
            self.connection_loss_counter = self.connection_loss_counter.wrapping_add(1);
            self.emit_debug(DebugEvent::LinkTeardown {
                partner: link.partner_id,
                reason,
                was_handshaked: link.handshake_done(),
            });
            self.push_event(Event::MeshDisconnected {
                partner: link.partner_id,
                reason,
            });
        }
    }

    /// Deferred-reboot check.
    fn check_reboot(&mut self, now: Timestamp) {
        if let Some((at, reason)) = self.reboot_at {
            if now >= at {
                log::warn!(target: "node", "rebooting ({:?})", reason);
                self.reboot_at = None;
                // Peers must observe the disconnect reason instead of a
                // silent supervision timeout.
                self.force_disconnect_all_mesh(DisconnectReason::Reboot, now);
                self.push_event(Event::RebootRequired { reason });
            }
        }
    }

    /// Abort handshakes that outlived the timeout, including outbound
    /// connects that never reached link-up.
    fn check_handshake_timeouts(&mut self, now: Timestamp) {
        let timeout = self.config.handshake_timeout;

        let expired: Vec<LinkHandle> = self
            .links
            .iter()
            .filter(|l| l.state < LinkState::HandshakeDone)
            .filter(|l| now.saturating_sub(l.created_at) >= timeout)
            .map(|l| l.handle)
            .collect();
        for handle in expired {
            log::debug!(target: "handshake", "handshake timeout on link {}", handle);
            self.disconnect_mesh_link(handle, DisconnectReason::HandshakeTimeout, now);
        }

        if let Some(pending) = self.pending_outbound {
            if now.saturating_sub(pending.since) >= timeout {
                self.pending_outbound = None;
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_new_node_is_isolated() {
        let node = test_node(5);
        assert_eq!(node.cluster_size(), 1);
        assert_eq!(node.link_count(), 0);
        assert_eq!(node.hops_to_sink(), -1);
        assert!(node.has_all_master_bits());
        assert_eq!(node.discovery_state(), DiscoveryState::High);
    }

    #[test]
    fn test_cluster_id_embeds_node_id() {
        let node = test_node(0x00A7);
        assert_eq!(node.cluster_id() & 0xFFFF, 0x00A7);
        assert_ne!(node.cluster_id() >> 16, 0, "incarnation nonce present");
    }

    #[test]
    fn test_adv_report_fills_candidate_buffer() {
        let mut node = test_node(1);
        let data = sample_join_me(2, 0x0BB0_0002, 1);
        node.handle_adv_report([2; 6], &data, -60, true, Timestamp::from_millis(10));

        assert_eq!(node.stats().join_me_received, 1);
        assert_eq!(node.candidates.len(), 1);
    }

    #[test]
    fn test_adv_report_drops_foreign_network() {
        let mut node = test_node(1);
        let payload = crate::types::JoinMePayload {
            sender: 2,
            cluster_id: 7,
            cluster_size: 1,
            free_in: 1,
            free_out: 1,
            battery_runtime: 0,
            tx_power: 0,
            device_type: DeviceType::Static,
            hops_to_sink: -1,
            mesh_write_handle: 0x12,
            ack_field: 0,
        };
        let data = crate::wire::encode_join_me(99, &payload);
        node.handle_adv_report([2; 6], &data, -60, true, Timestamp::from_millis(10));
        assert_eq!(node.candidates.len(), 0);
    }

    #[test]
    fn test_free_slot_accounting() {
        let mut node = test_node(1);
        assert_eq!(node.free_mesh_in_connections(), 2);
        assert_eq!(node.free_mesh_out_connections(), 2);

        install_link(&mut node, 1, 2, LinkDirection::Outbound, 1, true);
        install_link(&mut node, 2, 3, LinkDirection::Inbound, 1, true);
        assert_eq!(node.free_mesh_in_connections(), 1);
        assert_eq!(node.free_mesh_out_connections(), 1);

        node.pending_outbound = Some(PendingConnect {
            partner: 9,
            addr: [9; 6],
            since: Timestamp::ZERO,
        });
        assert_eq!(node.free_mesh_out_connections(), 0);
    }

    #[test]
    fn test_hops_oracle() {
        let mut node = test_node(1);
        install_link(&mut node, 1, 2, LinkDirection::Outbound, 1, true);
        install_link(&mut node, 2, 3, LinkDirection::Inbound, 1, true);
        node.links.by_handle_mut(1).unwrap().hops_to_sink = 3;
        node.links.by_handle_mut(2).unwrap().hops_to_sink = 2;

        assert_eq!(node.hops_to_sink(), 2);
        assert_eq!(node.hops_to_sink_excluding(Some(2)), 3);

        let mut config = NodeConfig::default();
        config.device_type = DeviceType::Sink;
        let sink = test_node_with_config(4, config);
        assert_eq!(sink.hops_to_sink(), 0);
    }

    #[test]
    fn test_malformed_mesh_message_counted() {
        let mut node = test_node(1);
        install_link(&mut node, 1, 2, LinkDirection::Outbound, 1, true);
        node.handle_mesh_message(1, &[0xEE, 1, 2], Timestamp::from_millis(5));
        assert_eq!(node.stats().malformed_messages, 1);
        // State untouched
        assert_eq!(node.cluster_size(), 2);
    }

    #[test]
    fn test_inbound_link_rejected_when_full() {
        let mut config = NodeConfig::default();
        config.max_in_links = 0;
        let mut node = test_node_with_config(1, config);

        node.handle_link_up(7, LinkUpKind::MeshInbound, Timestamp::from_millis(1));
        assert_eq!(node.link_count(), 0);
        let commands = node.radio_mut().take_commands();
        assert!(commands
            .iter()
            .any(|c| matches!(c, crate::traits::test_impls::RadioCommand::Disconnect { link: 7, .. })));
    }
}
