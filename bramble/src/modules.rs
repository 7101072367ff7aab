//! Module registry and NODE control messages.
//!
//! Application modules sit atop the core's delivery layer and interact with
//! it only through a minimal capability set: mesh message delivery, cluster
//! change notification, timer ticks and capability enumeration. Modules are
//! stored behind handles in a fixed-size table and send through an outbox
//! that the node drains after each dispatch, so no module ever re-enters
//! the core.
//!
//! The NODE module itself (discovery control, ping, load generation, reset,
//! emergency disconnect, preferred connections) is handled by the core.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::time::{Duration, Timestamp};
use crate::traits::{Radio, Random};
use crate::types::{
    ClusterId, ClusterSize, DiscoveryState, Error, LinkHandle, NodeId, PacketHeader, RebootReason,
    EmergencyCode, GENERATE_LOAD_MAGIC, MAX_MODULES, NODE_ID_BROADCAST, NODE_ID_HOPS_BASE,
    NODE_ID_HOPS_END,
};
use crate::wire::{MeshPacket, MeshPayload, ModuleMessage};
use crate::Node;

/// Module identifier carried in module messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleId(pub u8);

impl ModuleId {
    /// The mesh formation core itself.
    pub const NODE: ModuleId = ModuleId(0);
}

/// Action types of the NODE module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeAction {
    SetDiscovery = 0,
    ResetNode = 1,
    EmergencyDisconnect = 2,
    SetPreferredConnections = 3,
    Ping = 4,
    StartGenerateLoad = 5,
    GenerateLoadChunk = 6,
}

impl NodeAction {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(NodeAction::SetDiscovery),
            1 => Some(NodeAction::ResetNode),
            2 => Some(NodeAction::EmergencyDisconnect),
            3 => Some(NodeAction::SetPreferredConnections),
            4 => Some(NodeAction::Ping),
            5 => Some(NodeAction::StartGenerateLoad),
            6 => Some(NodeAction::GenerateLoadChunk),
            _ => None,
        }
    }
}

/// Where an inbound message entered the node; replies go back the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RxPath {
    /// A mesh link; replies are routed through the mesh.
    Mesh(LinkHandle),
    /// An out-of-band access connection; replies stay on it.
    Access(LinkHandle),
    /// Generated locally (loopback).
    Local,
}

/// One capability entry a module exposes for enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityEntry {
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub revision: &'static str,
}

/// A message a module wants sent, queued through its outbox.
#[derive(Debug, Clone)]
pub struct OutboundModuleMessage {
    pub receiver: NodeId,
    pub module_id: ModuleId,
    pub action_type: u8,
    pub request_handle: u8,
    pub payload: Vec<u8>,
    pub response: bool,
}

/// Send queue handed to a module during dispatch.
#[derive(Default)]
pub struct ModuleOutbox {
    messages: Vec<OutboundModuleMessage>,
}

impl ModuleOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an action message.
    pub fn send(&mut self, message: OutboundModuleMessage) {
        self.messages.push(message);
    }
}

/// The minimal surface an application module implements.
pub trait MeshModule {
    fn module_id(&self) -> ModuleId;

    /// A module message addressed to this module arrived.
    fn on_mesh_message(
        &mut self,
        outbox: &mut ModuleOutbox,
        header: &PacketHeader,
        message: &ModuleMessage,
    );

    /// Cluster membership changed.
    fn on_cluster_change(&mut self, _cluster_id: ClusterId, _cluster_size: ClusterSize) {}

    /// Periodic tick.
    fn on_timer_tick(&mut self, _outbox: &mut ModuleOutbox, _now: Timestamp, _dt: Duration) {}

    /// Enumerate capabilities; `None` ends the enumeration.
    fn capability(&self, _index: u32) -> Option<CapabilityEntry> {
        None
    }
}

/// Fixed-size table of registered modules.
pub struct ModuleTable {
    modules: Vec<Box<dyn MeshModule>>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    fn register(&mut self, module: Box<dyn MeshModule>) -> Result<(), Error> {
        if self.modules.len() >= MAX_MODULES {
            return Err(Error::TooManyModules);
        }
        self.modules.push(module);
        Ok(())
    }

    fn by_id_mut(&mut self, id: u8) -> Option<&mut Box<dyn MeshModule>> {
        self.modules.iter_mut().find(|m| m.module_id().0 == id)
    }
}

impl Default for ModuleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Timed GENERATE_LOAD_CHUNK emission state.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoadGenerator {
    pub target: NodeId,
    pub payload_size: u8,
    pub messages_left: u8,
    pub interval: Duration,
    pub since_last: Duration,
    pub request_handle: u8,
}

impl<R, Rn> Node<R, Rn>
where
    R: Radio,
    Rn: Random,
{
    /// Register an application module.
    pub fn register_module(&mut self, module: Box<dyn MeshModule>) -> Result<(), Error> {
        self.modules.register(module)
    }

    /// Tell every module about a membership change.
    pub(crate) fn notify_cluster_change(&mut self) {
        let cluster_id = self.cluster_id;
        let cluster_size = self.cluster_size;
        for module in self.modules.modules.iter_mut() {
            module.on_cluster_change(cluster_id, cluster_size);
        }
    }

    /// Tick every module and route what they queued.
    pub(crate) fn modules_timer_tick(&mut self, now: Timestamp, dt: Duration) {
        let mut outbox = ModuleOutbox::new();
        for module in self.modules.modules.iter_mut() {
            module.on_timer_tick(&mut outbox, now, dt);
        }
        self.drain_outbox(outbox);
    }

    fn drain_outbox(&mut self, outbox: ModuleOutbox) {
        for out in outbox.messages {
            let message = ModuleMessage {
                module_id: out.module_id.0,
                request_handle: out.request_handle,
                action_type: out.action_type,
                payload: out.payload,
            };
            self.route_module_message(out.receiver, message, out.response, None);
        }
    }

    /// Flood a module message toward its receiver. The tree topology keeps
    /// flooding loop-free; `exclude` suppresses the echo to the inbound
    /// link.
    pub(crate) fn route_module_message(
        &mut self,
        receiver: NodeId,
        message: ModuleMessage,
        response: bool,
        exclude: Option<LinkHandle>,
    ) {
        let packet = MeshPacket::new(self.node_id, receiver, MeshPayload::Module(message), response);
        let bytes = packet.encode();

        let targets: Vec<LinkHandle> = self
            .links
            .handshaked()
            .filter(|l| Some(l.handle) != exclude)
            .map(|l| l.handle)
            .collect();
        for handle in targets {
            if self.radio.send(handle, &bytes).is_err() {
                log::warn!(target: "node", "radio refused module message on link {}", handle);
            }
        }
    }

    /// Build and route a NODE action message; broadcast and self-addressed
    /// messages are also dispatched locally.
    pub(crate) fn send_node_action(
        &mut self,
        receiver: NodeId,
        action: NodeAction,
        request_handle: u8,
        payload: &[u8],
        now: Timestamp,
    ) {
        let message = ModuleMessage {
            module_id: ModuleId::NODE.0,
            request_handle,
            action_type: action as u8,
            payload: payload.to_vec(),
        };
        self.route_module_message(receiver, message.clone(), false, None);

        if receiver == self.node_id || receiver == NODE_ID_BROADCAST {
            let header = PacketHeader {
                message_type: crate::types::MessageType::ModuleTriggerAction,
                sender: self.node_id,
                receiver,
            };
            self.dispatch_node_trigger(RxPath::Local, header, &message, now);
        }
    }

    /// Send an action over a specific path (access connection).
    pub(crate) fn send_module_action_on(
        &mut self,
        path: RxPath,
        action: NodeAction,
        request_handle: u8,
        payload: &[u8],
        response: bool,
    ) {
        let message = ModuleMessage {
            module_id: ModuleId::NODE.0,
            request_handle,
            action_type: action as u8,
            payload: payload.to_vec(),
        };
        match path {
            RxPath::Access(handle) => {
                let packet = MeshPacket::new(
                    self.node_id,
                    crate::types::NODE_ID_INVALID,
                    MeshPayload::Module(message),
                    response,
                );
                self.send_packet(handle, &packet);
            }
            RxPath::Mesh(_) | RxPath::Local => {
                self.route_module_message(crate::types::NODE_ID_BROADCAST, message, response, None);
            }
        }
    }

    /// Send a response along the path its request came from.
    pub(crate) fn send_module_response_on(
        &mut self,
        path: RxPath,
        receiver: NodeId,
        action: NodeAction,
        request_handle: u8,
        payload: &[u8],
    ) {
        let message = ModuleMessage {
            module_id: ModuleId::NODE.0,
            request_handle,
            action_type: action as u8,
            payload: payload.to_vec(),
        };
        match path {
            RxPath::Access(handle) => {
                let packet =
                    MeshPacket::new(self.node_id, receiver, MeshPayload::Module(message), true);
                self.send_packet(handle, &packet);
            }
            // A response originates here; it floods toward the requester
            // like any other unicast, including the link it came in on.
            RxPath::Mesh(_) => {
                self.route_module_message(receiver, message, true, None);
            }
            RxPath::Local => {
                log::debug!(target: "node", "local module response: {:?}", action);
            }
        }
    }

    /// Entry point for inbound module messages: forward along the tree,
    /// then dispatch locally when addressed to us.
    pub(crate) fn handle_module_message(
        &mut self,
        path: RxPath,
        header: PacketHeader,
        message: ModuleMessage,
        now: Timestamp,
    ) {
        let receiver = header.receiver;
        let hop_limited = (NODE_ID_HOPS_BASE..NODE_ID_HOPS_END).contains(&receiver);
        // Access connections are point-to-point: whatever arrives there is
        // meant for us, whatever the receiver field says.
        let local = matches!(path, RxPath::Access(_))
            || receiver == self.node_id
            || receiver == NODE_ID_BROADCAST
            || hop_limited;

        // Forwarding only applies to mesh traffic, never to access links.
        if let RxPath::Mesh(in_handle) = path {
            if receiver != self.node_id {
                let forwarded_receiver = if hop_limited {
                    let remaining = receiver - NODE_ID_HOPS_BASE;
                    (remaining > 1).then(|| NODE_ID_HOPS_BASE + remaining - 1)
                } else {
                    Some(receiver)
                };
                if let Some(fwd) = forwarded_receiver {
                    let response = header.message_type
                        == crate::types::MessageType::ModuleActionResponse;
                    self.route_module_message(fwd, message.clone(), response, Some(in_handle));
                }
            }
        }

        if !local {
            return;
        }

        if message.module_id == ModuleId::NODE.0 {
            match header.message_type {
                crate::types::MessageType::ModuleTriggerAction => {
                    self.dispatch_node_trigger(path, header, &message, now)
                }
                crate::types::MessageType::ModuleActionResponse => {
                    self.dispatch_node_response(&message)
                }
                _ => {}
            }
            return;
        }

        // Application modules
        let mut outbox = ModuleOutbox::new();
        if let Some(module) = self.modules.by_id_mut(message.module_id) {
            module.on_mesh_message(&mut outbox, &header, &message);
        } else {
            log::debug!(
                target: "node",
                "message for unregistered module {}",
                message.module_id
            );
        }
        self.drain_outbox(outbox);
    }

    fn dispatch_node_trigger(
        &mut self,
        path: RxPath,
        header: PacketHeader,
        message: &ModuleMessage,
        now: Timestamp,
    ) {
        let Some(action) = NodeAction::from_u8(message.action_type) else {
            self.stats.malformed_messages += 1;
            return;
        };

        match action {
            NodeAction::SetDiscovery => {
                let Some(&state) = message.payload.first() else {
                    self.stats.malformed_messages += 1;
                    return;
                };
                let new = if state == 0 {
                    DiscoveryState::Off
                } else {
                    DiscoveryState::High
                };
                self.change_discovery_state(new, now);
                self.send_module_response_on(
                    path,
                    header.sender,
                    NodeAction::SetDiscovery,
                    message.request_handle,
                    &[],
                );
            }
            NodeAction::Ping => {
                self.send_module_response_on(
                    path,
                    header.sender,
                    NodeAction::Ping,
                    message.request_handle,
                    &[],
                );
            }
            NodeAction::ResetNode => {
                let Some(&seconds) = message.payload.first() else {
                    self.stats.malformed_messages += 1;
                    return;
                };
                log::warn!(target: "node", "scheduled reboot in {} seconds", seconds);
                self.schedule_reboot(
                    now + Duration::from_secs(seconds as u64),
                    RebootReason::RemoteReset,
                );
            }
            NodeAction::StartGenerateLoad => {
                if message.payload.len() < 5 {
                    self.stats.malformed_messages += 1;
                    return;
                }
                let target = u16::from_le_bytes([message.payload[0], message.payload[1]]);
                let generator = LoadGenerator {
                    target,
                    payload_size: message.payload[2],
                    messages_left: message.payload[3],
                    interval: Duration::from_millis(message.payload[4] as u64 * 100),
                    since_last: Duration::ZERO,
                    request_handle: message.request_handle,
                };
                log::debug!(
                    target: "node",
                    "generating load: target {} size {} amount {}",
                    generator.target,
                    generator.payload_size,
                    generator.messages_left
                );
                self.load_gen = Some(generator);
                self.send_module_response_on(
                    path,
                    header.sender,
                    NodeAction::StartGenerateLoad,
                    message.request_handle,
                    &[],
                );
            }
            NodeAction::GenerateLoadChunk => {
                let payload_correct = message.payload.iter().all(|&b| b == GENERATE_LOAD_MAGIC);
                log::info!(
                    target: "node",
                    "generate_load_chunk from {}: {} bytes, correct {}",
                    header.sender,
                    message.payload.len(),
                    payload_correct
                );
                if !payload_correct {
                    self.stats.malformed_messages += 1;
                }
            }
            NodeAction::EmergencyDisconnect => {
                self.handle_emergency_action(path, header.sender, message.request_handle, now);
            }
            NodeAction::SetPreferredConnections => {
                if self.apply_preferred_connections(&message.payload) {
                    self.send_module_response_on(
                        path,
                        header.sender,
                        NodeAction::SetPreferredConnections,
                        message.request_handle,
                        &[],
                    );
                } else {
                    self.stats.malformed_messages += 1;
                }
            }
        }
    }

    fn dispatch_node_response(&mut self, message: &ModuleMessage) {
        let Some(action) = NodeAction::from_u8(message.action_type) else {
            return;
        };
        match action {
            NodeAction::EmergencyDisconnect => {
                let Some(code) = message
                    .payload
                    .first()
                    .and_then(|&b| EmergencyCode::from_u8(b).ok())
                else {
                    self.stats.malformed_messages += 1;
                    return;
                };
                self.handle_emergency_response(code);
            }
            other => {
                log::debug!(target: "node", "module response: {:?}", other);
            }
        }
    }

    /// Payload: `[mode, count, partner_id_0 (2 LE), partner_id_1, ...]`.
    fn apply_preferred_connections(&mut self, payload: &[u8]) -> bool {
        if payload.len() < 2 {
            return false;
        }
        let mode = match payload[0] {
            0 => crate::config::PreferredMode::Penalty,
            1 => crate::config::PreferredMode::Ignored,
            _ => return false,
        };
        let count = payload[1] as usize;
        if payload.len() != 2 + count * 2 {
            return false;
        }

        let mut partners = Vec::with_capacity(count);
        for i in 0..count {
            let offset = 2 + i * 2;
            partners.push(u16::from_le_bytes([payload[offset], payload[offset + 1]]));
        }

        let applied = self.config.set_preferred(mode, &partners);
        if applied {
            log::debug!(
                target: "node",
                "preferred connections updated: {:?} partners {:?}",
                mode,
                partners
            );
        }
        applied
    }

    /// Emit pending GENERATE_LOAD_CHUNK messages.
    pub(crate) fn load_generator_tick(&mut self, _now: Timestamp, dt: Duration) {
        let Some(mut generator) = self.load_gen.take() else {
            return;
        };

        generator.since_last = generator.since_last.saturating_add(dt);
        while generator.since_last >= generator.interval && generator.messages_left > 0 {
            generator.since_last = generator.since_last.saturating_sub(generator.interval);
            generator.messages_left -= 1;

            let payload = alloc::vec![GENERATE_LOAD_MAGIC; generator.payload_size as usize];
            let message = ModuleMessage {
                module_id: ModuleId::NODE.0,
                request_handle: generator.request_handle,
                action_type: NodeAction::GenerateLoadChunk as u8,
                payload,
            };
            self.route_module_message(generator.target, message, false, None);
        }

        if generator.messages_left > 0 {
            self.load_gen = Some(generator);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::LinkDirection;
    use crate::node::test_support::*;
    use crate::types::MessageType;

    fn node_trigger(
        sender: NodeId,
        receiver: NodeId,
        action: NodeAction,
        request_handle: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        MeshPacket::new(
            sender,
            receiver,
            MeshPayload::Module(ModuleMessage {
                module_id: ModuleId::NODE.0,
                request_handle,
                action_type: action as u8,
                payload: payload.to_vec(),
            }),
            false,
        )
        .encode()
    }

    fn sent_module_messages(node: &mut TestNode, link: LinkHandle) -> Vec<(PacketHeader, ModuleMessage)> {
        node.radio_mut()
            .sent_on(link)
            .iter()
            .filter_map(|d| match MeshPacket::decode(d) {
                Ok(MeshPacket {
                    header,
                    payload: MeshPayload::Module(m),
                }) => Some((header, m)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_ping_replies() {
        let mut node = test_node(1);
        install_link(&mut node, 7, 2, LinkDirection::Inbound, 1, true);
        node.radio_mut().take_commands();

        let data = node_trigger(2, 1, NodeAction::Ping, 9, &[]);
        node.handle_mesh_message(7, &data, Timestamp::from_millis(10));

        let replies = sent_module_messages(&mut node, 7);
        assert_eq!(replies.len(), 1);
        let (header, reply) = &replies[0];
        assert_eq!(header.message_type, MessageType::ModuleActionResponse);
        assert_eq!(header.receiver, 2);
        assert_eq!(reply.action_type, NodeAction::Ping as u8);
        assert_eq!(reply.request_handle, 9);
    }

    #[test]
    fn test_set_discovery_off() {
        let mut node = test_node(1);
        install_link(&mut node, 7, 2, LinkDirection::Inbound, 1, true);

        let data = node_trigger(2, 1, NodeAction::SetDiscovery, 0, &[0]);
        node.handle_mesh_message(7, &data, Timestamp::from_millis(10));
        assert_eq!(node.discovery_state(), DiscoveryState::Off);

        let data = node_trigger(2, 1, NodeAction::SetDiscovery, 0, &[1]);
        node.handle_mesh_message(7, &data, Timestamp::from_millis(20));
        assert_eq!(node.discovery_state(), DiscoveryState::High);
    }

    #[test]
    fn test_broadcast_forwarded_and_handled() {
        let mut node = test_node(1);
        install_link(&mut node, 7, 2, LinkDirection::Inbound, 1, true);
        install_link(&mut node, 8, 3, LinkDirection::Outbound, 1, true);
        node.radio_mut().take_commands();

        let data = node_trigger(2, NODE_ID_BROADCAST, NodeAction::SetDiscovery, 0, &[0]);
        node.handle_mesh_message(7, &data, Timestamp::from_millis(10));

        // Handled locally...
        assert_eq!(node.discovery_state(), DiscoveryState::Off);
        // ...and forwarded to the other link but not echoed back.
        let on_8 = sent_module_messages(&mut node, 8);
        assert!(on_8
            .iter()
            .any(|(h, m)| h.receiver == NODE_ID_BROADCAST
                && m.action_type == NodeAction::SetDiscovery as u8));
    }

    #[test]
    fn test_unicast_for_other_node_forwarded_not_handled() {
        let mut node = test_node(1);
        install_link(&mut node, 7, 2, LinkDirection::Inbound, 1, true);
        install_link(&mut node, 8, 3, LinkDirection::Outbound, 1, true);
        node.radio_mut().take_commands();

        let data = node_trigger(2, 99, NodeAction::SetDiscovery, 0, &[0]);
        node.handle_mesh_message(7, &data, Timestamp::from_millis(10));

        assert_ne!(node.discovery_state(), DiscoveryState::Off);
        assert_eq!(sent_module_messages(&mut node, 8).len(), 1);
    }

    #[test]
    fn test_hop_limited_broadcast_decrements() {
        let mut node = test_node(1);
        install_link(&mut node, 7, 2, LinkDirection::Inbound, 1, true);
        install_link(&mut node, 8, 3, LinkDirection::Outbound, 1, true);
        node.radio_mut().take_commands();

        let receiver = NODE_ID_HOPS_BASE + 2;
        let data = node_trigger(2, receiver, NodeAction::SetDiscovery, 0, &[0]);
        node.handle_mesh_message(7, &data, Timestamp::from_millis(10));

        // Handled locally and forwarded with one hop less.
        assert_eq!(node.discovery_state(), DiscoveryState::Off);
        let on_8 = sent_module_messages(&mut node, 8);
        assert_eq!(on_8.len(), 1);
        assert_eq!(on_8[0].0.receiver, NODE_ID_HOPS_BASE + 1);

        // A message with one hop left is consumed, not forwarded.
        node.radio_mut().take_commands();
        let data = node_trigger(2, NODE_ID_HOPS_BASE + 1, NodeAction::Ping, 0, &[]);
        node.handle_mesh_message(7, &data, Timestamp::from_millis(20));
        let on_8: Vec<_> = sent_module_messages(&mut node, 8)
            .into_iter()
            .filter(|(h, _)| h.message_type == MessageType::ModuleTriggerAction)
            .collect();
        assert!(on_8.is_empty());
    }

    #[test]
    fn test_generate_load_emits_chunks() {
        let mut node = test_node(1);
        install_link(&mut node, 7, 2, LinkDirection::Inbound, 1, true);
        node.radio_mut().take_commands();

        // target=2, size=4, amount=3, interval=1ds
        let data = node_trigger(2, 1, NodeAction::StartGenerateLoad, 5, &[2, 0, 4, 3, 1]);
        node.handle_mesh_message(7, &data, Timestamp::from_millis(10));
        assert!(node.load_gen.is_some());
        node.radio_mut().take_commands();

        for i in 0..3u64 {
            node.handle_timer(
                Timestamp::from_millis(200 + i * 100),
                Duration::from_millis(100),
            );
        }

        let chunks: Vec<_> = sent_module_messages(&mut node, 7)
            .into_iter()
            .filter(|(_, m)| m.action_type == NodeAction::GenerateLoadChunk as u8)
            .collect();
        assert_eq!(chunks.len(), 3);
        for (_, chunk) in &chunks {
            assert_eq!(chunk.payload, alloc::vec![GENERATE_LOAD_MAGIC; 4]);
            assert_eq!(chunk.request_handle, 5);
        }
        assert!(node.load_gen.is_none());
    }

    #[test]
    fn test_set_preferred_connections() {
        let mut node = test_node(1);
        install_link(&mut node, 7, 2, LinkDirection::Inbound, 1, true);

        // mode=ignored, two partners: 5 and 6
        let data = node_trigger(
            2,
            1,
            NodeAction::SetPreferredConnections,
            0,
            &[1, 2, 5, 0, 6, 0],
        );
        node.handle_mesh_message(7, &data, Timestamp::from_millis(10));

        assert_eq!(
            node.config().preferred_mode,
            crate::config::PreferredMode::Ignored
        );
        assert!(node.config().is_preferred(5));
        assert!(!node.config().is_preferred(9));

        // Truncated payload is rejected without touching config.
        let malformed = node_trigger(2, 1, NodeAction::SetPreferredConnections, 0, &[1, 3, 5, 0]);
        node.handle_mesh_message(7, &malformed, Timestamp::from_millis(20));
        assert_eq!(node.stats().malformed_messages, 1);
        assert!(node.config().is_preferred(5));
    }

    #[test]
    fn test_reset_node_schedules_reboot() {
        let mut node = test_node(1);
        install_link(&mut node, 7, 2, LinkDirection::Inbound, 1, true);

        let data = node_trigger(2, 1, NodeAction::ResetNode, 0, &[2]);
        node.handle_mesh_message(7, &data, Timestamp::from_secs(1));
        assert!(node.reboot_at.is_some());

        node.handle_timer(Timestamp::from_secs(4), Duration::from_millis(100));
        assert_eq!(node.link_count(), 0);
        let events: Vec<_> = core::iter::from_fn(|| node.poll_event()).collect();
        assert!(events.iter().any(|e| matches!(
            e,
            crate::types::Event::RebootRequired {
                reason: RebootReason::RemoteReset
            }
        )));
    }

    struct EchoModule {
        seen: usize,
    }

    impl MeshModule for EchoModule {
        fn module_id(&self) -> ModuleId {
            ModuleId(7)
        }

        fn on_mesh_message(
            &mut self,
            outbox: &mut ModuleOutbox,
            header: &PacketHeader,
            message: &ModuleMessage,
        ) {
            self.seen += 1;
            outbox.send(OutboundModuleMessage {
                receiver: header.sender,
                module_id: self.module_id(),
                action_type: message.action_type,
                request_handle: message.request_handle,
                payload: message.payload.clone(),
                response: true,
            });
        }
    }

    #[test]
    fn test_custom_module_dispatch_and_outbox() {
        let mut node = test_node(1);
        install_link(&mut node, 7, 2, LinkDirection::Inbound, 1, true);
        node.register_module(Box::new(EchoModule { seen: 0 })).unwrap();
        node.radio_mut().take_commands();

        let data = MeshPacket::new(
            2,
            1,
            MeshPayload::Module(ModuleMessage {
                module_id: 7,
                request_handle: 1,
                action_type: 0,
                payload: alloc::vec![0xAB],
            }),
            false,
        )
        .encode();
        node.handle_mesh_message(7, &data, Timestamp::from_millis(10));

        let replies = sent_module_messages(&mut node, 7);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1.module_id, 7);
        assert_eq!(replies[0].1.payload, alloc::vec![0xAB]);
        assert_eq!(replies[0].0.message_type, MessageType::ModuleActionResponse);
    }
}
