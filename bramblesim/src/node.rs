//! SimNode wrapper and the simulated radio backend.

use std::sync::{Arc, Mutex};

use bramble::keys::KeyId;
use bramble::traits::test_impls::MockRandom;
use bramble::traits::{AdvJob, AdvJobHandle, AdvJobKind, Radio, RadioError, ScanConfig};
use bramble::{
    DebugEmitter, DebugEvent, DisconnectReason, Duration, Event, KeyStore, LinkHandle, Node,
    NodeAddr, NodeConfig, NodeId, NodeStats, Timestamp,
};

/// Debug emitter that collects protocol trace events into a shared Vec.
///
/// # Simulation Only
///
/// Uses `std::sync::Mutex`, which can block; intended for test harnesses,
/// not for embedded deployment.
pub struct VecEmitter {
    events: Arc<Mutex<Vec<DebugEvent>>>,
}

impl VecEmitter {
    pub fn new(events: Arc<Mutex<Vec<DebugEvent>>>) -> Self {
        Self { events }
    }
}

impl DebugEmitter for VecEmitter {
    fn emit(&mut self, event: DebugEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Handle of the scheduled beacon job inside [`SimRadio`].
const SCHEDULED_JOB: AdvJobHandle = 1;

/// Commands the core issued to the simulated radio.
#[derive(Debug, Clone)]
pub enum SimCommand {
    Connect {
        partner: NodeId,
        addr: NodeAddr,
        interval: Duration,
    },
    ConnectAccess {
        addr: NodeAddr,
        handle: LinkHandle,
        key: KeyId,
    },
    Send {
        link: LinkHandle,
        data: Vec<u8>,
    },
    Disconnect {
        link: LinkHandle,
        reason: DisconnectReason,
    },
}

/// Current state of the scheduled advertising job.
#[derive(Debug, Clone)]
pub struct AdvState {
    pub interval: Duration,
    pub slots: u8,
    pub payload: Vec<u8>,
}

/// Radio backend that records commands for the simulation engine.
#[derive(Default)]
pub struct SimRadio {
    commands: Vec<SimCommand>,
    adv: Option<AdvState>,
    scanning: bool,
    next_handle: u16,
    next_job: AdvJobHandle,
}

impl SimRadio {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            adv: None,
            scanning: false,
            next_handle: 1,
            next_job: SCHEDULED_JOB,
        }
    }

    /// Allocate a fresh link handle. The engine also calls this when a
    /// peer-initiated connection reaches this node.
    pub fn alloc_handle(&mut self) -> LinkHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    pub fn take_commands(&mut self) -> Vec<SimCommand> {
        std::mem::take(&mut self.commands)
    }

    /// The beacon payload currently on air, if advertising at all.
    pub fn advertising(&self) -> Option<&AdvState> {
        self.adv.as_ref().filter(|a| a.slots > 0)
    }

    pub fn scanning(&self) -> bool {
        self.scanning
    }
}

impl Radio for SimRadio {
    fn adv_job_add(&mut self, job: AdvJob) -> Option<AdvJobHandle> {
        let handle = self.next_job;
        self.next_job += 1;
        // Immediate burst jobs share the scheduled payload; the coarse
        // advertisement cadence of the sim already covers them.
        if job.kind == AdvJobKind::Scheduled {
            self.adv = Some(AdvState {
                interval: job.interval,
                slots: job.slots,
                payload: job.payload,
            });
        }
        Some(handle)
    }

    fn adv_job_refresh(&mut self, handle: AdvJobHandle, job: &AdvJob) {
        if handle == SCHEDULED_JOB {
            self.adv = Some(AdvState {
                interval: job.interval,
                slots: job.slots,
                payload: job.payload.clone(),
            });
        }
    }

    fn adv_job_remove(&mut self, handle: AdvJobHandle) {
        if handle == SCHEDULED_JOB {
            self.adv = None;
        }
    }

    fn scan_start(&mut self, _config: ScanConfig) {
        self.scanning = true;
    }

    fn scan_stop(&mut self) {
        self.scanning = false;
    }

    fn connect_as_master(
        &mut self,
        partner: NodeId,
        addr: &NodeAddr,
        _write_handle: u16,
        interval: Duration,
    ) -> Result<(), RadioError> {
        self.commands.push(SimCommand::Connect {
            partner,
            addr: *addr,
            interval,
        });
        Ok(())
    }

    fn connect_access(&mut self, addr: &NodeAddr, key: KeyId) -> Result<LinkHandle, RadioError> {
        let handle = self.alloc_handle();
        self.commands.push(SimCommand::ConnectAccess {
            addr: *addr,
            handle,
            key,
        });
        Ok(handle)
    }

    fn send(&mut self, link: LinkHandle, data: &[u8]) -> Result<(), RadioError> {
        self.commands.push(SimCommand::Send {
            link,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn disconnect(&mut self, link: LinkHandle, reason: DisconnectReason) {
        self.commands.push(SimCommand::Disconnect { link, reason });
    }
}

/// A protocol node under simulation.
pub struct SimNode {
    inner: Node<SimRadio, MockRandom>,
    /// Application events drained after every handler call.
    events: Vec<Event>,
}

impl SimNode {
    pub fn new(node_id: NodeId, config: NodeConfig, seed: u64, now: Timestamp) -> Self {
        let mut inner = Node::new(
            SimRadio::new(),
            MockRandom::with_seed(seed),
            config,
            KeyStore::unset(),
            node_id,
        );
        inner.start(now);
        Self {
            inner,
            events: Vec::new(),
        }
    }

    pub fn inner(&self) -> &Node<SimRadio, MockRandom> {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Node<SimRadio, MockRandom> {
        &mut self.inner
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node_id()
    }

    pub fn cluster_id(&self) -> u32 {
        self.inner.cluster_id()
    }

    pub fn cluster_size(&self) -> i16 {
        self.inner.cluster_size()
    }

    pub fn hops_to_sink(&self) -> i16 {
        self.inner.hops_to_sink()
    }

    pub fn has_all_master_bits(&self) -> bool {
        self.inner.has_all_master_bits()
    }

    pub fn stats(&self) -> &NodeStats {
        self.inner.stats()
    }

    pub fn advertising(&self) -> Option<AdvState> {
        self.inner.radio().advertising().cloned()
    }

    pub fn scanning(&self) -> bool {
        self.inner.radio().scanning()
    }

    pub fn alloc_handle(&mut self) -> LinkHandle {
        self.inner.radio_mut().alloc_handle()
    }

    /// Drain radio commands and park application events.
    pub fn take_commands(&mut self) -> Vec<SimCommand> {
        while let Some(event) = self.inner.poll_event() {
            self.events.push(event);
        }
        self.inner.radio_mut().take_commands()
    }

    /// Application events collected so far.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Install a debug emitter; subsequent protocol decisions are traced.
    pub fn trace_into(&mut self, events: Arc<Mutex<Vec<DebugEvent>>>) {
        self.inner.set_debug_emitter(Box::new(VecEmitter::new(events)));
    }
}
