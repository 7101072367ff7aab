//! Platform abstraction traits.
//!
//! The core never blocks: every radio operation is issued as an
//! asynchronous job and its completion arrives as a later call into one of
//! the [`crate::Node`] event handlers. This keeps the protocol usable from
//! an embedded executor, an interrupt-driven main loop, or a deterministic
//! simulator.

use core::fmt::Debug;

use alloc::vec::Vec;

use crate::keys::KeyId;
use crate::time::Duration;
use crate::types::{DisconnectReason, LinkHandle, NodeAddr, NodeId};

/// Handle for a registered advertising job.
pub type AdvJobHandle = u8;

/// Scanning duty mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Scan requests are sent; used in HIGH discovery.
    Active,
    /// Listen only; used in LOW discovery.
    Passive,
}

/// Parameters of a scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    pub mode: ScanMode,
    pub interval: Duration,
    pub window: Duration,
}

/// Scheduling class of an advertising job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvJobKind {
    /// Regular slot-scheduled job.
    Scheduled,
    /// One-shot burst that runs until its slots are used up.
    Immediate,
}

/// An advertising job owned by the core and executed by the radio layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvJob {
    pub kind: AdvJobKind,
    pub interval: Duration,
    /// Scheduler slots; 0 suspends the job.
    pub slots: u8,
    pub payload: Vec<u8>,
}

/// Errors surfaced synchronously by the radio layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// Too many concurrent jobs or connections.
    Busy,
    /// Parameters out of range for this platform.
    InvalidParam,
    /// Unrecoverable radio fault; the core schedules a reboot.
    Fatal,
}

/// Commands the core issues to the radio / link layer.
///
/// Completion of connects and disconnects is reported back through
/// [`crate::Node::handle_link_up`] and [`crate::Node::handle_link_down`];
/// inbound traffic through [`crate::Node::handle_adv_report`] and
/// [`crate::Node::handle_mesh_message`].
pub trait Radio {
    /// Register an advertising job.
    fn adv_job_add(&mut self, job: AdvJob) -> Option<AdvJobHandle>;

    /// Replace the data and scheduling of a registered job.
    fn adv_job_refresh(&mut self, handle: AdvJobHandle, job: &AdvJob);

    /// Remove a registered job.
    fn adv_job_remove(&mut self, handle: AdvJobHandle);

    /// Start (or reconfigure) scanning.
    fn scan_start(&mut self, config: ScanConfig);

    /// Stop scanning.
    fn scan_stop(&mut self);

    /// Initiate an outbound mesh connection. On success a later
    /// `handle_link_up` carries the assigned link handle.
    fn connect_as_master(
        &mut self,
        partner: NodeId,
        addr: &NodeAddr,
        write_handle: u16,
        interval: Duration,
    ) -> Result<(), RadioError>;

    /// Open a short-lived out-of-band access connection, authenticated
    /// with the given key. The handle is assigned synchronously; the
    /// connection is usable once `handle_link_up` reports it open.
    fn connect_access(&mut self, addr: &NodeAddr, key: KeyId) -> Result<LinkHandle, RadioError>;

    /// Queue a mesh packet on an established link.
    fn send(&mut self, link: LinkHandle, data: &[u8]) -> Result<(), RadioError>;

    /// Tear down a link. The peer observes the reason in its own
    /// `handle_link_down`.
    fn disconnect(&mut self, link: LinkHandle, reason: DisconnectReason);
}

/// Uniform random number generator.
///
/// Quality must be sufficient to decorrelate symmetric nodes: decision
/// jitter, teardown tie-breaks and the emergency victim draw all depend on
/// neighboring nodes not sharing a sequence.
pub trait Random {
    /// Generate a random u64 in the range [min, max).
    fn gen_range(&mut self, min: u64, max: u64) -> u64;

    /// Generate a random u32.
    fn gen_u32(&mut self) -> u32 {
        self.gen_range(0, u32::MAX as u64 + 1) as u32
    }

    /// Generate a random u16.
    fn gen_u16(&mut self) -> u16 {
        self.gen_range(0, u16::MAX as u64 + 1) as u16
    }
}

pub mod test_impls {
    //! Deterministic trait implementations for unit tests and simulation.

    use super::*;

    /// Everything a [`MockRadio`] was asked to do, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RadioCommand {
        AdvJobAdd {
            handle: AdvJobHandle,
            job: AdvJob,
        },
        AdvJobRefresh {
            handle: AdvJobHandle,
            job: AdvJob,
        },
        AdvJobRemove {
            handle: AdvJobHandle,
        },
        ScanStart {
            config: ScanConfig,
        },
        ScanStop,
        Connect {
            partner: NodeId,
            addr: NodeAddr,
            write_handle: u16,
            interval: Duration,
        },
        ConnectAccess {
            addr: NodeAddr,
            key: KeyId,
            handle: LinkHandle,
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

    /// Command-recording radio for driving a node by hand.
    #[derive(Default)]
    pub struct MockRadio {
        pub commands: Vec<RadioCommand>,
        next_adv_handle: AdvJobHandle,
        next_access_handle: LinkHandle,
    }

    impl MockRadio {
        pub fn new() -> Self {
            Self {
                commands: Vec::new(),
                next_adv_handle: 1,
                next_access_handle: 0x8000,
            }
        }

        /// Drain all recorded commands.
        pub fn take_commands(&mut self) -> Vec<RadioCommand> {
            core::mem::take(&mut self.commands)
        }

        /// The payloads of all queued `Send` commands for a link.
        pub fn sent_on(&self, link: LinkHandle) -> Vec<Vec<u8>> {
            self.commands
                .iter()
                .filter_map(|c| match c {
                    RadioCommand::Send { link: l, data } if *l == link => Some(data.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl Radio for MockRadio {
        fn adv_job_add(&mut self, job: AdvJob) -> Option<AdvJobHandle> {
            let handle = self.next_adv_handle;
            self.next_adv_handle += 1;
            self.commands.push(RadioCommand::AdvJobAdd { handle, job });
            Some(handle)
        }

        fn adv_job_refresh(&mut self, handle: AdvJobHandle, job: &AdvJob) {
            self.commands.push(RadioCommand::AdvJobRefresh {
                handle,
                job: job.clone(),
            });
        }

        fn adv_job_remove(&mut self, handle: AdvJobHandle) {
            self.commands.push(RadioCommand::AdvJobRemove { handle });
        }

        fn scan_start(&mut self, config: ScanConfig) {
            self.commands.push(RadioCommand::ScanStart { config });
        }

        fn scan_stop(&mut self) {
            self.commands.push(RadioCommand::ScanStop);
        }

        fn connect_as_master(
            &mut self,
            partner: NodeId,
            addr: &NodeAddr,
            write_handle: u16,
            interval: Duration,
        ) -> Result<(), RadioError> {
            self.commands.push(RadioCommand::Connect {
                partner,
                addr: *addr,
                write_handle,
                interval,
            });
            Ok(())
        }

        fn connect_access(&mut self, addr: &NodeAddr, key: KeyId) -> Result<LinkHandle, RadioError> {
            let handle = self.next_access_handle;
            self.next_access_handle += 1;
            self.commands.push(RadioCommand::ConnectAccess {
                addr: *addr,
                key,
                handle,
            });
            Ok(handle)
        }

        fn send(&mut self, link: LinkHandle, data: &[u8]) -> Result<(), RadioError> {
            self.commands.push(RadioCommand::Send {
                link,
                data: data.to_vec(),
            });
            Ok(())
        }

        fn disconnect(&mut self, link: LinkHandle, reason: DisconnectReason) {
            self.commands.push(RadioCommand::Disconnect { link, reason });
        }
    }

    /// Deterministic splitmix64 generator.
    pub struct MockRandom {
        state: u64,
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::with_seed(0x9E3779B97F4A7C15)
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }

        fn next_u64(&mut self) -> u64 {
            self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
            let mut z = self.state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
            z ^ (z >> 31)
        }
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            let range = max.saturating_sub(min);
            if range == 0 {
                return min;
            }
            min + self.next_u64() % range
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_mock_random_in_range() {
            let mut rng = MockRandom::with_seed(7);
            for _ in 0..1000 {
                let v = rng.gen_range(10, 20);
                assert!((10..20).contains(&v));
            }
        }

        #[test]
        fn test_mock_random_deterministic() {
            let mut a = MockRandom::with_seed(42);
            let mut b = MockRandom::with_seed(42);
            for _ in 0..10 {
                assert_eq!(a.gen_u32(), b.gen_u32());
            }
        }

        #[test]
        fn test_mock_radio_records_commands() {
            let mut radio = MockRadio::new();
            radio.scan_stop();
            let _ = radio.send(3, &[1, 2]);
            assert_eq!(radio.commands.len(), 2);
            assert_eq!(radio.sent_on(3), alloc::vec![alloc::vec![1, 2]]);
        }
    }
}
