//! Bounded buffer of observed JOIN_ME records.
//!
//! Every advertisement observation lands in one of [`CANDIDATE_SLOTS`]
//! slots. The replacement policy evicts in a fixed order: refresh the same
//! sender, take an empty slot, overwrite the oldest record from our own
//! cluster, finally overwrite the slot with the lowest score. Stale entries
//! are expired lazily by the scorer, never purged here.

use crate::scoring::{score_as_master, score_as_slave, ScoreContext};
use crate::time::Timestamp;
use crate::types::{JoinMePayload, NodeAddr, NodeId, CANDIDATE_SLOTS, MAX_CONNECT_ATTEMPTS};

/// One observed JOIN_ME record with reception metadata.
#[derive(Debug, Clone, Copy)]
pub struct CandidateEntry {
    pub addr: NodeAddr,
    pub payload: JoinMePayload,
    pub rssi: i16,
    pub received_at: Timestamp,
    pub last_attempt: Option<Timestamp>,
    pub attempts: u8,
}

impl CandidateEntry {
    /// Record a connect attempt for blacklist accounting.
    pub fn note_attempt(&mut self, now: Timestamp) {
        self.last_attempt = Some(now);
        if self.attempts < MAX_CONNECT_ATTEMPTS {
            self.attempts += 1;
        }
    }
}

/// Which slot-selection rule stored an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Same sender seen before; entry refreshed in place.
    Refreshed,
    /// A free slot was used.
    UsedEmptySlot,
    /// Overwrote the oldest record from our own cluster.
    ReplacedOwnCluster,
    /// Overwrote the lowest-scoring record.
    ReplacedLowestScore,
}

/// Fixed-size store of scoring candidates.
pub struct CandidateBuffer {
    slots: [Option<CandidateEntry>; CANDIDATE_SLOTS],
}

impl Default for CandidateBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self {
            slots: [None; CANDIDATE_SLOTS],
        }
    }

    /// Store an observation, applying the slot-selection policy.
    pub fn store(
        &mut self,
        addr: NodeAddr,
        payload: JoinMePayload,
        rssi: i16,
        now: Timestamp,
        ctx: &ScoreContext,
    ) -> StoreOutcome {
        let (slot, outcome) = self.find_target_slot(&payload, ctx);

        // Attempt bookkeeping survives a refresh of the same sender.
        let (last_attempt, attempts) = match (&self.slots[slot], outcome) {
            (Some(old), StoreOutcome::Refreshed) => (old.last_attempt, old.attempts),
            _ => (None, 0),
        };

        self.slots[slot] = Some(CandidateEntry {
            addr,
            payload,
            rssi,
            received_at: now,
            last_attempt,
            attempts,
        });

        outcome
    }

    fn find_target_slot(&self, payload: &JoinMePayload, ctx: &ScoreContext) -> (usize, StoreOutcome) {
        // 1. A slot already holding this sender.
        if let Some(i) = self.slots.iter().position(|s| {
            s.as_ref()
                .is_some_and(|e| e.payload.sender == payload.sender)
        }) {
            return (i, StoreOutcome::Refreshed);
        }

        // 2. An empty slot.
        if let Some(i) = self.slots.iter().position(|s| s.is_none()) {
            return (i, StoreOutcome::UsedEmptySlot);
        }

        // 3. The oldest record from our own cluster.
        let own_cluster = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|e| (i, e)))
            .filter(|(_, e)| e.payload.cluster_id == ctx.cluster_id)
            .min_by_key(|(_, e)| e.received_at)
            .map(|(i, _)| i);
        if let Some(i) = own_cluster {
            return (i, StoreOutcome::ReplacedOwnCluster);
        }

        // 4. The lowest score under the role the new observation would take.
        let as_master = payload.cluster_size >= ctx.cluster_size;
        let worst = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|e| (i, e)))
            .min_by_key(|(_, e)| {
                if as_master {
                    score_as_master(e, ctx)
                } else {
                    score_as_slave(e, ctx)
                }
            })
            .map(|(i, _)| i)
            .unwrap_or(0);

        (worst, StoreOutcome::ReplacedLowestScore)
    }

    /// Remove the entry advertised by `sender`, e.g. after a merge.
    pub fn remove_sender(&mut self, sender: NodeId) {
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|e| e.payload.sender == sender) {
                *slot = None;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateEntry> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    /// Index of the highest-scoring entry under `score`, or None when no
    /// entry scores above 0.
    pub fn best_index<F>(&self, score: F) -> Option<usize>
    where
        F: Fn(&CandidateEntry) -> u32,
    {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|e| (i, score(e))))
            .filter(|(_, score)| *score > 0)
            .max_by_key(|(_, score)| *score)
            .map(|(i, _)| i)
    }

    pub fn get(&self, index: usize) -> Option<&CandidateEntry> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut CandidateEntry> {
        self.slots.get_mut(index).and_then(|s| s.as_mut())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::types::{ClusterId, DeviceType};
    use alloc::vec::Vec;

    fn payload(sender: NodeId, cluster_id: ClusterId, cluster_size: i16) -> JoinMePayload {
        JoinMePayload {
            sender,
            cluster_id,
            cluster_size,
            free_in: 1,
            free_out: 1,
            battery_runtime: 0,
            tx_power: -4,
            device_type: DeviceType::Static,
            hops_to_sink: -1,
            mesh_write_handle: 0x12,
            ack_field: 0,
        }
    }

    fn ctx(config: &NodeConfig) -> ScoreContext<'_> {
        ScoreContext {
            now: Timestamp::from_secs(10),
            cluster_id: 0xAA00_0001,
            cluster_size: 1,
            device_type: DeviceType::Static,
            connected_partners: Vec::new(),
            config,
        }
    }

    #[test]
    fn test_same_sender_refreshes_and_keeps_attempts() {
        let config = NodeConfig::default();
        let ctx = ctx(&config);
        let mut buffer = CandidateBuffer::new();
        let now = ctx.now;

        buffer.store([0; 6], payload(5, 2, 1), -60, now, &ctx);
        buffer.get_mut(0).unwrap().note_attempt(now);

        let outcome = buffer.store([0; 6], payload(5, 2, 2), -55, now, &ctx);
        assert_eq!(outcome, StoreOutcome::Refreshed);
        assert_eq!(buffer.len(), 1);
        let entry = buffer.get(0).unwrap();
        assert_eq!(entry.payload.cluster_size, 2);
        assert_eq!(entry.attempts, 1);
    }

    #[test]
    fn test_own_cluster_evicted_before_foreign() {
        let config = NodeConfig::default();
        let ctx = ctx(&config);
        let mut buffer = CandidateBuffer::new();

        // Fill the buffer: slots 0/1 from our own cluster, rest foreign.
        buffer.store([0; 6], payload(1, ctx.cluster_id, 1), -60, Timestamp::from_secs(1), &ctx);
        buffer.store([0; 6], payload(2, ctx.cluster_id, 1), -60, Timestamp::from_secs(2), &ctx);
        for i in 0..(CANDIDATE_SLOTS - 2) as u16 {
            buffer.store(
                [0; 6],
                payload(10 + i, 0x0BB0_0000 + i as u32, 1),
                -60,
                ctx.now,
                &ctx,
            );
        }
        assert_eq!(buffer.len(), CANDIDATE_SLOTS);

        let outcome = buffer.store([0; 6], payload(99, 0x0CC0_0000, 1), -60, ctx.now, &ctx);
        assert_eq!(outcome, StoreOutcome::ReplacedOwnCluster);
        // The older of the two own-cluster entries went away.
        assert!(buffer.iter().all(|e| e.payload.sender != 1));
        assert!(buffer.iter().any(|e| e.payload.sender == 2));
    }

    #[test]
    fn test_lowest_score_evicted_last() {
        let config = NodeConfig::default();
        let ctx = ctx(&config);
        let mut buffer = CandidateBuffer::new();

        // Full buffer of foreign entries, one of them with a weak signal.
        for i in 0..CANDIDATE_SLOTS as u16 {
            let rssi = if i == 3 { -80 } else { -50 };
            buffer.store(
                [0; 6],
                payload(10 + i, 0x0BB0_0000 + i as u32, 1),
                rssi,
                ctx.now,
                &ctx,
            );
        }

        let outcome = buffer.store([0; 6], payload(99, 0x0CC0_0000, 1), -40, ctx.now, &ctx);
        assert_eq!(outcome, StoreOutcome::ReplacedLowestScore);
        assert!(buffer.iter().all(|e| e.payload.sender != 13));
        assert!(buffer.iter().any(|e| e.payload.sender == 99));
    }

    #[test]
    fn test_remove_sender_and_best_index() {
        let config = NodeConfig::default();
        let scope = ctx(&config);
        let mut buffer = CandidateBuffer::new();

        buffer.store([0; 6], payload(5, 2, 1), -60, scope.now, &scope);
        buffer.store([0; 6], payload(6, 3, 1), -50, scope.now, &scope);

        let best = buffer.best_index(|e| score_as_master(e, &scope)).unwrap();
        assert_eq!(buffer.get(best).unwrap().payload.sender, 6);

        buffer.remove_sender(6);
        assert_eq!(buffer.len(), 1);

        buffer.remove_sender(5);
        assert!(buffer.best_index(|e| score_as_master(e, &scope)).is_none());
    }
}
