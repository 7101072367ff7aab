//! Cluster scoring.
//!
//! Two pure functions rate an observed JOIN_ME record: as-master scores a
//! candidate we would initiate a connection to, as-slave scores a cluster we
//! would wait for. A score of 0 means "never pick".

use alloc::vec::Vec;

use crate::candidates::CandidateEntry;
use crate::config::{NodeConfig, PreferredMode};
use crate::time::Timestamp;
use crate::types::{
    ClusterId, ClusterSize, DeviceType, NodeId, ATTEMPTS_BEFORE_BLACKLIST, BLACKLIST_BACKOFF_UNIT,
};

/// Local state the scoring functions compare a candidate against.
pub struct ScoreContext<'a> {
    pub now: Timestamp,
    pub cluster_id: ClusterId,
    pub cluster_size: ClusterSize,
    pub device_type: DeviceType,
    /// Partners we already hold a mesh link to (any state).
    pub connected_partners: Vec<NodeId>,
    pub config: &'a NodeConfig,
}

impl ScoreContext<'_> {
    fn has_link_to(&self, partner: NodeId) -> bool {
        self.connected_partners.contains(&partner)
    }
}

/// Shared rejections: stale entries, own-cluster chatter, unstable links.
fn common_reject(entry: &CandidateEntry, ctx: &ScoreContext) -> bool {
    ctx.now.saturating_sub(entry.received_at) > ctx.config.join_me_max_age
        || entry.payload.cluster_id == ctx.cluster_id
        || entry.rssi < ctx.config.stable_rssi_threshold
}

/// Whether the candidate is inside its temporary connect blacklist window.
pub fn is_blacklisted(entry: &CandidateEntry, now: Timestamp) -> bool {
    match entry.last_attempt {
        Some(last) if entry.attempts > ATTEMPTS_BEFORE_BLACKLIST => {
            last + BLACKLIST_BACKOFF_UNIT * entry.attempts as u64 > now
        }
        _ => false,
    }
}

/// Score a candidate we would connect to as master.
pub fn score_as_master(entry: &CandidateEntry, ctx: &ScoreContext) -> u32 {
    if common_reject(entry, ctx) {
        return 0;
    }
    // Master needs a free inbound slot on the other side.
    if entry.payload.free_in == 0 {
        return 0;
    }
    // The candidate committed to another cluster as slave.
    if entry.payload.ack_field != 0 && entry.payload.ack_field != ctx.cluster_id {
        return 0;
    }
    // A bigger cluster never joins us; we would join it.
    if entry.payload.cluster_size > ctx.cluster_size {
        return 0;
    }
    if is_blacklisted(entry, ctx.now) {
        return 0;
    }
    if ctx.has_link_to(entry.payload.sender) {
        return 0;
    }
    // A leaf never initiates connections.
    if ctx.device_type == DeviceType::Leaf {
        return 0;
    }

    let rssi_score = (100 + entry.rssi as i32) as u32;
    let score = entry.payload.free_in as u32 * 10000
        + entry.payload.free_out as u32 * 100
        + rssi_score;

    preferred_modifier(score, entry.payload.sender, ctx.config)
}

/// Score a cluster we would wait for as slave.
///
/// A full outbound side on the candidate is not a rejection: the partner is
/// expected to free a slot for us (possibly via the emergency protocol).
pub fn score_as_slave(entry: &CandidateEntry, ctx: &ScoreContext) -> u32 {
    if common_reject(entry, ctx) {
        return 0;
    }
    // Only bigger or equal clusters are worth waiting for.
    if entry.payload.cluster_size < ctx.cluster_size {
        return 0;
    }

    let rssi_score = (100 + entry.rssi as i32) as u32;
    let score = entry.payload.cluster_size as u32 * 10000
        + entry.payload.free_out as u32 * 100
        + rssi_score;

    preferred_modifier(score, entry.payload.sender, ctx.config)
}

fn preferred_modifier(score: u32, partner: NodeId, config: &NodeConfig) -> u32 {
    if score == 0 || config.is_preferred(partner) {
        return score;
    }
    match config.preferred_mode {
        PreferredMode::Penalty => (score / 10).max(1),
        PreferredMode::Ignored => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Duration;
    use crate::types::JoinMePayload;

    fn payload(sender: NodeId) -> JoinMePayload {
        JoinMePayload {
            sender,
            cluster_id: 0x0005_0000 | sender as u32,
            cluster_size: 1,
            free_in: 2,
            free_out: 2,
            battery_runtime: 0,
            tx_power: -4,
            device_type: DeviceType::Static,
            hops_to_sink: -1,
            mesh_write_handle: 0x12,
            ack_field: 0,
        }
    }

    fn entry(sender: NodeId, now: Timestamp) -> CandidateEntry {
        CandidateEntry {
            addr: [0; 6],
            payload: payload(sender),
            rssi: -60,
            received_at: now,
            last_attempt: None,
            attempts: 0,
        }
    }

    fn ctx(config: &NodeConfig) -> ScoreContext<'_> {
        ScoreContext {
            now: Timestamp::from_secs(100),
            cluster_id: 0xAA00_0001,
            cluster_size: 3,
            device_type: DeviceType::Static,
            connected_partners: Vec::new(),
            config,
        }
    }

    #[test]
    fn test_master_score_formula() {
        let config = NodeConfig::default();
        let ctx = ctx(&config);
        let e = entry(7, ctx.now);
        // free_in 2, free_out 2, rssi -60
        assert_eq!(score_as_master(&e, &ctx), 2 * 10000 + 2 * 100 + 40);
    }

    #[test]
    fn test_master_rejections() {
        let config = NodeConfig::default();
        let ctx = ctx(&config);
        let now = ctx.now;

        let mut e = entry(7, now);
        e.payload.cluster_id = ctx.cluster_id;
        assert_eq!(score_as_master(&e, &ctx), 0, "own cluster");

        let mut e = entry(7, now);
        e.payload.free_in = 0;
        assert_eq!(score_as_master(&e, &ctx), 0, "no free inbound slot");

        let mut e = entry(7, now);
        e.payload.ack_field = 0xBEEF_0001;
        assert_eq!(score_as_master(&e, &ctx), 0, "acked another cluster");

        let mut e = entry(7, now);
        e.payload.cluster_size = ctx.cluster_size + 1;
        assert_eq!(score_as_master(&e, &ctx), 0, "bigger cluster");

        let mut e = entry(7, now);
        e.rssi = config.stable_rssi_threshold - 1;
        assert_eq!(score_as_master(&e, &ctx), 0, "weak signal");

        let mut e = entry(7, now);
        e.received_at = Timestamp::ZERO;
        assert_eq!(score_as_master(&e, &ctx), 0, "stale entry");
    }

    #[test]
    fn test_master_rejects_existing_partner_and_leaf_role() {
        let config = NodeConfig::default();
        let mut c = ctx(&config);
        let e = entry(7, c.now);

        c.connected_partners.push(7);
        assert_eq!(score_as_master(&e, &c), 0);
        c.connected_partners.clear();

        c.device_type = DeviceType::Leaf;
        assert_eq!(score_as_master(&e, &c), 0);
    }

    #[test]
    fn test_master_accepts_ack_for_us() {
        let config = NodeConfig::default();
        let ctx = ctx(&config);
        let mut e = entry(7, ctx.now);
        e.payload.ack_field = ctx.cluster_id;
        assert!(score_as_master(&e, &ctx) > 0);
    }

    #[test]
    fn test_blacklist_window() {
        let config = NodeConfig::default();
        let ctx = ctx(&config);

        let mut e = entry(7, ctx.now);
        e.attempts = ATTEMPTS_BEFORE_BLACKLIST + 1;

        // 6 attempts * 1s window from 2s ago: still blacklisted
        e.last_attempt = Some(Timestamp::from_secs(98));
        assert!(is_blacklisted(&e, ctx.now));
        assert_eq!(score_as_master(&e, &ctx), 0);

        // Window elapsed: 6s after the last attempt
        let later = Timestamp::from_secs(98) + Duration::from_secs(7);
        assert!(!is_blacklisted(&e, later));

        // Below the attempt threshold the window never applies
        e.attempts = ATTEMPTS_BEFORE_BLACKLIST;
        assert!(!is_blacklisted(&e, ctx.now));
    }

    #[test]
    fn test_slave_score_formula_and_rejections() {
        let config = NodeConfig::default();
        let ctx = ctx(&config);

        let mut e = entry(7, ctx.now);
        e.payload.cluster_size = 5;
        e.payload.free_out = 1;
        assert_eq!(score_as_slave(&e, &ctx), 5 * 10000 + 100 + 40);

        // Full outbound side is fine for the slave role
        e.payload.free_out = 0;
        e.payload.free_in = 0;
        assert!(score_as_slave(&e, &ctx) > 0);

        // Smaller cluster is not
        e.payload.cluster_size = ctx.cluster_size - 1;
        assert_eq!(score_as_slave(&e, &ctx), 0);
    }

    #[test]
    fn test_preferred_partner_modifier() {
        let mut config = NodeConfig::default();
        config.set_preferred(PreferredMode::Penalty, &[9]);
        let c = ctx(&config);

        let preferred = entry(9, c.now);
        let other = entry(7, c.now);
        let full = score_as_master(&preferred, &c);
        assert_eq!(score_as_master(&other, &c), full / 10);

        config.preferred_mode = PreferredMode::Ignored;
        let c = ctx(&config);
        assert_eq!(score_as_master(&other, &c), 0);
        assert!(score_as_master(&preferred, &c) > 0);
    }
}
