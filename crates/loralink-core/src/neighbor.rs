//! Neighbor tracking and link quality estimation
//!
//! Every frame heard directly from a neighbor refreshes its entry here.
//! Signal measurements are smoothed with an exponential moving average and
//! mapped to a rough range through a log-distance path loss model, which
//! gives the routing layer a tie-break figure for equal-cost choices.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::frame::NodeId;

/// Smoothed signal statistics for one direct link
#[derive(Debug, Clone, Copy)]
pub struct LinkQuality {
    /// Smoothed RSSI (dBm)
    pub rssi: f32,
    /// Smoothed SNR (dB)
    pub snr: f32,
    /// Frames heard on this link
    pub frames_heard: u32,
    /// Weight given to each new measurement
    alpha: f32,
}

impl LinkQuality {
    pub fn new(rssi: f32, snr: f32, alpha: f32) -> Self {
        Self {
            rssi,
            snr,
            frames_heard: 1,
            alpha,
        }
    }

    /// Fold a new measurement into the moving averages
    pub fn update(&mut self, rssi: f32, snr: f32) {
        self.rssi = self.alpha * rssi + (1.0 - self.alpha) * self.rssi;
        self.snr = self.alpha * snr + (1.0 - self.alpha) * self.snr;
        self.frames_heard += 1;
    }

    /// Quality score in 0.0 - 1.0, higher is better
    pub fn score(&self) -> f32 {
        // Usable LoRa links span roughly -120..-40 dBm and -20..+30 dB SNR
        let rssi_norm = ((self.rssi + 120.0) / 80.0).clamp(0.0, 1.0);
        let snr_norm = ((self.snr + 20.0) / 50.0).clamp(0.0, 1.0);
        0.6 * rssi_norm + 0.4 * snr_norm
    }

    /// Rough range in meters from the log-distance path loss model
    ///
    /// `rssi_ref_1m` is the expected RSSI at one meter and
    /// `path_loss_exponent` the environment's decay factor (2.0 free space,
    /// higher for foliage or buildings).
    pub fn estimated_distance_m(&self, rssi_ref_1m: f32, path_loss_exponent: f32) -> f32 {
        10f32.powf((rssi_ref_1m - self.rssi) / (10.0 * path_loss_exponent))
    }
}

/// A directly reachable node
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub id: NodeId,
    pub quality: LinkQuality,
    last_heard: Instant,
}

impl Neighbor {
    fn new(id: NodeId, rssi: f32, snr: f32, alpha: f32, now: Instant) -> Self {
        Self {
            id,
            quality: LinkQuality::new(rssi, snr, alpha),
            last_heard: now,
        }
    }

    fn heard(&mut self, rssi: f32, snr: f32, now: Instant) {
        self.quality.update(rssi, snr);
        self.last_heard = now;
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.duration_since(self.last_heard)
    }

    pub fn is_stale(&self, timeout: Duration, now: Instant) -> bool {
        self.age(now) > timeout
    }
}

/// Snapshot row for display and JSON output
#[derive(Debug, Clone, Serialize)]
pub struct NeighborInfo {
    pub id: String,
    pub rssi: f32,
    pub snr: f32,
    pub quality: f32,
    pub distance_m: f32,
    pub frames_heard: u32,
    pub age_secs: u64,
}

/// Table of directly heard nodes
#[derive(Debug)]
pub struct NeighborTable {
    neighbors: HashMap<NodeId, Neighbor>,
    timeout: Duration,
    alpha: f32,
    rssi_ref_1m: f32,
    path_loss_exponent: f32,
}

impl NeighborTable {
    const MAX_ENTRIES: usize = 64;

    pub fn new(timeout: Duration, alpha: f32, rssi_ref_1m: f32, path_loss_exponent: f32) -> Self {
        Self {
            neighbors: HashMap::new(),
            timeout,
            alpha,
            rssi_ref_1m,
            path_loss_exponent,
        }
    }

    /// Record a direct reception from `id`
    pub fn heard(&mut self, id: NodeId, rssi: f32, snr: f32, now: Instant) {
        if let Some(neighbor) = self.neighbors.get_mut(&id) {
            neighbor.heard(rssi, snr, now);
        } else {
            if self.neighbors.len() >= Self::MAX_ENTRIES {
                self.evict_oldest(now);
            }
            trace!(%id, rssi, snr, "new neighbor");
            self.neighbors
                .insert(id, Neighbor::new(id, rssi, snr, self.alpha, now));
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Neighbor> {
        self.neighbors.get(&id)
    }

    /// Quality score of the link to `id`, if heard from
    pub fn quality_of(&self, id: NodeId) -> Option<f32> {
        self.neighbors.get(&id).map(|n| n.quality.score())
    }

    /// Neighbors heard within the staleness window
    pub fn active(&self, now: Instant) -> Vec<&Neighbor> {
        self.neighbors
            .values()
            .filter(|n| !n.is_stale(self.timeout, now))
            .collect()
    }

    /// Strongest active link
    pub fn best(&self, now: Instant) -> Option<&Neighbor> {
        self.active(now).into_iter().max_by(|a, b| {
            a.quality
                .score()
                .partial_cmp(&b.quality.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Drop neighbors not heard within the staleness window
    pub fn prune(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.neighbors.len();
        self.neighbors.retain(|_, n| !n.is_stale(timeout, now));
        before - self.neighbors.len()
    }

    /// Display rows sorted by id
    pub fn snapshot(&self, now: Instant) -> Vec<NeighborInfo> {
        let mut rows: Vec<NeighborInfo> = self
            .neighbors
            .values()
            .map(|n| NeighborInfo {
                id: n.id.to_string(),
                rssi: n.quality.rssi,
                snr: n.quality.snr,
                quality: n.quality.score(),
                distance_m: n
                    .quality
                    .estimated_distance_m(self.rssi_ref_1m, self.path_loss_exponent),
                frames_heard: n.quality.frames_heard,
                age_secs: n.age(now).as_secs(),
            })
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    fn evict_oldest(&mut self, now: Instant) {
        if let Some(oldest) = self
            .neighbors
            .iter()
            .max_by_key(|(_, n)| n.age(now))
            .map(|(id, _)| *id)
        {
            self.neighbors.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> NeighborTable {
        NeighborTable::new(Duration::from_secs(300), 0.3, -40.0, 2.8)
    }

    #[test]
    fn test_ema_moves_toward_measurement() {
        let mut lq = LinkQuality::new(-80.0, 10.0, 0.3);
        lq.update(-70.0, 15.0);
        assert!((lq.rssi - -77.0).abs() < 1e-3);
        assert!((lq.snr - 11.5).abs() < 1e-3);
        assert_eq!(lq.frames_heard, 2);
    }

    #[test]
    fn test_distance_from_path_loss_model() {
        let lq = LinkQuality::new(-60.0, 10.0, 0.3);
        let d = lq.estimated_distance_m(-40.0, 2.0);
        assert!((d - 10.0).abs() < 0.01);

        // At the reference RSSI the estimate is one meter
        let near = LinkQuality::new(-40.0, 10.0, 0.3);
        assert!((near.estimated_distance_m(-40.0, 2.8) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_score_orders_links() {
        let strong = LinkQuality::new(-60.0, 12.0, 0.3);
        let weak = LinkQuality::new(-110.0, -15.0, 0.3);
        assert!(strong.score() > weak.score());
        assert!(strong.score() <= 1.0);
        assert!(weak.score() >= 0.0);
    }

    #[test]
    fn test_heard_updates_existing_entry() {
        let now = Instant::now();
        let mut table = table();
        let id = NodeId::from_u16(0x2a);
        table.heard(id, -80.0, 10.0, now);
        table.heard(id, -70.0, 15.0, now + Duration::from_secs(1));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(id).unwrap().quality.frames_heard, 2);
    }

    #[test]
    fn test_prune_drops_silent_neighbors() {
        let now = Instant::now();
        let mut table = table();
        table.heard(NodeId::from_u16(1), -80.0, 10.0, now);
        table.heard(NodeId::from_u16(2), -80.0, 10.0, now + Duration::from_secs(200));

        let later = now + Duration::from_secs(301);
        assert_eq!(table.prune(later), 1);
        assert!(table.get(NodeId::from_u16(1)).is_none());
        assert!(table.get(NodeId::from_u16(2)).is_some());
    }

    #[test]
    fn test_best_prefers_stronger_link() {
        let now = Instant::now();
        let mut table = table();
        table.heard(NodeId::from_u16(1), -100.0, -5.0, now);
        table.heard(NodeId::from_u16(2), -65.0, 12.0, now);
        assert_eq!(table.best(now).unwrap().id, NodeId::from_u16(2));
    }

    #[test]
    fn test_snapshot_sorted_with_distances() {
        let now = Instant::now();
        let mut table = table();
        table.heard(NodeId::from_u16(0xb), -60.0, 10.0, now);
        table.heard(NodeId::from_u16(0xa), -80.0, 5.0, now);

        let rows = table.snapshot(now);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "a");
        assert_eq!(rows[1].id, "b");
        assert!(rows[0].distance_m > rows[1].distance_m);
    }
}
