//! Route table and duplicate suppression
//!
//! Routes are learned on demand: every RREQ/RREP/HELLO (and, passively, data
//! frame) offers `source -> via` with the distance the frame travelled. The
//! table keeps exactly one entry per destination and only moves it for a
//! strictly shorter path, so two equal-length paths cannot flap the entry;
//! an equal-length candidate takes over only once the entry has gone stale.
//!
//! The duplicate cache remembers `(source, sequence)` sightings for loop
//! suppression and for re-acknowledging retransmissions of messages that
//! were already delivered.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::frame::NodeId;

/// A learned route to one destination
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub destination: NodeId,
    pub next_hop: NodeId,
    pub hop_count: u8,
    pub last_refresh: Instant,
    /// Smoothed RSSI of the first hop, dBm
    pub quality: f32,
}

impl RouteEntry {
    pub fn age(&self, now: Instant) -> Duration {
        now.duration_since(self.last_refresh)
    }
}

/// Route snapshot row for reporting
#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub destination: String,
    pub next_hop: String,
    pub hop_count: u8,
    pub age_secs: u64,
    pub quality: f32,
}

/// Destination-indexed route table with AODV-style maintenance
#[derive(Debug)]
pub struct RouteTable {
    routes: HashMap<NodeId, RouteEntry>,
    refresh_threshold: Duration,
    expiry: Duration,
}

impl RouteTable {
    pub fn new(refresh_threshold: Duration, expiry: Duration) -> Self {
        Self {
            routes: HashMap::new(),
            refresh_threshold,
            expiry,
        }
    }

    /// Offer a candidate route. Returns true when the table changed.
    pub fn offer(
        &mut self,
        destination: NodeId,
        next_hop: NodeId,
        hop_count: u8,
        quality: f32,
        now: Instant,
    ) -> bool {
        let candidate = RouteEntry {
            destination,
            next_hop,
            hop_count,
            last_refresh: now,
            quality,
        };
        match self.routes.get_mut(&destination) {
            None => {
                debug!(%destination, %next_hop, hop_count, "route learned");
                self.routes.insert(destination, candidate);
                true
            }
            Some(existing) if existing.age(now) >= self.expiry => {
                debug!(%destination, %next_hop, hop_count, "expired route replaced");
                *existing = candidate;
                true
            }
            Some(existing) => {
                if hop_count < existing.hop_count {
                    debug!(
                        %destination,
                        %next_hop,
                        hop_count,
                        previous = existing.hop_count,
                        "shorter route replaces entry"
                    );
                    *existing = candidate;
                    true
                } else if hop_count == existing.hop_count {
                    if existing.next_hop == next_hop {
                        existing.last_refresh = now;
                        existing.quality = quality;
                        true
                    } else if existing.age(now) > self.refresh_threshold {
                        debug!(%destination, %next_hop, "stale equal-length route refreshed");
                        *existing = candidate;
                        true
                    } else {
                        false
                    }
                } else {
                    trace!(%destination, hop_count, "longer route ignored");
                    false
                }
            }
        }
    }

    /// Active route to `destination`, if any
    pub fn lookup(&self, destination: NodeId, now: Instant) -> Option<&RouteEntry> {
        self.routes
            .get(&destination)
            .filter(|route| route.age(now) < self.expiry)
    }

    /// Next hop toward `destination`, if a live route exists
    pub fn next_hop(&self, destination: NodeId, now: Instant) -> Option<NodeId> {
        self.lookup(destination, now).map(|route| route.next_hop)
    }

    pub fn remove(&mut self, destination: NodeId) -> Option<RouteEntry> {
        self.routes.remove(&destination)
    }

    /// Drop expired entries, returning how many were removed
    pub fn prune(&mut self, now: Instant) -> usize {
        let expiry = self.expiry;
        let before = self.routes.len();
        self.routes.retain(|_, route| route.age(now) < expiry);
        let dropped = before - self.routes.len();
        if dropped > 0 {
            debug!(dropped, "expired routes pruned");
        }
        dropped
    }

    /// Reportable view of all live routes, sorted by destination
    pub fn snapshot(&self, now: Instant) -> Vec<RouteInfo> {
        let mut rows: Vec<RouteInfo> = self
            .routes
            .values()
            .filter(|route| route.age(now) < self.expiry)
            .map(|route| RouteInfo {
                destination: route.destination.to_string(),
                next_hop: route.next_hop.to_string(),
                hop_count: route.hop_count,
                age_secs: route.age(now).as_secs(),
                quality: route.quality,
            })
            .collect();
        rows.sort_by(|a, b| a.destination.cmp(&b.destination));
        rows
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[derive(Debug)]
struct SeenEntry {
    last_seen: Instant,
    seen_count: u32,
}

/// Seen-message cache keyed by `(source, sequence)`
#[derive(Debug)]
pub struct DuplicateCache {
    seen: HashMap<(NodeId, u16), SeenEntry>,
    ttl: Duration,
    max_size: usize,
}

impl DuplicateCache {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            seen: HashMap::new(),
            ttl,
            max_size: max_size.max(1),
        }
    }

    /// Record a sighting. Returns true the first time within the TTL.
    pub fn observe(&mut self, source: NodeId, sequence: u16, now: Instant) -> bool {
        let key = (source, sequence);
        if let Some(entry) = self.seen.get_mut(&key) {
            if now.duration_since(entry.last_seen) < self.ttl {
                entry.last_seen = now;
                entry.seen_count += 1;
                return false;
            }
        }
        if self.seen.len() >= self.max_size {
            self.evict(now);
        }
        self.seen.insert(
            key,
            SeenEntry {
                last_seen: now,
                seen_count: 1,
            },
        );
        true
    }

    /// Sightings recorded for `(source, sequence)` within the TTL
    pub fn seen_count(&self, source: NodeId, sequence: u16, now: Instant) -> u32 {
        self.seen
            .get(&(source, sequence))
            .filter(|entry| now.duration_since(entry.last_seen) < self.ttl)
            .map(|entry| entry.seen_count)
            .unwrap_or(0)
    }

    /// Drop entries older than the TTL
    pub fn prune(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.seen.len();
        self.seen
            .retain(|_, entry| now.duration_since(entry.last_seen) < ttl);
        before - self.seen.len()
    }

    fn evict(&mut self, now: Instant) {
        if self.prune(now) > 0 {
            return;
        }
        // nothing expired: make room by dropping the oldest sighting
        if let Some(oldest) = self
            .seen
            .iter()
            .min_by_key(|(_, entry)| entry.last_seen)
            .map(|(key, _)| *key)
        {
            self.seen.remove(&oldest);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFRESH: Duration = Duration::from_secs(30);
    const EXPIRY: Duration = Duration::from_secs(180);

    fn node(n: u16) -> NodeId {
        NodeId::from_u16(n)
    }

    #[test]
    fn test_lower_hop_count_replaces() {
        let now = Instant::now();
        let mut table = RouteTable::new(REFRESH, EXPIRY);
        table.offer(node(0xc), node(0xb), 3, -80.0, now);
        table.offer(node(0xc), node(0xd), 2, -90.0, now);
        let route = table.lookup(node(0xc), now).unwrap();
        assert_eq!(route.next_hop, node(0xd));
        assert_eq!(route.hop_count, 2);
    }

    #[test]
    fn test_equal_hop_does_not_flap() {
        let now = Instant::now();
        let mut table = RouteTable::new(REFRESH, EXPIRY);
        table.offer(node(0xc), node(0xb), 2, -80.0, now);
        let changed = table.offer(node(0xc), node(0xd), 2, -60.0, now + Duration::from_secs(1));
        assert!(!changed);
        assert_eq!(table.next_hop(node(0xc), now), Some(node(0xb)));

        // once stale, the equal-length alternative may take over
        let later = now + REFRESH + Duration::from_secs(1);
        assert!(table.offer(node(0xc), node(0xd), 2, -60.0, later));
        assert_eq!(table.next_hop(node(0xc), later), Some(node(0xd)));
    }

    #[test]
    fn test_same_next_hop_refreshes_in_place() {
        let now = Instant::now();
        let mut table = RouteTable::new(REFRESH, EXPIRY);
        table.offer(node(0xc), node(0xb), 2, -80.0, now);
        let later = now + Duration::from_secs(100);
        assert!(table.offer(node(0xc), node(0xb), 2, -75.0, later));
        let route = table.lookup(node(0xc), later).unwrap();
        assert_eq!(route.age(later), Duration::ZERO);
        assert_eq!(route.quality, -75.0);
    }

    #[test]
    fn test_longer_route_ignored() {
        let now = Instant::now();
        let mut table = RouteTable::new(REFRESH, EXPIRY);
        table.offer(node(0xc), node(0xb), 1, -80.0, now);
        assert!(!table.offer(node(0xc), node(0xd), 3, -50.0, now));
        assert_eq!(table.next_hop(node(0xc), now), Some(node(0xb)));
    }

    #[test]
    fn test_route_expiry() {
        let now = Instant::now();
        let mut table = RouteTable::new(REFRESH, EXPIRY);
        table.offer(node(0xc), node(0xb), 2, -80.0, now);
        let later = now + EXPIRY + Duration::from_secs(1);
        assert!(table.lookup(node(0xc), later).is_none());
        assert_eq!(table.prune(later), 1);
        assert!(table.is_empty());

        // an expired entry is replaced even by a longer route
        table.offer(node(0xc), node(0xb), 2, -80.0, now);
        assert!(table.offer(node(0xc), node(0xd), 4, -80.0, later));
        assert_eq!(table.next_hop(node(0xc), later), Some(node(0xd)));
    }

    #[test]
    fn test_snapshot_sorted() {
        let now = Instant::now();
        let mut table = RouteTable::new(REFRESH, EXPIRY);
        table.offer(node(0xbb), node(0x1), 1, -70.0, now);
        table.offer(node(0xaa), node(0x1), 2, -80.0, now);
        let rows = table.snapshot(now);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].destination, "aa");
        assert_eq!(rows[1].destination, "bb");
    }

    #[test]
    fn test_duplicate_observe() {
        let now = Instant::now();
        let mut cache = DuplicateCache::new(Duration::from_secs(300), 256);
        assert!(cache.observe(node(0xa), 7, now));
        assert!(!cache.observe(node(0xa), 7, now + Duration::from_secs(1)));
        assert_eq!(cache.seen_count(node(0xa), 7, now + Duration::from_secs(1)), 2);
        assert!(cache.observe(node(0xa), 8, now));
    }

    #[test]
    fn test_duplicate_entry_expires() {
        let now = Instant::now();
        let mut cache = DuplicateCache::new(Duration::from_secs(300), 256);
        cache.observe(node(0xa), 7, now);
        let later = now + Duration::from_secs(301);
        assert!(cache.observe(node(0xa), 7, later));
        assert_eq!(cache.seen_count(node(0xa), 7, later), 1);
    }

    #[test]
    fn test_cache_evicts_oldest_when_full() {
        let now = Instant::now();
        let mut cache = DuplicateCache::new(Duration::from_secs(300), 2);
        cache.observe(node(0xa), 1, now);
        cache.observe(node(0xa), 2, now + Duration::from_secs(1));
        cache.observe(node(0xa), 3, now + Duration::from_secs(2));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.seen_count(node(0xa), 1, now + Duration::from_secs(2)), 0);
        assert!(!cache.observe(node(0xa), 3, now + Duration::from_secs(3)));
    }
}
