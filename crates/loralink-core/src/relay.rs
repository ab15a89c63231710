//! Priority relay queue
//!
//! Frames accepted for forwarding wait in one of four priority bands:
//! control (route discovery), acknowledgment, data, beacon. Selection drains
//! the highest band first and is FIFO within a band. Entries that waited
//! past the age limit are dropped before every selection, and on overflow a
//! newcomer may displace the oldest entry of a strictly lower band instead
//! of being rejected.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::frame::{Frame, FrameType};

/// Forwarding priority bands, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPriority {
    Control,
    Ack,
    Data,
    Beacon,
}

impl RelayPriority {
    const BANDS: usize = 4;

    /// Band a frame type forwards in
    pub fn for_frame(frame_type: FrameType) -> Self {
        match frame_type {
            FrameType::RouteRequest | FrameType::RouteReply => RelayPriority::Control,
            FrameType::Ack
            | FrameType::FragmentAck
            | FrameType::BlockAck
            | FrameType::RelayAck => RelayPriority::Ack,
            FrameType::Data | FrameType::Fragment => RelayPriority::Data,
            FrameType::Hello => RelayPriority::Beacon,
        }
    }

    fn index(self) -> usize {
        match self {
            RelayPriority::Control => 0,
            RelayPriority::Ack => 1,
            RelayPriority::Data => 2,
            RelayPriority::Beacon => 3,
        }
    }
}

/// Result of offering a frame to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Stored,
    /// Stored by dropping a lower-priority entry
    Displaced,
    Rejected,
}

#[derive(Debug)]
struct QueuedFrame {
    frame: Frame,
    enqueued: Instant,
}

/// Bounded, age-evicting forwarding buffer
#[derive(Debug)]
pub struct RelayQueue {
    bands: [VecDeque<QueuedFrame>; RelayPriority::BANDS],
    capacity: usize,
    max_age: Duration,
    drops: u64,
}

impl RelayQueue {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            bands: Default::default(),
            capacity: capacity.max(1),
            max_age,
            drops: 0,
        }
    }

    /// Offer a frame for forwarding
    pub fn enqueue(&mut self, frame: Frame, now: Instant) -> Enqueued {
        self.expire(now);
        let priority = RelayPriority::for_frame(frame.frame_type);
        if self.len() < self.capacity {
            self.bands[priority.index()].push_back(QueuedFrame {
                frame,
                enqueued: now,
            });
            return Enqueued::Stored;
        }
        // full: the lowest occupied band below the newcomer gives way
        let victim = (priority.index() + 1..RelayPriority::BANDS)
            .rev()
            .find(|&band| !self.bands[band].is_empty());
        match victim {
            Some(band) => {
                self.bands[band].pop_front();
                self.drops += 1;
                debug!(band, "relay entry displaced by higher priority frame");
                self.bands[priority.index()].push_back(QueuedFrame {
                    frame,
                    enqueued: now,
                });
                Enqueued::Displaced
            }
            None => {
                self.drops += 1;
                debug!(?priority, "relay queue full, frame rejected");
                Enqueued::Rejected
            }
        }
    }

    /// Highest-priority frame ready to transmit
    pub fn pop(&mut self, now: Instant) -> Option<Frame> {
        self.expire(now);
        self.bands
            .iter_mut()
            .find_map(|band| band.pop_front())
            .map(|entry| {
                trace!(frame_type = ?entry.frame.frame_type, "relay frame dequeued");
                entry.frame
            })
    }

    /// Drop entries older than the age limit, returning how many
    pub fn expire(&mut self, now: Instant) -> usize {
        let max_age = self.max_age;
        let mut dropped = 0;
        for band in &mut self.bands {
            let before = band.len();
            band.retain(|entry| now.duration_since(entry.enqueued) < max_age);
            dropped += before - band.len();
        }
        if dropped > 0 {
            self.drops += dropped as u64;
            debug!(dropped, "aged relay entries dropped");
        }
        dropped
    }

    /// Total drops since creation (aged out, displaced, rejected)
    pub fn drops(&self) -> u64 {
        self.drops
    }

    pub fn len(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.iter().all(VecDeque::is_empty)
    }
}
