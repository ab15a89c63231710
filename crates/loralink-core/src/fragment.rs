//! Message fragmentation and reassembly
//!
//! Outgoing messages larger than the configured chunk size are split into
//! MSGF frames carrying `index/total`. The chunk size auto-shrinks when the
//! header for the largest index would push a frame past the MTU, so every
//! produced fragment is guaranteed to encode.
//!
//! The receive side keeps at most one reassembly context per peer. A new
//! sequence from the same peer replaces an incomplete older one, and idle
//! contexts are pruned on a timer. Fragments may arrive in any order;
//! duplicates are reported `fresh=false` so they can be re-acknowledged
//! without double counting.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

use crate::frame::{Frame, NodeId, Reliability, MTU};

/// Fragmentation errors, raised before anything is transmitted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("message needs {0} fragments, limit is {1}")]
    TooManyFragments(usize, u16),
}

/// Split `data` into ready-to-send MSGF frames.
///
/// `chunk_size` is an upper bound; the effective chunk shrinks until the
/// worst-case header over the forwarding path (largest index, hop digits at
/// their widest) plus the chunk fits the MTU.
#[allow(clippy::too_many_arguments)]
pub fn fragment(
    source: NodeId,
    destination: NodeId,
    sequence: u16,
    reliability: Reliability,
    ttl: u8,
    data: &[u8],
    chunk_size: usize,
    max_fragments: u16,
) -> Result<Vec<Frame>, FragmentError> {
    let mut chunk = chunk_size.max(1);
    let (chunk, total) = loop {
        let total = if data.is_empty() {
            1
        } else {
            data.len().div_ceil(chunk)
        };
        if total > max_fragments as usize {
            return Err(FragmentError::TooManyFragments(total, max_fragments));
        }
        let mut probe = Frame::fragment(
            source,
            destination,
            sequence,
            reliability,
            ttl,
            (total - 1) as u16,
            total as u16,
            &[],
        );
        // hop count grows while TTL shrinks along the path; probing with
        // both at the initial TTL bounds the header width
        probe.hop_count = ttl;
        let room = MTU.saturating_sub(probe.header_overhead()).max(1);
        let fit = chunk.min(room);
        if fit == chunk {
            break (chunk, total as u16);
        }
        chunk = fit;
    };

    trace!(%destination, sequence, total, chunk, "fragmenting message");
    if data.is_empty() {
        return Ok(vec![Frame::fragment(
            source,
            destination,
            sequence,
            reliability,
            ttl,
            0,
            1,
            &[],
        )]);
    }
    Ok(data
        .chunks(chunk)
        .enumerate()
        .map(|(index, part)| {
            Frame::fragment(
                source,
                destination,
                sequence,
                reliability,
                ttl,
                index as u16,
                total,
                part,
            )
        })
        .collect())
}

/// Outcome of feeding one fragment to the reassembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentUpdate {
    /// First time this (peer, seq, index) was seen
    pub fresh: bool,
    /// All indices of the message have now arrived
    pub complete: bool,
}

/// In-progress reassembly for one (peer, sequence)
#[derive(Debug)]
struct ReassemblyState {
    sequence: u16,
    total: u16,
    chunks: Vec<Option<Vec<u8>>>,
    received: u16,
    rx_bytes: u64,
    rx_frames: u32,
    last_activity: Instant,
}

impl ReassemblyState {
    fn new(sequence: u16, total: u16, now: Instant) -> Self {
        Self {
            sequence,
            total,
            chunks: vec![None; total as usize],
            received: 0,
            rx_bytes: 0,
            rx_frames: 0,
            last_activity: now,
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.total
    }
}

/// A fully reassembled message with its receive totals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedMessage {
    pub peer: NodeId,
    pub sequence: u16,
    pub data: Vec<u8>,
    pub rx_bytes: u64,
    pub rx_frames: u32,
}

/// Index-addressed reassembly of fragment streams, one context per peer
#[derive(Debug)]
pub struct Reassembler {
    contexts: HashMap<NodeId, ReassemblyState>,
    timeout: Duration,
}

impl Reassembler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            contexts: HashMap::new(),
            timeout,
        }
    }

    /// Feed one received fragment. Out-of-range indices are ignored.
    pub fn accept(
        &mut self,
        peer: NodeId,
        sequence: u16,
        index: u16,
        total: u16,
        chunk: &[u8],
        now: Instant,
    ) -> FragmentUpdate {
        if total == 0 || index >= total {
            debug!(%peer, sequence, index, total, "fragment with bad bounds dropped");
            return FragmentUpdate {
                fresh: false,
                complete: false,
            };
        }

        let replace = match self.contexts.get(&peer) {
            Some(ctx) => ctx.sequence != sequence || ctx.total != total,
            None => true,
        };
        if replace {
            if let Some(old) = self.contexts.get(&peer) {
                if !old.is_complete() {
                    debug!(
                        %peer,
                        old_seq = old.sequence,
                        new_seq = sequence,
                        "incomplete reassembly replaced by newer message"
                    );
                }
            }
            self.contexts
                .insert(peer, ReassemblyState::new(sequence, total, now));
        }

        // one context per peer, inserted above when absent
        let Some(ctx) = self.contexts.get_mut(&peer) else {
            return FragmentUpdate {
                fresh: false,
                complete: false,
            };
        };
        ctx.last_activity = now;
        let slot = &mut ctx.chunks[index as usize];
        if slot.is_some() {
            return FragmentUpdate {
                fresh: false,
                complete: ctx.is_complete(),
            };
        }
        *slot = Some(chunk.to_vec());
        ctx.received += 1;
        ctx.rx_bytes += chunk.len() as u64;
        ctx.rx_frames += 1;
        FragmentUpdate {
            fresh: true,
            complete: ctx.is_complete(),
        }
    }

    /// Remove and return the completed message for `peer`, if any
    pub fn take_completed(&mut self, peer: NodeId) -> Option<CompletedMessage> {
        if !self.contexts.get(&peer)?.is_complete() {
            return None;
        }
        let ctx = self.contexts.remove(&peer)?;
        let mut data = Vec::with_capacity(ctx.rx_bytes as usize);
        for chunk in ctx.chunks.into_iter().flatten() {
            data.extend_from_slice(&chunk);
        }
        Some(CompletedMessage {
            peer,
            sequence: ctx.sequence,
            data,
            rx_bytes: ctx.rx_bytes,
            rx_frames: ctx.rx_frames,
        })
    }

    /// Sequence of the active context for `peer`
    pub fn context_sequence(&self, peer: NodeId) -> Option<u16> {
        self.contexts.get(&peer).map(|ctx| ctx.sequence)
    }

    /// Highest index such that every index up to it has arrived
    pub fn cumulative_high(&self, peer: NodeId) -> Option<u16> {
        let ctx = self.contexts.get(&peer)?;
        let mut high = None;
        for (i, chunk) in ctx.chunks.iter().enumerate() {
            if chunk.is_none() {
                break;
            }
            high = Some(i as u16);
        }
        high
    }

    /// Receipt bitmap over `[base, base+count)` for a block acknowledgment
    pub fn burst_bitmap(&self, peer: NodeId, base: u16, count: u16) -> Option<String> {
        let ctx = self.contexts.get(&peer)?;
        let end = base.saturating_add(count).min(ctx.total);
        if base >= end {
            return None;
        }
        Some(
            (base..end)
                .map(|i| {
                    if ctx.chunks[i as usize].is_some() {
                        '1'
                    } else {
                        '0'
                    }
                })
                .collect(),
        )
    }

    /// Drop contexts idle longer than the timeout, returning how many
    pub fn prune(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.contexts.len();
        self.contexts
            .retain(|_, ctx| now.duration_since(ctx.last_activity) < timeout);
        let dropped = before - self.contexts.len();
        if dropped > 0 {
            debug!(dropped, "stale reassembly contexts pruned");
        }
        dropped
    }
}
