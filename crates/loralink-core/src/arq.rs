//! ARQ transmit engine
//!
//! One session drives the reliable delivery of one fragmented message. The
//! four strategies share a single state machine; the mode only changes which
//! fragments are due and how acknowledgments move the window:
//!
//! ```text
//!            ┌──────────┐  all fragments acked   ┌──────┐
//!   start ──▶│  ACTIVE  │───────────────────────▶│ DONE │
//!            │ send/wait│                        └──────┘
//!            └────┬─────┘
//!                 │ retry ceiling exceeded       ┌─────────┐
//!                 └─────────────────────────────▶│ ABORTED │
//!                                                └─────────┘
//! ```
//!
//! The session is pure bookkeeping: `due()` hands back fragment indices to
//! put on the air and the caller reports acknowledgments and the passage of
//! time. Nothing here touches the radio, which keeps every window rule
//! testable with plain `Instant` arithmetic.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Selectable retransmission strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArqMode {
    /// One fragment in flight, acked before the next is sent
    StopAndWait,
    /// Sliding window with cumulative acknowledgments
    GoBackN { window: u16 },
    /// Sliding window with per-fragment acknowledgments
    SelectiveRepeat { window: u16 },
    /// Bursts acknowledged by one receipt bitmap per burst
    BlockAck { burst: u16 },
}

impl ArqMode {
    fn window(&self) -> u16 {
        match self {
            ArqMode::StopAndWait => 1,
            ArqMode::GoBackN { window } | ArqMode::SelectiveRepeat { window } => (*window).max(1),
            ArqMode::BlockAck { burst } => (*burst).max(1),
        }
    }
}

impl Default for ArqMode {
    fn default() -> Self {
        ArqMode::GoBackN { window: 4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    Done,
    Aborted,
}

/// Sliding-window delivery state for one message's fragments
#[derive(Debug)]
pub struct ArqSession {
    mode: ArqMode,
    total: u16,
    base: u16,
    next_to_send: u16,
    burst_end: u16,
    acked: Vec<bool>,
    sent_at: Vec<Option<Instant>>,
    ever_sent: Vec<bool>,
    retries: Vec<u32>,
    ack_timeout: Duration,
    max_retries: u32,
    listen_slot: Duration,
    awaiting_bitmap: bool,
    listen_started: Option<Instant>,
    retransmissions: u32,
    state: SessionState,
}

impl ArqSession {
    pub fn new(
        mode: ArqMode,
        total: u16,
        ack_timeout: Duration,
        max_retries: u32,
        listen_slot: Duration,
    ) -> Self {
        let n = total as usize;
        Self {
            mode,
            total,
            base: 0,
            next_to_send: 0,
            burst_end: mode.window().min(total),
            acked: vec![false; n],
            sent_at: vec![None; n],
            ever_sent: vec![false; n],
            retries: vec![0; n],
            ack_timeout,
            max_retries,
            listen_slot,
            awaiting_bitmap: false,
            listen_started: None,
            retransmissions: 0,
            state: if total == 0 {
                SessionState::Done
            } else {
                SessionState::Active
            },
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Done
    }

    pub fn is_aborted(&self) -> bool {
        self.state == SessionState::Aborted
    }

    /// (acknowledged prefix, total)
    pub fn progress(&self) -> (u16, u16) {
        (self.base, self.total)
    }

    pub fn retransmissions(&self) -> u32 {
        self.retransmissions
    }

    /// Fragment indices to transmit now, in index order. Marks them as sent
    /// at `now`; repeated offers of the same index count as retransmissions.
    pub fn due(&mut self, now: Instant) -> Vec<u16> {
        if self.state != SessionState::Active {
            return Vec::new();
        }
        match self.mode {
            ArqMode::BlockAck { .. } => self.due_burst(now),
            _ => self.due_window(now),
        }
    }

    fn due_window(&mut self, now: Instant) -> Vec<u16> {
        let end = self.base.saturating_add(self.mode.window()).min(self.total);
        let mut out = Vec::new();
        for i in self.base..end {
            let slot = i as usize;
            if self.acked[slot] || self.sent_at[slot].is_some() {
                continue;
            }
            self.sent_at[slot] = Some(now);
            if self.ever_sent[slot] {
                self.retransmissions += 1;
            }
            self.ever_sent[slot] = true;
            if i >= self.next_to_send {
                self.next_to_send = i + 1;
            }
            out.push(i);
        }
        out
    }

    fn due_burst(&mut self, now: Instant) -> Vec<u16> {
        if self.awaiting_bitmap {
            return Vec::new();
        }
        let mut out = Vec::new();
        for i in self.base..self.burst_end {
            let slot = i as usize;
            if self.acked[slot] || self.sent_at[slot].is_some() {
                continue;
            }
            self.sent_at[slot] = Some(now);
            if self.ever_sent[slot] {
                self.retransmissions += 1;
            }
            self.ever_sent[slot] = true;
            out.push(i);
        }
        if out.is_empty() {
            // whole burst on the air, switch to the listen slot
            self.awaiting_bitmap = true;
            self.listen_started = Some(now);
            trace!(base = self.base, end = self.burst_end, "burst sent, listening");
        }
        out
    }

    /// Process a per-fragment acknowledgment (ACKF)
    pub fn on_fragment_ack(&mut self, index: u16, _now: Instant) {
        if self.state != SessionState::Active {
            return;
        }
        if index >= self.next_to_send {
            debug!(index, next = self.next_to_send, "ack for unsent fragment ignored");
            return;
        }
        match self.mode {
            ArqMode::GoBackN { .. } => {
                // cumulative: everything up to and including index is acked
                if index < self.base {
                    return;
                }
                for i in self.base..=index {
                    self.acked[i as usize] = true;
                }
                self.base = index + 1;
            }
            ArqMode::StopAndWait | ArqMode::SelectiveRepeat { .. } => {
                if index < self.base {
                    return;
                }
                self.acked[index as usize] = true;
                while self.base < self.total && self.acked[self.base as usize] {
                    self.base += 1;
                }
            }
            ArqMode::BlockAck { .. } => {
                debug!(index, "per-fragment ack ignored in block-ack mode");
                return;
            }
        }
        if self.base == self.total {
            self.state = SessionState::Done;
        }
    }

    /// Process a burst bitmap (BACK). `'1'` marks a received fragment;
    /// positions past the end of the bitmap count as missing.
    pub fn on_block_ack(&mut self, ack_base: u16, bitmap: &str, _now: Instant) {
        if self.state != SessionState::Active {
            return;
        }
        if ack_base != self.base {
            debug!(ack_base, base = self.base, "bitmap for stale burst ignored");
            return;
        }
        let bits: Vec<char> = bitmap.chars().collect();
        self.awaiting_bitmap = false;
        self.listen_started = None;
        for (j, i) in (self.base..self.burst_end).enumerate() {
            let slot = i as usize;
            if self.acked[slot] {
                continue;
            }
            if bits.get(j) == Some(&'1') {
                self.acked[slot] = true;
            } else {
                self.retries[slot] += 1;
                if self.retries[slot] > self.max_retries {
                    debug!(index = i, "fragment retry ceiling exceeded");
                    self.state = SessionState::Aborted;
                    return;
                }
                self.sent_at[slot] = None;
            }
        }
        if (self.base..self.burst_end).all(|i| self.acked[i as usize]) {
            self.base = self.burst_end;
            self.burst_end = self
                .burst_end
                .saturating_add(self.mode.window())
                .min(self.total);
            if self.base == self.total {
                self.state = SessionState::Done;
            }
        }
    }

    /// Apply the mode's timeout rule at `now`. Clears timed-out fragments so
    /// the next `due()` re-offers them, or aborts past the retry ceiling.
    pub fn poll_timeouts(&mut self, now: Instant) {
        if self.state != SessionState::Active {
            return;
        }
        match self.mode {
            ArqMode::StopAndWait | ArqMode::GoBackN { .. } => self.poll_base_timer(now),
            ArqMode::SelectiveRepeat { .. } => self.poll_fragment_timers(now),
            ArqMode::BlockAck { .. } => self.poll_listen_slot(now),
        }
    }

    fn poll_base_timer(&mut self, now: Instant) {
        let base = self.base as usize;
        if self.base >= self.total {
            return;
        }
        let Some(sent) = self.sent_at[base] else {
            return;
        };
        if now.duration_since(sent) < self.ack_timeout {
            return;
        }
        self.retries[base] += 1;
        if self.retries[base] > self.max_retries {
            debug!(index = self.base, "fragment retry ceiling exceeded");
            self.state = SessionState::Aborted;
            return;
        }
        // go back: everything sent past base goes on the air again
        for i in self.base..self.next_to_send {
            if !self.acked[i as usize] {
                self.sent_at[i as usize] = None;
            }
        }
        trace!(
            base = self.base,
            next = self.next_to_send,
            retry = self.retries[base],
            "ack timeout, window queued for retransmission"
        );
    }

    fn poll_fragment_timers(&mut self, now: Instant) {
        let end = self.base.saturating_add(self.mode.window()).min(self.total);
        for i in self.base..end {
            let slot = i as usize;
            if self.acked[slot] {
                continue;
            }
            let Some(sent) = self.sent_at[slot] else {
                continue;
            };
            if now.duration_since(sent) < self.ack_timeout {
                continue;
            }
            self.retries[slot] += 1;
            if self.retries[slot] > self.max_retries {
                debug!(index = i, "fragment retry ceiling exceeded");
                self.state = SessionState::Aborted;
                return;
            }
            self.sent_at[slot] = None;
            trace!(index = i, retry = self.retries[slot], "fragment timed out");
        }
    }

    fn poll_listen_slot(&mut self, now: Instant) {
        let Some(started) = self.listen_started else {
            return;
        };
        if now.duration_since(started) < self.listen_slot {
            return;
        }
        // no bitmap at all: the whole outstanding burst counts as missing
        self.awaiting_bitmap = false;
        self.listen_started = None;
        for i in self.base..self.burst_end {
            let slot = i as usize;
            if self.acked[slot] {
                continue;
            }
            self.retries[slot] += 1;
            if self.retries[slot] > self.max_retries {
                debug!(index = i, "fragment retry ceiling exceeded");
                self.state = SessionState::Aborted;
                return;
            }
            self.sent_at[slot] = None;
        }
        trace!(base = self.base, "listen slot expired, burst queued again");
    }
}
