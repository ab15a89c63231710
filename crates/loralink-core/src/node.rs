//! Link node orchestration
//!
//! `LinkNode` wires every layer together and drives them from one polling
//! loop:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          LinkNode                            │
//! │  send_message ─▶ fragment ─▶ ArqSession ─▶ Radio             │
//! │  poll ─▶ decode ─▶ routes/dedup ─▶ reassembly ─▶ inbox       │
//! │                └▶ relay queue ─▶ tick ─▶ Radio               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The node is synchronous on purpose: the radio is half duplex, so there is
//! never more than one useful thing to do at a time. `send_message` blocks
//! while pumping the receive path, which keeps the node a good citizen of the
//! mesh (it still forwards, acknowledges and answers discovery) for the whole
//! duration of its own transfer.
//!
//! Acknowledgments and route replies we originate are transmitted right
//! away; frames forwarded on behalf of other nodes go through the priority
//! relay queue and drain one per tick.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::arq::{ArqMode, ArqSession};
use crate::config::LinkConfig;
use crate::fragment::{fragment, CompletedMessage, Reassembler};
use crate::frame::{Frame, FrameType, NodeId, Reliability, MTU};
use crate::neighbor::{NeighborInfo, NeighborTable};
use crate::relay::{Enqueued, RelayQueue};
use crate::routing::{DuplicateCache, RouteInfo, RouteTable};
use crate::traits::{
    DeliveryReport, LinkError, LinkResult, LinkStats, NullStatus, Radio, StatusSink,
};

const STATUS_PERIOD: Duration = Duration::from_secs(1);

/// Outbound ARQ session together with its addressing
struct ActiveSend {
    peer: NodeId,
    sequence: u16,
    arq: ArqSession,
}

/// Receiver totals lifted from the latest final ACK
#[derive(Debug, Clone, Copy)]
struct FinalAckNote {
    from: NodeId,
    sequence: u16,
    rx_bytes: u64,
    rx_frames: u32,
}

/// Receive-side burst bookkeeping for block-ack mode
#[derive(Debug, Clone, Copy)]
struct RxBurst {
    sequence: u16,
    base: u16,
    count: u16,
    total: u16,
    last_rx: Instant,
}

struct SessionRun {
    completed: bool,
    retransmissions: u32,
}

/// A complete link-layer node over one radio
pub struct LinkNode<R: Radio> {
    config: LinkConfig,
    node_id: NodeId,
    radio: R,
    status: Box<dyn StatusSink + Send>,
    next_seq: u16,
    routes: RouteTable,
    dup: DuplicateCache,
    relay: RelayQueue,
    neighbors: NeighborTable,
    reassembler: Reassembler,
    inbox: VecDeque<CompletedMessage>,
    session: Option<ActiveSend>,
    final_ack: Option<FinalAckNote>,
    /// Last final ACK sent per peer, replayed when the sender retransmits
    last_final: HashMap<NodeId, Frame>,
    rx_bursts: HashMap<NodeId, RxBurst>,
    stats: LinkStats,
    last_hello: Option<Instant>,
    last_status: Option<Instant>,
}

impl<R: Radio> fmt::Debug for LinkNode<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkNode")
            .field("node_id", &self.node_id)
            .field("routes", &self.routes.len())
            .field("neighbors", &self.neighbors.len())
            .field("sending", &self.session.is_some())
            .finish()
    }
}

impl<R: Radio> LinkNode<R> {
    pub fn new(config: LinkConfig, radio: R) -> Self {
        Self::with_status(config, radio, Box::new(NullStatus))
    }

    pub fn with_status(
        config: LinkConfig,
        radio: R,
        status: Box<dyn StatusSink + Send>,
    ) -> Self {
        let node_id = config.node_id.unwrap_or_else(NodeId::random);
        info!(%node_id, mode = ?config.arq.mode, "link node starting");
        Self {
            node_id,
            radio,
            status,
            next_seq: 0,
            routes: RouteTable::new(config.route_refresh_threshold, config.route_expiry),
            dup: DuplicateCache::new(config.duplicate_ttl, config.duplicate_cache_size),
            relay: RelayQueue::new(config.relay_queue_size, config.relay_max_age),
            neighbors: NeighborTable::new(
                config.neighbor_timeout,
                config.quality_alpha,
                config.rssi_ref_1m,
                config.path_loss_exponent,
            ),
            reassembler: Reassembler::new(config.reassembly_timeout),
            inbox: VecDeque::new(),
            session: None,
            final_ack: None,
            last_final: HashMap::new(),
            rx_bursts: HashMap::new(),
            stats: LinkStats::default(),
            last_hello: None,
            last_status: None,
            config,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Install a static route, bypassing discovery
    pub fn add_route(&mut self, destination: NodeId, next_hop: NodeId, hop_count: u8) {
        self.routes
            .offer(destination, next_hop, hop_count, 0.0, Instant::now());
    }

    /// Next message waiting for the application, if any
    pub fn receive(&mut self) -> Option<CompletedMessage> {
        self.inbox.pop_front()
    }

    /// Counters snapshot with derived fields filled in
    pub fn stats(&self) -> LinkStats {
        let mut stats = self.stats.clone();
        stats.queue_drops = self.relay.drops();
        stats.route_count = self.routes.len();
        stats.neighbor_count = self.neighbors.len();
        stats
    }

    pub fn routes_snapshot(&self) -> Vec<RouteInfo> {
        self.routes.snapshot(Instant::now())
    }

    pub fn neighbors_snapshot(&self) -> Vec<NeighborInfo> {
        self.neighbors.snapshot(Instant::now())
    }

    /// One trip around the service loop: drain the radio, then run timers
    pub fn poll(&mut self) {
        self.pump_inbound();
        self.tick();
    }

    /// Service the node for `duration`, forwarding and delivering as usual
    pub fn run_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            self.poll();
            std::thread::sleep(self.config.poll_interval);
        }
    }

    /// Send `data` to `destination` with the given reliability. Blocks until
    /// the message is confirmed, fails, or (for fire-and-forget) is on the
    /// air. Discovers a route first when none is known.
    pub fn send_message(
        &mut self,
        destination: NodeId,
        data: &[u8],
        reliability: Reliability,
    ) -> LinkResult<DeliveryReport> {
        let started = Instant::now();
        let sequence = self.alloc_seq();
        self.stats.messages_sent += 1;

        if destination.is_broadcast() {
            return self.send_broadcast(sequence, data, started);
        }
        self.ensure_route(destination)?;

        // worst-case header over the path decides the single-frame fast path
        let mut probe = Frame::data(
            self.node_id,
            destination,
            sequence,
            reliability,
            self.config.default_ttl,
            &[],
        );
        probe.hop_count = self.config.default_ttl;
        if probe.header_overhead() + data.len() <= MTU {
            self.send_single(destination, sequence, data, reliability, started)
        } else {
            self.send_fragmented(destination, sequence, data, reliability, started)
        }
    }

    /// Flood a route request for `target` and wait for the table to learn a
    /// next hop, up to the discovery timeout.
    pub fn discover_route(&mut self, target: NodeId) -> LinkResult<NodeId> {
        self.stats.route_discoveries += 1;
        let sequence = self.alloc_seq();
        let request =
            Frame::route_request(self.node_id, target, sequence, self.config.default_ttl);
        info!(%target, sequence, "route discovery started");
        self.transmit_frame(&request)?;

        let deadline = Instant::now() + self.config.route_discovery_timeout;
        loop {
            self.poll();
            let now = Instant::now();
            if let Some(next) = self.routes.next_hop(target, now) {
                info!(%target, %next, "route discovered");
                self.notify(&format!("route {} via {}", target, next));
                return Ok(next);
            }
            if now >= deadline {
                debug!(%target, "route discovery timed out");
                self.notify(&format!("no route to {}", target));
                return Err(LinkError::NoRoute(target));
            }
            std::thread::sleep(self.config.poll_interval);
        }
    }

    /// Run housekeeping: expire state, drain one relay frame, beacon
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.reassembler.prune(now);
        self.routes.prune(now);
        self.dup.prune(now);
        self.neighbors.prune(now);
        self.flush_burst_acks(now);

        if let Some(frame) = self.relay.pop(now) {
            match self.transmit_frame(&frame) {
                Ok(()) => self.stats.frames_forwarded += 1,
                Err(err) => warn!(%err, "relay transmission failed"),
            }
        }

        if let Some(interval) = self.config.hello_interval {
            let due = self
                .last_hello
                .map(|t| now.duration_since(t) >= interval)
                .unwrap_or(true);
            if due {
                let hello = Frame::hello(self.node_id, self.alloc_seq());
                self.relay.enqueue(hello, now);
                self.last_hello = Some(now);
                self.stats.hellos_sent += 1;
            }
        }

        let status_due = self
            .last_status
            .map(|t| now.duration_since(t) >= STATUS_PERIOD)
            .unwrap_or(true);
        if status_due {
            self.update_status();
            self.last_status = Some(now);
        }
    }

    fn alloc_seq(&mut self) -> u16 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    fn ensure_route(&mut self, destination: NodeId) -> LinkResult<NodeId> {
        if let Some(next) = self.routes.next_hop(destination, Instant::now()) {
            return Ok(next);
        }
        self.discover_route(destination)
    }

    fn send_broadcast(
        &mut self,
        sequence: u16,
        data: &[u8],
        started: Instant,
    ) -> LinkResult<DeliveryReport> {
        // broadcast is always fire-and-forget
        let ttl = self.config.default_ttl;
        let mut probe = Frame::data(
            self.node_id,
            NodeId::BROADCAST,
            sequence,
            Reliability::None,
            ttl,
            &[],
        );
        probe.hop_count = ttl;
        let frames = if probe.header_overhead() + data.len() <= MTU {
            vec![Frame::data(
                self.node_id,
                NodeId::BROADCAST,
                sequence,
                Reliability::None,
                ttl,
                data,
            )]
        } else {
            fragment(
                self.node_id,
                NodeId::BROADCAST,
                sequence,
                Reliability::None,
                ttl,
                data,
                self.config.chunk_size,
                self.config.max_fragments,
            )?
        };
        let count = frames.len() as u32;
        for frame in &frames {
            self.transmit_frame(frame)?;
            if count > 1 {
                std::thread::sleep(self.config.arq.fragment_spacing);
            }
        }
        Ok(DeliveryReport {
            destination: NodeId::BROADCAST,
            sequence,
            bytes_sent: data.len() as u64,
            frames_sent: count,
            retransmissions: 0,
            attempts: 1,
            rx_bytes: 0,
            rx_frames: 0,
            elapsed: started.elapsed(),
        })
    }

    fn send_single(
        &mut self,
        destination: NodeId,
        sequence: u16,
        data: &[u8],
        reliability: Reliability,
        started: Instant,
    ) -> LinkResult<DeliveryReport> {
        let frame = Frame::data(
            self.node_id,
            destination,
            sequence,
            reliability,
            self.config.default_ttl,
            data,
        );
        if !reliability.wants_ack() {
            self.transmit_frame(&frame)?;
            return Ok(DeliveryReport {
                destination,
                sequence,
                bytes_sent: data.len() as u64,
                frames_sent: 1,
                retransmissions: 0,
                attempts: 1,
                rx_bytes: 0,
                rx_frames: 0,
                elapsed: started.elapsed(),
            });
        }

        let tries = self.config.message_tries(reliability);
        for attempt in 1..=tries {
            self.transmit_frame(&frame)?;
            if let Some(note) = self.await_final_ack(destination, sequence, reliability) {
                self.stats.messages_delivered += 1;
                if attempt > 1 {
                    self.stats.retransmissions += (attempt - 1) as u64;
                }
                return Ok(DeliveryReport {
                    destination,
                    sequence,
                    bytes_sent: data.len() as u64,
                    frames_sent: 1,
                    retransmissions: attempt - 1,
                    attempts: attempt,
                    rx_bytes: note.rx_bytes,
                    rx_frames: note.rx_frames,
                    elapsed: started.elapsed(),
                });
            }
            debug!(%destination, sequence, attempt, "final acknowledgment timed out");
        }
        self.stats.messages_failed += 1;
        self.notify(&format!("no final ack d={} q={}", destination, sequence));
        Err(LinkError::Timeout("final acknowledgment"))
    }

    fn send_fragmented(
        &mut self,
        destination: NodeId,
        sequence: u16,
        data: &[u8],
        reliability: Reliability,
        started: Instant,
    ) -> LinkResult<DeliveryReport> {
        let frames = fragment(
            self.node_id,
            destination,
            sequence,
            reliability,
            self.config.default_ttl,
            data,
            self.config.chunk_size,
            self.config.max_fragments,
        )?;
        let total = frames.len() as u16;

        if !reliability.wants_ack() {
            for frame in &frames {
                self.transmit_frame(frame)?;
                std::thread::sleep(self.config.arq.fragment_spacing);
            }
            return Ok(DeliveryReport {
                destination,
                sequence,
                bytes_sent: data.len() as u64,
                frames_sent: total as u32,
                retransmissions: 0,
                attempts: 1,
                rx_bytes: 0,
                rx_frames: 0,
                elapsed: started.elapsed(),
            });
        }

        let tries = self.config.message_tries(reliability);
        let mut retransmissions = 0u32;
        for attempt in 1..=tries {
            let run = self.run_arq_session(destination, sequence, &frames, total)?;
            retransmissions += run.retransmissions;
            self.stats.retransmissions += run.retransmissions as u64;
            if !run.completed {
                // the session already spent its per-fragment retry budget;
                // the message-level loop only covers final-ack timeouts
                debug!(%destination, sequence, attempt, "delivery session aborted");
                self.stats.messages_failed += 1;
                self.notify(&format!("abort d={} q={}", destination, sequence));
                return Err(LinkError::Aborted { attempts: attempt });
            }
            if let Some(note) = self.await_final_ack(destination, sequence, reliability) {
                self.stats.messages_delivered += 1;
                return Ok(DeliveryReport {
                    destination,
                    sequence,
                    bytes_sent: data.len() as u64,
                    frames_sent: total as u32,
                    retransmissions,
                    attempts: attempt,
                    rx_bytes: note.rx_bytes,
                    rx_frames: note.rx_frames,
                    elapsed: started.elapsed(),
                });
            }
            debug!(%destination, sequence, attempt, "final acknowledgment timed out, message resent");
        }
        self.stats.messages_failed += 1;
        self.notify(&format!("no final ack d={} q={}", destination, sequence));
        Err(LinkError::Timeout("final acknowledgment"))
    }

    fn run_arq_session(
        &mut self,
        peer: NodeId,
        sequence: u16,
        frames: &[Frame],
        total: u16,
    ) -> LinkResult<SessionRun> {
        let arq = &self.config.arq;
        self.session = Some(ActiveSend {
            peer,
            sequence,
            arq: ArqSession::new(
                arq.mode,
                total,
                arq.ack_timeout,
                arq.max_fragment_retries,
                arq.listen_slot,
            ),
        });
        let spacing = self.config.arq.fragment_spacing;

        loop {
            self.poll();
            let now = Instant::now();
            let (due, completed, aborted, retransmissions) = match self.session.as_mut() {
                Some(active) => {
                    active.arq.poll_timeouts(now);
                    (
                        active.arq.due(now),
                        active.arq.is_complete(),
                        active.arq.is_aborted(),
                        active.arq.retransmissions(),
                    )
                }
                None => (Vec::new(), false, true, 0),
            };

            if completed || aborted {
                self.session = None;
                return Ok(SessionRun {
                    completed,
                    retransmissions,
                });
            }
            if due.is_empty() {
                std::thread::sleep(self.config.poll_interval);
                continue;
            }
            for index in due {
                if let Some(frame) = frames.get(index as usize) {
                    if let Err(err) = self.transmit_frame(frame) {
                        self.session = None;
                        return Err(err);
                    }
                    std::thread::sleep(spacing);
                }
            }
        }
    }

    fn await_final_ack(
        &mut self,
        from: NodeId,
        sequence: u16,
        reliability: Reliability,
    ) -> Option<FinalAckNote> {
        let deadline = Instant::now() + self.config.final_ack_timeout(reliability);
        loop {
            self.poll();
            if let Some(note) = self.take_final_ack(from, sequence) {
                return Some(note);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(self.config.poll_interval);
        }
    }

    fn take_final_ack(&mut self, from: NodeId, sequence: u16) -> Option<FinalAckNote> {
        match &self.final_ack {
            Some(note) if note.from == from && note.sequence == sequence => self.final_ack.take(),
            _ => None,
        }
    }

    fn pump_inbound(&mut self) {
        while let Some(reception) = self.radio.poll_receive() {
            self.stats.frames_rx += 1;
            self.stats.bytes_rx += reception.bytes.len() as u64;
            match Frame::decode(&reception.bytes) {
                Ok(frame) => self.dispatch_frame(frame, reception.rssi, reception.snr),
                Err(err) => {
                    self.stats.malformed_dropped += 1;
                    debug!(%err, len = reception.bytes.len(), "malformed frame dropped");
                }
            }
        }
    }

    fn dispatch_frame(&mut self, frame: Frame, rssi: f32, snr: f32) {
        if frame.source == self.node_id || frame.via == self.node_id {
            trace!("own frame echoed back, ignored");
            return;
        }
        let now = Instant::now();
        self.neighbors.heard(frame.via, rssi, snr, now);
        let link_rssi = self
            .neighbors
            .get(frame.via)
            .map(|n| n.quality.rssi)
            .unwrap_or(rssi);
        if frame.frame_type.refreshes_route() {
            self.routes.offer(
                frame.source,
                frame.via,
                frame.hop_count.saturating_add(1),
                link_rssi,
                now,
            );
            if frame.via != frame.source {
                self.routes.offer(frame.via, frame.via, 1, link_rssi, now);
            }
        }

        if frame.is_for(self.node_id) {
            match frame.frame_type {
                FrameType::Data => self.handle_data(frame, now),
                FrameType::Fragment => self.handle_fragment(&frame, now),
                FrameType::Ack => {
                    self.stats.acks_received += 1;
                    if let Some((rx_bytes, rx_frames)) = frame.ack_totals() {
                        self.final_ack = Some(FinalAckNote {
                            from: frame.source,
                            sequence: frame.sequence,
                            rx_bytes,
                            rx_frames,
                        });
                    }
                }
                FrameType::FragmentAck => self.handle_fragment_ack(&frame, now),
                FrameType::BlockAck => self.handle_block_ack(&frame, now),
                FrameType::RouteRequest => self.handle_route_request(&frame, now),
                FrameType::RouteReply => {
                    trace!(replier = %frame.source, "route reply consumed");
                }
                FrameType::Hello => {
                    trace!(from = %frame.source, "hello heard");
                }
                FrameType::RelayAck => {
                    self.stats.relay_acks_received += 1;
                    trace!(relay = %frame.source, "relay confirmed custody");
                }
            }
            return;
        }
        self.forward(frame, now);
    }

    fn handle_data(&mut self, frame: Frame, now: Instant) {
        let unicast = !frame.destination.is_broadcast();
        let message = CompletedMessage {
            peer: frame.source,
            sequence: frame.sequence,
            rx_bytes: frame.payload.len() as u64,
            rx_frames: 1,
            data: frame.payload,
        };
        self.deliver(message, frame.reliability, unicast, now);
    }

    fn handle_fragment(&mut self, frame: &Frame, now: Instant) {
        let Some(info) = frame.fragment else { return };
        if info.total == 0 || info.index >= info.total {
            debug!(source = %frame.source, index = info.index, total = info.total, "fragment with bad bounds dropped");
            return;
        }
        let peer = frame.source;
        let unicast = !frame.destination.is_broadcast();

        // retransmission of a message already delivered: only re-acknowledge
        if self.dup.seen_count(peer, frame.sequence, now) > 0 {
            self.stats.duplicates_dropped += 1;
            if unicast {
                self.reack_delivered(peer, frame.sequence, info.index, info.total);
            }
            return;
        }

        let update = self
            .reassembler
            .accept(peer, frame.sequence, info.index, info.total, &frame.payload, now);
        if !update.fresh {
            self.stats.duplicates_dropped += 1;
        }

        if unicast {
            match self.config.arq.mode {
                ArqMode::StopAndWait | ArqMode::SelectiveRepeat { .. } => {
                    let ack = Frame::fragment_ack(
                        self.node_id,
                        peer,
                        frame.sequence,
                        self.config.default_ttl,
                        info.index,
                        info.total,
                    );
                    self.send_ack(ack);
                }
                ArqMode::GoBackN { .. } => {
                    // cumulative: acknowledge the in-order high water mark
                    if let Some(high) = self.reassembler.cumulative_high(peer) {
                        let ack = Frame::fragment_ack(
                            self.node_id,
                            peer,
                            frame.sequence,
                            self.config.default_ttl,
                            high,
                            info.total,
                        );
                        self.send_ack(ack);
                    }
                }
                ArqMode::BlockAck { burst } => {
                    let burst = burst.max(1);
                    let base = (info.index / burst) * burst;
                    let count = burst.min(info.total - base);
                    if info.index + 1 == base + count || update.complete {
                        if let Some(bitmap) = self.reassembler.burst_bitmap(peer, base, count) {
                            let back = Frame::block_ack(
                                self.node_id,
                                peer,
                                frame.sequence,
                                self.config.default_ttl,
                                base,
                                info.total,
                                &bitmap,
                            );
                            self.send_ack(back);
                        }
                        self.rx_bursts.remove(&peer);
                    } else {
                        self.rx_bursts.insert(
                            peer,
                            RxBurst {
                                sequence: frame.sequence,
                                base,
                                count,
                                total: info.total,
                                last_rx: now,
                            },
                        );
                    }
                }
            }
        }

        if update.complete {
            if let Some(message) = self.reassembler.take_completed(peer) {
                self.deliver(message, frame.reliability, unicast, now);
            }
        }
    }

    /// Re-acknowledge fragments of a message that was already handed to the
    /// application, so a sender that lost our acks can still finish.
    fn reack_delivered(&mut self, peer: NodeId, sequence: u16, index: u16, total: u16) {
        match self.config.arq.mode {
            ArqMode::StopAndWait | ArqMode::SelectiveRepeat { .. } => {
                let ack = Frame::fragment_ack(
                    self.node_id,
                    peer,
                    sequence,
                    self.config.default_ttl,
                    index,
                    total,
                );
                self.send_ack(ack);
            }
            ArqMode::GoBackN { .. } => {
                let ack = Frame::fragment_ack(
                    self.node_id,
                    peer,
                    sequence,
                    self.config.default_ttl,
                    total - 1,
                    total,
                );
                self.send_ack(ack);
            }
            ArqMode::BlockAck { burst } => {
                let burst = burst.max(1);
                let base = (index / burst) * burst;
                let count = burst.min(total - base);
                let bitmap: String = "1".repeat(count as usize);
                let back = Frame::block_ack(
                    self.node_id,
                    peer,
                    sequence,
                    self.config.default_ttl,
                    base,
                    total,
                    &bitmap,
                );
                self.send_ack(back);
            }
        }
        if let Some(ack) = self.last_final.get(&peer) {
            if ack.sequence == sequence {
                let ack = ack.clone();
                self.send_ack(ack);
            }
        }
    }

    fn deliver(
        &mut self,
        message: CompletedMessage,
        reliability: Reliability,
        unicast: bool,
        now: Instant,
    ) {
        let peer = message.peer;
        let sequence = message.sequence;
        let (rx_bytes, rx_frames) = (message.rx_bytes, message.rx_frames);
        if self.dup.observe(peer, sequence, now) {
            self.stats.messages_received += 1;
            info!(%peer, sequence, bytes = rx_bytes, frames = rx_frames, "message received");
            self.inbox.push_back(message);
        } else {
            self.stats.duplicates_dropped += 1;
            trace!(%peer, sequence, "duplicate message suppressed");
        }
        if unicast && reliability.wants_ack() {
            let ack = Frame::final_ack(
                self.node_id,
                peer,
                sequence,
                self.config.default_ttl,
                rx_bytes,
                rx_frames,
            );
            self.last_final.insert(peer, ack.clone());
            self.send_ack(ack);
        }
    }

    fn handle_fragment_ack(&mut self, frame: &Frame, now: Instant) {
        self.stats.acks_received += 1;
        let Some(info) = frame.fragment else { return };
        if let Some(active) = self.session.as_mut() {
            if active.peer == frame.source && active.sequence == frame.sequence {
                active.arq.on_fragment_ack(info.index, now);
            }
        }
    }

    fn handle_block_ack(&mut self, frame: &Frame, now: Instant) {
        self.stats.acks_received += 1;
        let Some(info) = frame.fragment else { return };
        let bitmap = frame.back_bitmap().unwrap_or("");
        if let Some(active) = self.session.as_mut() {
            if active.peer == frame.source && active.sequence == frame.sequence {
                active.arq.on_block_ack(info.index, bitmap, now);
            }
        }
    }

    fn handle_route_request(&mut self, frame: &Frame, now: Instant) {
        if !self.dup.observe(frame.source, frame.sequence, now) {
            self.stats.duplicates_dropped += 1;
            return;
        }
        let Some(target) = frame.rreq_target() else {
            debug!(origin = %frame.source, "route request with bad target dropped");
            return;
        };
        if target == self.node_id {
            // reverse route was just learned, answer straight back
            let reply =
                Frame::route_reply(self.node_id, frame.source, frame.sequence, self.config.default_ttl);
            info!(origin = %frame.source, "answering route request");
            if let Err(err) = self.transmit_frame(&reply) {
                warn!(%err, "route reply transmission failed");
            }
            return;
        }
        match frame.forwarded_by(self.node_id) {
            Some(fwd) => {
                self.relay.enqueue(fwd, now);
            }
            None => {
                self.stats.ttl_expired += 1;
            }
        }
    }

    fn forward(&mut self, frame: Frame, now: Instant) {
        let Some(fwd) = frame.forwarded_by(self.node_id) else {
            self.stats.ttl_expired += 1;
            debug!(source = %frame.source, destination = %frame.destination, "ttl exhausted, frame dropped");
            return;
        };
        if self.routes.next_hop(fwd.destination, now).is_none() {
            debug!(destination = %fwd.destination, "no route to forward, frame dropped");
            return;
        }
        let wants_rack = fwd.reliability.wants_relay_ack()
            && matches!(fwd.frame_type, FrameType::Data | FrameType::Fragment);
        let (source, sequence) = (frame.source, frame.sequence);
        match self.relay.enqueue(fwd, now) {
            Enqueued::Stored | Enqueued::Displaced => {
                if wants_rack {
                    let rack =
                        Frame::relay_ack(self.node_id, source, sequence, self.config.default_ttl);
                    if let Err(err) = self.transmit_frame(&rack) {
                        warn!(%err, "relay ack transmission failed");
                    }
                }
            }
            Enqueued::Rejected => {
                debug!(%source, sequence, "relay queue rejected frame");
                self.notify(&format!("relay queue full, s={} dropped", source));
            }
        }
    }

    /// Send overdue burst bitmaps once the inter-fragment gap has passed
    fn flush_burst_acks(&mut self, now: Instant) {
        if self.rx_bursts.is_empty() {
            return;
        }
        let gap = self.config.arq.burst_gap;
        let due: Vec<NodeId> = self
            .rx_bursts
            .iter()
            .filter(|(_, burst)| now.duration_since(burst.last_rx) >= gap)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in due {
            let Some(burst) = self.rx_bursts.remove(&peer) else {
                continue;
            };
            if let Some(bitmap) = self.reassembler.burst_bitmap(peer, burst.base, burst.count) {
                trace!(%peer, base = burst.base, %bitmap, "burst gap elapsed, bitmap sent");
                let back = Frame::block_ack(
                    self.node_id,
                    peer,
                    burst.sequence,
                    self.config.default_ttl,
                    burst.base,
                    burst.total,
                    &bitmap,
                );
                self.send_ack(back);
            }
        }
    }

    fn send_ack(&mut self, ack: Frame) {
        match self.transmit_frame(&ack) {
            Ok(()) => self.stats.acks_sent += 1,
            Err(err) => warn!(%err, "acknowledgment transmission failed"),
        }
    }

    fn transmit_frame(&mut self, frame: &Frame) -> LinkResult<()> {
        let bytes = frame.encode()?;
        self.radio.transmit(&bytes)?;
        self.stats.frames_tx += 1;
        self.stats.bytes_tx += bytes.len() as u64;
        trace!(
            frame_type = ?frame.frame_type,
            destination = %frame.destination,
            len = bytes.len(),
            "frame transmitted"
        );
        Ok(())
    }

    /// Push an event line through the status sink, ahead of the periodic
    /// counter refresh
    fn notify(&mut self, event: &str) {
        let line1 = format!("node {}", self.node_id);
        let line3 = format!(
            "tx {} rx {} fwd {}",
            self.stats.frames_tx, self.stats.frames_rx, self.stats.frames_forwarded
        );
        self.status.status(&line1, event, &line3);
    }

    fn update_status(&mut self) {
        let line1 = format!("node {}", self.node_id);
        let line2 = format!(
            "tx {} rx {} fwd {}",
            self.stats.frames_tx, self.stats.frames_rx, self.stats.frames_forwarded
        );
        let line3 = format!(
            "rt {} nb {} msg {}",
            self.routes.len(),
            self.neighbors.len(),
            self.stats.messages_received
        );
        self.status.status(&line1, &line2, &line3);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArqConfig;
    use crate::traits::Reception;
    use std::sync::{Arc, Mutex};

    struct TestRadio {
        sent: Vec<Vec<u8>>,
        inbound: VecDeque<Reception>,
    }

    impl TestRadio {
        fn new() -> Self {
            Self {
                sent: Vec::new(),
                inbound: VecDeque::new(),
            }
        }

        fn push_frame(&mut self, frame: &Frame) {
            self.inbound.push_back(Reception {
                bytes: frame.encode().unwrap(),
                rssi: -70.0,
                snr: 8.0,
            });
        }
    }

    impl Radio for TestRadio {
        fn transmit(&mut self, bytes: &[u8]) -> LinkResult<()> {
            self.sent.push(bytes.to_vec());
            Ok(())
        }

        fn poll_receive(&mut self) -> Option<Reception> {
            self.inbound.pop_front()
        }
    }

    fn node(id: u16) -> LinkNode<TestRadio> {
        node_with(id, |_| {})
    }

    fn node_with(id: u16, tweak: impl FnOnce(&mut LinkConfig)) -> LinkNode<TestRadio> {
        let mut config = LinkConfig {
            node_id: Some(NodeId::from_u16(id)),
            poll_interval: Duration::from_millis(1),
            hello_interval: None,
            ..Default::default()
        };
        tweak(&mut config);
        LinkNode::new(config, TestRadio::new())
    }

    fn sent_frames(node: &LinkNode<TestRadio>) -> Vec<Frame> {
        node.radio()
            .sent
            .iter()
            .map(|bytes| Frame::decode(bytes).unwrap())
            .collect()
    }

    fn id(n: u16) -> NodeId {
        NodeId::from_u16(n)
    }

    #[test]
    fn test_fire_and_forget_single_frame() {
        let mut a = node(0xa);
        a.add_route(id(0xc), id(0xb), 2);
        let report = a.send_message(id(0xc), b"hi", Reliability::None).unwrap();
        assert_eq!(report.attempts, 1);
        assert_eq!(report.frames_sent, 1);

        let sent = sent_frames(&a);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].frame_type, FrameType::Data);
        assert_eq!(sent[0].destination, id(0xc));
        assert_eq!(sent[0].via, id(0xa));
        assert_eq!(a.stats().messages_sent, 1);
    }

    #[test]
    fn test_reliable_send_completes_on_final_ack() {
        let mut a = node(0xa);
        a.add_route(id(0xc), id(0xc), 1);
        let ack = Frame::final_ack(id(0xc), id(0xa), 0, 5, 2, 1);
        a.radio_mut().push_frame(&ack);

        let report = a.send_message(id(0xc), b"hi", Reliability::Medium).unwrap();
        assert_eq!(report.attempts, 1);
        assert_eq!(report.rx_bytes, 2);
        assert_eq!(report.rx_frames, 1);
        assert_eq!(a.stats().messages_delivered, 1);
        assert_eq!(a.stats().acks_received, 1);
    }

    #[test]
    fn test_send_without_route_fails_discovery() {
        let mut a = node_with(0xa, |cfg| {
            cfg.route_discovery_timeout = Duration::from_millis(30);
        });
        let err = a.send_message(id(0xc), b"hi", Reliability::None).unwrap_err();
        assert!(matches!(err, LinkError::NoRoute(target) if target == id(0xc)));

        let sent = sent_frames(&a);
        assert_eq!(sent[0].frame_type, FrameType::RouteRequest);
        assert_eq!(sent[0].rreq_target(), Some(id(0xc)));
        assert_eq!(a.stats().route_discoveries, 1);
    }

    #[test]
    fn test_delivery_acks_and_suppresses_duplicate() {
        let mut b = node(0xb);
        let msg = Frame::data(id(0xa), id(0xb), 9, Reliability::Medium, 5, b"hello");
        b.radio_mut().push_frame(&msg);
        b.poll();

        let received = b.receive().unwrap();
        assert_eq!(received.peer, id(0xa));
        assert_eq!(received.data, b"hello");
        let sent = sent_frames(&b);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].frame_type, FrameType::Ack);
        assert_eq!(sent[0].ack_totals(), Some((5, 1)));

        // retransmission: acknowledged again, delivered once
        b.radio_mut().push_frame(&msg);
        b.poll();
        assert!(b.receive().is_none());
        let sent = sent_frames(&b);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].frame_type, FrameType::Ack);
        assert_eq!(b.stats().duplicates_dropped, 1);
        assert_eq!(b.stats().messages_received, 1);
    }

    #[test]
    fn test_forwarding_rewrites_path_fields() {
        let mut b = node(0xb);
        b.add_route(id(0xc), id(0xc), 1);
        let msg = Frame::data(id(0xa), id(0xc), 4, Reliability::Medium, 5, b"x");
        b.radio_mut().push_frame(&msg);
        b.poll();
        b.tick();

        let sent = sent_frames(&b);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].frame_type, FrameType::Data);
        assert_eq!(sent[0].ttl, 4);
        assert_eq!(sent[0].hop_count, 1);
        assert_eq!(sent[0].via, id(0xb));
        assert_eq!(sent[0].source, id(0xa));
        assert_eq!(b.stats().frames_forwarded, 1);
    }

    #[test]
    fn test_ttl_exhausted_frame_not_forwarded() {
        let mut b = node(0xb);
        b.add_route(id(0xc), id(0xc), 1);
        let msg = Frame::data(id(0xa), id(0xc), 4, Reliability::Medium, 1, b"x");
        b.radio_mut().push_frame(&msg);
        b.poll();
        b.tick();

        assert!(sent_frames(&b).is_empty());
        assert_eq!(b.stats().ttl_expired, 1);
    }

    #[test]
    fn test_route_request_target_replies() {
        let mut b = node(0xb);
        let rreq = Frame::route_request(id(0xa), id(0xb), 3, 5);
        b.radio_mut().push_frame(&rreq);
        b.poll();

        let sent = sent_frames(&b);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].frame_type, FrameType::RouteReply);
        assert_eq!(sent[0].destination, id(0xa));
        assert_eq!(sent[0].sequence, 3);
        // reverse route learned from the request
        assert_eq!(b.routes_snapshot()[0].destination, "a");
    }

    #[test]
    fn test_route_request_forwarded_once() {
        let mut b = node(0xb);
        let rreq = Frame::route_request(id(0xa), id(0xc), 3, 5);
        b.radio_mut().push_frame(&rreq);
        b.poll();
        b.tick();

        let sent = sent_frames(&b);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].frame_type, FrameType::RouteRequest);
        assert_eq!(sent[0].hop_count, 1);
        assert_eq!(sent[0].ttl, 4);
        assert_eq!(sent[0].via, id(0xb));

        // the same flood heard again goes nowhere
        b.radio_mut().push_frame(&rreq);
        b.poll();
        b.tick();
        assert_eq!(sent_frames(&b).len(), 1);
        assert_eq!(b.stats().duplicates_dropped, 1);
    }

    #[test]
    fn test_critical_forward_confirms_custody() {
        let mut b = node(0xb);
        b.add_route(id(0xc), id(0xc), 1);
        let msg = Frame::data(id(0xa), id(0xc), 4, Reliability::Critical, 5, b"x");
        b.radio_mut().push_frame(&msg);
        b.poll();

        let sent = sent_frames(&b);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].frame_type, FrameType::RelayAck);
        assert_eq!(sent[0].destination, id(0xa));
        assert_eq!(sent[0].sequence, 4);

        b.tick();
        let sent = sent_frames(&b);
        assert_eq!(sent[1].frame_type, FrameType::Data);
    }

    #[test]
    fn test_hello_beacon_emitted() {
        let mut a = node_with(0xa, |cfg| {
            cfg.hello_interval = Some(Duration::ZERO);
        });
        a.tick();
        a.tick();
        let sent = sent_frames(&a);
        assert!(sent.iter().any(|f| f.frame_type == FrameType::Hello));
        assert!(a.stats().hellos_sent >= 1);
    }

    #[test]
    fn test_go_back_n_receiver_acks_cumulative() {
        let mut b = node_with(0xb, |cfg| {
            cfg.arq.mode = ArqMode::GoBackN { window: 4 };
        });
        for index in [0u16, 1] {
            let frag = Frame::fragment(id(0xa), id(0xb), 7, Reliability::Medium, 5, index, 3, b"x");
            b.radio_mut().push_frame(&frag);
            b.poll();
        }
        let sent = sent_frames(&b);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].frame_type, FrameType::FragmentAck);
        assert_eq!(sent[0].fragment.unwrap().index, 0);
        assert_eq!(sent[1].fragment.unwrap().index, 1);
    }

    #[test]
    fn test_selective_repeat_receiver_acks_out_of_order() {
        let mut b = node_with(0xb, |cfg| {
            cfg.arq.mode = ArqMode::SelectiveRepeat { window: 4 };
        });
        let frag = Frame::fragment(id(0xa), id(0xb), 7, Reliability::Medium, 5, 1, 3, b"x");
        b.radio_mut().push_frame(&frag);
        b.poll();

        let sent = sent_frames(&b);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].frame_type, FrameType::FragmentAck);
        assert_eq!(sent[0].fragment.unwrap().index, 1);
    }

    #[test]
    fn test_block_ack_receiver_sends_bitmap_and_delivers() {
        let mut b = node_with(0xb, |cfg| {
            cfg.arq.mode = ArqMode::BlockAck { burst: 4 };
        });
        for index in 0u16..4 {
            let frag =
                Frame::fragment(id(0xa), id(0xb), 7, Reliability::Medium, 5, index, 4, b"data-");
            b.radio_mut().push_frame(&frag);
            b.poll();
        }
        let sent = sent_frames(&b);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].frame_type, FrameType::BlockAck);
        assert_eq!(sent[0].back_bitmap(), Some("1111"));
        assert_eq!(sent[0].fragment.unwrap().index, 0);
        assert_eq!(sent[1].frame_type, FrameType::Ack);

        let message = b.receive().unwrap();
        assert_eq!(message.data.len(), 20);
        assert_eq!(message.rx_frames, 4);
    }

    #[test]
    fn test_own_echo_ignored() {
        let mut a = node(0xa);
        let mut echo = Frame::data(id(0xa), id(0xc), 1, Reliability::Medium, 5, b"x");
        echo.via = id(0xa);
        a.radio_mut().push_frame(&echo);
        a.poll();

        assert!(a.receive().is_none());
        assert!(sent_frames(&a).is_empty());
        assert_eq!(a.stats().frames_rx, 1);
    }

    #[test]
    fn test_session_abort_after_retry_ceiling() {
        let mut a = node_with(0xa, |cfg| {
            cfg.arq = ArqConfig {
                ack_timeout: Duration::from_millis(10),
                max_fragment_retries: 1,
                fragment_spacing: Duration::from_millis(1),
                ..Default::default()
            };
        });
        a.add_route(id(0xc), id(0xc), 1);
        let data = vec![0u8; 450];
        let err = a.send_message(id(0xc), &data, Reliability::Medium).unwrap_err();
        // the session abort is final; the message-level retry loop only
        // covers final-ack timeouts
        assert!(matches!(err, LinkError::Aborted { attempts: 1 }));
        assert_eq!(a.stats().messages_failed, 1);
        assert!(a.stats().retransmissions > 0);
        // 3 fragments, one window send plus one base-timer resend each
        assert_eq!(sent_frames(&a).len(), 6);
    }

    struct RecordingStatus(Arc<Mutex<Vec<String>>>);

    impl StatusSink for RecordingStatus {
        fn status(&mut self, _line1: &str, line2: &str, _line3: &str) {
            self.0.lock().unwrap().push(line2.to_string());
        }
    }

    fn recording_node(
        id: u16,
        tweak: impl FnOnce(&mut LinkConfig),
    ) -> (LinkNode<TestRadio>, Arc<Mutex<Vec<String>>>) {
        let mut config = LinkConfig {
            node_id: Some(NodeId::from_u16(id)),
            poll_interval: Duration::from_millis(1),
            hello_interval: None,
            ..Default::default()
        };
        tweak(&mut config);
        let lines = Arc::new(Mutex::new(Vec::new()));
        let node = LinkNode::with_status(
            config,
            TestRadio::new(),
            Box::new(RecordingStatus(lines.clone())),
        );
        (node, lines)
    }

    #[test]
    fn test_status_reports_discovery_timeout() {
        let (mut a, lines) = recording_node(0xa, |cfg| {
            cfg.route_discovery_timeout = Duration::from_millis(20);
        });
        assert!(a.discover_route(id(0xc)).is_err());
        let lines = lines.lock().unwrap();
        assert!(lines.iter().any(|l| l.contains("no route to c")), "{lines:?}");
    }

    #[test]
    fn test_status_reports_session_abort() {
        let (mut a, lines) = recording_node(0xa, |cfg| {
            cfg.arq = ArqConfig {
                ack_timeout: Duration::from_millis(10),
                max_fragment_retries: 1,
                fragment_spacing: Duration::from_millis(1),
                ..Default::default()
            };
        });
        a.add_route(id(0xc), id(0xc), 1);
        let data = vec![0u8; 450];
        assert!(a.send_message(id(0xc), &data, Reliability::Medium).is_err());
        let lines = lines.lock().unwrap();
        assert!(lines.iter().any(|l| l.starts_with("abort d=c")), "{lines:?}");
    }

    #[test]
    fn test_status_reports_relay_queue_overflow() {
        let (mut b, lines) = recording_node(0xb, |cfg| {
            cfg.relay_queue_size = 1;
        });
        b.add_route(id(0xc), id(0xc), 1);
        for seq in [1u16, 2u16] {
            let mut data = Frame::data(id(0xa), id(0xc), seq, Reliability::Low, 5, b"x");
            data.via = id(0xa);
            b.radio_mut().push_frame(&data);
        }
        b.poll();
        let lines = lines.lock().unwrap();
        assert!(lines.iter().any(|l| l.contains("relay queue full")), "{lines:?}");
        assert_eq!(b.stats().queue_drops, 1);
    }
}
