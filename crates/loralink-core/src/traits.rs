//! Core traits and shared types for the link layer
//!
//! The radio and the status display are capabilities the node consumes, kept
//! behind traits so tests can drive whole nodes over an in-memory medium.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::fragment::FragmentError;
use crate::frame::{FrameError, NodeId};

/// Errors surfaced by link operations
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("no route to {0}")]
    NoRoute(NodeId),
    #[error("send aborted after {attempts} attempts")]
    Aborted { attempts: u32 },
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("relay queue full")]
    QueueFull,
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("fragment error: {0}")]
    Fragment(#[from] FragmentError),
    #[error("radio error: {0}")]
    Radio(String),
}

pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// One received frame with its radio metadata
#[derive(Debug, Clone)]
pub struct Reception {
    pub bytes: Vec<u8>,
    pub rssi: f32,
    pub snr: f32,
}

/// Half-duplex radio modem boundary
///
/// `transmit` blocks until airtime completes and the radio has returned to
/// receive mode. `poll_receive` never blocks; the node polls it every tick.
pub trait Radio {
    fn transmit(&mut self, bytes: &[u8]) -> LinkResult<()>;
    fn poll_receive(&mut self) -> Option<Reception>;
}

/// Three-line textual status display, fire-and-forget
pub trait StatusSink {
    fn status(&mut self, line1: &str, line2: &str, line3: &str);
}

/// Status sink that discards all updates
#[derive(Debug, Default)]
pub struct NullStatus;

impl StatusSink for NullStatus {
    fn status(&mut self, _line1: &str, _line2: &str, _line3: &str) {}
}

/// Status sink that forwards updates to the log
#[derive(Debug, Default)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn status(&mut self, line1: &str, line2: &str, line3: &str) {
        info!(target: "loralink::status", "{} | {} | {}", line1, line2, line3);
    }
}

/// Node statistics
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkStats {
    pub frames_tx: u64,
    pub frames_rx: u64,
    pub bytes_tx: u64,
    pub bytes_rx: u64,
    pub frames_forwarded: u64,
    pub duplicates_dropped: u64,
    pub malformed_dropped: u64,
    pub ttl_expired: u64,
    pub queue_drops: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub relay_acks_received: u64,
    pub retransmissions: u64,
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub messages_failed: u64,
    pub messages_received: u64,
    pub route_discoveries: u64,
    pub hellos_sent: u64,
    /// Filled from the routing and neighbor tables on snapshot
    pub route_count: usize,
    pub neighbor_count: usize,
}

/// Returned to the caller when a reliable send succeeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub destination: NodeId,
    pub sequence: u16,
    pub bytes_sent: u64,
    pub frames_sent: u32,
    pub retransmissions: u32,
    /// Whole-message attempts, 1 when the first try succeeded
    pub attempts: u32,
    /// Receiver totals echoed in the final ACK, zero for fire-and-forget
    pub rx_bytes: u64,
    pub rx_frames: u32,
    pub elapsed: Duration,
}
