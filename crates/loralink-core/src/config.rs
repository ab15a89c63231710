//! Node and ARQ configuration
//!
//! Defaults follow the timings the protocol was tuned with on SX127x-class
//! radios: 200-byte chunks, 2 s fragment ack timeout, 10 s route discovery,
//! HELLO beacons every 60 s.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::arq::ArqMode;
use crate::frame::{NodeId, Reliability};

/// LoRa time-on-air model, used for simulator timing and airtime reporting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AirtimeModel {
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    /// Coding rate denominator, 5 for 4/5 through 8 for 4/8
    pub coding_rate: u8,
    /// Preamble length in symbols including the 4.25 sync tail
    pub preamble_symbols: f64,
}

impl Default for AirtimeModel {
    fn default() -> Self {
        Self {
            spreading_factor: 9,
            bandwidth_hz: 125_000,
            coding_rate: 5,
            preamble_symbols: 12.25,
        }
    }
}

impl AirtimeModel {
    /// Duration of one LoRa symbol
    pub fn symbol_time(&self) -> Duration {
        let secs = (1u32 << self.spreading_factor) as f64 / self.bandwidth_hz as f64;
        Duration::from_secs_f64(secs)
    }

    /// Estimated time on air for a frame of `payload_len` bytes.
    /// Explicit header and CRC on, low-data-rate optimization off.
    pub fn time_on_air(&self, payload_len: usize) -> Duration {
        let sf = self.spreading_factor as f64;
        let numerator = 8.0 * payload_len as f64 - 4.0 * sf + 28.0 + 16.0;
        let payload_symbols = 8.0 + ((numerator / (4.0 * sf)).ceil() * self.coding_rate as f64).max(0.0);
        let symbols = self.preamble_symbols + payload_symbols;
        Duration::from_secs_f64(symbols * self.symbol_time().as_secs_f64())
    }
}

/// ARQ strategy and timer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArqConfig {
    pub mode: ArqMode,
    /// Per-fragment (or window base) acknowledgment timeout
    pub ack_timeout: Duration,
    /// Retry ceiling per fragment before the message aborts
    pub max_fragment_retries: u32,
    /// Sender-side wait for a burst bitmap in block-ack mode
    pub listen_slot: Duration,
    /// Receiver-side gap after which a partial burst is acknowledged
    pub burst_gap: Duration,
    /// Pause between back-to-back fragment transmissions
    pub fragment_spacing: Duration,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            mode: ArqMode::default(),
            ack_timeout: Duration::from_secs(2),
            max_fragment_retries: 4,
            listen_slot: Duration::from_millis(1500),
            burst_gap: Duration::from_millis(300),
            fragment_spacing: Duration::from_millis(20),
        }
    }
}

/// Complete node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Fixed identity, or None to generate one at startup
    pub node_id: Option<NodeId>,
    /// Upper bound for fragment payload bytes (auto-shrinks to the MTU)
    pub chunk_size: usize,
    /// Largest fragment count a single message may need
    pub max_fragments: u16,
    /// Initial TTL for originated frames
    pub default_ttl: u8,
    pub arq: ArqConfig,
    pub route_discovery_timeout: Duration,
    /// Equal-hop routes refresh in place only after this age
    pub route_refresh_threshold: Duration,
    /// Routes expire after this long without a refresh
    pub route_expiry: Duration,
    pub duplicate_ttl: Duration,
    pub duplicate_cache_size: usize,
    pub relay_queue_size: usize,
    /// Queued relay frames older than this are dropped
    pub relay_max_age: Duration,
    /// HELLO beacon period, None disables beaconing
    pub hello_interval: Option<Duration>,
    /// Receive poll period inside blocking waits
    pub poll_interval: Duration,
    pub reassembly_timeout: Duration,
    pub neighbor_timeout: Duration,
    pub airtime: AirtimeModel,
    /// RSSI smoothing factor
    pub quality_alpha: f32,
    /// Expected RSSI one metre from the transmitter, dBm
    pub rssi_ref_1m: f32,
    pub path_loss_exponent: f32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            chunk_size: 200,
            max_fragments: 1024,
            default_ttl: 5,
            arq: ArqConfig::default(),
            route_discovery_timeout: Duration::from_secs(10),
            route_refresh_threshold: Duration::from_secs(30),
            route_expiry: Duration::from_secs(180),
            duplicate_ttl: Duration::from_secs(300),
            duplicate_cache_size: 256,
            relay_queue_size: 16,
            relay_max_age: Duration::from_secs(30),
            hello_interval: Some(Duration::from_secs(60)),
            poll_interval: Duration::from_millis(5),
            reassembly_timeout: Duration::from_secs(300),
            neighbor_timeout: Duration::from_secs(300),
            airtime: AirtimeModel::default(),
            quality_alpha: 0.3,
            rssi_ref_1m: -40.0,
            path_loss_exponent: 2.8,
        }
    }
}

impl LinkConfig {
    /// Whole-message attempts for a reliability level
    pub fn message_tries(&self, reliability: Reliability) -> u32 {
        match reliability {
            Reliability::None => 1,
            Reliability::Low => 2,
            Reliability::Medium => 3,
            Reliability::High => 4,
            Reliability::Critical => 6,
        }
    }

    /// End-to-end final acknowledgment timeout for a reliability level
    pub fn final_ack_timeout(&self, reliability: Reliability) -> Duration {
        match reliability {
            Reliability::None => Duration::ZERO,
            Reliability::Low => Duration::from_secs(2),
            Reliability::Medium => Duration::from_secs(5),
            Reliability::High => Duration::from_secs(8),
            Reliability::Critical => Duration::from_secs(15),
        }
    }
}
