//! In-memory channel simulator
//!
//! `SimMedium` models the shared broadcast channel between any number of
//! stations: every transmission is offered to every other station, attenuated
//! by a log-distance path loss model and dropped below the receiver
//! sensitivity. A deterministic drop plan can erase specific transmissions so
//! tests can force retransmissions without randomness.
//!
//! `SimRadio` is one station's handle to the medium and implements the
//! [`Radio`] trait, so a whole `LinkNode` can be driven without hardware.
//! `transmit` blocks for the modelled time on air scaled by
//! `airtime_scale` (zero in tests), matching the half-duplex radio contract.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::trace;

use crate::config::AirtimeModel;
use crate::frame::NodeId;
use crate::traits::{LinkError, LinkResult, Radio, Reception};

/// Channel model parameters
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Transmit power of every station (dBm)
    pub tx_power_dbm: f32,
    /// Weakest signal a station can still decode (dBm)
    pub rx_sensitivity_dbm: f32,
    /// 2.0 free space, 2.7-3.5 suburban, 4+ indoor
    pub path_loss_exponent: f32,
    /// Path loss reference distance (meters)
    pub reference_distance_m: f32,
    /// Background noise floor for the SNR estimate (dBm)
    pub noise_floor_dbm: f32,
    pub airtime: AirtimeModel,
    /// Fraction of the real time on air that `transmit` blocks for
    pub airtime_scale: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tx_power_dbm: 20.0,
            rx_sensitivity_dbm: -130.0,
            path_loss_exponent: 2.8,
            reference_distance_m: 1.0,
            noise_floor_dbm: -120.0,
            airtime: AirtimeModel::default(),
            airtime_scale: 1.0,
        }
    }
}

impl SimConfig {
    pub fn with_tx_power(mut self, dbm: f32) -> Self {
        self.tx_power_dbm = dbm;
        self
    }

    pub fn with_sensitivity(mut self, dbm: f32) -> Self {
        self.rx_sensitivity_dbm = dbm;
        self
    }

    pub fn with_path_loss_exponent(mut self, exponent: f32) -> Self {
        self.path_loss_exponent = exponent;
        self
    }

    pub fn with_airtime_scale(mut self, scale: f64) -> Self {
        self.airtime_scale = scale;
        self
    }

    /// Received power at `distance_m` meters from a transmitter
    pub fn rssi_at(&self, distance_m: f32) -> f32 {
        let d = distance_m.max(self.reference_distance_m);
        self.tx_power_dbm
            - 10.0 * self.path_loss_exponent * (d / self.reference_distance_m).log10()
    }
}

/// Channel counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimStats {
    pub transmissions: u64,
    pub deliveries: u64,
    /// Erased by a drop plan
    pub planned_drops: u64,
    /// Below receiver sensitivity
    pub out_of_range: u64,
}

#[derive(Debug)]
struct Station {
    x: f64,
    y: f64,
    inbox: VecDeque<Reception>,
}

#[derive(Debug, Default)]
struct MediumInner {
    stations: HashMap<NodeId, Station>,
    /// Transmissions already made per station, for drop plan matching
    tx_counts: HashMap<NodeId, u64>,
    /// (station, transmission index) pairs the channel will erase
    drop_plan: HashSet<(NodeId, u64)>,
    stats: SimStats,
}

/// Shared broadcast medium connecting simulated stations
#[derive(Debug, Clone)]
pub struct SimMedium {
    config: SimConfig,
    inner: Arc<Mutex<MediumInner>>,
}

impl SimMedium {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(MediumInner::default())),
        }
    }

    /// Place a station at `(x, y)` meters and hand back its radio
    pub fn attach(&self, id: NodeId, x: f64, y: f64) -> SimRadio {
        let mut inner = self.inner.lock().expect("medium lock");
        inner.stations.insert(
            id,
            Station {
                x,
                y,
                inbox: VecDeque::new(),
            },
        );
        SimRadio {
            id,
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn move_station(&self, id: NodeId, x: f64, y: f64) {
        let mut inner = self.inner.lock().expect("medium lock");
        if let Some(station) = inner.stations.get_mut(&id) {
            station.x = x;
            station.y = y;
        }
    }

    /// Erase the given transmissions from `station` (0-based, in the order
    /// they are made). Everything else is delivered normally.
    pub fn drop_transmissions(&self, station: NodeId, indices: &[u64]) {
        let mut inner = self.inner.lock().expect("medium lock");
        for &index in indices {
            inner.drop_plan.insert((station, index));
        }
    }

    pub fn stats(&self) -> SimStats {
        self.inner.lock().expect("medium lock").stats
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }
}

/// One station's handle to the simulated medium
#[derive(Debug)]
pub struct SimRadio {
    id: NodeId,
    config: SimConfig,
    inner: Arc<Mutex<MediumInner>>,
}

impl SimRadio {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl Radio for SimRadio {
    fn transmit(&mut self, bytes: &[u8]) -> LinkResult<()> {
        let airtime = {
            let mut inner = self.inner.lock().expect("medium lock");
            if !inner.stations.contains_key(&self.id) {
                return Err(LinkError::Radio("station detached from medium".into()));
            }
            let index = inner.tx_counts.entry(self.id).or_insert(0);
            let tx_index = *index;
            *index += 1;
            inner.stats.transmissions += 1;

            if inner.drop_plan.remove(&(self.id, tx_index)) {
                inner.stats.planned_drops += 1;
                trace!(station = %self.id, tx_index, "transmission erased by drop plan");
            } else {
                let (sx, sy) = {
                    let s = &inner.stations[&self.id];
                    (s.x, s.y)
                };
                let mut delivered = Vec::new();
                let mut out_of_range = 0;
                for (&id, station) in &inner.stations {
                    if id == self.id {
                        continue;
                    }
                    let dx = station.x - sx;
                    let dy = station.y - sy;
                    let distance = (dx * dx + dy * dy).sqrt() as f32;
                    let rssi = self.config.rssi_at(distance);
                    if rssi < self.config.rx_sensitivity_dbm {
                        out_of_range += 1;
                        continue;
                    }
                    delivered.push((id, rssi));
                }
                inner.stats.out_of_range += out_of_range;
                for (id, rssi) in delivered {
                    let snr = rssi - self.config.noise_floor_dbm;
                    inner.stats.deliveries += 1;
                    if let Some(station) = inner.stations.get_mut(&id) {
                        station.inbox.push_back(Reception {
                            bytes: bytes.to_vec(),
                            rssi,
                            snr,
                        });
                    }
                }
            }
            self.config.airtime.time_on_air(bytes.len())
        };

        // half duplex: hold the caller for the modelled airtime
        if self.config.airtime_scale > 0.0 {
            let held = Duration::from_secs_f64(airtime.as_secs_f64() * self.config.airtime_scale);
            std::thread::sleep(held);
        }
        Ok(())
    }

    fn poll_receive(&mut self) -> Option<Reception> {
        let mut inner = self.inner.lock().expect("medium lock");
        inner
            .stations
            .get_mut(&self.id)
            .and_then(|station| station.inbox.pop_front())
    }
}
