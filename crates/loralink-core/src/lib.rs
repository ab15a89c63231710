//! # LoRaLink Core
//!
//! Reliable link layer and mesh routing for half-duplex, low-bandwidth LoRa
//! radios. The crate turns a best-effort broadcast medium into reliable
//! point-to-point delivery of arbitrarily large messages, with on-demand
//! multi-hop routing across relay nodes.
//!
//! ## Layering
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Application                           │
//! │            send_message / receive / discover_route          │
//! └───────────────────────────┬─────────────────────────────────┘
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        LinkNode                             │
//! │  ┌──────────┐ ┌────────────┐ ┌─────────┐ ┌──────────────┐   │
//! │  │ ArqSession│ │ Reassembler│ │RouteTable│ │ RelayQueue  │   │
//! │  └──────────┘ └────────────┘ └─────────┘ └──────────────┘   │
//! │  ┌──────────────┐ ┌────────────────┐                        │
//! │  │DuplicateCache│ │ NeighborTable  │                        │
//! │  └──────────────┘ └────────────────┘                        │
//! └───────────────────────────┬─────────────────────────────────┘
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Frame codec (text wire protocol v1)            │
//! └───────────────────────────┬─────────────────────────────────┘
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Radio trait  (hardware modem or SimMedium)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use loralink_core::prelude::*;
//!
//! let medium = SimMedium::new(SimConfig::default());
//! let radio_a = medium.attach(NodeId::from_u16(0xa), 0.0, 0.0);
//! let radio_b = medium.attach(NodeId::from_u16(0xb), 500.0, 0.0);
//!
//! let mut a = LinkNode::new(
//!     LinkConfig { node_id: Some(NodeId::from_u16(0xa)), ..Default::default() },
//!     radio_a,
//! );
//! let mut b = LinkNode::new(
//!     LinkConfig { node_id: Some(NodeId::from_u16(0xb)), ..Default::default() },
//!     radio_b,
//! );
//!
//! a.add_route(b.node_id(), b.node_id(), 1);
//! let report = a.send_message(b.node_id(), b"Hello", Reliability::Medium);
//! ```
//!
//! Delivery reliability is selectable per message, and the retransmission
//! strategy per node: Stop-and-Wait, Go-Back-N, Selective-Repeat or a
//! TDD-style Block-ACK burst mode, all sharing one session state machine in
//! [`arq`].

pub mod arq;
pub mod config;
pub mod fragment;
pub mod frame;
pub mod neighbor;
pub mod node;
pub mod relay;
pub mod routing;
pub mod sim;
pub mod traits;

pub use arq::{ArqMode, ArqSession};
pub use config::{AirtimeModel, ArqConfig, LinkConfig};
pub use fragment::{fragment, CompletedMessage, FragmentError, Reassembler};
pub use frame::{Frame, FrameError, FrameType, NodeId, Reliability, MTU};
pub use neighbor::{LinkQuality, NeighborInfo, NeighborTable};
pub use node::LinkNode;
pub use relay::{RelayPriority, RelayQueue};
pub use routing::{DuplicateCache, RouteEntry, RouteInfo, RouteTable};
pub use sim::{SimConfig, SimMedium, SimRadio, SimStats};
pub use traits::{
    DeliveryReport, LinkError, LinkResult, LinkStats, LogStatus, NullStatus, Radio, Reception,
    StatusSink,
};

/// Common imports for applications driving a node
pub mod prelude {
    pub use crate::arq::ArqMode;
    pub use crate::config::{ArqConfig, LinkConfig};
    pub use crate::frame::{Frame, FrameType, NodeId, Reliability};
    pub use crate::node::LinkNode;
    pub use crate::sim::{SimConfig, SimMedium, SimRadio};
    pub use crate::traits::{
        DeliveryReport, LinkError, LinkResult, LinkStats, LogStatus, NullStatus, Radio, StatusSink,
    };
}
