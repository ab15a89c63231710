//! Wire frame types and framing
//!
//! This module defines the frame structure and the text codec used on the
//! air. Every frame is an ASCII header followed by an opaque payload tail:
//!
//! ```text
//! ┌──────┬──────────────────────────────────────────────┬──────────────┐
//! │ TYPE │ |S<src>|D<dst>|Q<seq>[|F<idx>/<tot>]         │ |:<payload>  │
//! │      │ |H<hop>|L<ttl>|R<rel>|V<via>                 │ (raw bytes)  │
//! └──────┴──────────────────────────────────────────────┴──────────────┘
//!
//! MSG |S1a2b|D3c4d|Q17|H0|L5|R2|V1a2b|:Hello
//! MSGF|S1a2b|D3c4d|Q18|F3/12|H0|L5|R3|V1a2b|:<chunk bytes>
//! BACK|S3c4d|D1a2b|Q18|F0/12|H0|L5|R0|V3c4d|:11101111
//! ```
//!
//! Node ids are 16-bit values in lowercase hex (`ffff` is broadcast). The
//! `V` field names the immediate transmitter and is rewritten by every
//! forwarding node, which is how receivers attribute RSSI and learn next
//! hops. Everything after the first `|:` is payload and may contain any
//! byte, including delimiters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Largest encoded frame the radio will carry.
pub const MTU: usize = 255;

/// Node identifier - 16-bit unique ID, hex on the wire
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u16);

impl NodeId {
    /// Broadcast address (all bits set)
    pub const BROADCAST: NodeId = NodeId(0xFFFF);

    /// Unknown/unset address
    pub const UNKNOWN: NodeId = NodeId(0x0000);

    /// Create a NodeId from a u16
    pub fn from_u16(value: u16) -> Self {
        NodeId(value)
    }

    /// Convert to u16
    pub fn to_u16(&self) -> u16 {
        self.0
    }

    /// Parse a NodeId from its wire hex form
    pub fn from_hex(s: &str) -> Result<Self, FrameError> {
        if s.is_empty() || s.len() > 4 {
            return Err(FrameError::InvalidNodeId(s.to_string()));
        }
        u16::from_str_radix(s, 16)
            .map(NodeId)
            .map_err(|_| FrameError::InvalidNodeId(s.to_string()))
    }

    /// Generate a random NodeId, never broadcast or unknown
    pub fn random() -> Self {
        // Low timestamp bits are unique enough for a small deployment
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut id = (now ^ (now >> 16) ^ (now >> 32)) as u16;
        if id == Self::BROADCAST.0 || id == Self::UNKNOWN.0 {
            id = 0x0001;
        }
        NodeId(id)
    }

    /// Check if this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:x})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeId::from_hex(s)
    }
}

/// Frame types carried on the air
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    /// Single-packet application message
    Data,
    /// One fragment of a larger message
    Fragment,
    /// End-to-end final acknowledgment, payload carries rx totals
    Ack,
    /// Per-fragment acknowledgment
    FragmentAck,
    /// Aggregated bitmap acknowledgment for a burst
    BlockAck,
    /// Route request (flooded)
    RouteRequest,
    /// Route reply (unicast back along the reverse route)
    RouteReply,
    /// Neighbor beacon, never forwarded
    Hello,
    /// Hop-by-hop relay acknowledgment
    RelayAck,
}

impl FrameType {
    /// Wire name, the first field of every frame
    pub fn wire_name(&self) -> &'static str {
        match self {
            FrameType::Data => "MSG",
            FrameType::Fragment => "MSGF",
            FrameType::Ack => "ACK",
            FrameType::FragmentAck => "ACKF",
            FrameType::BlockAck => "BACK",
            FrameType::RouteRequest => "RREQ",
            FrameType::RouteReply => "RREP",
            FrameType::Hello => "HELLO",
            FrameType::RelayAck => "RACK",
        }
    }

    /// Parse a wire name
    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "MSG" => Some(FrameType::Data),
            "MSGF" => Some(FrameType::Fragment),
            "ACK" => Some(FrameType::Ack),
            "ACKF" => Some(FrameType::FragmentAck),
            "BACK" => Some(FrameType::BlockAck),
            "RREQ" => Some(FrameType::RouteRequest),
            "RREP" => Some(FrameType::RouteReply),
            "HELLO" => Some(FrameType::Hello),
            "RACK" => Some(FrameType::RelayAck),
            _ => None,
        }
    }

    /// Whether frames of this type carry the `F<idx>/<total>` field
    pub fn has_fragment_field(&self) -> bool {
        matches!(
            self,
            FrameType::Fragment | FrameType::FragmentAck | FrameType::BlockAck
        )
    }

    /// Whether forwarding increments the hop count. Acknowledgments pass
    /// through relays at constant hop so their count still describes the
    /// acknowledged path.
    pub fn increments_hop(&self) -> bool {
        matches!(
            self,
            FrameType::Data | FrameType::Fragment | FrameType::RouteRequest | FrameType::RouteReply
        )
    }

    /// Whether receiving this type refreshes a route to its source
    pub fn refreshes_route(&self) -> bool {
        !matches!(
            self,
            FrameType::Ack | FrameType::FragmentAck | FrameType::BlockAck | FrameType::RelayAck
        )
    }
}

/// Delivery reliability carried in every frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Reliability {
    /// Fire and forget, no acknowledgment
    None,
    Low,
    Medium,
    High,
    /// Highest effort, relays additionally confirm with RACK
    Critical,
}

impl Reliability {
    /// Parse a wire level (0-4)
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Reliability::None),
            1 => Some(Reliability::Low),
            2 => Some(Reliability::Medium),
            3 => Some(Reliability::High),
            4 => Some(Reliability::Critical),
            _ => None,
        }
    }

    /// Wire level (0-4)
    pub fn level(&self) -> u8 {
        match self {
            Reliability::None => 0,
            Reliability::Low => 1,
            Reliability::Medium => 2,
            Reliability::High => 3,
            Reliability::Critical => 4,
        }
    }

    /// Whether the receiver owes an end-to-end ACK
    pub fn wants_ack(&self) -> bool {
        *self != Reliability::None
    }

    /// Whether relays owe a hop-by-hop RACK
    pub fn wants_relay_ack(&self) -> bool {
        *self == Reliability::Critical
    }
}

impl Default for Reliability {
    fn default() -> Self {
        Reliability::Medium
    }
}

/// Fragment position within a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentInfo {
    pub index: u16,
    pub total: u16,
}

/// Frame codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame exceeds MTU: {0} bytes")]
    TooLarge(usize),
    #[error("missing |: payload marker")]
    NoPayloadMarker,
    #[error("header is not valid text")]
    HeaderNotText,
    #[error("unknown frame type: {0}")]
    UnknownType(String),
    #[error("missing field {0}")]
    MissingField(char),
    #[error("field {0} is not a number")]
    InvalidNumber(char),
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),
    #[error("invalid reliability level: {0}")]
    InvalidReliability(u8),
    #[error("unexpected extra header field")]
    ExtraField,
    #[error("fragment field mismatch for {0}")]
    FragmentField(&'static str),
}

/// A complete link-layer frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub frame_type: FrameType,
    pub source: NodeId,
    pub destination: NodeId,
    pub sequence: u16,
    /// Present exactly for MSGF/ACKF/BACK
    pub fragment: Option<FragmentInfo>,
    pub hop_count: u8,
    pub ttl: u8,
    pub reliability: Reliability,
    /// Immediate transmitter, rewritten on every hop
    pub via: NodeId,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a single-packet data frame
    pub fn data(
        source: NodeId,
        destination: NodeId,
        sequence: u16,
        reliability: Reliability,
        ttl: u8,
        payload: &[u8],
    ) -> Self {
        Self {
            frame_type: FrameType::Data,
            source,
            destination,
            sequence,
            fragment: None,
            hop_count: 0,
            ttl,
            reliability,
            via: source,
            payload: payload.to_vec(),
        }
    }

    /// Create one fragment of a larger message
    pub fn fragment(
        source: NodeId,
        destination: NodeId,
        sequence: u16,
        reliability: Reliability,
        ttl: u8,
        index: u16,
        total: u16,
        chunk: &[u8],
    ) -> Self {
        Self {
            frame_type: FrameType::Fragment,
            source,
            destination,
            sequence,
            fragment: Some(FragmentInfo { index, total }),
            hop_count: 0,
            ttl,
            reliability,
            via: source,
            payload: chunk.to_vec(),
        }
    }

    /// Create the end-to-end final acknowledgment with receiver totals
    pub fn final_ack(
        source: NodeId,
        destination: NodeId,
        sequence: u16,
        ttl: u8,
        rx_bytes: u64,
        rx_frames: u32,
    ) -> Self {
        Self {
            frame_type: FrameType::Ack,
            source,
            destination,
            sequence,
            fragment: None,
            hop_count: 0,
            ttl,
            reliability: Reliability::None,
            via: source,
            payload: format!("{}/{}", rx_bytes, rx_frames).into_bytes(),
        }
    }

    /// Create a per-fragment acknowledgment
    pub fn fragment_ack(
        source: NodeId,
        destination: NodeId,
        sequence: u16,
        ttl: u8,
        index: u16,
        total: u16,
    ) -> Self {
        Self {
            frame_type: FrameType::FragmentAck,
            source,
            destination,
            sequence,
            fragment: Some(FragmentInfo { index, total }),
            hop_count: 0,
            ttl,
            reliability: Reliability::None,
            via: source,
            payload: Vec::new(),
        }
    }

    /// Create a burst bitmap acknowledgment. `bitmap` holds one '1' or '0'
    /// per fragment of the burst starting at `base`.
    pub fn block_ack(
        source: NodeId,
        destination: NodeId,
        sequence: u16,
        ttl: u8,
        base: u16,
        total: u16,
        bitmap: &str,
    ) -> Self {
        Self {
            frame_type: FrameType::BlockAck,
            source,
            destination,
            sequence,
            fragment: Some(FragmentInfo { index: base, total }),
            hop_count: 0,
            ttl,
            reliability: Reliability::None,
            via: source,
            payload: bitmap.as_bytes().to_vec(),
        }
    }

    /// Create a flooded route request for `target`
    pub fn route_request(source: NodeId, target: NodeId, sequence: u16, ttl: u8) -> Self {
        Self {
            frame_type: FrameType::RouteRequest,
            source,
            destination: NodeId::BROADCAST,
            sequence,
            fragment: None,
            hop_count: 0,
            ttl,
            reliability: Reliability::None,
            via: source,
            payload: target.to_string().into_bytes(),
        }
    }

    /// Create a route reply, unicast back to the request originator
    pub fn route_reply(source: NodeId, destination: NodeId, sequence: u16, ttl: u8) -> Self {
        Self {
            frame_type: FrameType::RouteReply,
            source,
            destination,
            sequence,
            fragment: None,
            hop_count: 0,
            ttl,
            reliability: Reliability::None,
            via: source,
            payload: source.to_string().into_bytes(),
        }
    }

    /// Create a neighbor beacon (TTL 1, never forwarded)
    pub fn hello(source: NodeId, sequence: u16) -> Self {
        Self {
            frame_type: FrameType::Hello,
            source,
            destination: NodeId::BROADCAST,
            sequence,
            fragment: None,
            hop_count: 0,
            ttl: 1,
            reliability: Reliability::None,
            via: source,
            payload: Vec::new(),
        }
    }

    /// Create a hop-by-hop relay acknowledgment
    pub fn relay_ack(source: NodeId, destination: NodeId, sequence: u16, ttl: u8) -> Self {
        Self {
            frame_type: FrameType::RelayAck,
            source,
            destination,
            sequence,
            fragment: None,
            hop_count: 0,
            ttl,
            reliability: Reliability::None,
            via: source,
            payload: Vec::new(),
        }
    }

    /// Key for duplicate detection
    pub fn dedup_key(&self) -> (NodeId, u16) {
        (self.source, self.sequence)
    }

    /// Check if this frame is addressed to `node_id` or broadcast
    pub fn is_for(&self, node_id: NodeId) -> bool {
        self.destination.is_broadcast() || self.destination == node_id
    }

    /// Produce the copy a relay transmits, or None when TTL forbids
    /// forwarding. Decrements TTL, increments hop count for the types that
    /// carry a path length, and rewrites `via` to the relay.
    pub fn forwarded_by(&self, relay: NodeId) -> Option<Frame> {
        if self.ttl <= 1 {
            return None;
        }
        let mut fwd = self.clone();
        fwd.ttl -= 1;
        if self.frame_type.increments_hop() {
            fwd.hop_count = fwd.hop_count.saturating_add(1);
        }
        fwd.via = relay;
        Some(fwd)
    }

    /// Receiver totals from a final ACK payload
    pub fn ack_totals(&self) -> Option<(u64, u32)> {
        if self.frame_type != FrameType::Ack {
            return None;
        }
        let text = std::str::from_utf8(&self.payload).ok()?;
        let (bytes, frames) = text.split_once('/')?;
        Some((bytes.parse().ok()?, frames.parse().ok()?))
    }

    /// Queried target of a route request
    pub fn rreq_target(&self) -> Option<NodeId> {
        if self.frame_type != FrameType::RouteRequest {
            return None;
        }
        let text = std::str::from_utf8(&self.payload).ok()?;
        NodeId::from_hex(text).ok()
    }

    /// Burst bitmap of a block acknowledgment
    pub fn back_bitmap(&self) -> Option<&str> {
        if self.frame_type != FrameType::BlockAck {
            return None;
        }
        std::str::from_utf8(&self.payload).ok()
    }

    /// Serialize to wire bytes, failing if the result exceeds the MTU
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.frame_type.has_fragment_field() != self.fragment.is_some() {
            return Err(FrameError::FragmentField(self.frame_type.wire_name()));
        }
        let mut out = Vec::with_capacity(64 + self.payload.len());
        out.extend_from_slice(self.frame_type.wire_name().as_bytes());
        out.extend_from_slice(format!("|S{}|D{}|Q{}", self.source, self.destination, self.sequence).as_bytes());
        if let Some(frag) = &self.fragment {
            out.extend_from_slice(format!("|F{}/{}", frag.index, frag.total).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "|H{}|L{}|R{}|V{}|:",
                self.hop_count,
                self.ttl,
                self.reliability.level(),
                self.via
            )
            .as_bytes(),
        );
        out.extend_from_slice(&self.payload);
        if out.len() > MTU {
            return Err(FrameError::TooLarge(out.len()));
        }
        Ok(out)
    }

    /// Bytes the header contributes for a frame shaped like this one
    pub fn header_overhead(&self) -> usize {
        let mut probe = self.clone();
        probe.payload.clear();
        // Only the payload was removed, so encoding cannot exceed the MTU
        probe.encode().map(|b| b.len()).unwrap_or(MTU)
    }

    /// Parse wire bytes into a frame
    pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
        let marker = bytes
            .windows(2)
            .position(|w| w == b"|:")
            .ok_or(FrameError::NoPayloadMarker)?;
        let payload = bytes[marker + 2..].to_vec();
        let header = std::str::from_utf8(&bytes[..marker]).map_err(|_| FrameError::HeaderNotText)?;

        let mut fields = header.split('|');
        let type_name = fields.next().unwrap_or("");
        let frame_type = FrameType::from_wire_name(type_name)
            .ok_or_else(|| FrameError::UnknownType(type_name.to_string()))?;

        let source = NodeId::from_hex(tagged(&mut fields, 'S')?)?;
        let destination = NodeId::from_hex(tagged(&mut fields, 'D')?)?;
        let sequence = number::<u16>(tagged(&mut fields, 'Q')?, 'Q')?;
        let fragment = if frame_type.has_fragment_field() {
            let field = tagged(&mut fields, 'F')?;
            let (idx, tot) = field.split_once('/').ok_or(FrameError::InvalidNumber('F'))?;
            Some(FragmentInfo {
                index: number::<u16>(idx, 'F')?,
                total: number::<u16>(tot, 'F')?,
            })
        } else {
            None
        };
        let hop_count = number::<u8>(tagged(&mut fields, 'H')?, 'H')?;
        let ttl = number::<u8>(tagged(&mut fields, 'L')?, 'L')?;
        let level = number::<u8>(tagged(&mut fields, 'R')?, 'R')?;
        let reliability =
            Reliability::from_level(level).ok_or(FrameError::InvalidReliability(level))?;
        let via = NodeId::from_hex(tagged(&mut fields, 'V')?)?;
        if fields.next().is_some() {
            return Err(FrameError::ExtraField);
        }

        Ok(Frame {
            frame_type,
            source,
            destination,
            sequence,
            fragment,
            hop_count,
            ttl,
            reliability,
            via,
            payload,
        })
    }
}

fn tagged<'a>(fields: &mut std::str::Split<'a, char>, tag: char) -> Result<&'a str, FrameError> {
    fields
        .next()
        .and_then(|f| f.strip_prefix(tag))
        .ok_or(FrameError::MissingField(tag))
}

fn number<T: std::str::FromStr>(value: &str, tag: char) -> Result<T, FrameError> {
    value.parse().map_err(|_| FrameError::InvalidNumber(tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_hex() {
        let id = NodeId::from_u16(0x1a2b);
        assert_eq!(id.to_string(), "1a2b");
        assert_eq!(NodeId::from_hex("1a2b").unwrap(), id);
        assert_eq!(NodeId::from_hex("ffff").unwrap(), NodeId::BROADCAST);
        assert!(NodeId::BROADCAST.is_broadcast());
        assert!(NodeId::from_hex("").is_err());
        assert!(NodeId::from_hex("12345").is_err());
        assert!(NodeId::from_hex("zz").is_err());
    }

    #[test]
    fn test_data_frame_roundtrip() {
        let src = NodeId::from_u16(0x1a2b);
        let dst = NodeId::from_u16(0x3c4d);
        let frame = Frame::data(src, dst, 17, Reliability::Medium, 5, b"Hello");

        let bytes = frame.encode().unwrap();
        assert!(bytes.starts_with(b"MSG|S1a2b|D3c4d|Q17|H0|L5|R2|V1a2b|:"));
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_fragment_frame_roundtrip() {
        let src = NodeId::from_u16(1);
        let dst = NodeId::from_u16(2);
        let frame = Frame::fragment(src, dst, 18, Reliability::High, 5, 3, 12, b"chunk-data");

        let bytes = frame.encode().unwrap();
        assert!(bytes.starts_with(b"MSGF|S1|D2|Q18|F3/12|"));
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.fragment, Some(FragmentInfo { index: 3, total: 12 }));
        assert_eq!(decoded.payload, b"chunk-data");
    }

    #[test]
    fn test_block_ack_bitmap() {
        let frame = Frame::block_ack(
            NodeId::from_u16(2),
            NodeId::from_u16(1),
            18,
            5,
            8,
            24,
            "11101111",
        );
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.back_bitmap(), Some("11101111"));
        assert_eq!(decoded.fragment, Some(FragmentInfo { index: 8, total: 24 }));
    }

    #[test]
    fn test_final_ack_totals() {
        let frame = Frame::final_ack(NodeId::from_u16(2), NodeId::from_u16(1), 9, 5, 1000, 5);
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.ack_totals(), Some((1000, 5)));
    }

    #[test]
    fn test_rreq_target() {
        let frame = Frame::route_request(NodeId::from_u16(0xa), NodeId::from_u16(0xc), 3, 5);
        assert!(frame.destination.is_broadcast());
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.rreq_target(), Some(NodeId::from_u16(0xc)));
    }

    #[test]
    fn test_payload_may_contain_delimiters() {
        let payload = b"a|:b,c|D99|:end";
        let frame = Frame::data(
            NodeId::from_u16(1),
            NodeId::from_u16(2),
            1,
            Reliability::Low,
            5,
            payload,
        );
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_encode_rejects_oversize() {
        let frame = Frame::data(
            NodeId::from_u16(1),
            NodeId::from_u16(2),
            1,
            Reliability::Low,
            5,
            &[0u8; 300],
        );
        assert!(matches!(frame.encode(), Err(FrameError::TooLarge(_))));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(
            Frame::decode(b"BOGUS|S1|D2|Q1|H0|L5|R0|V1|:"),
            Err(FrameError::UnknownType(_))
        ));
        assert!(matches!(
            Frame::decode(b"MSG|S1|Q1|H0|L5|R0|V1|:x"),
            Err(FrameError::MissingField('D'))
        ));
        assert!(matches!(
            Frame::decode(b"MSG|S1|D2|Qxy|H0|L5|R0|V1|:x"),
            Err(FrameError::InvalidNumber('Q'))
        ));
        assert!(matches!(
            Frame::decode(b"MSG|S1|D2|Q1|H0|L5|R9|V1|:x"),
            Err(FrameError::InvalidReliability(9))
        ));
        assert!(matches!(
            Frame::decode(b"MSG|S1|D2|Q1|H0|L5|R0|V1"),
            Err(FrameError::NoPayloadMarker)
        ));
        assert!(matches!(
            Frame::decode(b"MSG|S1|D2|Q1|H0|L5|R0|V1|X9|:x"),
            Err(FrameError::ExtraField)
        ));
    }

    #[test]
    fn test_forwarded_by_rewrites_path_fields() {
        let relay = NodeId::from_u16(0xb);
        let data = Frame::data(
            NodeId::from_u16(0xa),
            NodeId::from_u16(0xc),
            7,
            Reliability::Medium,
            5,
            b"x",
        );
        let fwd = data.forwarded_by(relay).unwrap();
        assert_eq!(fwd.ttl, 4);
        assert_eq!(fwd.hop_count, 1);
        assert_eq!(fwd.via, relay);
        assert_eq!(fwd.source, data.source);

        // acknowledgments keep their hop count across relays
        let ack = Frame::final_ack(NodeId::from_u16(0xc), NodeId::from_u16(0xa), 7, 5, 1, 1);
        let fwd = ack.forwarded_by(relay).unwrap();
        assert_eq!(fwd.hop_count, 0);
        assert_eq!(fwd.ttl, 4);

        // TTL 1 is never forwarded
        let hello = Frame::hello(NodeId::from_u16(0xa), 1);
        assert!(hello.forwarded_by(relay).is_none());
    }

    #[test]
    fn test_header_overhead_matches_encoding() {
        let frame = Frame::fragment(
            NodeId::from_u16(0xfffe),
            NodeId::from_u16(0xfffd),
            65535,
            Reliability::Critical,
            255,
            1023,
            1024,
            b"payload",
        );
        let encoded = frame.encode().unwrap();
        assert_eq!(frame.header_overhead() + frame.payload.len(), encoded.len());
    }
}
