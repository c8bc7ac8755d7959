//! Parsed packet representation and routing identity

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::Nanos;

/// Classification of a parsed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Transport media (RTP audio)
    Audio,
    /// Forward-error-correction repair
    Repair,
    /// Control plane (RTCP report/feedback)
    Control,
}

/// Protocol bound to a receiver endpoint.
///
/// One endpoint handles exactly one protocol; dispatching an incoming
/// socket to the endpoint with the matching protocol happens in the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plain RTP media
    Rtp,
    /// RTP carrying FEC repair payloads
    RtpFec,
    /// RTCP reports and feedback
    Rtcp,
}

impl Protocol {
    /// Packet kind this protocol's parser produces.
    pub fn kind(self) -> PacketKind {
        match self {
            Protocol::Rtp => PacketKind::Audio,
            Protocol::RtpFec => PacketKind::Repair,
            Protocol::Rtcp => PacketKind::Control,
        }
    }

    /// Whether a receiver endpoint of this protocol can send packets back.
    ///
    /// Only the control protocol carries receiver feedback.
    pub fn supports_outbound(self) -> bool {
        matches!(self, Protocol::Rtcp)
    }
}

/// Key used to map a packet to a live session.
///
/// The stream source identifier is the primary key; the source address
/// disambiguates senders that (illegally but observably) reuse an SSRC.
/// Control-plane callbacks only know the SSRC, so lookups fall back to a
/// bare source-id index (see [`SessionRouter`](crate::session::SessionRouter)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    /// Stream source identifier (RTP SSRC)
    pub source_id: u32,
    /// Source address, when known
    pub addr: Option<SocketAddr>,
}

impl RoutingKey {
    pub fn new(source_id: u32, addr: Option<SocketAddr>) -> Self {
        Self { source_id, addr }
    }
}

/// A parsed network packet.
///
/// Immutable once built; shared between the queue slot, in-flight routing,
/// and the session via [`PacketPtr`]. The last holder dropping the `Arc`
/// frees the storage.
#[derive(Debug)]
pub struct Packet {
    /// Packet classification
    pub kind: PacketKind,
    /// Stream source identifier (SSRC)
    pub source_id: u32,
    /// Wire sequence number (16-bit for media, 0 for control)
    pub sequence: u16,
    /// Media clock timestamp (0 for control)
    pub timestamp: u32,
    /// RTP payload type (0 for control)
    pub payload_type: u8,
    /// Payload bytes past the parsed header
    pub payload: Bytes,
    /// Source address, when the network layer provided one
    pub addr: Option<SocketAddr>,
    /// Receive timestamp stamped by the network thread, if available
    pub capture_time: Option<Nanos>,
}

/// Shared ownership handle to an immutable packet.
pub type PacketPtr = Arc<Packet>;

impl Packet {
    /// Routing key for session lookup.
    pub fn routing_key(&self) -> RoutingKey {
        RoutingKey::new(self.source_id, self.addr)
    }

    /// True for transport-media or repair packets (the kinds that may
    /// trigger session creation on a routing miss).
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, PacketKind::Audio | PacketKind::Repair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_capabilities() {
        assert_eq!(Protocol::Rtp.kind(), PacketKind::Audio);
        assert_eq!(Protocol::RtpFec.kind(), PacketKind::Repair);
        assert_eq!(Protocol::Rtcp.kind(), PacketKind::Control);

        assert!(!Protocol::Rtp.supports_outbound());
        assert!(!Protocol::RtpFec.supports_outbound());
        assert!(Protocol::Rtcp.supports_outbound());
    }

    #[test]
    fn test_routing_key_identity() {
        let addr: SocketAddr = "192.168.1.10:5000".parse().unwrap();
        let a = RoutingKey::new(0x1234, Some(addr));
        let b = RoutingKey::new(0x1234, Some(addr));
        let c = RoutingKey::new(0x1234, None);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
