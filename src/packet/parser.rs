//! Inbound packet parsers
//!
//! Parsers extract only what routing needs: packet kind, stream source id,
//! sequence, timestamp. Media payload decoding belongs to the host's codec
//! layer and is untouched here.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::constants::{RTCP_HEADER_SIZE, RTP_HEADER_SIZE};
use crate::error::PacketError;
use crate::packet::{Packet, PacketKind, PacketPtr, Protocol};
use crate::Nanos;

/// Parses raw datagrams into shared packets.
///
/// One implementation per endpoint protocol. Parsers are stateless and
/// reusable across packets.
pub trait PacketParser: Send {
    fn parse(
        &self,
        data: Bytes,
        addr: SocketAddr,
        capture_time: Option<Nanos>,
    ) -> Result<PacketPtr, PacketError>;
}

/// Quick wire-level check: does this datagram look like RTCP?
///
/// RTCP packet types occupy 200..=204 (SR, RR, SDES, BYE, APP), which
/// cannot collide with RTP payload types thanks to the marker bit rule.
pub fn is_rtcp(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] >> 6 == 2 && (200..=204).contains(&data[1])
}

/// Cheap classification used at the inbound-queue write boundary.
///
/// Only decides whether a datagram belongs on an endpoint of the given
/// protocol; full header validation happens at parse time on the pipeline
/// thread.
pub fn matches_protocol(data: &[u8], proto: Protocol) -> bool {
    if data.len() < 2 || data[0] >> 6 != 2 {
        return false;
    }
    match proto {
        Protocol::Rtcp => is_rtcp(data),
        Protocol::Rtp | Protocol::RtpFec => !is_rtcp(data),
    }
}

/// RTP fixed-header parser producing audio packets.
pub struct RtpParser {
    kind: PacketKind,
}

impl RtpParser {
    pub fn new() -> Self {
        Self {
            kind: PacketKind::Audio,
        }
    }

    fn with_kind(kind: PacketKind) -> Self {
        Self { kind }
    }
}

impl Default for RtpParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketParser for RtpParser {
    fn parse(
        &self,
        data: Bytes,
        addr: SocketAddr,
        capture_time: Option<Nanos>,
    ) -> Result<PacketPtr, PacketError> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(PacketError::TooShort(data.len()));
        }

        let version = data[0] >> 6;
        if version != 2 {
            return Err(PacketError::BadVersion(version));
        }

        let csrc_count = (data[0] & 0x0f) as usize;
        let header_len = RTP_HEADER_SIZE + csrc_count * 4;
        if data.len() < header_len {
            return Err(PacketError::InvalidFormat("truncated CSRC list"));
        }

        let payload_type = data[1] & 0x7f;
        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let source_id = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let payload = data.slice(header_len..);

        Ok(Arc::new(Packet {
            kind: self.kind,
            source_id,
            sequence,
            timestamp,
            payload_type,
            payload,
            addr: Some(addr),
            capture_time,
        }))
    }
}

/// Repair-stream parser: RTP framing carrying FEC payloads.
///
/// Repair packets share the RTP header layout; only the packet kind
/// differs so the router and sessions can account for them separately.
pub struct FecParser {
    inner: RtpParser,
}

impl FecParser {
    pub fn new() -> Self {
        Self {
            inner: RtpParser::with_kind(PacketKind::Repair),
        }
    }
}

impl Default for FecParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketParser for FecParser {
    fn parse(
        &self,
        data: Bytes,
        addr: SocketAddr,
        capture_time: Option<Nanos>,
    ) -> Result<PacketPtr, PacketError> {
        self.inner.parse(data, addr, capture_time)
    }
}

/// RTCP compound-packet parser.
///
/// Validates the leading header and extracts the sender SSRC; the report
/// payload itself is handed to the control-plane communicator untouched.
pub struct RtcpParser;

impl RtcpParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RtcpParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketParser for RtcpParser {
    fn parse(
        &self,
        data: Bytes,
        addr: SocketAddr,
        capture_time: Option<Nanos>,
    ) -> Result<PacketPtr, PacketError> {
        if data.len() < RTCP_HEADER_SIZE {
            return Err(PacketError::TooShort(data.len()));
        }

        let version = data[0] >> 6;
        if version != 2 {
            return Err(PacketError::BadVersion(version));
        }

        if !(200..=204).contains(&data[1]) {
            return Err(PacketError::InvalidFormat("unknown RTCP packet type"));
        }

        // Length field counts 32-bit words minus one; the first packet of
        // a compound must fit in the datagram.
        let length_words = u16::from_be_bytes([data[2], data[3]]) as usize;
        if (length_words + 1) * 4 > data.len() {
            return Err(PacketError::InvalidFormat("RTCP length exceeds datagram"));
        }

        let source_id = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

        Ok(Arc::new(Packet {
            kind: PacketKind::Control,
            source_id,
            sequence: 0,
            timestamp: 0,
            payload_type: data[1],
            payload: data,
            addr: Some(addr),
            capture_time,
        }))
    }
}

/// Build the parser matching an endpoint protocol.
pub fn parser_for(proto: Protocol) -> Box<dyn PacketParser> {
    match proto {
        Protocol::Rtp => Box::new(RtpParser::new()),
        Protocol::RtpFec => Box::new(FecParser::new()),
        Protocol::Rtcp => Box::new(RtcpParser::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn addr() -> SocketAddr {
        "10.0.0.2:6000".parse().unwrap()
    }

    fn rtp_packet(ssrc: u32, seq: u16, ts: u32, pt: u8, payload_len: usize) -> Bytes {
        let mut buf = BytesMut::zeroed(RTP_HEADER_SIZE + payload_len);
        buf[0] = 0x80;
        buf[1] = pt;
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf[4..8].copy_from_slice(&ts.to_be_bytes());
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        buf.freeze()
    }

    fn rtcp_rr(ssrc: u32) -> Bytes {
        let mut buf = BytesMut::zeroed(8);
        buf[0] = 0x80;
        buf[1] = 201; // RR
        buf[2..4].copy_from_slice(&1u16.to_be_bytes()); // 2 words total
        buf[4..8].copy_from_slice(&ssrc.to_be_bytes());
        buf.freeze()
    }

    #[test]
    fn test_rtp_parse_fields() {
        let parser = RtpParser::new();
        let pkt = parser
            .parse(rtp_packet(0xAABBCCDD, 42, 96000, 10, 32), addr(), Some(7))
            .unwrap();

        assert_eq!(pkt.kind, PacketKind::Audio);
        assert_eq!(pkt.source_id, 0xAABBCCDD);
        assert_eq!(pkt.sequence, 42);
        assert_eq!(pkt.timestamp, 96000);
        assert_eq!(pkt.payload_type, 10);
        assert_eq!(pkt.payload.len(), 32);
        assert_eq!(pkt.capture_time, Some(7));
    }

    #[test]
    fn test_rtp_rejects_garbage() {
        let parser = RtpParser::new();

        assert!(matches!(
            parser.parse(Bytes::from_static(b"hi"), addr(), None),
            Err(PacketError::TooShort(2))
        ));

        let mut bad = BytesMut::zeroed(RTP_HEADER_SIZE);
        bad[0] = 0x40; // version 1
        assert!(matches!(
            parser.parse(bad.freeze(), addr(), None),
            Err(PacketError::BadVersion(1))
        ));

        // CSRC count claims more header than the datagram holds
        let mut truncated = BytesMut::zeroed(RTP_HEADER_SIZE);
        truncated[0] = 0x83; // V=2, CC=3
        assert!(matches!(
            parser.parse(truncated.freeze(), addr(), None),
            Err(PacketError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_fec_parser_kind() {
        let parser = FecParser::new();
        let pkt = parser
            .parse(rtp_packet(1, 0, 0, 96, 16), addr(), None)
            .unwrap();
        assert_eq!(pkt.kind, PacketKind::Repair);
    }

    #[test]
    fn test_rtcp_parse() {
        let parser = RtcpParser::new();
        let pkt = parser.parse(rtcp_rr(0x11223344), addr(), None).unwrap();

        assert_eq!(pkt.kind, PacketKind::Control);
        assert_eq!(pkt.source_id, 0x11223344);
    }

    #[test]
    fn test_rtcp_length_check() {
        let parser = RtcpParser::new();
        let mut buf = BytesMut::zeroed(8);
        buf[0] = 0x80;
        buf[1] = 200;
        buf[2..4].copy_from_slice(&6u16.to_be_bytes()); // claims 28 bytes
        assert!(matches!(
            parser.parse(buf.freeze(), addr(), None),
            Err(PacketError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_classification() {
        let rtp = rtp_packet(1, 0, 0, 10, 8);
        let rtcp = rtcp_rr(1);

        assert!(matches_protocol(&rtp, Protocol::Rtp));
        assert!(matches_protocol(&rtp, Protocol::RtpFec));
        assert!(!matches_protocol(&rtp, Protocol::Rtcp));

        assert!(matches_protocol(&rtcp, Protocol::Rtcp));
        assert!(!matches_protocol(&rtcp, Protocol::Rtp));

        assert!(!matches_protocol(b"x", Protocol::Rtp));
    }
}
