//! Receiver endpoint
//!
//! One endpoint per bound network address. Holds the inbound parse chain
//! matching its protocol plus the lock-free queue that carries raw
//! datagrams from network threads to the pipeline thread, and — for
//! control endpoints only — the outbound compose/ship chain used for
//! feedback.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::{EndpointError, Result};
use crate::packet::parser::{self, PacketParser};
use crate::packet::{
    InboundQueue, InboundWriter, OutboundWriter, PacketKind, PacketShipper, Protocol, QueueStats,
    RtcpComposer,
};
use crate::session::ReceiverSessionGroup;
use crate::state::StateTracker;
use crate::Nanos;

/// Per-call summary of one `pull_packets` drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullStats {
    /// Raw packets dequeued
    pub pulled: u64,
    /// Packets that parsed successfully
    pub parsed: u64,
    /// Packets dropped for parse failures
    pub parse_failures: u64,
    /// Packets the session group declined non-fatally
    pub route_failures: u64,
    /// Sessions the drain caused to be created
    pub sessions_created: u64,
}

/// Receiver endpoint sub-pipeline for one bound address.
///
/// Either fully constructed and valid, or permanently invalid: callers
/// must check [`is_valid`](Self::is_valid) before use, and every consumer
/// operation on an invalid endpoint fails fast.
pub struct ReceiverEndpoint {
    proto: Protocol,
    bind_addr: SocketAddr,

    queue: InboundQueue,
    parser: Box<dyn PacketParser>,

    // Outbound chain; present only on control endpoints with a writer
    composer: Option<RtcpComposer>,
    shipper: Option<PacketShipper>,

    valid: bool,

    // Cumulative counters across drains
    total_parse_failures: u64,
    total_route_failures: u64,
}

impl ReceiverEndpoint {
    /// Build the endpoint for `proto` bound at `bind_addr`.
    ///
    /// `outbound_writer` must only be supplied for protocols that support
    /// receiver feedback; supplying one for a media or repair endpoint
    /// marks the endpoint invalid rather than silently ignoring it.
    pub fn new(
        proto: Protocol,
        state_tracker: Arc<StateTracker>,
        bind_addr: SocketAddr,
        outbound_writer: Option<Arc<dyn OutboundWriter>>,
    ) -> Self {
        let mut valid = true;
        let mut composer = None;
        let mut shipper = None;

        match (outbound_writer, proto.supports_outbound()) {
            (Some(writer), true) => {
                composer = Some(RtcpComposer::new());
                shipper = Some(PacketShipper::new(writer));
            }
            (Some(_), false) => {
                tracing::error!(
                    ?proto,
                    %bind_addr,
                    "outbound writer supplied for protocol without feedback support"
                );
                valid = false;
            }
            (None, true) => {
                // Control endpoint without a writer: parsing works,
                // feedback shipping will report retry-later.
                composer = Some(RtcpComposer::new());
            }
            (None, false) => {}
        }

        Self {
            proto,
            bind_addr,
            queue: InboundQueue::new(proto, state_tracker),
            parser: parser::parser_for(proto),
            composer,
            shipper,
            valid,
            total_parse_failures: 0,
            total_route_failures: 0,
        }
    }

    /// Whether construction fully succeeded.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn proto(&self) -> Protocol {
        self.proto
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Thread-safe producer handle for network threads.
    ///
    /// Pushing here enqueues the datagram for the next drain; it never
    /// blocks, never parses, and never touches session state.
    pub fn inbound_writer(&self) -> InboundWriter {
        self.queue.writer()
    }

    /// Composer for outbound feedback packets, `None` for protocols
    /// without feedback support.
    pub fn outbound_composer(&self) -> Option<RtcpComposer> {
        self.composer
    }

    /// Shipper for outbound feedback packets, `None` when this endpoint
    /// cannot send (wrong protocol, or no writer supplied).
    pub fn outbound_shipper(&self) -> Option<PacketShipper> {
        self.shipper.clone()
    }

    /// Drain the inbound queue into the session group.
    ///
    /// Must be called from the pipeline thread. A malformed packet is
    /// counted and skipped, never aborting the drain; only fatal
    /// conditions (invalid endpoint, invariant violations downstream)
    /// propagate.
    pub fn pull_packets(
        &mut self,
        group: &mut ReceiverSessionGroup,
        now: Nanos,
    ) -> Result<PullStats> {
        if !self.valid {
            return Err(EndpointError::Invalid.into());
        }

        let mut stats = PullStats::default();

        while let Some(raw) = self.queue.pop() {
            stats.pulled += 1;

            let packet = match self.parser.parse(raw.data, raw.addr, raw.capture_time) {
                Ok(packet) => packet,
                Err(e) => {
                    stats.parse_failures += 1;
                    self.total_parse_failures += 1;
                    tracing::warn!(proto = ?self.proto, error = %e, "dropping unparseable packet");
                    continue;
                }
            };
            stats.parsed += 1;

            // Feedback goes back to wherever control traffic comes from
            if packet.kind == PacketKind::Control {
                if let (Some(shipper), Some(addr)) = (&self.shipper, packet.addr) {
                    shipper.set_dest(addr);
                }
            }

            match group.route_packet(&packet, now) {
                Ok(outcome) => {
                    if outcome == crate::session::RouteOutcome::SessionCreated {
                        stats.sessions_created += 1;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    stats.route_failures += 1;
                    self.total_route_failures += 1;
                    tracing::debug!(error = %e, "packet not routed");
                }
            }
        }

        Ok(stats)
    }

    /// Tear down the intake path: reject further pushes, then discard
    /// everything still queued without invoking session logic.
    pub fn close(&mut self) {
        self.queue.close();
    }

    /// Inbound queue statistics.
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Parse failures across the endpoint's lifetime.
    pub fn total_parse_failures(&self) -> u64 {
        self.total_parse_failures
    }

    /// Non-fatal routing failures across the endpoint's lifetime.
    pub fn total_route_failures(&self) -> u64 {
        self.total_route_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncodingMap, ReceiverConfig};
    use crate::error::PacketError;
    use bytes::{Bytes, BytesMut};

    fn bind() -> SocketAddr {
        "0.0.0.0:5000".parse().unwrap()
    }

    fn sender() -> SocketAddr {
        "192.168.0.20:5000".parse().unwrap()
    }

    fn group() -> ReceiverSessionGroup {
        ReceiverSessionGroup::new(
            ReceiverConfig::default(),
            Arc::new(EncodingMap::new()),
            Arc::new(StateTracker::new()),
        )
    }

    fn rtp_bytes(ssrc: u32, seq: u16) -> Bytes {
        let mut buf = BytesMut::zeroed(20);
        buf[0] = 0x80;
        buf[1] = 10;
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf[4..8].copy_from_slice(&(seq as u32 * 480).to_be_bytes());
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        buf.freeze()
    }

    fn endpoint(proto: Protocol) -> ReceiverEndpoint {
        ReceiverEndpoint::new(proto, Arc::new(StateTracker::new()), bind(), None)
    }

    #[test]
    fn test_pull_routes_to_group() {
        let mut ep = endpoint(Protocol::Rtp);
        let mut group = group();
        let writer = ep.inbound_writer();

        writer.push(rtp_bytes(1, 0), sender()).unwrap();
        writer.push(rtp_bytes(1, 1), sender()).unwrap();
        writer.push(rtp_bytes(2, 0), sender()).unwrap();

        let stats = ep.pull_packets(&mut group, 1_000).unwrap();
        assert_eq!(stats.pulled, 3);
        assert_eq!(stats.parsed, 3);
        assert_eq!(stats.sessions_created, 2);
        assert_eq!(group.num_sessions(), 2);
    }

    #[test]
    fn test_malformed_packet_does_not_abort_drain() {
        let mut ep = endpoint(Protocol::Rtp);
        let mut group = group();
        let writer = ep.inbound_writer();

        writer.push(rtp_bytes(1, 0), sender()).unwrap();
        // Classifies as RTP (version bits ok) but too short to parse
        writer.push(Bytes::from_static(&[0x80, 10, 0]), sender()).unwrap();
        writer.push(rtp_bytes(1, 1), sender()).unwrap();

        let stats = ep.pull_packets(&mut group, 0).unwrap();
        assert_eq!(stats.pulled, 3);
        assert_eq!(stats.parsed, 2);
        assert_eq!(stats.parse_failures, 1);
        assert_eq!(ep.total_parse_failures(), 1);
        assert_eq!(group.num_sessions(), 1);
    }

    #[test]
    fn test_invalid_endpoint_rejects_operations() {
        struct NullSink;
        impl OutboundWriter for NullSink {
            fn write_packet(&self, _: Bytes, _: SocketAddr) -> std::result::Result<(), PacketError> {
                Ok(())
            }
        }

        // Media endpoints cannot send feedback: construction fails closed
        let mut ep = ReceiverEndpoint::new(
            Protocol::Rtp,
            Arc::new(StateTracker::new()),
            bind(),
            Some(Arc::new(NullSink)),
        );
        assert!(!ep.is_valid());

        let err = ep.pull_packets(&mut group(), 0).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_outbound_chain_presence() {
        let ep = endpoint(Protocol::Rtp);
        assert!(ep.outbound_composer().is_none());
        assert!(ep.outbound_shipper().is_none());

        let ep = endpoint(Protocol::Rtcp);
        assert!(ep.is_valid());
        assert!(ep.outbound_composer().is_some());
        // No writer supplied, so no shipper either
        assert!(ep.outbound_shipper().is_none());
    }

    #[test]
    fn test_close_discards_queued_packets() {
        let mut ep = endpoint(Protocol::Rtp);
        let writer = ep.inbound_writer();

        writer.push(rtp_bytes(1, 0), sender()).unwrap();
        ep.close();

        let mut group = group();
        let stats = ep.pull_packets(&mut group, 0).unwrap();
        assert_eq!(stats.pulled, 0);
        assert_eq!(group.num_sessions(), 0);
    }
}
