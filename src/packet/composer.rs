//! Outbound feedback composition
//!
//! Control endpoints own a composer plus shipper pair. The session group's
//! control-plane role formats receiver reports through the composer and
//! hands the result to the shipper, which enqueues it on the host-provided
//! outbound sink. Non-control endpoints have neither.

use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::control::RecvReport;
use crate::error::PacketError;

/// Host-provided sink that ships composed packets toward the network.
///
/// Implementations must not block the pipeline thread; enqueueing for a
/// network writer thread is the expected shape.
pub trait OutboundWriter: Send + Sync {
    fn write_packet(&self, data: Bytes, dest: SocketAddr) -> Result<(), PacketError>;
}

/// Formats receiver feedback into wire packets.
pub trait PacketComposer: Send {
    /// Compose a receiver report carrying the given per-stream blocks,
    /// originated by `origin_source_id`.
    fn compose_report(
        &self,
        origin_source_id: u32,
        reports: &[RecvReport],
    ) -> Result<Bytes, PacketError>;
}

/// RTCP receiver-report composer.
///
/// Emits a single RR packet; compounding with SDES/BYE is the control
/// communicator's job.
#[derive(Debug, Clone, Copy)]
pub struct RtcpComposer;

impl RtcpComposer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RtcpComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketComposer for RtcpComposer {
    fn compose_report(
        &self,
        origin_source_id: u32,
        reports: &[RecvReport],
    ) -> Result<Bytes, PacketError> {
        // RR report count field is 5 bits
        if reports.len() > 31 {
            return Err(PacketError::InvalidFormat("too many report blocks"));
        }

        let mut buf = BytesMut::with_capacity(8 + reports.len() * 24);
        buf.put_u8(0x80 | reports.len() as u8); // V=2, P=0, RC
        buf.put_u8(201); // RR
        buf.put_u16(1 + 6 * reports.len() as u16); // length in words minus one
        buf.put_u32(origin_source_id);

        for report in reports {
            buf.put_u32(report.sender_source_id);
            let fraction = (report.fraction_lost.clamp(0.0, 1.0) * 256.0) as u32;
            let cum_lost = report.cum_lost.clamp(-(1 << 23), (1 << 23) - 1) as u32 & 0x00ff_ffff;
            buf.put_u32((fraction.min(255) << 24) | cum_lost);
            buf.put_u32(report.ext_highest_seq);
            buf.put_u32(report.jitter.max(0.0) as u32);
            buf.put_u32(0); // last SR: filled by the communicator
            buf.put_u32(0); // delay since last SR: likewise
        }

        Ok(buf.freeze())
    }
}

/// Pairs an outbound sink with a feedback destination.
///
/// The destination is learned from inbound control traffic (feedback goes
/// back to wherever reports came from), so it starts unknown. Cloneable so
/// the session group can hold its own handle to a control endpoint's
/// outbound chain.
#[derive(Clone)]
pub struct PacketShipper {
    writer: Arc<dyn OutboundWriter>,
    dest: Arc<parking_lot::Mutex<Option<SocketAddr>>>,
}

impl PacketShipper {
    pub fn new(writer: Arc<dyn OutboundWriter>) -> Self {
        Self {
            writer,
            dest: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Current destination address for shipped feedback, if known.
    pub fn dest(&self) -> Option<SocketAddr> {
        *self.dest.lock()
    }

    /// Record where feedback should go, taken from the source address of
    /// inbound control packets.
    pub fn set_dest(&self, addr: SocketAddr) {
        *self.dest.lock() = Some(addr);
    }

    /// Ship one composed packet. Fails with a retryable error until a
    /// destination is known.
    pub fn ship(&self, data: Bytes) -> Result<(), PacketError> {
        let dest = self.dest().ok_or(PacketError::NoDestination)?;
        self.writer.write_packet(data, dest)
    }
}
