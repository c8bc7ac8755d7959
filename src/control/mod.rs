//! Control-plane participant contract
//!
//! The report/feedback protocol exchange itself (scheduling, wire
//! serialization, compound packet handling) lives in an external
//! communicator. That communicator drives whoever implements
//! [`ControlParticipant`]; the receiver's
//! [`ReceiverSessionGroup`](crate::session::ReceiverSessionGroup) is the
//! production implementation, and tests supply mocks.

use std::net::SocketAddr;

use crate::error::Result;
use crate::Nanos;

/// Identity and capability descriptor of one protocol participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    /// Local stream source identifier used in outbound reports
    pub source_id: u32,
    /// Canonical name announced in SDES
    pub cname: String,
    /// Address feedback reports should be sent from, when bound
    pub report_addr: Option<SocketAddr>,
}

/// Receive-quality report for one incoming stream, as of a report time.
///
/// Fixed-size and copyable so snapshots can cross the boundary to the
/// communicator without ownership concerns.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecvReport {
    /// Reporting receiver's own source id
    pub receiver_source_id: u32,
    /// Remote sender this report describes
    pub sender_source_id: u32,
    /// Fraction of packets lost since the previous report, 0.0..=1.0
    pub fraction_lost: f32,
    /// Cumulative packets lost (may go negative with duplicates)
    pub cum_lost: i64,
    /// Interarrival jitter in media clock units
    pub jitter: f64,
    /// Extended highest sequence number received
    pub ext_highest_seq: u32,
    /// Clock offset estimate relative to the sender, nanoseconds
    pub clock_offset_ns: i64,
    /// Absolute time this report was taken
    pub report_time: Nanos,
}

/// A remote sender's self-reported status (from an SR).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SendReport {
    /// Sender's stream source identifier
    pub source_id: u32,
    /// Sender wallclock in NTP 64-bit format (seconds << 32 | frac)
    pub ntp_time: u64,
    /// Media clock timestamp corresponding to `ntp_time`
    pub rtp_time: u32,
    /// Total packets the sender has transmitted
    pub packet_count: u32,
    /// Total payload bytes the sender has transmitted
    pub byte_count: u32,
}

/// Convert a 64-bit NTP timestamp to nanoseconds.
pub fn ntp_to_nanos(ntp: u64) -> Nanos {
    let secs = ntp >> 32;
    let frac = ntp & 0xffff_ffff;
    secs * 1_000_000_000 + ((frac * 1_000_000_000) >> 32)
}

/// Callback contract the control-plane communicator invokes.
///
/// All methods run on the pipeline thread, never concurrently with each
/// other or with routing. The callbacks may mutate the very session set
/// they report on; implementations order removals so routing never sees a
/// half-removed session.
pub trait ControlParticipant {
    /// This receiver's identity descriptor. Pure, no side effects.
    fn participant_info(&self) -> ParticipantInfo;

    /// A source-id collision was detected; pick a new local identifier.
    fn change_source_id(&mut self);

    /// Number of incoming streams eligible for reporting.
    ///
    /// Consistent with an immediately following
    /// [`query_recv_streams`](Self::query_recv_streams) call.
    fn num_recv_streams(&self) -> usize;

    /// Fill receive-quality reports, one per active stream, as of
    /// `report_time`. Returns the number written; truncates to the buffer.
    fn query_recv_streams(&mut self, reports: &mut [RecvReport], report_time: Nanos) -> usize;

    /// Deliver a remote sender's self-report for `send_source_id`.
    ///
    /// May create a session (control-first establishment) or update an
    /// existing session's clock mapping. Inapplicable reports are ignored,
    /// never fatal.
    fn notify_recv_stream(&mut self, send_source_id: u32, report: &SendReport) -> Result<()>;

    /// The remote sender said goodbye; remove its session.
    fn halt_recv_stream(&mut self, send_source_id: u32);
}
