//! Per-stream receiver session
//!
//! One session per live incoming stream: sequence/loss/jitter accounting,
//! activity timeout, and clock-skew state fed by sender reports and by the
//! host's playback reclocking. The decode/resample path consumes packets
//! downstream of the sink and is out of scope here.

use crate::config::SessionConfig;
use crate::control::{ntp_to_nanos, RecvReport, SendReport};
use crate::packet::{Packet, PacketKind};
use crate::Nanos;

/// Result of a session refresh check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLiveness {
    /// Session is alive; check again at `next_deadline` at the latest.
    Alive { next_deadline: Nanos },
    /// Session exceeded its timeout window and must be removed.
    Stale,
}

/// Metrics snapshot for one session.
///
/// Fixed-size and copyable; safe to hand across the boundary to telemetry
/// collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionMetrics {
    pub source_id: u32,
    pub packets_received: u64,
    pub repair_packets: u64,
    pub control_packets: u64,
    /// Packets that arrived behind the highest sequence seen
    pub late_packets: u64,
    /// Cumulative loss; negative if duplicates outnumber gaps
    pub cum_lost: i64,
    /// Interarrival jitter in media clock units
    pub jitter: f64,
    pub ext_highest_seq: u32,
    /// Estimated offset to the sender clock, nanoseconds
    pub clock_offset_ns: i64,
    /// Estimated sender clock drift in parts per million
    pub drift_ppm: f64,
    pub last_packet_time: Nanos,
}

/// One live incoming stream.
pub struct ReceiverSession {
    config: SessionConfig,
    created_at: Nanos,
    last_activity: Nanos,

    // Sequence accounting (RFC 3550 appendix style)
    started: bool,
    base_seq: u16,
    max_seq: u16,
    /// Sequence cycle count, pre-shifted by 16
    cycles: u32,
    received: u64,
    late: u64,

    // Interval bookkeeping for fractional loss between reports
    expected_prior: u64,
    received_prior: u64,

    // Interarrival jitter state
    transit: Option<i64>,
    jitter: f64,

    repair_packets: u64,
    control_packets: u64,

    // Remote clock mapping from sender reports
    last_send_report: Option<(SendReport, Nanos)>,
    clock_offset_ns: i64,
    drift_ppm: f64,

    // Most recent playback reference from the host
    last_playback_time: Option<Nanos>,
}

impl ReceiverSession {
    pub fn new(config: SessionConfig, now: Nanos) -> Self {
        Self {
            config,
            created_at: now,
            last_activity: now,
            started: false,
            base_seq: 0,
            max_seq: 0,
            cycles: 0,
            received: 0,
            late: 0,
            expected_prior: 0,
            received_prior: 0,
            transit: None,
            jitter: 0.0,
            repair_packets: 0,
            control_packets: 0,
            last_send_report: None,
            clock_offset_ns: 0,
            drift_ppm: 0.0,
            last_playback_time: None,
        }
    }

    pub fn source_id(&self) -> u32 {
        self.config.source_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn created_at(&self) -> Nanos {
        self.created_at
    }

    /// Packet sink: account for one packet routed to this session.
    pub fn handle_packet(&mut self, packet: &Packet, now: Nanos) {
        self.last_activity = now;

        match packet.kind {
            PacketKind::Audio => {
                self.update_sequence(packet.sequence);
                self.update_jitter(packet, now);
            }
            PacketKind::Repair => {
                self.repair_packets += 1;
            }
            PacketKind::Control => {
                self.control_packets += 1;
            }
        }
    }

    fn update_sequence(&mut self, seq: u16) {
        if !self.started {
            self.started = true;
            self.base_seq = seq;
            self.max_seq = seq;
            self.received = 1;
            return;
        }

        self.received += 1;
        let delta = seq.wrapping_sub(self.max_seq);
        if delta != 0 && delta < 0x8000 {
            // In-order or a forward jump; detect wraparound
            if seq < self.max_seq {
                self.cycles = self.cycles.wrapping_add(1 << 16);
            }
            self.max_seq = seq;
        } else if delta != 0 {
            self.late += 1;
        }
    }

    fn update_jitter(&mut self, packet: &Packet, now: Nanos) {
        let arrival = packet.capture_time.unwrap_or(now);
        // Arrival time expressed in media clock units
        let arrival_ts =
            (arrival as u128 * self.config.sample_rate as u128 / 1_000_000_000) as i64;
        let transit = arrival_ts - packet.timestamp as i64;

        if let Some(prev) = self.transit {
            let d = (transit - prev).abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.transit = Some(transit);
    }

    /// Extended highest sequence number (cycles << 16 | max_seq).
    pub fn ext_highest_seq(&self) -> u32 {
        self.cycles | self.max_seq as u32
    }

    fn expected(&self) -> u64 {
        if !self.started {
            return 0;
        }
        (self.ext_highest_seq() as u64).saturating_sub(self.base_seq as u64) + 1
    }

    /// Cumulative loss (expected minus received).
    pub fn cum_lost(&self) -> i64 {
        self.expected() as i64 - self.received as i64
    }

    /// Check liveness against the timeout window.
    pub fn refresh(&mut self, now: Nanos) -> SessionLiveness {
        if now.saturating_sub(self.last_activity) >= self.config.timeout_ns {
            SessionLiveness::Stale
        } else {
            SessionLiveness::Alive {
                next_deadline: self.last_activity + self.config.timeout_ns,
            }
        }
    }

    /// Record the absolute time the most recent frame will actually be
    /// heard, so downstream latency tuning sees real playback progress.
    pub fn reclock(&mut self, playback_time: Nanos) {
        self.last_playback_time = Some(playback_time);
    }

    pub fn last_playback_time(&self) -> Option<Nanos> {
        self.last_playback_time
    }

    /// Fold in a sender report: refresh the remote clock mapping and the
    /// drift estimate from consecutive report pairs.
    pub fn apply_sender_report(&mut self, report: &SendReport, now: Nanos) {
        self.last_activity = now;

        let report_ns = ntp_to_nanos(report.ntp_time) as i64;
        self.clock_offset_ns = now as i64 - report_ns;

        if let Some((prev, _)) = self.last_send_report {
            let d_ntp = ntp_to_nanos(report.ntp_time) as i64 - ntp_to_nanos(prev.ntp_time) as i64;
            if d_ntp > 0 {
                let d_rtp = report.rtp_time.wrapping_sub(prev.rtp_time) as i64;
                let d_rtp_ns = d_rtp * 1_000_000_000 / self.config.sample_rate as i64;
                let ppm = (d_rtp_ns - d_ntp) as f64 / d_ntp as f64 * 1_000_000.0;
                // EWMA, 1/8 weight: single reports are noisy
                self.drift_ppm += (ppm - self.drift_ppm) / 8.0;
            }
        }
        self.last_send_report = Some((*report, now));
    }

    /// Produce a receive-quality report and advance the interval counters
    /// used for fractional loss.
    pub fn recv_report(&mut self, receiver_source_id: u32, report_time: Nanos) -> RecvReport {
        let expected = self.expected();
        let expected_interval = expected.saturating_sub(self.expected_prior);
        let received_interval = self.received.saturating_sub(self.received_prior);
        self.expected_prior = expected;
        self.received_prior = self.received;

        let fraction_lost = if expected_interval > 0 && expected_interval >= received_interval {
            (expected_interval - received_interval) as f32 / expected_interval as f32
        } else {
            0.0
        };

        RecvReport {
            receiver_source_id,
            sender_source_id: self.config.source_id,
            fraction_lost,
            cum_lost: self.cum_lost(),
            jitter: self.jitter,
            ext_highest_seq: self.ext_highest_seq(),
            clock_offset_ns: self.clock_offset_ns,
            report_time,
        }
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> SessionMetrics {
        SessionMetrics {
            source_id: self.config.source_id,
            packets_received: self.received,
            repair_packets: self.repair_packets,
            control_packets: self.control_packets,
            late_packets: self.late,
            cum_lost: self.cum_lost(),
            jitter: self.jitter,
            ext_highest_seq: self.ext_highest_seq(),
            clock_offset_ns: self.clock_offset_ns,
            drift_ppm: self.drift_ppm,
            last_packet_time: self.last_activity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn config() -> SessionConfig {
        SessionConfig {
            source_id: 0x42,
            payload_type: 10,
            sample_rate: 48000,
            channels: 2,
            target_latency_ns: 20_000_000,
            timeout_ns: 1_000_000_000,
        }
    }

    fn audio(seq: u16, ts: u32) -> Packet {
        Packet {
            kind: PacketKind::Audio,
            source_id: 0x42,
            sequence: seq,
            timestamp: ts,
            payload_type: 10,
            payload: Bytes::new(),
            addr: None,
            capture_time: None,
        }
    }

    #[test]
    fn test_sequence_tracking() {
        let mut session = ReceiverSession::new(config(), 0);

        for seq in [100u16, 101, 102, 104] {
            session.handle_packet(&audio(seq, seq as u32 * 480), 1_000_000);
        }

        let m = session.metrics();
        assert_eq!(m.packets_received, 4);
        assert_eq!(m.ext_highest_seq, 104);
        // Expected 100..=104 is 5 packets, 4 received
        assert_eq!(m.cum_lost, 1);
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut session = ReceiverSession::new(config(), 0);

        session.handle_packet(&audio(65534, 0), 0);
        session.handle_packet(&audio(65535, 480), 0);
        session.handle_packet(&audio(0, 960), 0);
        session.handle_packet(&audio(1, 1440), 0);

        assert_eq!(session.ext_highest_seq(), (1 << 16) | 1);
        assert_eq!(session.cum_lost(), 0);
    }

    #[test]
    fn test_late_packet_counted_not_lost_forever() {
        let mut session = ReceiverSession::new(config(), 0);

        session.handle_packet(&audio(10, 0), 0);
        session.handle_packet(&audio(12, 960), 0);
        session.handle_packet(&audio(11, 480), 0); // late arrival fills the gap

        let m = session.metrics();
        assert_eq!(m.late_packets, 1);
        assert_eq!(m.ext_highest_seq, 12);
        assert_eq!(m.cum_lost, 0);
    }

    #[test]
    fn test_refresh_timeout() {
        let mut session = ReceiverSession::new(config(), 0);
        session.handle_packet(&audio(1, 0), 100);

        match session.refresh(200) {
            SessionLiveness::Alive { next_deadline } => {
                assert_eq!(next_deadline, 100 + 1_000_000_000)
            }
            SessionLiveness::Stale => panic!("fresh session reported stale"),
        }

        assert_eq!(session.refresh(100 + 1_000_000_000), SessionLiveness::Stale);
    }

    #[test]
    fn test_fraction_lost_interval() {
        let mut session = ReceiverSession::new(config(), 0);

        // First interval: seq 0..=3 complete
        for seq in 0..4u16 {
            session.handle_packet(&audio(seq, seq as u32 * 480), 0);
        }
        let report = session.recv_report(1, 1_000);
        assert_eq!(report.fraction_lost, 0.0);
        assert_eq!(report.cum_lost, 0);

        // Second interval: 4 expected, 2 received
        session.handle_packet(&audio(5, 0), 0);
        session.handle_packet(&audio(7, 0), 0);
        let report = session.recv_report(1, 2_000);
        assert_eq!(report.cum_lost, 2);
        assert!((report.fraction_lost - 0.5).abs() < 1e-6);

        // No traffic since: nothing new expected, nothing lost
        let report = session.recv_report(1, 3_000);
        assert_eq!(report.fraction_lost, 0.0);
    }

    #[test]
    fn test_sender_report_drift() {
        let mut session = ReceiverSession::new(config(), 0);

        // Two reports one NTP second apart; RTP advanced exactly one
        // second of media clock: zero drift.
        let first = SendReport {
            source_id: 0x42,
            ntp_time: 10 << 32,
            rtp_time: 0,
            packet_count: 0,
            byte_count: 0,
        };
        let second = SendReport {
            ntp_time: 11 << 32,
            rtp_time: 48000,
            ..first
        };

        session.apply_sender_report(&first, 1_000);
        session.apply_sender_report(&second, 1_001_000_000);
        assert!(session.metrics().drift_ppm.abs() < 1e-6);
    }

    #[test]
    fn test_jitter_steady_stream_is_low() {
        let mut session = ReceiverSession::new(config(), 0);

        // Perfectly paced 10 ms frames: arrival advances in lockstep with
        // the media clock, so jitter stays at zero.
        for i in 0..20u64 {
            let mut pkt = audio(i as u16, (i * 480) as u32);
            pkt.capture_time = Some(i * 10_000_000);
            session.handle_packet(&pkt, i * 10_000_000);
        }
        assert!(session.metrics().jitter < 1.0);
    }
}
