//! Receiver configuration and per-session config derivation
//!
//! The receiver-wide config is immutable for the life of a slot. Each new
//! session's config is derived from it plus the triggering packet's header
//! fields through a pure function, so admission and creation decisions are
//! reproducible in tests.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::*;
use crate::error::SessionError;
use crate::packet::{Packet, PacketKind, RoutingKey};
use crate::Nanos;

/// Immutable receiver-wide configuration for one slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Target end-to-end playback latency in nanoseconds
    pub target_latency_ns: u64,

    /// A session with no packet activity for this long is removed
    pub session_timeout_ns: u64,

    /// Refresh deadline to report when no sessions exist
    pub refresh_idle_ns: u64,

    /// Maximum live sessions per group
    pub max_sessions: usize,

    /// How long a halted stream's source id stays quarantined
    pub halt_quarantine_ns: u64,

    /// Whether sender reports may create sessions before any media arrives
    pub allow_control_session_creation: bool,

    /// Sample rate assumed for control-created sessions
    pub default_sample_rate: u32,

    /// Channel count assumed for control-created sessions
    pub default_channels: u16,

    /// Canonical name announced to remote senders
    pub cname: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            target_latency_ns: DEFAULT_TARGET_LATENCY_NS,
            session_timeout_ns: DEFAULT_SESSION_TIMEOUT_NS,
            refresh_idle_ns: DEFAULT_REFRESH_IDLE_NS,
            max_sessions: MAX_SESSIONS,
            halt_quarantine_ns: DEFAULT_HALT_QUARANTINE_NS,
            allow_control_session_creation: true,
            default_sample_rate: DEFAULT_SAMPLE_RATE,
            default_channels: DEFAULT_CHANNELS,
            cname: "lan-audio-receiver".to_string(),
        }
    }
}

/// Audio encoding associated with an RTP payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoding {
    pub payload_type: u8,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Payload-type to encoding lookup.
///
/// Seeded with the static audio assignments this system cares about;
/// dynamic payload types are registered by the host from session signaling.
#[derive(Debug, Clone)]
pub struct EncodingMap {
    map: HashMap<u8, Encoding>,
}

impl EncodingMap {
    pub fn new() -> Self {
        let mut map = HashMap::new();
        for encoding in [
            // Static assignments (RFC 3551)
            Encoding { payload_type: 0, sample_rate: 8000, channels: 1 },
            Encoding { payload_type: 8, sample_rate: 8000, channels: 1 },
            Encoding { payload_type: 10, sample_rate: 44100, channels: 2 },
            Encoding { payload_type: 11, sample_rate: 44100, channels: 1 },
        ] {
            map.insert(encoding.payload_type, encoding);
        }
        Self { map }
    }

    /// Register a dynamic payload type (96..=127).
    pub fn register(&mut self, encoding: Encoding) {
        self.map.insert(encoding.payload_type, encoding);
    }

    pub fn find(&self, payload_type: u8) -> Option<&Encoding> {
        self.map.get(&payload_type)
    }
}

impl Default for EncodingMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for one live session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub source_id: u32,
    pub payload_type: u8,
    pub sample_rate: u32,
    pub channels: u16,
    pub target_latency_ns: u64,
    pub timeout_ns: u64,
}

/// Derive a session config from the receiver config and a triggering
/// transport packet. Pure and deterministic.
pub fn make_session_config(
    config: &ReceiverConfig,
    encodings: &EncodingMap,
    packet: &Packet,
) -> Result<SessionConfig, SessionError> {
    debug_assert!(matches!(
        packet.kind,
        PacketKind::Audio | PacketKind::Repair
    ));

    let encoding = encodings
        .find(packet.payload_type)
        .ok_or(SessionError::UnknownEncoding(packet.payload_type))?;

    Ok(SessionConfig {
        source_id: packet.source_id,
        payload_type: packet.payload_type,
        sample_rate: encoding.sample_rate,
        channels: encoding.channels,
        target_latency_ns: config.target_latency_ns,
        timeout_ns: config.session_timeout_ns,
    })
}

/// Derive a session config for control-first establishment, where no media
/// packet exists yet and encoding details come from receiver defaults.
pub fn make_control_session_config(config: &ReceiverConfig, source_id: u32) -> SessionConfig {
    SessionConfig {
        source_id,
        payload_type: 0,
        sample_rate: config.default_sample_rate,
        channels: config.default_channels,
        target_latency_ns: config.target_latency_ns,
        timeout_ns: config.session_timeout_ns,
    }
}

/// Facts the admission policy may consult.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionContext {
    pub num_sessions: usize,
    pub max_sessions: usize,
    pub now: Nanos,
}

/// Decides whether an unseen routing key may instantiate a session.
///
/// Pluggable so hosts can impose their own capacity or peering rules.
pub trait AdmissionPolicy: Send {
    /// Accept or reject creation of a session for `key`.
    fn admit(&mut self, key: &RoutingKey, ctx: &AdmissionContext) -> Result<(), SessionError>;

    /// Record that the control plane halted `source_id` at `now`.
    fn note_halt(&mut self, source_id: u32, now: Nanos);
}

/// Default admission policy: capacity limit plus a quarantine window for
/// halted streams.
///
/// A source id the control plane explicitly halted is rejected until the
/// quarantine expires, so a straggler media packet cannot resurrect the
/// stream with stale state. Timeout-removed sessions are not quarantined;
/// a silent stream that resumes is a legitimate new session.
pub struct DefaultAdmission {
    quarantine_ns: u64,
    quarantined: HashMap<u32, Nanos>,
}

impl DefaultAdmission {
    pub fn new(quarantine_ns: u64) -> Self {
        Self {
            quarantine_ns,
            quarantined: HashMap::new(),
        }
    }
}

impl AdmissionPolicy for DefaultAdmission {
    fn admit(&mut self, key: &RoutingKey, ctx: &AdmissionContext) -> Result<(), SessionError> {
        if ctx.num_sessions >= ctx.max_sessions {
            return Err(SessionError::LimitReached(ctx.max_sessions));
        }

        let now = ctx.now;
        let quarantine_ns = self.quarantine_ns;
        self.quarantined
            .retain(|_, halted_at| now.saturating_sub(*halted_at) < quarantine_ns);

        if self.quarantined.contains_key(&key.source_id) {
            return Err(SessionError::AdmissionRejected("stream halted recently"));
        }

        Ok(())
    }

    fn note_halt(&mut self, source_id: u32, now: Nanos) {
        self.quarantined.insert(source_id, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn audio_packet(source_id: u32, payload_type: u8) -> Packet {
        Packet {
            kind: PacketKind::Audio,
            source_id,
            sequence: 1,
            timestamp: 480,
            payload_type,
            payload: Bytes::new(),
            addr: None,
            capture_time: None,
        }
    }

    #[test]
    fn test_session_config_deterministic() {
        let config = ReceiverConfig::default();
        let encodings = EncodingMap::new();
        let packet = audio_packet(7, 10);

        let a = make_session_config(&config, &encodings, &packet).unwrap();
        let b = make_session_config(&config, &encodings, &packet).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.source_id, 7);
        assert_eq!(a.sample_rate, 44100);
        assert_eq!(a.channels, 2);
    }

    #[test]
    fn test_unknown_payload_type_rejected() {
        let config = ReceiverConfig::default();
        let encodings = EncodingMap::new();
        let packet = audio_packet(7, 99);

        assert!(matches!(
            make_session_config(&config, &encodings, &packet),
            Err(SessionError::UnknownEncoding(99))
        ));
    }

    #[test]
    fn test_dynamic_registration() {
        let mut encodings = EncodingMap::new();
        encodings.register(Encoding {
            payload_type: 96,
            sample_rate: 48000,
            channels: 2,
        });

        let config = ReceiverConfig::default();
        let derived =
            make_session_config(&config, &encodings, &audio_packet(1, 96)).unwrap();
        assert_eq!(derived.sample_rate, 48000);
    }

    #[test]
    fn test_admission_capacity() {
        let mut policy = DefaultAdmission::new(DEFAULT_HALT_QUARANTINE_NS);
        let key = RoutingKey::new(5, None);

        let ok_ctx = AdmissionContext {
            num_sessions: 0,
            max_sessions: 2,
            now: 0,
        };
        assert!(policy.admit(&key, &ok_ctx).is_ok());

        let full_ctx = AdmissionContext {
            num_sessions: 2,
            max_sessions: 2,
            now: 0,
        };
        assert!(matches!(
            policy.admit(&key, &full_ctx),
            Err(SessionError::LimitReached(2))
        ));
    }

    #[test]
    fn test_admission_quarantine_expires() {
        let mut policy = DefaultAdmission::new(1_000);
        let key = RoutingKey::new(5, None);
        let ctx = |now| AdmissionContext {
            num_sessions: 0,
            max_sessions: 16,
            now,
        };

        policy.note_halt(5, 100);
        assert!(matches!(
            policy.admit(&key, &ctx(600)),
            Err(SessionError::AdmissionRejected(_))
        ));
        // Quarantine expired
        assert!(policy.admit(&key, &ctx(1_200)).is_ok());
        // Unrelated sources are unaffected
        let other = RoutingKey::new(6, None);
        policy.note_halt(5, 2_000);
        assert!(policy.admit(&other, &ctx(2_100)).is_ok());
    }

    #[test]
    fn test_control_session_config_uses_defaults() {
        let config = ReceiverConfig::default();
        let derived = make_control_session_config(&config, 42);
        assert_eq!(derived.source_id, 42);
        assert_eq!(derived.sample_rate, config.default_sample_rate);
        assert_eq!(derived.channels, config.default_channels);
    }
}
