//! # LAN Audio Receiver
//!
//! Receive-side engine for low-latency multi-stream audio over LAN.
//!
//! This crate covers the path from "raw datagram handed over by a network
//! thread" to "packet delivered to the right live stream session", plus the
//! control-plane participant role that keeps the session population and
//! playback clocks in sync with remote senders. Decoding, mixing, and socket
//! I/O live in the host pipeline.
//!
//! ## Architecture Overview
//!
//! ```text
//!   network threads                          pipeline thread
//!  ┌──────────────┐                   ┌──────────────────────────────┐
//!  │ UDP socket 0 ─┼─► InboundWriter ─►│ ReceiverEndpoint (audio)     │
//!  │ UDP socket 1 ─┼─► InboundWriter ─►│ ReceiverEndpoint (repair)    │
//!  │ UDP socket 2 ─┼─► InboundWriter ─►│ ReceiverEndpoint (control)   │
//!  └──────────────┘   lock-free MPSC  │        │ pull_packets()       │
//!                                     │        ▼                      │
//!                                     │ ReceiverSessionGroup          │
//!                                     │   ├─ SessionRouter            │
//!                                     │   │    key ──► session        │
//!                                     │   ├─ ReceiverSession (ssrc A) │
//!                                     │   ├─ ReceiverSession (ssrc B) │
//!                                     │   └─ ControlParticipant impl  │
//!                                     │        ▲        │             │
//!                                     │  reports in   feedback out    │
//!                                     └────────┼────────┼─────────────┘
//!                                       control-plane communicator
//! ```
//!
//! Threading contract: every [`InboundWriter`](packet::InboundWriter) push is
//! safe from any thread and never blocks; everything else (`pull_packets`,
//! `route_packet`, `refresh_sessions`, `reclock_sessions`, metrics, and the
//! control-plane callbacks) runs on the single pipeline thread and is never
//! invoked concurrently.

pub mod config;
pub mod control;
pub mod endpoint;
pub mod error;
pub mod packet;
pub mod session;
pub mod state;

pub use error::{Error, Result, Status};

/// Receiver-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Maximum number of concurrent sessions per group
    pub const MAX_SESSIONS: usize = 16;

    /// Default target playback latency in nanoseconds (20 ms)
    pub const DEFAULT_TARGET_LATENCY_NS: u64 = 20_000_000;

    /// Default session timeout window in nanoseconds (2 s without packets)
    pub const DEFAULT_SESSION_TIMEOUT_NS: u64 = 2_000_000_000;

    /// Refresh deadline when no sessions are alive (100 ms)
    pub const DEFAULT_REFRESH_IDLE_NS: u64 = 100_000_000;

    /// How long a halted stream's routing key stays quarantined (2 s)
    pub const DEFAULT_HALT_QUARANTINE_NS: u64 = 2_000_000_000;

    /// Maximum packet size for UDP
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers

    /// Minimum parseable RTP header size in bytes
    pub const RTP_HEADER_SIZE: usize = 12;

    /// Minimum parseable RTCP header size in bytes
    pub const RTCP_HEADER_SIZE: usize = 8;
}

/// Absolute time in nanoseconds since an arbitrary host-chosen epoch.
///
/// The host pipeline supplies all timestamps; this crate never reads the
/// system clock itself, which keeps every timeout path testable.
pub type Nanos = u64;
