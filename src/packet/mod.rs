//! Packet model and network-to-pipeline handoff
//!
//! Raw datagrams enter through a lock-free inbound queue, get parsed into
//! shared immutable [`Packet`]s on the pipeline thread, and are routed by
//! the session group. Outbound feedback packets leave through a composer
//! plus shipper pair attached to control endpoints.

pub mod composer;
pub mod packet;
pub mod parser;
pub mod queue;

pub use composer::{OutboundWriter, PacketComposer, PacketShipper, RtcpComposer};
pub use packet::{Packet, PacketKind, PacketPtr, Protocol, RoutingKey};
pub use parser::{FecParser, PacketParser, RtcpParser, RtpParser};
pub use queue::{InboundQueue, InboundWriter, QueueStats, RawPacket};
