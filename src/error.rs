//! Error types for the receive pipeline

use thiserror::Error;

/// Main error type for the receiver library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),
}

/// Coarse severity classification of an error.
///
/// Hosts branch on this rather than matching every variant: `Malformed`
/// means "that one packet/report was ignored, keep going", `Fatal` means
/// the affected component is unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// Transient condition; retry on the caller's own schedule.
    RetryLater,
    /// A single packet or report was invalid and has been discarded.
    Malformed,
    /// Declined or failed due to capacity/allocation limits.
    Exhausted,
    /// Invariant violation; the affected component must not be reused.
    Fatal,
}

impl Error {
    /// Classify this error per the receiver status taxonomy.
    pub fn status(&self) -> Status {
        match self {
            Error::Packet(e) => e.status(),
            Error::Endpoint(e) => e.status(),
            Error::Session(e) => e.status(),
            Error::Control(e) => e.status(),
        }
    }

    /// True if the owning component must be torn down.
    pub fn is_fatal(&self) -> bool {
        self.status() == Status::Fatal
    }
}

/// Packet parsing and queue errors
#[derive(Error, Debug)]
pub enum PacketError {
    #[error("Packet too short: {0} bytes")]
    TooShort(usize),

    #[error("Packet too large: {0} bytes")]
    TooLarge(usize),

    #[error("Unsupported protocol version: {0}")]
    BadVersion(u8),

    #[error("Invalid packet format: {0}")]
    InvalidFormat(&'static str),

    #[error("Unknown payload type: {0}")]
    UnknownPayloadType(u8),

    #[error("Packet does not match endpoint protocol")]
    ProtocolMismatch,

    #[error("Inbound queue is closed")]
    QueueClosed,

    #[error("No feedback destination known yet")]
    NoDestination,
}

impl PacketError {
    pub fn status(&self) -> Status {
        match self {
            PacketError::QueueClosed | PacketError::NoDestination => Status::RetryLater,
            _ => Status::Malformed,
        }
    }
}

/// Endpoint construction and drain errors
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("Endpoint construction failed: {0}")]
    ConstructionFailed(&'static str),

    #[error("Endpoint is invalid and cannot be used")]
    Invalid,

    #[error("Protocol {0:?} has no outbound support on receiver")]
    NoOutboundSupport(crate::packet::Protocol),
}

impl EndpointError {
    pub fn status(&self) -> Status {
        match self {
            EndpointError::ConstructionFailed(_) | EndpointError::Invalid => Status::Fatal,
            EndpointError::NoOutboundSupport(_) => Status::Malformed,
        }
    }
}

/// Session routing and lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session creation rejected by admission policy: {0}")]
    AdmissionRejected(&'static str),

    #[error("Session limit reached: {0}")]
    LimitReached(usize),

    #[error("No encoding known for payload type {0}")]
    UnknownEncoding(u8),

    #[error("Session group is invalid and cannot be used")]
    Invalid,
}

impl SessionError {
    pub fn status(&self) -> Status {
        match self {
            SessionError::AdmissionRejected(_) => Status::Malformed,
            SessionError::LimitReached(_) => Status::Exhausted,
            SessionError::UnknownEncoding(_) => Status::Malformed,
            SessionError::Invalid => Status::Fatal,
        }
    }
}

/// Control-plane report errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Report refers to unknown stream {0}")]
    UnknownStream(u32),

    #[error("Report is not applicable: {0}")]
    NotApplicable(&'static str),

    #[error("No control pipeline attached to this group")]
    NoControlPipeline,
}

impl ControlError {
    pub fn status(&self) -> Status {
        match self {
            ControlError::UnknownStream(_) | ControlError::NotApplicable(_) => Status::Malformed,
            ControlError::NoControlPipeline => Status::RetryLater,
        }
    }
}

/// Result type alias for the receiver library
pub type Result<T> = std::result::Result<T, Error>;
