//! Session routing and lifecycle
//!
//! One [`ReceiverSession`] per live incoming stream, owned by a
//! [`ReceiverSessionGroup`] and indexed by the [`SessionRouter`].

pub mod group;
pub mod router;
pub mod session;

pub use group::{ReceiverSessionGroup, RouteOutcome};
pub use router::{SessionHandle, SessionRouter};
pub use session::{ReceiverSession, SessionLiveness, SessionMetrics};
