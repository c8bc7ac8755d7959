//! Lock-free inbound packet queue
//!
//! Multi-producer single-consumer handoff between network threads and the
//! pipeline thread. Pushes never block and never allocate beyond the queue
//! segment itself; pops are non-blocking. Teardown closes the producer side
//! first, then drains leftovers without invoking any session logic.

use bytes::Bytes;
use crossbeam::queue::SegQueue;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::constants::MAX_PACKET_SIZE;
use crate::error::PacketError;
use crate::packet::{parser, Protocol};
use crate::state::StateTracker;
use crate::Nanos;

/// A raw datagram as handed over by the network thread.
///
/// Not yet parsed; only cheap protocol classification has happened at the
/// write boundary.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub data: Bytes,
    pub addr: SocketAddr,
    /// Receive timestamp, if the network layer stamps one
    pub capture_time: Option<Nanos>,
}

/// Queue statistics snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub pushed: u64,
    pub popped: u64,
    /// Writes rejected for protocol mismatch or size
    pub rejected: u64,
    /// Writes rejected because the queue was closed
    pub rejected_closed: u64,
}

struct Shared {
    queue: SegQueue<RawPacket>,
    closed: AtomicBool,
    proto: Protocol,
    state_tracker: Arc<StateTracker>,
    pushed: AtomicU64,
    popped: AtomicU64,
    rejected: AtomicU64,
    rejected_closed: AtomicU64,
}

/// Producer handle for one endpoint's inbound queue.
///
/// Cloneable and safe to use from any number of network threads
/// concurrently. This is the only operation network threads perform
/// against the pipeline.
#[derive(Clone)]
pub struct InboundWriter {
    shared: Arc<Shared>,
}

impl InboundWriter {
    /// Enqueue a raw datagram for the pipeline thread.
    ///
    /// Rejects packets that do not classify as this endpoint's protocol
    /// and packets outside sane size bounds; both are counted, not silent.
    /// Never blocks, never parses, never touches session state.
    pub fn push(&self, data: Bytes, addr: SocketAddr) -> Result<(), PacketError> {
        self.push_at(data, addr, None)
    }

    /// Like [`push`](Self::push), with a receive timestamp from the
    /// network thread's clock.
    pub fn push_at(
        &self,
        data: Bytes,
        addr: SocketAddr,
        capture_time: Option<Nanos>,
    ) -> Result<(), PacketError> {
        if self.shared.closed.load(Ordering::Acquire) {
            self.shared.rejected_closed.fetch_add(1, Ordering::Relaxed);
            return Err(PacketError::QueueClosed);
        }

        if data.len() > MAX_PACKET_SIZE {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(PacketError::TooLarge(data.len()));
        }

        if !parser::matches_protocol(&data, self.shared.proto) {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(PacketError::ProtocolMismatch);
        }

        // Register before enqueueing: the consumer unregisters on pop, and
        // the matching increment must never trail it.
        self.shared.state_tracker.register_packet();
        self.shared.pushed.fetch_add(1, Ordering::Relaxed);
        self.shared.queue.push(RawPacket {
            data,
            addr,
            capture_time,
        });
        Ok(())
    }
}

/// One endpoint's inbound queue: the consumer side plus writer factory.
pub struct InboundQueue {
    shared: Arc<Shared>,
}

impl InboundQueue {
    pub fn new(proto: Protocol, state_tracker: Arc<StateTracker>) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: SegQueue::new(),
                closed: AtomicBool::new(false),
                proto,
                state_tracker,
                pushed: AtomicU64::new(0),
                popped: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                rejected_closed: AtomicU64::new(0),
            }),
        }
    }

    /// Get a producer handle for network threads.
    pub fn writer(&self) -> InboundWriter {
        InboundWriter {
            shared: self.shared.clone(),
        }
    }

    /// Pop one raw packet. Non-blocking; `None` when empty or closed.
    ///
    /// Must only be called from the pipeline thread. After [`close`](Self::close),
    /// always returns `None`: a push that won the race against the closed
    /// flag may land after the close-time drain, and such stragglers are
    /// discarded here instead of reaching session logic.
    pub fn pop(&self) -> Option<RawPacket> {
        if self.shared.closed.load(Ordering::Acquire) {
            self.discard_remaining();
            return None;
        }
        let raw = self.shared.queue.pop()?;
        self.shared.popped.fetch_add(1, Ordering::Relaxed);
        self.shared.state_tracker.unregister_packet();
        Some(raw)
    }

    /// Number of packets currently queued.
    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Close the producer side and discard everything still queued.
    ///
    /// Safe to call while producers are concurrently pushing: the closed
    /// flag is published first, so any push that slips past it is caught
    /// by the drain here or by the next [`pop`](Self::pop). No session
    /// logic runs either way.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.discard_remaining();
    }

    fn discard_remaining(&self) {
        while self.shared.queue.pop().is_some() {
            self.shared.popped.fetch_add(1, Ordering::Relaxed);
            self.shared.state_tracker.unregister_packet();
        }
    }

    /// Statistics snapshot
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.shared.pushed.load(Ordering::Relaxed),
            popped: self.shared.popped.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            rejected_closed: self.shared.rejected_closed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for InboundQueue {
    fn drop(&mut self) {
        self.close();
    }
}
