//! Routing index from packet keys to live sessions
//!
//! Purely an index: the session group's set owns the sessions, the router
//! holds cloned handles for lookup. Single-threaded by contract (pipeline
//! thread only), so a plain `HashMap` is the right tool. In-flight routing
//! clones the handle at lookup time, so removing an entry never invalidates
//! work already dispatched.
//!
//! Several keys may share a source id (distinct senders that reuse an
//! SSRC), so source-id lookups scan; the session population is small
//! enough that this never matters.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SessionError;
use crate::packet::RoutingKey;
use crate::session::session::ReceiverSession;

/// Shared handle to one session.
///
/// The mutex is uncontended in practice (all consumer operations run on
/// one thread); it exists so handles can be cloned into in-flight work
/// without aliasing issues.
pub type SessionHandle = Arc<Mutex<ReceiverSession>>;

/// Lookup structure mapping routing keys to live sessions.
#[derive(Default)]
pub struct SessionRouter {
    by_key: HashMap<RoutingKey, SessionHandle>,
}

impl SessionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup by full routing key.
    pub fn find(&self, key: &RoutingKey) -> Option<SessionHandle> {
        self.by_key.get(key).cloned()
    }

    /// Lookup by bare stream source id, for control-plane callbacks that
    /// have no address. When several keys share the source id, which entry
    /// is returned is unspecified.
    pub fn find_by_source(&self, source_id: u32) -> Option<SessionHandle> {
        self.by_key
            .iter()
            .find(|(key, _)| key.source_id == source_id)
            .map(|(_, handle)| handle.clone())
    }

    /// A routing key currently mapped for a source id, if any.
    pub fn key_for_source(&self, source_id: u32) -> Option<RoutingKey> {
        self.by_key
            .keys()
            .find(|key| key.source_id == source_id)
            .copied()
    }

    /// Map a key to a session. At most one session per key; a duplicate
    /// insert is an invariant violation reported to the caller.
    pub fn insert(&mut self, key: RoutingKey, session: SessionHandle) -> Result<(), SessionError> {
        if self.by_key.contains_key(&key) {
            return Err(SessionError::AdmissionRejected("routing key already mapped"));
        }
        self.by_key.insert(key, session);
        Ok(())
    }

    /// Remove the mapping for a key, returning the handle if present.
    pub fn remove(&mut self, key: &RoutingKey) -> Option<SessionHandle> {
        self.by_key.remove(key)
    }

    /// Remove one mapping for a source id, returning the handle if any key
    /// matched. Call repeatedly to clear every same-id entry.
    pub fn remove_by_source(&mut self, source_id: u32) -> Option<SessionHandle> {
        let key = self.key_for_source(source_id)?;
        self.by_key.remove(&key)
    }

    /// Remove the mapping for exactly this session, returning its key.
    ///
    /// Identity-exact (pointer equality), so same-source-id siblings are
    /// never touched.
    pub fn remove_handle(&mut self, handle: &SessionHandle) -> Option<RoutingKey> {
        let key = self
            .by_key
            .iter()
            .find(|(_, h)| Arc::ptr_eq(h, handle))
            .map(|(key, _)| *key)?;
        self.by_key.remove(&key);
        Some(key)
    }

    /// Re-key an existing mapping, e.g. to attach the source address once
    /// the first transport packet reveals it.
    pub fn rekey(&mut self, old_key: &RoutingKey, new_key: RoutingKey) -> Result<(), SessionError> {
        debug_assert_eq!(old_key.source_id, new_key.source_id);
        match self.remove(old_key) {
            Some(handle) => self.insert(new_key, handle),
            None => Err(SessionError::AdmissionRejected("no mapping to re-key")),
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
