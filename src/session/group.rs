//! Session group: ownership, routing policy, and the control-plane role
//!
//! One group per receiver slot. The group owns every live session, drives
//! creation and removal, routes parsed packets through the
//! [`SessionRouter`], and implements the [`ControlParticipant`] callbacks
//! the control-plane communicator invokes. All of it runs on the single
//! pipeline thread.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{
    make_control_session_config, make_session_config, AdmissionContext, AdmissionPolicy,
    DefaultAdmission, EncodingMap, ReceiverConfig,
};
use crate::control::{ControlParticipant, ParticipantInfo, RecvReport, SendReport};
use crate::endpoint::ReceiverEndpoint;
use crate::error::{ControlError, EndpointError, Result};
use crate::packet::{PacketKind, PacketPtr, PacketShipper, RoutingKey, RtcpComposer};
use crate::packet::composer::PacketComposer;
use crate::session::router::{SessionHandle, SessionRouter};
use crate::session::session::{ReceiverSession, SessionLiveness, SessionMetrics};
use crate::state::StateTracker;
use crate::Nanos;

/// What `route_packet` did with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered to an existing session
    Delivered,
    /// A session was created for the packet and it was delivered there
    SessionCreated,
    /// No matching session and none was created; the packet was discarded
    Dropped,
}

/// Outbound control chain borrowed from a control endpoint.
struct ControlPipeline {
    composer: RtcpComposer,
    shipper: Option<PacketShipper>,
    bind_addr: std::net::SocketAddr,
}

/// Owner of all sessions for one receiver slot.
pub struct ReceiverSessionGroup {
    config: ReceiverConfig,
    encodings: Arc<EncodingMap>,
    state_tracker: Arc<StateTracker>,
    admission: Box<dyn AdmissionPolicy>,

    sessions: Vec<SessionHandle>,
    router: SessionRouter,

    /// Local source identifier used in outbound reports
    source_id: u32,

    control: Option<ControlPipeline>,

    /// Most recent pipeline time observed; used to stamp control-plane
    /// events (the callbacks carry no clock of their own)
    last_time: Nanos,
}

impl ReceiverSessionGroup {
    pub fn new(
        config: ReceiverConfig,
        encodings: Arc<EncodingMap>,
        state_tracker: Arc<StateTracker>,
    ) -> Self {
        let quarantine = config.halt_quarantine_ns;
        Self::with_admission(
            config,
            encodings,
            state_tracker,
            Box::new(DefaultAdmission::new(quarantine)),
        )
    }

    /// Construct with a host-supplied admission policy.
    pub fn with_admission(
        config: ReceiverConfig,
        encodings: Arc<EncodingMap>,
        state_tracker: Arc<StateTracker>,
        admission: Box<dyn AdmissionPolicy>,
    ) -> Self {
        Self {
            config,
            encodings,
            state_tracker,
            admission,
            sessions: Vec::new(),
            router: SessionRouter::new(),
            source_id: random_source_id(),
            control: None,
            last_time: 0,
        }
    }

    /// Attach the outbound control chain of a control-capable endpoint.
    ///
    /// The control sub-pipeline is shared by every session in the group,
    /// unlike the per-session transport path.
    pub fn create_control_pipeline(&mut self, endpoint: &ReceiverEndpoint) -> Result<()> {
        if !endpoint.is_valid() {
            return Err(EndpointError::Invalid.into());
        }
        let composer = endpoint
            .outbound_composer()
            .ok_or(EndpointError::NoOutboundSupport(endpoint.proto()))?;

        self.control = Some(ControlPipeline {
            composer,
            shipper: endpoint.outbound_shipper(),
            bind_addr: endpoint.bind_addr(),
        });
        Ok(())
    }

    /// Route one parsed packet to its session.
    ///
    /// Transport and repair packets may create a session on a routing miss
    /// (subject to admission); control packets never do — only the
    /// control-plane callbacks can, so a stray report for an unknown
    /// stream is dropped successfully.
    pub fn route_packet(&mut self, packet: &PacketPtr, now: Nanos) -> Result<RouteOutcome> {
        self.last_time = self.last_time.max(now);

        match packet.kind {
            PacketKind::Audio | PacketKind::Repair => self.route_transport(packet, now),
            PacketKind::Control => self.route_control(packet, now),
        }
    }

    fn route_transport(&mut self, packet: &PacketPtr, now: Nanos) -> Result<RouteOutcome> {
        let key = packet.routing_key();

        if let Some(session) = self.router.find(&key) {
            session.lock().handle_packet(packet, now);
            return Ok(RouteOutcome::Delivered);
        }

        // A session created from the control plane has no address yet;
        // attach the one this packet reveals instead of duplicating.
        if let Some(existing_key) = self.router.key_for_source(packet.source_id) {
            if existing_key.addr.is_none() {
                self.router.rekey(&existing_key, key)?;
                if let Some(session) = self.router.find(&key) {
                    session.lock().handle_packet(packet, now);
                    return Ok(RouteOutcome::Delivered);
                }
            }
            // Same SSRC from a different address: a distinct sender, so
            // fall through to admission with the full key.
        }

        let ctx = AdmissionContext {
            num_sessions: self.sessions.len(),
            max_sessions: self.config.max_sessions,
            now,
        };
        self.admission.admit(&key, &ctx)?;

        let session_config = make_session_config(&self.config, &self.encodings, packet)?;
        let session = Arc::new(Mutex::new(ReceiverSession::new(session_config, now)));

        self.router.insert(key, session.clone())?;
        self.sessions.push(session.clone());
        self.state_tracker.register_session();

        tracing::info!(
            source_id = packet.source_id,
            addr = ?packet.addr,
            payload_type = packet.payload_type,
            "created session from transport packet"
        );

        session.lock().handle_packet(packet, now);
        Ok(RouteOutcome::SessionCreated)
    }

    fn route_control(&mut self, packet: &PacketPtr, now: Nanos) -> Result<RouteOutcome> {
        match self.router.find_by_source(packet.source_id) {
            Some(session) => {
                session.lock().handle_packet(packet, now);
                Ok(RouteOutcome::Delivered)
            }
            None => {
                tracing::debug!(
                    source_id = packet.source_id,
                    "control packet for unknown stream dropped"
                );
                Ok(RouteOutcome::Dropped)
            }
        }
    }

    /// Remove stale sessions and report when to refresh next.
    ///
    /// Returns the earliest absolute deadline among surviving sessions, or
    /// `now + refresh_idle` when none are alive, so the pipeline thread
    /// never busy-polls.
    pub fn refresh_sessions(&mut self, now: Nanos) -> Nanos {
        self.last_time = self.last_time.max(now);

        let mut stale: Vec<SessionHandle> = Vec::new();
        let mut next_deadline: Option<Nanos> = None;

        for handle in &self.sessions {
            let mut session = handle.lock();
            match session.refresh(now) {
                SessionLiveness::Stale => stale.push(handle.clone()),
                SessionLiveness::Alive { next_deadline: d } => {
                    next_deadline = Some(next_deadline.map_or(d, |cur| cur.min(d)));
                }
            }
        }

        for handle in stale {
            tracing::info!(source_id = handle.lock().source_id(), "removing timed-out session");
            self.remove_session_handle(&handle);
        }

        next_deadline.unwrap_or(now + self.config.refresh_idle_ns)
    }

    /// Propagate the actual-playback-time reference to every session.
    pub fn reclock_sessions(&mut self, playback_time: Nanos) {
        for handle in &self.sessions {
            handle.lock().reclock(playback_time);
        }
    }

    /// Number of alive sessions.
    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Copy metrics snapshots into `out`, truncating to its length.
    /// Returns the number written.
    pub fn get_metrics(&self, out: &mut [SessionMetrics]) -> usize {
        let n = self.sessions.len().min(out.len());
        for (slot, handle) in out.iter_mut().zip(self.sessions.iter()).take(n) {
            *slot = handle.lock().metrics();
        }
        n
    }

    /// Compose a receiver report for all sessions and ship it through the
    /// attached control endpoint.
    pub fn ship_feedback(&mut self, report_time: Nanos) -> Result<usize> {
        let source_id = self.source_id;

        // Report-block count in an RR is capped at 31 on the wire
        let n = self.sessions.len().min(31);
        let reports: Vec<RecvReport> = self.sessions[..n]
            .iter()
            .map(|handle| handle.lock().recv_report(source_id, report_time))
            .collect();

        let control = self
            .control
            .as_ref()
            .ok_or(ControlError::NoControlPipeline)?;
        let data = control.composer.compose_report(source_id, &reports)?;
        control
            .shipper
            .as_ref()
            .ok_or(ControlError::NoControlPipeline)?
            .ship(data)?;
        Ok(n)
    }

    /// Remove every session through the normal removal path.
    pub fn shutdown(&mut self) {
        let handles = self.sessions.clone();
        for handle in handles {
            self.remove_session_handle(&handle);
        }
    }

    /// Remove exactly this session: router entry first, so routing can no
    /// longer reach it, then the owning set. Identity-exact, so a sibling
    /// session sharing the source id is never touched; in-flight handles
    /// drain on their own.
    fn remove_session_handle(&mut self, handle: &SessionHandle) {
        self.router.remove_handle(handle);
        let before = self.sessions.len();
        self.sessions.retain(|s| !Arc::ptr_eq(s, handle));
        if self.sessions.len() < before {
            self.state_tracker.unregister_session();
        }
    }
}

impl Drop for ReceiverSessionGroup {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ControlParticipant for ReceiverSessionGroup {
    fn participant_info(&self) -> ParticipantInfo {
        ParticipantInfo {
            source_id: self.source_id,
            cname: self.config.cname.clone(),
            report_addr: self.control.as_ref().map(|c| c.bind_addr),
        }
    }

    fn change_source_id(&mut self) {
        let old = self.source_id;
        self.source_id = random_source_id();
        tracing::info!(old, new = self.source_id, "local source id changed");
    }

    fn num_recv_streams(&self) -> usize {
        self.sessions.len()
    }

    fn query_recv_streams(&mut self, reports: &mut [RecvReport], report_time: Nanos) -> usize {
        let source_id = self.source_id;
        let n = self.sessions.len().min(reports.len());
        for (slot, handle) in reports.iter_mut().zip(self.sessions.iter()).take(n) {
            *slot = handle.lock().recv_report(source_id, report_time);
        }
        n
    }

    fn notify_recv_stream(&mut self, send_source_id: u32, report: &SendReport) -> Result<()> {
        if report.source_id != send_source_id {
            return Err(ControlError::NotApplicable("report source id mismatch").into());
        }

        if let Some(session) = self.router.find_by_source(send_source_id) {
            session.lock().apply_sender_report(report, self.last_time);
            return Ok(());
        }

        if !self.config.allow_control_session_creation {
            tracing::debug!(
                source_id = send_source_id,
                "ignoring sender report for unknown stream"
            );
            return Ok(());
        }

        let key = RoutingKey::new(send_source_id, None);
        let ctx = AdmissionContext {
            num_sessions: self.sessions.len(),
            max_sessions: self.config.max_sessions,
            now: self.last_time,
        };
        if let Err(e) = self.admission.admit(&key, &ctx) {
            tracing::debug!(
                source_id = send_source_id,
                error = %e,
                "sender report did not create session"
            );
            return Ok(());
        }

        let session_config = make_control_session_config(&self.config, send_source_id);
        let session = Arc::new(Mutex::new(ReceiverSession::new(
            session_config,
            self.last_time,
        )));
        session
            .lock()
            .apply_sender_report(report, self.last_time);

        self.router.insert(key, session.clone())?;
        self.sessions.push(session);
        self.state_tracker.register_session();

        tracing::info!(
            source_id = send_source_id,
            "created session from sender report"
        );
        Ok(())
    }

    fn halt_recv_stream(&mut self, send_source_id: u32) {
        // The goodbye only names the source id, so every session carrying
        // it goes; the quarantine blocks recreation for all of them anyway.
        let mut removed = false;
        while let Some(handle) = self.router.remove_by_source(send_source_id) {
            self.sessions.retain(|s| !Arc::ptr_eq(s, &handle));
            self.state_tracker.unregister_session();
            removed = true;
        }
        if !removed {
            tracing::debug!(source_id = send_source_id, "halt for unknown stream");
            return;
        }
        tracing::info!(source_id = send_source_id, "halting stream");
        self.admission.note_halt(send_source_id, self.last_time);
    }
}

/// Pick a fresh local source identifier.
///
/// Collisions with remote senders are handled via `change_source_id`.
fn random_source_id() -> u32 {
    rand::random()
}
