use super::*;
use crate::backend::{Credential, TokenServiceError};
use crate::registry::SessionRegistry;
use crate::signal::{relevance, CallSignal, SignalAction};
use crate::state::{generate_room_id, CallKind, CallSession, Counterpart, EndReason};
use crate::transport::{TransportError, TransportEvent, TransportEventSink};
use crate::updates::TransportSource;
use crate::CallError;

use super::ring_wait::RingWait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CredentialRole {
    Caller,
    Callee,
    Support,
}

/// Claims the registry slot for a locally placed call. Runs on the caller's
/// thread so a losing second attempt gets `SessionConflict` synchronously.
pub(crate) fn claim_outgoing_session(
    registry: &SessionRegistry,
    identity: Option<&LocalIdentity>,
    kind: CallKind,
    counterpart: Counterpart,
    room_id: Option<String>,
) -> Result<CallSession, CallError> {
    let identity = identity.ok_or(CallError::NotLoggedIn)?;
    let valid = match kind {
        CallKind::PeerToPeer => counterpart == identity.role.complement(),
        CallKind::Support => counterpart == Counterpart::Support,
    };
    if !valid {
        return Err(CallError::InvalidCounterpart);
    }
    let room_id = room_id
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(generate_room_id);
    let session = CallSession::outgoing(room_id, kind, counterpart);
    registry.try_begin(session.clone())?;
    Ok(session)
}

impl CallCore {
    fn room_id(&self) -> Option<String> {
        self.snapshot.room_id().map(str::to_string)
    }

    fn is_current(&self, attempt: u64, room_id: &str) -> bool {
        attempt == self.attempt && self.snapshot.room_id() == Some(room_id)
    }

    /// Phase change for the occupying session, mirrored into the registry.
    fn set_phase(&mut self, phase: CallPhase) {
        self.snapshot.phase = phase;
        if let Some(updated) = self.registry.set_state(phase) {
            self.snapshot.session = Some(updated);
        }
    }

    fn enter_session(&mut self, session: CallSession, caller_display_name: Option<String>) -> u64 {
        self.attempt += 1;
        self.subscription = None;
        self.stop_ring_wait();
        self.snapshot.phase = session.state;
        self.snapshot.session = Some(session);
        self.snapshot.caller_display_name = caller_display_name;
        self.snapshot.is_muted = false;
        self.snapshot.transport_state = None;
        self.snapshot.last_error = None;
        self.attempt
    }

    /// Back to Idle. The registry slot must already be cleared.
    /// `last_error` survives so the UI can still show why the call ended.
    fn finish_idle(&mut self) {
        self.stop_ring_wait();
        self.subscription = None;
        self.snapshot.phase = CallPhase::Idle;
        self.snapshot.session = None;
        self.snapshot.caller_display_name = None;
        self.snapshot.is_muted = false;
        self.snapshot.transport_state = None;
        self.emit_state();
    }

    fn stop_ring_wait(&mut self) {
        if let Some(wait) = self.ring_wait.take() {
            wait.cancel();
        }
    }

    // Outgoing

    pub(super) fn handle_place_call(&mut self, session: CallSession) {
        if !self.registry.is_same_room(&session.room_id) {
            tracing::debug!(room_id = %session.room_id, reason = "stale", "place call dropped");
            return;
        }
        let Some(identity) = self.identity.clone() else {
            // Logout was processed between the slot claim and this message.
            self.registry.end();
            tracing::warn!(room_id = %session.room_id, "place call: identity gone");
            self.emit_event(CallLifecycleEvent::ConnectFailed {
                room_id: Some(session.room_id),
                reason: "Not logged in".to_string(),
            });
            return;
        };
        let role = match session.kind {
            CallKind::PeerToPeer => CredentialRole::Caller,
            CallKind::Support => CredentialRole::Support,
        };
        let room_id = session.room_id.clone();
        let attempt = self.enter_session(session, None);
        tracing::info!(room_id = %room_id, attempt, ?role, "dialing");
        self.emit_state();
        self.request_credential(attempt, role, room_id, identity);
    }

    fn request_credential(
        &self,
        attempt: u64,
        role: CredentialRole,
        room_id: String,
        identity: LocalIdentity,
    ) {
        let tokens = self.tokens.clone();
        let tx = self.core_sender.clone();
        let phone = self.config.support_phone_number();
        self.runtime.spawn(async move {
            let result = match role {
                CredentialRole::Caller => tokens.request_caller_credential(&room_id, &identity).await,
                CredentialRole::Callee => tokens.request_callee_credential(&room_id, &identity).await,
                CredentialRole::Support => {
                    tokens
                        .request_support_credential(&phone, &room_id, &identity)
                        .await
                }
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::CredentialResolved {
                    attempt,
                    room_id,
                    result,
                },
            )));
        });
    }

    pub(super) fn handle_credential_resolved(
        &mut self,
        attempt: u64,
        room_id: String,
        result: Result<Credential, TokenServiceError>,
    ) {
        if !self.is_current(attempt, &room_id)
            || !matches!(self.phase(), CallPhase::Dialing | CallPhase::Connecting)
        {
            tracing::debug!(room_id = %room_id, attempt, reason = "stale", "credential result dropped");
            return;
        }

        let credential = match result {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(room_id = %room_id, %e, "credential request failed");
                let reason = e.user_message();
                self.registry.end();
                self.snapshot.last_error = Some(reason.clone());
                self.finish_idle();
                self.emit_event(CallLifecycleEvent::ConnectFailed {
                    room_id: Some(room_id),
                    reason,
                });
                return;
            }
        };

        let room_id = match credential.confirmed_room_id.as_deref() {
            Some(confirmed) if confirmed != room_id => {
                tracing::info!(requested = %room_id, confirmed, "room re-keyed by backend");
                let confirmed = confirmed.to_string();
                if let Some(updated) = self.registry.rekey(&confirmed) {
                    self.snapshot.session = Some(updated);
                }
                confirmed
            }
            _ => room_id,
        };

        if self.phase() == CallPhase::Dialing {
            self.set_phase(CallPhase::RingingOut);
        }
        self.emit_state();
        self.connect_transport(attempt, room_id, credential);
    }

    fn connect_transport(&mut self, attempt: u64, room_id: String, credential: Credential) {
        self.subscription = Some(attempt);
        let sink = TransportEventSink::new(self.core_sender.clone(), attempt, room_id.clone());
        let transport = self.transport.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = transport.connect(&credential, sink).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::TransportConnected {
                    attempt,
                    room_id,
                    result,
                },
            )));
        });
    }

    pub(super) fn handle_transport_connected(
        &mut self,
        attempt: u64,
        room_id: String,
        result: Result<(), TransportError>,
    ) {
        if !self.is_current(attempt, &room_id)
            || !matches!(self.phase(), CallPhase::RingingOut | CallPhase::Connecting)
        {
            tracing::debug!(room_id = %room_id, attempt, reason = "stale", "connect result dropped");
            if result.is_ok() && self.subscription.is_none() {
                // The session was torn down while connecting; drop the orphaned room.
                let transport = self.transport.clone();
                self.runtime.spawn(async move { transport.disconnect().await });
            }
            return;
        }

        match result {
            Err(TransportError::Connect(message)) => {
                tracing::warn!(room_id = %room_id, %message, "transport connect failed");
                let reason = format!("Failed to connect: {message}");
                self.snapshot.last_error = Some(reason.clone());
                self.emit_event(CallLifecycleEvent::ConnectFailed {
                    room_id: Some(room_id),
                    reason,
                });
                self.begin_teardown(EndReason::ConnectFailed);
            }
            Ok(()) => {
                if self.snapshot.is_muted {
                    self.transport.set_microphone(false);
                }
                match self.phase() {
                    CallPhase::RingingOut => {
                        self.emit_event(CallLifecycleEvent::CallStarted { room_id });
                        self.start_ring_wait(attempt);
                    }
                    CallPhase::Connecting => {
                        // The callee's accept is the join; no waiting.
                        self.set_phase(CallPhase::Active);
                        self.emit_state();
                        self.emit_event(CallLifecycleEvent::CallStarted { room_id });
                    }
                    _ => {}
                }
            }
        }
    }

    fn start_ring_wait(&mut self, attempt: u64) {
        self.stop_ring_wait();
        self.ring_wait = Some(RingWait::start(
            self.runtime.handle(),
            attempt,
            self.config.ring_timeout(),
            self.config.ring_poll_interval(),
            self.transport.clone(),
            self.core_sender.clone(),
        ));
    }

    pub(super) fn handle_ring_wait_elapsed(&mut self, attempt: u64) {
        if self.ring_wait.as_ref().map(|w| w.attempt()) != Some(attempt)
            || self.phase() != CallPhase::RingingOut
        {
            tracing::debug!(attempt, reason = "stale", "ring wait result dropped");
            return;
        }
        self.ring_wait = None;
        let Some(room_id) = self.room_id() else {
            return;
        };
        tracing::warn!(room_id = %room_id, "no answer within the ring bound");
        self.snapshot.last_error = Some("No answer".to_string());
        self.emit_event(CallLifecycleEvent::RingTimeout { room_id });
        self.begin_teardown(EndReason::RingTimeout);
    }

    // Transport events

    pub(super) fn handle_transport_event(&mut self, source: TransportSource, event: TransportEvent) {
        let accepted = match &source {
            TransportSource::Subscription(id) => self.subscription == Some(*id),
            TransportSource::Room(room) => {
                self.subscription.is_some() && self.snapshot.room_id() == Some(room.as_str())
            }
        };
        if !accepted {
            tracing::debug!(event = event.tag(), ?source, reason = "stale", "transport event dropped");
            return;
        }
        let Some(room_id) = self.room_id() else {
            return;
        };

        match event {
            TransportEvent::RemoteJoined => {
                if self.phase() == CallPhase::RingingOut {
                    self.stop_ring_wait();
                    self.set_phase(CallPhase::Active);
                    self.emit_state();
                    self.emit_event(CallLifecycleEvent::RemoteJoined { room_id });
                }
            }
            TransportEvent::RemoteLeft { remaining } => {
                if remaining == 0 && self.phase() == CallPhase::Active {
                    self.begin_teardown(EndReason::RemoteLeft);
                }
            }
            TransportEvent::ConnectionStateChanged { state } => {
                self.snapshot.transport_state = Some(state);
                self.emit_state();
            }
            TransportEvent::Disconnected { error } => {
                if self.phase().has_transport() {
                    tracing::warn!(room_id = %room_id, error = ?error, "transport lost");
                    if let Some(e) = &error {
                        self.snapshot.last_error = Some(e.clone());
                    }
                    self.begin_teardown(EndReason::TransportLost { message: error });
                }
            }
        }
    }

    // Teardown

    fn begin_teardown(&mut self, reason: EndReason) {
        let Some(session) = self.snapshot.session.clone() else {
            return;
        };
        if self.phase() == CallPhase::Ending {
            return;
        }
        tracing::info!(room_id = %session.room_id, reason = reason.tag(), "teardown");
        self.stop_ring_wait();
        self.subscription = None;
        self.set_phase(CallPhase::Ending);
        self.emit_state();

        let attempt = self.attempt;
        let tokens = self.tokens.clone();
        let transport = self.transport.clone();
        let tx = self.core_sender.clone();
        let phone = self.config.support_phone_number();
        self.runtime.spawn(async move {
            if session.kind == CallKind::Support {
                if let Err(e) = tokens.end_support_call(&phone, &session.room_id).await {
                    tracing::warn!(%e, "support bridge hangup failed");
                }
            }
            transport.disconnect().await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::TeardownComplete { attempt, reason },
            )));
        });
    }

    pub(super) fn handle_teardown_complete(&mut self, attempt: u64, reason: EndReason) {
        if attempt != self.attempt || self.phase() != CallPhase::Ending {
            tracing::debug!(attempt, reason = "stale", "teardown completion dropped");
            return;
        }
        let room_id = self
            .registry
            .end()
            .map(|s| s.room_id)
            .or_else(|| self.room_id());
        self.finish_idle();
        self.emit_event(CallLifecycleEvent::CallEnded { room_id, reason });
    }

    // Local actions

    pub(super) fn handle_accept(&mut self) {
        if self.phase() != CallPhase::RingingIn {
            tracing::debug!(phase = ?self.phase(), "accept ignored");
            return;
        }
        let (Some(identity), Some(room_id)) = (self.identity.clone(), self.room_id()) else {
            return;
        };
        self.set_phase(CallPhase::Connecting);
        self.emit_state();
        self.request_credential(self.attempt, CredentialRole::Callee, room_id, identity);
    }

    pub(super) fn handle_decline(&mut self) {
        if self.phase() != CallPhase::RingingIn {
            tracing::debug!(phase = ?self.phase(), "decline ignored");
            return;
        }
        // Nothing connected yet; no teardown needed.
        let room_id = self
            .registry
            .end()
            .map(|s| s.room_id)
            .or_else(|| self.room_id());
        self.finish_idle();
        self.emit_event(CallLifecycleEvent::CallEnded {
            room_id,
            reason: EndReason::Declined,
        });
    }

    pub(super) fn handle_hangup(&mut self) {
        match self.phase() {
            CallPhase::Idle => self.emit_event(CallLifecycleEvent::CallEnded {
                room_id: None,
                reason: EndReason::LocalHangup,
            }),
            CallPhase::RingingIn => self.handle_decline(),
            CallPhase::Ending => {}
            _ => self.begin_teardown(EndReason::LocalHangup),
        }
    }

    pub(super) fn handle_toggle_mute(&mut self, muted: bool) {
        if !self.phase().is_live() {
            return;
        }
        self.snapshot.is_muted = muted;
        if matches!(self.phase(), CallPhase::RingingOut | CallPhase::Active) {
            self.transport.set_microphone(!muted);
        }
        self.emit_state();
    }

    pub(super) fn end_any_call(&mut self) {
        match self.phase() {
            CallPhase::RingingIn => self.handle_decline(),
            CallPhase::Idle | CallPhase::Ending => {}
            _ => self.begin_teardown(EndReason::LocalHangup),
        }
    }

    // Push signals

    pub(super) fn handle_signal(&mut self, signal: CallSignal) {
        if signal.action == SignalAction::Unknown {
            tracing::debug!(reason = "unparseable", "signal dropped");
            return;
        }
        let Some(identity) = self.identity.as_ref() else {
            tracing::debug!(reason = "no_identity", "signal dropped");
            return;
        };
        let verdict = relevance(&signal, identity);
        if !verdict.is_relevant() {
            tracing::debug!(reason = "irrelevant", ?verdict, "signal dropped");
            return;
        }
        match signal.action {
            SignalAction::IncomingCall => self.handle_incoming_call(signal),
            SignalAction::CallCancelled => self.handle_remote_cancel(signal),
            SignalAction::Unknown => {}
        }
    }

    fn handle_incoming_call(&mut self, signal: CallSignal) {
        if signal.room_id.is_empty() {
            tracing::debug!(reason = "no_room", "incoming call dropped");
            return;
        }
        if self.registry.is_same_room(&signal.room_id) {
            tracing::debug!(room_id = %signal.room_id, reason = "duplicate", "incoming call dropped");
            return;
        }
        let Some(counterpart) = self.identity.as_ref().map(|i| i.role.complement()) else {
            return;
        };
        let session = CallSession::incoming(signal.room_id.clone(), counterpart);
        if let Err(e) = self.registry.try_begin(session.clone()) {
            tracing::debug!(room_id = %signal.room_id, reason = "conflict", %e, "incoming call dropped");
            return;
        }
        let attempt = self.enter_session(session, signal.caller_display_name.clone());
        tracing::info!(room_id = %signal.room_id, attempt, "incoming call ringing");
        self.emit_state();
        self.emit_event(CallLifecycleEvent::IncomingCall {
            room_id: signal.room_id,
            caller_display_name: signal.caller_display_name,
        });
    }

    fn handle_remote_cancel(&mut self, signal: CallSignal) {
        let Some(session) = self.snapshot.session.clone() else {
            tracing::debug!(reason = "no_session", "cancel dropped");
            return;
        };
        // A cancel without a room can only mean the call that is ringing here.
        let targets = if signal.room_id.is_empty() {
            self.phase() == CallPhase::RingingIn
        } else {
            signal.room_id == session.room_id
        };
        if !targets {
            tracing::debug!(reason = "other_room", "cancel dropped");
            return;
        }

        match self.phase() {
            CallPhase::RingingIn => {
                self.registry.end();
                self.finish_idle();
                self.emit_event(CallLifecycleEvent::CallCancelledByPeer {
                    room_id: session.room_id,
                });
            }
            phase if phase.is_cancellable() => {
                self.emit_event(CallLifecycleEvent::CallCancelledByPeer {
                    room_id: session.room_id,
                });
                self.begin_teardown(EndReason::CancelledByPeer);
            }
            phase => {
                tracing::debug!(?phase, "cancel past the cancellable window ignored");
            }
        }
    }
}
