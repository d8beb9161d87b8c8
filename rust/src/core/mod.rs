mod call_control;
pub(crate) mod config;
mod push;
mod ring_wait;

use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::CallAction;
use crate::backend::{DeviceRegistry, TokenService};
use crate::registry::SessionRegistry;
use crate::state::{CallPhase, CallSnapshot, LocalIdentity};
use crate::transport::RealtimeTransport;
use crate::updates::{CallLifecycleEvent, CallUpdate, CoreMsg, InternalEvent};

pub(crate) use call_control::claim_outgoing_session;
pub use config::{default_config_json, load_call_config, CallConfig};

/// External collaborators the actor talks to. Injected so tests can script them.
#[derive(Clone)]
pub struct Collaborators {
    pub tokens: Arc<dyn TokenService>,
    pub devices: Arc<dyn DeviceRegistry>,
    pub transport: Arc<dyn RealtimeTransport>,
}

/// Single-threaded call actor. Every transition runs inside `handle_message`.
pub struct CallCore {
    snapshot: CallSnapshot,
    rev: u64,

    update_sender: Sender<CallUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<CallSnapshot>>,
    registry: Arc<SessionRegistry>,

    data_dir: String,
    config: CallConfig,
    runtime: tokio::runtime::Runtime,

    tokens: Arc<dyn TokenService>,
    devices: Arc<dyn DeviceRegistry>,
    transport: Arc<dyn RealtimeTransport>,

    identity: Option<LocalIdentity>,
    push_token: Option<String>,

    // Bumped for every session; async results carrying an older value are stale.
    attempt: u64,
    // Transport events are accepted only for this attempt.
    subscription: Option<u64>,
    ring_wait: Option<ring_wait::RingWait>,
}

impl CallCore {
    pub fn new(
        update_sender: Sender<CallUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        config: CallConfig,
        shared_state: Arc<RwLock<CallSnapshot>>,
        registry: Arc<SessionRegistry>,
        collaborators: Collaborators,
    ) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let push_token = Self::load_push_token(&data_dir);

        let this = Self {
            snapshot: CallSnapshot::idle(),
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            registry,
            data_dir,
            config,
            runtime,
            tokens: collaborators.tokens,
            devices: collaborators.devices,
            transport: collaborators.transport,
            identity: None,
            push_token,
            attempt: 0,
            subscription: None,
            ring_wait: None,
        };

        // Ensure CallClient.state() has an immediately-available snapshot.
        let snapshot = this.snapshot.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn phase(&self) -> CallPhase {
        self.snapshot.phase
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.snapshot.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &CallSnapshot) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        let rev = self.next_rev();
        let snapshot = self.snapshot.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self
            .update_sender
            .send(CallUpdate::StateChanged { rev, snapshot });
    }

    fn emit_event(&mut self, event: CallLifecycleEvent) {
        let rev = self.next_rev();
        // Keep snapshot rev in sync with the update stream.
        let snapshot = self.snapshot.clone();
        self.commit_state_snapshot(&snapshot);
        tracing::info!(event = event.tag(), rev, "lifecycle");
        let _ = self
            .update_sender
            .send(CallUpdate::Lifecycle { rev, event });
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                // Never log `?action` directly: it carries user ids and device tokens.
                tracing::info!(action = action.tag(), phase = ?self.phase(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::PlaceCall(session) => self.handle_place_call(session),
            CoreMsg::Signal(signal) => self.handle_signal(signal),
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::CredentialResolved {
                attempt,
                room_id,
                result,
            } => self.handle_credential_resolved(attempt, room_id, result),
            InternalEvent::TransportConnected {
                attempt,
                room_id,
                result,
            } => self.handle_transport_connected(attempt, room_id, result),
            InternalEvent::TeardownComplete { attempt, reason } => {
                self.handle_teardown_complete(attempt, reason)
            }
            InternalEvent::RingWaitElapsed { attempt } => self.handle_ring_wait_elapsed(attempt),
            InternalEvent::Transport { source, event } => {
                self.handle_transport_event(source, event)
            }
        }
    }

    fn handle_action(&mut self, action: CallAction) {
        match action {
            CallAction::Login { identity } => {
                tracing::info!(role = identity.role.as_str(), "identity set");
                self.identity = Some(identity);
                self.register_push_device();
            }
            CallAction::Logout => {
                self.end_any_call();
                if let Some(identity) = self.identity.take() {
                    self.unregister_push_device(identity);
                }
            }
            CallAction::PushTokenRefreshed { token } => self.set_push_token(token),
            CallAction::AcceptIncoming => self.handle_accept(),
            CallAction::DeclineIncoming => self.handle_decline(),
            CallAction::Hangup => self.handle_hangup(),
            CallAction::ToggleMute { muted } => self.handle_toggle_mute(muted),
        }
    }
}
