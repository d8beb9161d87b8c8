mod actions;
pub mod backend;
mod core;
mod logging;
pub mod registry;
pub mod signal;
mod state;
pub mod transport;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

use crate::backend::ApiClient;
use crate::registry::{RegistryError, SessionRegistry};
use crate::transport::{PlatformTransport, TransportBridge, TransportEvent};

pub use crate::core::{default_config_json, load_call_config, CallConfig, Collaborators};
pub use actions::CallAction;
pub use signal::{CallSignal, SignalAction};
pub use state::*;
pub use updates::*;

uniffi::setup_scaffolding!();

#[derive(uniffi::Error, thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("no local identity; log in first")]
    NotLoggedIn,
    #[error("another call is active (room {active_room_id})")]
    SessionConflict { active_room_id: String },
    #[error("counterpart does not match the call kind and local role")]
    InvalidCounterpart,
    #[error("call client failed to start: {message}")]
    InitFailed { message: String },
}

impl From<RegistryError> for CallError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyActive { room_id } => CallError::SessionConflict {
                active_room_id: room_id,
            },
        }
    }
}

/// Parses a raw push payload (JSON text) into a `CallSignal`. Never fails.
#[uniffi::export]
pub fn normalize_push_payload(payload_json: String) -> CallSignal {
    signal::normalize_push_json(&payload_json)
}

#[uniffi::export]
pub fn is_signal_relevant(signal: CallSignal, identity: LocalIdentity) -> bool {
    signal::is_relevant(&signal, &identity)
}

/// Return the default `kasookoo_config.json` payload with every key filled in.
#[uniffi::export]
pub fn default_call_config_json() -> String {
    default_config_json()
}

#[uniffi::export(callback_interface)]
pub trait CallObserver: Send + Sync + 'static {
    fn on_update(&self, update: CallUpdate);
}

type SharedIdentity = Arc<RwLock<Option<LocalIdentity>>>;

#[derive(uniffi::Object)]
pub struct CallClient {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<CallUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<CallSnapshot>>,
    registry: Arc<SessionRegistry>,
    // Mirrors the actor's identity so `place_call` can answer synchronously.
    identity: SharedIdentity,
}

#[uniffi::export]
impl CallClient {
    #[uniffi::constructor]
    pub fn new(
        data_dir: String,
        transport: Box<dyn TransportBridge>,
    ) -> Result<Arc<Self>, CallError> {
        logging::init_logging(&data_dir);
        tracing::info!(data_dir = %data_dir, "CallClient::new() starting");

        let config = load_call_config(&data_dir);
        let api = Arc::new(
            ApiClient::new(
                config.api_base_url(),
                config.default_transport_url(),
                config.device_type(),
                config.http_timeout(),
            )
            .map_err(|e| CallError::InitFailed {
                message: e.to_string(),
            })?,
        );
        let bridge: Arc<dyn TransportBridge> = Arc::from(transport);
        let collaborators = Collaborators {
            tokens: api.clone(),
            devices: api,
            transport: Arc::new(PlatformTransport::new(bridge)),
        };
        Ok(Self::start(data_dir, config, collaborators))
    }

    pub fn state(&self) -> CallSnapshot {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn current_session(&self) -> Option<CallSession> {
        self.registry.current()
    }

    pub fn dispatch(&self, action: CallAction) {
        match &action {
            CallAction::Login { identity } => self.set_identity(Some(identity.clone())),
            CallAction::Logout => self.set_identity(None),
            _ => {}
        }
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    /// Starts an outgoing call and returns its room id. A second call while one
    /// is active fails here with `SessionConflict`; the first is unaffected.
    pub fn place_call(
        &self,
        kind: CallKind,
        counterpart: Counterpart,
        room_id: Option<String>,
    ) -> Result<String, CallError> {
        let identity = self.identity();
        let session = crate::core::claim_outgoing_session(
            &self.registry,
            identity.as_ref(),
            kind,
            counterpart,
            room_id,
        )?;
        let room_id = session.room_id.clone();
        let _ = self.core_tx.send(CoreMsg::PlaceCall(session));
        Ok(room_id)
    }

    /// Feeds one raw push payload. Unparseable payloads are dropped here.
    pub fn handle_push_payload(&self, payload_json: String) {
        let signal = signal::normalize_push_json(&payload_json);
        if signal.action == SignalAction::Unknown {
            tracing::debug!(reason = "unparseable", "push payload dropped");
            return;
        }
        let _ = self.core_tx.send(CoreMsg::Signal(signal));
    }

    /// Membership/connection events reported by the platform media SDK for
    /// `room_id` (the room passed to `TransportBridge::connect`). Events for any
    /// other room are dropped.
    pub fn on_transport_event(&self, room_id: String, event: TransportEvent) {
        let _ = self
            .core_tx
            .send(CoreMsg::Internal(Box::new(InternalEvent::Transport {
                source: TransportSource::Room(room_id),
                event,
            })));
    }

    pub fn listen_for_updates(&self, observer: Box<dyn CallObserver>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                observer.on_update(update);
            }
        });
    }
}

impl CallClient {
    /// Builds a client over caller-supplied collaborators. Not exported over
    /// UniFFI; used by tests and the CLI.
    pub fn with_collaborators(data_dir: String, collaborators: Collaborators) -> Arc<Self> {
        logging::init_logging(&data_dir);
        let config = load_call_config(&data_dir);
        Self::start(data_dir, config, collaborators)
    }

    fn start(data_dir: String, config: CallConfig, collaborators: Collaborators) -> Arc<Self> {
        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(CallSnapshot::idle()));
        let registry = Arc::new(SessionRegistry::new());

        // Actor loop thread (single threaded "call actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        let registry_for_core = registry.clone();
        thread::spawn(move || {
            let mut core = crate::core::CallCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                config,
                shared_for_core,
                registry_for_core,
                collaborators,
            );
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            registry,
            identity: Arc::new(RwLock::new(None)),
        })
    }

    fn identity(&self) -> Option<LocalIdentity> {
        match self.identity.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    fn set_identity(&self, identity: Option<LocalIdentity>) {
        match self.identity.write() {
            Ok(mut slot) => *slot = identity,
            Err(poison) => *poison.into_inner() = identity,
        }
    }
}
