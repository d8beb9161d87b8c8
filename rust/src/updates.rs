use crate::actions::CallAction;
use crate::backend::{Credential, TokenServiceError};
use crate::signal::CallSignal;
use crate::state::{CallSession, CallSnapshot, EndReason};
use crate::transport::{TransportError, TransportEvent};

/// What the UI is told about the call. Delivery is at-least-once; observers
/// must tolerate repeats.
#[derive(uniffi::Enum, Clone, Debug, PartialEq)]
pub enum CallLifecycleEvent {
    IncomingCall {
        room_id: String,
        caller_display_name: Option<String>,
    },
    CallStarted {
        room_id: String,
    },
    RemoteJoined {
        room_id: String,
    },
    RingTimeout {
        room_id: String,
    },
    ConnectFailed {
        room_id: Option<String>,
        reason: String,
    },
    CallCancelledByPeer {
        room_id: String,
    },
    CallEnded {
        room_id: Option<String>,
        reason: EndReason,
    },
}

impl CallLifecycleEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::IncomingCall { .. } => "IncomingCall",
            Self::CallStarted { .. } => "CallStarted",
            Self::RemoteJoined { .. } => "RemoteJoined",
            Self::RingTimeout { .. } => "RingTimeout",
            Self::ConnectFailed { .. } => "ConnectFailed",
            Self::CallCancelledByPeer { .. } => "CallCancelledByPeer",
            Self::CallEnded { .. } => "CallEnded",
        }
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq)]
pub enum CallUpdate {
    Lifecycle {
        rev: u64,
        event: CallLifecycleEvent,
    },
    StateChanged {
        rev: u64,
        snapshot: CallSnapshot,
    },
}

impl CallUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            CallUpdate::Lifecycle { rev, .. } => *rev,
            CallUpdate::StateChanged { rev, .. } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(CallAction),
    /// Sent by `place_call` after the registry slot was claimed on the caller's thread.
    PlaceCall(CallSession),
    /// Already normalized; relevance is decided on the actor.
    Signal(CallSignal),
    Internal(Box<InternalEvent>),
}

#[derive(Debug)]
pub enum InternalEvent {
    // Async results. `attempt` + `room_id` form the stale-result guard.
    CredentialResolved {
        attempt: u64,
        room_id: String,
        result: Result<Credential, TokenServiceError>,
    },
    TransportConnected {
        attempt: u64,
        room_id: String,
        result: Result<(), TransportError>,
    },
    TeardownComplete {
        attempt: u64,
        reason: EndReason,
    },

    // Peer-join wait
    RingWaitElapsed {
        attempt: u64,
    },

    Transport {
        source: TransportSource,
        event: TransportEvent,
    },
}

/// Who reported a transport event. Events from a finished session are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSource {
    /// The core's own sink or the ring wait, tagged with the session attempt.
    Subscription(u64),
    /// The platform bridge, tagged with the room the event belongs to.
    Room(String),
}
