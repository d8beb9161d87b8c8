use serde::{Deserialize, Serialize};

/// Role of the signed-in user. Set at login by the storage layer; read-only here.
#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Customer,
    Driver,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Driver => "driver",
        }
    }

    /// Case-insensitive parse of the backend's `user_type` / role hint strings.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "customer" => Some(Self::Customer),
            "driver" => Some(Self::Driver),
            _ => None,
        }
    }

    /// The peer a user of this role talks to in a peer-to-peer call.
    pub fn complement(&self) -> Counterpart {
        match self {
            Self::Customer => Counterpart::Driver,
            Self::Driver => Counterpart::Customer,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub user_id: String,
    pub role: UserRole,
    pub display_name: String,
}

impl LocalIdentity {
    /// Name sent to the backend as `participant_identity_name`.
    pub fn participant_name(&self) -> &str {
        let trimmed = self.display_name.trim();
        if trimmed.is_empty() {
            &self.user_id
        } else {
            trimmed
        }
    }
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallKind {
    PeerToPeer,
    Support,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Counterpart {
    Customer,
    Driver,
    Support,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallPhase {
    Idle,
    /// Outgoing, waiting for the credential.
    Dialing,
    /// Outgoing, transport connected or connecting, waiting for the peer.
    RingingOut,
    /// Incoming, waiting for local accept/decline.
    RingingIn,
    /// Callee accepted; credential and connect in flight.
    Connecting,
    Active,
    Ending,
}

impl CallPhase {
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Idle | Self::Ending)
    }

    /// Phases in which the transport holds (or is acquiring) a room.
    pub fn has_transport(&self) -> bool {
        matches!(self, Self::RingingOut | Self::Connecting | Self::Active)
    }

    /// A peer cancel is still honored in these phases.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Dialing | Self::RingingOut | Self::RingingIn)
    }
}

/// Bookkeeping record for one call attempt. Owned by the session registry.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct CallSession {
    pub room_id: String,
    pub direction: CallDirection,
    pub kind: CallKind,
    pub counterpart: Counterpart,
    pub state: CallPhase,
    pub started_at: i64,
}

impl CallSession {
    pub fn outgoing(room_id: String, kind: CallKind, counterpart: Counterpart) -> Self {
        Self {
            room_id,
            direction: CallDirection::Outgoing,
            kind,
            counterpart,
            state: CallPhase::Dialing,
            started_at: now_seconds(),
        }
    }

    pub fn incoming(room_id: String, counterpart: Counterpart) -> Self {
        Self {
            room_id,
            direction: CallDirection::Incoming,
            kind: CallKind::PeerToPeer,
            counterpart,
            state: CallPhase::RingingIn,
            started_at: now_seconds(),
        }
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum EndReason {
    LocalHangup,
    Declined,
    RemoteLeft,
    TransportLost { message: Option<String> },
    RingTimeout,
    ConnectFailed,
    CancelledByPeer,
}

impl EndReason {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::LocalHangup => "local_hangup",
            Self::Declined => "declined",
            Self::RemoteLeft => "remote_left",
            Self::TransportLost { .. } => "transport_lost",
            Self::RingTimeout => "ring_timeout",
            Self::ConnectFailed => "connect_failed",
            Self::CancelledByPeer => "cancelled_by_peer",
        }
    }
}

/// Everything the UI needs to render the call surface. Published on every change.
#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct CallSnapshot {
    pub rev: u64,
    pub phase: CallPhase,
    pub session: Option<CallSession>,
    pub caller_display_name: Option<String>,
    pub is_muted: bool,
    pub transport_state: Option<String>,
    pub last_error: Option<String>,
}

impl CallSnapshot {
    pub fn idle() -> Self {
        Self {
            rev: 0,
            phase: CallPhase::Idle,
            session: None,
            caller_display_name: None,
            is_muted: false,
            transport_state: None,
            last_error: None,
        }
    }

    pub fn room_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.room_id.as_str())
    }
}

pub fn now_seconds() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// `sdk-room-` plus the first 8 hex chars of a v4 UUID.
pub fn generate_room_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("sdk-room-{}", &id[..8])
}
