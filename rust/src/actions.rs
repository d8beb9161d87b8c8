use crate::state::LocalIdentity;

/// Local user intents. Placing a call is not an action: it needs a synchronous
/// answer (`CallClient::place_call`).
#[derive(uniffi::Enum, Debug, Clone)]
pub enum CallAction {
    // Identity
    Login { identity: LocalIdentity },
    Logout,

    // Push
    PushTokenRefreshed { token: String },

    // Call
    AcceptIncoming,
    DeclineIncoming,
    Hangup,
    ToggleMute { muted: bool },
}

impl CallAction {
    /// Log-safe action tag (never includes user ids or device tokens).
    pub fn tag(&self) -> &'static str {
        match self {
            CallAction::Login { .. } => "Login",
            CallAction::Logout => "Logout",
            CallAction::PushTokenRefreshed { .. } => "PushTokenRefreshed",
            CallAction::AcceptIncoming => "AcceptIncoming",
            CallAction::DeclineIncoming => "DeclineIncoming",
            CallAction::Hangup => "Hangup",
            CallAction::ToggleMute { .. } => "ToggleMute",
        }
    }
}
