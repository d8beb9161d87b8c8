//! Inbound push payloads → `CallSignal`, and the "is this call for me" check.
//!
//! Push providers disagree on shape: some flatten custom keys to the top level,
//! others nest them one level down under `data` or `payload` (sometimes as a
//! JSON-encoded string). Both functions here are pure and total.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::state::{LocalIdentity, UserRole};

const NESTED_KEYS: &[&str] = &["data", "payload"];

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SignalAction {
    IncomingCall,
    CallCancelled,
    Unknown,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CallSignal {
    pub action: SignalAction,
    pub room_id: String,
    pub caller_id: Option<String>,
    pub callee_id: Option<String>,
    pub caller_display_name: Option<String>,
    pub role_hint: Option<String>,
}

/// Why a signal never reached the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relevance {
    Relevant,
    TargetedElsewhere,
    MirroredSelf,
    SameRole,
}

impl Relevance {
    pub fn is_relevant(&self) -> bool {
        matches!(self, Self::Relevant)
    }
}

/// Parses a push payload given as JSON text. Unparseable text yields an `Unknown` signal.
pub fn normalize_push_json(raw: &str) -> CallSignal {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => normalize_push(&value),
        Err(_) => CallSignal::unknown(),
    }
}

pub fn normalize_push(bag: &Value) -> CallSignal {
    let empty = Map::new();
    let top = bag.as_object().unwrap_or(&empty);
    let nested = extract_nested(top);
    let fields = Fields {
        nested: nested.as_ref(),
        top,
    };

    let action = resolve_action(fields.get("action").as_deref(), fields.get("type").as_deref());
    let callee_id = fields
        .get("called_user_id")
        .or_else(|| fields.get("participant_identity"));
    let role_hint = fields
        .get("participant_identity_type")
        .or_else(|| fields.get("type").and_then(|t| role_prefix(&t)));

    CallSignal {
        action,
        room_id: fields.get("room_name").unwrap_or_default(),
        caller_id: fields.get("caller_user_id"),
        callee_id,
        caller_display_name: fields.get("participant_identity_name"),
        role_hint,
    }
}

/// Rules are applied in order; the first match decides.
pub fn relevance(signal: &CallSignal, identity: &LocalIdentity) -> Relevance {
    if let Some(callee) = signal.callee_id.as_deref() {
        if !callee.is_empty() && callee != identity.user_id {
            return Relevance::TargetedElsewhere;
        }
    }
    if signal.action == SignalAction::IncomingCall
        && signal.caller_id.as_deref() == Some(identity.user_id.as_str())
    {
        return Relevance::MirroredSelf;
    }
    // The hint names the caller's role; caller and callee roles are never equal.
    if let Some(hint) = signal.role_hint.as_deref().and_then(UserRole::parse) {
        if hint == identity.role {
            return Relevance::SameRole;
        }
    }
    Relevance::Relevant
}

pub fn is_relevant(signal: &CallSignal, identity: &LocalIdentity) -> bool {
    relevance(signal, identity).is_relevant()
}

impl CallSignal {
    fn unknown() -> Self {
        Self {
            action: SignalAction::Unknown,
            room_id: String::new(),
            caller_id: None,
            callee_id: None,
            caller_display_name: None,
            role_hint: None,
        }
    }
}

struct Fields<'a> {
    nested: Option<&'a Map<String, Value>>,
    top: &'a Map<String, Value>,
}

impl Fields<'_> {
    /// Nested keys win; top-level keys are the fallback. Empty strings count as absent.
    fn get(&self, key: &str) -> Option<String> {
        self.nested
            .and_then(|m| m.get(key))
            .and_then(scalar_to_string)
            .or_else(|| self.top.get(key).and_then(scalar_to_string))
    }
}

fn extract_nested(top: &Map<String, Value>) -> Option<Map<String, Value>> {
    NESTED_KEYS.iter().find_map(|key| match top.get(*key)? {
        Value::Object(map) => Some(map.clone()),
        // FCM delivers data values as strings; some backends JSON-encode the whole blob.
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn resolve_action(explicit: Option<&str>, type_hint: Option<&str>) -> SignalAction {
    if let Some(action) = explicit {
        return match action.to_ascii_lowercase().as_str() {
            "incoming_call" | "receive_call" => SignalAction::IncomingCall,
            "call_cancelled" | "cancel_call" | "end_call" => SignalAction::CallCancelled,
            _ => SignalAction::Unknown,
        };
    }
    let hint = type_hint.unwrap_or_default().to_ascii_lowercase();
    if hint.contains("incoming_call") || hint.contains("receive_call") {
        SignalAction::IncomingCall
    } else if hint.contains("cancel") || hint.contains("end_call") {
        SignalAction::CallCancelled
    } else {
        SignalAction::Unknown
    }
}

/// `driver_incoming_call` → `driver`.
fn role_prefix(type_hint: &str) -> Option<String> {
    let lower = type_hint.to_ascii_lowercase();
    let prefix = lower.split('_').next()?;
    UserRole::parse(prefix).map(|r| r.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn customer_u1() -> LocalIdentity {
        LocalIdentity {
            user_id: "u1".to_string(),
            role: UserRole::Customer,
            display_name: "Ada".to_string(),
        }
    }

    #[test]
    fn flat_payload_with_explicit_action() {
        let signal = normalize_push(&json!({
            "action": "receive_call",
            "room_name": "r2",
            "called_user_id": "u1",
            "caller_user_id": "u9",
            "participant_identity_name": "Bob",
            "participant_identity_type": "driver",
        }));
        assert_eq!(signal.action, SignalAction::IncomingCall);
        assert_eq!(signal.room_id, "r2");
        assert_eq!(signal.callee_id.as_deref(), Some("u1"));
        assert_eq!(signal.caller_id.as_deref(), Some("u9"));
        assert_eq!(signal.caller_display_name.as_deref(), Some("Bob"));
        assert_eq!(signal.role_hint.as_deref(), Some("driver"));
    }

    #[test]
    fn nested_payload_wins_over_top_level() {
        let signal = normalize_push(&json!({
            "aps": { "alert": "Incoming call" },
            "room_name": "outer",
            "data": {
                "type": "driver_incoming_call",
                "room_name": "inner",
                "participant_identity": "u1",
            }
        }));
        assert_eq!(signal.action, SignalAction::IncomingCall);
        assert_eq!(signal.room_id, "inner");
        assert_eq!(signal.callee_id.as_deref(), Some("u1"));
        assert_eq!(signal.role_hint.as_deref(), Some("driver"));
    }

    #[test]
    fn nested_payload_key_and_string_encoded_blob() {
        let signal = normalize_push(&json!({
            "action": "cancel_call",
            "payload": "{\"room_name\":\"r7\",\"caller_user_id\":42}"
        }));
        assert_eq!(signal.action, SignalAction::CallCancelled);
        assert_eq!(signal.room_id, "r7");
        assert_eq!(signal.caller_id.as_deref(), Some("42"));
    }

    #[test]
    fn action_inferred_from_type_hint() {
        let cancel = normalize_push(&json!({ "type": "Customer_Call_CANCELLED", "room_name": "r" }));
        assert_eq!(cancel.action, SignalAction::CallCancelled);
        let end = normalize_push(&json!({ "type": "end_call" }));
        assert_eq!(end.action, SignalAction::CallCancelled);
        let ring = normalize_push(&json!({ "type": "receive_call" }));
        assert_eq!(ring.action, SignalAction::IncomingCall);
    }

    #[test]
    fn unresolvable_inputs_map_to_unknown() {
        for bag in [
            json!({}),
            json!(null),
            json!([1, 2, 3]),
            json!({ "action": "ping", "type": "incoming_call" }),
            json!({ "type": "chat_message" }),
            json!({ "data": 17 }),
        ] {
            let signal = normalize_push(&bag);
            assert_eq!(signal.action, SignalAction::Unknown, "bag: {bag}");
        }
        assert_eq!(normalize_push_json("not json").action, SignalAction::Unknown);
    }

    #[test]
    fn empty_strings_are_absent() {
        let signal = normalize_push(&json!({
            "action": "incoming_call",
            "room_name": "r",
            "called_user_id": "",
            "participant_identity": "u5",
        }));
        assert_eq!(signal.callee_id.as_deref(), Some("u5"));
    }

    #[test]
    fn callee_mismatch_is_never_relevant() {
        let identity = customer_u1();
        for action in ["receive_call", "call_cancelled"] {
            let signal = normalize_push(&json!({
                "action": action,
                "room_name": "r2",
                "called_user_id": "u2",
                "participant_identity_type": "driver",
            }));
            assert_eq!(relevance(&signal, &identity), Relevance::TargetedElsewhere);
        }
    }

    #[test]
    fn mirrored_self_notification_is_dropped() {
        let signal = normalize_push(&json!({
            "action": "incoming_call",
            "room_name": "r2",
            "caller_user_id": "u1",
        }));
        assert_eq!(relevance(&signal, &customer_u1()), Relevance::MirroredSelf);
    }

    #[test]
    fn caller_role_equal_to_local_role_is_dropped() {
        let signal = normalize_push(&json!({
            "action": "incoming_call",
            "room_name": "r2",
            "participant_identity_type": "CUSTOMER",
        }));
        assert_eq!(relevance(&signal, &customer_u1()), Relevance::SameRole);

        let from_driver = normalize_push(&json!({
            "type": "driver_incoming_call",
            "room_name": "r2",
        }));
        assert!(is_relevant(&from_driver, &customer_u1()));
    }

    #[test]
    fn unknown_role_hint_does_not_filter() {
        let signal = normalize_push(&json!({
            "action": "incoming_call",
            "room_name": "r2",
            "participant_identity_type": "dispatcher",
        }));
        assert!(is_relevant(&signal, &customer_u1()));
    }
}
