use std::sync::Mutex;

use crate::state::{CallPhase, CallSession};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("a call is already active (room {room_id})")]
    AlreadyActive { room_id: String },
}

/// Single-slot holder of the one active call session.
///
/// The slot is the only shared mutable resource of the call core. Creation and
/// clearing happen exclusively through `try_begin` / `end`, each one atomic
/// under the slot lock, so two sessions can never coexist.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slot: Mutex<Option<CallSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_slot<R>(&self, f: impl FnOnce(&mut Option<CallSession>) -> R) -> R {
        match self.slot.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poison) => f(&mut poison.into_inner()),
        }
    }

    pub fn try_begin(&self, session: CallSession) -> Result<(), RegistryError> {
        self.with_slot(|slot| match slot {
            Some(active) => Err(RegistryError::AlreadyActive {
                room_id: active.room_id.clone(),
            }),
            None => {
                *slot = Some(session);
                Ok(())
            }
        })
    }

    pub fn current(&self) -> Option<CallSession> {
        self.with_slot(|slot| slot.clone())
    }

    /// Clears the slot and hands back what was there.
    pub fn end(&self) -> Option<CallSession> {
        self.with_slot(|slot| slot.take())
    }

    pub fn is_same_room(&self, room_id: &str) -> bool {
        self.with_slot(|slot| slot.as_ref().is_some_and(|s| s.room_id == room_id))
    }

    pub fn is_empty(&self) -> bool {
        self.with_slot(|slot| slot.is_none())
    }

    /// Mirrors the orchestrator's phase onto the occupying session.
    /// Occupancy never changes; an empty slot stays empty.
    pub fn set_state(&self, phase: CallPhase) -> Option<CallSession> {
        self.with_slot(|slot| {
            let session = slot.as_mut()?;
            session.state = phase;
            Some(session.clone())
        })
    }

    /// Renames the occupying session to the room the backend confirmed.
    /// Occupancy never changes; an empty slot stays empty.
    pub fn rekey(&self, room_id: &str) -> Option<CallSession> {
        self.with_slot(|slot| {
            let session = slot.as_mut()?;
            session.room_id = room_id.to_string();
            Some(session.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::state::{CallKind, Counterpart};

    fn outgoing(room: &str) -> CallSession {
        CallSession::outgoing(room.to_string(), CallKind::PeerToPeer, Counterpart::Driver)
    }

    #[test]
    fn begin_on_occupied_slot_fails() {
        let registry = SessionRegistry::new();
        registry.try_begin(outgoing("r1")).unwrap();
        let err = registry.try_begin(outgoing("r2")).unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyActive {
                room_id: "r1".to_string()
            }
        );
        // Same room is rejected too; dedupe is the caller's job via is_same_room.
        assert!(registry.try_begin(outgoing("r1")).is_err());
        assert_eq!(registry.current().unwrap().room_id, "r1");
    }

    #[test]
    fn end_clears_and_returns_prior_session() {
        let registry = SessionRegistry::new();
        assert!(registry.end().is_none());
        registry.try_begin(outgoing("r1")).unwrap();
        let prior = registry.end().unwrap();
        assert_eq!(prior.room_id, "r1");
        assert!(registry.is_empty());
        assert!(registry.try_begin(outgoing("r3")).is_ok());
    }

    #[test]
    fn same_room_check() {
        let registry = SessionRegistry::new();
        assert!(!registry.is_same_room("r1"));
        registry.try_begin(outgoing("r1")).unwrap();
        assert!(registry.is_same_room("r1"));
        assert!(!registry.is_same_room("r2"));
    }

    #[test]
    fn state_and_rekey_never_change_occupancy() {
        let registry = SessionRegistry::new();
        assert!(registry.set_state(CallPhase::Active).is_none());
        assert!(registry.rekey("r9").is_none());
        assert!(registry.is_empty());

        registry.try_begin(outgoing("r1")).unwrap();
        let updated = registry.set_state(CallPhase::RingingOut).unwrap();
        assert_eq!(updated.state, CallPhase::RingingOut);
        let rekeyed = registry.rekey("r1-confirmed").unwrap();
        assert_eq!(rekeyed.state, CallPhase::RingingOut);
        assert!(registry.is_same_room("r1-confirmed"));

        // Still occupied: a second call cannot slip in during the rename.
        assert!(registry.try_begin(outgoing("r2")).is_err());
        assert_eq!(registry.end().unwrap().room_id, "r1-confirmed");
        assert!(registry.try_begin(outgoing("r2")).is_ok());
    }

    #[test]
    fn concurrent_begins_have_exactly_one_winner() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || registry.try_begin(outgoing(&format!("r{i}"))).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
