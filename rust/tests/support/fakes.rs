use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kasookoo_core::backend::{Credential, DeviceRegistry, TokenService, TokenServiceError};
use kasookoo_core::transport::{RealtimeTransport, TransportError, TransportEventSink};
use kasookoo_core::{Collaborators, LocalIdentity, UserRole};

pub fn customer() -> LocalIdentity {
    LocalIdentity {
        user_id: "u1".to_string(),
        role: UserRole::Customer,
        display_name: "Ada".to_string(),
    }
}

pub fn credential(room: Option<&str>) -> Credential {
    Credential {
        access_token: "tok".to_string(),
        transport_address: "addr".to_string(),
        confirmed_room_id: room.map(str::to_string),
    }
}

/// Token backend answering every request with one credential. While `hold`
/// is set, requests park until `release` is called.
pub struct ScriptedTokens {
    credential: Credential,
    gate: Mutex<Option<(flume::Sender<()>, flume::Receiver<()>)>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedTokens {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            gate: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(flume::unbounded());
    }

    pub fn release(&self) {
        if let Some((tx, _)) = self.gate.lock().unwrap().take() {
            // Dropping the sender wakes every parked request.
            drop(tx);
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    async fn answer(&self, request: String) -> Result<Credential, TokenServiceError> {
        self.requests.lock().unwrap().push(request);
        let parked = self.gate.lock().unwrap().as_ref().map(|(_, rx)| rx.clone());
        if let Some(rx) = parked {
            let _ = rx.recv_async().await;
        }
        Ok(self.credential.clone())
    }
}

#[async_trait]
impl TokenService for ScriptedTokens {
    async fn request_caller_credential(
        &self,
        room_id: &str,
        _identity: &LocalIdentity,
    ) -> Result<Credential, TokenServiceError> {
        self.answer(format!("caller:{room_id}")).await
    }

    async fn request_callee_credential(
        &self,
        room_id: &str,
        _identity: &LocalIdentity,
    ) -> Result<Credential, TokenServiceError> {
        self.answer(format!("callee:{room_id}")).await
    }

    async fn request_support_credential(
        &self,
        phone_target: &str,
        room_id: &str,
        _identity: &LocalIdentity,
    ) -> Result<Credential, TokenServiceError> {
        self.answer(format!("support:{phone_target}:{room_id}")).await
    }

    async fn end_support_call(
        &self,
        phone_target: &str,
        room_id: &str,
    ) -> Result<(), TokenServiceError> {
        self.requests
            .lock()
            .unwrap()
            .push(format!("end_support:{phone_target}:{room_id}"));
        Ok(())
    }
}

pub struct NoDevices;

#[async_trait]
impl DeviceRegistry for NoDevices {
    async fn register_device(
        &self,
        _identity: &LocalIdentity,
        _device_token: &str,
    ) -> Result<(), TokenServiceError> {
        Ok(())
    }

    async fn unregister_device(
        &self,
        _identity: &LocalIdentity,
        _device_token: &str,
    ) -> Result<(), TokenServiceError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct LoopbackTransport {
    pub present: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub addresses: Mutex<Vec<String>>,
}

#[async_trait]
impl RealtimeTransport for LoopbackTransport {
    async fn connect(
        &self,
        credential: &Credential,
        _events: TransportEventSink,
    ) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.addresses
            .lock()
            .unwrap()
            .push(credential.transport_address.clone());
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn set_microphone(&self, _enabled: bool) {}

    fn has_remote_participants(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }
}

pub fn collaborators(
    tokens: Arc<ScriptedTokens>,
    transport: Arc<LoopbackTransport>,
) -> Collaborators {
    Collaborators {
        tokens,
        devices: Arc::new(NoDevices),
        transport,
    }
}
