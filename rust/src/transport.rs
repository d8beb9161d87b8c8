//! Real-time media transport seam.
//!
//! The call core never touches RTP or rooms directly. It issues commands through
//! `RealtimeTransport` and receives membership/connection events through a
//! `TransportEventSink` scoped to one session.

use std::sync::Arc;

use async_trait::async_trait;
use flume::Sender;

use crate::backend::Credential;
use crate::updates::{CoreMsg, InternalEvent, TransportSource};

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    RemoteJoined,
    RemoteLeft { remaining: u32 },
    ConnectionStateChanged { state: String },
    Disconnected { error: Option<String> },
}

impl TransportEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::RemoteJoined => "RemoteJoined",
            Self::RemoteLeft { .. } => "RemoteLeft",
            Self::ConnectionStateChanged { .. } => "ConnectionStateChanged",
            Self::Disconnected { .. } => "Disconnected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport connect failed: {0}")]
    Connect(String),
}

/// Event subscription for one session. Events sent after the session moved on
/// are discarded by the core, so holding on to a stale sink is harmless.
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    tx: Sender<CoreMsg>,
    subscription: u64,
    room_id: String,
}

impl TransportEventSink {
    pub(crate) fn new(tx: Sender<CoreMsg>, subscription: u64, room_id: String) -> Self {
        Self {
            tx,
            subscription,
            room_id,
        }
    }

    pub fn subscription(&self) -> u64 {
        self.subscription
    }

    /// Room being joined, after any backend re-key.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send(CoreMsg::Internal(Box::new(InternalEvent::Transport {
            source: TransportSource::Subscription(self.subscription),
            event,
        })));
    }
}

#[async_trait]
pub trait RealtimeTransport: Send + Sync + 'static {
    /// Joins the room named by the credential, replacing any existing connection.
    async fn connect(
        &self,
        credential: &Credential,
        events: TransportEventSink,
    ) -> Result<(), TransportError>;

    /// Idempotent and best-effort; never fails.
    async fn disconnect(&self);

    fn set_microphone(&self, enabled: bool);

    fn has_remote_participants(&self) -> bool;
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct TransportBridgeResult {
    pub ok: bool,
    pub error_message: Option<String>,
}

/// Implemented by the platform's media SDK wrapper. `connect` and `disconnect`
/// may block; they are always called off the core's actor thread.
/// Membership events flow back through `CallClient::on_transport_event`,
/// tagged with the `room_id` given to `connect`.
#[uniffi::export(callback_interface)]
pub trait TransportBridge: Send + Sync + 'static {
    fn connect(
        &self,
        transport_address: String,
        access_token: String,
        room_id: String,
    ) -> TransportBridgeResult;
    fn disconnect(&self);
    fn set_microphone(&self, enabled: bool);
    fn has_remote_participants(&self) -> bool;
}

/// Adapts a blocking platform bridge to `RealtimeTransport`.
pub struct PlatformTransport {
    bridge: Arc<dyn TransportBridge>,
}

impl PlatformTransport {
    pub fn new(bridge: Arc<dyn TransportBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl RealtimeTransport for PlatformTransport {
    async fn connect(
        &self,
        credential: &Credential,
        events: TransportEventSink,
    ) -> Result<(), TransportError> {
        let bridge = self.bridge.clone();
        let address = credential.transport_address.clone();
        let token = credential.access_token.clone();
        let room_id = events.room_id().to_string();
        let result = tokio::task::spawn_blocking(move || bridge.connect(address, token, room_id))
            .await
            .map_err(|e| TransportError::Connect(format!("bridge task failed: {e}")))?;
        if result.ok {
            Ok(())
        } else {
            Err(TransportError::Connect(
                result
                    .error_message
                    .unwrap_or_else(|| "unknown transport error".to_string()),
            ))
        }
    }

    async fn disconnect(&self) {
        let bridge = self.bridge.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || bridge.disconnect()).await {
            tracing::warn!(%e, "transport: bridge disconnect task failed");
        }
    }

    fn set_microphone(&self, enabled: bool) {
        self.bridge.set_microphone(enabled);
    }

    fn has_remote_participants(&self) -> bool {
        self.bridge.has_remote_participants()
    }
}
