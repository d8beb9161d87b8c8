//! Backend HTTP contract: join credentials, the support phone bridge and
//! push-token registration.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::state::LocalIdentity;

const CALLER_TOKEN_PATH: &str = "api/v1/bot/sdk/get-caller-livekit-token";
const CALLEE_TOKEN_PATH: &str = "api/v1/bot/sdk/get-called-livekit-token";
const SUPPORT_MAKE_PATH: &str = "api/v1/bot/sdk-sip/calls/make";
const SUPPORT_END_PATH: &str = "api/v1/bot/sdk-sip/calls/end";
const REGISTER_TOKEN_PATH: &str = "api/v1/bot/notifications/register-token";
const UNREGISTER_TOKEN_PATH: &str = "api/v1/bot/notifications/unregister-token";

const BODY_SNIPPET_MAX: usize = 160;

/// What the transport needs to join a room.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Credential {
    pub access_token: String,
    pub transport_address: String,
    pub confirmed_room_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenServiceError {
    #[error("HTTP {status} for {path}")]
    Http {
        status: u16,
        path: String,
        body_snippet: String,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("backend returned an empty access token")]
    EmptyToken,
}

impl TokenServiceError {
    /// One line suitable for a `ConnectFailed` event.
    pub fn user_message(&self) -> String {
        match self {
            Self::Http { body_snippet, .. } if !body_snippet.is_empty() => {
                format!("Token API error: {self}. Details: {body_snippet}")
            }
            Self::Http { .. } => format!("Token API error: {self}"),
            Self::Network(e) => format!("Network error: {e}"),
            Self::Decode(_) | Self::EmptyToken => format!("Failed to connect: {self}"),
        }
    }
}

#[async_trait]
pub trait TokenService: Send + Sync + 'static {
    async fn request_caller_credential(
        &self,
        room_id: &str,
        identity: &LocalIdentity,
    ) -> Result<Credential, TokenServiceError>;

    async fn request_callee_credential(
        &self,
        room_id: &str,
        identity: &LocalIdentity,
    ) -> Result<Credential, TokenServiceError>;

    async fn request_support_credential(
        &self,
        phone_target: &str,
        room_id: &str,
        identity: &LocalIdentity,
    ) -> Result<Credential, TokenServiceError>;

    /// Hangs up the phone-bridge leg of a support call.
    async fn end_support_call(
        &self,
        phone_target: &str,
        room_id: &str,
    ) -> Result<(), TokenServiceError>;
}

#[async_trait]
pub trait DeviceRegistry: Send + Sync + 'static {
    async fn register_device(
        &self,
        identity: &LocalIdentity,
        device_token: &str,
    ) -> Result<(), TokenServiceError>;

    async fn unregister_device(
        &self,
        identity: &LocalIdentity,
        device_token: &str,
    ) -> Result<(), TokenServiceError>;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    default_transport_url: String,
    device_type: String,
}

#[derive(Debug, Serialize)]
struct CallerTokenRequest<'a> {
    room_name: &'a str,
    participant_identity: &'a str,
    participant_identity_name: &'a str,
    participant_identity_type: &'a str,
    caller_user_id: &'a str,
    device_type: &'a str,
}

#[derive(Debug, Serialize)]
struct CalleeTokenRequest<'a> {
    room_name: &'a str,
    participant_identity: &'a str,
    participant_identity_name: &'a str,
    participant_identity_type: &'a str,
    called_user_id: &'a str,
    device_type: &'a str,
}

/// Both the legacy `{room_token, room_name}` and the newer `{accessToken, roomName}` shapes.
#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default, alias = "roomName")]
    room_name: Option<String>,
    #[serde(default)]
    room_token: Option<String>,
    #[serde(default, rename = "accessToken")]
    access_token: Option<String>,
    #[serde(default, rename = "wsUrl")]
    ws_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct SupportCallRequest<'a> {
    phone_number: &'a str,
    room_name: &'a str,
    participant_name: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct SupportCallEnvelope {
    #[serde(default)]
    data: Option<SupportCallData>,
}

#[derive(Debug, Default, Deserialize)]
struct SupportCallData {
    #[serde(default)]
    room_token: Option<String>,
    #[serde(default)]
    room_name: Option<String>,
    #[serde(default)]
    call_details: Option<SupportCallDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct SupportCallDetails {
    #[serde(default)]
    room_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct SupportEndRequest<'a> {
    participant_identity: &'a str,
    room_name: &'a str,
}

#[derive(Debug, Serialize)]
struct RegisterDeviceRequest<'a> {
    user_type: &'a str,
    user_id: &'a str,
    device_token: &'a str,
    device_info: DeviceInfo<'a>,
    device_type: &'a str,
}

#[derive(Debug, Serialize)]
struct DeviceInfo<'a> {
    platform: &'a str,
}

#[derive(Debug, Serialize)]
struct UnregisterDeviceRequest<'a> {
    user_type: &'a str,
    user_id: &'a str,
    device_token: &'a str,
    device_type: &'a str,
}

/// Participant identity the phone bridge uses for the dialed number.
pub fn support_participant_identity(phone_target: &str) -> String {
    format!("sip-{phone_target}")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_SNIPPET_MAX) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        default_transport_url: impl Into<String>,
        device_type: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TokenServiceError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(TokenServiceError::Network(
                "backend base URL cannot be empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TokenServiceError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            default_transport_url: default_transport_url.into(),
            device_type: device_type.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String, TokenServiceError> {
        let url = format!("{}/{path}", self.base_url);
        tracing::debug!(%url, "backend: POST");
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TokenServiceError::Network(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            tracing::warn!(%status, path, "backend: request failed");
            return Err(TokenServiceError::Http {
                status: status.as_u16(),
                path: path.to_string(),
                body_snippet: snippet(&text),
            });
        }
        Ok(text)
    }

    async fn post_json<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, TokenServiceError> {
        let text = self.post(path, body).await?;
        serde_json::from_str(&text).map_err(|e| TokenServiceError::Decode(format!("{path}: {e}")))
    }

    fn credential_from(&self, resp: TokenResponse) -> Result<Credential, TokenServiceError> {
        let access_token = non_empty(resp.room_token)
            .or_else(|| non_empty(resp.access_token))
            .ok_or(TokenServiceError::EmptyToken)?;
        Ok(Credential {
            access_token,
            transport_address: non_empty(resp.ws_url)
                .unwrap_or_else(|| self.default_transport_url.clone()),
            confirmed_room_id: non_empty(resp.room_name),
        })
    }
}

#[async_trait]
impl TokenService for ApiClient {
    async fn request_caller_credential(
        &self,
        room_id: &str,
        identity: &LocalIdentity,
    ) -> Result<Credential, TokenServiceError> {
        let body = CallerTokenRequest {
            room_name: room_id,
            participant_identity: &identity.user_id,
            participant_identity_name: identity.participant_name(),
            participant_identity_type: identity.role.as_str(),
            caller_user_id: &identity.user_id,
            device_type: &self.device_type,
        };
        let resp: TokenResponse = self.post_json(CALLER_TOKEN_PATH, &body).await?;
        self.credential_from(resp)
    }

    async fn request_callee_credential(
        &self,
        room_id: &str,
        identity: &LocalIdentity,
    ) -> Result<Credential, TokenServiceError> {
        let body = CalleeTokenRequest {
            room_name: room_id,
            participant_identity: &identity.user_id,
            participant_identity_name: identity.participant_name(),
            participant_identity_type: identity.role.as_str(),
            called_user_id: &identity.user_id,
            device_type: &self.device_type,
        };
        let resp: TokenResponse = self.post_json(CALLEE_TOKEN_PATH, &body).await?;
        self.credential_from(resp)
    }

    async fn request_support_credential(
        &self,
        phone_target: &str,
        room_id: &str,
        identity: &LocalIdentity,
    ) -> Result<Credential, TokenServiceError> {
        let body = SupportCallRequest {
            phone_number: phone_target,
            room_name: room_id,
            participant_name: identity.participant_name(),
        };
        let env: SupportCallEnvelope = self.post_json(SUPPORT_MAKE_PATH, &body).await?;
        let data = env.data.unwrap_or_default();
        let access_token = non_empty(data.room_token).ok_or(TokenServiceError::EmptyToken)?;
        let confirmed = non_empty(data.room_name)
            .or_else(|| non_empty(data.call_details.and_then(|d| d.room_name)))
            .unwrap_or_else(|| room_id.to_string());
        Ok(Credential {
            access_token,
            transport_address: self.default_transport_url.clone(),
            confirmed_room_id: Some(confirmed),
        })
    }

    async fn end_support_call(
        &self,
        phone_target: &str,
        room_id: &str,
    ) -> Result<(), TokenServiceError> {
        let participant_identity = support_participant_identity(phone_target);
        let body = SupportEndRequest {
            participant_identity: &participant_identity,
            room_name: room_id,
        };
        self.post(SUPPORT_END_PATH, &body).await.map(|_| ())
    }
}

#[async_trait]
impl DeviceRegistry for ApiClient {
    async fn register_device(
        &self,
        identity: &LocalIdentity,
        device_token: &str,
    ) -> Result<(), TokenServiceError> {
        let body = RegisterDeviceRequest {
            user_type: identity.role.as_str(),
            user_id: &identity.user_id,
            device_token,
            device_info: DeviceInfo {
                platform: &self.device_type,
            },
            device_type: &self.device_type,
        };
        self.post(REGISTER_TOKEN_PATH, &body).await.map(|_| ())
    }

    async fn unregister_device(
        &self,
        identity: &LocalIdentity,
        device_token: &str,
    ) -> Result<(), TokenServiceError> {
        let body = UnregisterDeviceRequest {
            user_type: identity.role.as_str(),
            user_id: &identity.user_id,
            device_token,
            device_type: &self.device_type,
        };
        self.post(UNREGISTER_TOKEN_PATH, &body).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::UserRole;
    use kasookoo_test_utils::{spawn_one_shot_server, spawn_scripted_server, ScriptedResponse};

    fn identity() -> LocalIdentity {
        LocalIdentity {
            user_id: "u1".to_string(),
            role: UserRole::Customer,
            display_name: "Ada".to_string(),
        }
    }

    fn client(base_url: &str) -> ApiClient {
        ApiClient::new(
            base_url,
            "wss://default.example",
            "ios",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn caller_credential_posts_role_body_and_reads_legacy_shape() {
        let (url, rx) = spawn_one_shot_server(
            "200 OK",
            r#"{"room_name":"r1","room_token":"tok","wsUrl":"wss://lk.example"}"#,
        );
        let cred = client(&url)
            .request_caller_credential("sdk-room-1", &identity())
            .await
            .unwrap();
        assert_eq!(
            cred,
            Credential {
                access_token: "tok".to_string(),
                transport_address: "wss://lk.example".to_string(),
                confirmed_room_id: Some("r1".to_string()),
            }
        );

        let req = rx.recv().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/v1/bot/sdk/get-caller-livekit-token");
        let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["room_name"], "sdk-room-1");
        assert_eq!(body["participant_identity"], "u1");
        assert_eq!(body["participant_identity_name"], "Ada");
        assert_eq!(body["participant_identity_type"], "customer");
        assert_eq!(body["caller_user_id"], "u1");
        assert_eq!(body["device_type"], "ios");
    }

    #[tokio::test]
    async fn callee_credential_reads_new_shape_and_defaults_address() {
        let (url, rx) = spawn_one_shot_server("200 OK", r#"{"accessToken":"tok2"}"#);
        let cred = client(&url)
            .request_callee_credential("r2", &identity())
            .await
            .unwrap();
        assert_eq!(cred.access_token, "tok2");
        assert_eq!(cred.transport_address, "wss://default.example");
        assert_eq!(cred.confirmed_room_id, None);

        let req = rx.recv().unwrap();
        assert_eq!(req.path, "/api/v1/bot/sdk/get-called-livekit-token");
        let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["called_user_id"], "u1");
    }

    #[tokio::test]
    async fn http_failure_carries_status_and_snippet() {
        let long_body = "x".repeat(400);
        let (url, _rx) = spawn_one_shot_server("500 Internal Server Error", &long_body);
        let err = client(&url)
            .request_caller_credential("r1", &identity())
            .await
            .unwrap_err();
        match &err {
            TokenServiceError::Http {
                status,
                path,
                body_snippet,
            } => {
                assert_eq!(*status, 500);
                assert_eq!(path, CALLER_TOKEN_PATH);
                assert_eq!(body_snippet.chars().count(), BODY_SNIPPET_MAX + 1);
            }
            other => panic!("expected http error, got {other:?}"),
        }
        assert!(err.user_message().starts_with("Token API error: HTTP 500"));
    }

    #[tokio::test]
    async fn empty_token_is_an_error() {
        let (url, _rx) = spawn_one_shot_server("200 OK", r#"{"room_token":"","wsUrl":"wss://x"}"#);
        let err = client(&url)
            .request_caller_credential("r1", &identity())
            .await
            .unwrap_err();
        assert_eq!(err, TokenServiceError::EmptyToken);
    }

    #[tokio::test]
    async fn support_credential_uses_envelope_and_fallback_room() {
        let (url, rx) = spawn_one_shot_server(
            "200 OK",
            r#"{"success":true,"data":{"room_token":"sip-tok","call_details":{"room_name":"bridge-room"}}}"#,
        );
        let cred = client(&url)
            .request_support_credential("+443333054030", "sdk-room-9", &identity())
            .await
            .unwrap();
        assert_eq!(cred.access_token, "sip-tok");
        assert_eq!(cred.transport_address, "wss://default.example");
        assert_eq!(cred.confirmed_room_id.as_deref(), Some("bridge-room"));

        let req = rx.recv().unwrap();
        assert_eq!(req.path, "/api/v1/bot/sdk-sip/calls/make");
        let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["phone_number"], "+443333054030");
        assert_eq!(body["room_name"], "sdk-room-9");
        assert_eq!(body["participant_name"], "Ada");
    }

    #[tokio::test]
    async fn end_support_call_names_the_sip_participant() {
        let (url, rx) = spawn_one_shot_server("200 OK", r#"{"success":true,"message":"ok"}"#);
        client(&url)
            .end_support_call("+4411", "sdk-room-9")
            .await
            .unwrap();
        let req = rx.recv().unwrap();
        assert_eq!(req.path, "/api/v1/bot/sdk-sip/calls/end");
        let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["participant_identity"], "sip-+4411");
        assert_eq!(body["room_name"], "sdk-room-9");
    }

    #[tokio::test]
    async fn register_device_body() {
        let (url, rx) = spawn_one_shot_server("200 OK", r#"{"success":true,"message":"ok"}"#);
        client(&url)
            .register_device(&identity(), "fcm-token")
            .await
            .unwrap();
        let req = rx.recv().unwrap();
        assert_eq!(req.path, "/api/v1/bot/notifications/register-token");
        let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["user_type"], "customer");
        assert_eq!(body["user_id"], "u1");
        assert_eq!(body["device_token"], "fcm-token");
        assert_eq!(body["device_info"]["platform"], "ios");
        assert_eq!(body["device_type"], "ios");
    }

    #[tokio::test]
    async fn device_lifecycle_survives_a_failed_register() {
        let (url, rx) = spawn_scripted_server(vec![
            ScriptedResponse::new("503 Service Unavailable", "try later"),
            ScriptedResponse::ok(r#"{"success":true}"#),
        ]);
        let api = client(&url);
        let err = api
            .register_device(&identity(), "fcm-token")
            .await
            .unwrap_err();
        assert!(matches!(err, TokenServiceError::Http { status: 503, .. }));
        api.unregister_device(&identity(), "fcm-token")
            .await
            .unwrap();

        assert_eq!(
            rx.recv().unwrap().path,
            "/api/v1/bot/notifications/register-token"
        );
        let unregister = rx.recv().unwrap();
        assert_eq!(unregister.path, "/api/v1/bot/notifications/unregister-token");
        let body: serde_json::Value = serde_json::from_str(&unregister.body).unwrap();
        assert_eq!(body["device_token"], "fcm-token");
        assert!(body.get("device_info").is_none());
    }

    #[test]
    fn empty_base_url_is_rejected() {
        assert!(ApiClient::new("/", "wss://x", "ios", Duration::from_secs(1)).is_err());
    }
}
