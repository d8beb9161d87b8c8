// Device push-token persistence and backend registration.

use std::path::Path;

use crate::state::LocalIdentity;

use super::CallCore;

const PUSH_TOKEN_FILE: &str = "push_token.txt";

// Values the platform layer reports when no real token exists.
const PLACEHOLDER_TOKENS: &[&str] = &["no_fcm_token", "simulator_fcm_token"];

pub(super) fn normalize_push_token(raw: &str) -> Option<String> {
    let token = raw.trim();
    if token.is_empty() || PLACEHOLDER_TOKENS.contains(&token) {
        return None;
    }
    Some(token.to_string())
}

impl CallCore {
    pub(super) fn load_push_token(data_dir: &str) -> Option<String> {
        let path = Path::new(data_dir).join(PUSH_TOKEN_FILE);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| normalize_push_token(&s))
    }

    fn save_push_token(&self, token: &str) {
        let path = Path::new(&self.data_dir).join(PUSH_TOKEN_FILE);
        if let Err(e) = std::fs::write(&path, token) {
            tracing::warn!(%e, "push: failed to persist device token");
        }
    }

    pub(super) fn set_push_token(&mut self, raw: String) {
        let Some(token) = normalize_push_token(&raw) else {
            tracing::debug!("push: ignoring empty or placeholder token");
            return;
        };
        if self.push_token.as_deref() == Some(token.as_str()) {
            return;
        }
        tracing::info!("push: device token received");
        self.save_push_token(&token);
        self.push_token = Some(token);
        self.register_push_device();
    }

    pub(super) fn register_push_device(&self) {
        let (Some(token), Some(identity)) = (self.push_token.clone(), self.identity.clone())
        else {
            return;
        };
        if !self.config.network_enabled() {
            return;
        }
        let devices = self.devices.clone();
        self.runtime.spawn(async move {
            match devices.register_device(&identity, &token).await {
                Ok(()) => tracing::info!(role = identity.role.as_str(), "push: registered device"),
                Err(e) => tracing::warn!(%e, "push: failed to register device"),
            }
        });
    }

    pub(super) fn unregister_push_device(&self, identity: LocalIdentity) {
        let Some(token) = self.push_token.clone() else {
            return;
        };
        if !self.config.network_enabled() {
            return;
        }
        let devices = self.devices.clone();
        self.runtime.spawn(async move {
            match devices.unregister_device(&identity, &token).await {
                Ok(()) => tracing::info!("push: unregistered device"),
                Err(e) => tracing::warn!(%e, "push: failed to unregister device"),
            }
        });
    }
}
