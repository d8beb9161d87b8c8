use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "kasookoo_config.json";

const DEFAULT_API_BASE_URL: &str = "https://voiceai.kasookoo.com/";
const DEFAULT_TRANSPORT_URL: &str = "wss://kasookoosdk-3af68qx7.livekit.cloud";
const DEFAULT_SUPPORT_PHONE: &str = "+443333054030";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub api_base_url: Option<String>,
    pub default_transport_url: Option<String>,
    pub support_phone_number: Option<String>,
    pub ring_timeout_ms: Option<u64>,
    pub ring_poll_interval_ms: Option<u64>,
    pub http_timeout_ms: Option<u64>,
    pub device_type: Option<String>,
    pub disable_network: Option<bool>,
}

/// Missing or malformed files fall back to defaults.
pub fn load_call_config(data_dir: &str) -> CallConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    let Ok(bytes) = std::fs::read(&path) else {
        return CallConfig::default();
    };
    match serde_json::from_slice::<CallConfig>(&bytes) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), %e, "config: unreadable, using defaults");
            CallConfig::default()
        }
    }
}

/// Pretty JSON with every default filled in; printed by `kasookoo-cli default-config`.
pub fn default_config_json() -> String {
    let resolved = CallConfig {
        api_base_url: Some(DEFAULT_API_BASE_URL.to_string()),
        default_transport_url: Some(DEFAULT_TRANSPORT_URL.to_string()),
        support_phone_number: Some(DEFAULT_SUPPORT_PHONE.to_string()),
        ring_timeout_ms: Some(60_000),
        ring_poll_interval_ms: Some(500),
        http_timeout_ms: Some(15_000),
        device_type: Some("ios".to_string()),
        disable_network: Some(false),
    };
    serde_json::to_string_pretty(&resolved).unwrap_or_else(|_| "{}".to_string())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl CallConfig {
    pub fn api_base_url(&self) -> String {
        if let Some(url) = non_empty(&self.api_base_url) {
            return url.to_string();
        }
        std::env::var("KASOOKOO_API_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    pub fn default_transport_url(&self) -> String {
        non_empty(&self.default_transport_url)
            .unwrap_or(DEFAULT_TRANSPORT_URL)
            .to_string()
    }

    pub fn support_phone_number(&self) -> String {
        non_empty(&self.support_phone_number)
            .unwrap_or(DEFAULT_SUPPORT_PHONE)
            .to_string()
    }

    pub fn device_type(&self) -> String {
        non_empty(&self.device_type).unwrap_or("ios").to_string()
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_millis(self.ring_timeout_ms.unwrap_or(60_000).max(1))
    }

    pub fn ring_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ring_poll_interval_ms.unwrap_or(500).max(10))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms.unwrap_or(15_000).max(1))
    }

    pub fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.disable_network {
            return !disable;
        }
        std::env::var("KASOOKOO_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }
}
