use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use kasookoo_core::{CallLifecycleEvent, CallObserver, CallPhase, CallUpdate};

pub fn wait_until(what: &str, timeout: Duration, f: impl FnMut() -> bool) {
    wait_until_with_poll(what, timeout, Duration::from_millis(20), f);
}

pub fn wait_until_with_poll(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut f: impl FnMut() -> bool,
) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(poll);
    }
    panic!("{what}: condition not met within {timeout:?}");
}

/// Short ring bound, fast presence polling, no device registration traffic.
pub fn write_config(data_dir: &str, ring_timeout_ms: u64) {
    let path = std::path::Path::new(data_dir).join("kasookoo_config.json");
    let v = serde_json::json!({
        "disable_network": true,
        "ring_timeout_ms": ring_timeout_ms,
        "ring_poll_interval_ms": 20,
        "support_phone_number": "+4400",
    });
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

#[derive(Clone)]
pub struct Collector(pub Arc<Mutex<Vec<CallUpdate>>>);

impl Collector {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn events(&self) -> Vec<CallLifecycleEvent> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|u| match u {
                CallUpdate::Lifecycle { event, .. } => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn event_tags(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.tag()).collect()
    }

    pub fn has_event(&self, tag: &str) -> bool {
        self.events().iter().any(|e| e.tag() == tag)
    }

    /// Every phase published on the update stream, in order, without repeats.
    pub fn phases(&self) -> Vec<CallPhase> {
        let mut out: Vec<CallPhase> = Vec::new();
        for u in self.0.lock().unwrap().iter() {
            if let CallUpdate::StateChanged { snapshot, .. } = u {
                if out.last() != Some(&snapshot.phase) {
                    out.push(snapshot.phase);
                }
            }
        }
        out
    }

    pub fn revs(&self) -> Vec<u64> {
        self.0.lock().unwrap().iter().map(|u| u.rev()).collect()
    }
}

impl CallObserver for Collector {
    fn on_update(&self, update: CallUpdate) {
        self.0.lock().unwrap().push(update);
    }
}
