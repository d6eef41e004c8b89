//! Simulated VPN engine
//!
//! Stands in for the native engine: reports Connecting, then Connected after
//! a delay, and emits a JSON query-log record at a fixed interval while
//! connected. All reporting happens on tokio worker threads, like a real
//! engine calling back from its own threads.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tt_bridge::{EngineListener, StartConfig, UpdateConfig, VpnEngine};
use tt_control::{EngineConfig, QueryLogEntry};

/// Hosts the simulated clients keep resolving
const HOSTS: &[&str] = &[
    "google.com",
    "company.com",
    "git.internal",
    "video.entertainment",
    "example.org",
];

/// Simulated engine timing
#[derive(Debug, Clone, Copy)]
pub struct EngineTiming {
    /// Delay between Connecting and Connected
    pub connect_delay: Duration,
    /// Interval between query-log records
    pub record_interval: Duration,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            connect_delay: Duration::from_millis(300),
            record_interval: Duration::from_millis(50),
        }
    }
}

pub struct SimulatedEngine {
    listener: Arc<dyn EngineListener>,
    runtime: Handle,
    timing: EngineTiming,
    /// Active engine configuration
    document: Arc<Mutex<Option<EngineConfig>>>,
    session: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedEngine {
    /// Create an engine reporting to `listener`. Must be called inside a tokio runtime.
    pub fn new(listener: Arc<dyn EngineListener>, timing: EngineTiming) -> Self {
        Self {
            listener,
            runtime: Handle::current(),
            timing,
            document: Arc::new(Mutex::new(None)),
            session: Mutex::new(None),
        }
    }

    fn abort_session(&self) -> bool {
        match self.session.lock().take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl VpnEngine for SimulatedEngine {
    fn start(&self, config: &StartConfig) {
        self.abort_session();
        self.listener.on_state_changed(1);

        let document = match EngineConfig::from_toml(&config.config) {
            Ok(document) => document,
            Err(e) => {
                self.listener.on_engine_error(format!("bad engine configuration: {e}"));
                return;
            }
        };
        info!(
            "Engine connecting to {} ({}, {})",
            config.server_name, document.endpoint.hostname, document.endpoint.protocol
        );
        let source_ip = document
            .endpoint
            .addresses
            .first()
            .cloned()
            .unwrap_or_default();
        *self.document.lock() = Some(document);

        let listener = Arc::clone(&self.listener);
        let shared = Arc::clone(&self.document);
        let timing = self.timing;

        let task = self.runtime.spawn(async move {
            tokio::time::sleep(timing.connect_delay).await;
            {
                // Same lock as stop: Connected never lands after Disconnected
                let document = shared.lock();
                if document.is_none() {
                    return;
                }
                listener.on_state_changed(2);
            }

            let mut interval = tokio::time::interval(timing.record_interval);
            let mut counter: u64 = 0;
            loop {
                interval.tick().await;

                let host = HOSTS[(counter % HOSTS.len() as u64) as usize];
                let document = shared.lock();
                let Some(decision) = document.as_ref().map(|d| d.decide(host)) else {
                    break;
                };
                let entry = QueryLogEntry {
                    timestamp: Utc::now(),
                    protocol: "HTTPS".to_string(),
                    decision,
                    source_ip: source_ip.clone(),
                    destination_ip: format!("203.0.113.{}", 1 + counter % 254),
                    source_port: 49152 + (counter % 16384) as u16,
                    destination_port: 443,
                    domain: Some(host.to_string()),
                };

                match entry.to_json() {
                    Ok(json) => listener.on_diagnostic_record(json),
                    Err(e) => warn!("Dropping query-log record: {}", e),
                }
                drop(document);
                counter += 1;
            }
        });

        *self.session.lock() = Some(task);
    }

    fn stop(&self) {
        if !self.abort_session() {
            debug!("Engine stop without an active session");
        }
        // A session task past its last await finishes under this lock first
        *self.document.lock() = None;
        self.listener.on_state_changed(3);
        self.listener.on_state_changed(0);
        info!("Engine stopped");
    }

    fn supports_live_update(&self) -> bool {
        true
    }

    fn update_configuration(&self, update: &UpdateConfig) {
        let Some(content) = &update.config else {
            debug!("Engine update without a configuration document");
            return;
        };

        match EngineConfig::from_toml(content) {
            Ok(document) => {
                info!(
                    "Engine routing updated (default {:?})",
                    document.routing.default_mode
                );
                *self.document.lock() = Some(document);
            }
            Err(e) => warn!("Ignoring engine update: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tt_control::RoutingMode;

    #[derive(Default)]
    struct Recorder {
        codes: Mutex<Vec<i32>>,
        records: Mutex<Vec<String>>,
        errors: Mutex<Vec<String>>,
    }

    impl EngineListener for Recorder {
        fn on_state_changed(&self, code: i32) {
            self.codes.lock().push(code);
        }

        fn on_diagnostic_record(&self, text: String) {
            self.records.lock().push(text);
        }

        fn on_engine_error(&self, reason: String) {
            self.errors.lock().push(reason);
        }
    }

    const CONFIG: &str = r#"
excluded_routes = []

[endpoint]
hostname = "vpn1.example.com"
addresses = ["192.168.1.100"]
protocol = "quic"
username = "user1"
password = "password1"
dns_upstreams = ["8.8.8.8"]

[routing]
default_mode = "vpn"
bypass_rules = ["company.com"]
vpn_rules = []
"#;

    fn fast() -> EngineTiming {
        EngineTiming {
            connect_delay: Duration::from_millis(20),
            record_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_start_connects_and_emits_records() {
        let recorder = Arc::new(Recorder::default());
        let engine = SimulatedEngine::new(recorder.clone(), fast());

        engine.start(&StartConfig::new("Frankfurt", CONFIG));
        tokio::time::sleep(Duration::from_millis(150)).await;
        engine.stop();

        assert_eq!(*recorder.codes.lock(), vec![1, 2, 3, 0]);

        let records = recorder.records.lock();
        assert!(records.len() >= 2);
        let first: QueryLogEntry = serde_json::from_str(&records[0]).unwrap();
        assert_eq!(first.domain.as_deref(), Some("google.com"));
        assert!(Utc::now() - first.timestamp < chrono::Duration::seconds(5));
        assert_eq!(first.decision, RoutingMode::Vpn);
        let second: QueryLogEntry = serde_json::from_str(&records[1]).unwrap();
        assert_eq!(second.decision, RoutingMode::Bypass);
    }

    #[tokio::test]
    async fn test_bad_config_reports_error() {
        let recorder = Arc::new(Recorder::default());
        let engine = SimulatedEngine::new(recorder.clone(), fast());

        engine.start(&StartConfig::new("Broken", "endpoint = 3"));

        assert_eq!(*recorder.codes.lock(), vec![1]);
        assert_eq!(recorder.errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_halts_records() {
        let recorder = Arc::new(Recorder::default());
        let engine = SimulatedEngine::new(recorder.clone(), fast());

        engine.start(&StartConfig::new("Frankfurt", CONFIG));
        tokio::time::sleep(Duration::from_millis(60)).await;
        engine.stop();
        let emitted = recorder.records.lock().len();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(recorder.records.lock().len(), emitted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_racing_connect_ends_disconnected() {
        let recorder = Arc::new(Recorder::default());
        let engine = SimulatedEngine::new(
            recorder.clone(),
            EngineTiming {
                connect_delay: Duration::ZERO,
                record_interval: Duration::from_millis(1),
            },
        );

        for _ in 0..200 {
            engine.start(&StartConfig::new("Frankfurt", CONFIG));
            tokio::task::yield_now().await;
            engine.stop();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let codes = recorder.codes.lock();
        assert_eq!(codes.last(), Some(&0));
        assert_eq!(codes.iter().filter(|c| **c == 0).count(), 200);
    }
}
