//! Scripted demo session
//!
//! Wires a [`VpnManager`] to the simulated engine and prompt, then walks
//! through one connection: start with consent, late diagnostics subscriber
//! (backlog flush), query-log capture into the store, live routing update,
//! stop.

use crate::engine::{EngineTiming, SimulatedEngine};
use crate::prompt::SimulatedPrompt;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};
use tt_bridge::{
    BridgeConfig, DeliveryContext, DeliveryThread, DiagnosticRecord, EngineListener,
    LifecycleState, UpdateConfig, VpnEngine, VpnManager,
};
use tt_control::{AddServerRequest, ControlStore, QueryLogEntry, RoutingMode, StoreError};

/// Session timing
#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    pub engine: EngineTiming,
    /// Time the simulated user takes to answer the prompt
    pub consent_delay: Duration,
    /// Time spent in each connected phase of the script
    pub dwell: Duration,
    /// Longest wait for a state transition
    pub step_timeout: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            engine: EngineTiming::default(),
            consent_delay: Duration::from_millis(200),
            dwell: Duration::from_millis(500),
            step_timeout: Duration::from_secs(5),
        }
    }
}

/// What the session observed
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    /// States delivered to the subscriber, in order
    pub states: Vec<LifecycleState>,
    /// Sequence number of the first diagnostic record delivered
    pub first_record_seq: Option<u64>,
    /// Records held back until the diagnostics subscriber attached
    pub backlog_at_subscribe: usize,
    /// Diagnostic records delivered
    pub records_delivered: usize,
    /// Query-log entries now in the store
    pub stored_requests: usize,
}

/// Manager plus the simulated collaborators
pub struct Host {
    pub manager: Arc<VpnManager>,
    pub prompt: Arc<SimulatedPrompt>,
    // Declared last: stops after the manager is gone
    _delivery: DeliveryThread,
}

impl Host {
    /// Build the host. Must be called inside a tokio runtime.
    pub fn build(config: &BridgeConfig, timing: &SessionTiming, grant: bool) -> Result<Self> {
        let (context, delivery) = DeliveryContext::spawn(&config.delivery_thread_name)
            .context("failed to start delivery context")?;
        let prompt = Arc::new(SimulatedPrompt::new(grant, timing.consent_delay));
        let engine_timing = timing.engine;

        let manager = Arc::new(VpnManager::new(
            prompt.clone(),
            context,
            config,
            move |listener| {
                let listener: Arc<dyn EngineListener> = listener;
                let engine: Arc<dyn VpnEngine> =
                    Arc::new(SimulatedEngine::new(listener, engine_timing));
                engine
            },
        ));
        prompt.bind(&manager);

        Ok(Self {
            manager,
            prompt,
            _delivery: delivery,
        })
    }
}

/// Store with one server, used when no store file is given
pub fn demo_store() -> Result<ControlStore, StoreError> {
    let mut store = ControlStore::with_defaults();
    let server = store.add_server(AddServerRequest {
        name: "Frankfurt".to_string(),
        ip_address: "192.168.1.100".to_string(),
        domain: "vpn1.example.com".to_string(),
        login: "user1".to_string(),
        password: "password1".to_string(),
        dns_servers: vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()],
        routing_profile_id: 1,
        ..AddServerRequest::default()
    })?;
    store.set_selected_server_id(server.id)?;
    store.set_excluded_routes(vec!["192.168.0.0/16".to_string()]);
    Ok(store)
}

/// Run the script against `host`, recording query-log entries into `store`.
pub async fn run_session(
    host: &Host,
    store: &mut ControlStore,
    timing: &SessionTiming,
) -> Result<SessionReport> {
    let manager = &host.manager;
    let mut report = SessionReport::default();

    let (state_tx, mut states) = mpsc::unbounded_channel();
    manager.subscribe_state(move |state: LifecycleState| {
        let _ = state_tx.send(state);
    });
    wait_for(&mut states, &mut report, timing.step_timeout, |_| true).await?;

    // Start
    let start = store.start_config()?;
    let disposition = manager.start(start)?;
    info!("Start requested: {:?}", disposition);
    wait_for(&mut states, &mut report, timing.step_timeout, |s| {
        s.is_connected()
    })
    .await?;

    // Records pile up while nobody listens
    tokio::time::sleep(timing.dwell).await;
    report.backlog_at_subscribe = manager.buffered_diagnostics();
    info!("{} diagnostic records buffered", report.backlog_at_subscribe);

    let (record_tx, mut records) = mpsc::unbounded_channel();
    manager.subscribe_diagnostics(move |record: DiagnosticRecord| {
        let _ = record_tx.send(record);
    });
    tokio::time::sleep(timing.dwell).await;
    drain_records(&mut records, store, &mut report);

    // Flip the default route while connected
    let profile_id = store
        .selected_server()
        .map(|s| s.routing_profile_id)
        .context("selected server disappeared")?;
    let mode = store.routing_profile(profile_id)?.default_mode;
    let flipped = match mode {
        RoutingMode::Vpn => RoutingMode::Bypass,
        RoutingMode::Bypass => RoutingMode::Vpn,
    };
    let mut profile = store.routing_profile(profile_id)?.clone();
    profile.default_mode = flipped;
    let document = tt_control::EngineConfig::new(
        store.selected_server().context("selected server disappeared")?,
        &profile,
        store.excluded_routes(),
    )
    .to_toml()?;
    let outcome = manager.update_configuration(&UpdateConfig {
        config: Some(document),
        ..UpdateConfig::default()
    });
    info!("Routing update ({:?} -> {:?}): {:?}", mode, flipped, outcome);

    // Stop
    manager.stop();
    wait_for(&mut states, &mut report, timing.step_timeout, |s| {
        *s == LifecycleState::Disconnected
    })
    .await?;

    // Let queued deliveries land, then detach
    tokio::time::sleep(Duration::from_millis(20)).await;
    drain_records(&mut records, store, &mut report);
    manager.shutdown();

    report.stored_requests = store.request_count();
    Ok(report)
}

/// Collect states until one matches `done`. Fails on an error state.
async fn wait_for<F>(
    states: &mut UnboundedReceiver<LifecycleState>,
    report: &mut SessionReport,
    timeout: Duration,
    done: F,
) -> Result<()>
where
    F: Fn(&LifecycleState) -> bool,
{
    loop {
        let state = tokio::time::timeout(timeout, states.recv())
            .await
            .context("timed out waiting for VPN state")?
            .context("state subscription closed")?;
        debug!("Session observed state {}", state);

        if state.is_error() {
            bail!("VPN failed: {}", state);
        }
        let finished = done(&state);
        report.states.push(state);
        if finished {
            return Ok(());
        }
    }
}

fn drain_records(
    records: &mut UnboundedReceiver<DiagnosticRecord>,
    store: &mut ControlStore,
    report: &mut SessionReport,
) {
    while let Ok(record) = records.try_recv() {
        report.first_record_seq.get_or_insert(record.seq());
        report.records_delivered += 1;

        match QueryLogEntry::from_record(&record) {
            Ok(entry) => store.record_request(entry),
            Err(e) => warn!("Skipping record {}: {}", record.seq(), e),
        }
    }
}
