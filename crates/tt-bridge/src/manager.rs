//! VPN Manager
//!
//! Single entry point a transport layer talks to: it owns the state cell,
//! the diagnostic stream and the consent coordinator, and forwards control
//! requests to the engine.
//!
//! # Usage
//!
//! ```rust,ignore
//! let (context, _delivery) = DeliveryContext::spawn("tt-delivery")?;
//! let manager = VpnManager::new(prompt, context, &BridgeConfig::default(), |listener| {
//!     Arc::new(NativeEngine::new(listener))
//! });
//!
//! manager.subscribe_state(|state: LifecycleState| println!("VPN is {}", state));
//! manager.start(StartConfig::new("Frankfurt", config_toml))?;
//!
//! // Later, when the OS prompt answers
//! manager.on_consent_result(true);
//! ```

use crate::broadcaster::{Subscriber, SubscriptionId};
use crate::buffered::BufferedBroadcaster;
use crate::config::BridgeConfig;
use crate::consent::{ConsentCoordinator, ConsentOutcome, ConsentPhase, StartDisposition};
use crate::delivery::DeliveryContext;
use crate::engine::{
    ConsentPrompt, DiagnosticRecord, EngineBridge, StartConfig, UpdateConfig, UpdateOutcome,
    VpnEngine,
};
use crate::error::BridgeError;
use crate::state::{LifecycleState, StateCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// VPN Manager
///
/// Explicitly constructed and torn down by its owner; there is no global
/// instance.
pub struct VpnManager {
    engine: Arc<dyn VpnEngine>,
    consent: ConsentCoordinator,
    state: StateCell,
    diagnostics: BufferedBroadcaster<DiagnosticRecord>,
    listener: Arc<EngineBridge>,
    context: DeliveryContext,
    shut_down: AtomicBool,
}

impl VpnManager {
    /// Create a manager.
    ///
    /// `build_engine` receives the listener the engine must report to.
    pub fn new<F>(
        prompt: Arc<dyn ConsentPrompt>,
        context: DeliveryContext,
        config: &BridgeConfig,
        build_engine: F,
    ) -> Self
    where
        F: FnOnce(Arc<EngineBridge>) -> Arc<dyn VpnEngine>,
    {
        let state = StateCell::new(context.clone());
        let diagnostics = BufferedBroadcaster::new("diagnostics", context.clone());
        let listener = Arc::new(EngineBridge::new(state.clone(), diagnostics.clone()));
        let engine = build_engine(Arc::clone(&listener));
        let consent = ConsentCoordinator::new(Arc::clone(&engine), prompt, config.pending_policy);

        debug!(
            "VPN manager created (delivery on {}, policy {:?})",
            context.name(),
            config.pending_policy
        );

        Self {
            engine,
            consent,
            state,
            diagnostics,
            listener,
            context,
            shut_down: AtomicBool::new(false),
        }
    }

    /// The listener handed to the engine
    pub fn listener(&self) -> Arc<EngineBridge> {
        Arc::clone(&self.listener)
    }

    /// Context consumer callbacks run on
    pub fn context(&self) -> &DeliveryContext {
        &self.context
    }

    /// Start the VPN, asking for consent first if needed.
    pub fn start(&self, config: StartConfig) -> Result<StartDisposition, BridgeError> {
        self.consent.request_start(config)
    }

    /// Stop the VPN. Also drops a start request still waiting for consent.
    pub fn stop(&self) {
        if self.consent.cancel() {
            info!("Stop requested while awaiting consent, pending start dropped");
        }
        info!("Stopping VPN");
        self.engine.stop();
    }

    /// Reconfigure the running tunnel if the platform supports it.
    pub fn update_configuration(&self, update: &UpdateConfig) -> UpdateOutcome {
        if !self.engine.supports_live_update() {
            debug!("Live reconfiguration not supported, ignoring update");
            return UpdateOutcome::Unsupported;
        }

        info!("Updating VPN configuration");
        self.engine.update_configuration(update);
        UpdateOutcome::Applied
    }

    /// Get current state
    pub fn current_state(&self) -> LifecycleState {
        self.state.current()
    }

    /// Relay the OS consent result.
    pub fn on_consent_result(&self, granted: bool) -> ConsentOutcome {
        self.consent.on_consent_result(granted)
    }

    /// Consent handshake phase
    pub fn consent_phase(&self) -> ConsentPhase {
        self.consent.phase()
    }

    pub fn subscribe_state<S: Subscriber<LifecycleState>>(&self, subscriber: S) -> SubscriptionId {
        self.state.subscribe(subscriber)
    }

    pub fn unsubscribe_state(&self) -> bool {
        self.state.unsubscribe()
    }

    /// Attach the diagnostic subscriber. Records buffered so far are flushed first.
    pub fn subscribe_diagnostics<S: Subscriber<DiagnosticRecord>>(
        &self,
        subscriber: S,
    ) -> SubscriptionId {
        self.diagnostics.subscribe(subscriber)
    }

    pub fn unsubscribe_diagnostics(&self) -> bool {
        self.diagnostics.unsubscribe()
    }

    /// Records waiting for a diagnostic subscriber
    pub fn buffered_diagnostics(&self) -> usize {
        self.diagnostics.backlog_len()
    }

    /// Drop any pending consent request and detach both subscribers.
    ///
    /// Does not stop the engine. Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.consent.cancel();
        self.state.unsubscribe();
        self.diagnostics.unsubscribe();
        info!("VPN manager shut down");
    }
}

impl Drop for VpnManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
