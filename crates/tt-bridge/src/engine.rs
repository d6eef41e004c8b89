//! Collaborator interfaces
//!
//! The native engine and the OS consent prompt live outside this crate.
//! The bridge talks to them through [`VpnEngine`] and [`ConsentPrompt`]; the
//! engine talks back through [`EngineListener`], implemented by
//! [`EngineBridge`].

use crate::buffered::BufferedBroadcaster;
use crate::error::BridgeError;
use crate::state::{LifecycleState, StateCell};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Configuration handed to the engine on start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartConfig {
    /// Display name of the server being connected to
    pub server_name: String,
    /// Engine configuration document (opaque to the bridge)
    pub config: String,
}

impl StartConfig {
    pub fn new(server_name: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            config: config.into(),
        }
    }
}

/// Live reconfiguration request. Absent fields stay unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    pub server_name: Option<String>,
    pub config: Option<String>,
}

impl UpdateConfig {
    /// Nothing to change?
    pub fn is_empty(&self) -> bool {
        self.server_name.is_none() && self.config.is_none()
    }
}

/// Result of a live reconfiguration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Forwarded to the engine
    Applied,
    /// This platform cannot reconfigure a running tunnel
    Unsupported,
}

/// The native VPN engine.
pub trait VpnEngine: Send + Sync {
    /// Bring the tunnel up. Progress is reported through [`EngineListener`].
    fn start(&self, config: &StartConfig);

    /// Tear the tunnel down.
    fn stop(&self);

    /// Can a running tunnel be reconfigured?
    fn supports_live_update(&self) -> bool {
        false
    }

    /// Reconfigure a running tunnel. Only called when
    /// [`supports_live_update`](Self::supports_live_update) is true.
    fn update_configuration(&self, update: &UpdateConfig) {
        let _ = update;
    }
}

/// The OS VPN-permission prompt.
pub trait ConsentPrompt: Send + Sync {
    /// Has permission already been granted?
    ///
    /// Called with the coordinator's lock held; must not call back into it.
    fn is_granted(&self) -> bool;

    /// Show the prompt. On `Ok`, exactly one consent result must eventually
    /// be reported back, from any thread. On `Err`, none will be.
    fn request_consent(&self) -> Result<(), BridgeError>;
}

/// Callbacks the engine invokes, from any thread, at any time.
pub trait EngineListener: Send + Sync {
    /// Lifecycle state changed (see [`LifecycleState::code`]).
    fn on_state_changed(&self, code: i32);

    /// One diagnostic / query-log record.
    fn on_diagnostic_record(&self, text: String);

    /// Tunnel failure with a reason.
    fn on_engine_error(&self, reason: String) {
        let _ = reason;
        self.on_state_changed(LifecycleState::ERROR_CODE);
    }
}

/// One diagnostic record, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    seq: u64,
    text: Arc<str>,
}

impl DiagnosticRecord {
    pub fn new(seq: u64, text: impl Into<Arc<str>>) -> Self {
        Self {
            seq,
            text: text.into(),
        }
    }

    /// Arrival sequence number, starting at 0
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Record payload
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.seq, self.text)
    }
}

/// Routes engine callbacks into the state cell and the diagnostic stream.
pub struct EngineBridge {
    state: StateCell,
    diagnostics: BufferedBroadcaster<DiagnosticRecord>,
    next_seq: AtomicU64,
}

impl EngineBridge {
    pub fn new(state: StateCell, diagnostics: BufferedBroadcaster<DiagnosticRecord>) -> Self {
        Self {
            state,
            diagnostics,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Number of diagnostic records received so far
    pub fn records_received(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed)
    }
}

impl EngineListener for EngineBridge {
    fn on_state_changed(&self, code: i32) {
        // Unknown codes are logged by the cell and otherwise ignored
        let _ = self.state.apply_code(code);
    }

    fn on_diagnostic_record(&self, text: String) {
        debug!("Diagnostic record ({} bytes)", text.len());
        // Numbered under the stream lock: sequence order is delivery order
        self.diagnostics.publish_with(|| {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            DiagnosticRecord::new(seq, text)
        });
    }

    fn on_engine_error(&self, reason: String) {
        warn!("Engine reported failure: {}", reason);
        self.state.apply(LifecycleState::Error(reason));
    }
}
