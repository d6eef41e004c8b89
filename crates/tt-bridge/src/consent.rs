//! Consent handshake
//!
//! Starting a tunnel may require OS permission. [`ConsentCoordinator`] stashes
//! the start request while the prompt is up and starts the engine once the
//! user grants it. Only one prompt is in flight at a time.

use crate::config::PendingPolicy;
use crate::engine::{ConsentPrompt, StartConfig, VpnEngine};
use crate::error::BridgeError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Coordinator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentPhase {
    Idle,
    AwaitingConsent,
}

/// What [`ConsentCoordinator::request_start`] did with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDisposition {
    /// Consent was already granted; the engine was started
    Started,
    /// Prompt shown; the request is pending
    AwaitingConsent,
    /// A prompt was already up; the request replaced the pending one
    Replaced,
}

/// What a consent result did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentOutcome {
    /// Granted; the engine was started with the pending request
    Started,
    /// Denied; the pending request was discarded
    Declined,
    /// No prompt was pending
    Ignored,
}

enum Phase {
    Idle,
    AwaitingConsent(StartConfig),
}

/// Consent state machine around engine start.
pub struct ConsentCoordinator {
    phase: Mutex<Phase>,
    engine: Arc<dyn VpnEngine>,
    prompt: Arc<dyn ConsentPrompt>,
    policy: PendingPolicy,
}

enum Next {
    Start(StartConfig),
    Prompt,
}

impl ConsentCoordinator {
    pub fn new(
        engine: Arc<dyn VpnEngine>,
        prompt: Arc<dyn ConsentPrompt>,
        policy: PendingPolicy,
    ) -> Self {
        Self {
            phase: Mutex::new(Phase::Idle),
            engine,
            prompt,
            policy,
        }
    }

    /// Current phase
    pub fn phase(&self) -> ConsentPhase {
        match *self.phase.lock() {
            Phase::Idle => ConsentPhase::Idle,
            Phase::AwaitingConsent(_) => ConsentPhase::AwaitingConsent,
        }
    }

    /// Is a start request waiting for consent?
    pub fn has_pending(&self) -> bool {
        matches!(*self.phase.lock(), Phase::AwaitingConsent(_))
    }

    /// Start the engine, asking for consent first if needed.
    pub fn request_start(&self, config: StartConfig) -> Result<StartDisposition, BridgeError> {
        let next = {
            let mut phase = self.phase.lock();
            match &mut *phase {
                Phase::AwaitingConsent(pending) => {
                    return match self.policy {
                        PendingPolicy::LastWriteWins => {
                            info!(
                                "Consent pending, replacing request for {} with {}",
                                pending.server_name, config.server_name
                            );
                            *pending = config;
                            Ok(StartDisposition::Replaced)
                        }
                        PendingPolicy::Reject => {
                            warn!(
                                "Consent pending for {}, rejecting request for {}",
                                pending.server_name, config.server_name
                            );
                            Err(BridgeError::ConsentPending)
                        }
                    };
                }
                Phase::Idle if self.prompt.is_granted() => Next::Start(config),
                Phase::Idle => {
                    *phase = Phase::AwaitingConsent(config);
                    Next::Prompt
                }
            }
        };

        match next {
            Next::Start(config) => {
                info!("Starting VPN to {}", config.server_name);
                self.engine.start(&config);
                Ok(StartDisposition::Started)
            }
            Next::Prompt => {
                info!("Requesting VPN consent");
                if let Err(e) = self.prompt.request_consent() {
                    // No result will ever arrive for this request
                    warn!("Consent prompt failed: {}", e);
                    self.cancel();
                    return Err(e);
                }
                Ok(StartDisposition::AwaitingConsent)
            }
        }
    }

    /// Resolve the pending prompt.
    ///
    /// Results arriving while no prompt is pending are ignored.
    pub fn on_consent_result(&self, granted: bool) -> ConsentOutcome {
        let pending = {
            let mut phase = self.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Idle) {
                Phase::AwaitingConsent(config) => config,
                Phase::Idle => {
                    warn!("Stray consent result ({}), no request pending", granted);
                    return ConsentOutcome::Ignored;
                }
            }
        };

        if granted {
            info!("VPN consent granted, starting VPN to {}", pending.server_name);
            self.engine.start(&pending);
            ConsentOutcome::Started
        } else {
            info!("VPN consent declined, dropping request for {}", pending.server_name);
            ConsentOutcome::Declined
        }
    }

    /// Discard the pending request, if any. A later result for it is ignored.
    pub fn cancel(&self) -> bool {
        let mut phase = self.phase.lock();
        match std::mem::replace(&mut *phase, Phase::Idle) {
            Phase::AwaitingConsent(config) => {
                debug!("Cancelled pending request for {}", config.server_name);
                true
            }
            Phase::Idle => false,
        }
    }
}
