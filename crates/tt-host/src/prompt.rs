//! Simulated OS consent prompt
//!
//! Answers asynchronously after a delay and remembers a grant, like the OS
//! does once the user accepted the VPN profile.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tt_bridge::{BridgeError, ConsentPrompt, VpnManager};

pub struct SimulatedPrompt {
    /// What the simulated user answers
    answer: bool,
    delay: Duration,
    granted: Arc<AtomicBool>,
    manager: OnceLock<Weak<VpnManager>>,
    runtime: Handle,
}

impl SimulatedPrompt {
    /// Must be called inside a tokio runtime.
    pub fn new(answer: bool, delay: Duration) -> Self {
        Self {
            answer,
            delay,
            granted: Arc::new(AtomicBool::new(false)),
            manager: OnceLock::new(),
            runtime: Handle::current(),
        }
    }

    /// Route answers to `manager`.
    pub fn bind(&self, manager: &Arc<VpnManager>) {
        if self.manager.set(Arc::downgrade(manager)).is_err() {
            warn!("Consent prompt already bound");
        }
    }
}

impl ConsentPrompt for SimulatedPrompt {
    fn is_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    fn request_consent(&self) -> Result<(), BridgeError> {
        let Some(manager) = self.manager.get().cloned() else {
            return Err(BridgeError::ConsentUnavailable(
                "prompt not bound to a manager".to_string(),
            ));
        };
        let answer = self.answer;
        let delay = self.delay;
        let granted = Arc::clone(&self.granted);

        info!("Showing VPN consent prompt");
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if answer {
                granted.store(true, Ordering::SeqCst);
            }
            match manager.upgrade() {
                Some(manager) => {
                    let outcome = manager.on_consent_result(answer);
                    info!("Consent answered: {:?}", outcome);
                }
                None => warn!("Consent answered after manager was dropped"),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineTiming, SimulatedEngine};
    use tt_bridge::{
        BridgeConfig, ConsentPhase, DeliveryContext, EngineListener, StartConfig, VpnEngine,
    };

    #[tokio::test]
    async fn test_unbound_prompt_fails_request() {
        let prompt = SimulatedPrompt::new(true, Duration::ZERO);

        assert!(matches!(
            prompt.request_consent(),
            Err(BridgeError::ConsentUnavailable(_))
        ));
        assert!(!prompt.is_granted());
    }

    #[tokio::test]
    async fn test_unbound_prompt_does_not_strand_start() {
        let (context, _delivery) = DeliveryContext::spawn("prompt-test").unwrap();
        let prompt = Arc::new(SimulatedPrompt::new(true, Duration::ZERO));
        let manager = VpnManager::new(
            prompt.clone(),
            context,
            &BridgeConfig::default(),
            |listener| {
                let listener: Arc<dyn EngineListener> = listener;
                let engine: Arc<dyn VpnEngine> =
                    Arc::new(SimulatedEngine::new(listener, EngineTiming::default()));
                engine
            },
        );

        assert!(manager.start(StartConfig::new("Frankfurt", "")).is_err());
        assert_eq!(manager.consent_phase(), ConsentPhase::Idle);
    }
}
