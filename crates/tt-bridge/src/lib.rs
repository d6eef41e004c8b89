//! tt-bridge - VPN lifecycle bridge
//!
//! Connects a privileged VPN engine (which reports state changes and
//! diagnostic records from its own threads) to a single foreground
//! consumer that may subscribe and unsubscribe at any time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  on_state_changed   ┌───────────┐
//! │  VPN engine  │────────────────────▶│ StateCell │──┐
//! │ (any thread) │  on_diagnostic_rec  ├───────────┴──┴──────┐   ┌──────────────────┐
//! │              │────────────────────▶│ BufferedBroadcaster │──▶│ DeliveryContext  │──▶ consumer
//! └──────▲───────┘                     └─────────────────────┘   │ (one thread, FIFO)│
//!        │ start/stop/update                                     └──────────────────┘
//! ┌──────┴───────┐   request_start    ┌────────────────────┐
//! │  VpnManager  │───────────────────▶│ ConsentCoordinator │◀── on_consent_result
//! └──────────────┘                    └────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Replay on subscribe**: a new state subscriber first sees the current state
//! - **No loss while detached**: diagnostic records are buffered and flushed in order
//! - **Single delivery thread**: every consumer callback runs on the delivery context
//! - **Single-flight consent**: one prompt in flight, one stashed start request

mod broadcaster;
mod buffered;
mod config;
mod consent;
mod delivery;
mod engine;
mod error;
mod manager;
mod state;

pub use broadcaster::{Broadcaster, Subscriber, SubscriptionId};
pub use buffered::BufferedBroadcaster;
pub use config::{BridgeConfig, PendingPolicy};
pub use consent::{ConsentCoordinator, ConsentOutcome, ConsentPhase, StartDisposition};
pub use delivery::{DeliveryContext, DeliveryPump, DeliveryThread};
pub use engine::{
    ConsentPrompt, DiagnosticRecord, EngineBridge, EngineListener, StartConfig, UpdateConfig,
    UpdateOutcome, VpnEngine,
};
pub use error::BridgeError;
pub use manager::VpnManager;
pub use state::{LifecycleState, StateCell};
