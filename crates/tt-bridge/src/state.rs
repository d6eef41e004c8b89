//! VPN lifecycle state
//!
//! [`StateCell`] holds the last state reported by the engine and publishes
//! each real change exactly once. It does not validate transitions; the
//! engine owns transition legality.

use crate::broadcaster::{Broadcaster, Subscriber, SubscriptionId};
use crate::delivery::DeliveryContext;
use crate::error::BridgeError;
use std::fmt;
use tracing::{debug, info, warn};

/// VPN connection lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    /// VPN is disconnected
    #[default]
    Disconnected,
    /// Tunnel is being established
    Connecting,
    /// Tunnel is up
    Connected,
    /// Tunnel is being torn down
    Disconnecting,
    /// Re-establishing after a drop
    Reconnecting,
    /// Engine reported a failure
    Error(String),
}

impl LifecycleState {
    /// Code the engine uses for [`LifecycleState::Error`]
    pub const ERROR_CODE: i32 = 5;

    /// Stable external code
    pub fn code(&self) -> i32 {
        match self {
            LifecycleState::Disconnected => 0,
            LifecycleState::Connecting => 1,
            LifecycleState::Connected => 2,
            LifecycleState::Disconnecting => 3,
            LifecycleState::Reconnecting => 4,
            LifecycleState::Error(_) => Self::ERROR_CODE,
        }
    }

    /// Decode an engine code. [`Self::ERROR_CODE`] yields an error without a reason.
    pub fn from_code(code: i32) -> Result<Self, BridgeError> {
        match code {
            0 => Ok(LifecycleState::Disconnected),
            1 => Ok(LifecycleState::Connecting),
            2 => Ok(LifecycleState::Connected),
            3 => Ok(LifecycleState::Disconnecting),
            4 => Ok(LifecycleState::Reconnecting),
            Self::ERROR_CODE => Ok(LifecycleState::Error(String::new())),
            other => Err(BridgeError::UnknownStateCode(other)),
        }
    }

    /// Check if VPN is usable
    pub fn is_connected(&self) -> bool {
        matches!(self, LifecycleState::Connected)
    }

    /// Check if VPN is between stable states
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            LifecycleState::Connecting | LifecycleState::Disconnecting | LifecycleState::Reconnecting
        )
    }

    /// Check if VPN is in a failure state
    pub fn is_error(&self) -> bool {
        matches!(self, LifecycleState::Error(_))
    }

    /// Failure reason, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            LifecycleState::Error(reason) if !reason.is_empty() => Some(reason.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Disconnected => write!(f, "disconnected"),
            LifecycleState::Connecting => write!(f, "connecting"),
            LifecycleState::Connected => write!(f, "connected"),
            LifecycleState::Disconnecting => write!(f, "disconnecting"),
            LifecycleState::Reconnecting => write!(f, "reconnecting"),
            LifecycleState::Error(reason) if reason.is_empty() => write!(f, "error"),
            LifecycleState::Error(reason) => write!(f, "error ({reason})"),
        }
    }
}

/// Last-known lifecycle state plus change notification.
#[derive(Clone)]
pub struct StateCell {
    broadcaster: Broadcaster<LifecycleState>,
}

impl StateCell {
    /// Create a cell holding [`LifecycleState::Disconnected`].
    pub fn new(context: DeliveryContext) -> Self {
        Self {
            broadcaster: Broadcaster::new("state", LifecycleState::default(), context),
        }
    }

    /// Latest state.
    pub fn current(&self) -> LifecycleState {
        self.broadcaster.current()
    }

    /// Set the state. Publishes only if it differs from the current one.
    ///
    /// Returns true if the state changed.
    pub fn apply(&self, state: LifecycleState) -> bool {
        let label = state.to_string();
        let changed = self.broadcaster.publish_if_changed(state);
        if changed {
            info!("VPN state -> {}", label);
        } else {
            debug!("VPN state unchanged ({})", label);
        }
        changed
    }

    /// Decode and apply an engine state code.
    pub fn apply_code(&self, code: i32) -> Result<bool, BridgeError> {
        match LifecycleState::from_code(code) {
            Ok(state) => Ok(self.apply(state)),
            Err(e) => {
                warn!("Ignoring state report: {}", e);
                Err(e)
            }
        }
    }

    /// Attach the state subscriber; it first receives the current state.
    pub fn subscribe<S: Subscriber<LifecycleState>>(&self, subscriber: S) -> SubscriptionId {
        self.broadcaster.subscribe(subscriber)
    }

    /// Detach the state subscriber.
    pub fn unsubscribe(&self) -> bool {
        self.broadcaster.unsubscribe()
    }

    /// Is a state subscriber attached?
    pub fn is_subscribed(&self) -> bool {
        self.broadcaster.is_subscribed()
    }
}
