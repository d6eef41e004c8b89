//! Bridge configuration
//!
//! Loaded from TOML; every key is optional.
//!
//! ```toml
//! delivery_thread_name = "tt-delivery"
//! pending_policy = "reject"
//! log_level = "debug"
//! ```

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What to do with a second start request while consent is pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PendingPolicy {
    /// Replace the stashed request; the prompt already in flight answers for it
    #[default]
    LastWriteWins,
    /// Refuse the new request and keep the stashed one
    Reject,
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Name of the dedicated delivery thread
    pub delivery_thread_name: String,
    /// Start-while-pending policy
    pub pending_policy: PendingPolicy,
    /// Default log level for hosts that install a subscriber
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            delivery_thread_name: "tt-delivery".to_string(),
            pending_policy: PendingPolicy::LastWriteWins,
            log_level: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, BridgeError> {
        let config: Self =
            toml::from_str(content).map_err(|e| BridgeError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, BridgeError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Export as TOML
    pub fn to_toml(&self) -> Result<String, BridgeError> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::Parse(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.delivery_thread_name.trim().is_empty() {
            return Err(BridgeError::InvalidConfig(
                "delivery_thread_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}
