//! Bridge errors.

/// Errors surfaced by the bridge.
///
/// Delivery itself never fails: publishing without a subscriber, stale
/// handles and declined consent are outcomes, not errors.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Unknown lifecycle state code: {0}")]
    UnknownStateCode(i32),

    #[error("A start request is already awaiting consent")]
    ConsentPending,

    #[error("Consent prompt unavailable: {0}")]
    ConsentUnavailable(String),

    #[error("Failed to spawn delivery thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
