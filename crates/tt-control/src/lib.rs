//! tt-control - VPN control-plane store
//!
//! Keeps what the host application manages around the tunnel: servers,
//! routing profiles, the selected server, excluded routes and the
//! query-log history decoded from the engine's diagnostic records.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut store = ControlStore::load(Path::new("vpn.toml"))?;
//! store.set_selected_server_id(1)?;
//! manager.start(store.start_config()?)?;
//! ```

mod model;
mod render;
mod store;
mod validation;

pub use model::{
    AddRoutingProfileRequest, AddServerRequest, QueryLogEntry, RoutingMode, RoutingProfile,
    Server, UpdateRoutingProfileRequest, UpdateServerRequest, VpnProtocol,
};
pub use render::{EndpointSection, EngineConfig, RoutingSection};
pub use store::{ConfigFormat, ControlStore, StoreError, DEFAULT_MAX_REQUESTS};
pub use validation::{
    validate_profile, validate_server, FieldError, FieldErrorCode, FieldName, ValidationError,
};
