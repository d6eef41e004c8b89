//! Engine configuration document
//!
//! The engine receives its configuration as an opaque TOML string inside
//! [`StartConfig`](tt_bridge::StartConfig). This is its layout:
//!
//! ```toml
//! excluded_routes = ["192.168.0.0/16"]
//!
//! [endpoint]
//! hostname = "vpn1.example.com"
//! addresses = ["192.168.1.100"]
//! protocol = "quic"
//! username = "user1"
//! password = "password1"
//! dns_upstreams = ["8.8.8.8"]
//!
//! [routing]
//! default_mode = "vpn"
//! bypass_rules = []
//! vpn_rules = []
//! ```

use crate::model::{self, RoutingMode, RoutingProfile, Server, VpnProtocol};
use crate::store::StoreError;
use serde::{Deserialize, Serialize};

/// Engine configuration document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub excluded_routes: Vec<String>,
    pub endpoint: EndpointSection,
    pub routing: RoutingSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSection {
    pub hostname: String,
    pub addresses: Vec<String>,
    pub protocol: VpnProtocol,
    pub username: String,
    pub password: String,
    pub dns_upstreams: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSection {
    pub default_mode: RoutingMode,
    pub bypass_rules: Vec<String>,
    pub vpn_rules: Vec<String>,
}

impl EngineConfig {
    pub fn new(server: &Server, profile: &RoutingProfile, excluded_routes: &[String]) -> Self {
        Self {
            excluded_routes: excluded_routes.to_vec(),
            endpoint: EndpointSection {
                hostname: server.domain.clone(),
                addresses: vec![server.ip_address.clone()],
                protocol: server.protocol,
                username: server.login.clone(),
                password: server.password.clone(),
                dns_upstreams: server.dns_servers.clone(),
            },
            routing: RoutingSection {
                default_mode: profile.default_mode,
                bypass_rules: profile.bypass_rules.clone(),
                vpn_rules: profile.vpn_rules.clone(),
            },
        }
    }

    /// Parse a rendered document
    pub fn from_toml(content: &str) -> Result<Self, StoreError> {
        toml::from_str(content).map_err(|e| StoreError::Parse(e.to_string()))
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, StoreError> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Render(e.to_string()))
    }

    /// Routing decision for `host` under this document's rules
    pub fn decide(&self, host: &str) -> RoutingMode {
        model::decide(
            self.routing.default_mode,
            &self.routing.bypass_rules,
            &self.routing.vpn_rules,
            host,
        )
    }
}
