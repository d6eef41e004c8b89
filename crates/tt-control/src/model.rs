//! Control-plane data model
//!
//! Servers, routing profiles and query-log entries as the host stores them.

use crate::store::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tt_bridge::DiagnosticRecord;

/// Tunnel transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnProtocol {
    #[default]
    Quic,
    Http2,
}

impl VpnProtocol {
    /// Wire code
    pub fn code(&self) -> i32 {
        match self {
            VpnProtocol::Quic => 0,
            VpnProtocol::Http2 => 1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(VpnProtocol::Quic),
            1 => Some(VpnProtocol::Http2),
            _ => None,
        }
    }
}

impl fmt::Display for VpnProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpnProtocol::Quic => write!(f, "quic"),
            VpnProtocol::Http2 => write!(f, "http2"),
        }
    }
}

/// Where matching traffic goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Through the tunnel
    #[default]
    Vpn,
    /// Around the tunnel
    Bypass,
}

impl RoutingMode {
    /// Wire code
    pub fn code(&self) -> i32 {
        match self {
            RoutingMode::Vpn => 0,
            RoutingMode::Bypass => 1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(RoutingMode::Vpn),
            1 => Some(RoutingMode::Bypass),
            _ => None,
        }
    }
}

/// A configured VPN endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: u64,
    /// Display name, unique across servers
    pub name: String,
    pub ip_address: String,
    pub domain: String,
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    #[serde(default)]
    pub protocol: VpnProtocol,
    pub routing_profile_id: u64,
}

/// Fields of a new server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddServerRequest {
    pub name: String,
    pub ip_address: String,
    pub domain: String,
    pub login: String,
    pub password: String,
    pub dns_servers: Vec<String>,
    pub protocol: VpnProtocol,
    pub routing_profile_id: u64,
}

impl AddServerRequest {
    pub(crate) fn into_server(self, id: u64) -> Server {
        Server {
            id,
            name: self.name,
            ip_address: self.ip_address,
            domain: self.domain,
            login: self.login,
            password: self.password,
            dns_servers: self.dns_servers,
            protocol: self.protocol,
            routing_profile_id: self.routing_profile_id,
        }
    }
}

/// Replacement fields for an existing server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateServerRequest {
    pub id: u64,
    #[serde(flatten)]
    pub fields: AddServerRequest,
}

/// Split/full tunneling rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingProfile {
    pub id: u64,
    /// Display name, unique across profiles
    pub name: String,
    #[serde(default)]
    pub default_mode: RoutingMode,
    /// Exceptions routed around the tunnel when the default is [`RoutingMode::Vpn`]
    #[serde(default)]
    pub bypass_rules: Vec<String>,
    /// Exceptions routed through the tunnel when the default is [`RoutingMode::Bypass`]
    #[serde(default)]
    pub vpn_rules: Vec<String>,
}

impl RoutingProfile {
    /// Decide where traffic for `host` goes.
    ///
    /// Rules are `*` (anything), `*.suffix` (the suffix and its subdomains)
    /// or an exact host.
    pub fn decide(&self, host: &str) -> RoutingMode {
        decide(self.default_mode, &self.bypass_rules, &self.vpn_rules, host)
    }
}

pub(crate) fn decide(
    default_mode: RoutingMode,
    bypass_rules: &[String],
    vpn_rules: &[String],
    host: &str,
) -> RoutingMode {
    let (exceptions, other) = match default_mode {
        RoutingMode::Vpn => (bypass_rules, RoutingMode::Bypass),
        RoutingMode::Bypass => (vpn_rules, RoutingMode::Vpn),
    };

    if exceptions.iter().any(|rule| rule_matches(rule, host)) {
        other
    } else {
        default_mode
    }
}

fn rule_matches(rule: &str, host: &str) -> bool {
    let rule = rule.trim();
    if rule == "*" {
        return true;
    }
    match rule.strip_prefix("*.") {
        Some(suffix) => {
            host.eq_ignore_ascii_case(suffix)
                || host
                    .len()
                    .checked_sub(suffix.len() + 1)
                    .is_some_and(|dot| {
                        host.as_bytes()[dot] == b'.' && host[dot + 1..].eq_ignore_ascii_case(suffix)
                    })
        }
        None => host.eq_ignore_ascii_case(rule),
    }
}

/// Fields of a new routing profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRoutingProfileRequest {
    pub name: String,
    pub default_mode: RoutingMode,
    pub bypass_rules: Vec<String>,
    pub vpn_rules: Vec<String>,
}

/// Replacement fields for an existing routing profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRoutingProfileRequest {
    pub id: u64,
    #[serde(flatten)]
    pub fields: AddRoutingProfileRequest,
}

/// One routed connection, as reported in the engine's query log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    /// Serialized as RFC 3339
    pub timestamp: DateTime<Utc>,
    /// Application protocol (e.g. "HTTPS")
    pub protocol: String,
    pub decision: RoutingMode,
    pub source_ip: String,
    pub destination_ip: String,
    pub source_port: u16,
    pub destination_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl QueryLogEntry {
    /// Decode the JSON payload of a diagnostic record.
    pub fn from_record(record: &DiagnosticRecord) -> Result<Self, StoreError> {
        serde_json::from_str(record.text()).map_err(|e| StoreError::Parse(e.to_string()))
    }

    /// Encode as a diagnostic record payload.
    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string(self).map_err(|e| StoreError::Parse(e.to_string()))
    }
}
