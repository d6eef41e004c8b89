//! Field validation for server and routing-profile requests
//!
//! Every offending field is reported, not just the first one.

use crate::model::{AddRoutingProfileRequest, AddServerRequest, RoutingProfile, Server};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Request field that failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    ServerName,
    IpAddress,
    Domain,
    Login,
    Password,
    DnsServers,
    RoutingProfile,
    ProfileName,
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldName::ServerName => "server_name",
            FieldName::IpAddress => "ip_address",
            FieldName::Domain => "domain",
            FieldName::Login => "login",
            FieldName::Password => "password",
            FieldName::DnsServers => "dns_servers",
            FieldName::RoutingProfile => "routing_profile",
            FieldName::ProfileName => "profile_name",
        };
        f.write_str(name)
    }
}

/// Why a field failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorCode {
    WrongValue,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: FieldName,
    pub code: FieldErrorCode,
}

/// Rejected request, with every offending field
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, thiserror::Error)]
#[error("Invalid fields: {}", describe(.fields))]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    /// Was `field` rejected with `code`?
    pub fn has(&self, field: FieldName, code: FieldErrorCode) -> bool {
        self.fields.iter().any(|e| e.field == field && e.code == code)
    }

    fn push(&mut self, field: FieldName, code: FieldErrorCode) {
        self.fields.push(FieldError { field, code });
    }

    fn into_result(self) -> Result<(), ValidationError> {
        if self.fields.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn describe(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|e| match e.code {
            FieldErrorCode::WrongValue => format!("{} (wrong value)", e.field),
            FieldErrorCode::AlreadyExists => format!("{} (already exists)", e.field),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validate server fields against the existing servers and profiles.
///
/// `editing` is the id of the server being updated; its own name does not
/// count as a duplicate.
pub fn validate_server(
    request: &AddServerRequest,
    editing: Option<u64>,
    servers: &[Server],
    profiles: &[RoutingProfile],
) -> Result<(), ValidationError> {
    let mut errors = ValidationError::default();
    let name = request.name.trim();

    if name.is_empty() {
        errors.push(FieldName::ServerName, FieldErrorCode::WrongValue);
    } else if servers
        .iter()
        .any(|s| Some(s.id) != editing && s.name.trim() == name)
    {
        errors.push(FieldName::ServerName, FieldErrorCode::AlreadyExists);
    }

    if request.ip_address.trim().parse::<IpAddr>().is_err() {
        errors.push(FieldName::IpAddress, FieldErrorCode::WrongValue);
    }
    if request.domain.trim().is_empty() {
        errors.push(FieldName::Domain, FieldErrorCode::WrongValue);
    }
    if request.login.trim().is_empty() {
        errors.push(FieldName::Login, FieldErrorCode::WrongValue);
    }
    if request.password.is_empty() {
        errors.push(FieldName::Password, FieldErrorCode::WrongValue);
    }
    if request.dns_servers.is_empty() || !request.dns_servers.iter().all(|d| is_dns_upstream(d)) {
        errors.push(FieldName::DnsServers, FieldErrorCode::WrongValue);
    }
    if !profiles.iter().any(|p| p.id == request.routing_profile_id) {
        errors.push(FieldName::RoutingProfile, FieldErrorCode::WrongValue);
    }

    errors.into_result()
}

/// Validate routing profile fields against the existing profiles.
pub fn validate_profile(
    request: &AddRoutingProfileRequest,
    editing: Option<u64>,
    profiles: &[RoutingProfile],
) -> Result<(), ValidationError> {
    let mut errors = ValidationError::default();
    let name = request.name.trim();

    if name.is_empty() {
        errors.push(FieldName::ProfileName, FieldErrorCode::WrongValue);
    } else if profiles
        .iter()
        .any(|p| Some(p.id) != editing && p.name.trim() == name)
    {
        errors.push(FieldName::ProfileName, FieldErrorCode::AlreadyExists);
    }

    errors.into_result()
}

/// Plain IP, `ip:port`, or a `scheme://host` upstream (DoH, DoT, DoQ)
fn is_dns_upstream(entry: &str) -> bool {
    let entry = entry.trim();
    if entry.parse::<IpAddr>().is_ok() || entry.parse::<SocketAddr>().is_ok() {
        return true;
    }
    match entry.split_once("://") {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && scheme.chars().all(|c| c.is_ascii_alphanumeric())
                && !rest.is_empty()
                && !rest.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RoutingMode, VpnProtocol};

    fn profiles() -> Vec<RoutingProfile> {
        vec![RoutingProfile {
            id: 1,
            name: "Default".to_string(),
            default_mode: RoutingMode::Vpn,
            bypass_rules: Vec::new(),
            vpn_rules: Vec::new(),
        }]
    }

    fn request(name: &str) -> AddServerRequest {
        AddServerRequest {
            name: name.to_string(),
            ip_address: "192.168.1.100".to_string(),
            domain: "vpn1.example.com".to_string(),
            login: "user1".to_string(),
            password: "password1".to_string(),
            dns_servers: vec!["8.8.8.8".to_string(), "tls://1.1.1.1".to_string()],
            protocol: VpnProtocol::Quic,
            routing_profile_id: 1,
        }
    }

    #[test]
    fn test_valid_server() {
        assert!(validate_server(&request("Frankfurt"), None, &[], &profiles()).is_ok());
    }

    #[test]
    fn test_all_bad_fields_reported() {
        let bad = AddServerRequest {
            name: " ".to_string(),
            ip_address: "300.1.1.1".to_string(),
            domain: String::new(),
            login: String::new(),
            password: String::new(),
            dns_servers: Vec::new(),
            protocol: VpnProtocol::Http2,
            routing_profile_id: 9,
        };

        let err = validate_server(&bad, None, &[], &profiles()).unwrap_err();
        assert_eq!(err.fields.len(), 7);
        assert!(err.has(FieldName::ServerName, FieldErrorCode::WrongValue));
        assert!(err.has(FieldName::IpAddress, FieldErrorCode::WrongValue));
        assert!(err.has(FieldName::RoutingProfile, FieldErrorCode::WrongValue));
        assert!(err.to_string().starts_with("Invalid fields: server_name (wrong value)"));
    }

    #[test]
    fn test_duplicate_name() {
        let existing = vec![request("Frankfurt").into_server(1)];

        let err = validate_server(&request("Frankfurt"), None, &existing, &profiles()).unwrap_err();
        assert_eq!(
            err.fields,
            vec![FieldError {
                field: FieldName::ServerName,
                code: FieldErrorCode::AlreadyExists,
            }]
        );

        // Renaming a server to its own name is fine
        assert!(validate_server(&request("Frankfurt"), Some(1), &existing, &profiles()).is_ok());
    }

    #[test]
    fn test_dns_upstreams() {
        assert!(is_dns_upstream("9.9.9.9"));
        assert!(is_dns_upstream("[2001:db8::1]:53"));
        assert!(is_dns_upstream("https://dns.example/dns-query"));
        assert!(!is_dns_upstream("dns.example"));
        assert!(!is_dns_upstream("://x"));

        let mut bad = request("Tokyo");
        bad.dns_servers.push("nonsense".to_string());
        let err = validate_server(&bad, None, &[], &profiles()).unwrap_err();
        assert!(err.has(FieldName::DnsServers, FieldErrorCode::WrongValue));
    }

    #[test]
    fn test_profile_name_rules() {
        let empty = AddRoutingProfileRequest::default();
        assert!(validate_profile(&empty, None, &profiles())
            .unwrap_err()
            .has(FieldName::ProfileName, FieldErrorCode::WrongValue));

        let duplicate = AddRoutingProfileRequest {
            name: "Default".to_string(),
            ..AddRoutingProfileRequest::default()
        };
        assert!(validate_profile(&duplicate, None, &profiles())
            .unwrap_err()
            .has(FieldName::ProfileName, FieldErrorCode::AlreadyExists));
        assert!(validate_profile(&duplicate, Some(1), &profiles()).is_ok());
    }
}
