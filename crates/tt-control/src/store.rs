//! Control-plane store
//!
//! Servers, routing profiles, the selected server, excluded routes and the
//! query-log history. Persisted as TOML or JSON, chosen by file extension.

use crate::model::{
    AddRoutingProfileRequest, AddServerRequest, QueryLogEntry, RoutingMode, RoutingProfile,
    Server, UpdateRoutingProfileRequest, UpdateServerRequest,
};
use crate::render::EngineConfig;
use crate::validation::{self, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use tracing::{debug, info};
use tt_bridge::StartConfig;

/// Query-log entries kept by default
pub const DEFAULT_MAX_REQUESTS: usize = 1000;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Server not found: {0}")]
    ServerNotFound(u64),

    #[error("Routing profile not found: {0}")]
    ProfileNotFound(u64),

    #[error("Routing profile {0} is used by a server")]
    ProfileInUse(u64),

    #[error("No server selected")]
    NoSelectedServer,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Unsupported store format: {0}")]
    UnsupportedFormat(String),
}

/// Store file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, StoreError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "toml" => Ok(ConfigFormat::Toml),
            "json" => Ok(ConfigFormat::Json),
            other => Err(StoreError::UnsupportedFormat(other.to_string())),
        }
    }
}

fn default_max_requests() -> usize {
    DEFAULT_MAX_REQUESTS
}

/// Control-plane store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlStore {
    #[serde(default = "default_max_requests")]
    max_requests: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selected_server_id: Option<u64>,
    #[serde(default)]
    excluded_routes: Vec<String>,
    #[serde(default)]
    servers: Vec<Server>,
    #[serde(default)]
    routing_profiles: Vec<RoutingProfile>,
    #[serde(default)]
    requests: VecDeque<QueryLogEntry>,
}

impl Default for ControlStore {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            selected_server_id: None,
            excluded_routes: Vec::new(),
            servers: Vec::new(),
            routing_profiles: Vec::new(),
            requests: VecDeque::new(),
        }
    }
}

impl ControlStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with one default routing profile
    pub fn with_defaults() -> Self {
        let mut store = Self::new();
        store.routing_profiles.push(RoutingProfile {
            id: 1,
            name: "Default Profile".to_string(),
            default_mode: RoutingMode::Vpn,
            bypass_rules: vec!["192.168.1.0/24".to_string(), "10.0.0.0/8".to_string()],
            vpn_rules: Vec::new(),
        });
        store
    }

    // Servers

    pub fn all_servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn server(&self, id: u64) -> Result<&Server, StoreError> {
        self.servers
            .iter()
            .find(|s| s.id == id)
            .ok_or(StoreError::ServerNotFound(id))
    }

    /// Validate and add a server. Returns the stored server.
    pub fn add_server(&mut self, request: AddServerRequest) -> Result<Server, StoreError> {
        validation::validate_server(&request, None, &self.servers, &self.routing_profiles)?;

        let id = self.servers.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        let server = request.into_server(id);
        info!("Added server {} ({})", server.id, server.name);
        self.servers.push(server.clone());
        Ok(server)
    }

    /// Validate and replace a server's fields.
    pub fn update_server(&mut self, request: UpdateServerRequest) -> Result<Server, StoreError> {
        let UpdateServerRequest { id, fields } = request;
        let index = self
            .servers
            .iter()
            .position(|s| s.id == id)
            .ok_or(StoreError::ServerNotFound(id))?;
        validation::validate_server(&fields, Some(id), &self.servers, &self.routing_profiles)?;

        let server = fields.into_server(id);
        info!("Updated server {} ({})", server.id, server.name);
        self.servers[index] = server.clone();
        Ok(server)
    }

    /// Remove a server. Clears the selection if it pointed at it.
    pub fn remove_server(&mut self, id: u64) -> Result<(), StoreError> {
        let index = self
            .servers
            .iter()
            .position(|s| s.id == id)
            .ok_or(StoreError::ServerNotFound(id))?;
        let removed = self.servers.remove(index);

        if self.selected_server_id == Some(id) {
            debug!("Selected server {} removed, clearing selection", id);
            self.selected_server_id = None;
        }
        info!("Removed server {} ({})", removed.id, removed.name);
        Ok(())
    }

    pub fn selected_server_id(&self) -> Option<u64> {
        self.selected_server_id
    }

    /// Select an existing server.
    pub fn set_selected_server_id(&mut self, id: u64) -> Result<(), StoreError> {
        self.server(id)?;
        self.selected_server_id = Some(id);
        debug!("Selected server {}", id);
        Ok(())
    }

    pub fn selected_server(&self) -> Option<&Server> {
        let id = self.selected_server_id?;
        self.servers.iter().find(|s| s.id == id)
    }

    // Routing profiles

    pub fn all_routing_profiles(&self) -> &[RoutingProfile] {
        &self.routing_profiles
    }

    pub fn routing_profile(&self, id: u64) -> Result<&RoutingProfile, StoreError> {
        self.routing_profiles
            .iter()
            .find(|p| p.id == id)
            .ok_or(StoreError::ProfileNotFound(id))
    }

    pub fn add_routing_profile(
        &mut self,
        request: AddRoutingProfileRequest,
    ) -> Result<RoutingProfile, StoreError> {
        validation::validate_profile(&request, None, &self.routing_profiles)?;

        let id = self.routing_profiles.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        let profile = RoutingProfile {
            id,
            name: request.name,
            default_mode: request.default_mode,
            bypass_rules: request.bypass_rules,
            vpn_rules: request.vpn_rules,
        };
        info!("Added routing profile {} ({})", profile.id, profile.name);
        self.routing_profiles.push(profile.clone());
        Ok(profile)
    }

    pub fn update_routing_profile(
        &mut self,
        request: UpdateRoutingProfileRequest,
    ) -> Result<RoutingProfile, StoreError> {
        let UpdateRoutingProfileRequest { id, fields } = request;
        let index = self.profile_index(id)?;
        validation::validate_profile(&fields, Some(id), &self.routing_profiles)?;

        let profile = RoutingProfile {
            id,
            name: fields.name,
            default_mode: fields.default_mode,
            bypass_rules: fields.bypass_rules,
            vpn_rules: fields.vpn_rules,
        };
        self.routing_profiles[index] = profile.clone();
        Ok(profile)
    }

    /// Replace the rule list used for `mode` exceptions.
    pub fn set_rules(
        &mut self,
        id: u64,
        mode: RoutingMode,
        rules: Vec<String>,
    ) -> Result<(), StoreError> {
        let index = self.profile_index(id)?;
        let profile = &mut self.routing_profiles[index];
        let rules = clean_list(rules);

        debug!("Profile {}: {} {:?} rules", id, rules.len(), mode);
        match mode {
            RoutingMode::Bypass => profile.bypass_rules = rules,
            RoutingMode::Vpn => profile.vpn_rules = rules,
        }
        Ok(())
    }

    /// Drop every rule of a profile.
    pub fn clear_rules(&mut self, id: u64) -> Result<(), StoreError> {
        let index = self.profile_index(id)?;
        let profile = &mut self.routing_profiles[index];
        profile.bypass_rules.clear();
        profile.vpn_rules.clear();
        Ok(())
    }

    /// Remove a profile no server refers to.
    pub fn remove_routing_profile(&mut self, id: u64) -> Result<(), StoreError> {
        let index = self.profile_index(id)?;
        if self.servers.iter().any(|s| s.routing_profile_id == id) {
            return Err(StoreError::ProfileInUse(id));
        }

        let removed = self.routing_profiles.remove(index);
        info!("Removed routing profile {} ({})", removed.id, removed.name);
        Ok(())
    }

    fn profile_index(&self, id: u64) -> Result<usize, StoreError> {
        self.routing_profiles
            .iter()
            .position(|p| p.id == id)
            .ok_or(StoreError::ProfileNotFound(id))
    }

    // Excluded routes

    pub fn excluded_routes(&self) -> &[String] {
        &self.excluded_routes
    }

    /// Replace the excluded routes. Blank and repeated entries are dropped.
    pub fn set_excluded_routes(&mut self, routes: Vec<String>) {
        self.excluded_routes = clean_list(routes);
    }

    // Query log

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Change the history cap, dropping the oldest entries if needed.
    pub fn set_max_requests(&mut self, max: usize) {
        self.max_requests = max;
        self.enforce_request_cap();
    }

    /// Append a query-log entry, dropping the oldest past the cap.
    pub fn record_request(&mut self, entry: QueryLogEntry) {
        self.requests.push_back(entry);
        self.enforce_request_cap();
    }

    /// Query-log history, oldest first
    pub fn all_requests(&self) -> impl Iterator<Item = &QueryLogEntry> {
        self.requests.iter()
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    fn enforce_request_cap(&mut self) {
        let excess = self.requests.len().saturating_sub(self.max_requests);
        if excess > 0 {
            self.requests.drain(..excess);
        }
    }

    // Engine configuration

    /// Render the start request for the selected server.
    pub fn start_config(&self) -> Result<StartConfig, StoreError> {
        let server = self.selected_server().ok_or(StoreError::NoSelectedServer)?;
        let profile = self.routing_profile(server.routing_profile_id)?;
        let document = EngineConfig::new(server, profile, &self.excluded_routes).to_toml()?;

        Ok(StartConfig::new(server.name.clone(), document))
    }

    // Persistence

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, StoreError> {
        let store: Self = toml::from_str(content).map_err(|e| StoreError::Parse(e.to_string()))?;
        Ok(store.normalized())
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, StoreError> {
        let store: Self =
            serde_json::from_str(content).map_err(|e| StoreError::Parse(e.to_string()))?;
        Ok(store.normalized())
    }

    /// Export as TOML
    pub fn to_toml(&self) -> Result<String, StoreError> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Render(e.to_string()))
    }

    /// Export as JSON
    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(self).map_err(|e| StoreError::Render(e.to_string()))
    }

    /// Load from a `.toml` or `.json` file
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)?;
        let store = match format {
            ConfigFormat::Toml => Self::from_toml(&content)?,
            ConfigFormat::Json => Self::from_json(&content)?,
        };

        info!(
            "Loaded store from {} ({} servers, {} profiles)",
            path.display(),
            store.servers.len(),
            store.routing_profiles.len()
        );
        Ok(store)
    }

    /// Save to a `.toml` or `.json` file
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => self.to_toml()?,
            ConfigFormat::Json => self.to_json()?,
        };
        std::fs::write(path, content)?;
        debug!("Saved store to {}", path.display());
        Ok(())
    }

    fn normalized(mut self) -> Self {
        self.enforce_request_cap();
        self
    }
}

/// Trim entries, drop blanks and repeats. First occurrence wins.
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty() && seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VpnProtocol;
    use crate::validation::{FieldErrorCode, FieldName};
    use chrono::{TimeZone, Utc};

    fn request(name: &str) -> AddServerRequest {
        AddServerRequest {
            name: name.to_string(),
            ip_address: "192.168.1.100".to_string(),
            domain: "vpn1.example.com".to_string(),
            login: "user1".to_string(),
            password: "password1".to_string(),
            dns_servers: vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()],
            protocol: VpnProtocol::Quic,
            routing_profile_id: 1,
        }
    }

    fn entry(port: u16) -> QueryLogEntry {
        QueryLogEntry {
            timestamp: Utc.with_ymd_and_hms(2024, 8, 22, 12, 0, 0).unwrap(),
            protocol: "HTTPS".to_string(),
            decision: RoutingMode::Vpn,
            source_ip: "192.168.1.10".to_string(),
            destination_ip: "8.8.8.8".to_string(),
            source_port: port,
            destination_port: 443,
            domain: Some("google.com".to_string()),
        }
    }

    fn populated() -> ControlStore {
        let mut store = ControlStore::with_defaults();
        store.add_server(request("Frankfurt")).unwrap();
        store.add_server(request("Tokyo")).unwrap();
        store.set_selected_server_id(1).unwrap();
        store.set_excluded_routes(vec!["192.168.0.0/16".into(), " ".into()]);
        store.record_request(entry(54321));
        store
    }

    #[test]
    fn test_add_assigns_ids() {
        let store = populated();

        let ids: Vec<u64> = store.all_servers().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(store.server(2).unwrap().name, "Tokyo");
        assert!(matches!(store.server(7), Err(StoreError::ServerNotFound(7))));
    }

    #[test]
    fn test_add_rejects_duplicate_name() {
        let mut store = populated();

        match store.add_server(request("Tokyo")) {
            Err(StoreError::Validation(validation)) => {
                assert!(validation.has(FieldName::ServerName, FieldErrorCode::AlreadyExists));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(store.all_servers().len(), 2);
    }

    #[test]
    fn test_update_server() {
        let mut store = populated();
        let mut fields = request("Frankfurt");
        fields.protocol = VpnProtocol::Http2;

        let updated = store.update_server(UpdateServerRequest { id: 1, fields }).unwrap();
        assert_eq!(updated.protocol, VpnProtocol::Http2);
        assert_eq!(store.server(1).unwrap().protocol, VpnProtocol::Http2);

        let missing = UpdateServerRequest {
            id: 9,
            fields: request("Nowhere"),
        };
        assert!(matches!(
            store.update_server(missing),
            Err(StoreError::ServerNotFound(9))
        ));
    }

    #[test]
    fn test_remove_selected_server_clears_selection() {
        let mut store = populated();

        store.remove_server(2).unwrap();
        assert_eq!(store.selected_server_id(), Some(1));

        store.remove_server(1).unwrap();
        assert_eq!(store.selected_server_id(), None);
        assert!(matches!(store.start_config(), Err(StoreError::NoSelectedServer)));
        assert!(matches!(
            store.set_selected_server_id(1),
            Err(StoreError::ServerNotFound(1))
        ));
    }

    #[test]
    fn test_profile_in_use_cannot_be_removed() {
        let mut store = populated();

        assert!(matches!(
            store.remove_routing_profile(1),
            Err(StoreError::ProfileInUse(1))
        ));

        let work = store
            .add_routing_profile(AddRoutingProfileRequest {
                name: "Work Profile".to_string(),
                default_mode: RoutingMode::Bypass,
                ..AddRoutingProfileRequest::default()
            })
            .unwrap();
        assert_eq!(work.id, 2);
        store.remove_routing_profile(2).unwrap();
        assert_eq!(store.all_routing_profiles().len(), 1);
    }

    #[test]
    fn test_rules() {
        let mut store = populated();

        store
            .set_rules(1, RoutingMode::Vpn, vec!["social.com".into(), "".into()])
            .unwrap();
        assert_eq!(store.routing_profile(1).unwrap().vpn_rules, vec!["social.com"]);

        store.clear_rules(1).unwrap();
        let profile = store.routing_profile(1).unwrap();
        assert!(profile.vpn_rules.is_empty() && profile.bypass_rules.is_empty());
        assert!(matches!(
            store.clear_rules(5),
            Err(StoreError::ProfileNotFound(5))
        ));
    }

    #[test]
    fn test_excluded_routes_are_trimmed_and_deduplicated() {
        let mut store = ControlStore::new();

        store.set_excluded_routes(vec![
            " 10.0.0.0/8".into(),
            "192.168.0.0/16".into(),
            "10.0.0.0/8 ".into(),
            "".into(),
            "192.168.0.0/16".into(),
        ]);

        assert_eq!(
            store.excluded_routes(),
            ["10.0.0.0/8".to_string(), "192.168.0.0/16".to_string()]
        );
    }

    #[test]
    fn test_request_history_is_capped() {
        let mut store = ControlStore::new();
        store.set_max_requests(3);

        for port in 1..=5 {
            store.record_request(entry(port));
        }

        let ports: Vec<u16> = store.all_requests().map(|e| e.source_port).collect();
        assert_eq!(ports, vec![3, 4, 5]);

        store.set_max_requests(1);
        assert_eq!(store.request_count(), 1);
    }

    #[test]
    fn test_start_config_renders_selected_server() {
        let store = populated();

        let start = store.start_config().unwrap();
        assert_eq!(start.server_name, "Frankfurt");

        let document = EngineConfig::from_toml(&start.config).unwrap();
        assert_eq!(document.endpoint.hostname, "vpn1.example.com");
        assert_eq!(document.endpoint.addresses, vec!["192.168.1.100"]);
        assert_eq!(document.excluded_routes, vec!["192.168.0.0/16"]);
        assert_eq!(document.routing.default_mode, RoutingMode::Vpn);
        assert_eq!(document.decide("10.0.0.0/8"), RoutingMode::Bypass);
    }

    #[test]
    fn test_toml_and_json_export() {
        let store = populated();

        assert_eq!(ControlStore::from_toml(&store.to_toml().unwrap()).unwrap(), store);
        assert_eq!(ControlStore::from_json(&store.to_json().unwrap()).unwrap(), store);
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let store = ControlStore::from_toml("excluded_routes = [\"10.0.0.0/8\"]\n").unwrap();

        assert_eq!(store.max_requests(), DEFAULT_MAX_REQUESTS);
        assert!(store.all_servers().is_empty());
        assert_eq!(store.excluded_routes(), ["10.0.0.0/8".to_string()]);
    }

    #[test]
    fn test_save_and_load_by_extension() {
        let dir = std::env::temp_dir().join(format!("tt-control-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = populated();

        for name in ["store.toml", "store.json"] {
            let path = dir.join(name);
            store.save(&path).unwrap();
            assert_eq!(ControlStore::load(&path).unwrap(), store);
        }

        assert!(matches!(
            store.save(&dir.join("store.yaml")),
            Err(StoreError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            ControlStore::load(&dir.join("absent.toml")),
            Err(StoreError::Io(_))
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
