//! Configuration for the discovery core
//!
//! Settings are read once when the coordinator starts. They can come from
//! defaults, `MESH_*` environment variables, a TOML file, or the host's
//! generic key/value settings store through [`SettingsStore`].

use crate::error::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::{env, time::Duration};
use uuid::Uuid;

/// Settings key for the periodic scan interval (seconds)
pub const SCAN_INTERVAL_KEY: &str = "ScanInterval";

/// Settings key for the device record expiration time (seconds)
pub const EXPIRATION_TIME_KEY: &str = "ExpirationTime";

/// Default record expiration when neither the sighting nor the settings carry one
pub const DEFAULT_EXPIRATION_SECS: u64 = 3600;

/// Read-only view of the host's key/value settings store
pub trait SettingsStore: Send + Sync {
    /// Get the raw string value stored under `key`
    fn get(&self, key: &str) -> Option<String>;
}

impl SettingsStore for std::collections::HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        std::collections::HashMap::get(self, key).cloned()
    }
}

/// Discovery core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Heartbeat ticks between periodic scans (0 disables periodic scanning)
    pub scan_interval_secs: u64,

    /// TTL assigned to sightings that arrive without a max-age
    pub expiration_secs: u64,

    /// Cadence of the device cache expiration sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Period of the shared heartbeat timer
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// Heartbeat ticks between interface re-polls
    pub interface_poll_ticks: u64,

    /// Stable node identity (generated when absent)
    pub node_id: Option<Uuid>,

    /// Human readable station name (defaults to the host name)
    pub station_name: Option<String>,

    /// Application name advertised as the model name of this node
    pub application_name: String,

    /// Manufacturer advertised in the self-description
    pub manufacturer: String,

    /// Roles this node advertises to the mesh
    pub roles: Vec<String>,

    /// Port of the plain HTTP mesh endpoint
    pub http_port: u16,

    /// Port of the websocket mesh endpoint
    pub ws_port: u16,

    /// Advertise https/wss instead of http/ws
    pub use_tls: bool,

    /// Host runs sandboxed; discovery stays inert
    pub isolated: bool,

    /// Host requires external configuration before it may embed its scope token
    pub requires_external_config: bool,

    /// Automatically report compatible mesh peers for connection
    pub allow_auto_connect: bool,

    /// Accept peers that carry no scope token
    pub allow_unscoped_mesh: bool,

    /// Track the loopback interface in the interface inventory
    pub include_loopback: bool,

    /// Minimum time between two internet reachability checks
    #[serde(with = "humantime_serde")]
    pub reachability_floor: Duration,

    /// Well-known external address used for reachability checks
    pub reachability_target: Ipv4Addr,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 0,
            expiration_secs: DEFAULT_EXPIRATION_SECS,
            sweep_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
            interface_poll_ticks: 30,
            node_id: None,
            station_name: None,
            application_name: "mesh-engine".to_string(),
            manufacturer: "mesh-discovery".to_string(),
            roles: Vec::new(),
            http_port: 8080,
            ws_port: 8081,
            use_tls: false,
            isolated: false,
            requires_external_config: false,
            allow_auto_connect: true,
            allow_unscoped_mesh: false,
            include_loopback: false,
            reachability_floor: Duration::from_secs(60),
            reachability_target: Ipv4Addr::new(8, 8, 8, 8),
        }
    }
}

impl DiscoveryConfig {
    /// Create config from `MESH_*` environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u64>("MESH_SCAN_INTERVAL")? {
            config.scan_interval_secs = v;
        }
        if let Some(v) = env_parse::<u64>("MESH_EXPIRATION_TIME")? {
            config.expiration_secs = v;
        }
        if let Some(v) = env_parse::<Uuid>("MESH_NODE_ID")? {
            config.node_id = Some(v);
        }
        if let Ok(name) = env::var("MESH_STATION_NAME") {
            config.station_name = Some(name);
        }
        if let Ok(name) = env::var("MESH_APPLICATION_NAME") {
            config.application_name = name;
        }
        if let Ok(roles) = env::var("MESH_ROLES") {
            config.roles = roles
                .split(';')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = env_parse::<u16>("MESH_HTTP_PORT")? {
            config.http_port = v;
        }
        if let Some(v) = env_parse::<u16>("MESH_WS_PORT")? {
            config.ws_port = v;
        }
        if let Some(v) = env_parse::<bool>("MESH_ISOLATED")? {
            config.isolated = v;
        }
        if let Some(v) = env_parse::<bool>("MESH_ALLOW_UNSCOPED")? {
            config.allow_unscoped_mesh = v;
        }
        if let Some(v) = env_parse::<bool>("MESH_AUTO_CONNECT")? {
            config.allow_auto_connect = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Overlay the values held by the host's settings store
    ///
    /// Unparseable values are ignored with a warning so a bad entry in the
    /// store never prevents discovery from starting.
    pub fn with_settings(mut self, store: &dyn SettingsStore) -> Self {
        if let Some(raw) = store.get(SCAN_INTERVAL_KEY) {
            match raw.trim().parse() {
                Ok(v) => self.scan_interval_secs = v,
                Err(_) => tracing::warn!("Ignoring invalid {} setting: {}", SCAN_INTERVAL_KEY, raw),
            }
        }
        if let Some(raw) = store.get(EXPIRATION_TIME_KEY) {
            match raw.trim().parse::<u64>() {
                Ok(v) if v > 0 => self.expiration_secs = v,
                _ => tracing::warn!("Ignoring invalid {} setting: {}", EXPIRATION_TIME_KEY, raw),
            }
        }
        self
    }

    /// Check the configuration for values the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(DiscoveryError::config("heartbeat_interval must be non-zero"));
        }
        if self.sweep_interval.is_zero() {
            return Err(DiscoveryError::config("sweep_interval must be non-zero"));
        }
        if self.http_port == 0 || self.ws_port == 0 {
            return Err(DiscoveryError::config("mesh ports must be non-zero"));
        }
        if self.application_name.trim().is_empty() {
            return Err(DiscoveryError::config("application_name must not be empty"));
        }
        Ok(())
    }

    /// Record TTL applied to sightings without their own max-age
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }

    /// Station name, falling back to the host name
    pub fn station_name(&self) -> String {
        self.station_name.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string())
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DiscoveryError::config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = DiscoveryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.expiration_secs, 3600);
        assert_eq!(config.scan_interval_secs, 0);
        assert_eq!(config.interface_poll_ticks, 30);
    }

    #[test]
    fn test_toml_keeps_defaults_for_missing_keys() {
        let config = DiscoveryConfig::from_toml_str(
            r#"
            scan_interval_secs = 15
            sweep_interval = "2s"
            roles = ["gateway", "logger"]
            "#,
        )
        .unwrap();

        assert_eq!(config.scan_interval_secs, 15);
        assert_eq!(config.sweep_interval, Duration::from_secs(2));
        assert_eq!(config.roles, vec!["gateway", "logger"]);
        assert_eq!(config.expiration_secs, DEFAULT_EXPIRATION_SECS);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        assert!(DiscoveryConfig::from_toml_str("http_port = 0").is_err());
        assert!(DiscoveryConfig::from_toml_str("scan_interval_secs = \"soon\"").is_err());
    }

    #[test]
    fn test_settings_store_overlay() {
        let mut store = HashMap::new();
        store.insert(SCAN_INTERVAL_KEY.to_string(), "30".to_string());
        store.insert(EXPIRATION_TIME_KEY.to_string(), "0".to_string());

        let config = DiscoveryConfig::default().with_settings(&store);
        assert_eq!(config.scan_interval_secs, 30);
        // zero expiration is ignored
        assert_eq!(config.expiration_secs, DEFAULT_EXPIRATION_SECS);
    }

    #[test]
    fn test_station_name_falls_back_to_host_name() {
        let config = DiscoveryConfig {
            station_name: Some("kitchen".to_string()),
            ..Default::default()
        };
        assert_eq!(config.station_name(), "kitchen");
        assert!(!DiscoveryConfig::default().station_name().is_empty());
    }
}
