//! Discovered device records
//!
//! A [`DeviceRecord`] describes one device or mesh peer as seen on the
//! network. Its unique service name (USN) is colon-delimited; the first two
//! segments (`uuid:<id>`) form the identity group that survives
//! rediscovery, while the remainder varies with the advertised service.

use crate::error::{DiscoveryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use url::Url;

/// Search target advertised by mesh engine nodes
pub const MESH_ENGINE_ST: &str = "urn:mesh-engine:device:node:1";

/// Identity group of a USN: its first two colon-delimited segments
///
/// ```
/// use mesh_discovery::discovery::usn_group;
/// assert_eq!(usn_group("uuid:1234::urn:schemas-upnp-org:device:basic:1"), "uuid:1234");
/// assert_eq!(usn_group("bare-id"), "bare-id");
/// ```
pub fn usn_group(usn: &str) -> String {
    let mut parts = usn.trim().splitn(3, ':');
    match (parts.next(), parts.next()) {
        (Some(first), Some(second)) => format!("{first}:{second}").to_lowercase(),
        (Some(first), None) => first.to_lowercase(),
        _ => String::new(),
    }
}

/// One discovered device or mesh peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceRecord {
    /// Unique service name; the first two segments are the stable identity
    pub usn: String,

    /// Search target (coarse type tag)
    pub st: String,

    /// Friendly name; mesh nodes append `:role1;role2` after the final colon
    pub friendly_name: String,

    pub manufacturer: String,
    pub model_name: String,
    pub model_number: String,
    pub serial_number: String,

    /// Device type / name attribute
    pub device_type: String,

    /// Description location URL
    pub location: String,

    /// Plain mesh connect URL
    pub mesh_url: Option<String>,

    /// Websocket mesh connect URL
    pub mesh_ws_url: Option<String>,

    /// Scope token the peer belongs to
    pub scope_context: Option<String>,

    /// The device is a mesh engine node
    pub is_mesh_engine_node: bool,

    /// Seconds the sighting stays valid (0 = use the configured default)
    pub max_age: u64,

    /// When the device was last sighted
    pub last_seen: DateTime<Utc>,

    /// Address the sighting came from
    pub source_ip: Option<IpAddr>,

    /// Opaque vendor data
    pub vendor_data: String,

    /// Owner ID of the plugin that reported the device
    pub source_plugin: Option<String>,
}

impl DeviceRecord {
    /// Create a record with the mandatory identity fields
    pub fn new(usn: impl Into<String>, st: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            usn: usn.into(),
            st: st.into(),
            location: location.into(),
            last_seen: Utc::now(),
            ..Default::default()
        }
    }

    pub fn with_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = name.into();
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }

    pub fn with_model_name(mut self, model: impl Into<String>) -> Self {
        self.model_name = model.into();
        self
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    pub fn with_vendor_data(mut self, data: impl Into<String>) -> Self {
        self.vendor_data = data.into();
        self
    }

    pub fn with_max_age(mut self, seconds: u64) -> Self {
        self.max_age = seconds;
        self
    }

    pub fn with_source_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }

    pub fn with_source_plugin(mut self, owner_id: impl Into<String>) -> Self {
        self.source_plugin = Some(owner_id.into());
        self
    }

    /// Mark as a mesh engine node with its connect URLs
    pub fn with_mesh_urls(mut self, url: Option<String>, ws_url: Option<String>) -> Self {
        self.is_mesh_engine_node = true;
        self.mesh_url = url;
        self.mesh_ws_url = ws_url;
        self
    }

    pub fn with_scope_context(mut self, token: impl Into<String>) -> Self {
        self.scope_context = Some(token.into());
        self
    }

    pub fn seen_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_seen = at;
        self
    }

    /// Identity group key
    pub fn identity_group(&self) -> String {
        usn_group(&self.usn)
    }

    /// Peer node ID: the second USN segment
    pub fn node_id(&self) -> Option<String> {
        self.usn
            .split(':')
            .nth(1)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    /// Age of the sighting at `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_seen
    }

    /// `now - last_seen < max_age`
    ///
    /// A max-age too large for a `chrono::Duration` never expires.
    pub fn is_alive_at(&self, now: DateTime<Utc>) -> bool {
        match i64::try_from(self.max_age)
            .ok()
            .and_then(chrono::Duration::try_seconds)
        {
            Some(ttl) => self.age_at(now) < ttl,
            None => true,
        }
    }

    /// Parse the location URL
    pub fn location_url(&self) -> Result<Url> {
        if self.location.trim().is_empty() {
            return Err(DiscoveryError::invalid_input(format!(
                "device {} has no location URL",
                self.usn
            )));
        }
        Ok(Url::parse(&self.location)?)
    }

    /// Roles advertised after the final colon of the friendly name
    pub fn roles(&self) -> Vec<String> {
        match self.friendly_name.rsplit_once(':') {
            Some((_, suffix)) => suffix
                .split(';')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Connect URL to use for this peer; the websocket URL wins
    pub fn preferred_connect_url(&self) -> Option<&str> {
        self.mesh_ws_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| self.mesh_url.as_deref().filter(|u| !u.is_empty()))
    }

    /// Whether full device details (manufacturer/model) are present
    pub fn has_device_details(&self) -> bool {
        !self.manufacturer.is_empty() || !self.model_name.is_empty()
    }

    /// Refresh the fields a re-sighting may change
    ///
    /// A mesh engine sighting carries the node's own description, so its
    /// descriptive fields replace the cached ones. Other sightings only
    /// fill fields that are still empty.
    pub fn refresh_from(&mut self, sighting: &DeviceRecord) {
        if sighting.is_mesh_engine_node {
            self.is_mesh_engine_node = true;
            replace_if_set(&mut self.friendly_name, &sighting.friendly_name);
            replace_if_set(&mut self.model_name, &sighting.model_name);
            if sighting.scope_context.as_deref().is_some_and(|t| !t.is_empty()) {
                self.scope_context = sighting.scope_context.clone();
            }
        } else {
            fill_if_empty(&mut self.friendly_name, &sighting.friendly_name);
            fill_if_empty(&mut self.model_name, &sighting.model_name);
        }
        fill_if_empty(&mut self.manufacturer, &sighting.manufacturer);
        fill_if_empty(&mut self.device_type, &sighting.device_type);
        if sighting.source_ip.is_some() {
            self.source_ip = sighting.source_ip;
        }
        if !sighting.location.is_empty() {
            self.location = sighting.location.clone();
        }
        if sighting.mesh_url.is_some() {
            self.mesh_url = sighting.mesh_url.clone();
        }
        if sighting.mesh_ws_url.is_some() {
            self.mesh_ws_url = sighting.mesh_ws_url.clone();
        }
        if sighting.max_age > 0 {
            self.max_age = sighting.max_age;
        }
        self.last_seen = sighting.last_seen;
    }
}

fn replace_if_set(field: &mut String, value: &str) {
    if !value.is_empty() {
        *field = value.to_string();
    }
}

fn fill_if_empty(field: &mut String, value: &str) {
    if field.is_empty() {
        field.push_str(value);
    }
}

/// Swap an HTTP scheme for its websocket counterpart and substitute the port
///
/// `http` becomes `ws`, `https` becomes `wss`. Other schemes are rejected.
pub fn websocket_url(base: &Url, ws_port: u16) -> Result<Url> {
    let scheme = match base.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(DiscoveryError::invalid_input(format!(
                "cannot derive websocket URL from scheme {other}"
            )))
        }
    };

    let mut ws = base.clone();
    ws.set_scheme(scheme)
        .map_err(|_| DiscoveryError::invalid_input("websocket scheme rejected"))?;
    ws.set_port(Some(ws_port))
        .map_err(|_| DiscoveryError::invalid_input("websocket port rejected"))?;
    Ok(ws)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_usn_group() {
        assert_eq!(usn_group("uuid:ABC::upnp:rootdevice"), "uuid:abc");
        assert_eq!(usn_group("uuid:ABC"), "uuid:abc");
        assert_eq!(usn_group(""), "");
    }

    #[test]
    fn test_same_device_different_services_share_group() {
        let a = DeviceRecord::new("uuid:42::upnp:rootdevice", "upnp:rootdevice", "http://a/");
        let b = DeviceRecord::new("uuid:42::urn:x:service:1", "urn:x:service:1", "http://a/");
        assert_eq!(a.identity_group(), b.identity_group());
        assert_eq!(a.node_id().as_deref(), Some("42"));
    }

    #[test]
    fn test_liveness_boundary() {
        let now = Utc::now();
        let record = DeviceRecord::new("uuid:1", "st", "http://x/")
            .with_max_age(5)
            .seen_at(now);
        assert!(record.is_alive_at(now + chrono::Duration::seconds(4)));
        assert!(!record.is_alive_at(now + chrono::Duration::seconds(5)));
    }

    #[test]
    fn test_huge_max_age_never_expires() {
        let now = Utc::now();
        for max_age in [10_000_000_000_000_000, u64::MAX] {
            let record = DeviceRecord::new("uuid:1", "st", "http://x/")
                .with_max_age(max_age)
                .seen_at(now);
            assert!(record.is_alive_at(now + chrono::Duration::days(365 * 100)));
        }
    }

    #[test]
    fn test_mesh_sighting_takes_over_root_record() {
        let mut root = DeviceRecord::new("uuid:n1::upnp:rootdevice", "upnp:rootdevice", "http://x/")
            .with_friendly_name("Router");
        let mesh = DeviceRecord::new(format!("uuid:n1::{MESH_ENGINE_ST}"), MESH_ENGINE_ST, "http://y/")
            .with_friendly_name("Hall:gateway")
            .with_model_name("mesh-engine")
            .with_scope_context("home")
            .with_mesh_urls(None, Some("ws://y:8081/".to_string()));

        root.refresh_from(&mesh);
        assert!(root.is_mesh_engine_node);
        assert_eq!(root.friendly_name, "Hall:gateway");
        assert_eq!(root.model_name, "mesh-engine");
        assert_eq!(root.scope_context.as_deref(), Some("home"));
        assert_eq!(root.usn, "uuid:n1::upnp:rootdevice");

        // a later plain sighting does not clobber the mesh description
        let plain = DeviceRecord::new("uuid:n1::upnp:rootdevice", "upnp:rootdevice", "http://y/")
            .with_friendly_name("Router");
        root.refresh_from(&plain);
        assert!(root.is_mesh_engine_node);
        assert_eq!(root.friendly_name, "Hall:gateway");
    }

    #[test]
    fn test_roles_from_friendly_name() {
        let record = DeviceRecord::new("uuid:1", "st", "http://x/")
            .with_friendly_name("Kitchen Node:gateway; logger;");
        assert_eq!(record.roles(), vec!["gateway", "logger"]);

        let plain = DeviceRecord::new("uuid:1", "st", "http://x/").with_friendly_name("Printer");
        assert!(plain.roles().is_empty());
    }

    #[test]
    fn test_preferred_connect_url() {
        let record = DeviceRecord::new("uuid:1", MESH_ENGINE_ST, "http://x/").with_mesh_urls(
            Some("http://10.0.0.2:8080".to_string()),
            Some("ws://10.0.0.2:8081".to_string()),
        );
        assert_eq!(record.preferred_connect_url(), Some("ws://10.0.0.2:8081"));

        let record = DeviceRecord::new("uuid:1", MESH_ENGINE_ST, "http://x/")
            .with_mesh_urls(Some("http://10.0.0.2:8080".to_string()), Some(String::new()));
        assert_eq!(record.preferred_connect_url(), Some("http://10.0.0.2:8080"));
    }

    #[test]
    fn test_websocket_url_swaps_scheme_and_port() {
        let http = Url::parse("http://10.0.0.2:8080/").unwrap();
        assert_eq!(websocket_url(&http, 8081).unwrap().as_str(), "ws://10.0.0.2:8081/");

        let https = Url::parse("https://node.local:443/mesh").unwrap();
        assert_eq!(
            websocket_url(&https, 9443).unwrap().as_str(),
            "wss://node.local:9443/mesh"
        );

        let ftp = Url::parse("ftp://node.local/").unwrap();
        assert!(websocket_url(&ftp, 1).is_err());
    }

    #[test]
    fn test_json_uses_camel_case() {
        let record = DeviceRecord::new("uuid:1", "st", "http://x/").with_friendly_name("Node");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["friendlyName"], "Node");
        assert_eq!(json["isMeshEngineNode"], false);
    }
}
