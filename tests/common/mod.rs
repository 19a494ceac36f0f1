//! Common test utilities
//!
//! Fixed interface sources, in-memory scanner/service plugins and a
//! WireMock-backed mesh peer.

#![allow(dead_code)]

pub mod mock_peer;
pub mod mock_plugins;

pub use mock_peer::MockPeer;
pub use mock_plugins::{MockScanner, MockService};

use mesh_discovery::discovery::{
    Clock, DeviceRecord, DiscoveryCoordinator, HostState, ScopeResolver, MESH_ENGINE_ST,
};
use mesh_discovery::error::Result;
use mesh_discovery::network::{InterfaceInventory, InterfaceSource, RawInterface};
use mesh_discovery::DiscoveryConfig;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Interface source whose address list tests can change
#[derive(Clone, Default)]
pub struct FixedInterfaces {
    entries: Arc<Mutex<Vec<RawInterface>>>,
}

impl FixedInterfaces {
    pub fn new(addresses: &[(&str, u8)]) -> Self {
        let source = Self::default();
        for (address, prefix) in addresses {
            source.add(address, *prefix);
        }
        source
    }

    pub fn add(&self, address: &str, prefix: u8) {
        let mut entries = self.entries.lock();
        let index = entries.len() as u32 + 1;
        entries.push(RawInterface {
            name: format!("eth{}", index - 1),
            index,
            address: address.parse::<IpAddr>().expect("test address"),
            prefix,
            mac_address: format!("02:00:00:00:00:{index:02x}"),
        });
    }

    pub fn remove(&self, address: &str) {
        let address: IpAddr = address.parse().expect("test address");
        self.entries.lock().retain(|e| e.address != address);
    }
}

impl InterfaceSource for FixedInterfaces {
    fn interfaces(&self) -> Result<Vec<RawInterface>> {
        Ok(self.entries.lock().clone())
    }
}

/// Inventory over a fixed LAN address
pub fn lan_inventory() -> Arc<InterfaceInventory> {
    Arc::new(InterfaceInventory::with_source(Box::new(FixedInterfaces::new(&[(
        "192.168.1.10",
        24,
    )]))))
}

/// Coordinator with its own host flag and a fixed inventory
pub fn test_coordinator(config: DiscoveryConfig) -> DiscoveryCoordinator {
    DiscoveryCoordinator::builder(config)
        .inventory(lan_inventory())
        .host_state(HostState::new())
        .build()
}

/// Coordinator on a caller-supplied clock
pub fn test_coordinator_with_clock(
    config: DiscoveryConfig,
    clock: Arc<dyn Clock>,
) -> DiscoveryCoordinator {
    DiscoveryCoordinator::builder(config)
        .inventory(lan_inventory())
        .host_state(HostState::new())
        .clock(clock)
        .build()
}

/// Coordinator with a scope resolver
pub fn scoped_coordinator(
    config: DiscoveryConfig,
    scope: Arc<dyn ScopeResolver>,
) -> DiscoveryCoordinator {
    DiscoveryCoordinator::builder(config)
        .inventory(lan_inventory())
        .host_state(HostState::new())
        .scope(scope)
        .build()
}

/// Plain third-party device
pub fn device(id: &str, st: &str) -> DeviceRecord {
    DeviceRecord::new(
        format!("uuid:{id}::{st}"),
        st,
        format!("http://192.168.1.{}/description.xml", 100 + id.len()),
    )
}

/// Mesh engine node running the default application
pub fn mesh_node(id: &str, host: &str) -> DeviceRecord {
    DeviceRecord::new(
        format!("uuid:{id}::{MESH_ENGINE_ST}"),
        MESH_ENGINE_ST,
        format!("http://{host}:8080/description.json"),
    )
    .with_friendly_name(format!("{id}:gateway;storage"))
    .with_model_name("mesh-engine")
    .with_mesh_urls(
        Some(format!("http://{host}:8080/")),
        Some(format!("ws://{host}:8081/")),
    )
}

/// Wait for `condition` to hold, polling every few milliseconds
pub async fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
