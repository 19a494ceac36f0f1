//! Local network interface inventory
//!
//! Keeps a table of the host's IPv4 unicast addresses, classified for
//! scoping decisions. The table only grows during normal operation: a
//! re-poll exists to pick up new interfaces, never to retire old ones.
//! Addresses that vanish from the host are reported through the
//! interface-lost observers but stay in the table.

use super::classify::{
    is_link_local, is_private_ipv4, is_routable_mask, mask_bytes, masked, same_network,
};
use super::reachability::ReachabilityMonitor;
use crate::error::{DiscoveryError, Result};
use crate::heartbeat::HeartbeatTimer;
use crate::observers::ObserverList;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One classified local IPv4 address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceRecord {
    /// The address itself
    pub address: Ipv4Addr,

    /// Subnet mask bytes
    pub subnet_mask: [u8; 4],

    /// Raw address bytes
    pub address_bytes: [u8; 4],

    /// Address falls into a private range
    pub is_private: bool,

    /// Address may be published in name resolution (not loopback, not link-local)
    pub is_dns_eligible: bool,

    /// Loopback address
    pub is_loopback: bool,

    /// Index of the owning interface
    pub interface_index: u32,

    /// Name of the owning interface
    pub interface_name: String,

    /// MAC address of the owning interface (`aa:bb:cc:dd:ee:ff`)
    pub mac_address: String,
}

impl InterfaceRecord {
    /// Classify an address with its prefix length
    pub fn new(
        address: Ipv4Addr,
        prefix: u8,
        interface_index: u32,
        interface_name: impl Into<String>,
        mac_address: impl Into<String>,
    ) -> Self {
        let is_loopback = address.is_loopback();
        Self {
            address,
            subnet_mask: mask_bytes(prefix),
            address_bytes: address.octets(),
            is_private: is_private_ipv4(address),
            is_dns_eligible: !is_loopback && !is_link_local(address),
            is_loopback,
            interface_index,
            interface_name: interface_name.into(),
            mac_address: mac_address.into(),
        }
    }

    /// The loopback entry added on request
    pub fn loopback() -> Self {
        Self::new(Ipv4Addr::LOCALHOST, 8, 0, "lo", "00:00:00:00:00:00")
    }

    /// Network address (address AND mask)
    pub fn network(&self) -> [u8; 4] {
        masked(self.address_bytes, self.subnet_mask)
    }

    /// Whether `candidate` lies in this record's subnet
    pub fn contains(&self, candidate: Ipv4Addr) -> bool {
        same_network(self.address_bytes, candidate.octets(), self.subnet_mask)
    }
}

/// Address as reported by the operating system before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInterface {
    pub name: String,
    pub index: u32,
    pub address: IpAddr,
    pub prefix: u8,
    pub mac_address: String,
}

/// Source of the host's interface list
pub trait InterfaceSource: Send + Sync {
    /// Enumerate all addresses with their interface details
    fn interfaces(&self) -> Result<Vec<RawInterface>>;

    /// Enumerate bare addresses (used by the cheap re-poll)
    fn addresses(&self) -> Result<Vec<IpAddr>> {
        Ok(self.interfaces()?.into_iter().map(|i| i.address).collect())
    }
}

/// Interface enumeration through the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> Result<Vec<RawInterface>> {
        let networks = sysinfo::Networks::new_with_refreshed_list();

        let mut entries: Vec<_> = networks.list().iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut result = Vec::new();
        for (index, (name, data)) in entries.into_iter().enumerate() {
            let mac_address = data.mac_address().to_string();
            for network in data.ip_networks() {
                result.push(RawInterface {
                    name: name.clone(),
                    index: index as u32 + 1,
                    address: network.addr,
                    prefix: network.prefix,
                    mac_address: mac_address.clone(),
                });
            }
        }

        Ok(result)
    }
}

/// Outcome of one re-poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// DNS-eligible addresses that appeared since the last poll
    pub added: Vec<InterfaceRecord>,

    /// Tracked addresses no longer reported by the host
    pub lost: Vec<InterfaceRecord>,
}

static GLOBAL_INVENTORY: OnceCell<Arc<InterfaceInventory>> = OnceCell::new();

/// Classified table of local addresses with change notifications
pub struct InterfaceInventory {
    source: Box<dyn InterfaceSource>,
    table: RwLock<Vec<InterfaceRecord>>,
    include_loopback: AtomicBool,
    missing: Mutex<HashSet<Ipv4Addr>>,
    host_name: String,
    reachability: ReachabilityMonitor,
    new_interface: ObserverList<InterfaceRecord>,
    interface_lost: ObserverList<InterfaceRecord>,
}

impl InterfaceInventory {
    /// Create an empty inventory backed by the operating system
    pub fn new() -> Self {
        Self::with_source(Box::new(SystemInterfaces))
    }

    /// Create an empty inventory backed by a custom interface source
    pub fn with_source(source: Box<dyn InterfaceSource>) -> Self {
        let host_name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            source,
            table: RwLock::new(Vec::new()),
            include_loopback: AtomicBool::new(false),
            missing: Mutex::new(HashSet::new()),
            host_name,
            reachability: ReachabilityMonitor::default(),
            new_interface: ObserverList::new(),
            interface_lost: ObserverList::new(),
        }
    }

    /// Replace the reachability monitor (target, floor, pinger)
    pub fn with_reachability(mut self, monitor: ReachabilityMonitor) -> Self {
        self.reachability = monitor;
        self
    }

    /// Install the process-wide inventory; fails if one is already installed
    ///
    /// A single inventory per process is intentional: interface polling and
    /// the internet-access flag are host facts, not per-component state.
    pub fn install_global(inventory: Arc<InterfaceInventory>) -> Result<()> {
        GLOBAL_INVENTORY
            .set(inventory)
            .map_err(|_| DiscoveryError::config("global interface inventory already installed"))
    }

    /// The process-wide inventory, if one was installed
    pub fn global() -> Option<Arc<InterfaceInventory>> {
        GLOBAL_INVENTORY.get().cloned()
    }

    /// Register an observer for newly found DNS-eligible interfaces
    pub fn on_new_interface<F>(&self, id: impl Into<String>, observer: F) -> bool
    where
        F: Fn(&InterfaceRecord) + Send + Sync + 'static,
    {
        self.new_interface.add(id, observer)
    }

    /// Register an observer for interfaces that disappeared from the host
    pub fn on_interface_lost<F>(&self, id: impl Into<String>, observer: F) -> bool
    where
        F: Fn(&InterfaceRecord) + Send + Sync + 'static,
    {
        self.interface_lost.add(id, observer)
    }

    /// Remove an observer from both notification lists
    pub fn remove_observer(&self, id: &str) -> bool {
        let a = self.new_interface.remove(id);
        let b = self.interface_lost.remove(id);
        a || b
    }

    /// Enumerate the host's interfaces and add any address not yet tracked
    ///
    /// Returns whether the table changed. Existing entries are never
    /// replaced.
    pub fn refresh(&self, include_loopback: bool) -> bool {
        self.include_loopback.store(include_loopback, Ordering::SeqCst);

        let raw = match self.source.interfaces() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to enumerate network interfaces: {}", e);
                Vec::new()
            }
        };

        let mut table = self.table.write();
        let mut changed = false;

        for iface in raw {
            let IpAddr::V4(address) = iface.address else {
                continue;
            };
            let mask = mask_bytes(iface.prefix);
            if !is_routable_mask(mask) || address.is_unspecified() || address.is_multicast() {
                continue;
            }
            if address.is_loopback() && !include_loopback {
                continue;
            }
            if table.iter().any(|r| r.address == address) {
                continue;
            }

            let record = InterfaceRecord::new(
                address,
                iface.prefix,
                iface.index,
                iface.name,
                iface.mac_address,
            );
            debug!(
                "Tracking interface {} ({}) private={} dns={}",
                record.address, record.interface_name, record.is_private, record.is_dns_eligible
            );
            table.push(record);
            changed = true;
        }

        if include_loopback && !table.iter().any(|r| r.is_loopback) {
            table.push(InterfaceRecord::loopback());
            changed = true;
        }

        if changed {
            info!("Interface inventory now tracks {} address(es)", table.len());
        }
        changed
    }

    /// Re-enumerate the host's addresses and report topology changes
    ///
    /// A full [`refresh`](Self::refresh) only runs when an untracked IPv4
    /// address shows up. Observers are called synchronously from here.
    pub fn poll(&self) -> PollReport {
        let current: Vec<Ipv4Addr> = match self.source.addresses() {
            Ok(addresses) => addresses
                .into_iter()
                .filter_map(|a| match a {
                    IpAddr::V4(v4) => Some(v4),
                    IpAddr::V6(_) => None,
                })
                .collect(),
            Err(e) => {
                warn!("Interface poll failed: {}", e);
                return PollReport::default();
            }
        };

        let mut report = PollReport::default();

        let untracked: Vec<Ipv4Addr> = {
            let table = self.table.read();
            current
                .iter()
                .copied()
                .filter(|a| !table.iter().any(|r| r.address == *a))
                .collect()
        };

        if !untracked.is_empty() {
            self.refresh(self.include_loopback.load(Ordering::SeqCst));
            let table = self.table.read();
            report.added = untracked
                .iter()
                .filter_map(|a| table.iter().find(|r| r.address == *a))
                .filter(|r| r.is_dns_eligible)
                .cloned()
                .collect();
        }

        {
            let table = self.table.read();
            let mut missing = self.missing.lock();
            for record in table.iter() {
                // the synthetic loopback entry is not expected in the host list
                if record.is_loopback && record.interface_index == 0 {
                    continue;
                }
                if current.contains(&record.address) {
                    missing.remove(&record.address);
                } else if missing.insert(record.address) {
                    report.lost.push(record.clone());
                }
            }
        }

        for record in &report.added {
            info!("New network interface: {}", record.address);
            self.new_interface.notify(record);
        }
        for record in &report.lost {
            info!("Network interface lost: {}", record.address);
            self.interface_lost.notify(record);
        }

        report
    }

    /// Poll on the shared heartbeat every `every_ticks` ticks
    pub fn attach_to(self: &Arc<Self>, timer: &HeartbeatTimer, every_ticks: u64) -> bool {
        let every_ticks = every_ticks.max(1);
        let inventory = Arc::downgrade(self);
        timer.subscribe("interface-inventory", move |tick| {
            if tick % every_ticks != 0 {
                return;
            }
            if let Some(inventory) = inventory.upgrade() {
                inventory.poll();
            }
        })
    }

    /// Stop polling on the shared heartbeat
    pub fn detach_from(&self, timer: &HeartbeatTimer) -> bool {
        timer.unsubscribe("interface-inventory")
    }

    fn ensure_populated(&self) {
        if self.table.read().is_empty() {
            self.refresh(self.include_loopback.load(Ordering::SeqCst));
        }
    }

    /// Snapshot of the tracked table
    pub fn interfaces(&self) -> Vec<InterfaceRecord> {
        self.ensure_populated();
        self.table.read().clone()
    }

    /// Whether any tracked interface shares a subnet with `candidate`
    pub fn is_in_subnet(&self, candidate: Ipv4Addr) -> bool {
        self.ensure_populated();
        self.table.read().iter().any(|r| r.contains(candidate))
    }

    /// Whether `addr` falls into a private range
    pub fn is_private(&self, addr: IpAddr) -> bool {
        super::classify::is_private_ip(addr)
    }

    /// Whether `addr` is one of this host's tracked addresses
    pub fn is_local_address(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => {
                v4.is_loopback() || {
                    self.ensure_populated();
                    self.table.read().iter().any(|r| r.address == v4)
                }
            }
            IpAddr::V6(v6) => v6.is_loopback(),
        }
    }

    fn select(&self, must_be_external: bool) -> Option<InterfaceRecord> {
        self.ensure_populated();
        let table = self.table.read();
        let candidate = table
            .iter()
            .filter(|r| !r.is_loopback)
            .find(|r| !must_be_external || !r.is_private)
            .cloned();
        if candidate.is_some() || must_be_external {
            return candidate;
        }
        table.iter().find(|r| r.is_loopback).cloned()
    }

    /// First usable address; `must_be_external` skips private addresses
    pub fn get_address(&self, must_be_external: bool) -> Option<Ipv4Addr> {
        self.select(must_be_external).map(|r| r.address)
    }

    /// First address whose dotted form starts with `prefix`
    pub fn get_address_with_prefix(&self, prefix: &str) -> Option<Ipv4Addr> {
        self.ensure_populated();
        self.table
            .read()
            .iter()
            .find(|r| r.address.to_string().starts_with(prefix))
            .map(|r| r.address)
    }

    /// MAC address of the first usable interface
    pub fn get_mac_address(&self, must_be_external: bool) -> Option<String> {
        self.select(must_be_external).map(|r| r.mac_address)
    }

    /// Host name of this machine
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Address to advertise: the routed outbound address if tracked, else the first usable one
    pub fn advertised_address(&self) -> Option<Ipv4Addr> {
        let target = SocketAddr::new(IpAddr::V4(self.reachability.target()), 80);
        if let Ok(outbound) = outbound_address(target) {
            self.ensure_populated();
            if self.table.read().iter().any(|r| r.address == outbound) {
                return Some(outbound);
            }
        }
        self.get_address(false)
    }

    /// Check internet reachability (rate limited by the monitor's floor)
    pub async fn is_reachable_to_internet(&self) -> bool {
        self.reachability.check().await
    }

    /// Last known internet reachability
    pub fn has_internet_access(&self) -> bool {
        self.reachability.has_internet_access()
    }
}

impl Default for InterfaceInventory {
    fn default() -> Self {
        Self::new()
    }
}

/// Local address the OS would use to reach `target`
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub fn outbound_address(target: SocketAddr) -> Result<Ipv4Addr> {
    use socket2::{Domain, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.connect(&target.into())?;
    let local_addr = socket.local_addr()?;

    match local_addr.as_socket_ipv4() {
        Some(addr) => Ok(*addr.ip()),
        None => Err(DiscoveryError::network("Failed to get local IP address")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<RawInterface>);

    impl InterfaceSource for Fixed {
        fn interfaces(&self) -> Result<Vec<RawInterface>> {
            Ok(self.0.clone())
        }
    }

    fn raw(name: &str, addr: &str, prefix: u8) -> RawInterface {
        RawInterface {
            name: name.to_string(),
            index: 2,
            address: addr.parse().unwrap(),
            prefix,
            mac_address: "02:42:ac:11:00:02".to_string(),
        }
    }

    #[test]
    fn test_record_classification() {
        let record = InterfaceRecord::new("169.254.3.4".parse().unwrap(), 16, 3, "eth1", "");
        assert!(record.is_private);
        assert!(!record.is_dns_eligible);
        assert_eq!(record.subnet_mask, [255, 255, 0, 0]);
        assert_eq!(record.network(), [169, 254, 0, 0]);
    }

    #[test]
    fn test_refresh_skips_zero_masks_and_ipv6() {
        let inventory = InterfaceInventory::with_source(Box::new(Fixed(vec![
            raw("eth0", "192.168.1.20", 24),
            raw("tun0", "10.8.0.2", 0),
            raw("eth0", "fe80::1", 64),
        ])));

        assert!(inventory.refresh(false));
        let table = inventory.interfaces();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].address, Ipv4Addr::new(192, 168, 1, 20));
    }

    #[test]
    fn test_loopback_added_on_request() {
        let inventory =
            InterfaceInventory::with_source(Box::new(Fixed(vec![raw("eth0", "10.0.0.5", 8)])));

        assert!(inventory.refresh(true));
        assert!(inventory.interfaces().iter().any(|r| r.is_loopback));
        // nothing new the second time
        assert!(!inventory.refresh(true));
    }

    #[test]
    fn test_address_selection() {
        let inventory = InterfaceInventory::with_source(Box::new(Fixed(vec![
            raw("eth0", "192.168.1.20", 24),
            raw("eth1", "81.2.69.160", 24),
        ])));

        assert_eq!(inventory.get_address(false), Some(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(inventory.get_address(true), Some(Ipv4Addr::new(81, 2, 69, 160)));
        assert_eq!(
            inventory.get_address_with_prefix("81."),
            Some(Ipv4Addr::new(81, 2, 69, 160))
        );
        assert_eq!(
            inventory.get_mac_address(true).as_deref(),
            Some("02:42:ac:11:00:02")
        );
    }

    #[test]
    fn test_subnet_membership() {
        let inventory = InterfaceInventory::with_source(Box::new(Fixed(vec![raw(
            "eth0",
            "192.168.1.20",
            24,
        )])));

        assert!(inventory.is_in_subnet(Ipv4Addr::new(192, 168, 1, 99)));
        assert!(!inventory.is_in_subnet(Ipv4Addr::new(192, 168, 2, 99)));
    }

    #[test]
    fn test_only_loopback_falls_back_for_internal_queries() {
        let inventory = InterfaceInventory::with_source(Box::new(Fixed(vec![])));
        inventory.refresh(true);
        assert_eq!(inventory.get_address(false), Some(Ipv4Addr::LOCALHOST));
        assert_eq!(inventory.get_address(true), None);
    }
}
