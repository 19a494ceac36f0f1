//! Host network interface inventory
//!
//! Address enumeration and classification, topology polling, free-port
//! allocation and internet reachability.

pub mod classify;
pub mod interfaces;
pub mod ports;
pub mod reachability;

// Re-export main types for convenience
pub use classify::{is_private_ip, is_private_ipv4};
pub use interfaces::{
    outbound_address, InterfaceInventory, InterfaceRecord, InterfaceSource, PollReport,
    RawInterface, SystemInterfaces,
};
pub use ports::allocate_free_port;
pub use reachability::{IcmpPinger, Pinger, ReachabilityMonitor};
