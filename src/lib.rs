//! Device discovery core for an IoT mesh runtime
//!
//! Finds peer nodes and third-party devices on the local network, tracks
//! their liveness and notifies subscribers when devices of interest appear
//! or disappear. Also keeps a classified inventory of the host's own
//! network interfaces, used to build the self-description advertised to
//! the mesh.
//!
//! # Overview
//!
//! - [`discovery::DiscoveryCoordinator`]: device registry, expiration,
//!   subscription dispatch, scan orchestration and plugin registration
//! - [`network::InterfaceInventory`]: address enumeration, topology polling,
//!   private-address classification, free-port allocation
//! - [`heartbeat::HeartbeatTimer`]: the shared tick source both run on
//!
//! Scanners and discovery services are plugins implementing
//! [`discovery::Scanner`] and [`discovery::DiscoveryService`]; the
//! coordinator itself does not speak any discovery protocol.

pub mod config;
pub mod discovery;
pub mod error;
pub mod heartbeat;
pub mod logging;
pub mod network;
pub mod observers;

// Re-export main types for convenience
pub use config::{DiscoveryConfig, SettingsStore};
pub use discovery::{DeviceRecord, DiscoveryCoordinator, DiscoveryHandle, PeerFound};
pub use error::{DiscoveryError, Result};
pub use heartbeat::HeartbeatTimer;
pub use network::{InterfaceInventory, InterfaceRecord};
