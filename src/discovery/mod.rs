//! Device discovery
//!
//! The coordinator merges sightings reported by scanner and service plugins
//! into an expiring device cache and dispatches them to pattern
//! subscriptions and compatible-peer observers.

pub mod clock;
pub mod coordinator;
pub mod device_cache;
pub mod host;
pub mod pattern;
pub mod plugin;
pub mod record;
pub mod registration;
pub mod scope;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{
    CoordinatorState, CoordinatorStats, DeviceCallback, DiscoveryCoordinator,
    DiscoveryCoordinatorBuilder, DiscoveryHandle, PeerFound,
};
pub use device_cache::{DeviceCache, DeviceCacheConfig, DeviceCacheStats, UpsertOutcome};
pub use host::HostState;
pub use pattern::{matches, MatchField, SubscriptionPattern};
pub use plugin::{DeviceLostCallback, DiscoveryService, Scanner};
pub use record::{usn_group, websocket_url, DeviceRecord, MESH_ENGINE_ST};
pub use registration::{RegistrationClient, RegistrationOutcome};
pub use scope::{NoScope, ScopeResolver, StaticScope};
