//! Scanner and discovery-service capability contracts
//!
//! Both plugin kinds are implemented outside this crate (SSDP responders,
//! mDNS browsers, directory registrations...). The coordinator treats every
//! call into a plugin as fallible and isolates failures per plugin.

use super::coordinator::DiscoveryHandle;
use super::record::DeviceRecord;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Invoked by a scanner with the USN of a device that announced its departure
pub type DeviceLostCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Active network scanner
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Stable identifier of the entity owning this scanner
    fn owner_id(&self) -> String;

    /// Begin scanning; sightings are reported through `handle`
    async fn start_scan(&self, handle: DiscoveryHandle) -> Result<()>;

    async fn stop_scan(&self) -> Result<()>;

    /// One passive sweep
    async fn scan_for_devices(&self) -> Result<()>;

    /// Targeted scan for one device
    async fn scan_for_device(&self, uid: &str) -> Result<()>;

    /// Wire the "device lost" path
    fn register_device_lost(&self, callback: DeviceLostCallback);

    fn unregister_device_lost(&self);
}

/// Passive discovery service (responders, directory registrations)
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// Stable identifier of the entity owning this service
    fn owner_id(&self) -> String;

    async fn start_service(&self, handle: DiscoveryHandle) -> Result<()>;

    async fn stop_service(&self) -> Result<()>;

    /// Advertise a new self-description
    async fn update_advertisement(&self, description: &DeviceRecord) -> Result<()>;

    /// Push a new scope token (`None` clears it)
    async fn update_scope_token(&self, token: Option<&str>) -> Result<()>;

    /// Raw device information document served by this service
    fn device_info(&self) -> Vec<u8>;

    /// Whether [`DiscoveryService::device_info`] is an XML device description
    fn has_device_xml_info(&self) -> bool;

    /// Fetch full details (manufacturer, model...) for a sparse sighting
    async fn get_device_details(&self, record: DeviceRecord) -> Result<DeviceRecord>;
}
