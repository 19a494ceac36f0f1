//! In-memory scanner and discovery-service plugins

use async_trait::async_trait;
use mesh_discovery::discovery::{
    DeviceLostCallback, DeviceRecord, DiscoveryHandle, DiscoveryService, Scanner,
};
use mesh_discovery::error::{DiscoveryError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Scanner that reports a fixed list of sightings on every sweep
pub struct MockScanner {
    id: String,
    fail: bool,
    sightings: Mutex<Vec<DeviceRecord>>,
    handle: Mutex<Option<DiscoveryHandle>>,
    lost: Mutex<Option<DeviceLostCallback>>,
    pub scans: AtomicUsize,
    pub targeted: Mutex<Vec<String>>,
    pub started: AtomicBool,
    pub stopped: AtomicBool,
}

impl MockScanner {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            fail: false,
            sightings: Mutex::new(Vec::new()),
            handle: Mutex::new(None),
            lost: Mutex::new(None),
            scans: AtomicUsize::new(0),
            targeted: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Every operation fails
    pub fn failing(id: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(id)
        }
    }

    pub fn with_sightings(self, sightings: Vec<DeviceRecord>) -> Self {
        *self.sightings.lock() = sightings;
        self
    }

    pub fn handle(&self) -> Option<DiscoveryHandle> {
        self.handle.lock().clone()
    }

    pub fn has_lost_callback(&self) -> bool {
        self.lost.lock().is_some()
    }

    /// Simulate a "byebye" announcement
    pub fn announce_lost(&self, usn: &str) {
        if let Some(callback) = self.lost.lock().clone() {
            callback(usn);
        }
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.fail {
            Err(DiscoveryError::plugin(&self.id, format!("{operation} failed")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Scanner for MockScanner {
    fn owner_id(&self) -> String {
        self.id.clone()
    }

    async fn start_scan(&self, handle: DiscoveryHandle) -> Result<()> {
        *self.handle.lock() = Some(handle);
        self.started.store(true, Ordering::SeqCst);
        self.check("start")
    }

    async fn stop_scan(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        self.check("stop")
    }

    async fn scan_for_devices(&self) -> Result<()> {
        self.check("scan")?;
        let handle = self.handle();
        let sightings = self.sightings.lock().clone();
        if let Some(handle) = handle {
            for sighting in sightings {
                handle.report_sighting(sighting, true).await;
            }
        }
        self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn scan_for_device(&self, uid: &str) -> Result<()> {
        self.targeted.lock().push(uid.to_string());
        self.check("targeted scan")
    }

    fn register_device_lost(&self, callback: DeviceLostCallback) {
        *self.lost.lock() = Some(callback);
    }

    fn unregister_device_lost(&self) {
        *self.lost.lock() = None;
    }
}

/// Discovery service that fills in manufacturer/model on request
pub struct MockService {
    id: String,
    fail: bool,
    pub advertisements: Mutex<Vec<DeviceRecord>>,
    pub scope_tokens: Mutex<Vec<Option<String>>>,
    pub detail_requests: AtomicUsize,
    pub started: AtomicBool,
    pub stopped: AtomicBool,
}

impl MockService {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            fail: false,
            advertisements: Mutex::new(Vec::new()),
            scope_tokens: Mutex::new(Vec::new()),
            detail_requests: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn failing(id: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(id)
        }
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.fail {
            Err(DiscoveryError::plugin(&self.id, format!("{operation} failed")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DiscoveryService for MockService {
    fn owner_id(&self) -> String {
        self.id.clone()
    }

    async fn start_service(&self, _handle: DiscoveryHandle) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        self.check("start")
    }

    async fn stop_service(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        self.check("stop")
    }

    async fn update_advertisement(&self, description: &DeviceRecord) -> Result<()> {
        self.advertisements.lock().push(description.clone());
        self.check("advertise")
    }

    async fn update_scope_token(&self, token: Option<&str>) -> Result<()> {
        self.scope_tokens.lock().push(token.map(str::to_string));
        self.check("scope update")
    }

    fn device_info(&self) -> Vec<u8> {
        br#"{"service":"mock"}"#.to_vec()
    }

    fn has_device_xml_info(&self) -> bool {
        false
    }

    async fn get_device_details(&self, record: DeviceRecord) -> Result<DeviceRecord> {
        self.detail_requests.fetch_add(1, Ordering::SeqCst);
        self.check("details")?;
        Ok(record
            .with_manufacturer("Acme")
            .with_model_name("Detailed 1"))
    }
}
