//! Discovery coordinator
//!
//! Owns the device cache, the scanner and service registries and the
//! subscription maps. Sightings from plugins are merged into the cache and
//! then dispatched, in this order:
//!
//! 1. cache update (merge by USN identity group),
//! 2. subscription dispatch (only for new or revived records),
//! 3. compatible-peer notification when the sighting is a mesh engine node.
//!
//! Ingestion admits at most one writer per identity group. Sightings for
//! different devices proceed concurrently. A group's admission gate is
//! dropped again once no sighting holds or waits on it.

use super::clock::{Clock, SystemClock};
use super::device_cache::{DeviceCache, DeviceCacheConfig, DeviceCacheStats, UpsertOutcome};
use super::host::HostState;
use super::pattern::SubscriptionPattern;
use super::plugin::{DeviceLostCallback, DiscoveryService, Scanner};
use super::record::{websocket_url, DeviceRecord, MESH_ENGINE_ST};
use super::registration::{RegistrationClient, RegistrationOutcome, DEFAULT_REGISTRATION_TIMEOUT};
use super::scope::{NoScope, ScopeResolver};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::heartbeat::HeartbeatTimer;
use crate::network::InterfaceInventory;
use crate::observers::ObserverList;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use url::{Host, Url};
use uuid::Uuid;

const OBSERVER_ID: &str = "discovery-coordinator";

/// Subscriber callback
pub type DeviceCallback = Arc<dyn Fn(&DeviceRecord) + Send + Sync>;

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorState {
    Stopped,
    Starting,
    Running,
}

/// A mesh peer this node may connect to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerFound {
    pub node_id: String,
    /// Websocket URL when advertised, plain URL otherwise
    pub connect_url: String,
    /// Scope-qualified roles
    pub roles: Vec<String>,
}

/// Diagnostic counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorStats {
    pub sightings_accepted: u64,
    pub sightings_rejected: u64,
    pub notifications: u64,
    pub lost_notifications: u64,
    pub peers_found: u64,
    pub scans_triggered: u64,
    pub scanners: usize,
    pub services: usize,
    pub subscriptions: usize,
    pub lost_subscriptions: usize,
    /// Identity groups with a sighting being merged or waiting
    pub admission_gates: usize,
    pub cache: DeviceCacheStats,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    notifications: AtomicU64,
    lost: AtomicU64,
    peers: AtomicU64,
    scans: AtomicU64,
}

#[derive(Clone)]
struct Subscription {
    pattern: SubscriptionPattern,
    callback: DeviceCallback,
    needs_details: bool,
}

struct Inner {
    config: DiscoveryConfig,
    node_id: Uuid,
    inventory: Arc<InterfaceInventory>,
    scope: Arc<dyn ScopeResolver>,
    host: Arc<HostState>,
    heartbeat: Option<Arc<HeartbeatTimer>>,
    cache: DeviceCache,
    state: Mutex<CoordinatorState>,
    shut_down: AtomicBool,
    self_description: RwLock<Option<DeviceRecord>>,
    scanners: DashMap<String, Arc<dyn Scanner>>,
    services: DashMap<String, Arc<dyn DiscoveryService>>,
    subscriptions: DashMap<String, Subscription>,
    lost_subscriptions: DashMap<String, Subscription>,
    admission: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    ready: ObserverList<bool>,
    peer_found: ObserverList<PeerFound>,
    counters: Counters,
}

/// Builder for [`DiscoveryCoordinator`]
pub struct DiscoveryCoordinatorBuilder {
    config: DiscoveryConfig,
    inventory: Option<Arc<InterfaceInventory>>,
    scope: Arc<dyn ScopeResolver>,
    host: Arc<HostState>,
    clock: Arc<dyn Clock>,
    heartbeat: Option<Arc<HeartbeatTimer>>,
}

impl DiscoveryCoordinatorBuilder {
    /// Interface inventory used for the self-description (defaults to the global one)
    pub fn inventory(mut self, inventory: Arc<InterfaceInventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn scope(mut self, scope: Arc<dyn ScopeResolver>) -> Self {
        self.scope = scope;
        self
    }

    /// Host lifecycle flag (defaults to the process-wide one)
    pub fn host_state(mut self, host: Arc<HostState>) -> Self {
        self.host = host;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Shared health timer driving the scan cadence
    pub fn heartbeat(mut self, timer: Arc<HeartbeatTimer>) -> Self {
        self.heartbeat = Some(timer);
        self
    }

    pub fn build(self) -> DiscoveryCoordinator {
        let inventory = self
            .inventory
            .or_else(InterfaceInventory::global)
            .unwrap_or_else(|| Arc::new(InterfaceInventory::new()));

        let cache = DeviceCache::with_clock(
            DeviceCacheConfig {
                default_max_age: self.config.expiration(),
                sweep_interval: self.config.sweep_interval,
            },
            self.clock,
        );

        let inner = Arc::new(Inner {
            node_id: self.config.node_id.unwrap_or_else(Uuid::new_v4),
            config: self.config,
            inventory,
            scope: self.scope,
            host: self.host,
            heartbeat: self.heartbeat,
            cache,
            state: Mutex::new(CoordinatorState::Stopped),
            shut_down: AtomicBool::new(false),
            self_description: RwLock::new(None),
            scanners: DashMap::new(),
            services: DashMap::new(),
            subscriptions: DashMap::new(),
            lost_subscriptions: DashMap::new(),
            admission: DashMap::new(),
            ready: ObserverList::new(),
            peer_found: ObserverList::new(),
            counters: Counters::default(),
        });

        let weak = Arc::downgrade(&inner);
        inner.cache.on_expired(OBSERVER_ID, move |record| {
            if let Some(inner) = weak.upgrade() {
                debug!("Device {} expired", record.usn);
                DiscoveryCoordinator { inner }.dispatch_lost(record);
            }
        });

        DiscoveryCoordinator { inner }
    }
}

/// Weak handle given to plugins
///
/// Plugins report through the handle without keeping the coordinator
/// alive; every call is a no-op once the coordinator is gone.
#[derive(Clone)]
pub struct DiscoveryHandle {
    inner: Weak<Inner>,
}

impl DiscoveryHandle {
    /// The coordinator, if it is still alive
    pub fn coordinator(&self) -> Option<DiscoveryCoordinator> {
        self.inner
            .upgrade()
            .map(|inner| DiscoveryCoordinator { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// See [`DiscoveryCoordinator::report_sighting`]
    pub async fn report_sighting(&self, record: DeviceRecord, force_update: bool) -> bool {
        match self.coordinator() {
            Some(coordinator) => coordinator.report_sighting(record, force_update).await,
            None => false,
        }
    }

    /// See [`DiscoveryCoordinator::handle_device_lost`]
    pub async fn device_lost(&self, usn: &str) -> bool {
        match self.coordinator() {
            Some(coordinator) => coordinator.handle_device_lost(usn).await,
            None => false,
        }
    }

    /// Callback form of [`DiscoveryHandle::device_lost`] for scanners
    pub fn device_lost_callback(&self) -> DeviceLostCallback {
        let handle = self.clone();
        Arc::new(move |usn: &str| {
            let handle = handle.clone();
            let usn = usn.to_string();
            spawn_detached(async move {
                handle.device_lost(&usn).await;
            });
        })
    }
}

impl fmt::Debug for DiscoveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Device discovery coordinator
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DiscoveryCoordinator {
    inner: Arc<Inner>,
}

impl DiscoveryCoordinator {
    pub fn builder(config: DiscoveryConfig) -> DiscoveryCoordinatorBuilder {
        DiscoveryCoordinatorBuilder {
            config,
            inventory: None,
            scope: Arc::new(NoScope),
            host: HostState::global(),
            clock: Arc::new(SystemClock),
            heartbeat: None,
        }
    }

    /// Coordinator with default collaborators
    pub fn new(config: DiscoveryConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn handle(&self) -> DiscoveryHandle {
        DiscoveryHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }

    pub fn node_id(&self) -> Uuid {
        self.inner.node_id
    }

    pub fn state(&self) -> CoordinatorState {
        *self.inner.state.lock()
    }

    pub fn inventory(&self) -> &Arc<InterfaceInventory> {
        &self.inner.inventory
    }

    fn is_shutting_down(&self) -> bool {
        self.inner.host.is_shutting_down()
    }

    // ---- lifecycle ----

    /// Start discovery
    ///
    /// No-op on an isolated host and when already started. A failure to
    /// build the self-description is logged; the coordinator still runs.
    pub async fn start(&self) {
        if self.is_shutting_down() {
            return;
        }
        if self.inner.config.isolated {
            info!("Isolated host, discovery stays inert");
            return;
        }

        {
            let mut state = self.inner.state.lock();
            if *state != CoordinatorState::Stopped {
                warn!("Discovery coordinator already started");
                return;
            }
            *state = CoordinatorState::Starting;
        }
        self.inner.shut_down.store(false, Ordering::SeqCst);

        self.inner.cache.start();

        match self.build_self_description() {
            Ok(description) => {
                debug!("Self-description: {} at {}", description.usn, description.location);
                *self.inner.self_description.write() = Some(description.clone());
                self.advertise(&description).await;
            }
            Err(e) => warn!("Could not build self-description: {}", e),
        }

        *self.inner.state.lock() = CoordinatorState::Running;
        info!("Discovery coordinator started as node {}", self.inner.node_id);
        self.inner.ready.notify(&true);

        if let Some(timer) = &self.inner.heartbeat {
            let weak = Arc::downgrade(&self.inner);
            timer.subscribe(OBSERVER_ID, move |tick| {
                if let Some(inner) = weak.upgrade() {
                    DiscoveryCoordinator { inner }.on_tick(*tick);
                }
            });
        }
    }

    /// Stop every plugin and fire `ready = false`; idempotent
    ///
    /// Plugins are unregistered and must be registered again after a restart.
    /// Ready observers only hear about the stop if the coordinator was started.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            debug!("Discovery coordinator already shut down");
            return;
        }
        let was_started = self.state() != CoordinatorState::Stopped;

        if let Some(timer) = &self.inner.heartbeat {
            timer.unsubscribe(OBSERVER_ID);
        }

        let scanner_ids = self.scanner_ids();
        join_all(scanner_ids.iter().map(|id| self.unregister_scanner(id))).await;
        let service_ids = self.service_ids();
        join_all(service_ids.iter().map(|id| self.unregister_service(id))).await;

        self.inner.cache.stop();
        if !was_started {
            debug!("Discovery coordinator was never started");
            return;
        }
        *self.inner.state.lock() = CoordinatorState::Stopped;
        info!("Discovery coordinator stopped");
        self.inner.ready.notify(&false);
    }

    /// Observe readiness changes (`true` after start, `false` after shutdown)
    pub fn on_ready<F>(&self, id: impl Into<String>, observer: F) -> bool
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.inner.ready.add(id, observer)
    }

    /// Observe compatible mesh peers
    pub fn on_peer_found<F>(&self, id: impl Into<String>, observer: F) -> bool
    where
        F: Fn(&PeerFound) + Send + Sync + 'static,
    {
        self.inner.peer_found.add(id, observer)
    }

    /// Remove a ready or peer-found observer
    pub fn remove_observer(&self, id: &str) -> bool {
        let ready = self.inner.ready.remove(id);
        let peer = self.inner.peer_found.remove(id);
        ready || peer
    }

    fn on_tick(&self, tick: u64) {
        let every = self.inner.config.scan_interval_secs;
        if every == 0 || tick % every != 0 {
            return;
        }
        self.trigger_scan();
    }

    // ---- plugins ----

    /// Register and start a scanner; `false` if its owner ID is taken
    pub async fn register_scanner(&self, scanner: Arc<dyn Scanner>) -> bool {
        if self.is_shutting_down() {
            return false;
        }

        let id = scanner.owner_id();
        match self.inner.scanners.entry(id.clone()) {
            Entry::Occupied(_) => {
                warn!("Scanner {} is already registered", id);
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(scanner.clone());
            }
        }

        scanner.register_device_lost(self.handle().device_lost_callback());
        if let Err(e) = scanner.start_scan(self.handle()).await {
            warn!("Scanner {} failed to start: {}", id, e);
        }

        info!("Registered scanner {}", id);
        true
    }

    /// Stop and remove a scanner
    pub async fn unregister_scanner(&self, owner_id: &str) -> bool {
        let Some((_, scanner)) = self.inner.scanners.remove(owner_id) else {
            return false;
        };

        scanner.unregister_device_lost();
        if let Err(e) = scanner.stop_scan().await {
            warn!("Scanner {} failed to stop: {}", owner_id, e);
        }

        info!("Unregistered scanner {}", owner_id);
        true
    }

    /// Register and start a discovery service; `false` if its owner ID is taken
    pub async fn register_service(&self, service: Arc<dyn DiscoveryService>) -> bool {
        if self.is_shutting_down() {
            return false;
        }

        let id = service.owner_id();
        match self.inner.services.entry(id.clone()) {
            Entry::Occupied(_) => {
                warn!("Discovery service {} is already registered", id);
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(service.clone());
            }
        }

        if let Err(e) = service.start_service(self.handle()).await {
            warn!("Discovery service {} failed to start: {}", id, e);
        }
        if let Some(description) = self.self_description() {
            if let Err(e) = service.update_advertisement(&description).await {
                warn!("Discovery service {} rejected the advertisement: {}", id, e);
            }
        }

        info!("Registered discovery service {}", id);
        true
    }

    /// Stop and remove a discovery service
    pub async fn unregister_service(&self, owner_id: &str) -> bool {
        let Some((_, service)) = self.inner.services.remove(owner_id) else {
            return false;
        };

        if let Err(e) = service.stop_service().await {
            warn!("Discovery service {} failed to stop: {}", owner_id, e);
        }

        info!("Unregistered discovery service {}", owner_id);
        true
    }

    pub fn scanner_ids(&self) -> Vec<String> {
        self.inner.scanners.iter().map(|e| e.key().clone()).collect()
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.inner.services.iter().map(|e| e.key().clone()).collect()
    }

    fn services(&self) -> Vec<Arc<dyn DiscoveryService>> {
        self.inner.services.iter().map(|e| e.value().clone()).collect()
    }

    // ---- scans ----

    /// Run every scanner's sweep in the background
    ///
    /// Returns the number of scans launched. No-op without scanners or with
    /// periodic scanning disabled.
    pub fn trigger_scan(&self) -> usize {
        if self.is_shutting_down() || self.inner.config.scan_interval_secs == 0 {
            return 0;
        }

        let scanners: Vec<Arc<dyn Scanner>> =
            self.inner.scanners.iter().map(|e| e.value().clone()).collect();

        let mut launched = 0;
        for scanner in scanners {
            let spawned = spawn_detached(async move {
                if let Err(e) = scanner.scan_for_devices().await {
                    warn!("Scanner {} failed to scan: {}", scanner.owner_id(), e);
                }
            });
            if spawned {
                launched += 1;
            }
        }

        if launched > 0 {
            self.inner.counters.scans.fetch_add(1, Ordering::Relaxed);
            debug!("Triggered scan on {} scanner(s)", launched);
        }
        launched
    }

    /// Ask every scanner to look for one device, in the background
    pub fn scan_for_specific_device(&self, uid: &str) -> usize {
        if self.is_shutting_down() {
            return 0;
        }

        let scanners: Vec<Arc<dyn Scanner>> =
            self.inner.scanners.iter().map(|e| e.value().clone()).collect();

        let mut launched = 0;
        for scanner in scanners {
            let uid = uid.to_string();
            let spawned = spawn_detached(async move {
                if let Err(e) = scanner.scan_for_device(&uid).await {
                    warn!("Scanner {} failed to scan for {}: {}", scanner.owner_id(), uid, e);
                }
            });
            if spawned {
                launched += 1;
            }
        }
        launched
    }

    // ---- subscriptions ----

    /// Subscribe to devices matching `pattern`
    ///
    /// Already cached matches are delivered before this returns. Returns
    /// `false` when the pattern is already subscribed.
    pub async fn subscribe<F>(&self, pattern: &str, callback: F) -> bool
    where
        F: Fn(&DeviceRecord) + Send + Sync + 'static,
    {
        self.add_subscription(pattern, Arc::new(callback), false).await
    }

    /// Like [`DiscoveryCoordinator::subscribe`], but sparse sightings are
    /// completed through the reporting service before delivery
    pub async fn subscribe_with_details<F>(&self, pattern: &str, callback: F) -> bool
    where
        F: Fn(&DeviceRecord) + Send + Sync + 'static,
    {
        self.add_subscription(pattern, Arc::new(callback), true).await
    }

    async fn add_subscription(
        &self,
        pattern: &str,
        callback: DeviceCallback,
        needs_details: bool,
    ) -> bool {
        if self.is_shutting_down() {
            return false;
        }

        let key = pattern.trim().to_string();
        let subscription = Subscription {
            pattern: SubscriptionPattern::parse(&key),
            callback,
            needs_details,
        };
        if let SubscriptionPattern::Unsupported(_) = subscription.pattern {
            warn!("Subscription pattern '{}' can never match", key);
        }

        match self.inner.subscriptions.entry(key.clone()) {
            Entry::Occupied(_) => {
                debug!("Subscription '{}' already registered", key);
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(subscription.clone());
            }
        }

        let cached = self
            .inner
            .cache
            .find_all(|record| subscription.pattern.matches(record))
            .await;
        for record in &cached {
            self.deliver(&subscription, record);
        }

        debug!("Subscribed '{}' ({} cached match(es))", key, cached.len());
        true
    }

    pub fn unsubscribe(&self, pattern: &str) -> bool {
        self.inner.subscriptions.remove(pattern.trim()).is_some()
    }

    /// Subscribe to losses of devices matching `pattern`
    pub fn subscribe_lost<F>(&self, pattern: &str, callback: F) -> bool
    where
        F: Fn(&DeviceRecord) + Send + Sync + 'static,
    {
        if self.is_shutting_down() {
            return false;
        }

        let key = pattern.trim().to_string();
        match self.inner.lost_subscriptions.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let pattern = SubscriptionPattern::parse(slot.key());
                slot.insert(Subscription {
                    pattern,
                    callback: Arc::new(callback),
                    needs_details: false,
                });
                true
            }
        }
    }

    pub fn unsubscribe_lost(&self, pattern: &str) -> bool {
        self.inner.lost_subscriptions.remove(pattern.trim()).is_some()
    }

    fn dispatch(&self, record: &DeviceRecord) {
        let matched: Vec<Subscription> = self
            .inner
            .subscriptions
            .iter()
            .filter(|e| e.value().pattern.matches(record))
            .map(|e| e.value().clone())
            .collect();

        for subscription in &matched {
            self.deliver(subscription, record);
        }
    }

    fn deliver(&self, subscription: &Subscription, record: &DeviceRecord) {
        self.inner.counters.notifications.fetch_add(1, Ordering::Relaxed);

        if !subscription.needs_details || record.has_device_details() {
            (subscription.callback)(record);
            return;
        }

        let service = record
            .source_plugin
            .as_deref()
            .and_then(|id| self.inner.services.get(id).map(|e| e.value().clone()));
        let Some(service) = service else {
            (subscription.callback)(record);
            return;
        };

        let callback = subscription.callback.clone();
        let sparse = record.clone();
        let spawned = spawn_detached(async move {
            match service.get_device_details(sparse.clone()).await {
                Ok(details) => callback(&details),
                Err(e) => {
                    warn!(
                        "Detail fetch for {} via {} failed: {}",
                        sparse.usn,
                        service.owner_id(),
                        e
                    );
                    callback(&sparse);
                }
            }
        });
        if !spawned {
            (subscription.callback)(record);
        }
    }

    fn dispatch_lost(&self, record: &DeviceRecord) {
        let matched: Vec<DeviceCallback> = self
            .inner
            .lost_subscriptions
            .iter()
            .filter(|e| e.value().pattern.matches(record))
            .map(|e| e.value().callback.clone())
            .collect();

        for callback in matched {
            self.inner.counters.lost.fetch_add(1, Ordering::Relaxed);
            callback(record);
        }
    }

    // ---- ingestion ----

    async fn admit(&self, group: &str, force_update: bool) -> Result<OwnedMutexGuard<()>> {
        let gate = self
            .inner
            .admission
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .value()
            .clone();

        if force_update {
            Ok(gate.lock_owned().await)
        } else {
            gate.try_lock_owned().map_err(|_| {
                DiscoveryError::discovery(format!("registration of {group} already in progress"))
            })
        }
    }

    /// Drop the gate of `group` unless another sighting holds or waits on it
    fn release(&self, group: &str) {
        // the map's own reference is the only one left when nobody else uses it
        self.inner
            .admission
            .remove_if(group, |_, gate| Arc::strong_count(gate) == 1);
    }

    fn reject(&self) -> bool {
        self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Merge one sighting and dispatch notifications
    ///
    /// Returns `false` when the host is shutting down, the sighting has no
    /// location or a malformed one, or another sighting of the same device
    /// is being merged and `force_update` is not set (the caller may retry).
    pub async fn report_sighting(&self, record: DeviceRecord, force_update: bool) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        if record.location.trim().is_empty() {
            warn!("Ignoring sighting {} without location", record.usn);
            return self.reject();
        }

        let group = record.identity_group();
        if group.is_empty() {
            warn!("Ignoring sighting without USN from {:?}", record.source_ip);
            return self.reject();
        }

        let guard = match self.admit(&group, force_update).await {
            Ok(guard) => guard,
            Err(e) => {
                debug!("Sighting rejected: {}", e);
                self.release(&group);
                return self.reject();
            }
        };

        let merged = self.merge(record, &group).await;
        drop(guard);
        self.release(&group);

        match merged {
            Ok(()) => true,
            Err(e) => {
                warn!("Sighting of {} abandoned: {}", group, e);
                self.reject()
            }
        }
    }

    async fn merge(&self, record: DeviceRecord, group: &str) -> Result<()> {
        let sighted_mesh_node = record.is_mesh_engine_node;
        let outcome = self.inner.cache.upsert(record).await?;
        self.inner.counters.accepted.fetch_add(1, Ordering::Relaxed);

        let Some(primary) = self.inner.cache.lookup(group).await else {
            return Ok(());
        };

        match outcome {
            UpsertOutcome::Refreshed => {
                debug!("Refreshed {}", primary.usn);
            }
            UpsertOutcome::Inserted | UpsertOutcome::Revived => {
                debug!("Discovered {} ({:?})", primary.usn, outcome);
                self.dispatch(&primary);
            }
        }

        // checked on the merged record so a mesh service announced after
        // its root device still carries the device's current location
        if sighted_mesh_node {
            self.notify_if_compatible(&primary);
        }
        Ok(())
    }

    /// Scanner "device lost" path: evict and notify lost subscribers
    pub async fn handle_device_lost(&self, usn: &str) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        match self.inner.cache.remove(usn).await {
            Some(record) => {
                info!("Device {} lost", record.usn);
                self.dispatch_lost(&record);
                true
            }
            None => false,
        }
    }

    /// Run one expiration sweep now; returns the number of evicted devices
    pub async fn sweep_expired(&self) -> usize {
        self.inner.cache.sweep_expired().await.len()
    }

    // ---- compatibility ----

    fn notify_if_compatible(&self, record: &DeviceRecord) {
        if let Some(peer) = self.compatible_peer(record) {
            self.inner.counters.peers.fetch_add(1, Ordering::Relaxed);
            info!("Compatible mesh peer {} at {}", peer.node_id, peer.connect_url);
            self.inner.peer_found.notify(&peer);
        }
    }

    /// Whether `record` is a mesh peer this node may auto-connect to
    pub fn compatible_peer(&self, record: &DeviceRecord) -> Option<PeerFound> {
        let config = &self.inner.config;
        if !record.is_mesh_engine_node || !config.allow_auto_connect {
            return None;
        }
        if !record.model_name.eq_ignore_ascii_case(&config.application_name) {
            debug!("Mesh node {} runs {}, not {}", record.usn, record.model_name, config.application_name);
            return None;
        }
        if self.is_self(record) {
            return None;
        }

        let in_scope = match record.scope_context.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => self.inner.scope.resolves_to_own_scope(token),
            None => config.allow_unscoped_mesh,
        };
        if !in_scope {
            debug!("Mesh node {} is outside this node's scope", record.usn);
            return None;
        }

        let advertised = [record.mesh_url.as_deref(), record.mesh_ws_url.as_deref()];
        for url in advertised.into_iter().flatten().filter(|u| !u.is_empty()) {
            match Url::parse(url) {
                Ok(url) if !is_loopback_host(&url) => {}
                _ => {
                    debug!("Mesh node {} advertises unusable URL {}", record.usn, url);
                    return None;
                }
            }
        }

        let connect_url = record.preferred_connect_url()?.to_string();
        let node_id = record.node_id()?;
        let roles = record
            .roles()
            .iter()
            .map(|role| self.inner.scope.qualify_role(role))
            .collect();

        Some(PeerFound {
            node_id,
            connect_url,
            roles,
        })
    }

    fn is_self(&self, record: &DeviceRecord) -> bool {
        let own_id = self.inner.node_id.to_string();
        if record
            .node_id()
            .is_some_and(|id| id.eq_ignore_ascii_case(&own_id))
        {
            return true;
        }

        let Ok(location) = record.location_url() else {
            return true;
        };
        if is_loopback_host(&location) {
            return true;
        }

        if let Some(own) = self.self_description() {
            if let Ok(own_location) = own.location_url() {
                if same_endpoint(&location, &own_location) {
                    return true;
                }
            }
        }

        let port = location.port_or_known_default();
        match location.host() {
            Some(Host::Ipv4(ip)) => {
                port == Some(self.inner.config.http_port)
                    && self.inner.inventory.is_local_address(IpAddr::V4(ip))
            }
            _ => false,
        }
    }

    // ---- self-description ----

    /// This node's advertised description; `None` before a successful start
    pub fn self_description(&self) -> Option<DeviceRecord> {
        self.inner.self_description.read().clone()
    }

    fn build_self_description(&self) -> Result<DeviceRecord> {
        let config = &self.inner.config;
        let address = self
            .inner
            .inventory
            .advertised_address()
            .ok_or_else(|| DiscoveryError::network("no local address to advertise"))?;

        let scheme = if config.use_tls { "https" } else { "http" };
        let base = Url::parse(&format!("{scheme}://{address}:{}/", config.http_port))?;
        let ws = websocket_url(&base, config.ws_port)?;

        let station = config.station_name();
        let friendly_name = if config.roles.is_empty() {
            station
        } else {
            format!("{station}:{}", config.roles.join(";"))
        };

        let mut description = DeviceRecord::new(
            format!("uuid:{}::{}", self.inner.node_id, MESH_ENGINE_ST),
            MESH_ENGINE_ST,
            base.join("description.json")?.to_string(),
        )
        .with_friendly_name(friendly_name)
        .with_manufacturer(config.manufacturer.as_str())
        .with_model_name(config.application_name.as_str())
        .with_device_type(MESH_ENGINE_ST)
        .with_mesh_urls(Some(base.to_string()), Some(ws.to_string()))
        .with_max_age(config.expiration_secs)
        .with_source_ip(IpAddr::V4(address));
        description.serial_number = self.inner.node_id.to_string();

        if !config.requires_external_config {
            description.scope_context = self.inner.scope.own_scope_token();
        }

        Ok(description)
    }

    async fn advertise(&self, description: &DeviceRecord) {
        for service in self.services() {
            if let Err(e) = service.update_advertisement(description).await {
                warn!(
                    "Discovery service {} rejected the advertisement: {}",
                    service.owner_id(),
                    e
                );
            }
        }
    }

    /// Replace the scope token and push it to every service
    pub async fn update_scope_token(&self, token: Option<String>) {
        if self.is_shutting_down() {
            return;
        }

        let updated = {
            let mut description = self.inner.self_description.write();
            description.as_mut().map(|d| {
                d.scope_context = if self.inner.config.requires_external_config {
                    None
                } else {
                    token.clone()
                };
                d.clone()
            })
        };

        for service in self.services() {
            if let Err(e) = service.update_scope_token(token.as_deref()).await {
                warn!(
                    "Discovery service {} rejected the scope token: {}",
                    service.owner_id(),
                    e
                );
            }
        }

        if let Some(description) = updated {
            self.advertise(&description).await;
        }
    }

    /// Post the self-description to `<target>/DEVICEREG.JSON` in the background
    ///
    /// Every outcome reaches `callback`; returns `false` if the request could
    /// not be sent at all, including when no async runtime is running (the
    /// callback has then already been invoked).
    pub fn register_with_peer<F>(&self, target: &str, callback: F) -> bool
    where
        F: FnOnce(RegistrationOutcome) + Send + 'static,
    {
        if self.is_shutting_down() {
            callback(RegistrationOutcome::Failed(
                DiscoveryError::ShuttingDown.to_string(),
            ));
            return false;
        }

        let Some(description) = self.self_description() else {
            callback(RegistrationOutcome::Failed(
                DiscoveryError::registration("no self-description, coordinator not started")
                    .to_string(),
            ));
            return false;
        };

        match RegistrationClient::new(DEFAULT_REGISTRATION_TIMEOUT) {
            Ok(client) => client.register_with_callback(target.to_string(), description, callback),
            Err(e) => {
                callback(RegistrationOutcome::Failed(e.to_string()));
                false
            }
        }
    }

    // ---- queries ----

    /// Every live device
    pub async fn devices(&self) -> Vec<DeviceRecord> {
        self.inner.cache.all().await
    }

    /// Live device for any USN of it
    pub async fn device(&self, usn: &str) -> Option<DeviceRecord> {
        self.inner.cache.lookup(usn).await
    }

    pub async fn find_device<P>(&self, predicate: P) -> Option<DeviceRecord>
    where
        P: Fn(&DeviceRecord) -> bool,
    {
        self.inner.cache.find(predicate).await
    }

    pub async fn find_devices<P>(&self, predicate: P) -> Vec<DeviceRecord>
    where
        P: Fn(&DeviceRecord) -> bool,
    {
        self.inner.cache.find_all(predicate).await
    }

    pub async fn stats(&self) -> CoordinatorStats {
        let counters = &self.inner.counters;
        CoordinatorStats {
            sightings_accepted: counters.accepted.load(Ordering::Relaxed),
            sightings_rejected: counters.rejected.load(Ordering::Relaxed),
            notifications: counters.notifications.load(Ordering::Relaxed),
            lost_notifications: counters.lost.load(Ordering::Relaxed),
            peers_found: counters.peers.load(Ordering::Relaxed),
            scans_triggered: counters.scans.load(Ordering::Relaxed),
            scanners: self.inner.scanners.len(),
            services: self.inner.services.len(),
            subscriptions: self.inner.subscriptions.len(),
            lost_subscriptions: self.inner.lost_subscriptions.len(),
            admission_gates: self.inner.admission.len(),
            cache: self.inner.cache.stats().await,
        }
    }
}

impl fmt::Debug for DiscoveryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryCoordinator")
            .field("node_id", &self.inner.node_id)
            .field("state", &self.state())
            .field("scanners", &self.inner.scanners.len())
            .field("services", &self.inner.services.len())
            .field("subscriptions", &self.inner.subscriptions.len())
            .finish()
    }
}

/// Spawn onto the current runtime; `false` outside of one
fn spawn_detached<F>(task: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(task);
            true
        }
        Err(_) => {
            warn!("No async runtime available, background task dropped");
            false
        }
    }
}

fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        None => false,
    }
}

fn same_endpoint(a: &Url, b: &Url) -> bool {
    a.host() == b.host() && a.port_or_known_default() == b.port_or_known_default()
}
