//! Expiring device registry
//!
//! Records are keyed by their USN identity group, so every sighting of one
//! device (whatever service it advertised) lands in the same slot. Each
//! record carries its own max-age; a background sweep evicts records whose
//! age has reached it and reports them to the expiration observers.

use super::clock::{Clock, SystemClock};
use super::record::{usn_group, DeviceRecord};
use crate::error::{DiscoveryError, Result};
use crate::observers::ObserverList;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCacheConfig {
    /// Max-age assigned to sightings that carry none
    pub default_max_age: Duration,

    /// Expiration sweep cadence
    pub sweep_interval: Duration,
}

impl Default for DeviceCacheConfig {
    fn default() -> Self {
        Self {
            default_max_age: Duration::from_secs(crate::config::DEFAULT_EXPIRATION_SECS),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// What an upsert did to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed for the identity group
    Inserted,
    /// A live record was refreshed in place
    Refreshed,
    /// A stale record was refreshed in place, keeping its identity
    Revived,
}

impl UpsertOutcome {
    /// The group had no record at all before this sighting
    pub fn is_new(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted)
    }
}

/// Cache counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceCacheStats {
    pub total_entries: usize,
    pub inserted: u64,
    pub refreshed: u64,
    pub revived: u64,
    pub removed: u64,
    pub expired: u64,
    pub rejected: u64,
}

struct Shared {
    records: RwLock<HashMap<String, DeviceRecord>>,
    stats: RwLock<DeviceCacheStats>,
    on_expired: ObserverList<DeviceRecord>,
    clock: Arc<dyn Clock>,
}

impl Shared {
    async fn sweep(&self) -> Vec<DeviceRecord> {
        let now = self.clock.now();
        let mut records = self.records.write().await;

        // Liveness is evaluated under the write lock, so a concurrent
        // refresh either lands before this check or after the eviction.
        let expired_keys: Vec<String> = records
            .iter()
            .filter(|(_, record)| !record.is_alive_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        let mut expired = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(record) = records.get(&key) {
                self.on_expired.notify(record);
            }
            if let Some(record) = records.remove(&key) {
                expired.push(record);
            }
        }

        if !expired.is_empty() {
            let mut stats = self.stats.write().await;
            stats.expired += expired.len() as u64;
            stats.total_entries = records.len();
            debug!("Expiration sweep evicted {} device(s)", expired.len());
        }

        expired
    }
}

/// Keyed, expiring store of discovered devices
pub struct DeviceCache {
    config: DeviceCacheConfig,
    shared: Arc<Shared>,
    shutdown_sender: parking_lot::Mutex<Option<mpsc::UnboundedSender<()>>>,
}

impl DeviceCache {
    /// Create a cache on the wall clock
    pub fn new(config: DeviceCacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache on a custom clock
    pub fn with_clock(config: DeviceCacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                records: RwLock::new(HashMap::new()),
                stats: RwLock::new(DeviceCacheStats::default()),
                on_expired: ObserverList::new(),
                clock,
            }),
            shutdown_sender: parking_lot::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DeviceCacheConfig {
        &self.config
    }

    /// Current time on the cache's clock
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.shared.clock.now()
    }

    /// Register an expiration observer
    ///
    /// Observers run during the sweep while the record is still cached and
    /// the cache is write-locked, so they must not call back into the cache.
    pub fn on_expired<F>(&self, id: impl Into<String>, observer: F) -> bool
    where
        F: Fn(&DeviceRecord) + Send + Sync + 'static,
    {
        self.shared.on_expired.add(id, observer)
    }

    pub fn remove_expiration_observer(&self, id: &str) -> bool {
        self.shared.on_expired.remove(id)
    }

    /// Merge a sighting into the cache
    ///
    /// The sighting is stamped with the cache clock. A malformed location URL
    /// or an empty USN rejects the sighting without touching the cache.
    pub async fn upsert(&self, mut sighting: DeviceRecord) -> Result<UpsertOutcome> {
        if let Err(e) = self.validate(&sighting) {
            self.shared.stats.write().await.rejected += 1;
            return Err(e);
        }

        let key = usn_group(&sighting.usn);
        let now = self.shared.clock.now();
        sighting.last_seen = now;
        if sighting.max_age == 0 {
            sighting.max_age = self.config.default_max_age.as_secs();
        }

        let outcome = {
            let mut records = self.shared.records.write().await;
            let outcome = match records.get_mut(&key) {
                Some(existing) => {
                    let alive = existing.is_alive_at(now);
                    existing.refresh_from(&sighting);
                    if alive {
                        UpsertOutcome::Refreshed
                    } else {
                        UpsertOutcome::Revived
                    }
                }
                None => {
                    records.insert(key.clone(), sighting);
                    UpsertOutcome::Inserted
                }
            };

            let mut stats = self.shared.stats.write().await;
            match outcome {
                UpsertOutcome::Inserted => stats.inserted += 1,
                UpsertOutcome::Refreshed => stats.refreshed += 1,
                UpsertOutcome::Revived => stats.revived += 1,
            }
            stats.total_entries = records.len();
            outcome
        };

        debug!("Cache upsert for {}: {:?}", key, outcome);
        Ok(outcome)
    }

    fn validate(&self, sighting: &DeviceRecord) -> Result<()> {
        if usn_group(&sighting.usn).is_empty() {
            warn!("Rejecting sighting without USN");
            return Err(DiscoveryError::invalid_input("sighting has an empty USN"));
        }
        if let Err(e) = sighting.location_url() {
            warn!(
                "Rejecting sighting {} with bad location '{}': {}",
                sighting.usn, sighting.location, e
            );
            return Err(e);
        }
        Ok(())
    }

    /// Live record for any USN of the device
    pub async fn lookup(&self, usn: &str) -> Option<DeviceRecord> {
        let now = self.shared.clock.now();
        self.shared
            .records
            .read()
            .await
            .get(&usn_group(usn))
            .filter(|record| record.is_alive_at(now))
            .cloned()
    }

    /// First live record satisfying `predicate`
    pub async fn find<P>(&self, predicate: P) -> Option<DeviceRecord>
    where
        P: Fn(&DeviceRecord) -> bool,
    {
        let now = self.shared.clock.now();
        self.shared
            .records
            .read()
            .await
            .values()
            .find(|record| record.is_alive_at(now) && predicate(record))
            .cloned()
    }

    /// Every live record satisfying `predicate`
    pub async fn find_all<P>(&self, predicate: P) -> Vec<DeviceRecord>
    where
        P: Fn(&DeviceRecord) -> bool,
    {
        let now = self.shared.clock.now();
        self.shared
            .records
            .read()
            .await
            .values()
            .filter(|record| record.is_alive_at(now) && predicate(record))
            .cloned()
            .collect()
    }

    /// Every live record
    pub async fn all(&self) -> Vec<DeviceRecord> {
        self.find_all(|_| true).await
    }

    /// Number of held records, live or not yet swept
    pub async fn len(&self) -> usize {
        self.shared.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Explicit eviction; does not notify expiration observers
    pub async fn remove(&self, usn: &str) -> Option<DeviceRecord> {
        let mut records = self.shared.records.write().await;
        let removed = records.remove(&usn_group(usn));
        if removed.is_some() {
            let mut stats = self.shared.stats.write().await;
            stats.removed += 1;
            stats.total_entries = records.len();
        }
        removed
    }

    /// Evict every record whose age reached its max-age
    pub async fn sweep_expired(&self) -> Vec<DeviceRecord> {
        self.shared.sweep().await
    }

    /// Drop every record without notifying
    pub async fn clear(&self) -> usize {
        let mut records = self.shared.records.write().await;
        let count = records.len();
        records.clear();
        self.shared.stats.write().await.total_entries = 0;
        count
    }

    pub async fn stats(&self) -> DeviceCacheStats {
        let mut stats = self.shared.stats.read().await.clone();
        stats.total_entries = self.shared.records.read().await.len();
        stats
    }

    /// Whether the sweep task is running
    pub fn is_running(&self) -> bool {
        self.shutdown_sender.lock().is_some()
    }

    /// Start the background expiration sweep; a second call is a no-op
    pub fn start(&self) {
        let mut sender = self.shutdown_sender.lock();
        if sender.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<()>();
        *sender = Some(shutdown_tx);

        let shared = self.shared.clone();
        let sweep_interval = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        shared.sweep().await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Device cache sweep task shutting down");
                        break;
                    }
                }
            }
        });

        info!(
            "Device cache started (default max-age {:?}, sweep every {:?})",
            self.config.default_max_age, self.config.sweep_interval
        );
    }

    /// Stop the background sweep
    pub fn stop(&self) {
        if let Some(sender) = self.shutdown_sender.lock().take() {
            let _ = sender.send(());
            info!("Device cache stopped");
        }
    }
}

impl Drop for DeviceCache {
    fn drop(&mut self) {
        if let Some(sender) = self.shutdown_sender.get_mut().take() {
            let _ = sender.send(());
        }
    }
}
