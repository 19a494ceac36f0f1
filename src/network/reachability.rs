//! Internet reachability check
//!
//! A single ICMP echo to a well-known external address. Echoes are
//! expensive and may need raw-socket privileges, so results are cached for
//! a configurable floor and every failure counts as offline.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Timeout applied to one echo request
pub const ECHO_TIMEOUT: Duration = Duration::from_secs(3);

/// Sends one echo request
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Whether `target` answered within `timeout`
    async fn ping(&self, target: IpAddr, timeout: Duration) -> bool;
}

/// ICMP echo through `surge-ping`
#[derive(Debug, Default, Clone, Copy)]
pub struct IcmpPinger;

#[async_trait]
impl Pinger for IcmpPinger {
    async fn ping(&self, target: IpAddr, timeout: Duration) -> bool {
        let payload = [0u8; 32];
        match tokio::time::timeout(timeout, surge_ping::ping(target, &payload)).await {
            Ok(Ok((_packet, rtt))) => {
                debug!("Echo to {} answered in {:?}", target, rtt);
                true
            }
            Ok(Err(e)) => {
                debug!("Echo to {} failed: {}", target, e);
                false
            }
            Err(_) => {
                debug!("Echo to {} timed out", target);
                false
            }
        }
    }
}

/// Rate-limited reachability check that maintains the "has internet access" flag
pub struct ReachabilityMonitor {
    target: Ipv4Addr,
    floor: Duration,
    pinger: Arc<dyn Pinger>,
    last_check: Mutex<Option<Instant>>,
    online: AtomicBool,
}

impl ReachabilityMonitor {
    /// Create a monitor against `target` that pings at most once per `floor`
    pub fn new(target: Ipv4Addr, floor: Duration) -> Self {
        Self::with_pinger(target, floor, Arc::new(IcmpPinger))
    }

    /// Create a monitor with a custom echo implementation
    pub fn with_pinger(target: Ipv4Addr, floor: Duration, pinger: Arc<dyn Pinger>) -> Self {
        Self {
            target,
            floor,
            pinger,
            last_check: Mutex::new(None),
            online: AtomicBool::new(false),
        }
    }

    /// Echo target address
    pub fn target(&self) -> Ipv4Addr {
        self.target
    }

    /// Last known result
    pub fn has_internet_access(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Ping unless the last check is younger than the floor
    pub async fn check(&self) -> bool {
        {
            let mut last = self.last_check.lock();
            if let Some(at) = *last {
                if at.elapsed() < self.floor {
                    return self.has_internet_access();
                }
            }
            *last = Some(Instant::now());
        }
        self.send_echo().await
    }

    /// Ping regardless of the floor
    pub async fn force_check(&self) -> bool {
        *self.last_check.lock() = Some(Instant::now());
        self.send_echo().await
    }

    async fn send_echo(&self) -> bool {
        let online = self
            .pinger
            .ping(IpAddr::V4(self.target), ECHO_TIMEOUT)
            .await;
        self.online.store(online, Ordering::SeqCst);
        online
    }
}

impl Default for ReachabilityMonitor {
    fn default() -> Self {
        Self::new(Ipv4Addr::new(8, 8, 8, 8), Duration::from_secs(60))
    }
}
