//! Shared periodic health timer
//!
//! One timer drives every periodic activity of the discovery core. Each
//! subscriber receives the running tick number and applies its own cadence
//! (`tick % n == 0`) instead of owning a dedicated timer. Observers run on
//! the timer task, so they must hand slow work off to a spawned task.

use crate::observers::ObserverList;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Periodic tick source shared by the coordinator and the interface inventory
pub struct HeartbeatTimer {
    period: Duration,
    tick: AtomicU64,
    observers: ObserverList<u64>,
    shutdown_sender: Mutex<Option<mpsc::UnboundedSender<()>>>,
}

impl HeartbeatTimer {
    /// Create a stopped timer with the given tick period
    pub fn new(period: Duration) -> Arc<Self> {
        Arc::new(Self {
            period,
            tick: AtomicU64::new(0),
            observers: ObserverList::new(),
            shutdown_sender: Mutex::new(None),
        })
    }

    /// Register a tick observer; returns `false` if `id` is taken
    pub fn subscribe<F>(&self, id: impl Into<String>, observer: F) -> bool
    where
        F: Fn(&u64) + Send + Sync + 'static,
    {
        self.observers.add(id, observer)
    }

    /// Remove a tick observer
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.observers.remove(id)
    }

    /// Advance one tick and deliver it synchronously
    pub fn tick_now(&self) -> u64 {
        let tick = self.tick.fetch_add(1, Ordering::SeqCst) + 1;
        self.observers.notify(&tick);
        tick
    }

    /// Number of ticks delivered so far
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    /// Tick period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether the background task is running
    pub fn is_running(&self) -> bool {
        self.shutdown_sender.lock().is_some()
    }

    /// Start the background tick task; a second call is a no-op
    pub fn start(self: &Arc<Self>) {
        let mut sender = self.shutdown_sender.lock();
        if sender.is_some() {
            debug!("Heartbeat timer already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<()>();
        *sender = Some(shutdown_tx);

        let timer = Arc::downgrade(self);
        let period = self.period;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick of a tokio interval completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match timer.upgrade() {
                            Some(timer) => {
                                timer.tick_now();
                            }
                            None => break,
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Heartbeat timer task shutting down");
                        break;
                    }
                }
            }
        });

        info!("Heartbeat timer started with {:?} period", self.period);
    }

    /// Stop the background tick task
    pub fn stop(&self) {
        if let Some(sender) = self.shutdown_sender.lock().take() {
            let _ = sender.send(());
            info!("Heartbeat timer stopped");
        }
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        if let Some(sender) = self.shutdown_sender.get_mut().take() {
            let _ = sender.send(());
        }
    }
}
