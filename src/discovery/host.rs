//! Host lifecycle flag
//!
//! Every discovery entry point checks this flag first and becomes a no-op
//! once the host has begun shutting down.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

static GLOBAL_HOST: Lazy<Arc<HostState>> = Lazy::new(|| Arc::new(HostState::default()));

/// Whether the hosting process is shutting down
#[derive(Debug, Default)]
pub struct HostState {
    shutting_down: AtomicBool,
}

impl HostState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide host state
    pub fn global() -> Arc<Self> {
        GLOBAL_HOST.clone()
    }

    /// Flag the host as shutting down; irreversible
    pub fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Host shutdown started, discovery entry points disabled");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_is_sticky() {
        let host = HostState::new();
        assert!(!host.is_shutting_down());
        host.begin_shutdown();
        host.begin_shutdown();
        assert!(host.is_shutting_down());
    }
}
